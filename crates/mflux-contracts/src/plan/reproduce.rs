use super::planner::Variation;
use super::request::RequestInputs;
use crate::models::FormatPresets;

/// Binary name used in reproduction commands.
pub const COMMAND_NAME: &str = "mflux-commander";

/// Fixed-mode request that plans back to exactly `variation`.
pub fn reproduction_inputs(variation: &Variation, presets: &FormatPresets) -> RequestInputs {
    RequestInputs {
        prompt: variation.prompt.clone(),
        model: (!variation.model.is_default()).then(|| variation.model.as_str().to_string()),
        format: presets.format_argument(variation.resolution),
        steps: Some(variation.steps),
        seed: Some(variation.seed),
        vary_seed: None,
        vary_steps: None,
        style: None,
        metadata: false,
    }
}

impl RequestInputs {
    /// `generate` arguments (without the binary name) describing these inputs.
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["generate".to_string()];
        if self.prompt.starts_with('-') {
            args.push(format!("--prompt={}", self.prompt));
        } else {
            args.push("--prompt".to_string());
            args.push(self.prompt.clone());
        }
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if let Some(steps) = self.steps {
            args.push("--steps".to_string());
            args.push(steps.to_string());
        }
        if let Some(count) = self.vary_seed {
            args.push("--vary-seed".to_string());
            args.push(count.to_string());
        }
        if let Some(steps) = &self.vary_steps {
            args.push("--vary-steps".to_string());
            args.push(
                steps
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<String>>()
                    .join(","),
            );
        }
        if let Some(format) = &self.format {
            args.push("--format".to_string());
            args.push(format.clone());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(style) = &self.style {
            args.push("--style".to_string());
            args.push(style.clone());
        }
        if self.metadata {
            args.push("--metadata".to_string());
        }
        args
    }
}

/// Shell-quoted command line that regenerates `variation`.
pub fn reproduction_command(variation: &Variation, presets: &FormatPresets) -> String {
    let mut args = vec![COMMAND_NAME.to_string()];
    args.extend(reproduction_inputs(variation, presets).to_cli_args());
    shell_words::join(args)
}
