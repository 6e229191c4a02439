use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CommanderError, CommanderResult};
use crate::models::{FormatPresets, Model, Resolution};

/// Iterations drawn when the request names no variation mode.
pub const DEFAULT_ITERATIONS: u32 = 4;
/// Upper bound on `--vary-seed`; each variation is a full generator run.
pub const MAX_VARY_SEED: u32 = 1000;

/// Read-only style lookup consulted while building a request.
pub trait StyleLookup {
    fn style_suffix(&self, name: &str) -> Option<String>;
}

impl StyleLookup for BTreeMap<String, String> {
    fn style_suffix(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoStyles;

impl StyleLookup for NoStyles {
    fn style_suffix(&self, _name: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariationMode {
    Fixed { seed: u64 },
    VarySeed { count: u32 },
    VarySteps { seed: u64, steps: Vec<u32> },
}

impl VariationMode {
    pub fn label(&self) -> &'static str {
        match self {
            VariationMode::Fixed { .. } => "fixed",
            VariationMode::VarySeed { .. } => "vary_seed",
            VariationMode::VarySteps { .. } => "vary_steps",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            VariationMode::Fixed { seed } => format!("fixed seed {seed}"),
            VariationMode::VarySeed { count } => format!("{count} random seeds"),
            VariationMode::VarySteps { seed, steps } => {
                let steps = steps
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<String>>()
                    .join(", ");
                format!("seed {seed} at steps [{steps}]")
            }
        }
    }
}

/// Raw generation request as collected from the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestInputs {
    pub prompt: String,
    pub model: Option<String>,
    pub format: Option<String>,
    pub steps: Option<u32>,
    pub seed: Option<u64>,
    pub vary_seed: Option<u32>,
    pub vary_steps: Option<Vec<u32>>,
    pub style: Option<String>,
    pub metadata: bool,
}

/// Validated request: one model, one resolution, exactly one variation mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: Model,
    pub resolution: Resolution,
    pub steps: u32,
    pub mode: VariationMode,
    pub metadata: bool,
    pub style: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RequestInputs {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn resolve(
        &self,
        styles: &dyn StyleLookup,
        presets: &FormatPresets,
    ) -> CommanderResult<GenerationRequest> {
        let mut warnings = Vec::new();

        let model = match self.model.as_deref() {
            Some(raw) => raw.parse::<Model>()?,
            None => Model::default(),
        };
        let resolution = match self.format.as_deref() {
            Some(raw) => presets.resolve(raw)?,
            None => Resolution::default(),
        };
        if self.steps == Some(0) {
            return Err(CommanderError::validation("--steps", "must be at least 1"));
        }
        let steps = self.steps.unwrap_or_else(|| model.default_steps());
        let mode = self.variation_mode()?;

        let mut prompt = self.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(CommanderError::validation("--prompt", "must not be empty"));
        }
        if let Some(style) = self.style.as_deref() {
            match styles.style_suffix(style) {
                Some(suffix) if !suffix.trim().is_empty() => {
                    prompt = format!("{prompt}, {}", suffix.trim());
                }
                Some(_) => {}
                None => warnings.push(format!("Style '{style}' not found")),
            }
        }

        Ok(GenerationRequest {
            prompt,
            model,
            resolution,
            steps,
            mode,
            metadata: self.metadata,
            style: self.style.clone(),
            warnings,
        })
    }

    fn variation_mode(&self) -> CommanderResult<VariationMode> {
        match (self.seed, self.vary_seed, self.vary_steps.as_ref()) {
            (_, Some(_), Some(_)) => Err(CommanderError::validation(
                "--vary-seed",
                "cannot be combined with --vary-steps",
            )),
            (Some(_), Some(_), None) => Err(CommanderError::validation(
                "--vary-seed",
                "draws its own seeds and cannot be combined with --seed",
            )),
            (None, Some(count), None) => {
                check_vary_seed(count)?;
                Ok(VariationMode::VarySeed { count })
            }
            (None, None, Some(_)) => Err(CommanderError::validation(
                "--vary-steps",
                "requires --seed to be set",
            )),
            (Some(seed), None, Some(steps)) => Ok(VariationMode::VarySteps {
                seed,
                steps: dedup_steps(steps)?,
            }),
            (Some(seed), None, None) => Ok(VariationMode::Fixed { seed }),
            (None, None, None) => Ok(VariationMode::VarySeed {
                count: DEFAULT_ITERATIONS,
            }),
        }
    }
}

/// Parses a comma-separated step list such as `1,3,5,9`.
pub fn parse_step_list(raw: &str) -> CommanderResult<Vec<u32>> {
    let mut steps = Vec::new();
    for part in raw.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        let value = part.parse::<u32>().map_err(|_| {
            CommanderError::validation(
                "--vary-steps",
                format!("'{part}' is not a positive integer (expected e.g. '1,3,5,9')"),
            )
        })?;
        steps.push(value);
    }
    if steps.is_empty() {
        return Err(CommanderError::validation(
            "--vary-steps",
            "step list must not be empty",
        ));
    }
    Ok(steps)
}

pub(crate) fn check_vary_seed(count: u32) -> CommanderResult<()> {
    if count == 0 {
        return Err(CommanderError::validation("--vary-seed", "must be at least 1"));
    }
    if count > MAX_VARY_SEED {
        return Err(CommanderError::validation(
            "--vary-seed",
            format!("must be at most {MAX_VARY_SEED} (got {count})"),
        ));
    }
    Ok(())
}

pub(crate) fn dedup_steps(steps: &[u32]) -> CommanderResult<Vec<u32>> {
    if steps.is_empty() {
        return Err(CommanderError::validation(
            "--vary-steps",
            "step list must not be empty",
        ));
    }
    let mut deduped: Vec<u32> = Vec::with_capacity(steps.len());
    for step in steps {
        if *step == 0 {
            return Err(CommanderError::validation(
                "--vary-steps",
                "every step count must be at least 1",
            ));
        }
        if !deduped.contains(step) {
            deduped.push(*step);
        }
    }
    Ok(deduped)
}
