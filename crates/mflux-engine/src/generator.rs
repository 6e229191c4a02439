use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use mflux_contracts::plan::Variation;
use mflux_contracts::runs::documents::write_document;
use mflux_contracts::runs::records::{image_file_name, sidecar_file_name};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::config::CommanderConfig;

pub const GENERATION_LOG_FILE: &str = "generation.log";
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;
pub const DIAGNOSTIC_MAX_CHARS: usize = 2048;

/// Outcome of one generator invocation. Never mutated after recording.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageResult {
    Success {
        image_path: PathBuf,
        sidecar_path: Option<PathBuf>,
        generation_time_s: f64,
    },
    Failure {
        diagnostic: String,
        exit_code: Option<i32>,
        generation_time_s: f64,
    },
}

impl ImageResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ImageResult::Success { .. })
    }

    pub fn generation_time_s(&self) -> f64 {
        match self {
            ImageResult::Success {
                generation_time_s, ..
            }
            | ImageResult::Failure {
                generation_time_s, ..
            } => *generation_time_s,
        }
    }
}

/// Where one variation's outputs go, derived from its position in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    pub run_dir: PathBuf,
    pub index: u32,
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub log_path: PathBuf,
    pub metadata: bool,
}

impl InvocationContext {
    pub fn for_position(run_dir: &Path, index: u32, metadata: bool) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            index,
            image_path: run_dir.join(image_file_name(index)),
            sidecar_path: run_dir.join(sidecar_file_name(index)),
            log_path: run_dir.join(GENERATION_LOG_FILE),
            metadata,
        }
    }
}

pub trait ImageGenerator {
    fn name(&self) -> &str;
    /// Runs one variation to completion. Failures are results, not errors.
    fn invoke(&self, variation: &Variation, context: &InvocationContext) -> ImageResult;
}

/// Runs the external `mflux-generate` style command once per variation.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    base_args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
        }
    }

    /// Program followed by fixed leading arguments, e.g. `["python3", "-m", "mflux"]`.
    pub fn from_command(command: &[String]) -> Result<Self> {
        let Some((program, base_args)) = command.split_first() else {
            bail!("generator command is empty");
        };
        Ok(Self::new(program.clone(), base_args.to_vec()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn command_args(&self, variation: &Variation, context: &InvocationContext) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend([
            "--prompt".to_string(),
            variation.prompt.clone(),
            "--model".to_string(),
            variation.model.as_str().to_string(),
            "--width".to_string(),
            variation.resolution.width.to_string(),
            "--height".to_string(),
            variation.resolution.height.to_string(),
            "--steps".to_string(),
            variation.steps.to_string(),
            "--seed".to_string(),
            variation.seed.to_string(),
            "--output".to_string(),
            context.image_path.to_string_lossy().into_owned(),
        ]);
        if context.metadata {
            args.push("--metadata".to_string());
        }
        args
    }

    fn command_line(&self, args: &[String]) -> String {
        let mut words = vec![self.program.clone()];
        words.extend(args.iter().cloned());
        shell_words::join(words)
    }
}

impl ImageGenerator for CommandGenerator {
    fn name(&self) -> &str {
        "mflux"
    }

    fn invoke(&self, variation: &Variation, context: &InvocationContext) -> ImageResult {
        let args = self.command_args(variation, context);
        let started = Instant::now();
        let output = Command::new(&self.program).args(&args).output();
        let generation_time_s = started.elapsed().as_secs_f64();

        let command_line = self.command_line(&args);
        let output = match output {
            Ok(output) => output,
            Err(err) => {
                let diagnostic = format!("failed to launch {}: {err}", self.program);
                append_log(&context.log_path, context.index, &command_line, None, &diagnostic);
                return ImageResult::Failure {
                    diagnostic,
                    exit_code: None,
                    generation_time_s,
                };
            }
        };
        append_log(
            &context.log_path,
            context.index,
            &command_line,
            Some(&output),
            "",
        );

        let exit_code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let status = match exit_code {
                Some(code) => format!("generator exited with status {code}"),
                None => "generator terminated by signal".to_string(),
            };
            let tail = stderr_tail(&stderr);
            let diagnostic = if tail.is_empty() {
                status
            } else {
                format!("{status}: {tail}")
            };
            return ImageResult::Failure {
                diagnostic,
                exit_code,
                generation_time_s,
            };
        }
        if !context.image_path.is_file() {
            return ImageResult::Failure {
                diagnostic: format!(
                    "generator exited successfully but wrote no image at {}",
                    context.image_path.display()
                ),
                exit_code,
                generation_time_s,
            };
        }
        ImageResult::Success {
            image_path: context.image_path.clone(),
            sidecar_path: context
                .sidecar_path
                .is_file()
                .then(|| context.sidecar_path.clone()),
            generation_time_s,
        }
    }
}

pub const GENERATOR_NAMES: [&str; 2] = ["mflux", "dryrun"];

/// Generator selected by name (`mflux` runs the configured command).
pub fn build_generator(name: &str, config: &CommanderConfig) -> Result<Box<dyn ImageGenerator>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mflux" => Ok(Box::new(CommandGenerator::from_command(
            &config.generator_command,
        )?)),
        "dryrun" => Ok(Box::new(DryrunGenerator)),
        other => bail!(
            "unknown generator '{other}' (available: {})",
            GENERATOR_NAMES.join(", ")
        ),
    }
}

/// Last lines of a generator's stderr, bounded in size.
pub fn stderr_tail(stderr: &str) -> String {
    let lines = stderr
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<&str>>();
    let start = lines.len().saturating_sub(DIAGNOSTIC_TAIL_LINES);
    let joined = lines[start..].join("\n");
    let count = joined.chars().count();
    if count <= DIAGNOSTIC_MAX_CHARS {
        return joined;
    }
    joined.chars().skip(count - DIAGNOSTIC_MAX_CHARS).collect()
}

fn append_log(
    log_path: &Path,
    index: u32,
    command_line: &str,
    output: Option<&Output>,
    note: &str,
) {
    if let Err(err) = write_log_entry(log_path, index, command_line, output, note) {
        tracing::warn!("could not append to generation log: {err:#}");
    }
}

fn write_log_entry(
    log_path: &Path,
    index: u32,
    command_line: &str,
    output: Option<&Output>,
    note: &str,
) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;
    writeln!(file, "== variation {index:02}: {command_line}")?;
    if let Some(output) = output {
        file.write_all(&output.stdout)?;
        file.write_all(&output.stderr)?;
        writeln!(file, "== exit: {}", output.status)?;
    }
    if !note.is_empty() {
        writeln!(file, "{note}")?;
    }
    Ok(())
}

/// Writes flat colour swatches instead of running a model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGenerator;

impl ImageGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn invoke(&self, variation: &Variation, context: &InvocationContext) -> ImageResult {
        let started = Instant::now();
        let written = write_dryrun_outputs(variation, context);
        let generation_time_s = started.elapsed().as_secs_f64();
        let command_line = format!("dryrun seed={} steps={}", variation.seed, variation.steps);
        match written {
            Ok(sidecar_path) => {
                append_log(&context.log_path, context.index, &command_line, None, "ok");
                ImageResult::Success {
                    image_path: context.image_path.clone(),
                    sidecar_path,
                    generation_time_s,
                }
            }
            Err(err) => {
                let diagnostic = format!("{err:#}");
                append_log(&context.log_path, context.index, &command_line, None, &diagnostic);
                ImageResult::Failure {
                    diagnostic,
                    exit_code: None,
                    generation_time_s,
                }
            }
        }
    }
}

fn write_dryrun_outputs(variation: &Variation, context: &InvocationContext) -> Result<Option<PathBuf>> {
    let digest = swatch_digest(&variation.prompt, variation.seed);
    let (r, g, b) = (digest[0], digest[1], digest[2]);
    let mut image = RgbImage::new(variation.resolution.width, variation.resolution.height);
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    if let Some(parent) = context.image_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save(&context.image_path)
        .with_context(|| format!("failed to save {}", context.image_path.display()))?;

    if !context.metadata {
        return Ok(None);
    }
    write_document(
        &context.sidecar_path,
        &json!({
            "generator": "dryrun",
            "swatch_id": hex::encode(&digest[..4]),
            "prompt": variation.prompt,
            "model": variation.model.as_str(),
            "seed": variation.seed,
            "steps": variation.steps,
            "width": variation.resolution.width,
            "height": variation.resolution.height,
        }),
    )?;
    Ok(Some(context.sidecar_path.clone()))
}

fn swatch_digest(prompt: &str, seed: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;

    use mflux_contracts::models::{Model, Resolution};
    use mflux_contracts::plan::Variation;

    use super::{
        build_generator, stderr_tail, CommandGenerator, DryrunGenerator, ImageGenerator, ImageResult,
        InvocationContext, DIAGNOSTIC_MAX_CHARS,
    };

    /// Stand-in for `mflux-generate`: writes the requested image (and a
    /// side-car with `--metadata`) unless the output name matches `$FAIL_ON`.
    pub(crate) const FAKE_GENERATOR: &str = r#"
out=""
meta=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    --metadata) meta="1"; shift ;;
    *) shift ;;
  esac
done
echo "loading model"
if [ -n "$FAIL_ON" ]; then
  case "$out" in
    *"$FAIL_ON") echo "RuntimeError: out of memory" >&2; exit 3 ;;
  esac
fi
printf 'png' > "$out"
if [ -n "$meta" ]; then
  printf '{"guidance": 3.5}' > "${out%.png}.json"
fi
"#;

    /// `sh script` generator that fails for outputs ending in `fail_on` (empty: never).
    pub(crate) fn fake_generator(dir: &Path, fail_on: &str) -> anyhow::Result<CommandGenerator> {
        let script = dir.join("fake-generate.sh");
        let body = format!("FAIL_ON='{fail_on}'\n{FAKE_GENERATOR}");
        std::fs::write(&script, body)?;
        Ok(CommandGenerator::new(
            "sh",
            vec![script.to_string_lossy().into_owned()],
        ))
    }

    fn variation() -> Variation {
        Variation {
            seed: 185769,
            steps: 3,
            resolution: Resolution::new(64, 32),
            prompt: "a forest".to_string(),
            model: Model::Dev,
        }
    }

    #[test]
    fn command_args_are_deterministic() {
        let generator = CommandGenerator::new("mflux-generate", vec!["--quantize".into(), "8".into()]);
        let context = InvocationContext::for_position(Path::new("/out/run_1"), 2, true);
        let args = generator.command_args(&variation(), &context);
        assert_eq!(
            args,
            vec![
                "--quantize", "8", "--prompt", "a forest", "--model", "dev", "--width", "64",
                "--height", "32", "--steps", "3", "--seed", "185769", "--output",
                "/out/run_1/image_02.png", "--metadata",
            ]
        );
        assert_eq!(args, generator.command_args(&variation(), &context));
    }

    #[test]
    fn generators_are_selected_by_name() -> anyhow::Result<()> {
        let config = crate::config::CommanderConfig::from_lookup(|_| None)?;
        assert_eq!(build_generator("dryrun", &config)?.name(), "dryrun");
        assert_eq!(build_generator("MFLUX", &config)?.name(), "mflux");
        assert!(build_generator("sdxl", &config).is_err());
        Ok(())
    }

    #[test]
    fn tail_keeps_last_lines_and_caps_length() {
        let many = (1..=30).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n");
        let tail = stderr_tail(&many);
        assert!(tail.starts_with("line 11\n"));
        assert!(tail.ends_with("line 30"));

        let long = "x".repeat(5000);
        assert_eq!(stderr_tail(&long).chars().count(), DIAGNOSTIC_MAX_CHARS);
    }

    #[cfg(unix)]
    #[test]
    fn command_generator_reports_success_and_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generator = fake_generator(temp.path(), "image_02.png")?;
        let run_dir = temp.path().join("run_1");
        std::fs::create_dir_all(&run_dir)?;

        let ok = generator.invoke(&variation(), &InvocationContext::for_position(&run_dir, 1, true));
        match &ok {
            ImageResult::Success {
                image_path,
                sidecar_path,
                ..
            } => {
                assert!(image_path.ends_with("image_01.png"));
                assert!(sidecar_path.as_ref().is_some_and(|p| p.ends_with("image_01.json")));
            }
            other => panic!("expected success, got {other:?}"),
        }

        let failed = generator.invoke(&variation(), &InvocationContext::for_position(&run_dir, 2, false));
        match failed {
            ImageResult::Failure {
                diagnostic,
                exit_code,
                ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(diagnostic.contains("out of memory"), "{diagnostic}");
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let log = std::fs::read_to_string(run_dir.join("generation.log"))?;
        assert!(log.contains("== variation 01:"));
        assert!(log.contains("== variation 02:"));
        assert!(log.contains("loading model"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn clean_exit_without_image_is_a_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let script = temp.path().join("silent-generate.sh");
        std::fs::write(&script, "echo \"nothing to do\"\nexit 0\n")?;
        let generator = CommandGenerator::new("sh", vec![script.to_string_lossy().into_owned()]);

        let context = InvocationContext::for_position(temp.path(), 1, false);
        match generator.invoke(&variation(), &context) {
            ImageResult::Failure {
                diagnostic,
                exit_code,
                ..
            } => {
                assert_eq!(exit_code, Some(0));
                assert!(diagnostic.contains("wrote no image"), "{diagnostic}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!context.image_path.exists());
        Ok(())
    }

    #[test]
    fn launch_error_is_a_failure() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generator = CommandGenerator::new("/nonexistent/mflux-generate", Vec::new());
        let result = generator.invoke(&variation(), &InvocationContext::for_position(temp.path(), 1, false));
        match result {
            ImageResult::Failure {
                diagnostic,
                exit_code,
                ..
            } => {
                assert!(diagnostic.contains("failed to launch"));
                assert_eq!(exit_code, None);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn dryrun_writes_swatch_and_sidecar() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let context = InvocationContext::for_position(temp.path(), 1, true);
        let result = DryrunGenerator.invoke(&variation(), &context);
        assert!(result.is_success());

        let decoded = image::open(&context.image_path)?;
        assert_eq!((decoded.width(), decoded.height()), (64, 32));
        let sidecar: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&context.sidecar_path)?)?;
        assert_eq!(sidecar["seed"], serde_json::json!(185769));
        assert_eq!(sidecar["generator"], serde_json::json!("dryrun"));
        Ok(())
    }
}
