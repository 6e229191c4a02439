use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Duration;

pub const DEFAULT_OUTPUT_DIR: &str = "mflux_output";
pub const DEFAULT_SESSION_TIMEOUT_HOURS: f64 = 4.0;
pub const DEFAULT_GENERATE_COMMAND: &str = "mflux-generate";
pub const DEFAULT_BRAINSTORM_MODEL: &str = "claude-3-7-sonnet-latest";
pub const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";

#[derive(Debug, Clone, PartialEq)]
pub struct CommanderConfig {
    pub output_root: PathBuf,
    pub session_expiry: Duration,
    /// Program followed by fixed leading arguments.
    pub generator_command: Vec<String>,
    pub styles_dir: PathBuf,
    pub brainstorm_model: String,
    pub anthropic_api_base: String,
}

impl CommanderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let output_root = lookup("MFLUX_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let timeout_hours = match lookup("MFLUX_SESSION_TIMEOUT_HOURS") {
            Some(raw) => {
                let hours = raw
                    .trim()
                    .parse::<f64>()
                    .with_context(|| format!("MFLUX_SESSION_TIMEOUT_HOURS is not a number: {raw}"))?;
                if !hours.is_finite() || hours <= 0.0 {
                    bail!("MFLUX_SESSION_TIMEOUT_HOURS must be positive (got {raw})");
                }
                hours
            }
            None => DEFAULT_SESSION_TIMEOUT_HOURS,
        };

        let generator_command = match lookup("MFLUX_GENERATE_BIN") {
            Some(raw) => {
                let parts = shell_words::split(&raw)
                    .with_context(|| format!("MFLUX_GENERATE_BIN is not a valid command: {raw}"))?;
                if parts.is_empty() {
                    bail!("MFLUX_GENERATE_BIN is empty");
                }
                parts
            }
            None => vec![DEFAULT_GENERATE_COMMAND.to_string()],
        };

        let styles_dir = lookup("MFLUX_STYLES_DIR")
            .map(PathBuf::from)
            .or_else(|| {
                lookup("HOME").map(|home| {
                    PathBuf::from(home)
                        .join(".mflux_commander")
                        .join("styles")
                })
            })
            .unwrap_or_else(|| PathBuf::from(".mflux_commander").join("styles"));

        Ok(Self {
            output_root,
            session_expiry: hours_to_duration(timeout_hours),
            generator_command,
            styles_dir,
            brainstorm_model: lookup("MFLUX_BRAINSTORM_MODEL")
                .unwrap_or_else(|| DEFAULT_BRAINSTORM_MODEL.to_string()),
            anthropic_api_base: lookup("ANTHROPIC_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_BASE.to_string()),
        })
    }
}

fn hours_to_duration(hours: f64) -> Duration {
    Duration::milliseconds((hours * 3_600_000.0).round() as i64)
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
