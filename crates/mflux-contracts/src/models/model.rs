use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CommanderError;

/// Model selector understood by the external generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// Distilled model, usable at a single step.
    #[default]
    Schnell,
    Dev,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Schnell, Model::Dev];

    pub fn as_str(self) -> &'static str {
        match self {
            Model::Schnell => "schnell",
            Model::Dev => "dev",
        }
    }

    pub fn default_steps(self) -> u32 {
        match self {
            Model::Schnell => 1,
            Model::Dev => 5,
        }
    }

    pub fn is_default(self) -> bool {
        self == Model::default()
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = CommanderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        Model::ALL
            .into_iter()
            .find(|model| model.as_str() == normalized)
            .ok_or_else(|| {
                let available = Model::ALL.map(Model::as_str).join(", ");
                CommanderError::validation(
                    "--model",
                    format!("unknown model '{raw}' (available: {available})"),
                )
            })
    }
}
