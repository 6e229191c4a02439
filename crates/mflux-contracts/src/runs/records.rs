use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::documents::{read_document, write_document};
use crate::plan::Variation;

pub const RECORD_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Success,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Pending => "pending",
            Outcome::Success => "success",
            Outcome::Failed => "failed",
        }
    }
}

/// Per-image document (`variation_NN.json`), written once per executed variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub run_id: u32,
    pub index: u32,
    #[serde(flatten)]
    pub variation: Variation,
    pub outcome: Outcome,
    pub image_file: Option<String>,
    pub sidecar_file: Option<String>,
    pub diagnostic: Option<String>,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub generation_time_s: f64,
    pub recorded_at: String,
    #[serde(default)]
    pub generator_metadata: Map<String, Value>,
}

impl ImageRecord {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

pub fn image_file_name(index: u32) -> String {
    format!("image_{index:02}.png")
}

pub fn sidecar_file_name(index: u32) -> String {
    format!("image_{index:02}.json")
}

pub fn record_file_name(index: u32) -> String {
    format!("variation_{index:02}.json")
}

/// Index encoded in a `variation_NN.json` name.
pub fn parse_record_index(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix("variation_")?
        .strip_suffix(".json")?
        .parse::<u32>()
        .ok()
}

pub fn write_record(path: &Path, record: &ImageRecord) -> anyhow::Result<()> {
    write_document(path, record)
}

pub fn read_record(path: &Path) -> anyhow::Result<ImageRecord> {
    read_document(path)
}

fn default_schema_version() -> u64 {
    RECORD_SCHEMA_VERSION
}
