use std::path::Path;

use serde::{Deserialize, Serialize};

use super::documents::{read_document, write_document};
use super::records::{ImageRecord, Outcome};
use crate::models::{Model, Resolution};
use crate::plan::{GenerationRequest, Variation, VariationMode};

pub const RUN_INFO_SCHEMA_VERSION: u64 = 1;
pub const RUN_INFO_FILE: &str = "run_info.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_finished(self) -> bool {
        self != RunStatus::InProgress
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub index: u32,
    pub seed: u64,
    pub steps: u32,
    pub resolution: Resolution,
    pub outcome: Outcome,
    pub image_file: Option<String>,
    pub diagnostic: Option<String>,
    pub generation_time_s: Option<f64>,
}

/// Aggregate run document (`run_info.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u64,
    pub run_id: u32,
    pub prompt: String,
    pub model: Model,
    pub resolution: Resolution,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    pub steps: u32,
    #[serde(default)]
    pub metadata: bool,
    #[serde(default)]
    pub style: Option<String>,
    pub variation_mode: VariationMode,
    pub status: RunStatus,
    pub started_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
    pub total_variations: u32,
    pub entries: Vec<RunEntry>,
    #[serde(default)]
    pub total_generation_time_s: f64,
    #[serde(default)]
    pub average_generation_time_s: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn new(
        run_id: u32,
        request: &GenerationRequest,
        variations: &[Variation],
        started_at: String,
    ) -> Self {
        let entries = variations
            .iter()
            .enumerate()
            .map(|(idx, variation)| RunEntry {
                index: idx as u32 + 1,
                seed: variation.seed,
                steps: variation.steps,
                resolution: variation.resolution,
                outcome: Outcome::Pending,
                image_file: None,
                diagnostic: None,
                generation_time_s: None,
            })
            .collect::<Vec<RunEntry>>();
        Self {
            schema_version: RUN_INFO_SCHEMA_VERSION,
            run_id,
            prompt: request.prompt.clone(),
            model: request.model,
            resolution: request.resolution,
            width: request.resolution.width,
            height: request.resolution.height,
            steps: request.steps,
            metadata: request.metadata,
            style: request.style.clone(),
            variation_mode: request.mode.clone(),
            status: RunStatus::InProgress,
            started_at,
            finished_at: None,
            total_variations: entries.len() as u32,
            entries,
            total_generation_time_s: 0.0,
            average_generation_time_s: 0.0,
            warnings: request.warnings.clone(),
        }
    }

    /// Folds one per-image record into the matching entry and refreshes totals.
    pub fn apply_record(&mut self, record: &ImageRecord) {
        let entry = RunEntry {
            index: record.index,
            seed: record.variation.seed,
            steps: record.variation.steps,
            resolution: record.variation.resolution,
            outcome: record.outcome,
            image_file: record.image_file.clone(),
            diagnostic: record.diagnostic.clone(),
            generation_time_s: Some(record.generation_time_s),
        };
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.index == record.index)
        {
            Some(existing) => *existing = entry,
            None => {
                self.entries.push(entry);
                self.entries.sort_by_key(|row| row.index);
            }
        }
        self.total_variations = self.total_variations.max(self.entries.len() as u32);
        self.refresh_totals();
    }

    pub fn finish(&mut self, finished_at: String) {
        self.refresh_totals();
        self.status = self.settled_status();
        self.finished_at = Some(finished_at);
    }

    /// Status the run settles on once nothing more will execute.
    pub fn settled_status(&self) -> RunStatus {
        let succeeded = self.succeeded();
        if succeeded == self.total_variations && succeeded > 0 {
            RunStatus::Completed
        } else if succeeded > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }

    pub fn succeeded(&self) -> u32 {
        self.count(Outcome::Success)
    }

    pub fn failed(&self) -> u32 {
        self.count(Outcome::Failed)
    }

    pub fn completed(&self) -> u32 {
        self.succeeded() + self.failed()
    }

    fn count(&self, outcome: Outcome) -> u32 {
        self.entries
            .iter()
            .filter(|entry| entry.outcome == outcome)
            .count() as u32
    }

    fn refresh_totals(&mut self) {
        let times = self
            .entries
            .iter()
            .filter_map(|entry| entry.generation_time_s)
            .collect::<Vec<f64>>();
        self.total_generation_time_s = times.iter().sum();
        self.average_generation_time_s = if times.is_empty() {
            0.0
        } else {
            self.total_generation_time_s / times.len() as f64
        };
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    write_document(path, summary)
}

pub fn read_summary(path: &Path) -> anyhow::Result<RunSummary> {
    read_document(path)
}

fn default_schema_version() -> u64 {
    RUN_INFO_SCHEMA_VERSION
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{read_summary, write_summary, RunStatus, RunSummary};
    use crate::models::{Model, Resolution};
    use crate::plan::{GenerationRequest, Variation, VariationMode};
    use crate::runs::records::{ImageRecord, Outcome, RECORD_SCHEMA_VERSION};

    fn request() -> GenerationRequest {
        GenerationRequest {
            prompt: "a forest".to_string(),
            model: Model::Schnell,
            resolution: Resolution::new(1024, 1024),
            steps: 1,
            mode: VariationMode::VarySeed { count: 3 },
            metadata: true,
            style: None,
            warnings: Vec::new(),
        }
    }

    fn variations() -> Vec<Variation> {
        [11, 22, 33]
            .into_iter()
            .map(|seed| Variation {
                seed,
                steps: 1,
                resolution: Resolution::new(1024, 1024),
                prompt: "a forest".to_string(),
                model: Model::Schnell,
            })
            .collect()
    }

    fn record(index: u32, variation: &Variation, outcome: Outcome, time: f64) -> ImageRecord {
        ImageRecord {
            schema_version: RECORD_SCHEMA_VERSION,
            run_id: 1,
            index,
            variation: variation.clone(),
            outcome,
            image_file: (outcome == Outcome::Success).then(|| format!("image_{index:02}.png")),
            sidecar_file: None,
            diagnostic: (outcome == Outcome::Failed).then(|| "boom".to_string()),
            exit_code: Some(if outcome == Outcome::Success { 0 } else { 1 }),
            generation_time_s: time,
            recorded_at: "2026-10-18T10:00:00+00:00".to_string(),
            generator_metadata: Default::default(),
        }
    }

    #[test]
    fn new_summary_lists_every_planned_variation_as_pending() {
        let summary = RunSummary::new(1, &request(), &variations(), "t0".to_string());
        assert_eq!(summary.total_variations, 3);
        assert!(summary.entries.iter().all(|e| e.outcome == Outcome::Pending));
        assert_eq!(summary.status, RunStatus::InProgress);
        assert_eq!(summary.entries[2].seed, 33);
    }

    #[test]
    fn mixed_outcomes_settle_as_partial_with_timings() -> anyhow::Result<()> {
        let planned = variations();
        let mut summary = RunSummary::new(1, &request(), &planned, "t0".to_string());
        summary.apply_record(&record(1, &planned[0], Outcome::Success, 2.0));
        summary.apply_record(&record(2, &planned[1], Outcome::Failed, 1.0));
        summary.apply_record(&record(3, &planned[2], Outcome::Success, 3.0));
        summary.finish("t1".to_string());

        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.succeeded(), 2);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.total_generation_time_s, 6.0);
        assert_eq!(summary.average_generation_time_s, 2.0);

        let temp = tempfile::tempdir()?;
        let path = temp.path().join("run_info.json");
        write_summary(&path, &summary)?;
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["status"], json!("partial"));
        assert_eq!(parsed["width"], json!(1024));
        assert_eq!(parsed["variation_mode"], json!({"type": "vary_seed", "count": 3}));
        assert_eq!(parsed["entries"][1]["outcome"], json!("failed"));
        assert_eq!(parsed["entries"][1]["diagnostic"], json!("boom"));
        assert_eq!(read_summary(&path)?, summary);
        Ok(())
    }

    #[test]
    fn settled_status_covers_all_and_none() {
        let planned = variations();
        let mut all = RunSummary::new(1, &request(), &planned, "t0".to_string());
        for (idx, variation) in planned.iter().enumerate() {
            all.apply_record(&record(idx as u32 + 1, variation, Outcome::Success, 1.0));
        }
        assert_eq!(all.settled_status(), RunStatus::Completed);

        let none = RunSummary::new(1, &request(), &planned, "t0".to_string());
        assert_eq!(none.settled_status(), RunStatus::Failed);
    }
}
