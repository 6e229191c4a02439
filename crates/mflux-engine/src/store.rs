use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mflux_contracts::plan::{GenerationRequest, VariationMode};
use mflux_contracts::runs::documents::read_document;
use mflux_contracts::runs::records::{
    parse_record_index, read_record, record_file_name, write_record, ImageRecord,
};
use mflux_contracts::runs::summary::{read_summary, write_summary, RunSummary, RUN_INFO_FILE};
use mflux_contracts::CommanderError;
use serde_json::{Map, Value};

use crate::session::{list_run_ids, run_dir_name};

/// Everything persisted for one run, as the gallery sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub run_id: u32,
    pub summary: RunSummary,
    /// Recorded variations in position order.
    pub images: Vec<ImageRecord>,
    pub warnings: Vec<String>,
    /// True when `run_info.json` was missing or unreadable.
    pub rebuilt: bool,
}

impl RunSnapshot {
    pub fn first_success(&self) -> Option<&ImageRecord> {
        self.images.iter().find(|record| record.is_success())
    }
}

/// Sole writer of per-image records and run summaries inside one session.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    session_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            session_dir: session_dir.into(),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn run_dir(&self, run_id: u32) -> PathBuf {
        self.session_dir.join(run_dir_name(run_id))
    }

    /// Writes `variation_NN.json`, folding in whatever the generator reported
    /// in its side-car file.
    pub fn record_image(&self, mut record: ImageRecord) -> Result<ImageRecord> {
        let run_dir = self.run_dir(record.run_id);
        if let Some(sidecar) = record.sidecar_file.clone() {
            let sidecar_path = run_dir.join(&sidecar);
            match read_sidecar(&sidecar_path) {
                Ok(fields) => {
                    for (key, value) in fields {
                        record.generator_metadata.entry(key).or_insert(value);
                    }
                }
                Err(err) => {
                    tracing::warn!(path = %sidecar_path.display(), "generator side-car ignored: {err:#}");
                    record.sidecar_file = None;
                }
            }
        }
        let path = run_dir.join(record_file_name(record.index));
        write_record(&path, &record)
            .with_context(|| format!("failed to record variation {}", record.index))?;
        Ok(record)
    }

    pub fn record_run_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        let path = self.run_dir(summary.run_id).join(RUN_INFO_FILE);
        write_summary(&path, summary)
            .with_context(|| format!("failed to write summary for run {}", summary.run_id))?;
        Ok(path)
    }

    /// Loads one run. Per-image records win over the summary's entries.
    pub fn load_run(&self, run_id: u32) -> Result<RunSnapshot> {
        let run_dir = self.run_dir(run_id);
        if !run_dir.is_dir() {
            return Err(CommanderError::directory(&run_dir, "run directory does not exist").into());
        }

        let mut warnings = Vec::new();
        let images = self.load_records(&run_dir, &mut warnings);

        let summary_path = run_dir.join(RUN_INFO_FILE);
        let stored = if summary_path.exists() {
            match read_summary(&summary_path) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    let message = format!("{RUN_INFO_FILE} unreadable, rebuilt from variation records: {err:#}");
                    tracing::warn!(run_id, "{message}");
                    warnings.push(message);
                    None
                }
            }
        } else {
            let message = format!("{RUN_INFO_FILE} missing, rebuilt from variation records");
            tracing::warn!(run_id, "{message}");
            warnings.push(message);
            None
        };

        let rebuilt = stored.is_none();
        let mut summary = match stored {
            Some(summary) => summary,
            None => rebuild_summary(run_id, &images).ok_or_else(|| CommanderError::MetadataCorruption {
                path: summary_path.clone(),
                message: "no run summary and no variation records".to_string(),
            })?,
        };
        summary.run_id = run_id;
        for record in &images {
            summary.apply_record(record);
        }

        Ok(RunSnapshot {
            run_id,
            summary,
            images,
            warnings,
            rebuilt,
        })
    }

    /// Every loadable run, ascending by id. A broken run is skipped.
    pub fn load_all_runs(&self) -> Vec<RunSnapshot> {
        list_run_ids(&self.session_dir)
            .into_iter()
            .filter_map(|run_id| match self.load_run(run_id) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    tracing::warn!(run_id, "skipping run: {err:#}");
                    None
                }
            })
            .collect()
    }

    fn load_records(&self, run_dir: &Path, warnings: &mut Vec<String>) -> Vec<ImageRecord> {
        let Ok(entries) = std::fs::read_dir(run_dir) else {
            return Vec::new();
        };
        let mut indexed = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                parse_record_index(&name).map(|index| (index, entry.path()))
            })
            .collect::<Vec<(u32, PathBuf)>>();
        indexed.sort_by_key(|(index, _)| *index);

        let mut records = Vec::with_capacity(indexed.len());
        for (index, path) in indexed {
            match read_record(&path) {
                Ok(record) if record.index == index => records.push(record),
                Ok(record) => {
                    let message = format!(
                        "{} claims index {} and was skipped",
                        path.display(),
                        record.index
                    );
                    tracing::warn!("{message}");
                    warnings.push(message);
                }
                Err(err) => {
                    let message = format!("skipped corrupt record {}: {err:#}", path.display());
                    tracing::warn!("{message}");
                    warnings.push(message);
                }
            }
        }
        records
    }
}

fn read_sidecar(path: &Path) -> Result<Map<String, Value>> {
    let value: Value = read_document(path)?;
    match value {
        Value::Object(fields) => Ok(fields),
        other => anyhow::bail!("expected a JSON object, found {other}"),
    }
}

/// Best-effort summary for a run whose `run_info.json` is gone.
fn rebuild_summary(run_id: u32, images: &[ImageRecord]) -> Option<RunSummary> {
    let first = images.first()?;
    let variation = &first.variation;
    let seeds_equal = images
        .iter()
        .all(|record| record.variation.seed == variation.seed);
    let mode = if images.len() == 1 {
        VariationMode::Fixed {
            seed: variation.seed,
        }
    } else if seeds_equal {
        VariationMode::VarySteps {
            seed: variation.seed,
            steps: images.iter().map(|record| record.variation.steps).collect(),
        }
    } else {
        VariationMode::VarySeed {
            count: images.len() as u32,
        }
    };
    let request = GenerationRequest {
        prompt: variation.prompt.clone(),
        model: variation.model,
        resolution: variation.resolution,
        steps: variation.steps,
        mode,
        metadata: first.sidecar_file.is_some(),
        style: None,
        warnings: Vec::new(),
    };
    let started_at = images
        .iter()
        .map(|record| record.recorded_at.clone())
        .min()
        .unwrap_or_default();
    Some(RunSummary::new(run_id, &request, &[], started_at))
}
