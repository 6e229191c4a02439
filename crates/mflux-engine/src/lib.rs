pub mod brainstorm;
pub mod config;
pub mod gallery;
pub mod generator;
pub mod repeat;
pub mod session;
pub mod store;
pub mod styles;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use mflux_contracts::events::{now_utc_iso, EventWriter, EVENTS_FILE};
use mflux_contracts::plan::{
    GenerationRequest, RequestInputs, StyleLookup, Variation, VariationPlanner,
};
use mflux_contracts::runs::records::{ImageRecord, Outcome, RECORD_SCHEMA_VERSION};
use mflux_contracts::runs::summary::{RunStatus, RunSummary};
use rand::Rng;
use serde_json::{json, Map};

use crate::gallery::GalleryRenderer;
use crate::generator::{ImageGenerator, ImageResult, InvocationContext};
use crate::session::{Session, SessionManager};
use crate::store::MetadataStore;

/// What a finished `generate` invocation produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session: Session,
    pub run_id: u32,
    pub run_dir: PathBuf,
    pub summary: RunSummary,
    pub run_page: PathBuf,
    pub index_page: PathBuf,
}

impl RunReport {
    pub fn status(&self) -> RunStatus {
        self.summary.status
    }
}

/// Drives one request through planning, generation, recording and rendering.
pub struct RunEngine {
    sessions: SessionManager,
    planner: VariationPlanner,
    generator: Box<dyn ImageGenerator>,
}

impl RunEngine {
    pub fn new(sessions: SessionManager, generator: Box<dyn ImageGenerator>) -> Self {
        Self {
            sessions,
            planner: VariationPlanner::default(),
            generator,
        }
    }

    pub fn with_planner(mut self, planner: VariationPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn planner(&self) -> &VariationPlanner {
        &self.planner
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Plans `inputs` and executes the result in the active session.
    ///
    /// Invalid inputs are rejected before any directory is touched.
    pub fn generate<R: Rng + ?Sized>(
        &self,
        inputs: &RequestInputs,
        styles: &dyn StyleLookup,
        force_new_session: bool,
        rng: &mut R,
    ) -> Result<RunReport> {
        let (request, variations) = self.planner.plan_inputs(inputs, styles, rng)?;
        for warning in &request.warnings {
            tracing::warn!("{warning}");
        }
        let mut session = self.sessions.resolve_session(force_new_session)?;
        self.execute(&mut session, &request, &variations)
    }

    /// Runs the latest run of the active session again, with the fields set
    /// in `overrides` taking precedence. Never starts a session.
    pub fn generate_again<R: Rng + ?Sized>(
        &self,
        overrides: &RequestInputs,
        styles: &dyn StyleLookup,
        rng: &mut R,
    ) -> Result<RunReport> {
        let now = Utc::now();
        let Some(mut session) = self
            .sessions
            .latest()
            .filter(|session| self.sessions.is_fresh(session, now))
        else {
            bail!(
                "no prompt given and no active session under {} to take one from",
                self.sessions.output_root().display()
            );
        };
        let Some(last) = MetadataStore::new(&session.dir).load_all_runs().pop() else {
            bail!("no prompt given and session {} has no earlier run", session.name);
        };
        let inputs = repeat::inputs_from_run(&last.summary, overrides, styles, &self.planner.presets);
        let (request, variations) = self.planner.plan_inputs(&inputs, styles, rng)?;
        for warning in &request.warnings {
            tracing::warn!("{warning}");
        }
        self.execute(&mut session, &request, &variations)
    }

    /// Runs already-planned variations as the next run of `session`.
    pub fn execute(
        &self,
        session: &mut Session,
        request: &GenerationRequest,
        variations: &[Variation],
    ) -> Result<RunReport> {
        let run_id = self.sessions.allocate_run(session)?;
        let run_dir = session.run_dir(run_id);
        let store = MetadataStore::new(&session.dir);
        let gallery = GalleryRenderer::new(store.clone(), self.planner.presets.clone());
        let events = EventWriter::new(run_dir.join(EVENTS_FILE), session.name.clone(), run_id);

        let mut summary = RunSummary::new(run_id, request, variations, now_utc_iso());
        store.record_run_summary(&summary)?;
        events.emit_json(
            "run_started",
            json!({
                "prompt": request.prompt,
                "model": request.model.as_str(),
                "resolution": request.resolution.to_string(),
                "steps": request.steps,
                "variation_mode": request.mode,
                "total_variations": variations.len(),
                "generator": self.generator.name(),
                "warnings": request.warnings,
            }),
        )?;
        render(&gallery, run_id);

        for (position, variation) in variations.iter().enumerate() {
            let index = position as u32 + 1;
            let context = InvocationContext::for_position(&run_dir, index, request.metadata);
            events.emit_json(
                "variation_started",
                json!({
                    "index": index,
                    "seed": variation.seed,
                    "steps": variation.steps,
                    "resolution": variation.resolution.to_string(),
                }),
            )?;

            let result = self.generator.invoke(variation, &context);
            let record = store
                .record_image(image_record(run_id, index, variation, &result))
                .with_context(|| format!("run {run_id} variation {index} could not be recorded"))?;
            summary.apply_record(&record);
            store.record_run_summary(&summary)?;

            match &result {
                ImageResult::Success { .. } => events.emit_json(
                    "image_recorded",
                    json!({
                        "index": index,
                        "image_file": record.image_file,
                        "generation_time_s": record.generation_time_s,
                    }),
                )?,
                ImageResult::Failure {
                    diagnostic,
                    exit_code,
                    ..
                } => {
                    tracing::warn!(run_id, index, "variation failed: {diagnostic}");
                    events.emit_json(
                        "generation_failed",
                        json!({
                            "index": index,
                            "exit_code": exit_code,
                            "diagnostic": diagnostic,
                        }),
                    )?
                }
            };
            render(&gallery, run_id);
            self.sessions.touch(session, Utc::now())?;
        }

        summary.finish(now_utc_iso());
        store.record_run_summary(&summary)?;
        events.emit_json(
            "run_finished",
            json!({
                "status": summary.status.as_str(),
                "succeeded": summary.succeeded(),
                "failed": summary.failed(),
                "total_generation_time_s": summary.total_generation_time_s,
                "average_generation_time_s": summary.average_generation_time_s,
            }),
        )?;
        render(&gallery, run_id);
        self.sessions.touch(session, Utc::now())?;

        Ok(RunReport {
            session: session.clone(),
            run_id,
            run_page: run_dir.join(crate::gallery::PAGE_FILE),
            index_page: session.index_path(),
            run_dir,
            summary,
        })
    }
}

/// Page rendering never aborts a run; the records on disk stay authoritative.
fn render(gallery: &GalleryRenderer, run_id: u32) {
    if let Err(err) = gallery.render_run(run_id) {
        tracing::warn!(run_id, "run page not rendered: {err:#}");
    }
    if let Err(err) = gallery.render_session_index() {
        tracing::warn!("session index not rendered: {err:#}");
    }
}

fn image_record(run_id: u32, index: u32, variation: &Variation, result: &ImageResult) -> ImageRecord {
    let (outcome, image_file, sidecar_file, diagnostic, exit_code) = match result {
        ImageResult::Success {
            image_path,
            sidecar_path,
            ..
        } => (
            Outcome::Success,
            file_name(image_path),
            sidecar_path.as_deref().and_then(file_name),
            None,
            Some(0),
        ),
        ImageResult::Failure {
            diagnostic,
            exit_code,
            ..
        } => (Outcome::Failed, None, None, Some(diagnostic.clone()), *exit_code),
    };
    ImageRecord {
        schema_version: RECORD_SCHEMA_VERSION,
        run_id,
        index,
        variation: variation.clone(),
        outcome,
        image_file,
        sidecar_file,
        diagnostic,
        exit_code,
        generation_time_s: result.generation_time_s(),
        recorded_at: now_utc_iso(),
        generator_metadata: Map::new(),
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use mflux_contracts::models::Resolution;
    use mflux_contracts::plan::{NoStyles, RequestInputs};
    use mflux_contracts::runs::summary::{read_summary, RunStatus, RUN_INFO_FILE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Value;

    use super::RunEngine;
    use crate::generator::DryrunGenerator;
    use crate::session::SessionManager;

    fn sessions(root: &std::path::Path) -> SessionManager {
        SessionManager::new(root.join("out"), Duration::hours(4))
    }

    #[cfg(unix)]
    #[test]
    fn one_failure_in_four_yields_partial_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let generator = crate::generator::tests::fake_generator(temp.path(), "image_03.png")?;
        let engine = RunEngine::new(sessions(temp.path()), Box::new(generator));

        let mut inputs = RequestInputs::new("a forest");
        inputs.vary_seed = Some(4);
        let report = engine.generate(&inputs, &NoStyles, false, &mut StdRng::seed_from_u64(3))?;

        assert_eq!(report.run_id, 1);
        assert_eq!(report.status(), RunStatus::Partial);
        assert_eq!(report.summary.succeeded(), 3);
        assert_eq!(report.summary.failed(), 1);

        let stored = read_summary(&report.run_dir.join(RUN_INFO_FILE))?;
        assert_eq!(stored.status, RunStatus::Partial);
        assert!(stored.finished_at.is_some());
        assert_eq!(
            stored.entries[2].diagnostic.as_deref().map(|d| d.contains("out of memory")),
            Some(true)
        );

        let run_page = std::fs::read_to_string(&report.run_page)?;
        assert_eq!(run_page.matches("<div class='card failed'").count(), 1);
        assert!(!run_page.contains("http-equiv='refresh'"));
        let index = std::fs::read_to_string(&report.index_page)?;
        assert!(index.contains("partial success"));
        assert!(index.contains("3/4"));

        let events = std::fs::read_to_string(report.run_dir.join("events.jsonl"))?;
        let types = events
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).map(|v| v["type"].clone()))
            .collect::<Result<Vec<Value>, _>>()?;
        assert_eq!(types.first(), Some(&Value::from("run_started")));
        assert_eq!(types.last(), Some(&Value::from("run_finished")));
        assert_eq!(types.iter().filter(|t| *t == "generation_failed").count(), 1);
        assert_eq!(types.iter().filter(|t| *t == "image_recorded").count(), 3);
        Ok(())
    }

    #[test]
    fn consecutive_runs_share_the_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = RunEngine::new(sessions(temp.path()), Box::new(DryrunGenerator));
        let mut inputs = RequestInputs::new("lighthouse at dusk");
        inputs.format = Some("64x48".to_string());
        inputs.vary_seed = Some(2);

        let first = engine.generate(&inputs, &NoStyles, false, &mut StdRng::seed_from_u64(1))?;
        let second = engine.generate(&inputs, &NoStyles, false, &mut StdRng::seed_from_u64(2))?;
        assert_eq!(first.session.dir, second.session.dir);
        assert_eq!((first.run_id, second.run_id), (1, 2));
        assert_eq!(second.status(), RunStatus::Completed);
        assert!(second.run_dir.join("image_02.png").is_file());
        assert!(second.run_dir.join("variation_02.json").is_file());

        let forced = engine.generate(&inputs, &NoStyles, true, &mut StdRng::seed_from_u64(3))?;
        assert_ne!(forced.session.dir, first.session.dir);
        assert_eq!(forced.run_id, 1);
        Ok(())
    }

    #[test]
    fn generate_again_repeats_the_last_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = RunEngine::new(sessions(temp.path()), Box::new(DryrunGenerator));
        let mut styles = BTreeMap::new();
        styles.insert("noir".to_string(), "black and white".to_string());

        let mut inputs = RequestInputs::new("harbor at dawn");
        inputs.format = Some("64x48".to_string());
        inputs.vary_seed = Some(3);
        inputs.style = Some("noir".to_string());
        let first = engine.generate(&inputs, &styles, false, &mut StdRng::seed_from_u64(1))?;

        let again = engine.generate_again(
            &RequestInputs::default(),
            &styles,
            &mut StdRng::seed_from_u64(2),
        )?;
        assert_eq!(again.session.dir, first.session.dir);
        assert_eq!(again.run_id, 2);
        assert_eq!(again.summary.prompt, "harbor at dawn, black and white");
        assert_eq!(again.summary.resolution, Resolution::new(64, 48));
        assert_eq!(again.summary.total_variations, 3);

        let mut fixed = RequestInputs::default();
        fixed.seed = Some(42);
        let third = engine.generate_again(&fixed, &styles, &mut StdRng::seed_from_u64(3))?;
        assert_eq!(third.summary.total_variations, 1);
        assert_eq!(third.summary.entries[0].seed, 42);
        Ok(())
    }

    #[test]
    fn generate_again_needs_an_earlier_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = RunEngine::new(sessions(temp.path()), Box::new(DryrunGenerator));
        let err = engine
            .generate_again(&RequestInputs::default(), &NoStyles, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(err.to_string().contains("no active session"), "{err}");
        assert!(!temp.path().join("out").exists());

        let session = engine.sessions().resolve_session(false)?;
        let err = engine
            .generate_again(&RequestInputs::default(), &NoStyles, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(err.to_string().contains("no earlier run"), "{err}");
        assert!(!session.run_dir(1).exists());
        Ok(())
    }

    #[test]
    fn invalid_request_touches_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let engine = RunEngine::new(sessions(temp.path()), Box::new(DryrunGenerator));
        let mut inputs = RequestInputs::new("a forest");
        inputs.vary_steps = Some(vec![1, 3]);

        let err = engine
            .generate(&inputs, &NoStyles, false, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(err.to_string().contains("requires --seed"));
        assert!(!temp.path().join("out").exists());
        Ok(())
    }
}
