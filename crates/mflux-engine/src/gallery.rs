use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mflux_contracts::models::FormatPresets;
use mflux_contracts::plan::reproduction_command;
use mflux_contracts::runs::records::ImageRecord;
use mflux_contracts::runs::summary::RunStatus;

use crate::session::run_dir_name;
use crate::store::{MetadataStore, RunSnapshot};

pub const PAGE_FILE: &str = "index.html";
const REFRESH_SECONDS: u32 = 5;
const PROMPT_EXCERPT_CHARS: usize = 80;

const STYLE: &str = "    body { font-family: Arial, sans-serif; background: #f6f6f6; margin: 0; padding: 20px; color: #222; }
    .grid { display: grid; grid-template-columns: repeat(auto-fill, minmax(260px, 1fr)); gap: 16px; }
    .card { background: white; border-radius: 10px; overflow: hidden; box-shadow: 0 2px 8px rgba(0,0,0,0.08); }
    .card.failed { background: #fff1f0; border: 2px dashed #d9363e; }
    .thumb { width: 100%; height: 220px; background: #eee; display: flex; align-items: center; justify-content: center; }
    .thumb img { max-width: 100%; max-height: 100%; }
    .placeholder { color: #d9363e; font-weight: bold; }
    .meta { padding: 10px; font-size: 13px; }
    .params td { padding: 2px 12px 2px 0; font-size: 14px; }
    .status { display: inline-block; padding: 2px 8px; border-radius: 8px; font-size: 12px; background: #ddd; }
    .status.completed { background: #d4f4dd; }
    .status.partial { background: #fff3c4; }
    .status.failed { background: #ffd6d6; }
    .status.in_progress { background: #d6e8ff; }
    pre { white-space: pre-wrap; word-break: break-all; background: #f0f0f0; padding: 6px; font-size: 12px; }
    a { color: #0066cc; text-decoration: none; }
";

/// Read-only view over a session's metadata, rendered to static HTML.
///
/// Output depends only on what the store holds, so re-rendering unchanged
/// metadata produces byte-identical pages.
#[derive(Debug, Clone)]
pub struct GalleryRenderer {
    store: MetadataStore,
    presets: FormatPresets,
}

impl GalleryRenderer {
    pub fn new(store: MetadataStore, presets: FormatPresets) -> Self {
        Self { store, presets }
    }

    pub fn render_run(&self, run_id: u32) -> Result<PathBuf> {
        let snapshot = self.store.load_run(run_id)?;
        let path = self.store.run_dir(run_id).join(PAGE_FILE);
        write_page(&path, &run_page(&snapshot, &self.presets))?;
        Ok(path)
    }

    pub fn render_session_index(&self) -> Result<PathBuf> {
        let runs = self.store.load_all_runs();
        let path = self.store.session_dir().join(PAGE_FILE);
        write_page(&path, &session_page(&session_name(self.store.session_dir()), &runs))?;
        Ok(path)
    }

    /// Every run page plus the index; returns how many run pages were written.
    pub fn render_all(&self) -> Result<usize> {
        let runs = self.store.load_all_runs();
        for snapshot in &runs {
            let path = self.store.run_dir(snapshot.run_id).join(PAGE_FILE);
            write_page(&path, &run_page(snapshot, &self.presets))?;
        }
        let path = self.store.session_dir().join(PAGE_FILE);
        write_page(&path, &session_page(&session_name(self.store.session_dir()), &runs))?;
        Ok(runs.len())
    }
}

pub fn run_page(snapshot: &RunSnapshot, presets: &FormatPresets) -> String {
    let summary = &snapshot.summary;
    let mut params = String::new();
    let rows = [
        ("Model", summary.model.as_str().to_string()),
        ("Resolution", summary.resolution.to_string()),
        ("Steps", summary.steps.to_string()),
        ("Variations", summary.variation_mode.describe()),
        ("Style", summary.style.clone().unwrap_or_else(|| "none".to_string())),
        ("Started", summary.started_at.clone()),
        (
            "Finished",
            summary.finished_at.clone().unwrap_or_else(|| "-".to_string()),
        ),
        (
            "Progress",
            format!(
                "{} of {} done ({} succeeded, {} failed)",
                summary.completed(),
                summary.total_variations,
                summary.succeeded(),
                summary.failed()
            ),
        ),
        (
            "Generation time",
            format!(
                "{:.1}s total, {:.1}s average",
                summary.total_generation_time_s, summary.average_generation_time_s
            ),
        ),
    ];
    for (label, value) in rows {
        let _ = write!(
            params,
            "\n    <tr><td>{label}</td><td>{}</td></tr>",
            escape_html(&value)
        );
    }

    let mut notes = String::new();
    for warning in summary.warnings.iter().chain(&snapshot.warnings) {
        let _ = write!(notes, "\n    <li>{}</li>", escape_html(warning));
    }
    let notes = if notes.is_empty() {
        String::new()
    } else {
        format!("\n  <ul class='warnings'>{notes}\n  </ul>")
    };

    let cards = snapshot
        .images
        .iter()
        .map(|record| variation_card(record, presets))
        .collect::<Vec<String>>()
        .join("\n");

    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>{refresh}\n  <title>Run {run_id}: {title}</title>\n  <style>\n{STYLE}  </style>\n</head>\n<body>\n  <p><a href='../{PAGE_FILE}'>&larr; session</a></p>\n  <h1>Run {run_id} <span class='status {status}'>{status_label}</span></h1>\n  <p class='prompt'>{prompt}</p>\n  <table class='params'>{params}\n  </table>{notes}\n  <div class='grid'>\n{cards}\n  </div>\n</body>\n</html>\n",
        refresh = refresh_tag(summary.status),
        run_id = snapshot.run_id,
        title = escape_html(&excerpt(&summary.prompt)),
        status = summary.status.as_str(),
        status_label = status_label(summary.status),
        prompt = escape_html(&summary.prompt),
    )
}

/// One card per recorded variation; failures render as placeholders.
pub fn variation_card(record: &ImageRecord, presets: &FormatPresets) -> String {
    let variation = &record.variation;
    let caption = format!(
        "#{:02} &middot; seed {} &middot; {} steps &middot; {} &middot; {:.1}s",
        record.index, variation.seed, variation.steps, variation.resolution, record.generation_time_s
    );
    match (&record.image_file, record.is_success()) {
        (Some(image_file), true) => format!(
            "    <div class='card' id='variation-{index:02}'><div class='thumb'><a href='{src}'><img src='{src}' alt='variation {index}'></a></div><div class='meta'><div>{caption}</div><pre class='repro'>{command}</pre></div></div>",
            index = record.index,
            src = escape_html(image_file),
            command = escape_html(&reproduction_command(variation, presets)),
        ),
        _ => format!(
            "    <div class='card failed' id='variation-{index:02}'><div class='thumb'><span class='placeholder'>generation failed</span></div><div class='meta'><div>{caption}</div><pre class='diagnostic'>{diagnostic}</pre></div></div>",
            index = record.index,
            diagnostic = escape_html(record.diagnostic.as_deref().unwrap_or("no diagnostic recorded")),
        ),
    }
}

/// Session index, newest run first.
pub fn session_page(session: &str, runs: &[RunSnapshot]) -> String {
    let in_progress = runs
        .iter()
        .any(|run| run.summary.status == RunStatus::InProgress);
    let entries = runs
        .iter()
        .rev()
        .map(run_entry)
        .collect::<Vec<String>>()
        .join("\n");
    let refresh = if in_progress {
        refresh_tag(RunStatus::InProgress)
    } else {
        String::new()
    };
    format!(
        "<!doctype html>\n<html>\n<head>\n  <meta charset='utf-8'>{refresh}\n  <title>{session}</title>\n  <style>\n{STYLE}  </style>\n</head>\n<body>\n  <h1>{session}</h1>\n  <p>{count} runs</p>\n  <div class='grid'>\n{entries}\n  </div>\n</body>\n</html>\n",
        session = escape_html(session),
        count = runs.len(),
    )
}

fn run_entry(run: &RunSnapshot) -> String {
    let summary = &run.summary;
    let dir = run_dir_name(run.run_id);
    let thumb = match run.first_success().and_then(|record| record.image_file.as_deref()) {
        Some(image_file) => format!(
            "<img src='{dir}/{}' alt='run {}'>",
            escape_html(image_file),
            run.run_id
        ),
        None => "<span class='placeholder'>no image</span>".to_string(),
    };
    format!(
        "    <div class='card' id='run-{run_id}'><a href='{dir}/{PAGE_FILE}'><div class='thumb'>{thumb}</div></a><div class='meta'><div><a href='{dir}/{PAGE_FILE}'>Run {run_id}</a> <span class='status {status}'>{status_label}</span> {succeeded}/{total}</div><div>{prompt}</div><div>{started}</div></div></div>",
        run_id = run.run_id,
        status = summary.status.as_str(),
        status_label = status_label(summary.status),
        succeeded = summary.succeeded(),
        total = summary.total_variations,
        prompt = escape_html(&excerpt(&summary.prompt)),
        started = escape_html(&summary.started_at),
    )
}

fn status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::InProgress => "in progress",
        RunStatus::Completed => "completed",
        RunStatus::Partial => "partial success",
        RunStatus::Failed => "failed",
    }
}

fn refresh_tag(status: RunStatus) -> String {
    if status.is_finished() {
        String::new()
    } else {
        format!("\n  <meta http-equiv='refresh' content='{REFRESH_SECONDS}'>")
    }
}

fn excerpt(prompt: &str) -> String {
    if prompt.chars().count() <= PROMPT_EXCERPT_CHARS {
        return prompt.to_string();
    }
    let mut out = prompt.chars().take(PROMPT_EXCERPT_CHARS).collect::<String>();
    out.push_str("...");
    out
}

fn session_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("session")
        .to_string()
}

fn write_page(path: &Path, html: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("page path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(".{PAGE_FILE}.tmp"));
    std::fs::write(&tmp, html).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use mflux_contracts::models::FormatPresets;
    use mflux_contracts::runs::summary::RunSummary;

    use super::{escape_html, variation_card, GalleryRenderer};
    use crate::store::tests::{record, request, variation};
    use crate::store::MetadataStore;

    fn seeded_run(store: &MetadataStore, run_id: u32, count: u32) -> anyhow::Result<()> {
        let planned = (1..=count as u64).map(|seed| variation(seed * 11)).collect::<Vec<_>>();
        std::fs::create_dir_all(store.run_dir(run_id))?;
        store.record_run_summary(&RunSummary::new(
            run_id,
            &request(count),
            &planned,
            "2026-10-18T10:00:00.000000+00:00".to_string(),
        ))?;
        Ok(())
    }

    #[test]
    fn rendering_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MetadataStore::new(temp.path().join("mflux_output_20261018_100000"));
        seeded_run(&store, 1, 2)?;
        store.record_image(record(1, 1, 11, true))?;
        let gallery = GalleryRenderer::new(store.clone(), FormatPresets::default());

        let page = gallery.render_run(1)?;
        let index = gallery.render_session_index()?;
        let first = (std::fs::read(&page)?, std::fs::read(&index)?);
        gallery.render_run(1)?;
        gallery.render_session_index()?;
        assert_eq!(first, (std::fs::read(&page)?, std::fs::read(&index)?));
        Ok(())
    }

    #[test]
    fn each_new_image_adds_exactly_one_card() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MetadataStore::new(temp.path().join("mflux_output_20261018_100000"));
        seeded_run(&store, 1, 3)?;
        let gallery = GalleryRenderer::new(store.clone(), FormatPresets::default());

        let first = store.record_image(record(1, 1, 11, true))?;
        let before = std::fs::read_to_string(gallery.render_run(1)?)?;
        let second = store.record_image(record(1, 2, 22, false))?;
        let after = std::fs::read_to_string(gallery.render_run(1)?)?;

        let presets = FormatPresets::default();
        let first_card = variation_card(&first, &presets);
        assert!(before.contains(&first_card));
        assert!(after.contains(&first_card));
        assert!(after.contains(&variation_card(&second, &presets)));
        assert_eq!(before.matches("<div class='card").count(), 1);
        assert_eq!(after.matches("<div class='card").count(), 2);
        assert!(after.contains("card failed"));
        assert!(after.contains("http-equiv='refresh'"));
        assert!(first_card.contains("mflux-commander generate --prompt"));
        Ok(())
    }

    #[test]
    fn index_lists_runs_newest_first_with_partial_status() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MetadataStore::new(temp.path().join("mflux_output_20261018_100000"));
        seeded_run(&store, 1, 1)?;
        seeded_run(&store, 2, 2)?;
        store.record_image(record(2, 1, 11, false))?;
        store.record_image(record(2, 2, 22, true))?;
        let mut snapshot = store.load_run(2)?;
        snapshot.summary.finish("2026-10-18T10:05:00.000000+00:00".to_string());
        store.record_run_summary(&snapshot.summary)?;

        let gallery = GalleryRenderer::new(store.clone(), FormatPresets::default());
        assert_eq!(gallery.render_all()?, 2);
        let index = std::fs::read_to_string(store.session_dir().join("index.html"))?;

        let newest = index.find("id='run-2'").unwrap_or(usize::MAX);
        let oldest = index.find("id='run-1'").unwrap_or(0);
        assert!(newest < oldest);
        assert!(index.contains("partial success"));
        assert!(index.contains("run_2/image_02.png"));
        assert!(index.contains("href='run_1/index.html'"));
        Ok(())
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html("<b>\"it's\" & more</b>"),
            "&lt;b&gt;&quot;it&#x27;s&quot; &amp; more&lt;/b&gt;"
        );
    }
}
