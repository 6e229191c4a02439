use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use mflux_contracts::runs::documents::{read_document, write_document};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{non_empty_env, CommanderConfig};

pub const BRAINSTORM_FILE: &str = "brainstorm_results.json";
pub const DEFAULT_PROMPT_COUNT: usize = 5;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;
const REQUEST_TIMEOUT_S: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BrainstormResults {
    pub prompts: Vec<String>,
}

/// Single request/response call to a text model for prompt ideas.
#[derive(Debug, Clone)]
pub struct Brainstormer {
    api_base: String,
    model: String,
    api_key: String,
    http: HttpClient,
}

impl Brainstormer {
    pub fn from_config(config: &CommanderConfig) -> Result<Self> {
        let Some(api_key) = non_empty_env("ANTHROPIC_API_KEY") else {
            bail!("ANTHROPIC_API_KEY is not set");
        };
        Self::new(&config.anthropic_api_base, &config.brainstorm_model, api_key)
    }

    pub fn new(api_base: &str, model: &str, api_key: String) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            http,
        })
    }

    pub fn generate_variations(&self, concept: &str, count: usize) -> Result<Vec<String>> {
        let concept = concept.trim();
        if concept.is_empty() {
            bail!("concept must not be empty");
        }
        let endpoint = format!("{}/messages", self.api_base);
        let payload = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": instruction(concept, count)}],
        });
        let response = self
            .http
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .with_context(|| format!("brainstorm request failed ({endpoint})"))?;
        let body = response_json_or_error(response)?;
        let prompts = parse_prompt_lines(&response_text(&body), count);
        if prompts.is_empty() {
            bail!("the model returned no usable prompts");
        }
        Ok(prompts)
    }
}

fn instruction(concept: &str, count: usize) -> String {
    format!(
        "Generate {count} creative and detailed image prompts based on the concept: \"{concept}\"\n\
         Each prompt should be unique and explore a different aspect or interpretation of the concept.\n\
         Focus on vivid, visual descriptions that work well for image generation.\n\
         Return only the prompts, one per line."
    )
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .context("brainstorm response body read failed")?;
    if !status.is_success() {
        let excerpt: String = body.chars().take(512).collect();
        bail!("brainstorm request failed ({}): {excerpt}", status.as_u16());
    }
    serde_json::from_str(&body).context("brainstorm returned invalid JSON payload")
}

/// Concatenated text blocks of a messages response.
fn response_text(body: &Value) -> String {
    body.get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// One prompt per line; headings, bullets and numbering are dropped.
pub fn parse_prompt_lines(text: &str, count: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(strip_numbering)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .take(count)
        .collect()
}

fn strip_numbering(line: &str) -> &str {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return line;
    }
    let rest = &line[digits..];
    match rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
        Some(rest) => rest.trim_start(),
        None => line,
    }
}

/// Text shown after a brainstorm: numbered so `run-prompts` indices line up.
pub fn format_results(prompts: &[String]) -> String {
    let rule = "-".repeat(40);
    let mut lines = vec!["Generated Prompts:".to_string(), rule.clone()];
    lines.extend(
        prompts
            .iter()
            .enumerate()
            .map(|(idx, prompt)| format!("{}. {prompt}", idx + 1)),
    );
    lines.push(rule);
    lines.join("\n")
}

pub fn results_path(session_dir: &Path) -> PathBuf {
    session_dir.join(BRAINSTORM_FILE)
}

pub fn save_results(session_dir: &Path, prompts: &[String]) -> Result<PathBuf> {
    let path = results_path(session_dir);
    write_document(
        &path,
        &BrainstormResults {
            prompts: prompts.to_vec(),
        },
    )?;
    Ok(path)
}

/// None when the session has no saved brainstorm.
pub fn load_results(session_dir: &Path) -> Result<Option<BrainstormResults>> {
    let path = results_path(session_dir);
    if !path.exists() {
        return Ok(None);
    }
    read_document(&path).map(Some)
}

/// Picks prompts by 1-based index (`"1,3"`); indices past the end are ignored.
pub fn select_prompts(prompts: &[String], indices: &str) -> Result<Vec<String>> {
    let mut selected = Vec::new();
    for part in indices.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let index = part.parse::<usize>().with_context(|| {
            format!("invalid index '{part}' (expected comma-separated numbers such as 1,3,5)")
        })?;
        if let Some(prompt) = index.checked_sub(1).and_then(|idx| prompts.get(idx)) {
            selected.push(prompt.clone());
        }
    }
    Ok(selected)
}
