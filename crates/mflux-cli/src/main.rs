use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mflux_contracts::plan::{parse_step_list, RequestInputs};
use mflux_contracts::runs::summary::RunStatus;
use mflux_engine::brainstorm::{
    format_results, load_results, save_results, select_prompts, Brainstormer, DEFAULT_PROMPT_COUNT,
};
use mflux_engine::config::CommanderConfig;
use mflux_engine::gallery::GalleryRenderer;
use mflux_engine::generator::build_generator;
use mflux_engine::session::SessionManager;
use mflux_engine::store::MetadataStore;
use mflux_engine::styles::StyleRegistry;
use mflux_engine::{RunEngine, RunReport};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "mflux-commander",
    version,
    about = "Session-based batch runner for mflux image generation"
)]
struct Cli {
    /// Directory holding the session folders (overrides MFLUX_OUTPUT_DIR).
    #[arg(long, global = true)]
    output_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one run of variations for a prompt.
    Generate(GenerateArgs),
    /// Re-render every page of a session.
    Gallery(GalleryArgs),
    SaveStyle(SaveStyleArgs),
    ListStyles,
    DeleteStyle(DeleteStyleArgs),
    /// Ask a text model for prompt ideas and keep them in the session.
    Brainstorm(BrainstormArgs),
    /// Generate selected prompts from the last brainstorm, e.g. `1,3`.
    RunPrompts(RunPromptsArgs),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    /// Omit to repeat the latest run of the active session.
    #[arg(long, allow_hyphen_values = true)]
    prompt: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    steps: Option<u32>,
    /// Number of random seeds to try.
    #[arg(long)]
    vary_seed: Option<u32>,
    /// Comma-separated step counts, requires --seed.
    #[arg(long)]
    vary_steps: Option<String>,
    /// schnell or dev.
    #[arg(long)]
    model: Option<String>,
    /// Preset keyword (landscape, portrait_lg, ...) or WxH.
    #[arg(long)]
    format: Option<String>,
    #[arg(long)]
    style: Option<String>,
    #[arg(long)]
    force_new_session: bool,
    /// Ask the generator for a JSON side-car next to each image.
    #[arg(long)]
    metadata: bool,
    #[command(flatten)]
    generator: GeneratorArgs,
}

#[derive(Debug, Args)]
struct GeneratorArgs {
    /// mflux runs MFLUX_GENERATE_BIN; dryrun writes placeholder swatches.
    #[arg(long, default_value = "mflux")]
    generator: String,
}

#[derive(Debug, Args)]
struct GalleryArgs {
    /// Session directory; defaults to the most recent session.
    #[arg(long)]
    session: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SaveStyleArgs {
    name: String,
    description: String,
}

#[derive(Debug, Args)]
struct DeleteStyleArgs {
    name: String,
}

#[derive(Debug, Args)]
struct BrainstormArgs {
    concept: String,
    #[arg(long, default_value_t = DEFAULT_PROMPT_COUNT)]
    count: usize,
}

#[derive(Debug, Args)]
struct RunPromptsArgs {
    indices: String,
    #[command(flatten)]
    generator: GeneratorArgs,
}

impl GenerateArgs {
    fn request_inputs(&self) -> Result<RequestInputs> {
        let vary_steps = self
            .vary_steps
            .as_deref()
            .map(parse_step_list)
            .transpose()?;
        Ok(RequestInputs {
            prompt: self.prompt.clone().unwrap_or_default(),
            model: self.model.clone(),
            format: self.format.clone(),
            steps: self.steps,
            seed: self.seed,
            vary_seed: self.vary_seed,
            vary_steps,
            style: self.style.clone(),
            metadata: self.metadata,
        })
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mflux-commander error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = CommanderConfig::from_env()?;
    execute(cli, config)
}

fn execute(cli: Cli, mut config: CommanderConfig) -> Result<i32> {
    if let Some(root) = cli.output_root {
        config.output_root = root;
    }
    match cli.command {
        Command::Generate(args) => run_generate(&config, args),
        Command::Gallery(args) => run_gallery(&config, args),
        Command::SaveStyle(args) => {
            let style = StyleRegistry::new(&config.styles_dir).save(&args.name, &args.description)?;
            println!("Saved style '{}': {}", style.name, style.description);
            Ok(0)
        }
        Command::ListStyles => {
            let styles = StyleRegistry::new(&config.styles_dir).list();
            if styles.is_empty() {
                println!("No styles saved.");
                return Ok(0);
            }
            println!("Available Styles:");
            println!("{}", "-".repeat(40));
            for style in styles {
                println!("{}: {}", style.name, style.description);
            }
            println!("{}", "-".repeat(40));
            Ok(0)
        }
        Command::DeleteStyle(args) => {
            if StyleRegistry::new(&config.styles_dir).delete(&args.name)? {
                println!("Deleted style '{}'", args.name.trim());
                Ok(0)
            } else {
                println!("Style '{}' not found", args.name.trim());
                Ok(1)
            }
        }
        Command::Brainstorm(args) => run_brainstorm(&config, args),
        Command::RunPrompts(args) => run_prompts(&config, args),
    }
}

fn session_manager(config: &CommanderConfig) -> SessionManager {
    SessionManager::new(&config.output_root, config.session_expiry)
}

fn run_engine(config: &CommanderConfig, generator: &GeneratorArgs) -> Result<RunEngine> {
    let generator = build_generator(&generator.generator, config)?;
    Ok(RunEngine::new(session_manager(config), generator))
}

fn run_generate(config: &CommanderConfig, args: GenerateArgs) -> Result<i32> {
    let inputs = args.request_inputs()?;
    let engine = run_engine(config, &args.generator)?;
    let styles = StyleRegistry::new(&config.styles_dir);
    let report = if args.prompt.is_some() {
        engine.generate(
            &inputs,
            &styles,
            args.force_new_session,
            &mut rand::thread_rng(),
        )?
    } else {
        if args.force_new_session {
            bail!("--force-new-session needs --prompt: a new session has no earlier run to repeat");
        }
        engine.generate_again(&inputs, &styles, &mut rand::thread_rng())?
    };
    print_report(&report);
    Ok(exit_code(&report))
}

fn print_report(report: &RunReport) {
    let summary = &report.summary;
    println!(
        "Session: {} ({})",
        report.session.dir.display(),
        if report.session.reused { "reused" } else { "new" }
    );
    for warning in &summary.warnings {
        println!("Warning: {warning}");
    }
    println!(
        "Run {}: {} ({} of {} succeeded, {:.1}s total, {:.1}s average)",
        report.run_id,
        summary.status.as_str(),
        summary.succeeded(),
        summary.total_variations,
        summary.total_generation_time_s,
        summary.average_generation_time_s
    );
    for entry in summary.entries.iter().filter(|entry| entry.diagnostic.is_some()) {
        println!(
            "  #{:02} seed {} failed: {}",
            entry.index,
            entry.seed,
            entry.diagnostic.as_deref().unwrap_or_default()
        );
    }
    println!("Run page: {}", report.run_page.display());
    println!("Gallery: {}", report.index_page.display());
}

fn exit_code(report: &RunReport) -> i32 {
    if report.status() == RunStatus::Failed {
        1
    } else {
        0
    }
}

fn run_gallery(config: &CommanderConfig, args: GalleryArgs) -> Result<i32> {
    let sessions = session_manager(config);
    let session = match args.session {
        Some(dir) => sessions.open(&dir)?,
        None => match sessions.latest() {
            Some(session) => session,
            None => bail!("no session found under {}", config.output_root.display()),
        },
    };
    let gallery = GalleryRenderer::new(MetadataStore::new(&session.dir), Default::default());
    let pages = gallery.render_all()?;
    println!("Rendered {pages} run pages");
    println!("Gallery: {}", session.index_path().display());
    Ok(0)
}

fn run_brainstorm(config: &CommanderConfig, args: BrainstormArgs) -> Result<i32> {
    if args.count == 0 {
        bail!("--count must be at least 1");
    }
    let brainstormer = Brainstormer::from_config(config)?;
    let prompts = brainstormer.generate_variations(&args.concept, args.count)?;
    let session = session_manager(config).resolve_session(false)?;
    save_results(&session.dir, &prompts).context("failed to save brainstorm results")?;
    println!("{}", format_results(&prompts));
    println!("Run them with: mflux-commander run-prompts 1,2");
    Ok(0)
}

fn run_prompts(config: &CommanderConfig, args: RunPromptsArgs) -> Result<i32> {
    let sessions = session_manager(config);
    let saved = match sessions.latest() {
        Some(session) => load_results(&session.dir)?,
        None => None,
    };
    let Some(saved) = saved.filter(|results| !results.prompts.is_empty()) else {
        println!("No brainstorm results found.");
        return Ok(1);
    };
    let selected = select_prompts(&saved.prompts, &args.indices)?;
    if selected.is_empty() {
        println!("No prompts match '{}'", args.indices);
        return Ok(1);
    }

    let engine = run_engine(config, &args.generator)?;
    let styles = StyleRegistry::new(&config.styles_dir);
    let mut code = 0;
    for prompt in selected {
        println!("\nGenerating: {prompt}");
        let mut inputs = RequestInputs::new(prompt);
        inputs.vary_seed = Some(1);
        let report = engine.generate(&inputs, &styles, false, &mut rand::thread_rng())?;
        print_report(&report);
        code = code.max(exit_code(&report));
    }
    Ok(code)
}
