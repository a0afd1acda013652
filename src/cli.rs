use crate::{
    client::HttpComfy,
    config::Config,
    events::TracingSink,
    input,
    pipeline::{JobEnvelope, Pipeline},
    probe,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "comfy-courier")]
#[command(about = "ComfyUI job courier (queue, poll, deliver)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./comfy-courier.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute one job envelope and print the result document.
    Run {
        /// Job envelope JSON file, or '-' for stdin.
        #[arg(long)]
        input: PathBuf,
    },
    /// Check whether the generation service is reachable.
    Doctor {},
    /// Validate a job envelope without contacting the service.
    Validate {
        #[arg(long)]
        input: PathBuf,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let mut cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    cfg.overlay_env();

    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Run { input } => run(&cfg, input),
        Command::Doctor {} => doctor(&cfg),
        Command::Validate { input } => validate(input),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    for candidate in ["comfy-courier.toml", "comfy-courier.example.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if cfg.logging.write_to_file {
        let path = if cfg.logging.file_path.is_empty() {
            PathBuf::from("comfy-courier.log")
        } else {
            PathBuf::from(&cfg.logging.file_path)
        };
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(&path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn run(cfg: &Config, input: &Path) -> Result<()> {
    let raw = read_input(input)?;
    let job = JobEnvelope::from_json(&raw)?;

    let api = HttpComfy::new(&cfg.comfy.host);
    let pipeline = Pipeline::new(cfg, api);
    let result = pipeline.run_job(&job);

    // The result document goes to stdout for the host runtime; logs go to
    // stderr and the optional file layer.
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    let api = HttpComfy::new(&cfg.comfy.host);
    let report = probe::wait_until_ready(
        &api,
        1,
        Duration::from_millis(cfg.availability.interval_ms),
        &TracingSink,
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "host": cfg.comfy.host,
            "reachable": report.reachable,
            "attempts": report.attempts,
            "checked_at": now_rfc3339(),
        }))?
    );
    Ok(())
}

fn validate(input: &Path) -> Result<()> {
    let raw = read_input(input)?;
    let job = JobEnvelope::from_json(&raw)?;

    match input::validate(&job.input) {
        Ok(validated) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "id": job.id,
                    "workflow": validated.workflow,
                    "images": validated.images.map(|imgs| imgs.len()),
                }))?
            );
            Ok(())
        }
        Err(message) => Err(anyhow!(message)),
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .with_context(|| "reading job envelope from stdin")?;
        Ok(raw)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading job envelope: {}", path.display()))
    }
}
