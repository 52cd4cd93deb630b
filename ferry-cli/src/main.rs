use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;

use ferry_core::config::TransferConfig;
use ferry_core::context::TransferContext;
use ferry_core::engine::TransferEngine;
use ferry_core::envelope::{StepHandler, StepRequest};
use ferry_core::manifest::{Stage, Status, TransferMode};
use ferry_core::retry::Backoff;
use ferry_core::TransferError;

mod logging;
mod transport;

use logging::LogFormat;

#[derive(Parser)]
#[command(name = "ferry", version, about = "Resumable chunked file transfer")]
struct Cli {
    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the whole transfer (or resume it) in one go
    Send(TransferArgs),
    /// Execute one step: reads a step request JSON on stdin, prints the response
    Step(TransferArgs),
    /// Show the persisted progress of a transfer
    Status(TransferArgs),
    /// Discard a transfer's manifest, lease and staging artifacts
    Abort(TransferArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Direct,
    Staged,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackoffArg {
    None,
    Fixed,
    Exponential,
}

#[derive(Args)]
struct TransferArgs {
    /// JSON config file; flags override its fields
    #[arg(long)]
    config: Option<PathBuf>,
    /// http(s):// URL, or file:///dir to mirror into a local directory
    #[arg(long, env = "FERRY_ENDPOINT")]
    endpoint: Option<String>,
    /// Chunk size in bytes, K/M/G suffixes allowed
    #[arg(long)]
    chunk_size: Option<String>,
    /// Attempts per chunk before the run fails
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long, value_enum)]
    backoff: Option<BackoffArg>,
    /// Fixed delay, or base delay for exponential backoff
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,
    #[arg(long, default_value_t = 30_000)]
    backoff_max_ms: u64,
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    #[arg(long)]
    state_dir: Option<PathBuf>,
    /// Required with --mode staged
    #[arg(long)]
    staging_dir: Option<PathBuf>,
    /// Refuse interactive state older than this many seconds
    #[arg(long)]
    state_ttl: Option<u64>,
    #[arg(long)]
    include: Vec<String>,
    #[arg(long)]
    exclude: Vec<String>,
    #[arg(long, default_value_t = false)]
    follow_symlinks: bool,
    /// Per-attempt transport timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long, env = "FERRY_AUTH_TOKEN")]
    auth_token: Option<String>,
    #[arg(long)]
    transfer_id: Option<String>,
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format)?;
    match cli.cmd {
        Cmd::Send(args) => send(&args)?,
        Cmd::Step(args) => step(&args)?,
        Cmd::Status(args) => status(&args)?,
        Cmd::Abort(args) => abort(&args)?,
    }
    Ok(())
}

fn build_config(args: &TransferArgs) -> Result<TransferConfig> {
    let mut cfg = match &args.config {
        Some(path) => TransferConfig::from_json_file(path)?,
        None => {
            let endpoint = args
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("--endpoint is required without --config"))?;
            TransferConfig::new(endpoint)
        }
    };
    if let Some(e) = &args.endpoint {
        cfg.endpoint = e.clone();
    }
    if let Some(s) = &args.chunk_size {
        cfg.chunk_size = parse_size(s)?;
    }
    if let Some(n) = args.max_retries {
        cfg.max_retries = n;
    }
    if let Some(b) = args.backoff {
        cfg.backoff = match b {
            BackoffArg::None => Backoff::None,
            BackoffArg::Fixed => Backoff::Fixed { delay_ms: args.backoff_ms },
            BackoffArg::Exponential => Backoff::Exponential {
                base_ms: args.backoff_ms,
                max_ms: args.backoff_max_ms,
                jitter_ms: args.jitter_ms,
            },
        };
    }
    if let Some(m) = args.mode {
        cfg.mode = match m {
            ModeArg::Direct => TransferMode::Direct,
            ModeArg::Staged => TransferMode::Staged,
        };
    }
    if let Some(d) = &args.state_dir {
        cfg.state_dir = d.clone();
    }
    if let Some(d) = &args.staging_dir {
        cfg.staging_dir = Some(d.clone());
    }
    if args.state_ttl.is_some() {
        cfg.state_ttl_secs = args.state_ttl;
    }
    if !args.include.is_empty() {
        cfg.include = args.include.clone();
    }
    if !args.exclude.is_empty() {
        cfg.exclude = args.exclude.clone();
    }
    if args.follow_symlinks {
        cfg.follow_symlinks = true;
    }
    if args.timeout.is_some() {
        cfg.timeout_secs = args.timeout;
    }
    if args.auth_token.is_some() {
        cfg.auth_token = args.auth_token.clone();
    }
    if args.transfer_id.is_some() {
        cfg.transfer_id = args.transfer_id.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn parse_size(raw: &str) -> Result<u64> {
    let s = raw.trim().to_uppercase();
    let (num, mul) = if let Some(n) = s.strip_suffix('K') {
        (n, 1u64 << 10)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1 << 20)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, 1 << 30)
    } else {
        (&s[..], 1)
    };
    let v: u64 = num.trim().parse().map_err(|_| anyhow!("bad size {}", raw))?;
    v.checked_mul(mul).ok_or_else(|| anyhow!("size {} overflows", raw))
}

fn open_engine(cfg: &TransferConfig, inputs: &[PathBuf]) -> Result<TransferEngine> {
    let transport = transport::for_endpoint(&cfg.endpoint, cfg.timeout())?;
    Ok(TransferEngine::open(cfg, inputs.to_vec(), transport)?)
}

fn send(args: &TransferArgs) -> Result<()> {
    let cfg = build_config(args)?;
    let mut engine = open_engine(&cfg, &args.inputs)?;
    let id = engine.context().id().to_string();
    match engine.run() {
        Ok(report) => {
            eprintln!("{}", report.message);
            Ok(())
        }
        Err(e @ TransferError::ManifestCorrupt { .. }) => {
            Err(e).context(format!("transfer {id} needs `ferry abort` before it can restart"))
        }
        Err(e) if e.is_retryable() => {
            Err(e).context(format!("transfer {id} stopped; run the same command again to resume"))
        }
        Err(e) => Err(e).context(format!("transfer {id} failed")),
    }
}

fn step(args: &TransferArgs) -> Result<()> {
    let cfg = build_config(args)?;
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw).context("read step request from stdin")?;
    let req: StepRequest = serde_json::from_str(&raw).context("parse step request")?;
    let mut engine = open_engine(&cfg, &args.inputs)?;
    let resp = StepHandler::new(&mut engine, cfg.auth_token.as_deref()).handle(&req);
    println!("{}", serde_json::to_string(&resp)?);
    Ok(())
}

#[derive(Serialize)]
struct StatusView {
    transfer_id: String,
    stage: Stage,
    status: Status,
    progress: u8,
    acknowledged_bytes: u64,
    total_size: u64,
    chunks_sent: u64,
    chunks_pending: usize,
    files: usize,
    updated_utc: String,
}

fn status(args: &TransferArgs) -> Result<()> {
    let cfg = build_config(args)?;
    let ctx = TransferContext::open(&cfg, args.inputs.clone())?;
    match ctx.store().load() {
        Ok(m) => {
            let view = StatusView {
                transfer_id: m.id.clone(),
                stage: m.stage,
                status: m.status,
                progress: m.percent_complete(),
                acknowledged_bytes: m.acknowledged_bytes(),
                total_size: m.total_size,
                chunks_sent: m.last_transmitted_chunk_index,
                chunks_pending: m.pending_chunks.len(),
                files: m.sources.len(),
                updated_utc: m.updated_utc.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Err(TransferError::ManifestNotFound(_)) => println!("No transfer in progress"),
        Err(e) => bail!(e),
    }
    Ok(())
}

fn abort(args: &TransferArgs) -> Result<()> {
    let cfg = build_config(args)?;
    let ctx = TransferContext::open(&cfg, args.inputs.clone())?;
    ctx.abort()?;
    eprintln!("Discarded transfer {}", ctx.id());
    Ok(())
}
