use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use restyle_contracts::config::RawImageConfig;
use restyle_contracts::request::{GenerateRequestPayload, ImagePayload};
use restyle_contracts::runs::report::{GenerationReport, ReportStatus};
use restyle_contracts::runs::summary::{monthly_bill, summarize, write_summary, UsagePeriod};
use restyle_engine::{
    read_usage_log, BatchOrchestrator, GeminiClient, JsonlUsageLedger, LocalImageStore,
    OrchestratorConfig, PricingTable,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "restyle", version, about = "Restyle charts into several generated variants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Usage(UsageArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Chart to restyle.
    #[arg(long)]
    source: PathBuf,
    /// Style reference image; repeat for more (at most four are used).
    #[arg(long = "style")]
    styles: Vec<PathBuf>,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    count: Option<i64>,
    /// `initial` or `refine`.
    #[arg(long)]
    mode: Option<String>,
    /// low | medium | high (or 1K | 2K | 4K).
    #[arg(long)]
    image_size: Option<String>,
    #[arg(long)]
    aspect_ratio: Option<String>,
    #[arg(long)]
    project: Option<String>,
    #[arg(long, default_value = "local")]
    owner: String,
    /// Directory that receives stored images and their receipts.
    #[arg(long)]
    out: PathBuf,
    /// Usage ledger; defaults to `<out>/usage.jsonl`.
    #[arg(long)]
    ledger: Option<PathBuf>,
    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct UsageArgs {
    #[arg(long)]
    ledger: PathBuf,
    /// day | month | all
    #[arg(long, default_value = "month")]
    period: String,
    /// Also write the summary to this file.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("restyle error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("restyle=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args).await,
        Command::Usage(args) => run_usage(args),
    }
}

async fn run_generate(args: GenerateArgs) -> Result<i32> {
    let payload = build_payload(&args)?;
    let pricing = PricingTable::load()?;
    let client = GeminiClient::from_env()?;
    let signing_secret = env::var("RESTYLE_SIGNING_SECRET")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| {
            warn!("RESTYLE_SIGNING_SECRET is not set; signed URLs are only valid for this run");
            Uuid::new_v4().to_string()
        });
    let ledger_path = args
        .ledger
        .clone()
        .unwrap_or_else(|| args.out.join("usage.jsonl"));

    let orchestrator = BatchOrchestrator::new(
        Arc::new(client),
        Arc::new(LocalImageStore::new(&args.out, signing_secret)),
        Arc::new(JsonlUsageLedger::new(&ledger_path)),
        pricing,
        OrchestratorConfig::default(),
    );
    let report = orchestrator.handle(&payload, &args.owner).await;
    info!(status = ?report.status, ledger = %ledger_path.display(), "generation finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    orchestrator.flush_usage().await;
    Ok(exit_code(report.status))
}

fn run_usage(args: UsageArgs) -> Result<i32> {
    let records = read_usage_log(&args.ledger)
        .with_context(|| format!("failed reading usage ledger {}", args.ledger.display()))?;
    let pricing = PricingTable::load()?;
    let now = Utc::now();
    let summary = summarize(&records, UsagePeriod::parse(Some(args.period.as_str())), now);
    let bill = monthly_bill(&records, now, pricing.monthly_base_eur, pricing.usd_to_eur);

    if let Some(out) = args.out.as_deref() {
        write_summary(out, &summary)?;
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "summary": summary,
            "monthly_bill": bill,
        }))?
    );
    Ok(0)
}

fn build_payload(args: &GenerateArgs) -> Result<GenerateRequestPayload> {
    let image_config = if args.image_size.is_some() || args.aspect_ratio.is_some() {
        Some(RawImageConfig {
            image_size: args.image_size.clone(),
            aspect_ratio: args.aspect_ratio.clone(),
        })
    } else {
        None
    };
    Ok(GenerateRequestPayload {
        base_image: Some(image_payload_from_path(&args.source)?),
        inspiration_images: args
            .styles
            .iter()
            .map(|path| image_payload_from_path(path))
            .collect::<Result<Vec<_>>>()?,
        prompt: args.prompt.clone(),
        num_images: args.count,
        image_config,
        mode: args.mode.clone(),
        project_id: args.project.clone(),
    })
}

fn image_payload_from_path(path: &Path) -> Result<ImagePayload> {
    let Some(mime_type) = mime_for_path(path) else {
        bail!("unsupported image extension: {}", path.display());
    };
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(ImagePayload {
        mime_type: mime_type.to_string(),
        data: BASE64.encode(bytes),
    })
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn exit_code(status: ReportStatus) -> i32 {
    match status {
        ReportStatus::Ok => 0,
        ReportStatus::BadInput => 2,
        ReportStatus::UpstreamUnavailable => 3,
    }
}

fn print_report(report: &GenerationReport) {
    println!(
        "{} of {} images generated, {} stored (est. ${:.6} / €{:.2})",
        report.received,
        report.requested,
        report.stored.len(),
        report.estimated_cost_usd,
        report.estimated_cost_eur
    );
    for stored in &report.stored {
        match stored.url.as_deref() {
            Some(url) => println!("  {} -> {url}", stored.receipt.storage_path),
            None => println!("  {}", stored.receipt.storage_path),
        }
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    for error in report.errors.iter().chain(report.storage_errors.iter()) {
        println!("error: {error}");
    }
}
