//! CLI binary for pdf2invoice.
//!
//! A thin shim over the library crate: maps flags to `ProcessingConfig`,
//! drives a batch, and prints per-file lines plus a summary. Contains no
//! pipeline logic.

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2invoice::{service::GeminiClient, ExtractionResult, InvoiceProcessor, ProcessingConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

/// Extract structured line-item records from PDF invoices.
#[derive(Parser, Debug)]
#[command(name = "pdf2invoice", version, about)]
struct Cli {
    /// Invoice PDF files to process.
    files: Vec<PathBuf>,

    /// Directory to scan for *.pdf files (combined with FILES).
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Write full results as JSON to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent documents in flight.
    #[arg(short = 'j', long, default_value_t = 3)]
    concurrency: usize,

    /// Extraction attempts per document.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Model identifier for the Gemini client.
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-1.5-flash")]
    model: String,

    /// Service calls admitted per minute (provider quota).
    #[arg(long, default_value_t = 15)]
    calls_per_minute: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut paths = cli.files.clone();
    if let Some(dir) = &cli.directory {
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("cannot read directory '{}'", dir.display()))?
        {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            {
                paths.push(path);
            }
        }
    }
    paths.sort();
    paths.dedup();

    if paths.is_empty() {
        bail!("no invoice PDFs given; pass files or --directory");
    }

    let config = ProcessingConfig::builder()
        .max_attempts(cli.max_attempts)
        .max_calls_per_window(cli.calls_per_minute)
        .concurrency(cli.concurrency)
        .model(cli.model.clone())
        .build()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let model = GeminiClient::from_env(config.model.clone(), config.api_timeout_secs)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("set GEMINI_API_KEY to configure the document model")?;
    let processor = InvoiceProcessor::new(Arc::new(model), config);

    eprintln!(
        "{}",
        bold(&format!("Processing {} invoice file(s)…", paths.len()))
    );

    let bar = ProgressBar::new(paths.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40.green/238}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    processor.set_batch_size(paths.len());
    let results: Vec<(PathBuf, ExtractionResult)> = stream::iter(paths.iter().map(|path| {
        let processor = processor.clone();
        let bar = bar.clone();
        async move {
            let result = processor.process(path).await;
            bar.println(render_line(path, &result));
            bar.inc(1);
            (path.clone(), result)
        }
    }))
    .buffered(cli.concurrency.max(1))
    .collect()
    .await;
    bar.finish_and_clear();

    print_summary(&results, &processor);

    if let Some(output) = &cli.output {
        let payload: Vec<serde_json::Value> = results
            .iter()
            .map(|(path, result)| {
                serde_json::json!({
                    "filename": path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                    "result": result,
                })
            })
            .collect();
        std::fs::write(output, serde_json::to_vec_pretty(&payload)?)
            .with_context(|| format!("cannot write '{}'", output.display()))?;
        eprintln!("Detailed results saved to {}", output.display());
    }

    if results.iter().all(|(_, r)| !r.success) {
        bail!("every document failed");
    }
    Ok(())
}

fn render_line(path: &PathBuf, result: &ExtractionResult) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unnamed>");
    if result.success {
        format!(
            "  {} {:<32} {:<28} {} {}",
            green("✓"),
            name,
            result.company_name,
            dim(&format!("{} products", result.products.len())),
            dim(&format!("{:.1}s", result.processing_time)),
        )
    } else if result.rate_limited == Some(true) {
        format!("  {} {:<32} rate limited — retry later", yellow("⏳"), name)
    } else {
        format!(
            "  {} {:<32} {}",
            red("✗"),
            name,
            result.error.as_deref().unwrap_or("unknown error"),
        )
    }
}

fn print_summary(results: &[(PathBuf, ExtractionResult)], processor: &InvoiceProcessor) {
    let total = results.len();
    let succeeded = results.iter().filter(|(_, r)| r.success).count();

    let mut patterns: HashMap<&str, usize> = HashMap::new();
    let mut overall_confidence = Vec::new();
    for (_, result) in results.iter().filter(|(_, r)| r.success) {
        *patterns.entry(result.pattern_used.as_str()).or_default() += 1;
        overall_confidence.push(result.confidence_scores.overall);
    }

    println!("\n{}", bold("=== EXTRACTION RESULTS ==="));
    println!(
        "Processed {total} invoices — {} succeeded ({:.0}%)",
        succeeded,
        if total > 0 {
            succeeded as f64 / total as f64 * 100.0
        } else {
            0.0
        }
    );

    if !patterns.is_empty() {
        println!("\nPatterns used:");
        let mut entries: Vec<_> = patterns.into_iter().collect();
        entries.sort();
        for (pattern, count) in entries {
            println!("  - {pattern}: {count}");
        }
    }

    if !overall_confidence.is_empty() {
        let avg = overall_confidence.iter().sum::<f64>() / overall_confidence.len() as f64;
        println!("\nAverage overall confidence: {avg:.2}");
    }

    let throttled = processor.failed_files();
    if !throttled.is_empty() {
        println!(
            "\n{} {} document(s) failed due to rate limiting:",
            yellow("!"),
            throttled.len()
        );
        for file in throttled {
            println!("  - {file}");
        }
        println!("Re-run them later; the provider quota window has to clear first.");
    }
}
