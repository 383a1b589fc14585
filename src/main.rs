mod aggregate;
mod analyzer;
mod archive;
mod artifact;
mod config;
mod error;
mod extract;
mod model;
mod pipeline;
mod pool;
mod queue;
mod table;
mod unit;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};

use crate::analyzer::CommandAnalyzer;
use crate::config::Overrides;

#[derive(Parser)]
#[command(
    name = "scalar_harvest",
    about = "Batch image analysis with resumable per-file results and a combined table"
)]
struct Cli {
    /// Settings file (TOML, YAML or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OverrideArgs {
    /// Directory with the input images
    #[arg(long, global = true)]
    source: Option<PathBuf>,
    /// Directory for per-file result tables (default: source)
    #[arg(long, global = true)]
    target: Option<PathBuf>,
    /// Where dated output bundles are created (default: parent of source)
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    /// Physical units per pixel, passed to the analyzer
    #[arg(long, global = true)]
    calibration: Option<f64>,
    /// Number of files analyzed at once
    #[arg(short = 'j', long, global = true)]
    workers: Option<usize>,
    /// Only process files whose name contains this text
    #[arg(long, global = true)]
    filter: Option<String>,
    /// Analyzer program run once per image
    #[arg(long, global = true)]
    analyzer: Option<String>,
}

impl From<OverrideArgs> for Overrides {
    fn from(a: OverrideArgs) -> Self {
        Overrides {
            source: a.source,
            target: a.target,
            output: a.output,
            calibration: a.calibration,
            workers: a.workers,
            filter: a.filter,
            analyzer: a.analyzer,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze pending images, then aggregate and archive
    Run,
    /// List images that still need analysis
    Pending,
    /// Show discovered, finished and pending counts
    Status,
    /// Aggregate existing results and archive, without analyzing
    Aggregate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref(), &cli.overrides.into())?;
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Run => {
            let analyzer = Arc::new(CommandAnalyzer::from_settings(&settings.analyzer)?);
            let summary = pipeline::run(&settings, analyzer, today).await?;
            println!();
            summary.print();
        }
        Commands::Pending => {
            settings.check_source()?;
            let res = queue::resolve_work_queue(
                &settings.source_dir,
                settings.filter.as_deref(),
                &settings.target_dir,
            )?;
            if res.pending.is_empty() {
                println!("Nothing to do: all {} images have results.", res.completed);
            } else {
                for item in &res.pending {
                    println!("{}", item.path.display());
                }
                println!("\n{} of {} images pending", res.pending.len(), res.discovered);
            }
        }
        Commands::Status => {
            let st = pipeline::status(&settings)?;
            let r = &st.resolution;
            println!("Source:       {}", settings.source_dir.display());
            println!("Results:      {}", settings.target_dir.display());
            println!("Discovered:   {}", r.discovered);
            println!("Filtered out: {}", r.filtered_out);
            println!("Done:         {}", r.completed);
            println!("Pending:      {}", r.pending.len());
            println!("Duplicates:   {}", r.duplicates.len());
            println!("Artifacts:    {}", st.artifacts);
        }
        Commands::Aggregate => {
            settings.check_source()?;
            let mut summary = pipeline::RunSummary::default();
            pipeline::aggregate_and_archive(&settings, &mut summary, today)?;
            summary.print();
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
