use std::path::PathBuf;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use skyname_core::{FileRecord, FileStatus, GeminiClient, GeminiConfig, RenameOptions, Session, ThrottledProgress};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skyname", version, about = "Identify aircraft in photos and rename them into a zip archive")]
struct Cli {
    /// Image files, directories or zip archives
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory for the archive
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Archive name (".zip" is appended)
    #[arg(long, default_value = "renamed-files")]
    archive_name: String,

    /// Images sent to the classifier per request
    #[arg(long, default_value_t = skyname_core::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Gemini model name
    #[arg(long, default_value = "gemini-2.5-flash")]
    model: String,

    /// Gemini API key (falls back to API_KEY)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Write a JSON report of all files to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Show the new names without writing an archive
    #[arg(long)]
    dry_run: bool,
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template("[{prefix}] [{bar:40}] {pos}/{len} {msg}") {
        pb.set_style(style);
    }
    pb
}

/// Progress callback that mirrors stage and counts onto `pb`.
fn drive_bar(pb: &ProgressBar) -> impl Fn(&str, u64, u64, &str) + Send + Sync {
    let pb = pb.clone();
    move |stage: &str, current: u64, total: u64, message: &str| {
        pb.set_prefix(stage.to_string());
        pb.set_length(total);
        pb.set_position(current);
        pb.set_message(message.to_string());
    }
}

/// "original -> new (status)", with the error message for failed records.
fn result_line(r: &FileRecord) -> String {
    match (&r.status, r.error_message.as_deref()) {
        (FileStatus::Error, Some(message)) => {
            format!("  {} -> {} ({}: {})", r.original_name, r.new_name, r.status, message)
        }
        _ => format!("  {} -> {} ({})", r.original_name, r.new_name, r.status),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,skyname_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let t_total = std::time::Instant::now();

    let options = RenameOptions {
        batch_size: cli.batch_size,
        ..Default::default()
    };

    let records = skyname_core::select_files(&cli.inputs, options.max_files)
        .inspect_err(|e| error!(error = %e, "Selection rejected"))?;
    let mut session = Session::new();
    session.load(records);
    eprintln!(
        "Selected {} file(s), {} image(s)",
        session.records().len(),
        session.image_count()
    );

    let client = GeminiClient::new(GeminiConfig {
        api_key: cli.api_key.or_else(|| std::env::var("API_KEY").ok()),
        model: cli.model,
        ..Default::default()
    })?;

    let pb = progress_bar();
    let report_progress = drive_bar(&pb);

    let summary = session.rename(&client, &options, &report_progress).await;
    pb.finish_and_clear();

    for r in session.records() {
        match r.status {
            FileStatus::Error => eprintln!("{}", result_line(r)),
            _ => println!("{}", result_line(r)),
        }
    }

    if let Some(report) = &cli.report {
        skyname_core::write_report(session.records(), report)
            .inspect_err(|e| error!(error = %e, path = %report.display(), "Failed to write report"))?;
        eprintln!("Wrote report to {}", report.display());
    }

    if cli.dry_run {
        eprintln!("Dry run: no archive written");
    } else if session.can_export() {
        let pb = progress_bar();
        let archive_progress = drive_bar(&pb);
        let tp = ThrottledProgress::new(&archive_progress);
        let path = skyname_core::write_archive(session.records(), &cli.output, &cli.archive_name, &tp)
            .inspect_err(|e| error!(error = %e, "Archive assembly failed"))?;
        pb.finish_and_clear();
        eprintln!("Wrote {}", path.display());
    }

    eprintln!(
        "Done! {} image(s), {} renamed, {} failed ({:.2}s)",
        summary.images,
        summary.renamed,
        summary.failed,
        t_total.elapsed().as_secs_f64()
    );

    Ok(())
}
