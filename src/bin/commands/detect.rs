use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use moas_detector::lens::moas::{DetectArgs, DetectProgress, DetectProgressCallback, MoasLens};
use moas_detector::MoasConfig;
use tabled::settings::Style;
use tabled::Table;
use tracing::info;

/// Arguments for the Detect command
#[derive(Args)]
pub struct DetectCmdArgs {
    #[clap(flatten)]
    pub detect: DetectArgs,

    /// Directory for the output documents and log.txt [default: from config, or .]
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Pretty-print the JSON output documents
    #[clap(long)]
    pub pretty: bool,

    /// Do not show the progress spinner
    #[clap(long)]
    pub no_progress: bool,
}

impl DetectCmdArgs {
    pub fn output_dir(&self, config: &MoasConfig) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| config.output_dir.clone())
    }
}

pub fn run(config: &MoasConfig, args: DetectCmdArgs) -> Result<()> {
    let output_dir = args.output_dir(config);
    let DetectCmdArgs {
        mut detect,
        pretty,
        no_progress,
        ..
    } = args;

    // command-line flags win over the configuration file
    if detect.max_workers.is_none() {
        detect.max_workers = config.max_workers;
    }
    detect.strict_peer_index |= config.strict_peer_index;

    let pb = match no_progress {
        true => None,
        false => {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_message("Searching routing table files...");
            pb.enable_steady_tick(Duration::from_millis(100));
            Some(pb)
        }
    };

    let files_done = Arc::new(AtomicU64::new(0));
    let announcements = Arc::new(AtomicU64::new(0));
    let pb_for_updates = pb.clone();
    let callback: DetectProgressCallback = Arc::new(move |progress: DetectProgress| {
        let Some(pb) = &pb_for_updates else {
            return;
        };
        match progress {
            DetectProgress::Started { files, workers } => {
                pb.set_message(format!(
                    "Processing {} files with {} workers",
                    files, workers
                ));
            }
            DetectProgress::FileCompleted {
                announcements: count,
                ..
            } => {
                let done = files_done.fetch_add(1, Ordering::Relaxed) + 1;
                let total = announcements.fetch_add(count, Ordering::Relaxed) + count;
                pb.set_message(format!(
                    "Processed {} files, {} announcements",
                    done, total
                ));
            }
            DetectProgress::Completed { .. } => {
                pb.set_message("Writing output documents");
            }
        }
    });

    let lens = MoasLens::new();
    let result = lens.detect_with_progress(&detect, Some(callback));
    if let Some(pb) = &pb {
        pb.finish_and_clear();
    }
    let report = result?;

    let written = report.write_to_dir(&output_dir, pretty)?;

    println!("{}", Table::new(report.summary()).with(Style::rounded()));
    println!(
        "{} files ingested, {} skipped, {} peers",
        report.ingest.files,
        report.ingest.skipped_files,
        report.statistics.peers.len()
    );
    for path in written {
        info!(path = %path.display(), "written");
        println!("{}", path.display());
    }
    Ok(())
}
