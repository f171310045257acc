//! MOAS lens
//!
//! Detects prefixes announced by more than one origin AS in archived BGP
//! routing-table snapshots (MRT TABLE_DUMP_V2, gzip or bzip2 compressed).
//!
//! # Pipeline
//!
//! - [ingest]: one rayon task per file decodes records and resolves each RIB entry
//! - [resolve]: extracts the origin AS and drops bogon prefixes and origins ([bogon])
//! - [aggregate]: one thread per address family owns its route table; another
//!   owns the peer registry
//! - [report]: MOAS prefixes and per-peer statistics over the finished tables
//!
//! # Example
//!
//! ```rust,ignore
//! use moas_detector::lens::moas::{DetectArgs, MoasLens};
//!
//! let lens = MoasLens::new();
//! let args = DetectArgs {
//!     dir: "/data/ribs".into(),
//!     ..Default::default()
//! };
//! let report = lens.detect(&args)?;
//! report.write_to_dir("out", false)?;
//! ```

pub mod aggregate;
pub mod bogon;
pub mod ingest;
pub mod report;
pub mod resolve;
pub mod types;

pub use types::*;

use crate::lens::moas::aggregate::{channels, Aggregator};
use crate::lens::moas::bogon::{classify_asn, classify_prefix};
use crate::lens::moas::ingest::{
    collect_files, process_files, worker_pool, FileCallback, FileSummary, IngestOptions,
    IngestSummary, PeerIndexPolicy,
};
use crate::lens::moas::resolve::RecordResolver;
use crate::lens::utils::OutputFormat;
use anyhow::{anyhow, Context, Result};
use ipnet::IpNet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::info;

/// MOAS prefixes of the IPv4 table
pub const IPV4_MOAS_FILE: &str = "moasIPv4.json";
/// MOAS prefixes of the IPv6 table
pub const IPV6_MOAS_FILE: &str = "moasIPv6.json";
pub const STATISTICS_FILE: &str = "statistics.json";
/// Run log written next to the output documents
pub const LOG_FILE: &str = "log.txt";

// =============================================================================
// Progress Tracking Types
// =============================================================================

/// Progress information for detect operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DetectProgress {
    /// Input files discovered, ingestion starting
    Started {
        /// Number of files found under the input directory
        files: usize,
        /// Width of the worker pool
        workers: usize,
    },
    /// One file fully ingested
    FileCompleted {
        file_path: String,
        records: u64,
        announcements: u64,
    },
    /// All tables are built
    Completed {
        ipv4_moas_prefixes: usize,
        ipv6_moas_prefixes: usize,
        duration_secs: f64,
    },
}

/// Type alias for progress callback function
///
/// Called from worker threads; implementations must be cheap and thread-safe.
pub type DetectProgressCallback = Arc<dyn Fn(DetectProgress) + Send + Sync>;

// =============================================================================
// Args
// =============================================================================

/// Arguments for MOAS detection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::Args))]
pub struct DetectArgs {
    /// Directory holding the routing table dumps, searched recursively
    #[cfg_attr(feature = "cli", clap(short = 'd', long))]
    pub dir: PathBuf,

    /// Only use routes observed by peers in these ASes, comma-separated
    #[cfg_attr(feature = "cli", clap(short = 'p', long, value_delimiter = ','))]
    #[serde(default)]
    pub peers: Vec<u32>,

    /// Skip files whose path matches this regular expression
    #[cfg_attr(feature = "cli", clap(long, value_name = "REGEX"))]
    #[serde(default)]
    pub ignore: Option<String>,

    /// Maximum number of files processed in parallel [default: one per file]
    #[cfg_attr(feature = "cli", clap(long, value_name = "N"))]
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Fail when a RIB entry refers to a peer missing from its file's peer table
    #[cfg_attr(feature = "cli", clap(long))]
    #[serde(default)]
    pub strict_peer_index: bool,
}

impl DetectArgs {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DetectArgs {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Check the arguments before any file is touched.
    pub fn validate(&self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(anyhow!(
                "input directory {} does not exist or is not a directory",
                self.dir.display()
            ));
        }
        if self.max_workers == Some(0) {
            return Err(anyhow!("max workers must be at least 1"));
        }
        self.ignore_pattern()?;
        Ok(())
    }

    pub fn ignore_pattern(&self) -> Result<Option<Regex>> {
        self.ignore
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("invalid ignore pattern '{}'", pattern))
            })
            .transpose()
    }

    pub fn peer_index_policy(&self) -> PeerIndexPolicy {
        match self.strict_peer_index {
            true => PeerIndexPolicy::Abort,
            false => PeerIndexPolicy::Skip,
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            resolver: RecordResolver::new()
                .with_peer_allowlist(self.peers.iter().copied()),
            peer_index_policy: self.peer_index_policy(),
        }
    }
}

// =============================================================================
// Types
// =============================================================================

/// Result of one detection run.
#[derive(Debug, Clone, Serialize)]
pub struct MoasReport {
    pub ipv4: Vec<MoasPrefix>,
    pub ipv6: Vec<MoasPrefix>,
    pub statistics: Statistics,
    pub ingest: IngestSummary,
}

/// One row of the run summary table
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct DetectSummary {
    pub family: String,
    pub prefixes: usize,
    pub moas_prefixes: usize,
}

impl MoasReport {
    /// Per-family totals.
    pub fn summary(&self) -> Vec<DetectSummary> {
        vec![
            DetectSummary {
                family: "IPv4".to_string(),
                prefixes: self.statistics.ipv4_prefixes,
                moas_prefixes: self.statistics.ipv4_moas_prefixes,
            },
            DetectSummary {
                family: "IPv6".to_string(),
                prefixes: self.statistics.ipv6_prefixes,
                moas_prefixes: self.statistics.ipv6_moas_prefixes,
            },
        ]
    }

    /// Write `moasIPv4.json`, `moasIPv6.json` and `statistics.json` into `dir`.
    ///
    /// Returns the paths written.
    pub fn write_to_dir(&self, dir: &Path, pretty: bool) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;

        let ipv4 = dir.join(IPV4_MOAS_FILE);
        let ipv6 = dir.join(IPV6_MOAS_FILE);
        let statistics = dir.join(STATISTICS_FILE);
        write_json(&ipv4, &self.ipv4, pretty)?;
        write_json(&ipv6, &self.ipv6, pretty)?;
        write_json(&statistics, &self.statistics, pretty)?;

        info!(dir = %dir.display(), "wrote output documents");
        Ok(vec![ipv4, ipv6, statistics])
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    match pretty {
        true => serde_json::to_writer_pretty(&mut writer, value),
        false => serde_json::to_writer(&mut writer, value),
    }
    .with_context(|| format!("failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Classifier verdict for one prefix or AS number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "display", derive(tabled::Tabled))]
pub struct Classification {
    pub query: String,
    pub kind: String,
    pub routable: bool,
    /// IANA registry entry, empty when routable
    pub reservation: String,
}

// =============================================================================
// Lens
// =============================================================================

/// MOAS lens: runs detection over a directory of dumps and classifies
/// individual prefixes or AS numbers.
#[derive(Debug, Clone, Default)]
pub struct MoasLens;

impl MoasLens {
    pub fn new() -> Self {
        Self
    }

    /// Run the full pipeline over `args.dir`.
    pub fn detect(&self, args: &DetectArgs) -> Result<MoasReport> {
        self.detect_with_progress(args, None)
    }

    /// Run the full pipeline, reporting progress through `progress`.
    ///
    /// The first run-fatal error aborts the run; no partial report is returned.
    /// Returning the error does not wait for the worker threads: files already
    /// being decoded stop at their next record, and `progress` may still be
    /// called for files that completed in the meantime.
    pub fn detect_with_progress(
        &self,
        args: &DetectArgs,
        progress: Option<DetectProgressCallback>,
    ) -> Result<MoasReport> {
        args.validate()?;
        let start = Instant::now();

        let ignore = args.ignore_pattern()?;
        let files = collect_files(&args.dir, ignore.as_ref())?;
        let pool = worker_pool(args.max_workers, files.len())?;
        info!(
            dir = %args.dir.display(),
            files = files.len(),
            workers = pool.current_num_threads(),
            "found routing table files"
        );
        if let Some(callback) = &progress {
            callback(DetectProgress::Started {
                files: files.len(),
                workers: pool.current_num_threads(),
            });
        }

        let (senders, receivers) = channels();
        let (aggregator, errors) = Aggregator::spawn(receivers)?;

        let options = args.ingest_options();
        let on_file: Option<FileCallback> = progress.clone().map(|callback| {
            Arc::new(move |summary: &FileSummary| {
                callback(DetectProgress::FileCompleted {
                    file_path: summary.path.display().to_string(),
                    records: summary.records,
                    announcements: summary.announcements,
                })
            }) as FileCallback
        });
        let ingestion = thread::Builder::new()
            .name("ingest".to_string())
            .spawn(move || process_files(&pool, &files, senders, &options, on_file))
            .context("failed to spawn ingestion thread")?;

        // a value is a run-fatal error; closure means every file task is done
        if let Ok(error) = errors.recv() {
            return Err(error.context("routing table ingestion failed"));
        }

        let ingest = ingestion
            .join()
            .map_err(|_| anyhow!("ingestion thread panicked"))?;
        let aggregation = aggregator.finish()?;

        let report = MoasReport {
            ipv4: report::moas_prefixes(&aggregation.ipv4),
            ipv6: report::moas_prefixes(&aggregation.ipv6),
            statistics: report::statistics(
                &aggregation.ipv4,
                &aggregation.ipv6,
                &aggregation.peers,
            ),
            ingest,
        };

        let duration_secs = start.elapsed().as_secs_f64();
        info!(
            ipv4_prefixes = report.statistics.ipv4_prefixes,
            ipv6_prefixes = report.statistics.ipv6_prefixes,
            ipv4_moas_prefixes = report.statistics.ipv4_moas_prefixes,
            ipv6_moas_prefixes = report.statistics.ipv6_moas_prefixes,
            peers = report.statistics.peers.len(),
            duration_secs,
            "detection finished"
        );
        if let Some(callback) = &progress {
            callback(DetectProgress::Completed {
                ipv4_moas_prefixes: report.ipv4.len(),
                ipv6_moas_prefixes: report.ipv6.len(),
                duration_secs,
            });
        }

        Ok(report)
    }

    /// Classify a prefix (`8.8.8.0/24`, `2001:db8::/32`) or an AS number
    /// (`15169`, `AS15169`).
    pub fn classify(&self, query: &str) -> Result<Classification> {
        let query = query.trim();
        if let Ok(prefix) = query.parse::<IpNet>() {
            let reservation = classify_prefix(&prefix.trunc());
            return Ok(Classification {
                query: query.to_string(),
                kind: "prefix".to_string(),
                routable: reservation.is_none(),
                reservation: reservation.map(|r| r.to_string()).unwrap_or_default(),
            });
        }

        let digits = query
            .strip_prefix("AS")
            .or_else(|| query.strip_prefix("as"))
            .unwrap_or(query);
        let asn = digits
            .parse::<u32>()
            .map_err(|_| anyhow!("'{}' is neither a prefix nor an AS number", query))?;
        let reservation = classify_asn(asn);
        Ok(Classification {
            query: query.to_string(),
            kind: "asn".to_string(),
            routable: reservation.is_none(),
            reservation: reservation.map(|r| r.to_string()).unwrap_or_default(),
        })
    }

    /// Format classifier results
    ///
    /// Note: Table formats require the `display` feature. Without it, they
    /// fall back to pretty JSON.
    pub fn format_classifications(
        &self,
        results: &[Classification],
        format: &OutputFormat,
    ) -> String {
        match format {
            OutputFormat::Table | OutputFormat::Markdown => {
                #[cfg(feature = "display")]
                {
                    use tabled::settings::Style;
                    use tabled::Table;
                    let mut table = Table::new(results);
                    match format {
                        OutputFormat::Markdown => table.with(Style::markdown()),
                        _ => table.with(Style::rounded()),
                    };
                    table.to_string()
                }
                #[cfg(not(feature = "display"))]
                {
                    serde_json::to_string_pretty(results).unwrap_or_default()
                }
            }
            OutputFormat::Json => serde_json::to_string(results).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(results).unwrap_or_default(),
        }
    }
}
