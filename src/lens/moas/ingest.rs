//! Parallel ingestion of MRT table-dump files.
//!
//! Every file runs as one task on a rayon pool. A task decodes its file with
//! `bgpkit-parser`, resolves each RIB entry and hands the results to the
//! aggregator through [Senders].

use crate::lens::moas::aggregate::Senders;
use crate::lens::moas::resolve::{
    PathSegment, PeerTable, RecordResolver, Rejection, RibEntries, RibRow, TableRecord,
};
use crate::lens::moas::types::Peer;
use anyhow::{anyhow, Context, Result};
use bgpkit_parser::error::ParserError;
use bgpkit_parser::models::{
    AsPath, AsPathSegment, Asn, AttributeValue, MrtMessage, MrtRecord, RibEntry, TableDumpV2Message,
};
use bgpkit_parser::BgpkitParser;
use rayon::prelude::*;
use rayon::ThreadPool;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, info_span, trace, warn};

// =============================================================================
// Options
// =============================================================================

/// Container formats the detector can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Bzip2,
}

impl Compression {
    /// Pick the decompressor from a file's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Some(Compression::Gzip),
            Some("bz2") => Some(Compression::Bzip2),
            _ => None,
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        })
    }
}

/// What to do with a RIB row whose peer index is missing from the peer table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerIndexPolicy {
    /// Drop the row and keep going
    #[default]
    Skip,
    /// Fail the whole run
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub resolver: RecordResolver,
    pub peer_index_policy: PeerIndexPolicy,
}

/// Counters of one processed file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub records: u64,
    pub decode_errors: u64,
    pub peer_tables: u64,
    pub announcements: u64,
    pub rejected_entries: u64,
    pub rejected_rows: u64,
}

impl FileSummary {
    fn new(path: &Path) -> Self {
        FileSummary {
            path: path.to_path_buf(),
            ..Default::default()
        }
    }
}

/// Counters of a whole ingestion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    pub records: u64,
    pub decode_errors: u64,
    pub announcements: u64,
    pub rejected_entries: u64,
    pub rejected_rows: u64,
}

impl IngestSummary {
    fn add(&mut self, file: &FileSummary) {
        self.files += 1;
        self.records += file.records;
        self.decode_errors += file.decode_errors;
        self.announcements += file.announcements;
        self.rejected_entries += file.rejected_entries;
        self.rejected_rows += file.rejected_rows;
    }
}

/// Called from worker threads after each file completes.
pub type FileCallback = Arc<dyn Fn(&FileSummary) + Send + Sync>;

// =============================================================================
// File discovery
// =============================================================================

/// Recursively list the regular files under `root`, sorted by path.
///
/// Files whose path matches `ignore` are left out.
pub fn collect_files(root: &Path, ignore: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry =
                entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat {}", path.display()))?;

            if file_type.is_dir() {
                pending.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if let Some(re) = ignore {
                if re.is_match(&path.to_string_lossy()) {
                    debug!(path = %path.display(), "ignoring file matching ignore pattern");
                    continue;
                }
            }
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Build the worker pool: `max_workers` threads, or one per file when unset.
pub fn worker_pool(max_workers: Option<usize>, file_count: usize) -> Result<ThreadPool> {
    let width = max_workers.unwrap_or(file_count).max(1);
    rayon::ThreadPoolBuilder::new()
        .num_threads(width)
        .thread_name(|i| format!("ingest-{}", i))
        .build()
        .map_err(|e| anyhow!("failed to build worker pool: {}", e))
}

// =============================================================================
// Processing
// =============================================================================

/// Process every file on the pool.
///
/// Run-fatal errors go to the control thread through [Senders::fail]. Once
/// the run is aborted, files not yet started are skipped and running ones
/// stop at their next record. All senders are dropped on return, which closes
/// the aggregator streams.
pub fn process_files(
    pool: &ThreadPool,
    files: &[PathBuf],
    senders: Senders,
    options: &IngestOptions,
    on_file: Option<FileCallback>,
) -> IngestSummary {
    let (supported, unsupported): (Vec<&PathBuf>, Vec<&PathBuf>) = files
        .iter()
        .partition(|path| Compression::from_path(path).is_some());
    for path in &unsupported {
        debug!(path = %path.display(), "skipping file with unsupported extension");
    }

    info!(
        files = supported.len(),
        workers = pool.current_num_threads(),
        "start ingesting routing table files"
    );

    let results: Vec<Option<FileSummary>> = pool.install(|| {
        supported
            .par_iter()
            .map_with(senders, |senders, path| {
                if senders.is_aborted() {
                    return None;
                }
                let span = info_span!("file", path = %path.display());
                let _enter = span.enter();

                match process_file(path, senders, options) {
                    Ok(summary) => {
                        if let Some(callback) = &on_file {
                            callback(&summary);
                        }
                        Some(summary)
                    }
                    Err(e) if senders.is_aborted() => {
                        debug!(error = %e, "run already aborted");
                        None
                    }
                    Err(e) => {
                        if let Err(e) = senders.fail(e) {
                            debug!(error = %e, "run already aborted");
                        }
                        None
                    }
                }
            })
            .collect()
    });

    let mut summary = IngestSummary {
        skipped_files: unsupported.len() as u64,
        ..Default::default()
    };
    for result in &results {
        match result {
            Some(file) => summary.add(file),
            None => summary.failed_files += 1,
        }
    }
    summary
}

/// Decode one file and publish its peer tables and announcements.
///
/// A failure of the underlying reader, or any decode error before the first
/// record, is returned as an error: the file could not be opened as a dump.
/// Later decode errors are logged and counted.
pub fn process_file(
    path: &Path,
    senders: &Senders,
    options: &IngestOptions,
) -> Result<FileSummary> {
    let compression = Compression::from_path(path)
        .ok_or_else(|| anyhow!("unsupported file extension: {}", path.display()))?;
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("non UTF-8 path: {}", path.display()))?;
    let reader = oneio::get_reader(path_str)
        .map_err(|e| anyhow!("failed to open {} file {}: {}", compression, path_str, e))?;
    let parser = BgpkitParser::from_reader(reader).disable_warnings();

    let mut summary = FileSummary::new(path);
    let mut peers = PeerTable::new();

    for result in parser.into_fallible_record_iter() {
        if senders.is_aborted() {
            return Err(anyhow!("run aborted, stopped reading {}", path_str));
        }
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                if summary.records == 0 || matches!(e.error, ParserError::IoError(..)) {
                    return Err(anyhow!(
                        "failed to read {} file {}: {}",
                        compression,
                        path_str,
                        e.error
                    ));
                }
                warn!(error = %e.error, "failed to decode record, skipping");
                summary.decode_errors += 1;
                continue;
            }
        };
        summary.records += 1;

        match table_record(record) {
            TableRecord::PeerIndex(table) => {
                peers = table;
                summary.peer_tables += 1;
                let published: Vec<Peer> = peers
                    .peers()
                    .into_iter()
                    .filter(|peer| options.resolver.allows(peer))
                    .collect();
                debug!(peers = published.len(), "loaded peer index table");
                senders.send_peers(published)?;
            }
            TableRecord::Rib(entries) => {
                process_entries(&entries, &peers, senders, options, &mut summary)?;
            }
            TableRecord::Other { kind } => {
                trace!(kind, "ignoring record");
            }
        }
    }

    info!(
        records = summary.records,
        announcements = summary.announcements,
        "finished file"
    );
    Ok(summary)
}

fn process_entries(
    entries: &RibEntries,
    peers: &PeerTable,
    senders: &Senders,
    options: &IngestOptions,
    summary: &mut FileSummary,
) -> Result<()> {
    let rows = match options.resolver.resolve_entry(entries, peers) {
        Ok(rows) => rows,
        Err(rejection) => {
            trace!(%rejection, "dropping entry");
            summary.rejected_entries += 1;
            return Ok(());
        }
    };

    for row in rows {
        match row {
            Ok(announcement) => {
                senders.send_announcement(announcement)?;
                summary.announcements += 1;
            }
            Err(Rejection::UnknownPeerIndex(index)) => match options.peer_index_policy {
                PeerIndexPolicy::Skip => {
                    warn!(
                        peer_index = index,
                        prefix = %entries.prefix,
                        "peer index not in peer table, skipping row"
                    );
                    summary.rejected_rows += 1;
                }
                PeerIndexPolicy::Abort => {
                    return Err(anyhow!(
                        "peer index {} for {} not in peer table of {}",
                        index,
                        entries.prefix,
                        summary.path.display()
                    ));
                }
            },
            Err(rejection) => {
                trace!(%rejection, prefix = %entries.prefix, "dropping row");
                summary.rejected_rows += 1;
            }
        }
    }
    Ok(())
}

// =============================================================================
// Decoder adapter
// =============================================================================

/// Map a decoded MRT record into the detector's record model.
pub fn table_record(record: MrtRecord) -> TableRecord {
    match record.message {
        MrtMessage::TableDumpV2Message(TableDumpV2Message::PeerIndexTable(table)) => {
            let peers = table
                .id_peer_map
                .iter()
                .map(|(index, peer)| (*index, Peer::new(u32::from(peer.peer_asn), peer.peer_ip)))
                .collect();
            TableRecord::PeerIndex(peers)
        }
        MrtMessage::TableDumpV2Message(TableDumpV2Message::RibAfi(entries)) => {
            TableRecord::Rib(RibEntries {
                prefix: entries.prefix.prefix,
                rows: entries.rib_entries.iter().map(rib_row).collect(),
            })
        }
        MrtMessage::TableDumpV2Message(TableDumpV2Message::RibGeneric(_)) => TableRecord::Other {
            kind: "rib_generic".to_string(),
        },
        _ => TableRecord::Other {
            kind: format!("{:?}", record.common_header.entry_type),
        },
    }
}

fn rib_row(entry: &RibEntry) -> RibRow {
    RibRow {
        peer_index: entry.peer_index,
        as_path: preferred_as_path(entry.attributes.iter()).map(path_segments),
    }
}

/// The AS_PATH attribute, or AS4_PATH when AS_PATH is absent.
fn preferred_as_path<'a, I>(values: I) -> Option<&'a AsPath>
where
    I: IntoIterator<Item = &'a AttributeValue>,
{
    let mut as4_path = None;
    for value in values {
        match value {
            AttributeValue::AsPath {
                path,
                is_as4: false,
            } => return Some(path),
            AttributeValue::AsPath { path, is_as4: true } => {
                as4_path.get_or_insert(path);
            }
            _ => {}
        }
    }
    as4_path
}

fn path_segments(path: &AsPath) -> Vec<PathSegment> {
    path.segments
        .iter()
        .map(|segment| match segment {
            AsPathSegment::AsSequence(asns) => PathSegment::Sequence(asn_values(asns)),
            AsPathSegment::AsSet(asns) => PathSegment::Set(asn_values(asns)),
            AsPathSegment::ConfedSequence(asns) => PathSegment::ConfedSequence(asn_values(asns)),
            AsPathSegment::ConfedSet(asns) => PathSegment::ConfedSet(asn_values(asns)),
        })
        .collect()
}

fn asn_values(asns: &[Asn]) -> Vec<u32> {
    asns.iter().map(|asn| u32::from(*asn)).collect()
}
