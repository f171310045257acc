#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! moas-detector - find prefixes announced by multiple origin ASes
//!
//! moas-detector reads archived BGP routing-table snapshots (MRT TABLE_DUMP_V2,
//! gzip or bzip2 compressed), determines the origin AS of every route, and
//! reports the prefixes that more than one origin AS announces together with
//! per-peer statistics. It can be used as both a command-line application and
//! a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | CLI binary | All above + `clap`, `indicatif`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`lens`]**: High-level business logic
//!   - `moas`: detection pipeline, bogon classifier, output documents
//!   - `utils`: shared output formats
//!
//! - **[`config`]**: Configuration management
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use moas_detector::lens::moas::{DetectArgs, MoasLens};
//! use std::path::Path;
//!
//! let lens = MoasLens::new();
//! let report = lens.detect(&DetectArgs::new("/data/ribs"))?;
//! println!(
//!     "{} IPv4 and {} IPv6 MOAS prefixes",
//!     report.ipv4.len(),
//!     report.ipv6.len()
//! );
//! report.write_to_dir(Path::new("out"), true)?;
//! ```
//!
//! ## Bogon Classification
//!
//! ```rust
//! use moas_detector::lens::moas::bogon::{is_routable_asn, is_routable_prefix};
//!
//! assert!(is_routable_prefix(&"8.8.8.0/24".parse().unwrap()));
//! assert!(!is_routable_prefix(&"192.168.0.0/16".parse().unwrap()));
//! assert!(!is_routable_asn(64512));
//! ```

pub mod config;
pub mod lens;

// =============================================================================
// Configuration
// =============================================================================

pub use config::MoasConfig;

// =============================================================================
// Lens Module - Re-export commonly used types
// =============================================================================

pub use lens::moas::{
    Classification, DetectArgs, DetectProgress, DetectProgressCallback, MoasLens, MoasPrefix,
    MoasPrefixOrigin, MoasReport, OriginAs, Peer, PeerStatistics, Statistics,
};
pub use lens::utils::OutputFormat;
