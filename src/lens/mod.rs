//! Lens module
//!
//! High-level "lens" abstractions that combine business logic with output
//! formatting, so the same operations can back the CLI or be used as a library.
//!
//! # Architecture
//!
//! Each lens module exports:
//! - A **Lens struct** (`MoasLens`) - the main entry point for all operations
//! - **Args structs** - input arguments for lens methods
//! - **Output types** - return types and format enums
//!
//! # Usage
//!
//! ```rust,ignore
//! use moas_detector::lens::moas::{DetectArgs, MoasLens};
//! use moas_detector::lens::utils::OutputFormat;
//! ```

pub mod utils;

// MoasLens - MOAS detection over MRT table dumps, bogon classification
pub mod moas;
