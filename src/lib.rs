//! Requirements tracing for specification documents
//!
//! Requirements are declared inline in HTML or markdown documents as
//! `<requirement>` elements. Processing extracts them, assigns stable keys, and
//! reconciles them against a versioned store of YAML records.

pub mod domain;
pub use domain::{Config, Release, Requirement};

/// Filesystem storage for releases and requirement records.
pub mod storage;
pub use storage::{ReleaseError, ReleaseStore};

pub mod scanner;
pub use scanner::{ScanError, Scanner};

pub mod processor;
pub use processor::{ProcessError, ProcessReport, Processor};
