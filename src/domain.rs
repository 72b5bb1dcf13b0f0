//! Domain models for requirements tracing.
//!
//! This module contains the core domain types including requirements,
//! releases, key generation, content fingerprinting, and configuration.

/// Requirement domain model and lifecycle transitions.
pub mod requirement;
pub use requirement::{Content, LifecycleStatus, PublicationStatus, Requirement};

/// Releases: a versioned working set plus its archive.
pub mod release;
pub use release::Release;

mod config;
pub use config::{Config, ConfigError, KeyMode};

pub mod key;
pub use key::{KeyGenerator, KeyRegistry, KeyStrategy};

/// Text normalization and content fingerprints.
pub mod fingerprint;
