//! Orchestration of a processing run.
//!
//! A run loads the active release, scans the documents, detects removed
//! declarations and persists the result. A frozen release turns the run into
//! a read-only integrity check.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
};

use chrono::Utc;
use tracing::instrument;

use crate::{
    domain::{KeyRegistry, KeyStrategy, LifecycleStatus, Release, key::is_valid_key},
    scanner::{ScanError, ScanOptions, Scanner, reconcile},
    storage::{ReleaseError, ReleaseStore},
};

/// Errors raised by the [`Processor`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The release store failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),
    /// Scanning the documents failed.
    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Summary of a processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// The processed release version.
    pub version: String,
    /// Whether the run was a read-only verification of a frozen release.
    pub dry_run: bool,
    /// Requirements created by this run.
    pub created: usize,
    /// Requirements changed substantively or revived by this run.
    pub modified: usize,
    /// Requirements whose document changed.
    pub moved: usize,
    /// Keys of requirements whose declarations disappeared.
    pub removed: Vec<String>,
    /// Documents whose declarations were rewritten.
    pub rewritten: Vec<PathBuf>,
    /// Number of requirements per lifecycle status after the run.
    pub statuses: BTreeMap<LifecycleStatus, usize>,
}

impl ProcessReport {
    /// Total number of requirements in the working set.
    #[must_use]
    pub fn total(&self) -> usize {
        self.statuses.values().sum()
    }
}

/// Drives the scanner and the release store.
#[derive(Debug)]
pub struct Processor {
    store: ReleaseStore,
    scanner: Scanner,
}

impl Processor {
    /// Creates a processor over documents under `input`.
    #[must_use]
    pub fn new(store: ReleaseStore, input: impl Into<PathBuf>) -> Self {
        Self {
            store,
            scanner: Scanner::new(input),
        }
    }

    /// The release store.
    #[must_use]
    pub const fn store(&self) -> &ReleaseStore {
        &self.store
    }

    /// Mutable access to the release store.
    pub const fn store_mut(&mut self) -> &mut ReleaseStore {
        &mut self.store
    }

    /// The document root.
    #[must_use]
    pub fn input(&self) -> &Path {
        self.scanner.input()
    }

    /// Validates the store and the documents without changing anything.
    ///
    /// Returns every key already declared in the documents.
    ///
    /// # Errors
    ///
    /// - the current release is unset or missing
    /// - a key exists both in the working set and in the archive
    /// - a declared key cannot name a record file
    /// - a key is declared twice, or reuses an archived key
    /// - a test procedure reference has no id or an unknown one
    #[instrument(skip(self))]
    pub fn check(&self) -> Result<Vec<String>, ProcessError> {
        let release = self.store.load()?;
        check_store_keys(&release)?;

        let mut declared = Vec::new();
        let mut first_seen: HashMap<String, String> = HashMap::new();
        for located in self.scanner.declarations()? {
            let declaration = &located.declaration;

            if let Some(reference) = declaration.unresolved_test_procedure(self.store.config()) {
                return Err(ScanError::UnknownTestProcedureReference {
                    requirement: declaration
                        .key
                        .clone()
                        .unwrap_or_else(|| declaration.title.clone()),
                    actor: reference.actor.clone(),
                    id: reference.id.clone(),
                    document: located.document.clone(),
                }
                .into());
            }

            let Some(key) = declaration.key.clone() else {
                continue;
            };
            if !is_valid_key(&key) {
                return Err(ScanError::InvalidRequirementKey {
                    key,
                    document: located.document,
                }
                .into());
            }
            if let Some(first) = first_seen.get(&key) {
                return Err(ScanError::DuplicateRequirementKey {
                    key,
                    first: first.clone(),
                    document: located.document,
                }
                .into());
            }
            if release.archive.contains_key(&key) {
                return Err(ScanError::ArchivedRequirementKey {
                    key,
                    document: located.document,
                }
                .into());
            }
            first_seen.insert(key.clone(), located.document);
            declared.push(key);
        }

        tracing::debug!(declared = declared.len(), "check passed");
        Ok(declared)
    }

    /// Scans the documents into the current release.
    ///
    /// If the current release is frozen, nothing is written and the scanned
    /// requirement set must match the frozen fingerprint.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Self::check`], from scanning, and
    /// [`ReleaseError::FrozenReleaseIntegrityViolation`] if a frozen release
    /// no longer matches its documents.
    #[instrument(skip(self))]
    pub fn process(&mut self) -> Result<ProcessReport, ProcessError> {
        let declared = self.check()?;
        let frozen = self.store.is_frozen();
        let mut release = self.store.load()?;

        let mut registry: KeyRegistry = release.keys().map(str::to_string).collect();
        registry.extend(declared);
        let mut generator = KeyStrategy::from_config(self.store.config());

        let now = Utc::now();
        let outcome = self.scanner.scan(
            &mut release.requirements,
            &mut generator,
            &mut registry,
            ScanOptions {
                dry_run: frozen,
                now,
            },
        )?;
        let removed = reconcile::detect_removed(&mut release.requirements, &outcome.seen, now);

        if frozen {
            self.store
                .verify_release_integrity(release.requirements.values())?;
            tracing::info!(version = %release.version, "frozen release verified");
        } else {
            self.store.save(&release)?;
            if let Some(counter) = generator.counter() {
                self.store.config_mut().set_current_req_number(counter);
                self.store.save_config()?;
            }
        }

        let report = ProcessReport {
            version: release.version.clone(),
            dry_run: frozen,
            created: outcome.created,
            modified: outcome.modified,
            moved: outcome.moved,
            removed,
            rewritten: outcome.rewritten,
            statuses: count_statuses(&release),
        };
        tracing::info!(
            version = %report.version,
            total = report.total(),
            created = report.created,
            modified = report.modified,
            removed = report.removed.len(),
            "processed release"
        );
        Ok(report)
    }

    /// Removes every lock directive from the documents.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be read or written.
    pub fn reset_lock_directives(&self) -> Result<Vec<PathBuf>, ProcessError> {
        Ok(self.scanner.reset_lock_directives(false)?)
    }

    /// Creates release `version` from the current one.
    ///
    /// The current release is processed first (unless it is frozen), then
    /// lock directives are cleared since a lock applies to a single revision.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::ReleaseAlreadyExists`] if the release exists
    /// and `force` is not set, or any error from processing or creation.
    #[instrument(skip(self))]
    pub fn create_release(&mut self, version: &str, force: bool) -> Result<Release, ProcessError> {
        self.store.check_new_version(version, force)?;

        if self.store.config().current().is_some() && !self.store.is_frozen() {
            self.process()?;
        }
        self.reset_lock_directives()?;

        Ok(self.store.create(version, force)?)
    }

    /// Processes the current release (unless already frozen) and freezes it.
    ///
    /// Returns the recorded release fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::AlreadyFrozen`] if the release is frozen, or any
    /// error from processing.
    #[instrument(skip(self))]
    pub fn freeze_release(&mut self) -> Result<String, ProcessError> {
        if !self.store.is_frozen() {
            self.process()?;
        }
        Ok(self.store.freeze()?)
    }

    /// Unfreezes the current release.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn unfreeze_release(&mut self) -> Result<(), ProcessError> {
        Ok(self.store.unfreeze()?)
    }
}

fn check_store_keys(release: &Release) -> Result<(), ScanError> {
    let mut seen = HashSet::new();
    for key in release.keys() {
        if !seen.insert(key) {
            return Err(ScanError::DuplicateRequirementKey {
                key: key.to_string(),
                first: format!("release {}", release.version),
                document: "archive".to_string(),
            });
        }
    }
    Ok(())
}

fn count_statuses(release: &Release) -> BTreeMap<LifecycleStatus, usize> {
    let mut statuses = BTreeMap::new();
    for requirement in release.requirements.values() {
        *statuses.entry(requirement.lifecycle()).or_default() += 1;
    }
    statuses
}
