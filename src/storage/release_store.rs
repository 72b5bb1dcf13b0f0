//! A filesystem backed store of releases
//!
//! The project directory holds `config.toml` and a `releases/` tree with one
//! subdirectory per version and a flat `archive/` of retired requirements.
//! Every requirement is a single YAML record named after its key.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
};

use tracing::instrument;
use walkdir::WalkDir;

use crate::{
    domain::{Config, ConfigError, Release, Requirement, fingerprint, key::is_valid_key},
    storage::record::{RecordError, RecordFile},
};

const CONFIG_FILE: &str = "config.toml";
const RELEASES_DIR: &str = "releases";
const ARCHIVE_DIR: &str = "archive";
const RECORD_EXTENSION: &str = "yaml";

/// Errors raised by the release store.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// No current release version is configured.
    #[error("no release version is set; create a release first")]
    NoReleaseVersionSet,

    /// The requested version is unknown or missing from disk.
    #[error("release '{0}' not found")]
    ReleaseNotFound(String),

    /// The target release directory already exists.
    #[error("release '{0}' already exists")]
    ReleaseAlreadyExists(String),

    /// The version label cannot name a release directory.
    #[error("invalid release version '{0}'")]
    InvalidReleaseVersion(String),

    /// The requirement key cannot name a record file.
    #[error("invalid requirement key '{0}'")]
    InvalidRecordKey(String),

    /// The current release is already frozen.
    #[error("release '{0}' is already frozen")]
    AlreadyFrozen(String),

    /// The requirement set of a frozen release no longer matches its stored
    /// fingerprint.
    #[error(
        "frozen release integrity violation: expected fingerprint {expected}, found {actual}"
    )]
    FrozenReleaseIntegrityViolation {
        /// The fingerprint recorded when the release was frozen.
        expected: String,
        /// The fingerprint of the candidate requirement set.
        actual: String,
    },

    /// A filesystem error occurred.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A record file could not be read or written.
    #[error("record '{path}': {source}")]
    Record {
        /// Path of the offending record.
        path: PathBuf,
        /// The underlying error.
        source: RecordError,
    },

    /// The configuration file could not be read or written.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Versioned storage for release working sets.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    root: PathBuf,
    config: Config,
}

impl ReleaseStore {
    /// Opens the store in the project directory `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ReleaseError> {
        let root = root.into();
        let config = Config::load(&root.join(CONFIG_FILE))?;
        Ok(Self { root, config })
    }

    /// Creates a new project directory at `root` with the given configuration.
    ///
    /// An existing configuration file is overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or configuration file cannot be
    /// written.
    pub fn init(root: impl Into<PathBuf>, config: Config) -> Result<Self, ReleaseError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(RELEASES_DIR))?;
        let store = Self { root, config };
        store.save_config()?;
        Ok(store)
    }

    /// The project directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Mutable access to the configuration. Call [`Self::save_config`] to
    /// persist changes.
    pub const fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Writes the configuration back to `config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self) -> Result<(), ReleaseError> {
        self.config.save(&self.root.join(CONFIG_FILE))?;
        Ok(())
    }

    /// Directory holding every release.
    #[must_use]
    pub fn releases_directory(&self) -> PathBuf {
        self.root.join(RELEASES_DIR)
    }

    /// Directory holding the records of `version`.
    ///
    /// Dots in the version label are replaced with underscores.
    #[must_use]
    pub fn release_directory(&self, version: &str) -> PathBuf {
        self.releases_directory().join(version.replace('.', "_"))
    }

    /// Directory holding archived records.
    #[must_use]
    pub fn archive_directory(&self) -> PathBuf {
        self.releases_directory().join(ARCHIVE_DIR)
    }

    fn current(&self) -> Result<&str, ReleaseError> {
        self.config.current().ok_or(ReleaseError::NoReleaseVersionSet)
    }

    /// Loads the current release.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NoReleaseVersionSet`] if no version is current,
    /// or any error from [`Self::load_version`].
    pub fn load(&self) -> Result<Release, ReleaseError> {
        let current = self.current()?.to_string();
        self.load_version(&current)
    }

    /// Loads a known release and the shared archive.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::ReleaseNotFound`] if `version` is not a known
    /// release or its directory is missing, and an error if a record cannot
    /// be read.
    #[instrument(skip(self))]
    pub fn load_version(&self, version: &str) -> Result<Release, ReleaseError> {
        validate_version(version)?;
        let directory = self.release_directory(version);
        if !self.config.has_release(version) || !directory.is_dir() {
            return Err(ReleaseError::ReleaseNotFound(version.to_string()));
        }

        let requirements = load_records(&directory)?;
        let archive = load_records(&self.archive_directory())?;
        tracing::debug!(
            requirements = requirements.len(),
            archived = archive.len(),
            "loaded release"
        );

        Ok(Release {
            name: self.config.name.clone(),
            version: version.to_string(),
            requirements,
            archive,
        })
    }

    /// Persists a release.
    ///
    /// Requirements marked for deletion have their record removed instead of
    /// written. Archived requirements are written to the archive directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be written or removed.
    #[instrument(skip_all, fields(version = %release.version))]
    pub fn save(&self, release: &Release) -> Result<(), ReleaseError> {
        let directory = self.release_directory(&release.version);
        std::fs::create_dir_all(&directory)?;

        for requirement in release.requirements.values() {
            let path = record_path(&directory, requirement.key())?;
            if requirement.is_marked_for_deletion() {
                match std::fs::remove_file(&path) {
                    Ok(()) => tracing::debug!(key = requirement.key(), "removed record"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                save_record(&path, requirement)?;
            }
        }

        self.archive(release.archive.values())
    }

    /// Writes requirements into the archive.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be written.
    pub fn archive<'a, I>(&self, requirements: I) -> Result<(), ReleaseError>
    where
        I: IntoIterator<Item = &'a Requirement>,
    {
        let directory = self.archive_directory();
        for requirement in requirements {
            save_record(&record_path(&directory, requirement.key())?, requirement)?;
        }
        Ok(())
    }

    /// Checks that a release `version` may be created.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::InvalidReleaseVersion`] if the label would not
    /// name a directory directly under [`Self::releases_directory`], and
    /// [`ReleaseError::ReleaseAlreadyExists`] if its directory exists and
    /// `force` is not set.
    pub fn check_new_version(&self, version: &str, force: bool) -> Result<(), ReleaseError> {
        validate_version(version)?;
        if !force && self.release_directory(version).exists() {
            return Err(ReleaseError::ReleaseAlreadyExists(version.to_string()));
        }
        Ok(())
    }

    /// Creates release `version` from the current release and makes it current.
    ///
    /// Every live requirement is carried over as `STABLE`. Deleted
    /// requirements move into the archive; requirements marked for deletion
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::ReleaseAlreadyExists`] if the target exists and
    /// `force` is not set, or an error if the current release cannot be loaded
    /// or the new one cannot be written.
    #[instrument(skip(self))]
    pub fn create(&mut self, version: &str, force: bool) -> Result<Release, ReleaseError> {
        self.check_new_version(version, force)?;

        let previous = self.config.current().map(|_| self.load()).transpose()?;

        let directory = self.release_directory(version);
        if directory.exists() {
            tracing::warn!(path = %directory.display(), "replacing existing release");
            std::fs::remove_dir_all(&directory)?;
        }

        let mut release = Release::new(self.config.name.clone(), version);
        match previous {
            // recreating the current release keeps its working set as is
            Some(previous) if previous.version == version => {
                release.requirements = previous.requirements;
                release.archive = previous.archive;
            }
            Some(previous) => {
                release.archive = previous.archive;
                for (key, mut requirement) in previous.requirements {
                    if requirement.is_marked_for_deletion() {
                        continue;
                    }
                    if requirement.is_deleted() {
                        release.archive.insert(key, requirement);
                    } else {
                        requirement.mark_stable();
                        release.requirements.insert(key, requirement);
                    }
                }
            }
            None => {}
        }

        self.save(&release)?;
        self.config.add_release(version);
        self.config.set_current(version);
        self.save_config()?;

        tracing::info!(
            version,
            requirements = release.requirements.len(),
            archived = release.archive.len(),
            "created release"
        );
        Ok(release)
    }

    /// Whether the current release is frozen.
    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.config.current().is_some() && self.config.frozen_version() == self.config.current()
    }

    /// Freezes the current release, recording its fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::NoReleaseVersionSet`] without a current
    /// release, [`ReleaseError::ReleaseNotFound`] if it is not on disk, and
    /// [`ReleaseError::AlreadyFrozen`] if it is already frozen.
    #[instrument(skip(self))]
    pub fn freeze(&mut self) -> Result<String, ReleaseError> {
        let current = self.current()?.to_string();
        if self.is_frozen() {
            return Err(ReleaseError::AlreadyFrozen(current));
        }

        let release = self.load_version(&current)?;
        let hash = release.fingerprint();
        self.config.set_frozen(current.as_str(), hash.as_str());
        self.save_config()?;

        tracing::info!(version = %current, %hash, "froze release");
        Ok(hash)
    }

    /// Unfreezes the current release. Does nothing if it is not frozen.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn unfreeze(&mut self) -> Result<(), ReleaseError> {
        if self.is_frozen() {
            self.config.clear_frozen();
            self.save_config()?;
            tracing::info!("unfroze release");
        }
        Ok(())
    }

    /// Checks a candidate requirement set against the frozen fingerprint.
    ///
    /// Requirements marked for deletion are not part of the release and are
    /// skipped. Succeeds trivially if the current release is not frozen.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError::FrozenReleaseIntegrityViolation`] on mismatch.
    pub fn verify_release_integrity<'a, I>(&self, candidates: I) -> Result<(), ReleaseError>
    where
        I: IntoIterator<Item = &'a Requirement>,
    {
        let Some(expected) = self.config.frozen_hash().filter(|_| self.is_frozen()) else {
            return Ok(());
        };

        let actual = fingerprint::build_release_fingerprint(
            candidates
                .into_iter()
                .filter(|requirement| !requirement.is_marked_for_deletion()),
        );

        if actual == expected {
            Ok(())
        } else {
            Err(ReleaseError::FrozenReleaseIntegrityViolation {
                expected: expected.to_string(),
                actual,
            })
        }
    }
}

/// Release labels become a single directory name under `releases/`.
fn validate_version(version: &str) -> Result<(), ReleaseError> {
    let invalid = version.trim().is_empty()
        || version.replace('.', "_").eq_ignore_ascii_case(ARCHIVE_DIR)
        || version
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control());
    if invalid {
        return Err(ReleaseError::InvalidReleaseVersion(version.to_string()));
    }
    Ok(())
}

fn record_path(directory: &Path, key: &str) -> Result<PathBuf, ReleaseError> {
    if !is_valid_key(key) {
        return Err(ReleaseError::InvalidRecordKey(key.to_string()));
    }
    Ok(directory.join(format!("{key}.{RECORD_EXTENSION}")))
}

fn save_record(path: &Path, requirement: &Requirement) -> Result<(), ReleaseError> {
    RecordFile::from(requirement.clone())
        .save(path)
        .map_err(|source| ReleaseError::Record {
            path: path.to_path_buf(),
            source,
        })
}

fn load_records(directory: &Path) -> Result<BTreeMap<String, Requirement>, ReleaseError> {
    let mut records = BTreeMap::new();
    if !directory.is_dir() {
        return Ok(records);
    }

    let paths = WalkDir::new(directory)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension() == Some(OsStr::new(RECORD_EXTENSION)))
        .map(walkdir::DirEntry::into_path);

    for path in paths {
        let record = RecordFile::load(&path).map_err(|source| ReleaseError::Record {
            path: path.clone(),
            source,
        })?;
        let requirement = Requirement::from(record);
        records.insert(requirement.key().to_string(), requirement);
    }
    Ok(records)
}
