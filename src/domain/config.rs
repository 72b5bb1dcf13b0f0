use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Configuration for a requirements project.
///
/// This struct holds the settings that control how keys are minted, which
/// release is active, and whether that release is frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// Human readable project name.
    pub name: String,

    /// Directory containing the source documents, relative to the project
    /// root.
    ///
    /// If unset, the project root itself is scanned.
    pub directory: Option<PathBuf>,

    /// The first component of every minted key. For example, 'REQ'.
    pub prefix: String,

    /// Placed between the prefix and the rest of the key.
    pub separator: String,

    /// Optional scope inserted after the separator, e.g. 'AUTH'.
    pub scope: Option<String>,

    /// How new keys are generated.
    pub key_mode: KeyMode,

    current: Option<String>,
    releases: Vec<String>,
    frozen_version: Option<String>,
    frozen_hash: Option<String>,
    current_req_number: u64,

    /// Test procedure ids that declarations may reference.
    ///
    /// If this is empty, any non-empty id is accepted.
    pub known_test_procedures: Vec<String>,
}

/// Key generation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// Random, collision-checked keys.
    #[default]
    Random,
    /// Monotonically numbered keys.
    Sequential,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::new(),
            directory: None,
            prefix: default_prefix(),
            separator: default_separator(),
            scope: None,
            key_mode: KeyMode::default(),
            current: None,
            releases: Vec::new(),
            frozen_version: None,
            frozen_hash: None,
            current_req_number: 0,
            known_test_procedures: Vec::new(),
        }
    }
}

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    /// The file is not valid configuration TOML.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The file could not be written.
    #[error("Failed to write config file: {0}")]
    Write(#[source] std::io::Error),
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        Ok(toml::from_str(&content)?)
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(ConfigError::Write)
    }

    /// The active release version, if one has been created.
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Sets the active release version.
    pub fn set_current(&mut self, version: impl Into<String>) {
        self.current = Some(version.into());
    }

    /// All known release versions, sorted.
    #[must_use]
    pub fn releases(&self) -> &[String] {
        &self.releases
    }

    /// Whether `version` is a known release.
    #[must_use]
    pub fn has_release(&self, version: &str) -> bool {
        self.releases.iter().any(|r| r == version)
    }

    /// Registers a release version.
    ///
    /// The list stays sorted and free of duplicates. Returns `true` if the
    /// version was added, `false` if it was already known.
    pub fn add_release(&mut self, version: impl Into<String>) -> bool {
        let version = version.into();
        match self
            .releases
            .binary_search_by(|probe| compare_versions(probe, &version))
        {
            Ok(_) => false,
            Err(pos) => {
                self.releases.insert(pos, version);
                true
            }
        }
    }

    /// The frozen release label, if any release is frozen.
    #[must_use]
    pub fn frozen_version(&self) -> Option<&str> {
        self.frozen_version.as_deref()
    }

    /// The stored fingerprint of the frozen release.
    #[must_use]
    pub fn frozen_hash(&self) -> Option<&str> {
        self.frozen_hash.as_deref()
    }

    /// Records `version` as frozen with the given release fingerprint.
    pub fn set_frozen(&mut self, version: impl Into<String>, hash: impl Into<String>) {
        self.frozen_version = Some(version.into());
        self.frozen_hash = Some(hash.into());
    }

    /// Clears the frozen label and fingerprint.
    pub fn clear_frozen(&mut self) {
        self.frozen_version = None;
        self.frozen_hash = None;
    }

    /// The last number issued by the sequential key strategy.
    #[must_use]
    pub const fn current_req_number(&self) -> u64 {
        self.current_req_number
    }

    /// Updates the sequential key counter.
    pub const fn set_current_req_number(&mut self, value: u64) {
        self.current_req_number = value;
    }

    /// Whether a test procedure id is acceptable.
    ///
    /// If `known_test_procedures` is empty, every non-blank id is accepted.
    #[must_use]
    pub fn is_test_procedure_known(&self, id: &str) -> bool {
        !id.trim().is_empty()
            && (self.known_test_procedures.is_empty()
                || self.known_test_procedures.iter().any(|known| known == id))
    }
}

/// Orders version labels segment by segment, numerically where both segments
/// are numbers.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

fn default_prefix() -> String {
    "REQ".to_string()
}

fn default_separator() -> String {
    "-".to_string()
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default)]
        name: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        directory: Option<PathBuf>,

        #[serde(default = "default_prefix")]
        prefix: String,

        #[serde(default = "default_separator")]
        separator: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,

        #[serde(default)]
        key_mode: KeyMode,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<String>,

        #[serde(default)]
        releases: Vec<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        frozen_version: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        frozen_hash: Option<String>,

        #[serde(default)]
        current_req_number: u64,

        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        known_test_procedures: Vec<String>,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                name,
                directory,
                prefix,
                separator,
                scope,
                key_mode,
                current,
                releases,
                frozen_version,
                frozen_hash,
                current_req_number,
                known_test_procedures,
            } => {
                let mut config = Self {
                    name,
                    directory,
                    prefix,
                    separator,
                    scope: scope.filter(|s| !s.is_empty()),
                    key_mode,
                    current: current.filter(|s| !s.is_empty()),
                    releases: Vec::new(),
                    frozen_version: frozen_version.filter(|s| !s.is_empty()),
                    frozen_hash: frozen_hash.filter(|s| !s.is_empty()),
                    current_req_number,
                    known_test_procedures,
                };
                for release in releases {
                    config.add_release(release);
                }
                config
            }
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            name: config.name,
            directory: config.directory,
            prefix: config.prefix,
            separator: config.separator,
            scope: config.scope,
            key_mode: config.key_mode,
            current: config.current,
            releases: config.releases,
            frozen_version: config.frozen_version,
            frozen_hash: config.frozen_hash,
            current_req_number: config.current_req_number,
            known_test_procedures: config.known_test_procedures,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use test_case::test_case;

    use super::*;

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"_version = \"1\"\nname = \"Demo\"\nprefix = \"SYS\"\nseparator = \"_\"\nscope = \"AUTH\"\nkey_mode = \"sequential\"\ncurrent = \"1.0\"\nreleases = [\"1.0\", \"0.9\"]\ncurrent_req_number = 42\n",
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.name, "Demo");
        assert_eq!(config.prefix, "SYS");
        assert_eq!(config.separator, "_");
        assert_eq!(config.scope.as_deref(), Some("AUTH"));
        assert_eq!(config.key_mode, KeyMode::Sequential);
        assert_eq!(config.current(), Some("1.0"));
        assert_eq!(config.releases(), &["0.9".to_string(), "1.0".to_string()]);
        assert_eq!(config.current_req_number(), 42);
        assert_eq!(config.frozen_version(), None);
    }

    #[test]
    fn load_missing_file_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.toml");

        let error = Config::load(&missing).unwrap_err();
        assert!(matches!(error, ConfigError::Read(_)));
        assert!(error.to_string().starts_with("Failed to read config file:"));
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\ncurrent_req_number = \"three\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.to_string().starts_with("Failed to parse config file:"));
    }

    #[test]
    fn empty_file_returns_default() {
        let expected = Config::default();
        let actual: Config = toml::from_str(r#"_version = "1""#).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn save_then_load_preserves_frozen_state() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");

        let mut config = Config::default();
        config.add_release("1.0");
        config.set_current("1.0");
        config.set_frozen("1.0", "abc123");
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.frozen_hash(), Some("abc123"));
    }

    #[test]
    fn add_release_keeps_list_sorted_and_unique() {
        let mut config = Config::default();
        assert!(config.add_release("1.10"));
        assert!(config.add_release("1.2"));
        assert!(config.add_release("0.9"));
        assert!(!config.add_release("1.2"));

        assert_eq!(
            config.releases(),
            &["0.9".to_string(), "1.2".to_string(), "1.10".to_string()]
        );
    }

    #[test_case("", false; "blank id")]
    #[test_case("TP-1", true; "listed id")]
    #[test_case("TP-9", false; "unlisted id")]
    fn known_test_procedures_gate_ids(id: &str, expected: bool) {
        let config = Config {
            known_test_procedures: vec!["TP-1".to_string()],
            ..Config::default()
        };
        assert_eq!(config.is_test_procedure_known(id), expected);
    }

    #[test]
    fn empty_catalog_accepts_any_id() {
        let config = Config::default();
        assert!(config.is_test_procedure_known("anything"));
        assert!(!config.is_test_procedure_known("   "));
    }
}
