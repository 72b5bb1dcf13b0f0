use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    LifecycleStatus, PublicationStatus, Requirement,
    requirement::{Content, Metadata},
};

/// A requirement serialized as a standalone YAML document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RecordVersion", into = "RecordVersion")]
pub struct RecordFile {
    key: String,
    title: String,
    text: String,
    actor: Vec<String>,
    conformance: String,
    test_procedures: BTreeMap<String, Vec<String>>,
    version: u32,
    release_status: PublicationStatus,
    status: LifecycleStatus,
    content_hash: String,
    source: String,
    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    deleted: Option<DateTime<Utc>>,
    date: Option<DateTime<Utc>>,
}

/// Errors that can occur when reading or writing a record file.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// An I/O error occurred.
    #[error("failed to access record file: {0}")]
    Io(#[from] io::Error),
    /// The YAML could not be parsed or produced.
    #[error("malformed record: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RecordFile {
    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<(), RecordError> {
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    pub(crate) fn read<R: Read>(reader: R) -> Result<Self, RecordError> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    /// Writes the record to `path`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save(&self, path: &Path) -> Result<(), RecordError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a record from `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RecordError> {
        let reader = BufReader::new(File::open(path)?);
        Self::read(reader)
    }

    /// The key of the stored requirement.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl From<Requirement> for RecordFile {
    fn from(requirement: Requirement) -> Self {
        let Requirement {
            key,
            content:
                Content {
                    title,
                    text,
                    conformance,
                    actors,
                    test_procedures,
                },
            metadata:
                Metadata {
                    version,
                    lifecycle,
                    publication,
                    content_hash,
                    source,
                    created,
                    modified,
                    deleted,
                    date,
                },
        } = requirement;

        Self {
            key,
            title,
            text,
            actor: actors,
            conformance,
            test_procedures,
            version,
            release_status: publication,
            status: lifecycle,
            content_hash,
            source,
            created,
            modified,
            deleted,
            date,
        }
    }
}

impl From<RecordFile> for Requirement {
    fn from(record: RecordFile) -> Self {
        let RecordFile {
            key,
            title,
            text,
            actor,
            conformance,
            mut test_procedures,
            version,
            release_status,
            status,
            content_hash,
            source,
            created,
            modified,
            deleted,
            date,
        } = record;

        for name in &actor {
            test_procedures.entry(name.clone()).or_default();
        }

        Self {
            key,
            content: Content {
                title,
                text,
                conformance,
                actors: actor,
                test_procedures,
            },
            metadata: Metadata {
                version,
                lifecycle: status,
                publication: release_status,
                content_hash,
                source,
                created,
                modified,
                deleted,
                date,
            },
        }
    }
}

/// Reads an optional timestamp, treating an empty string as absent.
fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|timestamp| Some(timestamp.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum RecordVersion {
    #[serde(rename = "1")]
    V1 {
        key: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        actor: Vec<String>,
        #[serde(default)]
        conformance: String,
        #[serde(default)]
        test_procedures: BTreeMap<String, Vec<String>>,
        #[serde(default)]
        version: u32,
        release_status: PublicationStatus,
        status: LifecycleStatus,
        #[serde(default)]
        content_hash: String,
        #[serde(default)]
        source: String,
        #[serde(
            default,
            deserialize_with = "optional_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        created: Option<DateTime<Utc>>,
        #[serde(
            default,
            deserialize_with = "optional_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        modified: Option<DateTime<Utc>>,
        #[serde(
            default,
            deserialize_with = "optional_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        deleted: Option<DateTime<Utc>>,
        #[serde(
            default,
            deserialize_with = "optional_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        date: Option<DateTime<Utc>>,
    },
}

impl From<RecordVersion> for RecordFile {
    fn from(version: RecordVersion) -> Self {
        match version {
            RecordVersion::V1 {
                key,
                title,
                text,
                actor,
                conformance,
                test_procedures,
                version,
                release_status,
                status,
                content_hash,
                source,
                created,
                modified,
                deleted,
                date,
            } => Self {
                key,
                title,
                text,
                actor,
                conformance,
                test_procedures,
                version,
                release_status,
                status,
                content_hash,
                source,
                created,
                modified,
                deleted,
                date,
            },
        }
    }
}

impl From<RecordFile> for RecordVersion {
    fn from(record: RecordFile) -> Self {
        let RecordFile {
            key,
            title,
            text,
            actor,
            conformance,
            test_procedures,
            version,
            release_status,
            status,
            content_hash,
            source,
            created,
            modified,
            deleted,
            date,
        } = record;
        Self::V1 {
            key,
            title,
            text,
            actor,
            conformance,
            test_procedures,
            version,
            release_status,
            status,
            content_hash,
            source,
            created,
            modified,
            deleted,
            date,
        }
    }
}
