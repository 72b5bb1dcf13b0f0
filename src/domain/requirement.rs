use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::fingerprint;

/// A requirement is a traceable statement extracted from a document.
///
/// Its identity is the `key`. The content contributes to the fingerprint, the
/// metadata tracks where the requirement lives and how it evolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub(crate) key: String,
    pub(crate) content: Content,
    pub(crate) metadata: Metadata,
}

/// The semantically important content of the requirement.
///
/// This contributes to the 'fingerprint' of the requirement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Content {
    /// Short title of the requirement.
    pub title: String,
    /// The requirement body as stored (cleaned, markup preserved).
    pub text: String,
    /// Modal obligation keyword, e.g. `SHALL`, `SHOULD` or `MAY`.
    pub conformance: String,
    /// Names of the roles responsible for the requirement.
    pub actors: Vec<String>,
    /// Test procedure ids keyed by actor name.
    ///
    /// Every actor has an entry, possibly with an empty list.
    pub test_procedures: BTreeMap<String, Vec<String>>,
}

impl Content {
    /// Calculate the fingerprint of this content.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint::build_fingerprint(
            &self.text,
            &self.title,
            &self.conformance,
            &self.actors,
            &self.test_procedures,
        )
    }
}

/// Requirement metadata.
///
/// Does not contribute to the requirement fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Metadata {
    pub(crate) version: u32,
    pub(crate) lifecycle: LifecycleStatus,
    pub(crate) publication: PublicationStatus,
    /// Fingerprint of the content at the time it was last reconciled.
    pub(crate) content_hash: String,
    /// Document the requirement was last seen in, relative to the input root.
    pub(crate) source: String,
    pub(crate) created: Option<DateTime<Utc>>,
    pub(crate) modified: Option<DateTime<Utc>>,
    pub(crate) deleted: Option<DateTime<Utc>>,
    pub(crate) date: Option<DateTime<Utc>>,
}

/// Where a requirement stands in its release lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    /// First seen in the current release.
    New,
    /// Carried into the current release without changes.
    Stable,
    /// Substantively changed since it became stable.
    Modified,
    /// Declared in a different document than before.
    Moved,
    /// Removed before it ever became stable; dropped from the store on save.
    MarkedForDeletion,
    /// Removed from the documents; retained until the next release archives it.
    Deleted,
}

impl LifecycleStatus {
    /// The publication status implied by this lifecycle status.
    #[must_use]
    pub const fn publication(self) -> PublicationStatus {
        match self {
            Self::New => PublicationStatus::Draft,
            Self::Stable | Self::Modified | Self::Moved => PublicationStatus::Active,
            Self::MarkedForDeletion | Self::Deleted => PublicationStatus::Retired,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::New => "NEW",
            Self::Stable => "STABLE",
            Self::Modified => "MODIFIED",
            Self::Moved => "MOVED",
            Self::MarkedForDeletion => "MARKED_FOR_DELETION",
            Self::Deleted => "DELETED",
        };
        f.pad(label)
    }
}

/// Coarse publication state derived from the [`LifecycleStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStatus {
    /// Not yet part of a release.
    Draft,
    /// Published in the current release.
    Active,
    /// Withdrawn.
    Retired,
    /// Unrecognised value read from storage.
    #[serde(other)]
    Unknown,
}

impl Requirement {
    /// Create a new requirement as first seen by the scanner.
    ///
    /// The requirement starts out `NEW` at version 0, and every timestamp is
    /// set to `now`.
    #[must_use]
    pub fn new(key: String, content: Content, source: String, now: DateTime<Utc>) -> Self {
        let content_hash = content.fingerprint();
        let metadata = Metadata {
            version: 0,
            lifecycle: LifecycleStatus::New,
            publication: LifecycleStatus::New.publication(),
            content_hash,
            source,
            created: Some(now),
            modified: Some(now),
            deleted: None,
            date: Some(now),
        };
        Self {
            key,
            content,
            metadata,
        }
    }

    /// The unique key of this requirement.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The requirement's content.
    #[must_use]
    pub const fn content(&self) -> &Content {
        &self.content
    }

    /// The title of the requirement.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.content.title
    }

    /// The stored body of the requirement.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.content.text
    }

    /// The revision number.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.metadata.version
    }

    /// The lifecycle status.
    #[must_use]
    pub const fn lifecycle(&self) -> LifecycleStatus {
        self.metadata.lifecycle
    }

    /// The publication status.
    #[must_use]
    pub const fn publication(&self) -> PublicationStatus {
        self.metadata.publication
    }

    /// The stored content fingerprint.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.metadata.content_hash
    }

    /// Document the requirement is declared in.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    /// When the requirement was first seen.
    #[must_use]
    pub const fn created(&self) -> Option<DateTime<Utc>> {
        self.metadata.created
    }

    /// When the requirement last changed.
    #[must_use]
    pub const fn modified(&self) -> Option<DateTime<Utc>> {
        self.metadata.modified
    }

    /// When the requirement was removed from the documents, if it was.
    #[must_use]
    pub const fn deleted(&self) -> Option<DateTime<Utc>> {
        self.metadata.deleted
    }

    /// When the requirement last had a lifecycle event.
    #[must_use]
    pub const fn date(&self) -> Option<DateTime<Utc>> {
        self.metadata.date
    }

    /// Returns a value generated by hashing the current content.
    ///
    /// This may differ from [`Requirement::content_hash`] while a change is
    /// being reconciled.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.content.fingerprint()
    }

    /// Whether the requirement was first seen in the current release.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.metadata.lifecycle == LifecycleStatus::New
    }

    /// Whether the requirement is unchanged since the last release.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.metadata.lifecycle == LifecycleStatus::Stable
    }

    /// Whether the requirement is soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.metadata.lifecycle == LifecycleStatus::Deleted
    }

    /// Whether the requirement is due for physical removal.
    #[must_use]
    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.lifecycle == LifecycleStatus::MarkedForDeletion
    }

    /// Replace the content and refresh the stored fingerprint.
    pub(crate) fn set_content(&mut self, content: Content) {
        self.metadata.content_hash = content.fingerprint();
        self.content = content;
    }

    /// Replace only the stored body, leaving the fingerprint untouched.
    pub(crate) fn set_text(&mut self, text: String) {
        self.content.text = text;
    }

    pub(crate) fn set_source(&mut self, source: String) {
        self.metadata.source = source;
    }

    pub(crate) const fn bump_version(&mut self) {
        self.metadata.version += 1;
    }

    /// Record that the requirement changed at `now`.
    pub(crate) const fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.modified = Some(now);
        self.metadata.date = Some(now);
    }

    const fn transition(&mut self, lifecycle: LifecycleStatus) {
        self.metadata.lifecycle = lifecycle;
        self.metadata.publication = lifecycle.publication();
    }

    /// Promote to `STABLE`, as happens when a new release is cut.
    pub const fn mark_stable(&mut self) {
        self.transition(LifecycleStatus::Stable);
    }

    /// Flag a substantive change.
    pub const fn mark_modified(&mut self) {
        self.transition(LifecycleStatus::Modified);
    }

    /// Flag a change of source document.
    pub const fn mark_moved(&mut self) {
        self.transition(LifecycleStatus::Moved);
    }

    /// Soft-delete the requirement.
    pub const fn mark_deleted(&mut self, now: DateTime<Utc>) {
        self.transition(LifecycleStatus::Deleted);
        self.metadata.deleted = Some(now);
        self.metadata.date = Some(now);
    }

    /// Schedule the requirement for physical removal from the store.
    pub const fn mark_for_deletion(&mut self, now: DateTime<Utc>) {
        self.transition(LifecycleStatus::MarkedForDeletion);
        self.metadata.deleted = Some(now);
        self.metadata.date = Some(now);
    }

    /// Bring a deleted requirement back into active tracking.
    pub const fn revive(&mut self) {
        self.transition(LifecycleStatus::Modified);
        self.metadata.deleted = None;
    }

    /// Clear any pending deletion timestamp.
    pub(crate) const fn clear_deleted(&mut self) {
        self.metadata.deleted = None;
    }
}
