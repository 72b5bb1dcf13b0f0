//! Lifecycle decisions for scanned declarations.
//!
//! These functions are pure with respect to the filesystem: they only update
//! in-memory requirements, taking the current time as a parameter.

use std::{
    collections::{BTreeMap, HashSet},
    hash::BuildHasher,
};

use chrono::{DateTime, Utc};

use crate::{domain::Requirement, scanner::declaration::Declaration};

/// What happened to a requirement during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// First sighting; a new record was created.
    Created,
    /// Nothing semantically relevant changed.
    Unchanged,
    /// Content changed substantively.
    Modified,
    /// Only the source document changed.
    Moved,
}

/// Creates the record for a declaration seen for the first time.
#[must_use]
pub fn create_new(
    key: String,
    declaration: &Declaration,
    source: String,
    now: DateTime<Utc>,
) -> Requirement {
    Requirement::new(key, declaration.content(), source, now)
}

/// Applies a declaration to its existing record.
pub fn reconcile_existing(
    requirement: &mut Requirement,
    declaration: &Declaration,
    source: &str,
    now: DateTime<Utc>,
) -> Change {
    let incoming = declaration.content();
    let mut change = Change::Unchanged;

    if requirement.fingerprint() == incoming.fingerprint() {
        if requirement.text() != incoming.text {
            requirement.set_text(incoming.text);
        }
    } else {
        let was_stable = requirement.is_stable();
        let was_new = requirement.is_new();
        requirement.set_content(incoming);
        if declaration.locked {
            tracing::debug!(key = requirement.key(), "version locked, not bumping");
        } else {
            if was_stable {
                requirement.bump_version();
            }
            if !was_new {
                requirement.mark_modified();
            }
        }
        requirement.touch(now);
        requirement.clear_deleted();
        change = Change::Modified;
    }

    if requirement.source() != source {
        requirement.set_source(source.to_string());
        requirement.touch(now);
        if requirement.is_stable() {
            requirement.mark_moved();
        }
        if change == Change::Unchanged {
            change = Change::Moved;
        }
    }

    if requirement.is_deleted() {
        requirement.revive();
        change = Change::Modified;
    }

    change
}

/// Handles requirements whose declarations were not seen in the scan.
///
/// `NEW` requirements are marked for physical removal, other live ones are
/// soft-deleted, and already deleted ones are left alone. Returns the keys
/// that changed state.
pub fn detect_removed<S: BuildHasher>(
    requirements: &mut BTreeMap<String, Requirement>,
    seen: &HashSet<String, S>,
    now: DateTime<Utc>,
) -> Vec<String> {
    let mut removed = Vec::new();
    for (key, requirement) in requirements.iter_mut() {
        if seen.contains(key) || requirement.is_deleted() || requirement.is_marked_for_deletion()
        {
            continue;
        }
        if requirement.is_new() {
            requirement.mark_for_deletion(now);
        } else {
            requirement.mark_deleted(now);
        }
        tracing::debug!(%key, status = %requirement.lifecycle(), "declaration removed");
        removed.push(key.clone());
    }
    removed
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::domain::LifecycleStatus;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn declaration(text: &str) -> Declaration {
        Declaration {
            key: Some("REQ-1".to_string()),
            title: "Title".to_string(),
            conformance: "SHALL".to_string(),
            actors: vec!["ACTOR".to_string()],
            test_procedures: [("ACTOR".to_string(), Vec::new())].into(),
            body: text.to_string(),
            ..Declaration::default()
        }
    }

    fn stable(text: &str) -> Requirement {
        let mut requirement = create_new("REQ-1".into(), &declaration(text), "file.md".into(), t(1));
        requirement.bump_version();
        requirement.mark_stable();
        requirement
    }

    #[test]
    fn creates_new_at_version_zero() {
        let requirement = create_new("REQ-1".into(), &declaration(" A  text "), "a.md".into(), t(1));
        assert_eq!(requirement.lifecycle(), LifecycleStatus::New);
        assert_eq!(requirement.version(), 0);
        assert_eq!(requirement.text(), "A text");
        assert_eq!(requirement.modified(), Some(t(1)));
    }

    #[test]
    fn unchanged_requirement_is_left_alone() {
        let mut requirement = stable("This is a text.");
        let change =
            reconcile_existing(&mut requirement, &declaration("This is a text."), "file.md", t(2));
        assert_eq!(change, Change::Unchanged);
        assert_eq!(requirement.version(), 1);
        assert!(requirement.is_stable());
        assert_eq!(requirement.modified(), Some(t(1)));
    }

    #[test]
    fn formatting_change_refreshes_text_only() {
        let mut requirement = stable("This is a text.");
        let hash = requirement.content_hash().to_string();
        let change = reconcile_existing(
            &mut requirement,
            &declaration("   This is  \n a   text.   "),
            "file.md",
            t(2),
        );
        assert_eq!(change, Change::Unchanged);
        assert_eq!(requirement.text(), "This is \n a text.");
        assert_eq!(requirement.content_hash(), hash);
        assert_eq!(requirement.version(), 1);
        assert!(requirement.is_stable());
    }

    #[test]
    fn substantive_change_bumps_stable_version() {
        let mut requirement = stable("This is a text.");
        let change = reconcile_existing(
            &mut requirement,
            &declaration("This is a different text."),
            "file.md",
            t(2),
        );
        assert_eq!(change, Change::Modified);
        assert_eq!(requirement.version(), 2);
        assert_eq!(requirement.lifecycle(), LifecycleStatus::Modified);
        assert_eq!(requirement.text(), "This is a different text.");
        assert_eq!(requirement.modified(), Some(t(2)));
        assert_eq!(requirement.content_hash(), requirement.fingerprint());
    }

    #[test]
    fn second_change_in_same_release_does_not_bump_again() {
        let mut requirement = stable("one");
        reconcile_existing(&mut requirement, &declaration("two"), "file.md", t(2));
        reconcile_existing(&mut requirement, &declaration("three"), "file.md", t(3));
        assert_eq!(requirement.version(), 2);
        assert_eq!(requirement.lifecycle(), LifecycleStatus::Modified);
    }

    #[test]
    fn new_requirement_stays_new_when_changed() {
        let mut requirement = create_new("REQ-1".into(), &declaration("one"), "file.md".into(), t(1));
        reconcile_existing(&mut requirement, &declaration("two"), "file.md", t(2));
        assert_eq!(requirement.version(), 0);
        assert!(requirement.is_new());
        assert_eq!(requirement.text(), "two");
    }

    #[test]
    fn lock_suppresses_bump_and_status_flip() {
        let mut requirement = stable("one");
        let mut locked = declaration("two");
        locked.locked = true;

        let change = reconcile_existing(&mut requirement, &locked, "file.md", t(2));
        assert_eq!(change, Change::Modified);
        assert_eq!(requirement.version(), 1);
        assert!(requirement.is_stable());
        assert_eq!(requirement.text(), "two");
        assert_eq!(requirement.content_hash(), requirement.fingerprint());
        assert_eq!(requirement.modified(), Some(t(2)));
    }

    #[test]
    fn moved_stable_requirement_is_marked_moved() {
        let mut requirement = stable("one");
        let change = reconcile_existing(&mut requirement, &declaration("one"), "other.md", t(2));
        assert_eq!(change, Change::Moved);
        assert_eq!(requirement.lifecycle(), LifecycleStatus::Moved);
        assert_eq!(requirement.source(), "other.md");
        assert_eq!(requirement.version(), 1);
        assert_eq!(requirement.date(), Some(t(2)));
    }

    #[test]
    fn reappearing_deleted_requirement_is_revived() {
        let mut requirement = stable("one");
        requirement.mark_deleted(t(2));

        let change = reconcile_existing(&mut requirement, &declaration("one"), "file.md", t(3));
        assert_eq!(change, Change::Modified);
        assert_eq!(requirement.lifecycle(), LifecycleStatus::Modified);
        assert_eq!(requirement.deleted(), None);
    }

    #[test]
    fn removal_depends_on_status() {
        let mut requirements = BTreeMap::new();
        let mut new = create_new("NEW".into(), &declaration("a"), "f.md".into(), t(1));
        new.key = "NEW".into();
        let mut live = stable("b");
        live.key = "LIVE".into();
        let mut gone = stable("c");
        gone.key = "GONE".into();
        gone.mark_deleted(t(1));
        let mut kept = stable("d");
        kept.key = "KEPT".into();
        for requirement in [new, live, gone, kept] {
            requirements.insert(requirement.key().to_string(), requirement);
        }

        let seen: HashSet<String> = ["KEPT".to_string()].into();
        let removed = detect_removed(&mut requirements, &seen, t(5));

        assert_eq!(removed, vec!["LIVE".to_string(), "NEW".to_string()]);
        assert!(requirements["NEW"].is_marked_for_deletion());
        assert!(requirements["LIVE"].is_deleted());
        assert_eq!(requirements["LIVE"].deleted(), Some(t(5)));
        assert_eq!(requirements["GONE"].deleted(), Some(t(1)));
        assert!(requirements["KEPT"].is_stable());
    }
}
