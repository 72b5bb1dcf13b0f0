use std::collections::BTreeMap;

use crate::domain::{Requirement, fingerprint};

/// A named version of the requirement set.
///
/// `requirements` is the working set of the version; `archive` holds every
/// requirement retired by an earlier release transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Release {
    /// Project name the release belongs to.
    pub name: String,
    /// Version label, e.g. `1.0`.
    pub version: String,
    /// The working set, keyed by requirement key.
    pub requirements: BTreeMap<String, Requirement>,
    /// Permanently retired requirements, keyed by requirement key.
    pub archive: BTreeMap<String, Requirement>,
}

impl Release {
    /// Create an empty release.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Every key in either the working set or the archive.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.requirements
            .keys()
            .chain(self.archive.keys())
            .map(String::as_str)
    }

    /// Look up a requirement in the working set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Requirement> {
        self.requirements.get(key)
    }

    /// Insert a requirement into the working set, replacing any previous
    /// requirement with the same key.
    pub fn insert(&mut self, requirement: Requirement) -> Option<Requirement> {
        self.requirements
            .insert(requirement.key().to_string(), requirement)
    }

    /// Aggregate fingerprint of the working set.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint::build_release_fingerprint(self.requirements.values())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::requirement::Content;

    fn requirement(key: &str) -> Requirement {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Requirement::new(key.into(), Content::default(), "doc.html".into(), now)
    }

    #[test]
    fn keys_cover_working_set_and_archive() {
        let mut release = Release::new("Demo", "1.0");
        release.insert(requirement("REQ-2"));
        release.insert(requirement("REQ-1"));
        release
            .archive
            .insert("REQ-0".to_string(), requirement("REQ-0"));

        let keys: Vec<_> = release.keys().collect();
        assert_eq!(keys, vec!["REQ-1", "REQ-2", "REQ-0"]);
    }

    #[test]
    fn fingerprint_ignores_archive() {
        let mut release = Release::new("Demo", "1.0");
        release.insert(requirement("REQ-1"));
        let before = release.fingerprint();

        release
            .archive
            .insert("REQ-0".to_string(), requirement("REQ-0"));
        assert_eq!(release.fingerprint(), before);

        release.insert(requirement("REQ-2"));
        assert_ne!(release.fingerprint(), before);
    }
}
