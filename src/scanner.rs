//! Extraction of requirements from source documents.
//!
//! The [`Scanner`] walks a directory of `.html` and `.md` documents in sorted
//! order, parses every `<requirement>` declaration, and reconciles it against
//! the working set of the active release. Keys are minted for declarations
//! that lack one and written back into the documents together with the current
//! version.

use std::{
    collections::{BTreeMap, HashMap, HashSet, btree_map::Entry},
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::instrument;
use walkdir::{DirEntry, WalkDir};

use crate::domain::{KeyGenerator, KeyRegistry, Requirement};

pub mod declaration;
pub mod reconcile;

pub use declaration::{Declaration, ProcedureRef};
use reconcile::Change;

const DOCUMENT_EXTENSIONS: &[&str] = &["html", "md"];

/// Errors raised while scanning documents.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A key is declared more than once.
    #[error("duplicate requirement key '{key}' in '{document}' (first declared in '{first}')")]
    DuplicateRequirementKey {
        /// The repeated key.
        key: String,
        /// Document of the first declaration.
        first: String,
        /// Document of the repeated declaration.
        document: String,
    },

    /// A key declared in a document belongs to an archived requirement.
    #[error("requirement key '{key}' in '{document}' belongs to an archived requirement")]
    ArchivedRequirementKey {
        /// The reused key.
        key: String,
        /// Document of the declaration.
        document: String,
    },

    /// A test procedure reference is missing its id or names an unknown one.
    #[error(
        "unknown test procedure '{id}' for actor '{actor}' in requirement '{requirement}' ({document})"
    )]
    UnknownTestProcedureReference {
        /// Key or title of the declaring requirement.
        requirement: String,
        /// Actor the reference belongs to.
        actor: String,
        /// The referenced id, possibly empty.
        id: String,
        /// Document of the declaration.
        document: String,
    },

    /// A declared key cannot be used as a record file name.
    #[error("invalid requirement key '{key}' in '{document}'")]
    InvalidRequirementKey {
        /// The offending key.
        key: String,
        /// Document of the declaration.
        document: String,
    },

    /// A document is not valid UTF-8.
    #[error("'{path}' is not valid UTF-8")]
    InvalidEncoding {
        /// The document path.
        path: PathBuf,
    },

    /// A document could not be read or written.
    #[error("failed to access '{path}': {source}")]
    Io {
        /// The document path.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
}

/// A declaration and the document it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Document path relative to the input root, `/` separated.
    pub document: String,
    /// The parsed declaration.
    pub declaration: Declaration,
}

/// Options for a single scan.
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// Reconcile in memory only; never write documents.
    pub dry_run: bool,
    /// Timestamp applied to every change.
    pub now: DateTime<Utc>,
}

/// The result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Every key declared in the documents.
    pub seen: HashSet<String>,
    /// Documents whose declarations were rewritten (or would have been, in a
    /// dry run).
    pub rewritten: Vec<PathBuf>,
    /// Requirements created by this scan.
    pub created: usize,
    /// Requirements changed substantively or revived.
    pub modified: usize,
    /// Requirements whose only change was their document.
    pub moved: usize,
}

/// Scans a directory tree of documents.
#[derive(Debug, Clone)]
pub struct Scanner {
    input: PathBuf,
}

impl Scanner {
    /// Creates a scanner rooted at `input`.
    #[must_use]
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// The root of the scanned tree.
    #[must_use]
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// All documents under the input root, in sorted order.
    ///
    /// Hidden directories (such as the project directory) are skipped.
    #[must_use]
    pub fn documents(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(OsStr::to_str)
                    .is_some_and(|extension| {
                        DOCUMENT_EXTENSIONS
                            .iter()
                            .any(|known| extension.eq_ignore_ascii_case(known))
                    })
            })
            .map(DirEntry::into_path)
            .collect()
    }

    /// The path of `path` relative to the input root, `/` separated.
    fn document_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.input)
            .unwrap_or(path)
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn read(path: &Path) -> Result<String, ScanError> {
        std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::InvalidData {
                ScanError::InvalidEncoding {
                    path: path.to_path_buf(),
                }
            } else {
                ScanError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
    }

    fn write(path: &Path, text: &str) -> Result<(), ScanError> {
        std::fs::write(path, text).map_err(|source| ScanError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses every declaration without modifying anything.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be read.
    pub fn declarations(&self) -> Result<Vec<Located>, ScanError> {
        let mut located = Vec::new();
        for path in self.documents() {
            let text = Self::read(&path)?;
            let document = self.document_name(&path);
            declaration::rewrite_blocks::<ScanError>(&text, |block| {
                located.push(Located {
                    document: document.clone(),
                    declaration: block.declaration(),
                });
                Ok(())
            })?;
        }
        Ok(located)
    }

    /// Reconciles every declaration against `requirements`.
    ///
    /// Declarations without a key receive one from `generator`; `registry`
    /// must already hold every key in use. Existing requirements are updated
    /// in place and new ones inserted. Requirements that were not declared are
    /// left untouched; see [`reconcile::detect_removed`].
    ///
    /// Documents are rewritten as each one is processed, so an error part way
    /// through leaves earlier documents rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::DuplicateRequirementKey`] if a key is declared
    /// twice, or an error if a document cannot be read or written.
    #[instrument(skip_all, fields(input = %self.input.display(), dry_run = options.dry_run))]
    pub fn scan<G: KeyGenerator>(
        &self,
        requirements: &mut BTreeMap<String, Requirement>,
        generator: &mut G,
        registry: &mut KeyRegistry,
        options: ScanOptions,
    ) -> Result<ScanOutcome, ScanError> {
        let mut outcome = ScanOutcome::default();
        let mut first_seen: HashMap<String, String> = HashMap::new();

        for path in self.documents() {
            let original = Self::read(&path)?;
            let document = self.document_name(&path);

            let updated = declaration::rewrite_blocks(&original, |block| {
                let declaration = block.declaration();
                let key = declaration.key.clone().unwrap_or_else(|| {
                    let key = generator.generate(registry);
                    tracing::debug!(%key, %document, "minted key");
                    block.start.set("key", &key);
                    key
                });

                if let Some(first) = first_seen.get(&key) {
                    return Err(ScanError::DuplicateRequirementKey {
                        key,
                        first: first.clone(),
                        document: document.clone(),
                    });
                }
                first_seen.insert(key.clone(), document.clone());

                let version = match requirements.entry(key.clone()) {
                    Entry::Occupied(mut entry) => {
                        let existing = entry.get_mut();
                        let change = reconcile::reconcile_existing(
                            existing,
                            &declaration,
                            &document,
                            options.now,
                        );
                        match change {
                            Change::Modified => outcome.modified += 1,
                            Change::Moved => outcome.moved += 1,
                            Change::Created | Change::Unchanged => {}
                        }
                        tracing::debug!(%key, ?change, status = %existing.lifecycle(), "reconciled");
                        existing.version()
                    }
                    Entry::Vacant(entry) => {
                        let requirement = reconcile::create_new(
                            key.clone(),
                            &declaration,
                            document.clone(),
                            options.now,
                        );
                        tracing::debug!(%key, change = ?Change::Created, "reconciled");
                        outcome.created += 1;
                        entry.insert(requirement).version()
                    }
                };
                registry.insert(key.clone());
                outcome.seen.insert(key);

                block.start.set("version", &version.to_string());
                Ok(())
            })?;

            if updated != original {
                if options.dry_run {
                    tracing::debug!(%document, "dry run, not rewriting");
                } else {
                    Self::write(&path, &updated)?;
                    tracing::debug!(%document, "rewrote declarations");
                }
                outcome.rewritten.push(path);
            }
        }

        Ok(outcome)
    }

    /// Removes every lock directive from every declaration.
    ///
    /// Returns the documents that changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a document cannot be read or written.
    #[instrument(skip(self), fields(input = %self.input.display()))]
    pub fn reset_lock_directives(&self, dry_run: bool) -> Result<Vec<PathBuf>, ScanError> {
        let mut changed = Vec::new();
        for path in self.documents() {
            let original = Self::read(&path)?;
            let updated = declaration::rewrite_blocks::<ScanError>(&original, |block| {
                block.strip_lock_directives();
                Ok(())
            })?;
            if updated != original {
                if !dry_run {
                    Self::write(&path, &updated)?;
                }
                changed.push(path);
            }
        }
        tracing::info!(documents = changed.len(), "reset lock directives");
        Ok(changed)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::domain::key::SequentialKeys;

    fn options(dry_run: bool) -> ScanOptions {
        ScanOptions {
            dry_run,
            now: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    fn workspace(files: &[(&str, &str)]) -> TempDir {
        let tmp = tempfile::tempdir().unwrap();
        for (name, text) in files {
            let path = tmp.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }
        tmp
    }

    #[test]
    fn documents_are_sorted_and_filtered() {
        let tmp = workspace(&[
            ("b.html", ""),
            ("a.md", ""),
            ("notes.txt", ""),
            ("sub/c.HTML", ""),
            (".reqtrace/releases/x.md", ""),
        ]);
        let scanner = Scanner::new(tmp.path());
        let names: Vec<_> = scanner
            .documents()
            .iter()
            .map(|path| scanner.document_name(path))
            .collect();
        assert_eq!(names, vec!["a.md", "b.html", "sub/c.HTML"]);
    }

    #[test]
    fn scan_mints_keys_and_writes_versions() {
        let tmp = workspace(&[(
            "doc.html",
            "<p>Intro</p>\n<requirement title=\"A\" conformance=\"SHALL\">First</requirement>\n<requirement key=\"REQ-7\" title=\"B\">Second</requirement>\n",
        )]);
        let scanner = Scanner::new(tmp.path());
        let mut requirements = BTreeMap::new();
        let mut registry: KeyRegistry = ["REQ-7"].into_iter().collect();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        let outcome = scanner
            .scan(&mut requirements, &mut generator, &mut registry, options(false))
            .unwrap();

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.rewritten.len(), 1);
        let written = std::fs::read_to_string(tmp.path().join("doc.html")).unwrap();
        assert_eq!(
            written,
            "<p>Intro</p>\n<requirement title=\"A\" conformance=\"SHALL\" key=\"REQ-8\" version=\"0\">First</requirement>\n<requirement key=\"REQ-7\" title=\"B\" version=\"0\">Second</requirement>\n"
        );
        assert_eq!(requirements["REQ-8"].source(), "doc.html");
        assert_eq!(requirements["REQ-8"].text(), "First");
    }

    #[test]
    fn rescanning_is_byte_identical() {
        let tmp = workspace(&[(
            "doc.md",
            "<requirement title='A'   conformance=\"MAY\">Body &amp; more</requirement>",
        )]);
        let scanner = Scanner::new(tmp.path());
        let mut requirements = BTreeMap::new();
        let mut registry = KeyRegistry::new();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        scanner
            .scan(&mut requirements, &mut generator, &mut registry, options(false))
            .unwrap();
        let first = std::fs::read_to_string(tmp.path().join("doc.md")).unwrap();

        let outcome = scanner
            .scan(&mut requirements, &mut generator, &mut registry, options(false))
            .unwrap();
        let second = std::fs::read_to_string(tmp.path().join("doc.md")).unwrap();

        assert!(outcome.rewritten.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn dry_run_leaves_documents_untouched() {
        let original = "<requirement title=\"A\">Body</requirement>";
        let tmp = workspace(&[("doc.html", original)]);
        let scanner = Scanner::new(tmp.path());
        let mut requirements = BTreeMap::new();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        let outcome = scanner
            .scan(
                &mut requirements,
                &mut generator,
                &mut KeyRegistry::new(),
                options(true),
            )
            .unwrap();

        assert_eq!(outcome.rewritten.len(), 1);
        assert_eq!(requirements.len(), 1);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("doc.html")).unwrap(),
            original
        );
    }

    #[test]
    fn duplicate_keys_abort_the_scan() {
        let tmp = workspace(&[
            ("a.html", "<requirement key=\"REQ-1\">One</requirement>"),
            ("b.html", "<requirement key=\"REQ-1\">Two</requirement>"),
        ]);
        let scanner = Scanner::new(tmp.path());
        let mut requirements = BTreeMap::new();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        let error = scanner
            .scan(
                &mut requirements,
                &mut generator,
                &mut KeyRegistry::new(),
                options(false),
            )
            .unwrap_err();

        assert!(matches!(
            error,
            ScanError::DuplicateRequirementKey { key, first, document }
                if key == "REQ-1" && first == "a.html" && document == "b.html"
        ));
    }

    #[test]
    fn declarations_report_documents() {
        let tmp = workspace(&[
            ("z.md", "<requirement key=\"Z\">z</requirement>"),
            ("a/b.html", "<requirement key=\"B\">b</requirement><requirement>c</requirement>"),
        ]);
        let located = Scanner::new(tmp.path()).declarations().unwrap();
        let summary: Vec<_> = located
            .iter()
            .map(|l| (l.document.as_str(), l.declaration.key.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![("a/b.html", Some("B")), ("a/b.html", None), ("z.md", Some("Z"))]
        );
    }

    #[test]
    fn reset_lock_directives_rewrites_only_locked_documents() {
        let tmp = workspace(&[
            (
                "locked.html",
                "<requirement key=\"K\"><meta lockversion=\"true\"/>Body</requirement>",
            ),
            ("plain.html", "<requirement key=\"P\">Body</requirement>"),
        ]);
        let scanner = Scanner::new(tmp.path());

        let changed = scanner.reset_lock_directives(false).unwrap();
        assert_eq!(changed, vec![tmp.path().join("locked.html")]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("locked.html")).unwrap(),
            "<requirement key=\"K\">Body</requirement>"
        );
    }
}
