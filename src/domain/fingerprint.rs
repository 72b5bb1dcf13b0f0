//! Content normalization and fingerprinting.
//!
//! Document tooling routinely reflows paragraphs, re-encodes entities and
//! shuffles attribute order. None of that should register as a change to a
//! requirement, so the fingerprint is computed over a canonical projection of
//! the semantically meaningful fields rather than over the raw markup.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    sync::LazyLock,
};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::Requirement;

static ACTOR_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<actor\b[^>]*?(?:/>|>.*?</actor>)").expect("this must never fail")
});

static MARKUP_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)</?[a-zA-Z][a-zA-Z0-9]*\b[^>]*>").expect("this must never fail")
});

static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" {2,}").expect("this must never fail"));

/// Upper bound on normalization passes.
///
/// A pass can only expose new markup when an entity decodes into a tag, so the
/// fixpoint is reached after very few iterations.
const MAX_PASSES: usize = 4;

/// Decode HTML character references.
///
/// Every named entity of the HTML5 table is decoded, as are decimal and
/// hexadecimal references. Unknown names are left untouched.
#[must_use]
pub fn unescape_html(raw: &str) -> Cow<'_, str> {
    htmlize::unescape(raw)
}

/// Reduce a requirement body to the characters that carry meaning.
///
/// Actor sub-blocks are removed (actors are tracked as structured fields),
/// entities are decoded, invisible characters and markup tags are dropped, all
/// whitespace is removed and the result is lower-cased. The transformation is
/// repeated until it no longer changes its input, so applying it twice yields
/// the same result as applying it once.
#[must_use]
pub fn normalize_text_for_semantics(raw: &str) -> String {
    let mut current = normalize_pass(raw);
    for _ in 1..MAX_PASSES {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn normalize_pass(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let without_actors = ACTOR_BLOCK.replace_all(raw, "");
    let unescaped = unescape_html(&without_actors);
    let visible: String = unescaped
        .chars()
        .filter(|c| !matches!(c, '\u{00AD}' | '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect();
    let untagged = MARKUP_TAG.replace_all(&visible, "");
    untagged
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// Tidy a requirement body for storage.
///
/// This keeps the text human readable: line endings are unified, leading and
/// trailing spaces are trimmed and runs of interior spaces are collapsed.
/// Line breaks and markup are preserved.
#[must_use]
pub fn clean_text_for_storage(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    SPACE_RUN
        .replace_all(unified.trim_matches(' '), " ")
        .into_owned()
}

/// Order-independent, de-duplicated set of actor names.
#[must_use]
pub fn canonicalize_actors<S: AsRef<str>>(actors: &[S]) -> BTreeSet<String> {
    actors
        .iter()
        .map(|actor| actor.as_ref().trim())
        .filter(|actor| !actor.is_empty())
        .map(str::to_string)
        .collect()
}

/// Order-independent mapping of actor name to the set of its test procedures.
///
/// Blank actor names and blank procedure ids are dropped.
#[must_use]
pub fn canonicalize_test_procedures<S: AsRef<str>>(
    test_procedures: &BTreeMap<String, Vec<S>>,
) -> BTreeMap<String, BTreeSet<String>> {
    test_procedures
        .iter()
        .filter(|(actor, _)| !actor.trim().is_empty())
        .map(|(actor, ids)| {
            let ids = ids
                .iter()
                .map(|id| id.as_ref().trim())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
            (actor.trim().to_string(), ids)
        })
        .collect()
}

/// Compute the content fingerprint of a requirement.
///
/// The fingerprint is the hex encoded SHA-256 of a compact JSON document with
/// sorted keys, built from the canonical form of every field.
#[must_use]
pub fn build_fingerprint<A, T>(
    text: &str,
    title: &str,
    conformance: &str,
    actors: &[A],
    test_procedures: &BTreeMap<String, Vec<T>>,
) -> String
where
    A: AsRef<str>,
    T: AsRef<str>,
{
    // fields in key order
    #[derive(Serialize)]
    struct Canonical<'a> {
        actors: BTreeSet<String>,
        conformance: &'a str,
        test_procedures: BTreeMap<String, BTreeSet<String>>,
        text: String,
        title: &'a str,
    }

    let canonical = Canonical {
        actors: canonicalize_actors(actors),
        conformance: conformance.trim(),
        test_procedures: canonicalize_test_procedures(test_procedures),
        text: normalize_text_for_semantics(text),
        title: title.trim(),
    };

    hash_json(&canonical)
}

/// Compute the aggregate fingerprint of a release.
///
/// The payload is the list of `(hash, key, version)` triples sorted by key,
/// so both content tampering and version manipulation change the result.
#[must_use]
pub fn build_release_fingerprint<'a, I>(requirements: I) -> String
where
    I: IntoIterator<Item = &'a Requirement>,
{
    #[derive(Serialize)]
    struct Entry<'a> {
        hash: &'a str,
        key: &'a str,
        version: u32,
    }

    let mut entries: Vec<Entry<'_>> = requirements
        .into_iter()
        .map(|requirement| Entry {
            hash: requirement.content_hash(),
            key: requirement.key(),
            version: requirement.version(),
        })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(b.key));

    hash_json(&entries)
}

fn hash_json<T: Serialize>(value: &T) -> String {
    let payload = serde_json::to_vec(value).expect("this should never fail");
    let hash = Sha256::digest(payload);
    format!("{hash:x}")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use test_case::test_case;

    use super::*;

    fn no_procedures() -> BTreeMap<String, Vec<String>> {
        BTreeMap::new()
    }

    #[test_case("  This is   a test\t", "thisisatest"; "spaces and tabs")]
    #[test_case("This\nis\na\ntest", "thisisatest"; "line breaks")]
    #[test_case(" \nThis\t is  \na \ttest ", "thisisatest"; "mixed whitespace")]
    #[test_case("This Is A TEST", "thisisatest"; "case")]
    #[test_case("This <b>is</b> A TEST", "thisisatest"; "inline markup")]
    #[test_case("<table><tr><td>This</td></tr><tr><td><b>is</b> A TEST</td></tr></table>", "thisisatest"; "table markup")]
    #[test_case("Fish &amp; Chips", "fish&chips"; "named entity")]
    #[test_case("caf&#233; &#x263A;", "café☺"; "numeric entities")]
    #[test_case("&Eacute;t&eacute; &oacute; &ne; &hArr;", "étéó≠⇔"; "html5 named entities")]
    #[test_case("soft\u{00AD}hyphen\u{200B}zero\u{00A0}width", "softhyphenzerowidth"; "invisible characters")]
    #[test_case("Text<actor name=\"A\"><testProcedure id=\"T1\"/></actor> more", "textmore"; "actor block")]
    #[test_case("", ""; "empty")]
    #[test_case(" \t\n  ", ""; "only whitespace")]
    fn normalizes_for_semantics(input: &str, expected: &str) {
        assert_eq!(normalize_text_for_semantics(input), expected);
    }

    #[test_case("Plain text"; "plain")]
    #[test_case("Some <i>marked</i>&nbsp;up\n text &amp;lt;b&amp;gt;"; "double escaped markup")]
    #[test_case("Mixed &Auml;rger\r\n<ul><li>ONE</li></ul>"; "entities and lists")]
    fn normalization_is_idempotent(input: &str) {
        let once = normalize_text_for_semantics(input);
        assert_eq!(normalize_text_for_semantics(&once), once);
    }

    #[test]
    fn unknown_entities_are_preserved() {
        assert_eq!(unescape_html("&bogus; &amp;"), "&bogus; &");
    }

    #[test]
    fn entity_encoding_does_not_change_fingerprint() {
        let encoded = build_fingerprint("&Eacute;t&eacute; &oacute;", "T", "SHALL", &["A"], &no_procedures());
        let literal = build_fingerprint("Été ó", "T", "SHALL", &["A"], &no_procedures());
        assert_eq!(encoded, literal);
    }

    #[test]
    fn clean_text_collapses_spaces_but_keeps_lines() {
        assert_eq!(
            clean_text_for_storage("   This is  \n a   text.   "),
            "This is \n a text."
        );
        assert_eq!(clean_text_for_storage("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn editorial_changes_do_not_change_fingerprint() {
        let actors = ["EPA-First", "EPA-Second"];
        let original = build_fingerprint(
            "The service <b>SHALL</b> log\n    every &quot;access&quot;.",
            "Logging",
            "SHALL",
            &actors,
            &no_procedures_for(&actors),
        );
        let reflowed = build_fingerprint(
            "The service SHALL log every \"access\".",
            "  Logging ",
            " SHALL",
            &actors,
            &no_procedures_for(&actors),
        );
        assert_eq!(original, reflowed);
    }

    fn no_procedures_for(actors: &[&str]) -> BTreeMap<String, Vec<&'static str>> {
        actors.iter().map(|a| ((*a).to_string(), Vec::new())).collect()
    }

    #[test]
    fn actor_order_does_not_change_fingerprint() {
        let first = build_fingerprint("ABC", "T", "SHALL", &["B", "A", "C"], &no_procedures());
        let second = build_fingerprint("ABC", "T", "SHALL", &["C", "B", "A", "A"], &no_procedures());
        assert_eq!(first, second);
    }

    #[test]
    fn test_procedure_order_does_not_change_fingerprint() {
        let first: BTreeMap<String, Vec<String>> = [
            ("A".to_string(), vec!["T2".to_string(), "T1".to_string()]),
            ("B".to_string(), vec!["T3".to_string()]),
        ]
        .into();
        let second: BTreeMap<String, Vec<String>> = [
            ("B".to_string(), vec!["T3".to_string(), " T3 ".to_string()]),
            ("A".to_string(), vec!["T1".to_string(), "T2".to_string()]),
        ]
        .into();
        assert_eq!(
            build_fingerprint("ABC", "T", "SHALL", &["A", "B"], &first),
            build_fingerprint("ABC", "T", "SHALL", &["B", "A"], &second),
        );
    }

    #[test]
    fn conformance_change_is_substantive() {
        let shall = build_fingerprint("ABC", "T", "SHALL", &["A"], &no_procedures());
        let should = build_fingerprint("ABC", "T", "SHOULD", &["A"], &no_procedures());
        assert_ne!(shall, should);
    }

    #[test]
    fn wording_change_is_substantive() {
        let before = build_fingerprint("The system SHALL log", "T", "SHALL", &["A"], &no_procedures());
        let after = build_fingerprint("The system SHALL audit", "T", "SHALL", &["A"], &no_procedures());
        assert_ne!(before, after);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fingerprint = build_fingerprint("x", "y", "z", &["a"], &no_procedures());
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
