//! Parsing of `<requirement>` declarations embedded in documents.
//!
//! Only the start tag of a declaration is ever rewritten, and only the value
//! spans of the attributes that change, so untouched markup round-trips byte
//! for byte.

use std::{collections::BTreeMap, ops::Range, sync::LazyLock};

use regex::{Captures, Regex};

use crate::domain::{
    Config,
    fingerprint::{clean_text_for_storage, unescape_html},
    requirement::Content,
};

static REQUIREMENT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(<requirement\b(?:[^>]*[^/>])?)(>.*?</requirement>)").expect("this must never fail")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#,
    )
    .expect("this must never fail")
});

static ACTOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<actor\b([^>]*?)(?:/>|>(.*?)</actor>)").expect("this must never fail")
});

static TEST_PROCEDURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<testprocedure\b([^>]*?)/?>").expect("this must never fail")
});

static META: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<meta\b([^>]*?)/?>(?:\s*</meta>)?").expect("this must never fail")
});

const CLOSING_TAG: &str = "</requirement>";
const LOCK_ATTRIBUTE: &str = "lockversion";

/// A single attribute of a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Attribute {
    /// Lower-cased attribute name.
    name: String,
    /// Byte span of the raw name.
    name_span: Range<usize>,
    /// Decoded value; `None` for boolean attributes.
    value: Option<String>,
    /// Byte span of the raw value, excluding quotes.
    span: Option<Range<usize>>,
    quote: Option<char>,
}

fn parse_attributes(raw: &str) -> Vec<Attribute> {
    ATTRIBUTE
        .captures_iter(raw)
        .map(|caps| {
            let (raw_value, quote) = caps
                .get(2)
                .map(|m| (Some(m), Some('"')))
                .or_else(|| caps.get(3).map(|m| (Some(m), Some('\''))))
                .unwrap_or_else(|| (caps.get(4), None));
            Attribute {
                name: caps[1].to_ascii_lowercase(),
                name_span: caps.get(1).map_or(0..0, |m| m.range()),
                value: raw_value.map(|m| unescape_html(m.as_str()).into_owned()),
                span: raw_value.map(|m| m.range()),
                quote,
            }
        })
        .collect()
}

fn attribute<'a>(attributes: &'a [Attribute], name: &str) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.name == name)
}

fn attribute_value(attributes: &[Attribute], name: &str) -> Option<String> {
    attribute(attributes, name).and_then(|a| a.value.clone())
}

/// The start tag of a declaration, without its closing `>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    raw: String,
}

impl StartTag {
    /// Wraps the raw text of a start tag, e.g. `<requirement key="A"`.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    /// The raw text of the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Byte offset where attributes begin (just after the element name).
    fn attributes_offset(&self) -> usize {
        self.raw
            .char_indices()
            .skip(1)
            .find(|(_, c)| c.is_whitespace())
            .map_or(self.raw.len(), |(i, _)| i)
    }

    fn attributes(&self) -> Vec<Attribute> {
        let offset = self.attributes_offset();
        parse_attributes(&self.raw[offset..])
            .into_iter()
            .map(|mut attribute| {
                attribute.name_span =
                    attribute.name_span.start + offset..attribute.name_span.end + offset;
                attribute.span = attribute
                    .span
                    .map(|span| span.start + offset..span.end + offset);
                attribute
            })
            .collect()
    }

    /// The decoded value of attribute `name`, matched case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        attribute_value(&self.attributes(), &name.to_ascii_lowercase())
    }

    /// Sets attribute `name` to `value`.
    ///
    /// An existing attribute has its value replaced in place, keeping its
    /// quoting. A missing attribute is appended after the last attribute. The
    /// tag is left untouched if the decoded value already matches.
    pub fn set(&mut self, name: &str, value: &str) {
        let attributes = self.attributes();
        match attribute(&attributes, &name.to_ascii_lowercase()) {
            Some(existing) if existing.value.as_deref() == Some(value) => {}
            Some(Attribute {
                span: Some(span),
                quote: Some(quote),
                ..
            }) => {
                self.raw.replace_range(span.clone(), &escape(value, *quote));
            }
            Some(Attribute {
                span: Some(span), ..
            }) => {
                let quoted = format!("\"{}\"", escape(value, '"'));
                self.raw.replace_range(span.clone(), &quoted);
            }
            Some(Attribute { name_span, .. }) => {
                // boolean attribute; give it a value
                self.raw
                    .insert_str(name_span.end, &format!("=\"{}\"", escape(value, '"')));
            }
            None => {
                let end = self.raw.trim_end().len();
                self.raw
                    .insert_str(end, &format!(" {name}=\"{}\"", escape(value, '"')));
            }
        }
    }
}

fn escape(value: &str, quote: char) -> String {
    let escaped = value.replace('&', "&amp;");
    match quote {
        '\'' => escaped.replace('\'', "&#39;"),
        _ => escaped.replace('"', "&quot;"),
    }
}

/// A test procedure reference found under an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureRef {
    /// Name of the actor the procedure belongs to.
    pub actor: String,
    /// The referenced id; empty if the `id` attribute is missing.
    pub id: String,
}

/// A parsed `<requirement>` declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Declaration {
    /// The declared key, if any.
    pub key: Option<String>,
    /// The `title` attribute.
    pub title: String,
    /// The `conformance` attribute.
    pub conformance: String,
    /// Responsible actors, in declaration order.
    pub actors: Vec<String>,
    /// Active test procedure ids per actor, sorted and de-duplicated.
    pub test_procedures: BTreeMap<String, Vec<String>>,
    /// Every active test procedure reference, including ones without an id.
    pub procedure_refs: Vec<ProcedureRef>,
    /// Whether a lock directive suppresses the version bump.
    pub locked: bool,
    /// Inner markup with actor and meta elements removed, trimmed.
    pub body: String,
}

impl Declaration {
    /// Parses a declaration from its start tag and inner markup.
    #[must_use]
    pub fn parse(start: &StartTag, inner: &str) -> Self {
        let attributes = start.attributes();
        let text_attribute = |name: &str| {
            attribute_value(&attributes, name)
                .map(|value| value.trim().to_string())
                .unwrap_or_default()
        };

        let key = attribute_value(&attributes, "key")
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let mut actors = Vec::new();
        let mut test_procedures: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut procedure_refs = Vec::new();

        for caps in ACTOR.captures_iter(inner) {
            let actor_attributes = parse_attributes(&caps[1]);
            let Some(name) = attribute_value(&actor_attributes, "name")
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
            else {
                tracing::warn!(key = ?key, "skipping actor element without a name");
                continue;
            };

            let mut ids: Vec<String> = Vec::new();
            let actor_body = caps.get(2).map_or("", |m| m.as_str());
            for procedure in TEST_PROCEDURE.captures_iter(actor_body) {
                let procedure_attributes = parse_attributes(&procedure[1]);
                if !is_active(&procedure_attributes) {
                    continue;
                }
                let id = attribute_value(&procedure_attributes, "id")
                    .map(|id| id.trim().to_string())
                    .unwrap_or_default();
                procedure_refs.push(ProcedureRef {
                    actor: name.clone(),
                    id: id.clone(),
                });
                if !id.is_empty() {
                    ids.push(id);
                }
            }
            ids.sort();
            ids.dedup();

            if !actors.contains(&name) {
                actors.push(name.clone());
            }
            test_procedures
                .entry(name)
                .or_default()
                .extend(ids);
        }

        if actors.is_empty() {
            actors = text_attribute("actor")
                .split(',')
                .map(str::trim)
                .filter(|actor| !actor.is_empty())
                .map(str::to_string)
                .collect();
            actors.dedup();
        }
        for actor in &actors {
            test_procedures.entry(actor.clone()).or_default();
        }
        for ids in test_procedures.values_mut() {
            ids.sort();
            ids.dedup();
        }

        let locked = META.captures_iter(inner).any(|caps| is_lock(&caps));
        let without_actors = ACTOR.replace_all(inner, "");
        let body = META.replace_all(&without_actors, "").trim().to_string();

        Self {
            key,
            title: text_attribute("title"),
            conformance: text_attribute("conformance"),
            actors,
            test_procedures,
            procedure_refs,
            locked,
            body,
        }
    }

    /// The content this declaration describes, with the body cleaned for
    /// storage.
    #[must_use]
    pub fn content(&self) -> Content {
        Content {
            title: self.title.clone(),
            text: clean_text_for_storage(&self.body),
            conformance: self.conformance.clone(),
            actors: self.actors.clone(),
            test_procedures: self.test_procedures.clone(),
        }
    }

    /// The first test procedure reference the configuration does not accept.
    #[must_use]
    pub fn unresolved_test_procedure(&self, config: &Config) -> Option<&ProcedureRef> {
        self.procedure_refs
            .iter()
            .find(|reference| !config.is_test_procedure_known(&reference.id))
    }
}

/// Absent, `true` or `1` means active.
fn is_active(attributes: &[Attribute]) -> bool {
    attribute(attributes, "active")
        .and_then(|a| a.value.as_deref())
        .is_none_or(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"))
}

fn is_lock(meta: &Captures<'_>) -> bool {
    let attributes = parse_attributes(&meta[1]);
    attribute(&attributes, LOCK_ATTRIBUTE).is_some_and(|lock| {
        lock.value.as_deref().is_none_or(|value| {
            !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0")
        })
    })
}

/// A declaration located in a document, split for in-place rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// The start tag, without its closing `>`.
    pub start: StartTag,
    /// Everything from the start tag's `>` through `</requirement>`.
    pub rest: String,
}

impl Block {
    /// The markup between the start tag and the closing tag.
    #[must_use]
    pub fn inner(&self) -> &str {
        let end = self.rest.len().saturating_sub(CLOSING_TAG.len());
        self.rest.get(1..end).unwrap_or_default()
    }

    /// Parses the declaration.
    #[must_use]
    pub fn declaration(&self) -> Declaration {
        Declaration::parse(&self.start, self.inner())
    }

    /// Removes every lock directive from the inner markup.
    ///
    /// Returns `true` if anything was removed.
    pub fn strip_lock_directives(&mut self) -> bool {
        let end = self.rest.len().saturating_sub(CLOSING_TAG.len());
        let Some(inner) = self.rest.get(1..end) else {
            return false;
        };
        let stripped = META.replace_all(inner, |caps: &Captures<'_>| {
            if is_lock(caps) {
                String::new()
            } else {
                caps[0].to_string()
            }
        });
        if stripped == inner {
            return false;
        }
        self.rest = format!(">{stripped}{}", &self.rest[end..]);
        true
    }
}

/// Visits every declaration in `document` and reassembles it.
///
/// The visitor may modify each block. Text between declarations is copied
/// verbatim.
///
/// # Errors
///
/// Stops at and returns the first error raised by `visit`.
pub fn rewrite_blocks<E>(
    document: &str,
    mut visit: impl FnMut(&mut Block) -> Result<(), E>,
) -> Result<String, E> {
    let mut output = String::with_capacity(document.len());
    let mut last = 0;
    for caps in REQUIREMENT_BLOCK.captures_iter(document) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        output.push_str(&document[last..whole.start]);

        let mut block = Block {
            start: StartTag::new(&caps[1]),
            rest: caps[2].to_string(),
        };
        visit(&mut block)?;
        output.push_str(block.start.as_str());
        output.push_str(&block.rest);

        last = whole.end;
    }
    output.push_str(&document[last..]);
    Ok(output)
}
