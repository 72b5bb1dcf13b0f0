//! Requirement key generation.
//!
//! Keys are minted by a [`KeyGenerator`] against a run-scoped
//! [`KeyRegistry`] holding every key already in use, so a minted key can never
//! collide with a stored, archived or declared one.

use std::collections::HashSet;

use rand::RngCore;

use crate::domain::{Config, config::KeyMode};

const DIGITS: &[u8] = b"0123456789";

/// Letters used for the single alphabetic symbol. `I` and `O` are left out.
const ALPHA: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Alphabet for the trailing alphanumeric symbols.
const CHAR_SET: &[u8] = b"0123456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Whether `key` can name a record file.
///
/// Keys must be non-empty, must not start with a dot, and must not contain
/// path separators, drive separators or control characters.
#[must_use]
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
}

/// The set of keys in use during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRegistry {
    seen: HashSet<String>,
}

impl KeyRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }

    /// Whether a key is in use.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Iterate over the registered keys, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for KeyRegistry {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            seen: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<S: Into<String>> Extend<S> for KeyRegistry {
    fn extend<T: IntoIterator<Item = S>>(&mut self, iter: T) {
        self.seen.extend(iter.into_iter().map(Into::into));
    }
}

/// Produces keys that are not yet in the registry.
pub trait KeyGenerator {
    /// Mint a fresh key and record it in `registry`.
    ///
    /// The returned key was not present in the registry before the call.
    fn generate(&mut self, registry: &mut KeyRegistry) -> String;
}

/// Random keys of the form `{prefix}{separator}{scope}DDDDDLXX`.
#[derive(Debug, Clone)]
pub struct RandomKeys {
    stem: String,
}

impl RandomKeys {
    /// Create a generator for keys beginning with `prefix`, `separator` and
    /// the optional `scope`.
    #[must_use]
    pub fn new(prefix: &str, separator: &str, scope: Option<&str>) -> Self {
        Self {
            stem: stem(prefix, separator, scope),
        }
    }

    fn candidate(&self) -> String {
        let mut key = self.stem.clone();
        key.push_str(&random_string(DIGITS, 5));
        key.push_str(&random_string(ALPHA, 1));
        key.push_str(&random_string(CHAR_SET, 2));
        key
    }
}

impl KeyGenerator for RandomKeys {
    fn generate(&mut self, registry: &mut KeyRegistry) -> String {
        loop {
            let key = self.candidate();
            if registry.insert(key.clone()) {
                return key;
            }
            tracing::debug!(%key, "random key collided, retrying");
        }
    }
}

/// Draw `length` symbols from `alphabet` without modulo bias.
///
/// Random bytes are masked to the smallest bit width that covers the
/// alphabet and out-of-range values are discarded.
fn random_string(alphabet: &[u8], length: usize) -> String {
    debug_assert!(!alphabet.is_empty() && alphabet.len() <= 256);
    let mask = if alphabet.len() <= 1 {
        0
    } else {
        (2usize << (alphabet.len() - 1).ilog2()) - 1
    };
    // Average number of bytes needed per batch, with headroom for rejections.
    let step = (8 * (mask + 1) * length).div_ceil(5 * alphabet.len()).max(1);

    let mut rng = rand::rng();
    let mut out = String::with_capacity(length);
    let mut buf = vec![0u8; step];
    while out.len() < length {
        rng.fill_bytes(&mut buf);
        for byte in &buf {
            let index = usize::from(*byte) & mask;
            if let Some(symbol) = alphabet.get(index) {
                out.push(char::from(*symbol));
                if out.len() == length {
                    break;
                }
            }
        }
    }
    out
}

/// Sequential keys of the form `{prefix}{separator}{scope}{N}`.
#[derive(Debug, Clone)]
pub struct SequentialKeys {
    stem: String,
    counter: u64,
}

impl SequentialKeys {
    /// Create a generator whose counter starts at `counter`.
    #[must_use]
    pub fn new(prefix: &str, separator: &str, scope: Option<&str>, counter: u64) -> Self {
        Self {
            stem: stem(prefix, separator, scope),
            counter,
        }
    }

    /// The last number issued.
    #[must_use]
    pub const fn counter(&self) -> u64 {
        self.counter
    }

    fn highest_in(&self, registry: &KeyRegistry) -> u64 {
        registry
            .iter()
            .filter_map(|key| key.strip_prefix(self.stem.as_str()))
            .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }
}

impl KeyGenerator for SequentialKeys {
    fn generate(&mut self, registry: &mut KeyRegistry) -> String {
        loop {
            self.counter = self.counter.max(self.highest_in(registry)) + 1;
            let key = format!("{}{}", self.stem, self.counter);
            if registry.insert(key.clone()) {
                return key;
            }
        }
    }
}

fn stem(prefix: &str, separator: &str, scope: Option<&str>) -> String {
    format!("{prefix}{separator}{}", scope.unwrap_or_default())
}

/// The key generator selected by configuration.
#[derive(Debug, Clone)]
pub enum KeyStrategy {
    /// See [`RandomKeys`].
    Random(RandomKeys),
    /// See [`SequentialKeys`].
    Sequential(SequentialKeys),
}

impl KeyStrategy {
    /// Build the generator described by the configuration's `key_mode`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let scope = config.scope.as_deref();
        match config.key_mode {
            KeyMode::Random => Self::Random(RandomKeys::new(&config.prefix, &config.separator, scope)),
            KeyMode::Sequential => Self::Sequential(SequentialKeys::new(
                &config.prefix,
                &config.separator,
                scope,
                config.current_req_number(),
            )),
        }
    }

    /// The sequential counter, if this is the sequential strategy.
    #[must_use]
    pub const fn counter(&self) -> Option<u64> {
        match self {
            Self::Random(_) => None,
            Self::Sequential(generator) => Some(generator.counter()),
        }
    }
}

impl KeyGenerator for KeyStrategy {
    fn generate(&mut self, registry: &mut KeyRegistry) -> String {
        match self {
            Self::Random(generator) => generator.generate(registry),
            Self::Sequential(generator) => generator.generate(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;
    use test_case::test_case;

    use super::*;

    #[test]
    fn sequential_continues_after_highest_existing_key() {
        let mut registry: KeyRegistry = (1..=10).map(|n| format!("REQ-{n}")).collect();
        let mut generator = SequentialKeys::new("REQ", "-", None, 5);

        assert_eq!(generator.generate(&mut registry), "REQ-11");
        assert_eq!(generator.generate(&mut registry), "REQ-12");
        assert_eq!(generator.counter(), 12);
        assert!(registry.contains("REQ-12"));
    }

    #[test]
    fn sequential_counter_wins_over_lower_keys() {
        let mut registry: KeyRegistry = ["REQ-AUTH3"].into_iter().collect();
        let mut generator = SequentialKeys::new("REQ", "-", Some("AUTH"), 20);

        assert_eq!(generator.generate(&mut registry), "REQ-AUTH21");
    }

    #[test]
    fn sequential_ignores_keys_with_other_stems() {
        let mut registry: KeyRegistry = ["SYS-99", "REQ-X", "REQ-2"].into_iter().collect();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        assert_eq!(generator.generate(&mut registry), "REQ-3");
    }

    #[test]
    fn sequential_only_counts_digit_suffixes() {
        let mut registry: KeyRegistry = ["REQ-+50", "REQ- 40", "REQ-2"].into_iter().collect();
        let mut generator = SequentialKeys::new("REQ", "-", None, 0);

        assert_eq!(generator.generate(&mut registry), "REQ-3");
    }

    #[test_case("REQ-1", true; "plain")]
    #[test_case("REQ-1.2", true; "inner dot")]
    #[test_case("", false; "empty")]
    #[test_case("../../x", false; "parent traversal")]
    #[test_case("/etc/passwd", false; "absolute")]
    #[test_case("a\\b", false; "backslash")]
    #[test_case("C:x", false; "drive")]
    #[test_case(".hidden", false; "leading dot")]
    #[test_case("a\nb", false; "control character")]
    fn validates_keys(key: &str, valid: bool) {
        assert_eq!(is_valid_key(key), valid);
    }

    #[test]
    fn random_keys_never_collide() {
        let pattern = Regex::new(r"^REQ-S\d{5}[A-HJ-NP-Z][0-9A-HJ-NP-Z]{2}$").unwrap();
        let mut registry = KeyRegistry::new();
        let mut generator = RandomKeys::new("REQ", "-", Some("S"));

        for _ in 0..10_000 {
            let key = generator.generate(&mut registry);
            assert!(pattern.is_match(&key), "unexpected key shape: {key}");
        }
        assert_eq!(registry.len(), 10_000);
    }

    #[test_case(DIGITS; "digits")]
    #[test_case(ALPHA; "letters")]
    #[test_case(CHAR_SET; "alphanumerics")]
    fn random_string_stays_within_alphabet(alphabet: &[u8]) {
        let drawn = random_string(alphabet, 64);
        assert_eq!(drawn.len(), 64);
        assert!(drawn.bytes().all(|b| alphabet.contains(&b)));
    }

    #[test]
    fn strategy_follows_key_mode() {
        let mut config = Config::default();
        assert!(KeyStrategy::from_config(&config).counter().is_none());

        config.key_mode = KeyMode::Sequential;
        config.set_current_req_number(7);
        let mut strategy = KeyStrategy::from_config(&config);
        assert_eq!(strategy.counter(), Some(7));
        assert_eq!(strategy.generate(&mut KeyRegistry::new()), "REQ-8");
    }
}
