//! Fixed-width `file:line` location tags
//!
//! A tag is built by giving the line number up to half of the width, then
//! shortening the file stem word by word from the end (`very_long_name` ->
//! `VeryLongN` -> `VeryLN` -> ...), and finally re-encoding the line number
//! into whatever width the name left over. The result is always exactly the
//! requested number of characters.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;

/// Default number of memoized tags
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

static WORD_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][a-z]*|[_\- ]").expect("valid word boundary pattern"));

static GLOBAL_CACHE: Lazy<Arc<TagCache>> =
    Lazy::new(|| Arc::new(TagCache::new(DEFAULT_CACHE_CAPACITY)));

type TagKey = (String, u64, usize);

/// Bounded memo of `(file, line, width) -> tag`, evicting the oldest entry first.
///
/// Computing a tag is pure, so concurrent callers racing on the same key only
/// recompute the same value.
pub struct TagCache {
    capacity: usize,
    entries: Mutex<IndexMap<TagKey, String>>,
}

impl TagCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(IndexMap::with_capacity(capacity.max(1))),
        }
    }

    /// The process-wide cache shared by every session
    pub fn global() -> Arc<TagCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    /// Look up or compute the tag for a call site
    pub fn tag(&self, filename: &str, line: u64, width: usize) -> String {
        let key = (filename.to_string(), line, width);
        if let Some(tag) = self.entries.lock().get(&key) {
            return tag.clone();
        }

        let tag = abbreviate(filename, line, width);

        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                entries.shift_remove_index(0);
            }
            entries.insert(key, tag.clone());
        }
        tag
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every memoized tag
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// Abbreviate `filename:line` into exactly `width` characters.
pub fn abbreviate(filename: &str, line: u64, width: usize) -> String {
    let mut name = strip_extension(filename).to_string();

    let line_budget = width / 2;
    let provisional = shorten_line_number(line, line_budget);
    let name_budget = width.saturating_sub(char_len(&provisional) + 1);

    let mut rounds = char_len(&name) * 2 + 1;
    while char_len(&name) > name_budget && rounds > 0 {
        rounds -= 1;
        let shorter = collapse_last_word(&name);
        if shorter == name {
            break;
        }
        name = shorter;
    }
    let name = truncate(&name, name_budget);

    let line_text = shorten_line_number(line, width.saturating_sub(char_len(&name) + 1));
    let tag = format!("{}:{}", name, line_text);
    let tag = truncate(&tag, width);
    let fill = width - char_len(&tag);
    tag + &" ".repeat(fill)
}

fn strip_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(pos) => &filename[..pos],
        None => filename,
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn is_upper(word: &str) -> bool {
    word.chars().any(char::is_uppercase) && !word.chars().any(char::is_lowercase)
}

/// Split a name on camel-case humps and `_`, `-`, space, capitalizing each word.
fn split_words(name: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for found in WORD_BOUNDARY.find_iter(name) {
        pieces.push(&name[last..found.start()]);
        pieces.push(found.as_str());
        last = found.end();
    }
    pieces.push(&name[last..]);

    pieces
        .into_iter()
        .filter(|piece| !piece.is_empty() && !matches!(*piece, "_" | "-" | " "))
        .map(capitalize)
        .collect()
}

/// Collapse the last word that is alphanumeric and not already upper case to
/// its initial. When no word can be collapsed, drop the last word.
fn collapse_last_word(name: &str) -> String {
    let mut words = split_words(name);
    for i in (0..words.len()).rev() {
        let word = &words[i];
        if !word.chars().all(char::is_alphanumeric) || is_upper(word) {
            continue;
        }
        let initial: String = word.chars().take(1).flat_map(char::to_uppercase).collect();
        if initial == *word {
            continue;
        }
        words[i] = initial;
        return words.concat();
    }
    words.pop();
    words.concat()
}

fn int_to_base64(n: u64) -> String {
    let bytes = n.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    STANDARD.encode(&bytes[first..])
}

/// Render `line` in at most `budget` characters: decimal, `0x` hex, `x` hex,
/// base64 of the big-endian bytes, scientific notation, and finally a bare
/// truncated exponent.
pub fn shorten_line_number(line: u64, budget: usize) -> String {
    let decimal = line.to_string();
    if decimal.len() <= budget {
        return decimal;
    }
    let hex = format!("{:#x}", line);
    if hex.len() <= budget {
        return hex;
    }
    let short_hex = &hex[1..];
    if short_hex.len() <= budget {
        return short_hex.to_string();
    }
    let b64 = int_to_base64(line);
    if b64.len() <= budget {
        return b64;
    }

    // line > 0 here: "0" always fits a non-zero budget
    let exponent = decimal.len() - 1;
    for precision in (0..=budget).rev() {
        let scientific = format!("{:.*e}", precision, line as f64);
        if scientific.len() <= budget {
            return scientific;
        }
    }
    truncate(&format!("e{}", exponent), budget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_long_module_name() {
        let tag = abbreviate("very_long_module_name.py", 123456, 15);
        assert_eq!(tag, "VeryLMN:123456 ");
        assert_eq!(tag.len(), 15);
        assert!(tag.contains(':'));
        assert!(!tag.contains(".py"));
    }

    #[test]
    fn test_short_names_are_padded() {
        assert_eq!(abbreviate("main.rs", 42, 15), "main:42        ");
    }

    #[test]
    fn test_camel_case_collapse() {
        assert_eq!(collapse_last_word("TeeLogger"), "TeeL");
        assert_eq!(collapse_last_word("TeeL"), "TL");
        assert_eq!(collapse_last_word("TL"), "T");
    }

    #[test]
    fn test_single_letter_words_make_progress() {
        assert_eq!(collapse_last_word("abc_2"), "A2");
        assert_eq!(collapse_last_word("a"), "");
        assert_eq!(collapse_last_word("a_b"), "A");
    }

    #[test]
    fn test_line_number_strategies() {
        assert_eq!(shorten_line_number(1234, 5), "1234");
        assert_eq!(shorten_line_number(123456, 7), "123456");
        assert_eq!(shorten_line_number(123456, 6), "123456");
        assert_eq!(shorten_line_number(1234567, 6), "EtaH");
        assert_eq!(shorten_line_number(0xffff_ffff, 9), "xffffffff");
        assert_eq!(shorten_line_number(0xff_ffff_ffff, 12), "0xffffffffff");
        assert_eq!(shorten_line_number(65535, 4), "//8=");
        assert_eq!(shorten_line_number(65535, 3), "7e4");
        assert_eq!(shorten_line_number(u64::MAX, 2), "e1");
    }

    #[test]
    fn test_degenerate_widths() {
        assert_eq!(abbreviate("x.rs", 7, 0), "");
        assert_eq!(abbreviate("x.rs", 7, 1), ":");
        assert_eq!(abbreviate("", 0, 4), ":0  ");
    }

    #[test]
    fn test_cache_evicts_oldest_first() {
        let cache = TagCache::new(2);
        cache.tag("a.rs", 1, 10);
        cache.tag("b.rs", 1, 10);
        cache.tag("c.rs", 1, 10);
        assert_eq!(cache.len(), 2);
        let entries = cache.entries.lock();
        assert!(!entries.contains_key(&("a.rs".to_string(), 1, 10)));
        assert!(entries.contains_key(&("c.rs".to_string(), 1, 10)));
    }

    #[test]
    fn test_cache_reset() {
        let cache = TagCache::new(4);
        assert_eq!(cache.tag("main.rs", 3, 12), abbreviate("main.rs", 3, 12));
        assert!(!cache.is_empty());
        cache.reset();
        assert!(cache.is_empty());
    }

    proptest! {
        #[test]
        fn prop_tag_has_exact_width(
            name in "[A-Za-z0-9_. -]{0,40}",
            line in any::<u64>(),
            width in 0usize..40,
        ) {
            prop_assert_eq!(abbreviate(&name, line, width).chars().count(), width);
        }

        #[test]
        fn prop_hex_strategy_round_trips(line in 1u64..u64::MAX, budget in 1usize..20) {
            let text = shorten_line_number(line, budget);
            let decimal_fits = line.to_string().len() <= budget;
            let hex_fits = format!("{:x}", line).len() < budget;
            if !decimal_fits && hex_fits {
                let digits = text
                    .strip_prefix("0x")
                    .or_else(|| text.strip_prefix('x'))
                    .expect("hex strategy keeps its prefix");
                prop_assert_eq!(u64::from_str_radix(digits, 16).unwrap(), line);
            }
        }
    }
}
