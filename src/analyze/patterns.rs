/*!
 * Transformation pattern detection
 *
 * Each recovered plaintext is tagged with the habits it exhibits:
 * length bucket, casing, digit and special suffixes, year endings,
 * leetspeak substitutions, keyboard walks, repetitions. Counts over the
 * whole corpus drive rule synthesis downstream, and the observed suffix
 * literals feed the top-K suffix rules.
 */

use std::collections::HashMap;

use super::roots::split_affixes;

/// Leet substitutions recognized in the core of a password
const LEET_PAIRS: &[(char, char)] = &[
    ('@', 'a'),
    ('3', 'e'),
    ('1', 'i'),
    ('0', 'o'),
    ('$', 's'),
];

/// Keyboard-walk fragments checked against the lowercased password
const KEYBOARD_WALKS: &[&str] = &[
    "qwerty", "qwert", "asdfgh", "asdf", "zxcvbn", "zxcv", "12345", "54321", "1q2w3e",
];

/// Corpus-wide pattern accumulation
#[derive(Debug, Default)]
pub struct PatternCounts {
    /// Tag -> occurrences (e.g. "suffix:d3", "case:capitalized")
    pub flags: HashMap<String, usize>,
    /// Literal suffix -> occurrences (e.g. "123", "!", "2024")
    pub suffixes: HashMap<String, usize>,
}

impl PatternCounts {
    pub fn count(&self, flag: &str) -> usize {
        self.flags.get(flag).copied().unwrap_or(0)
    }

    /// Record one password's tags
    pub fn observe(&mut self, password: &str) {
        for tag in detect_patterns(password) {
            *self.flags.entry(tag).or_insert(0) += 1;
        }
        let affixes = split_affixes(password);
        if !affixes.suffix.is_empty() {
            *self.suffixes.entry(affixes.suffix).or_insert(0) += 1;
        }
    }

    /// Suffix literals by descending frequency, ties broken
    /// lexicographically for determinism
    pub fn top_suffixes(&self, k: usize) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .suffixes
            .iter()
            .map(|(s, &c)| (s.clone(), c))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(k);
        entries
    }
}

/// Tag one password with every pattern it exhibits
pub fn detect_patterns(password: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let affixes = split_affixes(password);

    tags.push(length_bucket(password).to_string());

    if let Some(case) = case_pattern(&affixes.raw_core) {
        tags.push(case);
    }

    // Digit suffix arity and year endings
    let digit_suffix: String = affixes
        .suffix
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digit_suffix.len() {
        0 => {}
        1 => tags.push("suffix:d1".to_string()),
        2 => tags.push("suffix:d2".to_string()),
        3 => tags.push("suffix:d3".to_string()),
        _ => tags.push("suffix:d4+".to_string()),
    }
    if digit_suffix.len() == 4 && (digit_suffix.starts_with("19") || digit_suffix.starts_with("20"))
    {
        tags.push("suffix:year".to_string());
        if let Ok(year) = digit_suffix.parse::<u32>() {
            if (2018..=2029).contains(&year) {
                tags.push("suffix:year-recent".to_string());
            }
        }
    }

    // Common literal suffixes
    for literal in ["!@", "!", "@", "123"] {
        if password.ends_with(literal) {
            tags.push(format!("suffix:{}", literal));
            break;
        }
    }

    if !affixes.prefix.is_empty() {
        tags.push("prefix:digit".to_string());
    }

    // Leet substitutions inside the core (suffix decoration excluded)
    for (symbol, letter) in LEET_PAIRS {
        if affixes.core.contains(*symbol) {
            tags.push(format!("leet:{}{}", letter, symbol));
        }
    }

    let lower = password.to_lowercase();
    if KEYBOARD_WALKS.iter().any(|walk| lower.contains(walk)) {
        tags.push("keyboard-walk".to_string());
    }

    if has_char_repeat(password, 3) {
        tags.push("repeat:char".to_string());
    }
    if has_block_repeat(password) {
        tags.push("repeat:block".to_string());
    }

    tags
}

fn length_bucket(password: &str) -> &'static str {
    match password.chars().count() {
        0..=6 => "len:1-6",
        7..=8 => "len:7-8",
        9..=12 => "len:9-12",
        _ => "len:13+",
    }
}

/// Case habit of the alphabetic core, if it has letters at all
fn case_pattern(core: &str) -> Option<String> {
    let letters: Vec<char> = core.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let uppers = letters.iter().filter(|c| c.is_uppercase()).count();
    let tag = if uppers == 0 {
        "case:lower"
    } else if uppers == letters.len() {
        "case:upper"
    } else if letters[0].is_uppercase() && uppers == 1 {
        "case:capitalized"
    } else {
        "case:camel"
    };
    Some(tag.to_string())
}

/// Any character repeated at least `min_run` times consecutively
fn has_char_repeat(password: &str, min_run: usize) -> bool {
    let chars: Vec<char> = password.chars().collect();
    let mut run = 1;
    for pair in chars.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 1;
        }
    }
    false
}

/// Whole password is one block repeated two or more times
fn has_block_repeat(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    let n = chars.len();
    if n < 4 {
        return false;
    }
    for block in 2..=n / 2 {
        if n % block != 0 {
            continue;
        }
        if chars.chunks(block).all(|chunk| chunk == &chars[..block]) {
            return true;
        }
    }
    false
}
