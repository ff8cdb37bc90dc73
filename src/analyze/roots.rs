/*!
 * Root extraction
 *
 * A structured password is a word dressed in affixes: digits in front,
 * digits and punctuation behind. Stripping those deterministically and
 * lowercasing what remains yields the root, which is only accepted when
 * it looks like a pronounceable word rather than noise.
 */

use crate::analyze::entropy::shannon_entropy;
use crate::config::AnalyzerConfig;

/// Trailing special characters treated as suffix decoration
const SPECIAL_SUFFIX_SET: &str = "!@#$%^&*()_-+=.";

const VOWELS: &str = "aeiouy";

/// Affix split of one password
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Affixes {
    /// Leading digit run
    pub prefix: String,
    /// Trailing digit run followed by trailing special run
    pub suffix: String,
    /// Lowercased remainder between the affixes
    pub core: String,
    /// Remainder before lowercasing (for case-pattern detection)
    pub raw_core: String,
}

/// Split a password into prefix, core and suffix.
///
/// Strip order is fixed: leading digits, then trailing digits, then
/// trailing specials (concatenated after the digit suffix).
pub fn split_affixes(password: &str) -> Affixes {
    let mut rest = password;

    let prefix_len = rest
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let prefix = rest[..prefix_len].to_string();
    rest = &rest[prefix_len..];

    let digit_suffix_len = rest
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    let digit_suffix = rest[rest.len() - digit_suffix_len..].to_string();
    rest = &rest[..rest.len() - digit_suffix_len];

    let special_suffix_len = rest
        .chars()
        .rev()
        .take_while(|c| SPECIAL_SUFFIX_SET.contains(*c))
        .map(|c| c.len_utf8())
        .sum::<usize>();
    let special_suffix = rest[rest.len() - special_suffix_len..].to_string();
    rest = &rest[..rest.len() - special_suffix_len];

    Affixes {
        prefix,
        suffix: format!("{}{}", digit_suffix, special_suffix),
        core: rest.to_lowercase(),
        raw_core: rest.to_string(),
    }
}

/// Why a candidate root was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootRejection {
    TooShort,
    NotLetters,
    NoVowel,
    RejectedPrefix,
    /// Short root that failed the vowel-ratio or entropy screen
    ShortAndNoisy,
}

/// Test a candidate root against the acceptance rules.
///
/// Accepted roots are length >= 3, letters only, contain a vowel, and
/// are either length >= 5 or pass the short-root vowel-ratio and
/// entropy screens. Known keyboard/service prefixes are rejected
/// outright.
pub fn accept_root(root: &str, config: &AnalyzerConfig) -> Result<(), RootRejection> {
    if root.len() < 3 {
        return Err(RootRejection::TooShort);
    }
    if !root.bytes().all(|b| b.is_ascii_lowercase()) {
        return Err(RootRejection::NotLetters);
    }
    let vowels = root.chars().filter(|c| VOWELS.contains(*c)).count();
    if vowels == 0 {
        return Err(RootRejection::NoVowel);
    }
    if config
        .reject_prefixes
        .iter()
        .any(|p| root.starts_with(p.as_str()))
    {
        return Err(RootRejection::RejectedPrefix);
    }
    if root.len() >= 5 {
        return Ok(());
    }

    let vowel_ratio = vowels as f64 / root.len() as f64;
    if vowel_ratio < config.short_root_vowel_ratio {
        return Err(RootRejection::ShortAndNoisy);
    }
    if shannon_entropy(root) >= config.short_root_entropy {
        return Err(RootRejection::ShortAndNoisy);
    }
    Ok(())
}

/// Extract and screen the root of one password in a single step
pub fn extract_root(password: &str, config: &AnalyzerConfig) -> Option<String> {
    let affixes = split_affixes(password);
    match accept_root(&affixes.core, config) {
        Ok(()) => Some(affixes.core),
        Err(_) => None,
    }
}
