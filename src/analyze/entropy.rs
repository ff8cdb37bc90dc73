/*!
 * Shannon entropy over observed characters
 */

use std::collections::HashMap;

/// Per-character Shannon entropy of a string, in bits.
///
/// `H = -sum(p_i * log2(p_i))` over the distinct characters observed.
/// The empty string has zero entropy.
pub fn shannon_entropy(s: &str) -> f64 {
    let total = s.chars().count();
    if total == 0 {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let total = total as f64;
    -counts
        .values()
        .map(|&count| {
            let p = count as f64 / total;
            p * p.log2()
        })
        .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_uniform() {
        assert_eq!(shannon_entropy(""), 0.0);
        assert_eq!(shannon_entropy("aaaa"), 0.0);
    }

    #[test]
    fn test_two_symbols() {
        // Even split over two symbols is exactly one bit
        let h = shannon_entropy("abab");
        assert!((h - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_dictionary_word_is_low() {
        assert!(shannon_entropy("minecraft") < 3.8);
        assert!(shannon_entropy("password") < 3.8);
    }

    #[test]
    fn test_random_string_is_high() {
        // 12 distinct characters: log2(12) ~ 3.58; mixed-class strings
        // with no repeats push past the threshold at higher lengths
        let h = shannon_entropy("aK9!mZ2@pQ7#bX4$");
        assert!(h > 3.8, "got {}", h);
    }
}
