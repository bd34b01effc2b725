// Text Normalization Service
// Canonicalizes extracted email text before vectorization.

use regex::{Captures, Regex};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

use super::config_store::TextConfig;
use super::patterns::{
    currency_re, currency_trail_re, date_re, disallowed_chars_re, email_re, line_break_join_re,
    long_digit_run_re, percent_re, phone_re, spaced_letters_re, time_re, url_re, whitespace_re,
    PLACEHOLDER_TOKENS,
};

/// Minimum digit count for a phone-shaped match to become `<PHONE>`
const MIN_PHONE_DIGITS: usize = 6;
/// Runs of one character at least this long collapse to a single instance
const MAX_CHAR_RUN: usize = 6;

/// Normalize Unicode to NFC so combining sequences equal their precomposed forms
pub fn normalize_unicode(text: &str) -> String {
    text.nfc().collect()
}

/// Reassemble words split across line breaks or spelled out letter by letter.
/// "pro\ngram" -> "program", "p r o g r a m m e" -> "programme".
pub fn join_fragmented_words(text: &str) -> String {
    let join_re = line_break_join_re();
    let mut s = text.to_string();
    // Adjacent matches share a letter ("a\nb\nc"), so repeat until stable.
    while join_re.is_match(&s) {
        s = join_re.replace_all(&s, "$1$2").into_owned();
    }

    merge_spaced_letters(&s)
}

/// Replace structured entities with typed placeholders, highest priority first
pub fn placeholder_substitutions(text: &str) -> String {
    let mut s = currency_re()
        .replace_all(text, |caps: &Captures| {
            let Some(m) = caps.get(0) else {
                return String::new();
            };
            // The amount must end at whitespace or end of text
            let followed_by_boundary = text[m.end()..]
                .chars()
                .next()
                .map_or(true, char::is_whitespace);
            if followed_by_boundary {
                " <MONEY> ".to_string()
            } else {
                m.as_str().to_string()
            }
        })
        .into_owned();

    s = substitute(currency_trail_re(), &s, " <MONEY> ");
    s = substitute(percent_re(), &s, " <PERCENT> ");
    s = substitute(time_re(), &s, " <TIME> ");
    s = substitute(url_re(), &s, " <URL> ");
    s = substitute(email_re(), &s, " <EMAIL> ");
    s = substitute(date_re(), &s, " <DATE> ");

    substitute_phones(&s)
}

/// Replace phone-shaped runs carrying at least `MIN_PHONE_DIGITS` digits
pub fn substitute_phones(text: &str) -> String {
    phone_re()
        .replace_all(text, |caps: &Captures| {
            let matched = &caps[0];
            let digits = matched.chars().filter(|c| c.is_ascii_digit()).count();
            if digits >= MIN_PHONE_DIGITS {
                " <PHONE> ".to_string()
            } else {
                matched.to_string()
            }
        })
        .into_owned()
}

fn merge_spaced_letters(text: &str) -> String {
    spaced_letters_re()
        .replace_all(text, |caps: &Captures| caps[0].split_whitespace().collect::<String>())
        .into_owned()
}

fn substitute(re: &Regex, text: &str, placeholder: &str) -> String {
    re.replace_all(text, placeholder).into_owned()
}

/// Collapse any character repeated `MAX_CHAR_RUN` or more times to one instance
pub fn collapse_char_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        let mut run = 1;
        while chars.peek() == Some(&ch) {
            chars.next();
            run += 1;
        }
        let keep = if run >= MAX_CHAR_RUN && ch != '\n' { 1 } else { run };
        out.extend(std::iter::repeat(ch).take(keep));
    }
    out
}

/// Text normalizer configured with banner patterns, stopwords and the
/// single-letter whitelist. Cheap to share; holds no per-request state.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    banner_patterns: Vec<Regex>,
    single_letter_whitelist: HashSet<String>,
    stopwords: HashSet<String>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        // Built-in patterns are constant and known to compile.
        Self::from_config(&TextConfig::default()).expect("default banner patterns")
    }
}

impl TextNormalizer {
    pub fn from_config(config: &TextConfig) -> Result<Self, regex::Error> {
        let banner_patterns = config
            .banner_patterns
            .iter()
            .map(|p| Regex::new(&format!("(?i){}", p)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            banner_patterns,
            single_letter_whitelist: config.single_letter_whitelist.iter().cloned().collect(),
            stopwords: config.stopwords.iter().map(|s| s.to_lowercase()).collect(),
        })
    }

    /// Remove a leading disclaimer banner; text without one is returned unchanged
    pub fn strip_banners(&self, text: &str) -> String {
        for pattern in &self.banner_patterns {
            if let Some(m) = pattern.find(text) {
                if m.start() == 0 {
                    return text[m.end()..].trim_start().to_string();
                }
            }
        }
        text.to_string()
    }

    /// Filter out stray single-character tokens unless whitelisted
    pub fn remove_isolated_letters<'a>(&self, tokens: Vec<&'a str>) -> Vec<&'a str> {
        tokens
            .into_iter()
            .filter(|t| t.chars().count() != 1 || self.single_letter_whitelist.contains(*t))
            .collect()
    }

    /// Full normalization pipeline. Pure: identical input gives identical output.
    pub fn clean(&self, raw: &str) -> String {
        let decoded = html_escape::decode_html_entities(raw);
        let s = normalize_unicode(&decoded);
        let s = join_fragmented_words(&s);
        let s = placeholder_substitutions(&s);

        let mut s = s.to_lowercase();
        for placeholder in PLACEHOLDER_TOKENS {
            s = s.replace(&placeholder.to_lowercase(), placeholder);
        }

        // Stripping separators can expose new phone numbers and spelled-out words
        let s = disallowed_chars_re().replace_all(&s, " ");
        let s = merge_spaced_letters(&s);
        let s = substitute_phones(&s);
        let s = long_digit_run_re().replace_all(&s, " ");
        let s = collapse_char_runs(&s);
        let s = whitespace_re().replace_all(&s, " ");

        self.filter_tokens(&s)
    }

    /// Drop stopwords and stray letters. Removing a token can leave whitelisted
    /// letters adjacent ("a 1 e 2 i"), so merge and filter again until stable.
    fn filter_tokens(&self, text: &str) -> String {
        let mut current = text.to_string();
        loop {
            let tokens: Vec<&str> = current
                .split_whitespace()
                .filter(|t| !self.stopwords.contains(*t))
                .collect();
            let filtered = self.remove_isolated_letters(tokens).join(" ");
            let merged = merge_spaced_letters(&filtered);
            if merged == filtered {
                return filtered;
            }
            current = merged;
        }
    }
}
