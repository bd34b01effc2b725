// Detection Patterns
// Compiled once per process; shared by the normalizer and the redactor.

use regex::Regex;
use std::sync::OnceLock;

/// Typed placeholders substituted for structured entities before model input.
pub const PLACEHOLDER_TOKENS: [&str; 7] = [
    "<MONEY>", "<TIME>", "<EMAIL>", "<PHONE>", "<PERCENT>", "<URL>", "<DATE>",
];

pub const MONEY_PLACEHOLDER: &str = "<MONEY>";

const LETTER: &str = "A-Za-zÀ-ÖØ-öø-ÿ";
const CURRENCY: &str = r"(?:€|eur|\$|usd|cad|chf|£)";

pub fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:(?:\+?\d{1,3}[\s.\-]?)?(?:\(?\d{2,4}\)?[\s.\-]?){2,5}\d{2,6})")
            .expect("phone regex")
    })
}

/// Symbol-before amounts. The match carries its leading whitespace (if any);
/// callers must check the trailing boundary themselves.
pub fn currency_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(?:^|\s){c}\s?\d+[.,]?\d*(?:\s?{c})?",
            c = CURRENCY
        ))
        .expect("currency regex")
    })
}

pub fn currency_trail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\d+[.,]?\d*\s?{}", CURRENCY)).expect("trailing currency regex")
    })
}

pub fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,3}(?:[.,]\d+)?\s?%").expect("percent regex"))
}

pub fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:[01]?\d|2[0-3])[:h][0-5]\d(?:\s?(?:am|pm))?\b").expect("time regex")
    })
}

pub fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:https?://|ftp://|www\.)[^\s)>"'<]{3,}"#).expect("url regex")
    })
}

/// Scheme-less domains such as `example.org/login`; used by redaction only.
pub fn bare_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:[a-z0-9](?:[a-z0-9\-]*[a-z0-9])?\.)+(?:com|org|net|edu|gov|io|co|fr|ca|uk|de|be|ch|info|biz|me|ly|xyz|app|dev)\b(?:/\S*)?",
        )
        .expect("bare domain regex")
    })
}

pub fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b").expect("email regex")
    })
}

pub fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)\b\d{4}[/-]\d{1,2}[/-]\d{1,2}\b",
            r"|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
            r"|\b\d{1,2}\s+(?:janv|févr|mars|avr|mai|juin|juil|août|sept|oct|nov|déc)[a-zéû]*\.?\s*(?:\d{4})?\b",
            r"|\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t)?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\s+\d{1,2}(?:,\s*\d{4})?\b",
        ))
        .expect("date regex")
    })
}

pub fn line_break_join_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"([{l}])\n+([{l}])", l = LETTER)).expect("line break join regex")
    })
}

/// Three or more isolated letters separated by whitespace.
pub fn spaced_letters_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(r"(?:\b[{l}]\b\s+){{2,}}\b[{l}]\b", l = LETTER))
            .expect("spaced letters regex")
    })
}

pub fn disallowed_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s<>\-.,]").expect("disallowed chars regex"))
}

pub fn long_digit_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{8,}").expect("digit run regex"))
}

pub fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}
