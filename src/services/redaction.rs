// Contact Redaction
// Erases PII before language detection and logging. Unlike placeholder
// substitution, nothing of the erased entity survives.

use super::patterns::{bare_domain_re, email_re, phone_re, url_re, whitespace_re};

/// Strip emails, phone numbers and URLs/bare domains, in that order,
/// then collapse whitespace.
pub fn redact_contacts(text: &str) -> String {
    let s = email_re().replace_all(text, " ");
    let s = phone_re().replace_all(&s, " ");
    let s = url_re().replace_all(&s, " ");
    let s = bare_domain_re().replace_all(&s, " ");
    whitespace_re().replace_all(&s, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_contacts() {
        let inp = "Email: test.user@example.com Phone: +1-800-123-4567 Site: www.example.org/page";
        let out = redact_contacts(inp);
        assert!(!out.contains("test.user"));
        assert!(!out.contains("800"));
        assert!(!out.contains("example.org"));
        assert!(out.starts_with("Email: Phone: Site:"));
    }

    #[test]
    fn test_redacts_bare_domains() {
        let out = redact_contacts("log in at secure-paypal.com/verify today");
        assert_eq!(out, "log in at today");
    }

    #[test]
    fn test_leaves_plain_text_untouched() {
        let text = "Your parcel is waiting. Confirm delivery.";
        assert_eq!(redact_contacts(text), text);
    }
}
