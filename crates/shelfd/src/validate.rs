//! Title URL validation
//!
//! Requests enter the registry only after passing this predicate; the core
//! never re-checks syntax.

const TITLE_PREFIX: &str = "https://mangadex.org/title/";

/// Whether `input` is a well-formed title URL.
///
/// Only `https` is accepted. The title identifier is the path segment after
/// `/title/`, restricted to ASCII alphanumerics and dashes; an optional query
/// string is ignored.
#[must_use]
pub fn is_title_url(input: &str) -> bool {
    let Some(rest) = input.strip_prefix(TITLE_PREFIX) else {
        return false;
    };
    let id = rest.split('?').next().unwrap_or(rest);
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_title_urls() {
        assert!(is_title_url("https://mangadex.org/title/abc-123"));
        assert!(is_title_url(
            "https://mangadex.org/title/12345678-1234-1234-1234-123456789abc"
        ));
        assert!(is_title_url("https://mangadex.org/title/abc-123?tab=chapters"));
    }

    #[test]
    fn rejects_other_urls() {
        assert!(!is_title_url(""));
        assert!(!is_title_url("https://example.com/title/abc-123"));
        assert!(!is_title_url("https://mangadex.org/chapter/abc-123"));
        assert!(!is_title_url("mangadex.org/title/abc-123"));
        assert!(!is_title_url("http://mangadex.org/title/abc-123"));
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(!is_title_url("https://mangadex.org/title/../../../etc/passwd"));
    }
}
