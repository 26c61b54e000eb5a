//! Input validation for record identifiers and URLs.
//!
//! Identifiers come from a remote feed and end up in file names, so they are
//! reduced to a conservative character set before touching the filesystem.

use thiserror::Error;

/// Validation error types
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

/// Reduce a record id to a file-name-safe stem
///
/// Bytes outside `[A-Za-z0-9.-]` are written as `_XX` in upper-case hex, so
/// `math.GT/0104020v1` becomes `math.GT_2F0104020v1` and distinct ids never
/// share a stem. A stem made only of dots would still name a directory, so
/// those dots are escaped too.
pub fn safe_file_stem(id: &str) -> Result<String, ValidationError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ValidationError::InvalidId("empty id".to_string()));
    }

    let only_dots = id.bytes().all(|b| b == b'.');
    let mut stem = String::with_capacity(id.len());
    for byte in id.bytes() {
        if (byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.') && !only_dots {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }

    Ok(stem)
}

/// Validate that a URL parses and uses an HTTP scheme
pub fn validate_url(url: &str) -> Result<url::Url, ValidationError> {
    let url = url.trim();

    if url.is_empty() {
        return Err(ValidationError::InvalidUrl("empty URL".to_string()));
    }

    let parsed = url::Url::parse(url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ValidationError::InvalidUrl(format!("invalid scheme: {}", other))),
    }
}

/// Rewrite a plain-HTTP URL to HTTPS, leaving anything else untouched
pub fn upgrade_to_https(url: &str) -> String {
    match url.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_file_stem() {
        assert_eq!(safe_file_stem("2301.12345v1").unwrap(), "2301.12345v1");
        assert_eq!(
            safe_file_stem("math.GT/0104020v1").unwrap(),
            "math.GT_2F0104020v1"
        );
        assert_eq!(safe_file_stem("a b:c").unwrap(), "a_20b_3Ac");
        assert_eq!(safe_file_stem("..").unwrap(), "_2E_2E");
        assert_eq!(safe_file_stem("é").unwrap(), "_C3_A9");
    }

    #[test]
    fn test_safe_file_stem_keeps_ids_apart() {
        let ids = ["a/b", "a_b", "a_2Fb", "a:b", "a b"];
        let stems: std::collections::HashSet<String> =
            ids.iter().map(|id| safe_file_stem(id).unwrap()).collect();
        assert_eq!(stems.len(), ids.len());
        assert_eq!(safe_file_stem("a/b").unwrap(), "a_2Fb");
        assert_eq!(safe_file_stem("a_b").unwrap(), "a_5Fb");
    }

    #[test]
    fn test_safe_file_stem_rejects_empty() {
        assert!(safe_file_stem("").is_err());
        assert!(safe_file_stem("   ").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://export.arxiv.org/api/query").is_ok());
        assert!(validate_url("http://localhost:1234/").is_ok());
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_upgrade_to_https() {
        assert_eq!(
            upgrade_to_https("http://arxiv.org/pdf/2301.12345v1"),
            "https://arxiv.org/pdf/2301.12345v1"
        );
        assert_eq!(
            upgrade_to_https("https://arxiv.org/pdf/1"),
            "https://arxiv.org/pdf/1"
        );
    }
}
