//! Origin URL construction from the configured template.

use tabsync_core::TabKey;
use tabsync_core::config::{DOCUMENT_PLACEHOLDER, TAB_PLACEHOLDER};

/// Characters that would change the URL's structure if substituted verbatim.
const RESERVED: &[char] = &['/', '?', '#', '&', '=', '%'];

/// Error type for origin URL construction failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty identifier")]
    Empty,

    #[error("identifier {0:?} contains reserved URL characters")]
    Reserved(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Build the export URL for one tab.
///
/// Steps:
/// 1. Reject empty identifiers and identifiers with reserved characters
/// 2. Substitute `{document}` and `{tab}`
/// 3. Parse, requiring an http(s) scheme
/// 4. Drop any fragment
pub fn origin_url(template: &str, key: &TabKey) -> Result<url::Url, UrlError> {
    for id in [&key.document_id, &key.tab_id] {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }
        if trimmed.contains(RESERVED) {
            return Err(UrlError::Reserved(id.clone()));
        }
    }

    let url_str = template
        .trim()
        .replace(DOCUMENT_PLACEHOLDER, key.document_id.trim())
        .replace(TAB_PLACEHOLDER, key.tab_id.trim());

    let mut parsed = url::Url::parse(&url_str).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    parsed.set_fragment(None);

    Ok(parsed)
}
