//! Composite cache key naming one tab of one remote document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::Error;

/// Published document ids: alphanumeric with dashes and underscores.
static DOCUMENT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{10,100}$").expect("document id pattern is valid"));

/// Tab ids are numeric.
static TAB_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{1,20}$").expect("tab id pattern is valid"));

/// Identifies a single tab within a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabKey {
    pub document_id: String,
    pub tab_id: String,
}

impl TabKey {
    /// Build a key without validating the identifiers.
    pub fn new(document_id: impl Into<String>, tab_id: impl Into<String>) -> Self {
        Self { document_id: document_id.into(), tab_id: tab_id.into() }
    }

    /// Build a key, rejecting identifiers the origin would never accept.
    pub fn validated(document_id: &str, tab_id: &str) -> Result<Self, Error> {
        if !DOCUMENT_ID.is_match(document_id) {
            return Err(Error::InvalidSource(format!(
                "document id {document_id:?} must be 10-100 characters of [A-Za-z0-9_-]"
            )));
        }
        if !TAB_ID.is_match(tab_id) {
            return Err(Error::InvalidSource(format!("tab id {tab_id:?} must be numeric")));
        }
        Ok(Self::new(document_id, tab_id))
    }

    /// Parse a `document:tab` reference.
    pub fn parse(source: &str) -> Result<Self, Error> {
        let (document_id, tab_id) = source
            .trim()
            .split_once(':')
            .ok_or_else(|| Error::InvalidSource(format!("{source:?} is not in document:tab form")))?;
        Self::validated(document_id, tab_id)
    }
}

impl fmt::Display for TabKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document_id, self.tab_id)
    }
}
