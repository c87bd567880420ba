//! Passages, document fingerprints and a small loader for already-extracted
//! document text.

#[cfg(test)]
mod tests;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

use crate::{QaError, Result};

const SHORT_FINGERPRINT_LEN: usize = 12;

/// Stable key identifying a document's content for index reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentFingerprint(String);

impl DocumentFingerprint {
    /// Fingerprint of passages that carry no page numbers
    #[inline]
    pub fn from_texts<'a, I>(texts: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self::from_passages(texts.into_iter().map(|text| (text, None)))
    }

    /// SHA-256 over each passage's text, NUL-terminated, followed by its page
    /// number. Same text on different pages is a different document.
    #[inline]
    pub fn from_passages<'a, I>(passages: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Option<u32>)>,
    {
        let mut hasher = Sha256::new();
        for (text, page) in passages {
            hasher.update(text.as_bytes());
            hasher.update([0_u8]);
            match page {
                Some(page) => {
                    hasher.update([1_u8]);
                    hasher.update(page.to_le_bytes());
                }
                None => hasher.update([0_u8]),
            }
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters of the fingerprint, used in passage identifiers.
    #[inline]
    pub fn short(&self) -> &str {
        self.0.get(..SHORT_FINGERPRINT_LEN).unwrap_or(&self.0)
    }
}

impl fmt::Display for DocumentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DocumentFingerprint {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassageId(String);

impl PassageId {
    #[inline]
    pub fn new(document: &DocumentFingerprint, ordinal: usize) -> Self {
        Self(format!("{}-{:04}", document.short(), ordinal))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PassageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PassageId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for PassageId {
    #[inline]
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Immutable unit of retrievable text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: PassageId,
    pub document: DocumentFingerprint,
    pub ordinal: usize,
    pub text: String,
    pub page: Option<u32>,
}

/// An ingested document: its fingerprint and ordered passages
#[derive(Debug, Clone)]
pub struct Document {
    pub source: String,
    pub fingerprint: DocumentFingerprint,
    pub passages: Vec<Passage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPassage {
    Plain(String),
    Detailed {
        text: String,
        #[serde(default)]
        page: Option<u32>,
    },
}

impl Document {
    /// Build a document from `(text, page)` pairs. Whitespace is collapsed and
    /// empty passages are dropped; a document without any text is rejected.
    #[inline]
    pub fn from_texts<I, S>(source: impl Into<String>, texts: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Option<u32>)>,
        S: AsRef<str>,
    {
        let source = source.into();
        let cleaned: Vec<(String, Option<u32>)> = texts
            .into_iter()
            .map(|(text, page)| (normalize_whitespace(text.as_ref()), page))
            .filter(|(text, _)| !text.is_empty())
            .collect();

        if cleaned.is_empty() {
            return Err(QaError::Ingestion(format!(
                "document '{}' contains no text",
                source
            )));
        }

        let fingerprint =
            DocumentFingerprint::from_passages(cleaned.iter().map(|(t, page)| (t.as_str(), *page)));
        let passages = cleaned
            .into_iter()
            .enumerate()
            .map(|(ordinal, (text, page))| Passage {
                id: PassageId::new(&fingerprint, ordinal),
                document: fingerprint.clone(),
                ordinal,
                text,
                page,
            })
            .collect::<Vec<_>>();

        debug!(
            "Document {} yielded {} passages ({})",
            source,
            passages.len(),
            fingerprint.short()
        );

        Ok(Self {
            source,
            fingerprint,
            passages,
        })
    }

    /// Load passages from disk. `.json` files hold an array of strings or of
    /// `{ "text", "page" }` objects; anything else is read as plain text where
    /// blank lines separate passages and form feeds separate pages.
    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let content = std::fs::read_to_string(path)
            .map_err(|e| QaError::Ingestion(format!("failed to read {}: {}", source, e)))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let document = if is_json {
            Self::from_json(source, &content)?
        } else {
            Self::from_plain_text(source, &content)?
        };

        info!(
            "Loaded {} passages from {}",
            document.passages.len(),
            document.source
        );
        Ok(document)
    }

    #[inline]
    pub fn from_json(source: impl Into<String>, content: &str) -> Result<Self> {
        let source = source.into();
        let raw: Vec<RawPassage> = serde_json::from_str(content).map_err(|e| {
            QaError::Ingestion(format!("invalid passage JSON in {}: {}", source, e))
        })?;

        Self::from_texts(
            source,
            raw.into_iter().map(|passage| match passage {
                RawPassage::Plain(text) => (text, None),
                RawPassage::Detailed { text, page } => (text, page),
            }),
        )
    }

    #[inline]
    pub fn from_plain_text(source: impl Into<String>, content: &str) -> Result<Self> {
        let mut paragraphs = Vec::new();

        for (page_index, page) in content.split('\u{c}').enumerate() {
            let page_number = u32::try_from(page_index + 1).ok();
            let mut current = Vec::new();

            for line in page.lines() {
                if line.trim().is_empty() {
                    if !current.is_empty() {
                        paragraphs.push((current.join(" "), page_number));
                        current.clear();
                    }
                } else {
                    current.push(line);
                }
            }

            if !current.is_empty() {
                paragraphs.push((current.join(" "), page_number));
            }
        }

        Self::from_texts(source, paragraphs)
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().join(" ")
}
