//! Page extraction collaborators.
//!
//! Raw document parsing (PDF and friends) is an external concern; the
//! pipeline only needs per-page text. [`PlainTextExtractor`] handles `.txt`
//! files with form-feed page separators, which is what the bundled manual
//! fetcher produces. Other formats plug in through [`PageExtractor`].

use std::path::Path;
use thiserror::Error;

/// Errors raised while reading raw document pages.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document could not be opened or read at all.
    #[error("failed to read document {path}: {source}")]
    Unreadable {
        /// Path of the offending document.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Yields the raw text of each page of a document, in ascending page order.
pub trait PageExtractor: Send + Sync {
    /// Extract page texts for the document at `path`.
    ///
    /// A page that cannot be decoded should be returned as an empty string so
    /// the pipeline can skip and count it; failing to read the document at
    /// all is an [`ExtractionError`] and fatal to that document only.
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Extractor for plain-text documents with form-feed (`\x0c`) page breaks.
///
/// A file without any form feed is treated as a single page.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractionError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ExtractionError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Ok(raw.split('\u{c}').map(|page| page.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn splits_pages_on_form_feed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("manual.txt");
        let mut file = std::fs::File::create(&path).expect("create");
        write!(file, "page one.\u{c}page two.\u{c}page three.").expect("write");

        let pages = PlainTextExtractor.extract_pages(&path).expect("pages");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1], "page two.");
    }

    #[test]
    fn file_without_breaks_is_one_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("single.txt");
        std::fs::write(&path, "just one page.").expect("write");

        let pages = PlainTextExtractor.extract_pages(&path).expect("pages");
        assert_eq!(pages, vec!["just one page.".to_string()]);
    }

    #[test]
    fn missing_file_is_unreadable() {
        let error = PlainTextExtractor
            .extract_pages(Path::new("/nonexistent/book.txt"))
            .expect_err("should fail");
        assert!(matches!(error, ExtractionError::Unreadable { .. }));
    }
}
