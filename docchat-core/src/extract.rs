//! PDF text extraction.
//!
//! Pages are read in document order and joined with a single space; layout
//! (paragraphs, columns) is not preserved.

use lopdf::Document;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Not a readable PDF: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("PDF is encrypted")]
    Encrypted,

    #[error("PDF has no pages")]
    NoPages,

    #[error("PDF has no extractable text")]
    NoText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub page_count: u32,
}

/// Join per-page text in order with single-space separators.
pub fn join_pages<S: AsRef<str>>(pages: &[S]) -> String {
    pages
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract the text of every page of the PDF in `bytes`.
///
/// A page whose text cannot be decoded contributes an empty string; the
/// document fails only when no page yields any text.
pub fn extract_text(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let doc = Document::load_mem(bytes)?;
    if doc.is_encrypted() {
        return Err(ExtractError::Encrypted);
    }

    let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    if page_numbers.is_empty() {
        return Err(ExtractError::NoPages);
    }

    let pages: Vec<String> = page_numbers
        .iter()
        .map(|&n| match doc.extract_text(&[n]) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(page = n, error = %e, "Failed to extract page text, skipping");
                String::new()
            }
        })
        .collect();

    let text = join_pages(&pages);
    if text.trim().is_empty() {
        return Err(ExtractError::NoText);
    }

    Ok(ExtractedText {
        text,
        page_count: page_numbers.len() as u32,
    })
}
