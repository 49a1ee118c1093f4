//! Turns a parsed document plus uploaded asset URLs into a stored book.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use crate::book::{Book, BookContent, BOOK_STATUS_PENDING_REVIEW};
use crate::db::{book_repo, Database, DatabaseError};
use crate::document::ParsedDocument;
use crate::parser::xhtml::escape_text;
use crate::retry::RetryPolicy;

/// Precedes every chapter in `full_content`.
pub const CHAPTER_SEPARATOR: &str = "<!-- chapter-break -->\n";

/// Stands in for images that were never uploaded.
pub const IMAGE_PLACEHOLDER: &str = "about:blank#image-unavailable";

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBook {
    pub book: Book,
    pub content: BookContent,
}

/// Replaces every quoted attribute value equal to an image reference.
///
/// Uploaded references get their durable URL; references that were dropped
/// or never resolved get [`IMAGE_PLACEHOLDER`].
pub fn rewrite_references(
    chapter: &str,
    doc: &ParsedDocument,
    urls: &HashMap<String, String>,
) -> String {
    let mut html = chapter.to_string();

    let references = doc
        .images
        .iter()
        .map(|img| img.original_reference.as_str())
        .chain(doc.unresolved_references.iter().map(String::as_str));

    for reference in references {
        let target = urls
            .get(reference)
            .map(String::as_str)
            .unwrap_or(IMAGE_PLACEHOLDER);
        let escaped_ref = escape_text(reference);
        let escaped_target = escape_text(target);
        for quote in ['"', '\''] {
            let needle = format!("={quote}{escaped_ref}{quote}");
            if html.contains(&needle) {
                html = html.replace(&needle, &format!("={quote}{escaped_target}{quote}"));
            }
        }
    }

    html
}

/// Builds the book records. Nothing is persisted here.
pub fn assemble(
    doc: &ParsedDocument,
    urls: &HashMap<String, String>,
    book_id: &str,
    author_id: &str,
) -> AssembledBook {
    let mut full_content = String::new();
    for chapter in &doc.chapters {
        full_content.push_str(CHAPTER_SEPARATOR);
        full_content.push_str(&rewrite_references(chapter, doc, urls));
        full_content.push('\n');
    }

    let now = Utc::now();
    AssembledBook {
        book: Book {
            id: book_id.to_string(),
            title: doc.title.clone(),
            author_id: author_id.to_string(),
            description: doc.description.clone(),
            status: BOOK_STATUS_PENDING_REVIEW.to_string(),
            created_at: now,
        },
        content: BookContent {
            book_id: book_id.to_string(),
            full_content,
            chapter_count: doc.chapters.len() as u32,
            created_at: now,
        },
    }
}

/// Stores book and content in one transaction, retrying busy/locked errors.
pub async fn persist(
    db: &Database,
    assembled: &AssembledBook,
    policy: RetryPolicy,
) -> Result<(), DatabaseError> {
    policy
        .run(
            "persist book",
            move || async move {
                book_repo::insert_with_content(db, &assembled.book, &assembled.content)
            },
            DatabaseError::is_transient,
        )
        .await?;
    debug!(book_id = %assembled.book.id, "Book record stored");
    Ok(())
}
