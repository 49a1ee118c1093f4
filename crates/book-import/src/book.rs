//! Persisted book records produced by a successful import.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{book_repo, Database, DatabaseError};

/// Review state of a freshly imported book. Imports always start unreviewed;
/// the approval workflow lives elsewhere.
pub const BOOK_STATUS_PENDING_REVIEW: &str = "pending_review";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// The assembled body of a book, 1:1 with [`Book`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookContent {
    pub book_id: String,
    pub full_content: String,
    pub chapter_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Read access to imported books for consumers of `result_book_id`.
#[derive(Clone)]
pub struct BookRepository {
    db: Database,
}

impl BookRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn find_book(&self, id: &str) -> Result<Option<Book>, DatabaseError> {
        book_repo::find_book(&self.db, id)
    }

    pub fn find_content(&self, book_id: &str) -> Result<Option<BookContent>, DatabaseError> {
        book_repo::find_content(&self.db, book_id)
    }
}
