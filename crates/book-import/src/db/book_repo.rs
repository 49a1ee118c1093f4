//! Book repository: `books` and `book_contents` tables.
//!
//! A book and its content are only ever written together, inside one
//! transaction, so readers never observe a book without its body.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::book::{Book, BookContent};

fn parse_timestamp(id: &str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            id: id.to_string(),
            reason: format!("invalid timestamp '{}': {}", s, e),
        })
}

/// Inserts a book and its content atomically.
pub fn insert_with_content(
    db: &Database,
    book: &Book,
    content: &BookContent,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO books (id, title, author_id, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                book.id,
                book.title,
                book.author_id,
                book.description,
                book.status,
                book.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute(
            "INSERT INTO book_contents (book_id, full_content, chapter_count, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                content.book_id,
                content.full_content,
                content.chapter_count,
                content.created_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(())
    })
}

/// Finds a book by id. Only books with a committed content row exist.
pub fn find_book(db: &Database, id: &str) -> Result<Option<Book>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT b.id, b.title, b.author_id, b.description, b.status, b.created_at
                 FROM books b JOIN book_contents c ON c.book_id = b.id
                 WHERE b.id = ?1",
                params![id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, Option<String>>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    })?;

    row.map(|(id, title, author_id, description, status, created_at)| {
        let created_at = parse_timestamp(&id, &created_at)?;
        Ok(Book {
            id,
            title,
            author_id,
            description,
            status,
            created_at,
        })
    })
    .transpose()
}

/// Finds the assembled content for a book.
pub fn find_content(db: &Database, book_id: &str) -> Result<Option<BookContent>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT book_id, full_content, chapter_count, created_at
                 FROM book_contents WHERE book_id = ?1",
                params![book_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, u32>(2)?,
                        r.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    })?;

    row.map(|(book_id, full_content, chapter_count, created_at)| {
        let created_at = parse_timestamp(&book_id, &created_at)?;
        Ok(BookContent {
            book_id,
            full_content,
            chapter_count,
            created_at,
        })
    })
    .transpose()
}

/// Removes a book and its content. Returns whether a book row existed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM book_contents WHERE book_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM books WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    })
}
