//! Job repository: CRUD operations for the `import_jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub import_type: String,
    pub status: String,
    pub progress_percentage: u8,
    pub current_step: String,
    pub author_id: String,
    pub source_name: String,
    pub result_book_id: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    /// JSON array of warning objects.
    pub warnings: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            import_type: row.get("import_type")?,
            status: row.get("status")?,
            progress_percentage: row.get("progress_percentage")?,
            current_step: row.get("current_step")?,
            author_id: row.get("author_id")?,
            source_name: row.get("source_name")?,
            result_book_id: row.get("result_book_id")?,
            error_code: row.get("error_code")?,
            error_message: row.get("error_message")?,
            warnings: row.get("warnings")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub author_id: Option<String>,
    pub status: Option<String>,
    pub import_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO import_jobs (id, import_type, status, progress_percentage, current_step,
             author_id, source_name, result_book_id, error_code, error_message, warnings,
             created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                job.id,
                job.import_type,
                job.status,
                job.progress_percentage,
                job.current_step,
                job.author_id,
                job.source_name,
                job.result_book_id,
                job.error_code,
                job.error_message,
                job.warnings,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Updates the mutable columns of an existing job row. `id`, `import_type`,
/// `author_id`, `source_name` and `created_at` are immutable.
///
/// Returns `false` when no row with that id exists.
pub fn update(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE import_jobs SET status=?2, progress_percentage=?3, current_step=?4,
             result_book_id=?5, error_code=?6, error_message=?7, warnings=?8,
             updated_at=?9, completed_at=?10
             WHERE id=?1",
            params![
                job.id,
                job.status,
                job.progress_percentage,
                job.current_step,
                job.result_book_id,
                job.error_code,
                job.error_message,
                job.warnings,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM import_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count). Newest first.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref author_id) = filter.author_id {
            conditions.push(format!("author_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(author_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref import_type) = filter.import_type {
            conditions.push(format!("import_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(import_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM import_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM import_jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}
