//! Douane Storage Layer
//!
//! Implements the `RunStore` trait on SQLite and the `DocumentStore` trait on
//! the local filesystem.
//!
//! # Architecture
//!
//! - SQLite for runs, tariff rows, HS code mentions, notes and legal chunks
//! - Run stats and inheritance context as JSON columns
//! - Embeddings as little-endian `f32` blobs
//!
//! # Examples
//!
//! ```no_run
//! use douane_store::SqliteStore;
//!
//! let store = SqliteStore::new(":memory:").unwrap();
//! // Store is now ready for run operations
//! ```

#![warn(missing_docs)]

pub mod blob;
pub mod embedding;

pub use blob::FsDocumentStore;

use douane_domain::traits::{BatchCommit, RunStore};
use douane_domain::{
    BatchStats, ExtractedNote, ExtractionRun, HsCodeEntry, HsLevel, LegalChunk, NoteType, RunId,
    RunKind, RunStatus, TariffLine,
};
use embedding::{bytes_to_embedding, embedding_to_bytes};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::InvalidData(e.to_string())
    }
}

fn conversion_error(column: usize, e: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

const RUN_COLUMNS: &str = "id, pdf_id, kind, status, current_page, total_pages, processed_pages, \
                           stats, carry, created_at, updated_at, completed_at";

/// SQLite-based implementation of RunStore
///
/// # Thread Safety
///
/// SQLite connections are not thread-safe. Share a store between tasks by
/// wrapping it in `Arc<Mutex<_>>`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Create a new SqliteStore with the given database path
    ///
    /// Use `:memory:` for an in-memory database (useful for testing).
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use douane_store::SqliteStore;
    ///
    /// let store = SqliteStore::new("douane.db").unwrap();
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&mut self) -> Result<(), StoreError> {
        let schema = include_str!("schema.sql");
        self.conn.execute_batch(schema)?;
        Ok(())
    }

    fn row_to_run(row: &Row<'_>) -> rusqlite::Result<ExtractionRun> {
        let id: String = row.get(0)?;
        let id = RunId::from_string(&id)
            .map_err(|e| conversion_error(0, StoreError::InvalidData(e)))?;

        let kind: String = row.get(2)?;
        let kind = RunKind::parse(&kind).ok_or_else(|| {
            conversion_error(2, StoreError::InvalidData(format!("Unknown run kind: {}", kind)))
        })?;

        let status: String = row.get(3)?;
        let status = RunStatus::parse(&status).ok_or_else(|| {
            conversion_error(3, StoreError::InvalidData(format!("Unknown run status: {}", status)))
        })?;

        let stats: String = row.get(7)?;
        let stats = serde_json::from_str(&stats).map_err(|e| conversion_error(7, e.into()))?;

        let carry: Option<String> = row.get(8)?;
        let carry = carry
            .map(|c| serde_json::from_str(&c))
            .transpose()
            .map_err(|e| conversion_error(8, e.into()))?;

        Ok(ExtractionRun {
            id,
            pdf_id: row.get(1)?,
            kind,
            status,
            current_page: row.get(4)?,
            total_pages: row.get(5)?,
            processed_pages: row.get(6)?,
            stats,
            carry,
            created_at: row.get::<_, i64>(9)? as u64,
            updated_at: row.get::<_, i64>(10)? as u64,
            completed_at: row.get::<_, Option<i64>>(11)?.map(|t| t as u64),
        })
    }

    /// All runs of a document, newest first
    pub fn runs_for_document(&self, pdf_id: &str) -> Result<Vec<ExtractionRun>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM extraction_runs WHERE pdf_id = ?1 ORDER BY created_at DESC, id DESC",
            RUN_COLUMNS
        ))?;
        let runs = stmt
            .query_map(params![pdf_id], Self::row_to_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    /// Tariff rows stored for a document, in page order
    pub fn tariff_lines_for_document(&self, pdf_id: &str) -> Result<Vec<TariffLine>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT national_code, hs_code_6, description, duty_rate, duty_note, unit_norm,
                    unit_comp, is_inherited, page_number, evidence
             FROM tariff_lines WHERE pdf_id = ?1 ORDER BY page_number, id",
        )?;
        let lines = stmt
            .query_map(params![pdf_id], |row| {
                Ok(TariffLine {
                    national_code: row.get(0)?,
                    hs_code_6: row.get(1)?,
                    description: row.get(2)?,
                    duty_rate: row.get(3)?,
                    duty_note: row.get(4)?,
                    unit_norm: row.get(5)?,
                    unit_comp: row.get(6)?,
                    is_inherited: row.get(7)?,
                    page_number: row.get(8)?,
                    evidence: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    /// HS code mentions stored for a document
    pub fn hs_codes_for_document(&self, pdf_id: &str) -> Result<Vec<HsCodeEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT code, code_clean, description, level, page_number
             FROM hs_codes WHERE pdf_id = ?1 ORDER BY code_clean",
        )?;
        let codes = stmt
            .query_map(params![pdf_id], |row| {
                let level: String = row.get(3)?;
                let level = HsLevel::parse(&level).ok_or_else(|| {
                    conversion_error(3, StoreError::InvalidData(format!("Unknown level: {}", level)))
                })?;
                Ok(HsCodeEntry {
                    code: row.get(0)?,
                    code_clean: row.get(1)?,
                    description: row.get(2)?,
                    level,
                    page_number: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(codes)
    }

    /// Notes stored for a document
    pub fn notes_for_document(&self, pdf_id: &str) -> Result<Vec<ExtractedNote>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT note_type, anchor, note_text, page_number
             FROM tariff_notes WHERE pdf_id = ?1 ORDER BY page_number, id",
        )?;
        let notes = stmt
            .query_map(params![pdf_id], |row| {
                let note_type: String = row.get(0)?;
                Ok(ExtractedNote {
                    note_type: NoteType::parse(&note_type).unwrap_or(NoteType::Remark),
                    anchor: row.get(1)?,
                    note_text: row.get(2)?,
                    page_number: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    /// Legal chunks stored for a document, in page order
    pub fn legal_chunks_for_document(&self, pdf_id: &str) -> Result<Vec<LegalChunk>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT pdf_id, page_number, chunk_index, content, embedding, detected_codes
             FROM legal_chunks WHERE pdf_id = ?1 ORDER BY page_number, chunk_index",
        )?;
        let chunks = stmt
            .query_map(params![pdf_id], |row| {
                let blob: Vec<u8> = row.get(4)?;
                let embedding = bytes_to_embedding(&blob).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Blob,
                        Box::new(e),
                    )
                })?;
                let codes: String = row.get(5)?;
                let detected_codes =
                    serde_json::from_str(&codes).map_err(|e| conversion_error(5, e.into()))?;
                Ok(LegalChunk {
                    pdf_id: row.get(0)?,
                    page_number: row.get(1)?,
                    chunk_index: row.get(2)?,
                    content: row.get(3)?,
                    embedding,
                    detected_codes,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }
}

fn write_run(conn: &Connection, run: &ExtractionRun) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE extraction_runs SET status = ?2, current_page = ?3, total_pages = ?4,
                processed_pages = ?5, stats = ?6, carry = ?7, updated_at = ?8, completed_at = ?9
         WHERE id = ?1",
        params![
            run.id.to_string(),
            run.status.as_str(),
            run.current_page,
            run.total_pages,
            run.processed_pages,
            serde_json::to_string(&run.stats)?,
            run.carry.as_ref().map(serde_json::to_string).transpose()?,
            run.updated_at as i64,
            run.completed_at.map(|t| t as i64),
        ],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(run.id.to_string()));
    }
    Ok(())
}

fn write_tariff_lines(
    conn: &Connection,
    pdf_id: &str,
    lines: &[TariffLine],
) -> Result<u32, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO tariff_lines (pdf_id, national_code, hs_code_6, description, duty_rate,
                duty_note, unit_norm, unit_comp, is_inherited, page_number, evidence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;
    for line in lines {
        stmt.execute(params![
            pdf_id,
            &line.national_code,
            &line.hs_code_6,
            &line.description,
            line.duty_rate,
            &line.duty_note,
            &line.unit_norm,
            &line.unit_comp,
            line.is_inherited,
            line.page_number,
            &line.evidence,
        ])?;
    }
    Ok(lines.len() as u32)
}

fn write_hs_codes(conn: &Connection, pdf_id: &str, codes: &[HsCodeEntry]) -> Result<u32, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO hs_codes (pdf_id, code, code_clean, description, level, page_number)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut inserted = 0;
    for code in codes {
        inserted += stmt.execute(params![
            pdf_id,
            &code.code,
            &code.code_clean,
            &code.description,
            code.level.as_str(),
            code.page_number,
        ])?;
    }
    Ok(inserted as u32)
}

fn write_notes(conn: &Connection, pdf_id: &str, notes: &[ExtractedNote]) -> Result<u32, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO tariff_notes (pdf_id, note_type, anchor, note_text, page_number)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for note in notes {
        stmt.execute(params![
            pdf_id,
            note.note_type.as_str(),
            &note.anchor,
            &note.note_text,
            note.page_number,
        ])?;
    }
    Ok(notes.len() as u32)
}

fn write_legal_chunks(conn: &Connection, chunks: &[LegalChunk]) -> Result<u32, StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO legal_chunks (pdf_id, page_number, chunk_index, content, embedding, detected_codes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for chunk in chunks {
        stmt.execute(params![
            &chunk.pdf_id,
            chunk.page_number,
            chunk.chunk_index,
            &chunk.content,
            embedding_to_bytes(&chunk.embedding),
            serde_json::to_string(&chunk.detected_codes)?,
        ])?;
    }
    Ok(chunks.len() as u32)
}

impl RunStore for SqliteStore {
    type Error = StoreError;

    fn create_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error> {
        self.conn.execute(
            &format!(
                "INSERT INTO extraction_runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                RUN_COLUMNS
            ),
            params![
                run.id.to_string(),
                &run.pdf_id,
                run.kind.as_str(),
                run.status.as_str(),
                run.current_page,
                run.total_pages,
                run.processed_pages,
                serde_json::to_string(&run.stats)?,
                run.carry.as_ref().map(serde_json::to_string).transpose()?,
                run.created_at as i64,
                run.updated_at as i64,
                run.completed_at.map(|t| t as i64),
            ],
        )?;
        debug!(run_id = %run.id, "run created");
        Ok(())
    }

    fn get_run(&self, id: RunId) -> Result<Option<ExtractionRun>, Self::Error> {
        let run = self
            .conn
            .query_row(
                &format!("SELECT {} FROM extraction_runs WHERE id = ?1", RUN_COLUMNS),
                params![id.to_string()],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn save_run(&mut self, run: &ExtractionRun) -> Result<(), Self::Error> {
        write_run(&self.conn, run)
    }

    fn set_run_status(&mut self, id: RunId, status: RunStatus) -> Result<bool, Self::Error> {
        let Some(mut run) = self.get_run(id)? else {
            return Ok(false);
        };
        run.mark(status);
        self.save_run(&run)?;
        Ok(true)
    }

    fn latest_run_for_document(
        &self,
        pdf_id: &str,
        kind: RunKind,
    ) -> Result<Option<ExtractionRun>, Self::Error> {
        let run = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM extraction_runs WHERE pdf_id = ?1 AND kind = ?2
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    RUN_COLUMNS
                ),
                params![pdf_id, kind.as_str()],
                Self::row_to_run,
            )
            .optional()?;
        Ok(run)
    }

    fn commit_batch(
        &mut self,
        run: &mut ExtractionRun,
        batch: BatchCommit<'_>,
    ) -> Result<BatchStats, Self::Error> {
        let mut stats = batch.stats;
        let mut updated = run.clone();

        // Dropping the transaction without commit rolls every write back
        let tx = self.conn.transaction()?;
        stats.tariff_lines_inserted += write_tariff_lines(&tx, &run.pdf_id, batch.tariff_lines)?;
        stats.hs_codes_inserted += write_hs_codes(&tx, &run.pdf_id, batch.hs_codes)?;
        stats.notes_inserted += write_notes(&tx, &run.pdf_id, batch.notes)?;
        stats.chunks_inserted += write_legal_chunks(&tx, batch.legal_chunks)?;
        updated
            .record_batch(batch.last_page, batch.pages_attempted, &stats)
            .map_err(StoreError::InvalidData)?;
        write_run(&tx, &updated)?;
        tx.commit()?;

        debug!(
            run_id = %updated.id,
            current_page = updated.current_page,
            items = stats.total_items(),
            "batch committed"
        );
        *run = updated;
        Ok(stats)
    }
}
