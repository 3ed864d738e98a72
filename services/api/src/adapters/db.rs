//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of
//! the store ports from the `core` crate. It handles all interactions with the
//! PostgreSQL database using `sqlx`.
//!
//! Every call is bounded by the configured store timeout; an expired call
//! surfaces as `PortError::Unavailable` and any transaction it belonged to is
//! rolled back when dropped.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use novel_pipeline_core::domain::{
    ApprovalStatus, Chapter, ChapterContext, ChapterListing, Chunk, ChunkWindow, NewChapter,
    NewChunk, Novel, ProgressEvent, ReadingHistory, Viewer, Volume,
};
use novel_pipeline_core::ports::{
    ChapterRepository, ChunkRepository, LockPolicy, PortError, PortResult,
    ReadingHistoryRepository, SessionResolver, StoreTransaction, Transactional,
};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every store port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
    timeout: Duration,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

/// Runs a store call under `limit`.
async fn timed<T, F>(limit: Duration, call: F) -> PortResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(map_sqlx_error),
        Err(_) => Err(PortError::Unavailable(format!(
            "store call exceeded {} ms",
            limit.as_millis()
        ))),
    }
}

/// Transient failures become `Unavailable`, unique violations `Conflict`.
fn map_sqlx_error(e: sqlx::Error) -> PortError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            PortError::Unavailable(e.to_string())
        }
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some("40001") | Some("40P01") => PortError::Unavailable(e.to_string()),
            Some("23505") => PortError::Conflict(e.to_string()),
            _ => PortError::Unexpected(e.to_string()),
        },
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

fn approval_status(code: &str) -> PortResult<ApprovalStatus> {
    ApprovalStatus::from_code(code)
        .ok_or_else(|| PortError::Unexpected(format!("unknown approval status '{code}'")))
}

#[derive(FromRow)]
struct NovelRecord {
    id: i64,
    slug: String,
    name: String,
    owner_id: Option<Uuid>,
    approval_status: String,
    deleted_at: Option<DateTime<Utc>>,
}
impl NovelRecord {
    fn to_domain(self) -> PortResult<Novel> {
        Ok(Novel {
            approval_status: approval_status(&self.approval_status)?,
            id: self.id,
            slug: self.slug,
            name: self.name,
            owner_id: self.owner_id,
            deleted_at: self.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct VolumeRecord {
    id: i64,
    novel_id: i64,
    name: String,
    position: i32,
}
impl VolumeRecord {
    fn to_domain(self) -> Volume {
        Volume {
            id: self.id,
            novel_id: self.novel_id,
            name: self.name,
            position: self.position,
        }
    }
}

#[derive(FromRow)]
struct ChapterRecord {
    id: i64,
    volume_id: i64,
    title: String,
    slug: String,
    position: i32,
    word_count: i32,
    approved: bool,
    is_hidden: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ChapterRecord {
    fn to_domain(self) -> Chapter {
        Chapter {
            id: self.id,
            volume_id: self.volume_id,
            title: self.title,
            slug: self.slug,
            position: self.position,
            word_count: self.word_count,
            approved: self.approved,
            is_hidden: self.is_hidden,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const CHAPTER_COLUMNS: &str = "id, volume_id, title, slug, position, word_count, approved, \
     is_hidden, deleted_at, created_at, updated_at";

/// A chapter joined with its volume and novel.
#[derive(FromRow)]
struct ChapterContextRecord {
    #[sqlx(flatten)]
    chapter: ChapterRecord,
    volume_name: String,
    volume_position: i32,
    novel_id: i64,
    novel_slug: String,
    novel_name: String,
    owner_id: Option<Uuid>,
    approval_status: String,
    novel_deleted_at: Option<DateTime<Utc>>,
}
impl ChapterContextRecord {
    fn to_domain(self) -> PortResult<ChapterContext> {
        let chapter = self.chapter.to_domain();
        Ok(ChapterContext {
            volume: Volume {
                id: chapter.volume_id,
                novel_id: self.novel_id,
                name: self.volume_name,
                position: self.volume_position,
            },
            novel: Novel {
                id: self.novel_id,
                slug: self.novel_slug,
                name: self.novel_name,
                owner_id: self.owner_id,
                approval_status: approval_status(&self.approval_status)?,
                deleted_at: self.novel_deleted_at,
            },
            chapter,
        })
    }
}

const CHAPTER_CONTEXT_SELECT: &str = "SELECT c.id, c.volume_id, c.title, c.slug, c.position, \
     c.word_count, c.approved, c.is_hidden, c.deleted_at, c.created_at, c.updated_at, \
     v.name AS volume_name, v.position AS volume_position, v.novel_id, \
     n.slug AS novel_slug, n.name AS novel_name, n.owner_id, n.approval_status, \
     n.deleted_at AS novel_deleted_at \
     FROM chapters c \
     JOIN volumes v ON v.id = c.volume_id \
     JOIN novels n ON n.id = v.novel_id";

#[derive(FromRow)]
struct ListingRecord {
    id: i64,
    slug: String,
    title: String,
    position: i32,
    word_count: i32,
    approved: bool,
    is_hidden: bool,
    volume_id: i64,
    volume_name: String,
    volume_position: i32,
}
impl ListingRecord {
    fn to_domain(self) -> ChapterListing {
        ChapterListing {
            id: self.id,
            slug: self.slug,
            title: self.title,
            position: self.position,
            word_count: self.word_count,
            approved: self.approved,
            is_hidden: self.is_hidden,
            volume_id: self.volume_id,
            volume_name: self.volume_name,
            volume_position: self.volume_position,
        }
    }
}

#[derive(FromRow)]
struct ChunkRecord {
    chapter_id: i64,
    position: i32,
    content: String,
    word_count: i32,
}
impl ChunkRecord {
    fn to_domain(self) -> Chunk {
        Chunk {
            chapter_id: self.chapter_id,
            position: self.position,
            content: self.content,
            word_count: self.word_count,
        }
    }
}

#[derive(FromRow)]
struct HistoryRecord {
    user_id: Uuid,
    chapter_id: i64,
    novel_id: i64,
    current_chunk_position: i32,
    reading_progress: f64,
    updated_at: DateTime<Utc>,
}
impl HistoryRecord {
    fn to_domain(self) -> ReadingHistory {
        ReadingHistory {
            user_id: self.user_id,
            chapter_id: self.chapter_id,
            novel_id: self.novel_id,
            current_chunk_position: self.current_chunk_position,
            reading_progress: self.reading_progress,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ViewerRecord {
    user_id: Uuid,
    is_moderator: bool,
}

//=========================================================================================
// Shared Statements
//=========================================================================================

/// Deletes every chunk of the chapter and bulk-inserts `chunks`.
async fn write_chunks(
    conn: &mut PgConnection,
    chapter_id: i64,
    chunks: &[NewChunk],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM chunks WHERE chapter_id = $1")
        .bind(chapter_id)
        .execute(&mut *conn)
        .await?;
    if chunks.is_empty() {
        return Ok(());
    }

    let positions: Vec<i32> = chunks.iter().map(|c| c.position).collect();
    let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let word_counts: Vec<i32> = chunks.iter().map(|c| c.word_count).collect();
    sqlx::query(
        "INSERT INTO chunks (chapter_id, position, content, word_count) \
         SELECT $1, t.position, t.content, t.word_count \
         FROM UNNEST($2::int4[], $3::text[], $4::int4[]) AS t(position, content, word_count)",
    )
    .bind(chapter_id)
    .bind(positions)
    .bind(contents)
    .bind(word_counts)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn select_range(
    conn: &mut PgConnection,
    chapter_id: i64,
    start_position: i32,
    limit: i32,
) -> Result<Vec<Chunk>, sqlx::Error> {
    let records = sqlx::query_as::<_, ChunkRecord>(
        "SELECT chapter_id, position, content, word_count FROM chunks \
         WHERE chapter_id = $1 AND position >= $2 AND position < $3 \
         ORDER BY position ASC",
    )
    .bind(chapter_id)
    .bind(start_position)
    .bind(start_position.saturating_add(limit))
    .fetch_all(&mut *conn)
    .await?;
    Ok(records.into_iter().map(|r| r.to_domain()).collect())
}

async fn select_exists_after(
    conn: &mut PgConnection,
    chapter_id: i64,
    position: i32,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM chunks WHERE chapter_id = $1 AND position >= $2)",
    )
    .bind(chapter_id)
    .bind(position)
    .fetch_one(&mut *conn)
    .await
}

async fn select_count(conn: &mut PgConnection, chapter_id: i64) -> Result<i32, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chunks WHERE chapter_id = $1")
        .bind(chapter_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(i32::try_from(count).unwrap_or(i32::MAX))
}

//=========================================================================================
// `ChunkRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChunkRepository for DbAdapter {
    async fn replace_all(&self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            write_chunks(&mut tx, chapter_id, chunks).await?;
            tx.commit().await
        })
        .await
    }

    async fn range(&self, chapter_id: i64, start_position: i32, limit: i32) -> PortResult<Vec<Chunk>> {
        timed(self.timeout, async {
            let mut conn = self.pool.acquire().await?;
            select_range(&mut conn, chapter_id, start_position, limit).await
        })
        .await
    }

    async fn exists_after(&self, chapter_id: i64, position: i32) -> PortResult<bool> {
        timed(self.timeout, async {
            let mut conn = self.pool.acquire().await?;
            select_exists_after(&mut conn, chapter_id, position).await
        })
        .await
    }

    async fn count(&self, chapter_id: i64) -> PortResult<i32> {
        timed(self.timeout, async {
            let mut conn = self.pool.acquire().await?;
            select_count(&mut conn, chapter_id).await
        })
        .await
    }

    async fn delete_all(&self, chapter_id: i64) -> PortResult<u64> {
        timed(
            self.timeout,
            sqlx::query("DELETE FROM chunks WHERE chapter_id = $1")
                .bind(chapter_id)
                .execute(&self.pool),
        )
        .await
        .map(|done| done.rows_affected())
    }

    async fn window(&self, chapter_id: i64, start_position: i32, limit: i32) -> PortResult<ChunkWindow> {
        timed(self.timeout, async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
                .execute(&mut *tx)
                .await?;
            let chunks = select_range(&mut tx, chapter_id, start_position, limit).await?;
            let has_more =
                select_exists_after(&mut tx, chapter_id, start_position.saturating_add(limit)).await?;
            let total_chunks = select_count(&mut tx, chapter_id).await?;
            tx.commit().await?;
            Ok(ChunkWindow {
                chunks,
                has_more,
                total_chunks,
            })
        })
        .await
    }
}

//=========================================================================================
// `ChapterRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ChapterRepository for DbAdapter {
    async fn find_novel_by_slug(&self, novel_slug: &str) -> PortResult<Option<Novel>> {
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, NovelRecord>(
                "SELECT id, slug, name, owner_id, approval_status, deleted_at \
                 FROM novels WHERE slug = $1",
            )
            .bind(novel_slug)
            .fetch_optional(&self.pool),
        )
        .await?;
        record.map(NovelRecord::to_domain).transpose()
    }

    async fn find_chapter(
        &self,
        novel_slug: &str,
        chapter_slug: &str,
    ) -> PortResult<Option<ChapterContext>> {
        let sql = format!(
            "{CHAPTER_CONTEXT_SELECT} \
             WHERE n.slug = $1 AND c.slug = $2 AND c.deleted_at IS NULL \
             ORDER BY c.id LIMIT 1"
        );
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, ChapterContextRecord>(&sql)
                .bind(novel_slug)
                .bind(chapter_slug)
                .fetch_optional(&self.pool),
        )
        .await?;
        record.map(ChapterContextRecord::to_domain).transpose()
    }

    async fn find_chapter_by_id(&self, chapter_id: i64) -> PortResult<Option<ChapterContext>> {
        let sql = format!("{CHAPTER_CONTEXT_SELECT} WHERE c.id = $1 AND c.deleted_at IS NULL");
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, ChapterContextRecord>(&sql)
                .bind(chapter_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        record.map(ChapterContextRecord::to_domain).transpose()
    }

    async fn list_chapters(&self, novel_id: i64) -> PortResult<Vec<ChapterListing>> {
        let records = timed(
            self.timeout,
            sqlx::query_as::<_, ListingRecord>(
                "SELECT c.id, c.slug, c.title, c.position, c.word_count, c.approved, c.is_hidden, \
                        v.id AS volume_id, v.name AS volume_name, v.position AS volume_position \
                 FROM chapters c JOIN volumes v ON v.id = c.volume_id \
                 WHERE v.novel_id = $1 AND c.deleted_at IS NULL \
                 ORDER BY v.position ASC, c.position ASC, c.id ASC",
            )
            .bind(novel_id)
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }
}

//=========================================================================================
// `ReadingHistoryRepository` Trait Implementation
//=========================================================================================

const HISTORY_COLUMNS: &str =
    "user_id, chapter_id, novel_id, current_chunk_position, reading_progress, updated_at";

#[async_trait]
impl ReadingHistoryRepository for DbAdapter {
    async fn get_history(&self, user_id: Uuid, chapter_id: i64) -> PortResult<Option<ReadingHistory>> {
        let sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM reading_history WHERE user_id = $1 AND chapter_id = $2"
        );
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, HistoryRecord>(&sql)
                .bind(user_id)
                .bind(chapter_id)
                .fetch_optional(&self.pool),
        )
        .await?;
        Ok(record.map(HistoryRecord::to_domain))
    }

    /// The `WHERE` on the conflict branch mirrors `progress::decide`: stale
    /// and identical events leave the row, `updated_at` included, untouched.
    async fn record_progress(
        &self,
        user_id: Uuid,
        novel_id: i64,
        event: ProgressEvent,
        now: DateTime<Utc>,
    ) -> PortResult<ReadingHistory> {
        let upsert = format!(
            "INSERT INTO reading_history AS h ({HISTORY_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id, chapter_id) DO UPDATE SET \
                 current_chunk_position = EXCLUDED.current_chunk_position, \
                 reading_progress = EXCLUDED.reading_progress, \
                 updated_at = EXCLUDED.updated_at \
             WHERE NOT (h.current_chunk_position = EXCLUDED.current_chunk_position \
                        AND h.reading_progress = EXCLUDED.reading_progress) \
               AND NOT (h.reading_progress > EXCLUDED.reading_progress \
                        AND EXCLUDED.current_chunk_position <= h.current_chunk_position) \
             RETURNING {HISTORY_COLUMNS}"
        );
        let applied = timed(
            self.timeout,
            sqlx::query_as::<_, HistoryRecord>(&upsert)
                .bind(user_id)
                .bind(event.chapter_id)
                .bind(novel_id)
                .bind(event.chunk_position)
                .bind(event.reading_progress)
                .bind(now)
                .fetch_optional(&self.pool),
        )
        .await?;

        match applied {
            Some(record) => Ok(record.to_domain()),
            None => {
                debug!(%user_id, chapter_id = event.chapter_id, "Progress event left the row unchanged");
                self.get_history(user_id, event.chapter_id)
                    .await?
                    .ok_or_else(|| PortError::Unexpected("progress row vanished".to_string()))
            }
        }
    }
}

//=========================================================================================
// `SessionResolver` Trait Implementation
//=========================================================================================

#[async_trait]
impl SessionResolver for DbAdapter {
    async fn resolve_session(&self, token: &str) -> PortResult<Option<Viewer>> {
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, ViewerRecord>(
                "SELECT u.id AS user_id, u.is_moderator \
                 FROM auth_sessions s JOIN users u ON u.id = s.user_id \
                 WHERE s.id = $1 AND s.expires_at > NOW()",
            )
            .bind(token)
            .fetch_optional(&self.pool),
        )
        .await?;
        Ok(record.map(|r| Viewer {
            user_id: r.user_id,
            is_moderator: r.is_moderator,
        }))
    }
}

//=========================================================================================
// Transactions
//=========================================================================================

#[async_trait]
impl Transactional for DbAdapter {
    async fn begin(&self) -> PortResult<Box<dyn StoreTransaction>> {
        let tx = timed(self.timeout, self.pool.begin()).await?;
        Ok(Box::new(PgStoreTransaction {
            tx,
            timeout: self.timeout,
        }))
    }
}

/// A PostgreSQL transaction. Dropping it without `commit` rolls back and
/// releases every advisory lock it took.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    timeout: Duration,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn lock_novel(&mut self, novel_id: i64) -> PortResult<()> {
        timed(
            self.timeout,
            sqlx::query("SELECT id FROM novels WHERE id = $1 FOR UPDATE")
                .bind(novel_id)
                .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    async fn lock_chapter(&mut self, chapter_id: i64, policy: LockPolicy) -> PortResult<()> {
        match policy {
            LockPolicy::Wait => {
                timed(
                    self.timeout,
                    sqlx::query("SELECT pg_advisory_xact_lock($1)")
                        .bind(chapter_id)
                        .execute(&mut *self.tx),
                )
                .await?;
                Ok(())
            }
            LockPolicy::Fail => {
                let acquired = timed(
                    self.timeout,
                    sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
                        .bind(chapter_id)
                        .fetch_one(&mut *self.tx),
                )
                .await?;
                if acquired {
                    Ok(())
                } else {
                    Err(PortError::Conflict(format!(
                        "chapter {chapter_id} is being rechunked"
                    )))
                }
            }
        }
    }

    async fn chapter(&mut self, chapter_id: i64) -> PortResult<Option<Chapter>> {
        let sql = format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = $1");
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, ChapterRecord>(&sql)
                .bind(chapter_id)
                .fetch_optional(&mut *self.tx),
        )
        .await?;
        Ok(record.map(ChapterRecord::to_domain))
    }

    async fn volume(&mut self, volume_id: i64) -> PortResult<Option<Volume>> {
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, VolumeRecord>(
                "SELECT id, novel_id, name, position FROM volumes WHERE id = $1",
            )
            .bind(volume_id)
            .fetch_optional(&mut *self.tx),
        )
        .await?;
        Ok(record.map(VolumeRecord::to_domain))
    }

    async fn volume_by_name(&mut self, novel_id: i64, name: &str) -> PortResult<Option<Volume>> {
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, VolumeRecord>(
                "SELECT id, novel_id, name, position FROM volumes WHERE novel_id = $1 AND name = $2",
            )
            .bind(novel_id)
            .bind(name)
            .fetch_optional(&mut *self.tx),
        )
        .await?;
        Ok(record.map(VolumeRecord::to_domain))
    }

    async fn next_volume_position(&mut self, novel_id: i64) -> PortResult<i32> {
        timed(
            self.timeout,
            sqlx::query_scalar::<_, i32>(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM volumes WHERE novel_id = $1",
            )
            .bind(novel_id)
            .fetch_one(&mut *self.tx),
        )
        .await
    }

    async fn insert_volume(&mut self, novel_id: i64, name: &str, position: i32) -> PortResult<Volume> {
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, VolumeRecord>(
                "INSERT INTO volumes (novel_id, name, position) VALUES ($1, $2, $3) \
                 RETURNING id, novel_id, name, position",
            )
            .bind(novel_id)
            .bind(name)
            .bind(position)
            .fetch_one(&mut *self.tx),
        )
        .await?;
        Ok(record.to_domain())
    }

    async fn title_taken(&mut self, volume_id: i64, title: &str) -> PortResult<bool> {
        timed(
            self.timeout,
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM chapters \
                 WHERE volume_id = $1 AND title = $2 AND deleted_at IS NULL)",
            )
            .bind(volume_id)
            .bind(title)
            .fetch_one(&mut *self.tx),
        )
        .await
    }

    async fn slug_taken(&mut self, novel_id: i64, slug: &str) -> PortResult<bool> {
        timed(
            self.timeout,
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM chapters c JOIN volumes v ON v.id = c.volume_id \
                 WHERE v.novel_id = $1 AND c.slug = $2 AND c.deleted_at IS NULL)",
            )
            .bind(novel_id)
            .bind(slug)
            .fetch_one(&mut *self.tx),
        )
        .await
    }

    async fn next_chapter_position(&mut self, volume_id: i64) -> PortResult<i32> {
        timed(
            self.timeout,
            sqlx::query_scalar::<_, i32>(
                "SELECT COALESCE(MAX(position), 0) + 1 FROM chapters WHERE volume_id = $1",
            )
            .bind(volume_id)
            .fetch_one(&mut *self.tx),
        )
        .await
    }

    async fn insert_chapter(&mut self, chapter: NewChapter) -> PortResult<Chapter> {
        let sql = format!(
            "INSERT INTO chapters (volume_id, title, slug, position, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING {CHAPTER_COLUMNS}"
        );
        let record = timed(
            self.timeout,
            sqlx::query_as::<_, ChapterRecord>(&sql)
                .bind(chapter.volume_id)
                .bind(&chapter.title)
                .bind(&chapter.slug)
                .bind(chapter.position)
                .bind(chapter.created_at)
                .fetch_one(&mut *self.tx),
        )
        .await?;
        Ok(record.to_domain())
    }

    async fn replace_chunks(&mut self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()> {
        timed(self.timeout, write_chunks(&mut self.tx, chapter_id, chunks)).await
    }

    async fn set_word_count(
        &mut self,
        chapter_id: i64,
        word_count: i32,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        timed(
            self.timeout,
            sqlx::query("UPDATE chapters SET word_count = $2, updated_at = $3 WHERE id = $1")
                .bind(chapter_id)
                .bind(word_count)
                .bind(now)
                .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    async fn soft_delete_chapter(&mut self, chapter_id: i64, at: DateTime<Utc>) -> PortResult<()> {
        timed(
            self.timeout,
            sqlx::query(
                "UPDATE chapters SET deleted_at = $2, updated_at = $2 \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(chapter_id)
            .bind(at)
            .execute(&mut *self.tx),
        )
        .await?;
        Ok(())
    }

    async fn delete_chunks(&mut self, chapter_id: i64) -> PortResult<u64> {
        timed(
            self.timeout,
            sqlx::query("DELETE FROM chunks WHERE chapter_id = $1")
                .bind(chapter_id)
                .execute(&mut *self.tx),
        )
        .await
        .map(|done| done.rows_affected())
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        let PgStoreTransaction { tx, timeout } = *self;
        timed(timeout, tx.commit()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_retryable() {
        assert!(map_sqlx_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(map_sqlx_error(sqlx::Error::PoolClosed).is_retryable());
    }

    #[test]
    fn missing_rows_are_unexpected() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            PortError::Unexpected(_)
        ));
    }

    #[tokio::test]
    async fn slow_calls_time_out_as_unavailable() {
        let result: PortResult<()> = timed(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(PortError::Unavailable(_))));
    }
}
