//! crates/novel_pipeline_core/src/memory.rs
//!
//! An in-process implementation of every store port. Transactions stage their
//! writes on a private copy of the tables and publish them in one step on
//! commit, so readers never observe a half-applied change. Per-chapter and
//! per-novel locks stand in for the database's advisory and row locks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::domain::{
    ApprovalStatus, Chapter, ChapterContext, ChapterListing, Chunk, ChunkWindow, NewChapter,
    NewChunk, Novel, ProgressEvent, ReadingHistory, Viewer, Volume,
};
use crate::ports::{
    ChapterRepository, ChunkRepository, LockPolicy, PortError, PortResult,
    ReadingHistoryRepository, SessionResolver, StoreTransaction, Transactional,
};
use crate::progress::{decide, Decision};
use crate::slug::slugify;

#[derive(Debug, Clone, Default)]
struct Tables {
    novels: BTreeMap<i64, Novel>,
    volumes: BTreeMap<i64, Volume>,
    chapters: BTreeMap<i64, Chapter>,
    /// Per chapter, sorted by position.
    chunks: HashMap<i64, Vec<Chunk>>,
    history: HashMap<(Uuid, i64), ReadingHistory>,
    sessions: HashMap<String, Viewer>,
}

impl Tables {
    fn context(&self, chapter: &Chapter) -> Option<ChapterContext> {
        let volume = self.volumes.get(&chapter.volume_id)?;
        let novel = self.novels.get(&volume.novel_id)?;
        Some(ChapterContext {
            chapter: chapter.clone(),
            volume: volume.clone(),
            novel: novel.clone(),
        })
    }

    fn live_chapters_of_novel(&self, novel_id: i64) -> impl Iterator<Item = (&Volume, &Chapter)> {
        self.chapters.values().filter_map(move |chapter| {
            let volume = self.volumes.get(&chapter.volume_id)?;
            (volume.novel_id == novel_id && !chapter.is_deleted()).then_some((volume, chapter))
        })
    }

    fn range(&self, chapter_id: i64, start: i32, limit: i32) -> Vec<Chunk> {
        let end = start.saturating_add(limit);
        self.chunks
            .get(&chapter_id)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|c| c.position >= start && c.position < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn exists_after(&self, chapter_id: i64, position: i32) -> bool {
        self.chunks
            .get(&chapter_id)
            .is_some_and(|chunks| chunks.iter().any(|c| c.position >= position))
    }

    fn count(&self, chapter_id: i64) -> i32 {
        self.chunks
            .get(&chapter_id)
            .map_or(0, |chunks| i32::try_from(chunks.len()).unwrap_or(i32::MAX))
    }

    fn apply(&mut self, op: &Op) {
        match op {
            Op::InsertVolume(volume) => {
                self.volumes.insert(volume.id, volume.clone());
            }
            Op::InsertChapter(chapter) => {
                self.chapters.insert(chapter.id, chapter.clone());
            }
            Op::ReplaceChunks { chapter_id, chunks } => {
                let mut rows: Vec<Chunk> = chunks
                    .iter()
                    .map(|c| Chunk {
                        chapter_id: *chapter_id,
                        position: c.position,
                        content: c.content.clone(),
                        word_count: c.word_count,
                    })
                    .collect();
                rows.sort_by_key(|c| c.position);
                self.chunks.insert(*chapter_id, rows);
            }
            Op::SetWordCount {
                chapter_id,
                word_count,
                at,
            } => {
                if let Some(chapter) = self.chapters.get_mut(chapter_id) {
                    chapter.word_count = *word_count;
                    chapter.updated_at = *at;
                }
            }
            Op::SoftDelete { chapter_id, at } => {
                if let Some(chapter) = self.chapters.get_mut(chapter_id) {
                    chapter.deleted_at = Some(*at);
                    chapter.updated_at = *at;
                }
            }
            Op::DeleteChunks { chapter_id } => {
                self.chunks.remove(chapter_id);
            }
        }
    }
}

/// A staged write, replayed onto the shared tables on commit.
#[derive(Debug, Clone)]
enum Op {
    InsertVolume(Volume),
    InsertChapter(Chapter),
    ReplaceChunks { chapter_id: i64, chunks: Vec<NewChunk> },
    SetWordCount { chapter_id: i64, word_count: i32, at: DateTime<Utc> },
    SoftDelete { chapter_id: i64, at: DateTime<Utc> },
    DeleteChunks { chapter_id: i64 },
}

type LockTable = Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>;

async fn lock_handle(table: &LockTable, key: i64) -> Arc<Mutex<()>> {
    table.lock().await.entry(key).or_default().clone()
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    next_id: Arc<AtomicI64>,
    chapter_locks: LockTable,
    novel_locks: LockTable,
    fail_commits: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Makes every subsequent commit fail with `Unavailable` until reset.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub async fn seed_novel(
        &self,
        slug: &str,
        owner_id: Option<Uuid>,
        approval_status: ApprovalStatus,
    ) -> Novel {
        let novel = Novel {
            id: self.allocate_id(),
            slug: slug.to_string(),
            name: slug.to_string(),
            owner_id,
            approval_status,
            deleted_at: None,
        };
        self.tables.write().await.novels.insert(novel.id, novel.clone());
        novel
    }

    /// Appends a volume at the end of the novel.
    pub async fn seed_volume(&self, novel_id: i64, name: &str) -> Volume {
        let mut tables = self.tables.write().await;
        let position = tables
            .volumes
            .values()
            .filter(|v| v.novel_id == novel_id)
            .map(|v| v.position)
            .max()
            .unwrap_or(0)
            + 1;
        let volume = Volume {
            id: self.allocate_id(),
            novel_id,
            name: name.to_string(),
            position,
        };
        tables.volumes.insert(volume.id, volume.clone());
        volume
    }

    /// Appends an approved, visible chapter with no chunks at the end of the volume.
    pub async fn seed_chapter(&self, volume_id: i64, title: &str) -> Chapter {
        let mut tables = self.tables.write().await;
        let position = tables
            .chapters
            .values()
            .filter(|c| c.volume_id == volume_id)
            .map(|c| c.position)
            .max()
            .unwrap_or(0)
            + 1;
        let id = self.allocate_id();
        let now = Utc::now();
        let slug = match slugify(title) {
            s if s.is_empty() => format!("chapter-{id}"),
            s => s,
        };
        let chapter = Chapter {
            id,
            volume_id,
            title: title.to_string(),
            slug,
            position,
            word_count: 0,
            approved: true,
            is_hidden: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        tables.chapters.insert(id, chapter.clone());
        chapter
    }

    pub async fn update_novel(&self, novel_id: i64, change: impl FnOnce(&mut Novel)) {
        if let Some(novel) = self.tables.write().await.novels.get_mut(&novel_id) {
            change(novel);
        }
    }

    pub async fn update_chapter(&self, chapter_id: i64, change: impl FnOnce(&mut Chapter)) {
        if let Some(chapter) = self.tables.write().await.chapters.get_mut(&chapter_id) {
            change(chapter);
        }
    }

    pub async fn seed_session(&self, token: &str, viewer: Viewer) {
        self.tables
            .write()
            .await
            .sessions
            .insert(token.to_string(), viewer);
    }

    /// The chapter row whether or not it is deleted.
    pub async fn chapter_row(&self, chapter_id: i64) -> Option<Chapter> {
        self.tables.read().await.chapters.get(&chapter_id).cloned()
    }

    /// Every chunk of the chapter, in position order.
    pub async fn all_chunks(&self, chapter_id: i64) -> Vec<Chunk> {
        self.tables
            .read()
            .await
            .chunks
            .get(&chapter_id)
            .cloned()
            .unwrap_or_default()
    }
}

//=========================================================================================
// Read-side Ports
//=========================================================================================

#[async_trait]
impl ChunkRepository for MemoryStore {
    async fn replace_all(&self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()> {
        self.tables.write().await.apply(&Op::ReplaceChunks {
            chapter_id,
            chunks: chunks.to_vec(),
        });
        Ok(())
    }

    async fn range(&self, chapter_id: i64, start_position: i32, limit: i32) -> PortResult<Vec<Chunk>> {
        Ok(self.tables.read().await.range(chapter_id, start_position, limit))
    }

    async fn exists_after(&self, chapter_id: i64, position: i32) -> PortResult<bool> {
        Ok(self.tables.read().await.exists_after(chapter_id, position))
    }

    async fn count(&self, chapter_id: i64) -> PortResult<i32> {
        Ok(self.tables.read().await.count(chapter_id))
    }

    async fn delete_all(&self, chapter_id: i64) -> PortResult<u64> {
        let removed = self.tables.write().await.chunks.remove(&chapter_id);
        Ok(removed.map_or(0, |chunks| chunks.len() as u64))
    }

    async fn window(&self, chapter_id: i64, start_position: i32, limit: i32) -> PortResult<ChunkWindow> {
        let tables = self.tables.read().await;
        Ok(ChunkWindow {
            chunks: tables.range(chapter_id, start_position, limit),
            has_more: tables.exists_after(chapter_id, start_position.saturating_add(limit)),
            total_chunks: tables.count(chapter_id),
        })
    }
}

#[async_trait]
impl ChapterRepository for MemoryStore {
    async fn find_novel_by_slug(&self, novel_slug: &str) -> PortResult<Option<Novel>> {
        let tables = self.tables.read().await;
        Ok(tables.novels.values().find(|n| n.slug == novel_slug).cloned())
    }

    async fn find_chapter(
        &self,
        novel_slug: &str,
        chapter_slug: &str,
    ) -> PortResult<Option<ChapterContext>> {
        let tables = self.tables.read().await;
        let Some(novel) = tables.novels.values().find(|n| n.slug == novel_slug) else {
            return Ok(None);
        };
        let found = tables
            .live_chapters_of_novel(novel.id)
            .find(|(_, chapter)| chapter.slug == chapter_slug)
            .and_then(|(_, chapter)| tables.context(chapter));
        Ok(found)
    }

    async fn find_chapter_by_id(&self, chapter_id: i64) -> PortResult<Option<ChapterContext>> {
        let tables = self.tables.read().await;
        Ok(tables
            .chapters
            .get(&chapter_id)
            .filter(|chapter| !chapter.is_deleted())
            .and_then(|chapter| tables.context(chapter)))
    }

    async fn list_chapters(&self, novel_id: i64) -> PortResult<Vec<ChapterListing>> {
        let tables = self.tables.read().await;
        let mut listings: Vec<ChapterListing> = tables
            .live_chapters_of_novel(novel_id)
            .map(|(volume, chapter)| ChapterListing {
                id: chapter.id,
                slug: chapter.slug.clone(),
                title: chapter.title.clone(),
                position: chapter.position,
                word_count: chapter.word_count,
                approved: chapter.approved,
                is_hidden: chapter.is_hidden,
                volume_id: volume.id,
                volume_name: volume.name.clone(),
                volume_position: volume.position,
            })
            .collect();
        listings.sort_by_key(|l| (l.volume_position, l.position, l.id));
        Ok(listings)
    }
}

#[async_trait]
impl ReadingHistoryRepository for MemoryStore {
    async fn get_history(&self, user_id: Uuid, chapter_id: i64) -> PortResult<Option<ReadingHistory>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .get(&(user_id, chapter_id))
            .cloned())
    }

    async fn record_progress(
        &self,
        user_id: Uuid,
        novel_id: i64,
        event: ProgressEvent,
        now: DateTime<Utc>,
    ) -> PortResult<ReadingHistory> {
        let mut tables = self.tables.write().await;
        let key = (user_id, event.chapter_id);
        let existing = tables.history.get(&key);
        let row = match (decide(existing, &event), existing) {
            (Decision::Insert, _) => ReadingHistory {
                user_id,
                chapter_id: event.chapter_id,
                novel_id,
                current_chunk_position: event.chunk_position,
                reading_progress: event.reading_progress,
                updated_at: now,
            },
            (Decision::Apply, Some(stored)) => ReadingHistory {
                current_chunk_position: event.chunk_position,
                reading_progress: event.reading_progress,
                updated_at: now,
                ..stored.clone()
            },
            (_, Some(stored)) => return Ok(stored.clone()),
            (_, None) => {
                return Err(PortError::Unexpected(
                    "progress decision without a stored row".to_string(),
                ))
            }
        };
        tables.history.insert(key, row.clone());
        Ok(row)
    }
}

#[async_trait]
impl SessionResolver for MemoryStore {
    async fn resolve_session(&self, token: &str) -> PortResult<Option<Viewer>> {
        Ok(self.tables.read().await.sessions.get(token).cloned())
    }
}

//=========================================================================================
// Transactions
//=========================================================================================

#[async_trait]
impl Transactional for MemoryStore {
    async fn begin(&self) -> PortResult<Box<dyn StoreTransaction>> {
        let working = self.tables.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            working,
            ops: Vec::new(),
            guards: Vec::new(),
            held_chapters: HashSet::new(),
            held_novels: HashSet::new(),
        }))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    working: Tables,
    ops: Vec<Op>,
    guards: Vec<OwnedMutexGuard<()>>,
    held_chapters: HashSet<i64>,
    held_novels: HashSet<i64>,
}

impl MemoryTransaction {
    fn stage(&mut self, op: Op) {
        self.working.apply(&op);
        self.ops.push(op);
    }

    /// Rebuilds the working copy from the latest committed state plus our own
    /// staged writes. Called after every lock acquisition so the holder sees
    /// whatever the previous holder committed.
    async fn refresh(&mut self) {
        let mut working = self.store.tables.read().await.clone();
        for op in &self.ops {
            working.apply(op);
        }
        self.working = working;
    }

    fn volume_chapters(&self, volume_id: i64) -> impl Iterator<Item = &Chapter> {
        self.working
            .chapters
            .values()
            .filter(move |c| c.volume_id == volume_id && !c.is_deleted())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_novel(&mut self, novel_id: i64) -> PortResult<()> {
        if self.held_novels.insert(novel_id) {
            let handle = lock_handle(&self.store.novel_locks, novel_id).await;
            self.guards.push(handle.lock_owned().await);
            self.refresh().await;
        }
        Ok(())
    }

    async fn lock_chapter(&mut self, chapter_id: i64, policy: LockPolicy) -> PortResult<()> {
        if self.held_chapters.contains(&chapter_id) {
            return Ok(());
        }
        let handle = lock_handle(&self.store.chapter_locks, chapter_id).await;
        let guard = match policy {
            LockPolicy::Wait => handle.lock_owned().await,
            LockPolicy::Fail => handle.try_lock_owned().map_err(|_| {
                PortError::Conflict(format!("chapter {chapter_id} is being rechunked"))
            })?,
        };
        self.guards.push(guard);
        self.held_chapters.insert(chapter_id);
        self.refresh().await;
        Ok(())
    }

    async fn chapter(&mut self, chapter_id: i64) -> PortResult<Option<Chapter>> {
        Ok(self.working.chapters.get(&chapter_id).cloned())
    }

    async fn volume(&mut self, volume_id: i64) -> PortResult<Option<Volume>> {
        Ok(self.working.volumes.get(&volume_id).cloned())
    }

    async fn volume_by_name(&mut self, novel_id: i64, name: &str) -> PortResult<Option<Volume>> {
        Ok(self
            .working
            .volumes
            .values()
            .find(|v| v.novel_id == novel_id && v.name == name)
            .cloned())
    }

    async fn next_volume_position(&mut self, novel_id: i64) -> PortResult<i32> {
        let max = self
            .working
            .volumes
            .values()
            .filter(|v| v.novel_id == novel_id)
            .map(|v| v.position)
            .max();
        Ok(max.unwrap_or(0) + 1)
    }

    async fn insert_volume(&mut self, novel_id: i64, name: &str, position: i32) -> PortResult<Volume> {
        let volume = Volume {
            id: self.store.allocate_id(),
            novel_id,
            name: name.to_string(),
            position,
        };
        self.stage(Op::InsertVolume(volume.clone()));
        Ok(volume)
    }

    async fn title_taken(&mut self, volume_id: i64, title: &str) -> PortResult<bool> {
        Ok(self.volume_chapters(volume_id).any(|c| c.title == title))
    }

    async fn slug_taken(&mut self, novel_id: i64, slug: &str) -> PortResult<bool> {
        Ok(self
            .working
            .live_chapters_of_novel(novel_id)
            .any(|(_, c)| c.slug == slug))
    }

    async fn next_chapter_position(&mut self, volume_id: i64) -> PortResult<i32> {
        let max = self
            .working
            .chapters
            .values()
            .filter(|c| c.volume_id == volume_id)
            .map(|c| c.position)
            .max();
        Ok(max.unwrap_or(0) + 1)
    }

    async fn insert_chapter(&mut self, chapter: NewChapter) -> PortResult<Chapter> {
        let row = Chapter {
            id: self.store.allocate_id(),
            volume_id: chapter.volume_id,
            title: chapter.title,
            slug: chapter.slug,
            position: chapter.position,
            word_count: 0,
            approved: false,
            is_hidden: false,
            deleted_at: None,
            created_at: chapter.created_at,
            updated_at: chapter.created_at,
        };
        self.stage(Op::InsertChapter(row.clone()));
        Ok(row)
    }

    async fn replace_chunks(&mut self, chapter_id: i64, chunks: &[NewChunk]) -> PortResult<()> {
        self.stage(Op::ReplaceChunks {
            chapter_id,
            chunks: chunks.to_vec(),
        });
        Ok(())
    }

    async fn set_word_count(
        &mut self,
        chapter_id: i64,
        word_count: i32,
        now: DateTime<Utc>,
    ) -> PortResult<()> {
        self.stage(Op::SetWordCount {
            chapter_id,
            word_count,
            at: now,
        });
        Ok(())
    }

    async fn soft_delete_chapter(&mut self, chapter_id: i64, at: DateTime<Utc>) -> PortResult<()> {
        self.stage(Op::SoftDelete { chapter_id, at });
        Ok(())
    }

    async fn delete_chunks(&mut self, chapter_id: i64) -> PortResult<u64> {
        let removed = self.working.count(chapter_id);
        self.stage(Op::DeleteChunks { chapter_id });
        Ok(u64::try_from(removed).unwrap_or(0))
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        if self.store.fail_commits.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("commit failed".to_string()));
        }
        let mut tables = self.store.tables.write().await;
        for op in &self.ops {
            tables.apply(op);
        }
        Ok(())
    }
}
