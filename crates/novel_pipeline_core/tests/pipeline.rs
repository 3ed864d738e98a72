use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use novel_pipeline_core::chunker::{Chunker, HtmlChunker, PlainChunker};
use novel_pipeline_core::domain::{
    ApprovalStatus, Chapter, ChapterDraft, ContentFormat, NewChunk, Novel, ProgressEvent, Viewer,
    Volume, VolumeChoice,
};
use novel_pipeline_core::ports::{
    ChunkRepository, LockPolicy, PipelineStore, PortError, StoreTransaction, Transactional,
};
use novel_pipeline_core::{
    ChapterService, ChunkManager, MemoryStore, ProgressTracker, ReaderService, ReaderSettings,
};
use uuid::Uuid;

struct Fixture {
    store: MemoryStore,
    shared: Arc<dyn PipelineStore>,
    owner: Viewer,
    novel: Novel,
    volume: Volume,
    chapter: Chapter,
}

impl Fixture {
    async fn new(status: ApprovalStatus) -> Self {
        let store = MemoryStore::new();
        let owner = Viewer {
            user_id: Uuid::new_v4(),
            is_moderator: false,
        };
        let novel = store.seed_novel("the-novel", Some(owner.user_id), status).await;
        let volume = store.seed_volume(novel.id, "Volume 1").await;
        let chapter = store.seed_chapter(volume.id, "Chapter One").await;
        let shared: Arc<dyn PipelineStore> = Arc::new(store.clone());
        Self {
            store,
            shared,
            owner,
            novel,
            volume,
            chapter,
        }
    }

    fn manager(&self) -> ChunkManager {
        ChunkManager::new(self.shared.clone(), 4)
    }

    fn reader(&self) -> ReaderService {
        ReaderService::new(self.shared.clone(), ReaderSettings::default())
    }

    fn tracker(&self) -> ProgressTracker {
        ProgressTracker::new(self.shared.clone())
    }

    fn chapters(&self, max_chunk_size: usize) -> ChapterService {
        ChapterService::new(self.shared.clone(), self.manager(), max_chunk_size, LockPolicy::Wait)
    }

    async fn seed_chunks(&self, chapter_id: i64, count: i32) {
        let chunks: Vec<NewChunk> = (1..=count)
            .map(|position| NewChunk {
                position,
                content: format!("chunk number {position}"),
                word_count: 3,
            })
            .collect();
        self.store.replace_all(chapter_id, &chunks).await.unwrap();
    }
}

fn stranger() -> Viewer {
    Viewer {
        user_id: Uuid::new_v4(),
        is_moderator: false,
    }
}

fn draft(title: &str, volume: VolumeChoice, content: &str) -> ChapterDraft {
    ChapterDraft {
        title: title.to_string(),
        volume,
        content: content.to_string(),
        format: ContentFormat::Html,
    }
}

//=========================================================================================
// Chunk Manager
//=========================================================================================

#[tokio::test]
async fn single_chunk_ingest() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let outcome = fx
        .manager()
        .rechunk(
            fx.chapter.id,
            "Hello world.\n\nA short chapter.",
            &PlainChunker::new(100),
            LockPolicy::Wait,
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.chunk_count, 1);
    let chunks = fx.store.all_chunks(fx.chapter.id).await;
    assert_eq!(chunks[0].content, "Hello world.\n\nA short chapter.");
    assert_eq!(chunks[0].word_count, 5);
    assert_eq!(fx.store.chapter_row(fx.chapter.id).await.unwrap().word_count, 5);
}

#[tokio::test]
async fn paragraph_boundary_split() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.manager()
        .rechunk(
            fx.chapter.id,
            "Alpha beta gamma.\n\nDelta epsilon zeta.",
            &PlainChunker::new(20),
            LockPolicy::Wait,
            Utc::now(),
        )
        .await
        .unwrap();

    let chunks = fx.store.all_chunks(fx.chapter.id).await;
    let rows: Vec<(i32, &str, i32)> = chunks
        .iter()
        .map(|c| (c.position, c.content.as_str(), c.word_count))
        .collect();
    assert_eq!(
        rows,
        [(1, "Alpha beta gamma.", 3), (2, "Delta epsilon zeta.", 3)]
    );
    assert_eq!(fx.store.chapter_row(fx.chapter.id).await.unwrap().word_count, 6);
}

#[tokio::test]
async fn rechunk_is_idempotent_with_contiguous_positions() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let body = "<p>one two three four five</p>\n<p>six seven <em>eight</em> nine ten</p>".repeat(6);
    let chunker = HtmlChunker::new(60);
    let manager = fx.manager();

    manager
        .rechunk(fx.chapter.id, &body, &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap();
    let first = fx.store.all_chunks(fx.chapter.id).await;
    manager
        .rechunk(fx.chapter.id, &body, &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap();
    let second = fx.store.all_chunks(fx.chapter.id).await;

    assert_eq!(first, second);
    let positions: Vec<i32> = second.iter().map(|c| c.position).collect();
    let expected: Vec<i32> = (1..=second.len() as i32).collect();
    assert_eq!(positions, expected);
    let total: i32 = second.iter().map(|c| c.word_count).sum();
    assert_eq!(total, 60);
    assert_eq!(fx.store.chapter_row(fx.chapter.id).await.unwrap().word_count, total);
}

#[tokio::test]
async fn empty_body_clears_chunks_and_word_count() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let manager = fx.manager();
    let chunker = PlainChunker::new(100);
    manager
        .rechunk(fx.chapter.id, "some words here", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap();

    let outcome = manager
        .rechunk(fx.chapter.id, "", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome.chunk_count, 0);
    assert!(fx.store.all_chunks(fx.chapter.id).await.is_empty());
    assert_eq!(fx.store.chapter_row(fx.chapter.id).await.unwrap().word_count, 0);
}

#[tokio::test]
async fn rechunk_of_missing_or_deleted_chapter_is_not_found() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let manager = fx.manager();
    let chunker = PlainChunker::new(100);

    let err = manager
        .rechunk(9_999, "text", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    fx.store
        .update_chapter(fx.chapter.id, |c| c.deleted_at = Some(Utc::now()))
        .await;
    let err = manager
        .rechunk(fx.chapter.id, "text", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn failed_commit_keeps_the_previous_chunks() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let manager = fx.manager();
    let chunker = PlainChunker::new(100);
    manager
        .rechunk(fx.chapter.id, "original body text", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap();
    let before = fx.store.all_chunks(fx.chapter.id).await;

    fx.store.fail_commits(true);
    let err = manager
        .rechunk(fx.chapter.id, "a completely different body", &chunker, LockPolicy::Wait, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    fx.store.fail_commits(false);

    assert_eq!(fx.store.all_chunks(fx.chapter.id).await, before);
    assert_eq!(fx.store.chapter_row(fx.chapter.id).await.unwrap().word_count, 3);
}

#[tokio::test]
async fn concurrent_rechunks_leave_one_complete_result() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let manager = fx.manager();
    let chunker = PlainChunker::new(24);
    let bodies: Vec<String> = (0..8)
        .map(|i| format!("Body {i} starts here.\n\n{}", "word ".repeat(10 + i)))
        .collect();

    let results = join_all(bodies.iter().map(|body| {
        let manager = manager.clone();
        let chunker = &chunker;
        let chapter_id = fx.chapter.id;
        async move {
            manager
                .rechunk(chapter_id, body, chunker, LockPolicy::Wait, Utc::now())
                .await
        }
    }))
    .await;
    assert!(results.iter().all(Result::is_ok));

    let stored: Vec<String> = fx
        .store
        .all_chunks(fx.chapter.id)
        .await
        .into_iter()
        .map(|c| c.content)
        .collect();
    let matches_one_body = bodies.iter().any(|body| {
        let expected: Vec<String> = chunker
            .split(body)
            .unwrap()
            .into_iter()
            .map(|p| p.content)
            .collect();
        expected == stored
    });
    assert!(matches_one_body, "mixed chunk sets: {stored:?}");
}

#[tokio::test]
async fn fail_policy_rejects_a_held_chapter() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let manager = fx.manager();
    let chunker = PlainChunker::new(100);

    let mut tx = fx.shared.begin().await.unwrap();
    tx.lock_chapter(fx.chapter.id, LockPolicy::Wait).await.unwrap();
    let err = manager
        .rechunk(fx.chapter.id, "body", &chunker, LockPolicy::Fail, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Conflict(_)));
    drop(tx);

    manager
        .rechunk(fx.chapter.id, "body", &chunker, LockPolicy::Fail, Utc::now())
        .await
        .unwrap();
}

//=========================================================================================
// Reader Stream Service
//=========================================================================================

#[tokio::test]
async fn first_window_and_cursor() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 25).await;
    let reader = fx.reader();

    let page = reader
        .first_window("the-novel", &fx.chapter.slug, None)
        .await
        .unwrap();
    let positions: Vec<i32> = page.chunks.iter().map(|c| c.position).collect();
    assert_eq!(positions, (1..=10).collect::<Vec<_>>());
    assert_eq!(page.total_chunks, 25);
    assert!(page.has_more);
    assert!(page.progress.is_none());

    let next = reader
        .next_window(fx.chapter.id, Some(11), Some(10), None)
        .await
        .unwrap();
    assert_eq!(next.chunks.first().map(|c| c.position), Some(11));
    assert_eq!(next.chunks.last().map(|c| c.position), Some(20));
    assert!(next.has_more);
    assert_eq!(next.next_start, 21);

    let last = reader
        .next_window(fx.chapter.id, Some(21), Some(10), None)
        .await
        .unwrap();
    assert_eq!(last.chunks.len(), 5);
    assert!(!last.has_more);
    assert_eq!(last.next_start, 31);
}

#[tokio::test]
async fn next_window_validates_and_clamps() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 25).await;
    let reader = fx.reader();

    let clamped = reader
        .next_window(fx.chapter.id, Some(1), Some(50), None)
        .await
        .unwrap();
    assert_eq!(clamped.chunks.len(), 10);
    assert_eq!(clamped.next_start, 11);

    let defaults = reader.next_window(fx.chapter.id, None, None, None).await.unwrap();
    assert_eq!(defaults.chunks.len(), 10);

    for (start, limit) in [(Some(0), None), (None, Some(0)), (Some(-3), Some(5))] {
        let err = reader
            .next_window(fx.chapter.id, start, limit, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }

    let err = reader.next_window(9_999, None, None, None).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn pending_novel_is_only_visible_to_its_owner() {
    let fx = Fixture::new(ApprovalStatus::Pending).await;
    let reader = fx.reader();

    let err = reader
        .first_window("the-novel", &fx.chapter.slug, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    let err = reader
        .first_window("the-novel", &fx.chapter.slug, Some(&stranger()))
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    let page = reader
        .first_window("the-novel", &fx.chapter.slug, Some(&fx.owner))
        .await
        .unwrap();
    assert_eq!(page.chapter.id, fx.chapter.id);

    let moderator = Viewer {
        user_id: Uuid::new_v4(),
        is_moderator: true,
    };
    assert!(reader
        .next_window(fx.chapter.id, None, None, Some(&moderator))
        .await
        .is_ok());
}

#[tokio::test]
async fn first_window_reports_navigation_stats_and_progress() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let second = fx.store.seed_chapter(fx.volume.id, "Chapter Two").await;
    let hidden = fx.store.seed_chapter(fx.volume.id, "Chapter Three").await;
    fx.store.update_chapter(hidden.id, |c| c.is_hidden = true).await;
    let volume_two = fx.store.seed_volume(fx.novel.id, "Volume 2").await;
    let fourth = fx.store.seed_chapter(volume_two.id, "Chapter Four").await;

    fx.manager()
        .rechunk(
            second.id,
            &"word ".repeat(500),
            &PlainChunker::new(1_000),
            LockPolicy::Wait,
            Utc::now(),
        )
        .await
        .unwrap();

    let reader = fx.reader();
    let page = reader
        .first_window("the-novel", &second.slug, None)
        .await
        .unwrap();
    assert_eq!(page.navigation.previous.as_ref().map(|l| l.id), Some(fx.chapter.id));
    assert_eq!(page.navigation.next.as_ref().map(|l| l.id), Some(fourth.id));
    assert_eq!(page.total_chunks, 3);
    assert!((page.estimated_reading_minutes - 2.0).abs() < f64::EPSILON);
    assert!((page.average_chunk_words - 500.0 / 3.0).abs() < 1e-9);

    let owner_page = reader
        .first_window("the-novel", &second.slug, Some(&fx.owner))
        .await
        .unwrap();
    assert_eq!(owner_page.navigation.next.map(|l| l.id), Some(hidden.id));
    assert!(owner_page.progress.is_none());

    let event = ProgressEvent {
        chapter_id: second.id,
        chunk_position: 2,
        reading_progress: 50.0,
    };
    fx.tracker()
        .record(Some(&fx.owner), event, Utc::now())
        .await
        .unwrap();
    let owner_page = reader
        .first_window("the-novel", &second.slug, Some(&fx.owner))
        .await
        .unwrap();
    assert_eq!(owner_page.progress.map(|p| p.current_chunk_position), Some(2));
}

#[tokio::test]
async fn reading_never_creates_history() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 3).await;
    let reader = fx.reader();
    let viewer = stranger();

    reader
        .first_window("the-novel", &fx.chapter.slug, Some(&viewer))
        .await
        .unwrap();
    reader
        .next_window(fx.chapter.id, None, None, Some(&viewer))
        .await
        .unwrap();

    let stored = fx.tracker().get(Some(&viewer), fx.chapter.id).await.unwrap();
    assert!(stored.is_none());
}

#[tokio::test]
async fn table_of_contents_follows_visibility() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let draft_chapter = fx.store.seed_chapter(fx.volume.id, "Draft").await;
    fx.store.update_chapter(draft_chapter.id, |c| c.approved = false).await;
    let reader = fx.reader();

    let (_, public) = reader.table_of_contents("the-novel", None).await.unwrap();
    assert_eq!(public.iter().map(|l| l.id).collect::<Vec<_>>(), [fx.chapter.id]);

    let (_, own) = reader
        .table_of_contents("the-novel", Some(&fx.owner))
        .await
        .unwrap();
    assert_eq!(own.len(), 2);

    fx.store
        .update_novel(fx.novel.id, |n| n.approval_status = ApprovalStatus::Rejected)
        .await;
    let err = reader.table_of_contents("the-novel", None).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
    let err = reader.table_of_contents("missing", None).await.unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

//=========================================================================================
// Reading Progress Tracker
//=========================================================================================

#[tokio::test]
async fn progress_is_monotonic() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 10).await;
    let tracker = fx.tracker();
    let reader = stranger();
    let event = |position, progress| ProgressEvent {
        chapter_id: fx.chapter.id,
        chunk_position: position,
        reading_progress: progress,
    };

    tracker.record(Some(&reader), event(5, 40.0), Utc::now()).await.unwrap();
    let stale = tracker
        .record(Some(&reader), event(3, 10.0), Utc::now())
        .await
        .unwrap();
    assert_eq!((stale.current_chunk_position, stale.reading_progress), (5, 40.0));

    let forward = tracker
        .record(Some(&reader), event(7, 55.0), Utc::now())
        .await
        .unwrap();
    assert_eq!((forward.current_chunk_position, forward.reading_progress), (7, 55.0));
    assert_eq!(forward.novel_id, fx.novel.id);

    let stored = tracker.get(Some(&reader), fx.chapter.id).await.unwrap().unwrap();
    assert_eq!(stored, forward);
}

#[tokio::test]
async fn identical_records_leave_the_row_untouched() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 4).await;
    let tracker = fx.tracker();
    let reader = stranger();
    let event = ProgressEvent {
        chapter_id: fx.chapter.id,
        chunk_position: 2,
        reading_progress: 50.0,
    };

    let first = tracker.record(Some(&reader), event, Utc::now()).await.unwrap();
    let second = tracker.record(Some(&reader), event, Utc::now()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn progress_rejects_bad_callers_and_values() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 4).await;
    let tracker = fx.tracker();
    let reader = stranger();
    let event = |position, progress| ProgressEvent {
        chapter_id: fx.chapter.id,
        chunk_position: position,
        reading_progress: progress,
    };

    let err = tracker.record(None, event(1, 10.0), Utc::now()).await.unwrap_err();
    assert_eq!(err, PortError::Unauthenticated);

    for (position, progress) in [(-1, 10.0), (5, 10.0), (1, 100.5), (1, -0.1), (1, f64::NAN)] {
        let err = tracker
            .record(Some(&reader), event(position, progress), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)), "{position} {progress}");
    }

    assert!(tracker.record(Some(&reader), event(4, 100.0), Utc::now()).await.is_ok());
    assert!(tracker.record(Some(&reader), event(0, 0.0), Utc::now()).await.is_ok());

    fx.store.update_chapter(fx.chapter.id, |c| c.approved = false).await;
    let err = tracker
        .record(Some(&reader), event(1, 10.0), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

//=========================================================================================
// Chapter lifecycle
//=========================================================================================

#[tokio::test]
async fn add_chapter_with_a_new_volume() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(1_000);

    let created = service
        .add_chapter(
            Some(&fx.owner),
            "the-novel",
            draft(
                "  Khởi đầu  ",
                VolumeChoice::New {
                    name: "Tập Hai".to_string(),
                },
                "<p>Một hai ba.</p><p>Bốn năm.</p>",
            ),
            Utc::now(),
        )
        .await
        .unwrap();

    assert_eq!(created.volume.position, 2);
    assert_eq!(created.chapter.title, "Khởi đầu");
    assert_eq!(created.chapter.slug, "tap-hai-khoi-dau");
    assert_eq!(created.chapter.position, 1);
    assert!(!created.chapter.approved);
    assert_eq!(created.chunk_count, 1);

    let row = fx.store.chapter_row(created.chapter.id).await.unwrap();
    assert_eq!(row.word_count, 5);
    assert_eq!(fx.store.all_chunks(created.chapter.id).await.len(), 1);
}

#[tokio::test]
async fn add_chapter_to_an_existing_volume_appends_it() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(1_000);
    let created = service
        .add_chapter(
            Some(&fx.owner),
            "the-novel",
            draft(
                "Chapter Two",
                VolumeChoice::Existing {
                    volume_id: fx.volume.id,
                },
                "<p>text</p>",
            ),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(created.chapter.position, fx.chapter.position + 1);
    assert_eq!(created.chapter.slug, "volume-1-chapter-two");
}

#[tokio::test]
async fn add_chapter_enforces_ownership_and_approval() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(1_000);
    let new_draft = || {
        draft(
            "Another",
            VolumeChoice::Existing {
                volume_id: fx.volume.id,
            },
            "<p>text</p>",
        )
    };

    let err = service
        .add_chapter(None, "the-novel", new_draft(), Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err, PortError::Unauthenticated);

    let err = service
        .add_chapter(Some(&stranger()), "the-novel", new_draft(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Forbidden(_)));

    let err = service
        .add_chapter(Some(&fx.owner), "missing", new_draft(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));

    fx.store
        .update_novel(fx.novel.id, |n| n.approval_status = ApprovalStatus::Pending)
        .await;
    let err = service
        .add_chapter(Some(&fx.owner), "the-novel", new_draft(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Forbidden(_)));
}

#[tokio::test]
async fn add_chapter_rejects_duplicates_and_foreign_volumes() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let other = fx
        .store
        .seed_novel("other", Some(fx.owner.user_id), ApprovalStatus::Approved)
        .await;
    let foreign = fx.store.seed_volume(other.id, "Elsewhere").await;
    let service = fx.chapters(1_000);

    let duplicate_title = draft(
        "Chapter One",
        VolumeChoice::Existing {
            volume_id: fx.volume.id,
        },
        "<p>x</p>",
    );
    let err = service
        .add_chapter(Some(&fx.owner), "the-novel", duplicate_title, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Conflict(_)));

    let duplicate_volume = draft(
        "Fresh",
        VolumeChoice::New {
            name: "Volume 1".to_string(),
        },
        "<p>x</p>",
    );
    let err = service
        .add_chapter(Some(&fx.owner), "the-novel", duplicate_volume, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Conflict(_)));

    let foreign_volume = draft(
        "Fresh",
        VolumeChoice::Existing {
            volume_id: foreign.id,
        },
        "<p>x</p>",
    );
    let err = service
        .add_chapter(Some(&fx.owner), "the-novel", foreign_volume, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));

    let blank = draft(
        "   ",
        VolumeChoice::Existing {
            volume_id: fx.volume.id,
        },
        "<p>x</p>",
    );
    let err = service
        .add_chapter(Some(&fx.owner), "the-novel", blank, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::InvalidInput(_)));
}

#[tokio::test]
async fn colliding_slugs_get_a_numeric_suffix() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(1_000);
    let add = |title: &str, volume: &str| {
        draft(
            title,
            VolumeChoice::New {
                name: volume.to_string(),
            },
            "<p>x</p>",
        )
    };

    let first = service
        .add_chapter(Some(&fx.owner), "the-novel", add("b c", "A"), Utc::now())
        .await
        .unwrap();
    let second = service
        .add_chapter(Some(&fx.owner), "the-novel", add("c", "A b"), Utc::now())
        .await
        .unwrap();
    assert_eq!(first.chapter.slug, "a-b-c");
    assert_eq!(second.chapter.slug, "a-b-c-2");
}

#[tokio::test]
async fn failed_ingest_creates_nothing() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(1_000);
    fx.store.fail_commits(true);
    let err = service
        .add_chapter(
            Some(&fx.owner),
            "the-novel",
            draft(
                "Lost",
                VolumeChoice::New {
                    name: "Ghost".to_string(),
                },
                "<p>x</p>",
            ),
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    fx.store.fail_commits(false);

    let (_, chapters) = fx
        .reader()
        .table_of_contents("the-novel", Some(&fx.owner))
        .await
        .unwrap();
    assert_eq!(chapters.len(), 1);
}

#[tokio::test]
async fn delete_chapter_is_soft_and_drops_chunks() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    fx.seed_chunks(fx.chapter.id, 5).await;
    let service = fx.chapters(1_000);

    let err = service
        .delete_chapter(Some(&stranger()), "the-novel", &fx.chapter.slug, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Forbidden(_)));

    let novel = service
        .delete_chapter(Some(&fx.owner), "the-novel", &fx.chapter.slug, Utc::now())
        .await
        .unwrap();
    assert_eq!(novel.id, fx.novel.id);

    let row = fx.store.chapter_row(fx.chapter.id).await.unwrap();
    assert!(row.is_deleted());
    assert!(fx.store.all_chunks(fx.chapter.id).await.is_empty());

    let err = fx
        .reader()
        .first_window("the-novel", &fx.chapter.slug, Some(&fx.owner))
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::NotFound(_)));
}

#[tokio::test]
async fn replace_content_rechunks_for_owner_and_moderator() {
    let fx = Fixture::new(ApprovalStatus::Approved).await;
    let service = fx.chapters(20);
    let moderator = Viewer {
        user_id: Uuid::new_v4(),
        is_moderator: true,
    };

    let outcome = service
        .replace_content(
            Some(&fx.owner),
            "the-novel",
            &fx.chapter.slug,
            "Alpha beta gamma.\n\nDelta epsilon zeta.",
            ContentFormat::Plain,
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.chunk_count, 2);
    assert_eq!(outcome.word_count, 6);

    let outcome = service
        .replace_content(
            Some(&moderator),
            "the-novel",
            &fx.chapter.slug,
            "<p>short</p>",
            ContentFormat::Html,
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.chunk_count, 1);

    let err = service
        .replace_content(
            Some(&stranger()),
            "the-novel",
            &fx.chapter.slug,
            "<p>nope</p>",
            ContentFormat::Html,
            Utc::now(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Forbidden(_)));
}
