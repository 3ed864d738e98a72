//! services/api/src/web/protocol.rs
//!
//! Defines the JSON bodies exchanged with browsers. These DTOs are the public
//! contract of the service; domain types are converted into them at the edge.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use novel_pipeline_core::domain::{
    ChapterDraft, ChapterLink, ChapterListing, ChapterPage, Chunk, ChunkPage, ContentFormat,
    Navigation, ReadingHistory, VolumeChoice,
};
use novel_pipeline_core::FieldError;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Error Bodies
//=========================================================================================

/// The body of a failed read request.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// Correlates the response with the server log line.
    pub request_id: Uuid,
}

/// The body of a form submission that did not redirect.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FormEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Messages keyed by form field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
}

/// Groups field errors by field name, keeping their order.
pub fn field_errors(errors: &[FieldError]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for e in errors {
        grouped
            .entry(e.field.to_string())
            .or_default()
            .push(e.message.clone());
    }
    grouped
}

//=========================================================================================
// Reader Payloads
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChunkDto {
    pub position: i32,
    pub content: String,
    pub word_count: i32,
}

impl From<Chunk> for ChunkDto {
    fn from(chunk: Chunk) -> Self {
        Self {
            position: chunk.position,
            content: chunk.content,
            word_count: chunk.word_count,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterLinkDto {
    pub id: i64,
    pub slug: String,
    pub title: String,
}

impl From<ChapterLink> for ChapterLinkDto {
    fn from(link: ChapterLink) -> Self {
        Self {
            id: link.id,
            slug: link.slug,
            title: link.title,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NavigationDto {
    pub previous: Option<ChapterLinkDto>,
    pub next: Option<ChapterLinkDto>,
}

impl From<Navigation> for NavigationDto {
    fn from(nav: Navigation) -> Self {
        Self {
            previous: nav.previous.map(Into::into),
            next: nav.next.map(Into::into),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressDto {
    pub chapter_id: i64,
    pub novel_id: i64,
    pub current_chunk_position: i32,
    pub reading_progress: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<ReadingHistory> for ProgressDto {
    fn from(h: ReadingHistory) -> Self {
        Self {
            chapter_id: h.chapter_id,
            novel_id: h.novel_id,
            current_chunk_position: h.current_chunk_position,
            reading_progress: h.reading_progress,
            updated_at: h.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterInfo {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub position: i32,
    pub word_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VolumeInfo {
    pub id: i64,
    pub name: String,
    pub position: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct NovelInfo {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

/// The payload of the chapter reader page.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterPageResponse {
    pub chapter: ChapterInfo,
    pub volume: VolumeInfo,
    pub novel: NovelInfo,
    pub chunks: Vec<ChunkDto>,
    pub total_chunks: i32,
    pub loaded_chunks: usize,
    pub has_more: bool,
    pub navigation: NavigationDto,
    pub progress: Option<ProgressDto>,
    pub average_chunk_words: f64,
    pub estimated_reading_minutes: f64,
}

impl From<ChapterPage> for ChapterPageResponse {
    fn from(page: ChapterPage) -> Self {
        Self {
            chapter: ChapterInfo {
                id: page.chapter.id,
                slug: page.chapter.slug,
                title: page.chapter.title,
                position: page.chapter.position,
                word_count: page.chapter.word_count,
                updated_at: page.chapter.updated_at,
            },
            volume: VolumeInfo {
                id: page.volume.id,
                name: page.volume.name,
                position: page.volume.position,
            },
            novel: NovelInfo {
                id: page.novel.id,
                slug: page.novel.slug,
                name: page.novel.name,
            },
            loaded_chunks: page.chunks.len(),
            chunks: page.chunks.into_iter().map(Into::into).collect(),
            total_chunks: page.total_chunks,
            has_more: page.has_more,
            navigation: page.navigation.into(),
            progress: page.progress.map(Into::into),
            average_chunk_words: page.average_chunk_words,
            estimated_reading_minutes: page.estimated_reading_minutes,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoadChunksQuery {
    /// First position to return; defaults to 1.
    pub start: Option<i32>,
    /// Number of chunks; defaults to and is capped at the maximum window.
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoadChunksResponse {
    pub chunks: Vec<ChunkDto>,
    pub has_more: bool,
    pub next_start: i32,
}

impl From<ChunkPage> for LoadChunksResponse {
    fn from(page: ChunkPage) -> Self {
        Self {
            chunks: page.chunks.into_iter().map(Into::into).collect(),
            has_more: page.has_more,
            next_start: page.next_start,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TocEntry {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub position: i32,
    pub word_count: i32,
    pub volume_id: i64,
    pub volume_name: String,
    pub volume_position: i32,
}

impl From<ChapterListing> for TocEntry {
    fn from(l: ChapterListing) -> Self {
        Self {
            id: l.id,
            slug: l.slug,
            title: l.title,
            position: l.position,
            word_count: l.word_count,
            volume_id: l.volume_id,
            volume_name: l.volume_name,
            volume_position: l.volume_position,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TableOfContentsResponse {
    pub novel: NovelInfo,
    pub chapters: Vec<TocEntry>,
}

//=========================================================================================
// Progress Payloads
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SaveProgressRequest {
    pub chapter_id: i64,
    pub chunk_position: i32,
    pub reading_progress: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SaveProgressResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

//=========================================================================================
// Authoring Payloads
//=========================================================================================

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Html,
    Plain,
}

impl From<BodyFormat> for ContentFormat {
    fn from(format: BodyFormat) -> Self {
        match format {
            BodyFormat::Html => ContentFormat::Html,
            BodyFormat::Plain => ContentFormat::Plain,
        }
    }
}

/// The add-chapter form. `volume_choice` is either `"new"` or the id of an
/// existing volume.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChapterForm {
    pub title: String,
    pub volume_choice: String,
    #[serde(default)]
    pub new_volume_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub format: Option<BodyFormat>,
}

impl ChapterForm {
    pub fn into_draft(self) -> Result<ChapterDraft, FieldError> {
        let choice = self.volume_choice.trim();
        let volume = if choice.eq_ignore_ascii_case("new") {
            VolumeChoice::New {
                name: self.new_volume_name.unwrap_or_default(),
            }
        } else {
            let volume_id = choice.parse::<i64>().map_err(|_| FieldError {
                field: "volume_choice",
                message: "Choose an existing volume or create a new one.".to_string(),
            })?;
            VolumeChoice::Existing { volume_id }
        };
        Ok(ChapterDraft {
            title: self.title,
            volume,
            content: self.content,
            format: self.format.unwrap_or_default().into(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentRequest {
    pub content: String,
    #[serde(default)]
    pub format: Option<BodyFormat>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ContentResponse {
    pub success: bool,
    pub chunk_count: usize,
    pub word_count: i32,
}
