//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification.

use utoipa::OpenApi;

use crate::web::{chapters, progress, protocol, reader};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        reader::chapter_page_handler,
        reader::load_chunks_handler,
        reader::table_of_contents_handler,
        progress::save_progress_handler,
        progress::reading_progress_handler,
        chapters::add_chapter_handler,
        chapters::replace_content_handler,
        chapters::delete_chapter_handler,
    ),
    components(
        schemas(
            protocol::ErrorBody,
            protocol::FormEnvelope,
            protocol::ChunkDto,
            protocol::ChapterLinkDto,
            protocol::NavigationDto,
            protocol::ProgressDto,
            protocol::ChapterInfo,
            protocol::VolumeInfo,
            protocol::NovelInfo,
            protocol::ChapterPageResponse,
            protocol::LoadChunksResponse,
            protocol::TocEntry,
            protocol::TableOfContentsResponse,
            protocol::SaveProgressRequest,
            protocol::SaveProgressResponse,
            protocol::BodyFormat,
            protocol::ChapterForm,
            protocol::ContentRequest,
            protocol::ContentResponse,
        )
    ),
    tags(
        (name = "Novel Reader API", description = "Chapter reading, progress tracking and chapter authoring.")
    )
)]
pub struct ApiDoc;
