pub mod chapters;
pub mod chunker;
pub mod domain;
pub mod manager;
pub mod memory;
pub mod ports;
pub mod progress;
pub mod reader;
pub mod slug;
pub mod visibility;

pub use chapters::{validate_draft, ChapterService, CreatedChapter, FieldError};
pub use chunker::{chunker_for, count_words, ChunkPiece, Chunker, HtmlChunker, PlainChunker};
pub use manager::{ChunkManager, RechunkOutcome};
pub use memory::MemoryStore;
pub use ports::{LockPolicy, PipelineStore, PortError, PortResult};
pub use progress::ProgressTracker;
pub use reader::{ReaderService, ReaderSettings};
