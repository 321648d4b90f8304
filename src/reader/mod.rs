//! Read-aloud: article chunking, per-chunk synthesis, ordered playback.

pub mod chunker;
pub mod controller;
pub mod fetcher;
pub mod output;
pub mod wav;

pub use chunker::{build_chunks, Article, ChunkBudget};
pub use controller::{PlaybackState, Reader, ReaderError, ReaderEvent, ReaderSettings, SessionStats};
pub use fetcher::{ChunkFetcher, FetchError, HttpChunkFetcher};
pub use output::{AudioOutput, OutputError, RodioOutput};
pub use wav::{AudioClip, DEFAULT_SAMPLE_RATE};
