//! Structure-aware splitting of file content into token-bounded chunks.

pub mod boundaries;
mod chunk;
mod chunker;

pub use chunk::{reconstruct, Chunk, ChunkMetadata, ChunkStrategy};
pub use chunker::{ChunkOptions, Chunker, DEFAULT_OVERLAP_CHARS, DEFAULT_OVERLAP_LINES};
