// Embeddings module
// Ollama embedding/chat client and upload text windowing

pub mod chunking;
pub mod ollama;

pub use chunking::{TextChunk, chunk_text};
pub use ollama::{DEFAULT_EMBEDDING_DIMENSION, DEFAULT_RETRY_DELAY, OllamaClient};
