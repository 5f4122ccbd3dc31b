
use tracing::debug;

/// A window of freeform upload text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Window position in the source text; blank windows leave gaps
    pub index: usize,
    /// Trimmed window content, never empty
    pub text: String,
}

/// Cut `text` into fixed windows of `max_chars` characters.
///
/// Windows are counted over the untrimmed input, so the index of a chunk
/// stays stable for identical uploads and can be used in record ids.
#[inline]
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextChunk> {
    if max_chars == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let chunks: Vec<TextChunk> = chars
        .chunks(max_chars)
        .enumerate()
        .filter_map(|(index, window)| {
            let window: String = window.iter().collect();
            let trimmed = window.trim();
            (!trimmed.is_empty()).then(|| TextChunk {
                index,
                text: trimmed.to_string(),
            })
        })
        .collect();

    debug!(
        "Split {} characters into {} chunks of at most {}",
        chars.len(),
        chunks.len(),
        max_chars
    );
    chunks
}
