use super::CHUNK_SIZE;

/// Split `data` into consecutive leaf payloads of at most `CHUNK_SIZE` bytes.
///
/// Every payload but the last is full. Empty input yields nothing; callers
/// that need a root for empty content build a single empty leaf themselves.
pub fn split(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(CHUNK_SIZE)
}
