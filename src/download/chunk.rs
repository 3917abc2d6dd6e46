use crate::error::{Error, Result};

/// Inclusive byte range of one download partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub start: u64,
    pub end: u64,
    pub total_bytes: u64,
}

/// Partition `total_length` bytes into contiguous chunks for parallel
/// ranged fetches.
///
/// The thread count shrinks while a chunk would fall below
/// `min_chunk_bytes`, bottoming out at one. The remainder of the division
/// is spread one byte at a time over the leading chunks, so chunk sizes
/// differ by at most one byte.
pub fn plan(total_length: u64, max_threads: u32, min_chunk_bytes: u64) -> Result<Vec<Chunk>> {
    if total_length == 0 {
        return Err(Error::Download(
            "cannot plan chunks for empty content".to_string(),
        ));
    }

    let mut threads = max_threads.max(1) as u64;
    while total_length / threads < min_chunk_bytes && threads > 1 {
        threads -= 1;
    }

    let base = total_length / threads;
    let mut remainder = total_length % threads;

    let mut chunks = Vec::with_capacity(threads as usize);
    let mut start = 0u64;
    for _ in 0..threads {
        let size = if remainder > 0 {
            remainder -= 1;
            base + 1
        } else {
            base
        };
        let end = start + size - 1;
        chunks.push(Chunk {
            start,
            end,
            total_bytes: size,
        });
        start = end + 1;
    }

    Ok(chunks)
}
