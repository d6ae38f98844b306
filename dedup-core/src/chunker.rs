//! Content-defined chunking.
//!
//! A single 32-bit shift-add fingerprint runs across the whole buffer (it is not reset
//! between chunks). Bytes in `[start, start + min)` are never fed to it, and scanning for
//! a boundary stops at `start + avg`, so with the default parameters every chunk is at
//! most `avg` bytes and every chunk except possibly the last is at least `min + 1` bytes.

pub const MIN_CHUNK_SIZE: usize = 4096;
pub const AVG_CHUNK_SIZE: usize = 8192;
pub const MAX_CHUNK_SIZE: usize = 16384;
/// Low 12 bits zero declares a boundary.
pub const BOUNDARY_MASK: u32 = 0xFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSpan {
    pub offset: usize,
    pub len: usize,
}

impl ChunkSpan {
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.end()]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkerParams {
    pub min: usize,
    pub avg: usize,
    pub max: usize,
    pub mask: u32,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self { min: MIN_CHUNK_SIZE, avg: AVG_CHUNK_SIZE, max: MAX_CHUNK_SIZE, mask: BOUNDARY_MASK }
    }
}

/// Split `data` with the default parameters.
pub fn chunk(data: &[u8]) -> Vec<ChunkSpan> {
    chunk_with(data, &ChunkerParams::default())
}

/// Returns spans that partition `[0, data.len())` in order; every span is non-empty.
pub fn chunk_with(data: &[u8], p: &ChunkerParams) -> Vec<ChunkSpan> {
    let mut spans = Vec::with_capacity(data.len() / p.avg.max(1) + 1);
    let mut fp: u32 = 0;
    let mut i = 0usize;
    while i < data.len() {
        let start = i;
        let end = std::cmp::min(start + p.avg.max(1), data.len());
        let mut cut = None;
        for (j, &b) in data.iter().enumerate().take(end).skip(start + p.min) {
            fp = (fp << 1).wrapping_add(b as u32);
            if fp & p.mask == 0 || j - start >= p.max {
                cut = Some(j);
                break;
            }
        }
        match cut {
            Some(j) => {
                spans.push(ChunkSpan { offset: start, len: j - start + 1 });
                i = j + 1;
            }
            None => {
                spans.push(ChunkSpan { offset: start, len: end - start });
                i = end;
            }
        }
    }
    spans
}
