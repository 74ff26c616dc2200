use serde::Serialize;

/// 连续区间描述，`start` 包含，`end` 不包含
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkDescriptor {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl ChunkDescriptor {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// 把 [0, total) 按 chunk_size 切分，最后一块可能不满
pub fn plan_chunks(total: usize, chunk_size: usize) -> Vec<ChunkDescriptor> {
    let chunk_size = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;
    while start < total {
        let end = (start + chunk_size).min(total);
        chunks.push(ChunkDescriptor { index, start, end });
        start = end;
        index += 1;
    }
    chunks
}
