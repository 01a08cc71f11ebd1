//! 分块传输编解码
//!
//! 二进制负载按固定大小切块，每块编码为一帧：
//! - 4 字节大端序长度
//! - 负载本体
//!
//! 长度为 0 的帧表示传输结束。没有读到结束帧的流一律视为失败，
//! 接收方不会落盘任何内容。

use std::io::Write;
use std::path::Path;
use std::pin::Pin;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use tempfile::NamedTempFile;

use crate::errors::{RpcError, RpcResult};

/// 默认分块大小 1 KiB
pub const CHUNK_SIZE: usize = 1024;

/// 单帧允许的最大负载 1 MiB
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 帧头长度
pub const FRAME_HEADER_SIZE: usize = 4;

/// 按顺序产出数据块的流
pub type ChunkStream = Pin<Box<dyn Stream<Item = RpcResult<Bytes>> + Send>>;

/// 将负载切块并编码为完整的帧序列(含结束帧)
pub fn encode_chunks(data: &[u8], chunk_size: usize) -> Bytes {
    let chunk_size = chunk_size.max(1);
    let frame_count = data.len().div_ceil(chunk_size);
    let mut buf = BytesMut::with_capacity(data.len() + (frame_count + 1) * FRAME_HEADER_SIZE);

    for chunk in data.chunks(chunk_size) {
        buf.put_u32(chunk.len() as u32);
        buf.put_slice(chunk);
    }
    buf.put_u32(0);

    buf.freeze()
}

/// 把内存中的负载包装为数据块流
pub fn chunk_stream_from(data: Bytes, chunk_size: usize) -> ChunkStream {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<RpcResult<Bytes>> = (0..data.len())
        .step_by(chunk_size)
        .map(|start| Ok(data.slice(start..(start + chunk_size).min(data.len()))))
        .collect();
    stream::iter(chunks).boxed()
}

/// 解码得到的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Chunk(Bytes),
    End,
}

/// 增量帧解码器，帧可以被任意切分在多次读取之间
#[derive(Debug)]
pub struct ChunkDecoder {
    buffer: BytesMut,
    max_frame: usize,
    finished: bool,
}

impl ChunkDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame,
            finished: false,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        if !self.finished {
            self.buffer.extend_from_slice(bytes);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// 尝试取出下一帧；数据不足时返回 `Ok(None)`
    pub fn next_frame(&mut self) -> RpcResult<Option<Frame>> {
        if self.finished {
            return Ok(Some(Frame::End));
        }
        if self.buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;

        if len > self.max_frame {
            return Err(RpcError::protocol(format!(
                "帧长度 {len} 超过上限 {}",
                self.max_frame
            )));
        }

        if len == 0 {
            self.buffer.advance(FRAME_HEADER_SIZE);
            self.buffer.clear();
            self.finished = true;
            return Ok(Some(Frame::End));
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_SIZE);
        Ok(Some(Frame::Chunk(self.buffer.split_to(len).freeze())))
    }
}

/// 将原始字节流(HTTP body 等)解码为数据块流
///
/// 源流在结束帧之前终止、出错或帧长度越界时，产出一个错误后结束。
pub fn decode_chunk_stream<S, E>(source: S, max_frame: usize) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(source), ChunkDecoder::new(max_frame), false);

    stream::unfold(state, |(mut source, mut decoder, failed)| async move {
        if failed {
            return None;
        }
        loop {
            match decoder.next_frame() {
                Ok(Some(Frame::Chunk(chunk))) => return Some((Ok(chunk), (source, decoder, false))),
                Ok(Some(Frame::End)) => return None,
                Ok(None) => {}
                Err(e) => return Some((Err(e), (source, decoder, true))),
            }

            match source.next().await {
                Some(Ok(bytes)) => decoder.extend(&bytes),
                Some(Err(e)) => {
                    return Some((Err(RpcError::transport(e.to_string())), (source, decoder, true)))
                }
                None => {
                    return Some((
                        Err(RpcError::protocol("传输在结束帧之前中断")),
                        (source, decoder, true),
                    ))
                }
            }
        }
    })
    .boxed()
}

/// 按顺序拼接所有数据块；任一块失败则整个传输失败
pub async fn collect_chunks(mut chunks: ChunkStream) -> RpcResult<Vec<u8>> {
    let mut data = Vec::new();
    while let Some(chunk) = chunks.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// 原子写入文件：先写入同目录下的临时文件，再重命名到目标路径
///
/// 目标目录不存在时自动创建。写入中途失败不会在目标路径留下文件。
pub fn write_atomic(dest: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn split_into_reads(encoded: &Bytes, read_size: usize) -> Vec<Result<Bytes, String>> {
        (0..encoded.len())
            .step_by(read_size)
            .map(|start| Ok(encoded.slice(start..(start + read_size).min(encoded.len()))))
            .collect()
    }

    #[tokio::test]
    async fn test_chunked_transfer_reassembles_original() {
        let payload = sample_payload(10 * CHUNK_SIZE + 321);
        let encoded = encode_chunks(&payload, CHUNK_SIZE);

        // 传输层的读取边界与帧边界无关
        let reads = split_into_reads(&encoded, 700);
        let chunks = decode_chunk_stream(stream::iter(reads), MAX_FRAME_SIZE);

        let sizes: Vec<usize> = {
            let reads = split_into_reads(&encoded, 700);
            decode_chunk_stream(stream::iter(reads), MAX_FRAME_SIZE)
                .map(|c| c.unwrap().len())
                .collect()
                .await
        };
        assert_eq!(sizes.len(), 11);
        assert!(sizes[..10].iter().all(|&s| s == CHUNK_SIZE));
        assert_eq!(sizes[10], 321);

        let reassembled = collect_chunks(chunks).await.unwrap();
        assert_eq!(reassembled, payload);
    }

    #[tokio::test]
    async fn test_empty_payload_is_just_end_frame() {
        let encoded = encode_chunks(&[], CHUNK_SIZE);
        assert_eq!(encoded.as_ref(), &[0, 0, 0, 0]);

        let chunks = decode_chunk_stream(stream::iter(vec![Ok::<_, String>(encoded)]), MAX_FRAME_SIZE);
        assert!(collect_chunks(chunks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncated_stream_fails() {
        let payload = sample_payload(3000);
        let encoded = encode_chunks(&payload, CHUNK_SIZE);
        // 去掉结束帧
        let truncated = encoded.slice(..encoded.len() - FRAME_HEADER_SIZE);

        let chunks = decode_chunk_stream(stream::iter(vec![Ok::<_, String>(truncated)]), MAX_FRAME_SIZE);
        let err = collect_chunks(chunks).await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_source_error_fails_transfer() {
        let encoded = encode_chunks(&sample_payload(2048), CHUNK_SIZE);
        let reads = vec![Ok(encoded.slice(..1500)), Err("connection reset".to_string())];

        let chunks = decode_chunk_stream(stream::iter(reads), MAX_FRAME_SIZE);
        let err = collect_chunks(chunks).await.unwrap_err();
        assert_eq!(err, RpcError::transport("connection reset"));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut decoder = ChunkDecoder::new(16);
        decoder.extend(&encode_chunks(&[7u8; 64], 64));
        assert!(matches!(decoder.next_frame(), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_decoder_ignores_bytes_after_end() {
        let mut decoder = ChunkDecoder::new(MAX_FRAME_SIZE);
        decoder.extend(&encode_chunks(b"abc", CHUNK_SIZE));
        decoder.extend(b"garbage");

        assert_eq!(
            decoder.next_frame().unwrap(),
            Some(Frame::Chunk(Bytes::from_static(b"abc")))
        );
        assert_eq!(decoder.next_frame().unwrap(), Some(Frame::End));
        assert!(decoder.is_finished());
    }

    #[tokio::test]
    async fn test_chunk_stream_from_splits_in_order() {
        let payload = Bytes::from(sample_payload(2500));
        let chunks: Vec<Bytes> = chunk_stream_from(payload.clone(), CHUNK_SIZE)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), payload.to_vec());
    }

    #[test]
    fn test_write_atomic_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Reports").join("run").join("result.xlsx");

        write_atomic(&dest, b"first").unwrap();
        write_atomic(&dest, b"second").unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"second");
        // 没有遗留临时文件
        let entries = std::fs::read_dir(dest.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
