//! パイプ (Pipe) - 有界バッファによるバイトストリーム
//!
//! 固定容量のリングバッファと、独立に閉じられる読み取り端・書き込み端を持つ。
//! すべての操作はカーネルモニタの内側で実行される。
//!
//! - 書き込み: バッファが満杯かつ読み取り端が開いている間 `has_space` で待機。
//!   読み取り端が閉じれば BrokenPipe。短い書き込みは正常系。
//! - 読み取り: バッファが空かつ書き込み端が開いている間 `has_data` で待機。
//!   空で書き込み端が閉じていれば 0 (EOF)。
//! - 両端が閉じた時点でバッファは解放される（最後に閉じた側が解放する）。

use crate::config::PipeBufferSize;
use crate::error::{KernelResult, PipeError};
use crate::fs::fcb::{self, Fid, StreamObject};
use crate::kernel::{KernelGuard, KernelState};
use crate::sync::{ArenaKey, CondVar};
use crate::task::process::Pid;

/// パイプID (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipeId(u64);

impl PipeId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl ArenaKey for PipeId {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// パイプ端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeEnd {
    Reader,
    Writer,
}

/// `Pipe()` が返すディスクリプタの組
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeFds {
    pub read: Fid,
    pub write: Fid,
}

/// パイプ統計
#[cfg(feature = "stats")]
#[derive(Debug, Default, Clone, Copy)]
pub struct PipeStats {
    /// 読み取りバイト数
    pub bytes_read: u64,
    /// 書き込みバイト数
    pub bytes_written: u64,
    /// 読み取りブロック回数
    pub read_blocks: u64,
    /// 書き込みブロック回数
    pub write_blocks: u64,
}

/// パイプ制御ブロック
///
/// カーソルは常に `r_pos + len ≡ w_pos (mod capacity)` を満たす。
pub struct PipeBuffer {
    buffer: Box<[u8]>,
    r_pos: usize,
    w_pos: usize,
    len: usize,
    reader_open: bool,
    writer_open: bool,
    has_space: CondVar,
    has_data: CondVar,
}

impl PipeBuffer {
    /// 両端が開いた空のパイプを作成
    pub fn new(size: PipeBufferSize) -> Self {
        Self {
            buffer: vec![0u8; size.as_usize()].into_boxed_slice(),
            r_pos: 0,
            w_pos: 0,
            len: 0,
            reader_open: true,
            writer_open: true,
            has_space: CondVar::new(),
            has_data: CondVar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// 使用中のバイト数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 空きバイト数
    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    pub fn is_open(&self, end: PipeEnd) -> bool {
        match end {
            PipeEnd::Reader => self.reader_open,
            PipeEnd::Writer => self.writer_open,
        }
    }

    /// 書き込めるだけ書き込む（待機しない）
    fn push(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.available());
        let cap = self.capacity();
        let first = count.min(cap - self.w_pos);
        self.buffer[self.w_pos..self.w_pos + first].copy_from_slice(&data[..first]);
        self.buffer[..count - first].copy_from_slice(&data[first..count]);
        self.w_pos = (self.w_pos + count) % cap;
        self.len += count;
        count
    }

    /// 読めるだけ読む（待機しない）
    fn pop(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.len);
        let cap = self.capacity();
        let first = count.min(cap - self.r_pos);
        buf[..first].copy_from_slice(&self.buffer[self.r_pos..self.r_pos + first]);
        buf[first..count].copy_from_slice(&self.buffer[..count - first]);
        self.r_pos = (self.r_pos + count) % cap;
        self.len -= count;
        count
    }
}

/// 両端が開いた新しいパイプを確保する
pub fn create(state: &mut KernelState) -> PipeId {
    let size = state.config.pipe_buffer_size;
    state.pipes.insert(PipeBuffer::new(size))
}

/// 指定した端がまだ開いているか（解放済みなら閉じている）
pub fn is_open(state: &KernelState, id: PipeId, end: PipeEnd) -> bool {
    state.pipes.get(id).is_some_and(|pipe| pipe.is_open(end))
}

/// パイプへ書き込む
pub fn write(g: &mut KernelGuard<'_>, id: PipeId, data: &[u8]) -> KernelResult<usize> {
    loop {
        let pipe = g.pipes.get(id).ok_or(PipeError::BrokenPipe)?;
        if !pipe.writer_open || !pipe.reader_open {
            return Err(PipeError::BrokenPipe.into());
        }
        if data.is_empty() {
            return Ok(0);
        }
        if !pipe.is_full() {
            break;
        }
        let has_space = pipe.has_space.clone();
        #[cfg(feature = "stats")]
        {
            g.pipe_stats.write_blocks += 1;
        }
        has_space.wait(g);
    }

    let pipe = g.pipes.get_mut(id).ok_or(PipeError::BrokenPipe)?;
    let count = pipe.push(data);
    pipe.has_data.broadcast();
    #[cfg(feature = "stats")]
    {
        g.pipe_stats.bytes_written += count as u64;
    }
    Ok(count)
}

/// パイプから読み取る（0 は EOF）
pub fn read(g: &mut KernelGuard<'_>, id: PipeId, buf: &mut [u8]) -> KernelResult<usize> {
    loop {
        let pipe = g.pipes.get(id).ok_or(PipeError::ReaderClosed)?;
        if !pipe.reader_open {
            return Err(PipeError::ReaderClosed.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if !pipe.is_empty() || !pipe.writer_open {
            break;
        }
        let has_data = pipe.has_data.clone();
        #[cfg(feature = "stats")]
        {
            g.pipe_stats.read_blocks += 1;
        }
        has_data.wait(g);
    }

    let pipe = g.pipes.get_mut(id).ok_or(PipeError::ReaderClosed)?;
    let count = pipe.pop(buf);
    pipe.has_space.broadcast();
    #[cfg(feature = "stats")]
    {
        g.pipe_stats.bytes_read += count as u64;
    }
    Ok(count)
}

/// 書き込み端を閉じる
///
/// 待機中の読み手は残りを読み切るか EOF を観測する。
pub fn close_writer(state: &mut KernelState, id: PipeId) {
    close_end(state, id, PipeEnd::Writer);
}

/// 読み取り端を閉じる
///
/// 待機中の書き手は BrokenPipe で即座に失敗する。
pub fn close_reader(state: &mut KernelState, id: PipeId) {
    close_end(state, id, PipeEnd::Reader);
}

fn close_end(state: &mut KernelState, id: PipeId, end: PipeEnd) {
    let Some(pipe) = state.pipes.get_mut(id) else {
        return;
    };
    let other_open = match end {
        PipeEnd::Reader if pipe.reader_open => {
            pipe.reader_open = false;
            pipe.has_space.broadcast();
            pipe.writer_open
        }
        PipeEnd::Writer if pipe.writer_open => {
            pipe.writer_open = false;
            pipe.has_data.broadcast();
            pipe.reader_open
        }
        // 既に閉じている
        _ => return,
    };
    if !other_open {
        state.pipes.remove(id);
        log::trace!("pipe {} released", id.as_u64());
    }
}

/// `Pipe()` システムコール本体
///
/// 2つのディスクリプタを原子的に予約し、読み取り端と書き込み端を割り当てる。
pub fn open(state: &mut KernelState, pid: Pid) -> KernelResult<PipeFds> {
    let fids = fcb::reserve(state, pid, 2)?;
    let id = create(state);
    let read = fids[0];
    let write = fids[1];
    fcb::install(state, pid, read, StreamObject::PipeReader(id))?;
    fcb::install(state, pid, write, StreamObject::PipeWriter(id))?;
    log::debug!(
        "pid {}: pipe {} opened (read fid {}, write fid {})",
        pid.as_u64(),
        id.as_u64(),
        read.as_usize(),
        write.as_usize()
    );
    Ok(PipeFds { read, write })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::error::KernelError;
    use crate::kernel::Kernel;

    fn small_kernel(capacity: usize) -> std::sync::Arc<Kernel> {
        Kernel::new(KernelConfig::new().with_pipe_buffer_size(capacity))
    }

    #[test]
    fn test_ring_buffer_wraps_around() {
        let mut pipe = PipeBuffer::new(PipeBufferSize::new(4));
        assert_eq!(pipe.push(b"abc"), 3);
        let mut out = [0u8; 2];
        assert_eq!(pipe.pop(&mut out), 2);
        assert_eq!(&out, b"ab");
        // 先頭へ折り返して書き込む
        assert_eq!(pipe.push(b"defg"), 3);
        assert!(pipe.is_full());
        let mut out = [0u8; 8];
        assert_eq!(pipe.pop(&mut out), 4);
        assert_eq!(&out[..4], b"cdef");
        assert!(pipe.is_empty());
    }

    #[test]
    fn test_short_write_when_nearly_full() {
        let kernel = small_kernel(8);
        let mut g = kernel.enter();
        let id = create(&mut g);
        assert_eq!(write(&mut g, id, b"12345").unwrap(), 5);
        assert_eq!(write(&mut g, id, b"6789A").unwrap(), 3);
        let mut buf = [0u8; 16];
        assert_eq!(read(&mut g, id, &mut buf).unwrap(), 8);
        assert_eq!(&buf[..8], b"12345678");
    }

    #[test]
    fn test_write_after_reader_closed_is_broken_pipe() {
        let kernel = small_kernel(8);
        let mut g = kernel.enter();
        let id = create(&mut g);
        close_reader(&mut g, id);
        assert_eq!(
            write(&mut g, id, b"x"),
            Err(KernelError::Pipe(PipeError::BrokenPipe))
        );
    }

    #[test]
    fn test_read_drains_then_reports_eof() {
        let kernel = small_kernel(8);
        let mut g = kernel.enter();
        let id = create(&mut g);
        write(&mut g, id, b"hi").unwrap();
        close_writer(&mut g, id);

        let mut buf = [0u8; 4];
        assert_eq!(read(&mut g, id, &mut buf).unwrap(), 2);
        assert_eq!(read(&mut g, id, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_after_reader_closed_fails() {
        let kernel = small_kernel(8);
        let mut g = kernel.enter();
        let id = create(&mut g);
        close_reader(&mut g, id);
        let mut buf = [0u8; 1];
        assert_eq!(
            read(&mut g, id, &mut buf),
            Err(KernelError::Pipe(PipeError::ReaderClosed))
        );
    }

    #[test]
    fn test_last_closer_frees_buffer() {
        let kernel = small_kernel(8);
        let mut g = kernel.enter();
        let id = create(&mut g);
        close_writer(&mut g, id);
        assert!(g.pipes.contains(id));
        close_writer(&mut g, id);
        assert!(g.pipes.contains(id));
        close_reader(&mut g, id);
        assert!(!g.pipes.contains(id));
        // 解放後の close は何もしない
        close_reader(&mut g, id);
        assert!(!is_open(&g, id, PipeEnd::Reader));
    }
}
