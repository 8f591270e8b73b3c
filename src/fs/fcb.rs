// ============================================================================
// src/fs/fcb.rs - File Control Blocks and Descriptor Tables
// ============================================================================
//!
//! ファイル制御ブロック (FCB) とプロセスごとのディスクリプタテーブル。
//!
//! ## 設計
//! - FCB はシステム全体のアリーナに置かれ、参照カウントで共有される
//!   （dup2、子プロセスへの継承、I/O 呼び出し中のピン留め）
//! - 最後の参照が落ちた時点でストリームの close が実行される
//! - ストリームの種類ごとに read/write/close の振る舞いが決まる（操作テーブル）

use crate::error::{FileError, KernelResult, ProcessError};
use crate::ipc::pipe::{self, PipeId};
use crate::kernel::{KernelGuard, KernelState};
use crate::net::socket::{self, SocketId};
use crate::sync::ArenaKey;
use crate::task::process::Pid;

/// ファイルディスクリプタ（プロセスローカル）
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fid(u32);

impl Fid {
    pub const fn new(fd: u32) -> Self {
        Self(fd)
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// FCB ハンドル（システム全体）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FcbId(u64);

impl ArenaKey for FcbId {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// FCB が指すストリームオブジェクト
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamObject {
    /// パイプの読み取り端
    PipeReader(PipeId),
    /// パイプの書き込み端
    PipeWriter(PipeId),
    /// ソケット
    Socket(SocketId),
}

impl StreamObject {
    /// read 操作
    pub fn read(self, g: &mut KernelGuard<'_>, buf: &mut [u8]) -> KernelResult<usize> {
        match self {
            StreamObject::PipeReader(id) => pipe::read(g, id, buf),
            StreamObject::PipeWriter(_) => Err(FileError::NotSupported.into()),
            StreamObject::Socket(id) => socket::read(g, id, buf),
        }
    }

    /// write 操作
    pub fn write(self, g: &mut KernelGuard<'_>, data: &[u8]) -> KernelResult<usize> {
        match self {
            StreamObject::PipeReader(_) => Err(FileError::NotSupported.into()),
            StreamObject::PipeWriter(id) => pipe::write(g, id, data),
            StreamObject::Socket(id) => socket::write(g, id, data),
        }
    }

    /// close 操作（最後の FCB 参照が落ちたときに一度だけ呼ばれる）
    fn close(self, state: &mut KernelState) {
        match self {
            StreamObject::PipeReader(id) => pipe::close_reader(state, id),
            StreamObject::PipeWriter(id) => pipe::close_writer(state, id),
            StreamObject::Socket(id) => socket::close(state, id),
        }
    }
}

/// ファイル制御ブロック
#[derive(Debug)]
pub struct FileControlBlock {
    refcount: u32,
    stream: StreamObject,
}

/// `n` 個の空きディスクリプタを探す（まだ確保はしない）
///
/// 足りなければ何も変更せずに失敗する。呼び出し元は同じモニタ区間内で
/// `install` を呼ぶため、予約と割り当ての間に他者が割り込むことはない。
pub fn reserve(state: &KernelState, pid: Pid, n: usize) -> KernelResult<Vec<Fid>> {
    let pcb = state
        .processes
        .get(pid)
        .ok_or(ProcessError::NoSuchProcess)?;
    let free: Vec<Fid> = pcb
        .fidt
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(i, _)| Fid::new(i as u32))
        .take(n)
        .collect();
    if free.len() < n {
        return Err(FileError::ResourceExhausted.into());
    }
    Ok(free)
}

/// 予約済みスロットに新しい FCB を割り当てる
pub fn install(state: &mut KernelState, pid: Pid, fid: Fid, stream: StreamObject) -> KernelResult<FcbId> {
    let fcb = state.files.insert(FileControlBlock { refcount: 1, stream });
    let slot = state
        .processes
        .get_mut(pid)
        .ok_or(ProcessError::NoSuchProcess)?
        .fidt
        .get_mut(fid.as_usize())
        .ok_or(FileError::InvalidDescriptor)?;
    debug_assert!(slot.is_none(), "fid {} was not reserved", fid.as_usize());
    *slot = Some(fcb);
    Ok(fcb)
}

/// ディスクリプタから FCB とストリームを引く
pub fn lookup(state: &KernelState, pid: Pid, fid: Fid) -> KernelResult<(FcbId, StreamObject)> {
    let fcb = state
        .processes
        .get(pid)
        .and_then(|pcb| pcb.fidt.get(fid.as_usize()).copied().flatten())
        .ok_or(FileError::InvalidDescriptor)?;
    let stream = state
        .files
        .get(fcb)
        .ok_or(FileError::InvalidDescriptor)?
        .stream;
    Ok((fcb, stream))
}

pub(crate) fn incref(state: &mut KernelState, fcb: FcbId) {
    if let Some(block) = state.files.get_mut(fcb) {
        block.refcount += 1;
    }
}

pub(crate) fn decref(state: &mut KernelState, fcb: FcbId) {
    let Some(block) = state.files.get_mut(fcb) else {
        return;
    };
    block.refcount -= 1;
    if block.refcount == 0 {
        let stream = block.stream;
        state.files.remove(fcb);
        stream.close(state);
    }
}

/// ディスクリプタ経由の読み取り（FCB を呼び出し中ピン留めする）
pub fn read(g: &mut KernelGuard<'_>, pid: Pid, fid: Fid, buf: &mut [u8]) -> KernelResult<usize> {
    let (fcb, stream) = lookup(g, pid, fid)?;
    incref(g, fcb);
    let result = stream.read(g, buf);
    decref(g, fcb);
    result
}

/// ディスクリプタ経由の書き込み（FCB を呼び出し中ピン留めする）
pub fn write(g: &mut KernelGuard<'_>, pid: Pid, fid: Fid, data: &[u8]) -> KernelResult<usize> {
    let (fcb, stream) = lookup(g, pid, fid)?;
    incref(g, fcb);
    let result = stream.write(g, data);
    decref(g, fcb);
    result
}

/// ディスクリプタを閉じる
pub fn close(state: &mut KernelState, pid: Pid, fid: Fid) -> KernelResult<()> {
    let fcb = state
        .processes
        .get_mut(pid)
        .and_then(|pcb| pcb.fidt.get_mut(fid.as_usize()))
        .and_then(Option::take)
        .ok_or(FileError::InvalidDescriptor)?;
    decref(state, fcb);
    Ok(())
}

/// `newfid` を `oldfid` と同じ FCB を指すようにする
pub fn dup2(state: &mut KernelState, pid: Pid, oldfid: Fid, newfid: Fid) -> KernelResult<()> {
    let (fcb, _) = lookup(state, pid, oldfid)?;
    if oldfid == newfid {
        return Ok(());
    }
    let pcb = state
        .processes
        .get_mut(pid)
        .ok_or(ProcessError::NoSuchProcess)?;
    let slot = pcb
        .fidt
        .get_mut(newfid.as_usize())
        .ok_or(FileError::InvalidDescriptor)?;
    let previous = slot.replace(fcb);
    incref(state, fcb);
    if let Some(previous) = previous {
        decref(state, previous);
    }
    Ok(())
}

/// 親のディスクリプタテーブルを複製する（各 FCB の参照が増える）
pub(crate) fn inherit(state: &mut KernelState, parent: Pid, child: Pid) {
    let Some(table) = state.processes.get(parent).map(|pcb| pcb.fidt.clone()) else {
        return;
    };
    for fcb in table.iter().flatten() {
        incref(state, *fcb);
    }
    if let Some(pcb) = state.processes.get_mut(child) {
        pcb.fidt = table;
    }
}

/// すべてのディスクリプタを閉じる（プロセス終了処理）
pub(crate) fn close_all(state: &mut KernelState, pid: Pid) {
    let Some(pcb) = state.processes.get_mut(pid) else {
        return;
    };
    let open: Vec<FcbId> = pcb.fidt.iter_mut().filter_map(Option::take).collect();
    for fcb in open {
        decref(state, fcb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::error::KernelError;
    use crate::kernel::Kernel;
    use crate::task::process;

    #[test]
    fn test_reserve_fails_atomically() {
        let kernel = Kernel::new(KernelConfig::new().with_max_fileid(3));
        let mut g = kernel.enter();
        let pid = process::create_record(&mut g, None).unwrap();

        let fds = pipe::open(&mut g, pid).unwrap();
        assert_eq!(fds.read, Fid::new(0));
        assert_eq!(fds.write, Fid::new(1));
        // 残り 1 スロットでは 2 つ予約できない
        assert_eq!(
            pipe::open(&mut g, pid),
            Err(KernelError::File(FileError::ResourceExhausted))
        );
        assert_eq!(g.processes.get(pid).unwrap().fidt[2], None);
        assert_eq!(g.pipes.len(), 1);
    }

    #[test]
    fn test_close_invalid_descriptor() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let pid = process::create_record(&mut g, None).unwrap();
        assert_eq!(
            close(&mut g, pid, Fid::new(5)),
            Err(KernelError::File(FileError::InvalidDescriptor))
        );
        assert_eq!(
            close(&mut g, pid, Fid::new(99)),
            Err(KernelError::File(FileError::InvalidDescriptor))
        );
    }

    #[test]
    fn test_wrong_direction_is_not_supported() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let pid = process::create_record(&mut g, None).unwrap();
        let fds = pipe::open(&mut g, pid).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            read(&mut g, pid, fds.write, &mut buf),
            Err(KernelError::File(FileError::NotSupported))
        );
        assert_eq!(
            write(&mut g, pid, fds.read, b"x"),
            Err(KernelError::File(FileError::NotSupported))
        );
    }

    #[test]
    fn test_dup2_keeps_stream_open_until_last_close() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let pid = process::create_record(&mut g, None).unwrap();
        let fds = pipe::open(&mut g, pid).unwrap();
        let alias = Fid::new(7);
        dup2(&mut g, pid, fds.write, alias).unwrap();

        close(&mut g, pid, fds.write).unwrap();
        assert_eq!(write(&mut g, pid, alias, b"ok").unwrap(), 2);

        close(&mut g, pid, alias).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(read(&mut g, pid, fds.read, &mut buf).unwrap(), 2);
        assert_eq!(read(&mut g, pid, fds.read, &mut buf).unwrap(), 0);
    }
}
