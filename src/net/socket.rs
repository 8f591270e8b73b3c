// ============================================================================
// src/net/socket.rs - パイプ対によるストリームソケット
// ============================================================================
//!
//! # ソケット層
//!
//! 参照カウント付きのソケット制御ブロック (SCB) と、その状態機械。
//!
//! ## 状態遷移（一方向のみ）
//! - `Unbound → Listener` : Listen
//! - `Unbound → Peer`     : Connect / Accept のハンドシェイク完了
//!
//! Peer は交差した2本のパイプそのもの。Listener は接続要求の FIFO
//! （ランデブーキュー）を持ち、ポート表に高々一つ登録される。
//!
//! ## 参照カウント
//! - 生成 (+1)、Accept 中のピン留め (+1)、Connect 中のピン留め (+1)
//! - Close (−1)、ピン解除 (−1)。0 で解放。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bitflags::bitflags;

use super::port::Port;
use crate::error::{FileError, KernelResult, SocketError};
use crate::fs::fcb::{self, Fid, StreamObject};
use crate::ipc::pipe::{self, PipeId};
use crate::kernel::{KernelGuard, KernelState};
use crate::sync::{ArenaKey, CondVar, WaitOutcome};
use crate::task::process::Pid;

// ============================================================================
// Type-Safe Identifiers (Newtype Pattern)
// ============================================================================

/// ソケットID
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SocketId(u64);

impl SocketId {
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl ArenaKey for SocketId {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// 接続要求ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl ArenaKey for RequestId {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

bitflags! {
    /// シャットダウンモード
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShutdownMode: u8 {
        /// 読み取りをシャットダウン
        const READ = 0b01;
        /// 書き込みをシャットダウン
        const WRITE = 0b10;
        /// 両方をシャットダウン
        const BOTH = Self::READ.bits() | Self::WRITE.bits();
    }
}

// ============================================================================
// Socket State Machine
// ============================================================================

/// ソケットタイプ（観測用）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketType {
    Unbound,
    Listener,
    Peer,
}

/// リスナー固有の状態
pub struct ListenerSocket {
    /// 保留中の接続要求（FIFO）
    queue: VecDeque<RequestId>,
    /// 要求到着 / リスナー破棄の通知
    req_available: CondVar,
}

/// 接続済みソケット固有の状態
pub struct PeerSocket {
    /// 相手側ソケット
    peer: SocketId,
    /// 自分が書き込むパイプ（相手の read_pipe）
    write_pipe: PipeId,
    /// 自分が読み取るパイプ（相手の write_pipe）
    read_pipe: PipeId,
}

pub enum SocketKind {
    Unbound,
    Listener(ListenerSocket),
    Peer(PeerSocket),
}

/// ソケット制御ブロック
pub struct SocketControlBlock {
    refcount: u32,
    /// 所有ディスクリプタがまだ開いているか
    fcb_open: bool,
    port: Option<Port>,
    kind: SocketKind,
}

impl SocketControlBlock {
    pub fn socket_type(&self) -> SocketType {
        match self.kind {
            SocketKind::Unbound => SocketType::Unbound,
            SocketKind::Listener(_) => SocketType::Listener,
            SocketKind::Peer(_) => SocketType::Peer,
        }
    }

    /// 接続相手（Peer のときのみ）
    pub fn peer(&self) -> Option<SocketId> {
        match &self.kind {
            SocketKind::Peer(peer) => Some(peer.peer),
            _ => None,
        }
    }
}

/// 接続要求の承認状態
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Admission {
    Pending,
    Admitted,
    Refused,
}

/// 接続要求（Connect が待機している間だけ存在する）
pub struct ConnectionRequest {
    admission: Admission,
    /// 接続を要求しているソケット
    peer: SocketId,
    connected_cv: CondVar,
}

// ============================================================================
// Internal helpers
// ============================================================================

fn new_socket(state: &mut KernelState, port: Option<Port>) -> SocketId {
    state.sockets.insert(SocketControlBlock {
        refcount: 1,
        fcb_open: true,
        port,
        kind: SocketKind::Unbound,
    })
}

fn incref(state: &mut KernelState, sid: SocketId) {
    if let Some(scb) = state.sockets.get_mut(sid) {
        scb.refcount += 1;
    }
}

fn decref(state: &mut KernelState, sid: SocketId) {
    let Some(scb) = state.sockets.get_mut(sid) else {
        return;
    };
    scb.refcount -= 1;
    if scb.refcount == 0 {
        state.sockets.remove(sid);
        log::trace!("socket {} released", sid.as_u64());
    }
}

fn socket_of(state: &KernelState, pid: Pid, fid: Fid) -> KernelResult<SocketId> {
    match fcb::lookup(state, pid, fid)? {
        (_, StreamObject::Socket(sid)) => Ok(sid),
        _ => Err(FileError::InvalidDescriptor.into()),
    }
}

fn kind_of(state: &KernelState, sid: SocketId) -> Option<SocketType> {
    state.sockets.get(sid).map(SocketControlBlock::socket_type)
}

/// 2本の新しいパイプを交差させて `a` と `b` を接続する
fn connect_peers(state: &mut KernelState, a: SocketId, b: SocketId) {
    // b → a
    let pipe1 = pipe::create(state);
    // a → b
    let pipe2 = pipe::create(state);
    if let Some(scb) = state.sockets.get_mut(a) {
        scb.kind = SocketKind::Peer(PeerSocket {
            peer: b,
            write_pipe: pipe2,
            read_pipe: pipe1,
        });
    }
    if let Some(scb) = state.sockets.get_mut(b) {
        scb.kind = SocketKind::Peer(PeerSocket {
            peer: a,
            write_pipe: pipe1,
            read_pipe: pipe2,
        });
    }
}

/// Peer の両方向を閉じる（既に閉じている方向は何もしない）
fn close_peer_ends(state: &mut KernelState, sid: SocketId) {
    let Some(SocketKind::Peer(peer)) = state.sockets.get(sid).map(|s| &s.kind) else {
        return;
    };
    let (write_pipe, read_pipe) = (peer.write_pipe, peer.read_pipe);
    pipe::close_writer(state, write_pipe);
    pipe::close_reader(state, read_pipe);
}

/// 保留中の要求を拒否し、待機中の Connect を起こす
fn refuse(state: &mut KernelState, req: RequestId) {
    if let Some(request) = state.requests.get_mut(req) {
        if request.admission == Admission::Pending {
            request.admission = Admission::Refused;
            request.connected_cv.broadcast();
        }
    }
}

// ============================================================================
// Socket API
// ============================================================================

/// `Socket(port)`: Unbound ソケットを作成する
pub fn socket(state: &mut KernelState, pid: Pid, port: Option<Port>) -> KernelResult<Fid> {
    if let Some(port) = port {
        if !port.is_legal(state.config.max_port) {
            return Err(SocketError::InvalidPort.into());
        }
    }
    let fid = fcb::reserve(state, pid, 1)?[0];
    let sid = new_socket(state, port);
    fcb::install(state, pid, fid, StreamObject::Socket(sid))?;
    Ok(fid)
}

/// `Listen(fid)`: Unbound → Listener
pub fn listen(state: &mut KernelState, pid: Pid, fid: Fid) -> KernelResult<()> {
    let sid = socket_of(state, pid, fid)?;
    let scb = state
        .sockets
        .get(sid)
        .ok_or(FileError::InvalidDescriptor)?;
    if scb.socket_type() != SocketType::Unbound {
        return Err(SocketError::NotUnbound.into());
    }
    let port = scb.port.ok_or(SocketError::InvalidPort)?;
    if !state.ports.register(port, sid) {
        return Err(SocketError::InvalidPort.into());
    }
    if let Some(scb) = state.sockets.get_mut(sid) {
        scb.kind = SocketKind::Listener(ListenerSocket {
            queue: VecDeque::new(),
            req_available: CondVar::new(),
        });
    }
    log::debug!("socket {} listening on port {}", sid.as_u64(), port.as_u16());
    Ok(())
}

/// `Accept(fid)`: 接続要求を一つ受け付け、新しい Peer ディスクリプタを返す
///
/// 要求が来るまで待機する。待機中にリスナーが閉じられると ListenerClosed。
pub fn accept(g: &mut KernelGuard<'_>, pid: Pid, lfid: Fid) -> KernelResult<Fid> {
    let lsid = socket_of(g, pid, lfid)?;
    if kind_of(g, lsid) != Some(SocketType::Listener) {
        return Err(SocketError::NotListener.into());
    }
    incref(g, lsid);
    let result = accept_pinned(g, pid, lsid);
    decref(g, lsid);
    result
}

fn wait_for_request(g: &mut KernelGuard<'_>, lsid: SocketId) -> KernelResult<RequestId> {
    loop {
        let scb = g
            .sockets
            .get_mut(lsid)
            .ok_or(SocketError::ListenerClosed)?;
        if !scb.fcb_open {
            return Err(SocketError::ListenerClosed.into());
        }
        let SocketKind::Listener(listener) = &mut scb.kind else {
            return Err(SocketError::ListenerClosed.into());
        };
        if let Some(req) = listener.queue.pop_front() {
            return Ok(req);
        }
        let req_available = listener.req_available.clone();
        req_available.wait(g);
    }
}

fn accept_pinned(g: &mut KernelGuard<'_>, pid: Pid, lsid: SocketId) -> KernelResult<Fid> {
    loop {
        let req = wait_for_request(g, lsid)?;
        let Some(client) = g.requests.get(req).map(|r| r.peer) else {
            continue;
        };
        // 待機中に要求元が Listen などで状態を変えた
        if kind_of(g, client) != Some(SocketType::Unbound) {
            refuse(g, req);
            continue;
        }

        let fid = match fcb::reserve(g, pid, 1) {
            Ok(fids) => fids[0],
            Err(e) => {
                // 要求は列の先頭に戻し、次の Accept に委ねる
                if let Some(SocketKind::Listener(listener)) =
                    g.sockets.get_mut(lsid).map(|s| &mut s.kind)
                {
                    listener.queue.push_front(req);
                }
                return Err(e);
            }
        };
        let server = new_socket(g, None);
        fcb::install(g, pid, fid, StreamObject::Socket(server))?;
        connect_peers(g, server, client);

        // 要求元のディスクリプタは待機中に閉じられている可能性がある
        if !g.sockets.get(client).is_some_and(|s| s.fcb_open) {
            close_peer_ends(g, client);
        }

        if let Some(request) = g.requests.get_mut(req) {
            request.admission = Admission::Admitted;
            request.connected_cv.broadcast();
        }
        log::debug!(
            "socket {} accepted: peer {} <-> {}",
            lsid.as_u64(),
            server.as_u64(),
            client.as_u64()
        );
        return Ok(fid);
    }
}

/// `Connect(fid, port, timeout)`: リスナーに接続要求を出して承認を待つ
///
/// `timeout` が `None` なら承認か拒否まで待つ。
pub fn connect(
    g: &mut KernelGuard<'_>,
    pid: Pid,
    fid: Fid,
    port: Port,
    timeout: Option<Duration>,
) -> KernelResult<()> {
    let sid = socket_of(g, pid, fid)?;
    if kind_of(g, sid) != Some(SocketType::Unbound) {
        return Err(SocketError::NotUnbound.into());
    }
    if !port.is_legal(g.config.max_port) {
        return Err(SocketError::InvalidPort.into());
    }
    let lsid = g.ports.listener(port).ok_or(SocketError::NoListener)?;

    incref(g, sid);
    let connected_cv = CondVar::new();
    let req = g.requests.insert(ConnectionRequest {
        admission: Admission::Pending,
        peer: sid,
        connected_cv: connected_cv.clone(),
    });
    let queued = match g.sockets.get_mut(lsid).map(|s| &mut s.kind) {
        Some(SocketKind::Listener(listener)) => {
            listener.queue.push_back(req);
            listener.req_available.broadcast();
            true
        }
        _ => false,
    };
    if !queued {
        refuse(g, req);
    }

    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let admission = loop {
        let admission = g
            .requests
            .get(req)
            .map_or(Admission::Refused, |r| r.admission);
        if admission != Admission::Pending {
            break admission;
        }
        match deadline {
            Some(deadline) => {
                if connected_cv.wait_until(g, deadline) == WaitOutcome::TimedOut {
                    break g
                        .requests
                        .get(req)
                        .map_or(Admission::Refused, |r| r.admission);
                }
            }
            None => connected_cv.wait(g),
        }
    };

    g.requests.remove(req);
    if admission == Admission::Pending {
        // タイムアウトした要求を Accept に拾わせない
        if let Some(SocketKind::Listener(listener)) = g.sockets.get_mut(lsid).map(|s| &mut s.kind) {
            listener.queue.retain(|queued| *queued != req);
        }
    }
    decref(g, sid);

    log::debug!(
        "socket {} connect to port {}: {:?}",
        sid.as_u64(),
        port.as_u16(),
        admission
    );
    match admission {
        Admission::Admitted => Ok(()),
        Admission::Refused => Err(SocketError::ListenerClosed.into()),
        Admission::Pending => Err(SocketError::Timeout.into()),
    }
}

/// `ShutDown(fid, mode)`: Peer の片方向または両方向を閉じる
pub fn shutdown(state: &mut KernelState, pid: Pid, fid: Fid, mode: ShutdownMode) -> KernelResult<()> {
    let sid = socket_of(state, pid, fid)?;
    let Some(SocketKind::Peer(peer)) = state.sockets.get(sid).map(|s| &s.kind) else {
        return Err(SocketError::NotConnected.into());
    };
    let (write_pipe, read_pipe) = (peer.write_pipe, peer.read_pipe);
    if mode.contains(ShutdownMode::READ) {
        pipe::close_reader(state, read_pipe);
    }
    if mode.contains(ShutdownMode::WRITE) {
        pipe::close_writer(state, write_pipe);
    }
    Ok(())
}

/// ソケットの read 操作（Peer の読み取りパイプへ委譲）
pub(crate) fn read(g: &mut KernelGuard<'_>, sid: SocketId, buf: &mut [u8]) -> KernelResult<usize> {
    let read_pipe = match g.sockets.get(sid).map(|s| &s.kind) {
        Some(SocketKind::Peer(peer)) => peer.read_pipe,
        _ => return Err(SocketError::NotConnected.into()),
    };
    pipe::read(g, read_pipe, buf)
}

/// ソケットの write 操作（Peer の書き込みパイプへ委譲）
pub(crate) fn write(g: &mut KernelGuard<'_>, sid: SocketId, data: &[u8]) -> KernelResult<usize> {
    let write_pipe = match g.sockets.get(sid).map(|s| &s.kind) {
        Some(SocketKind::Peer(peer)) => peer.write_pipe,
        _ => return Err(SocketError::NotConnected.into()),
    };
    pipe::write(g, write_pipe, data)
}

/// 破棄内容（SCB への借用を手放してから実行する）
enum Teardown {
    Listener {
        port: Option<Port>,
        queued: Vec<RequestId>,
        req_available: CondVar,
    },
    Peer,
    Unbound,
}

/// ソケットの close 操作（最後の FCB 参照が落ちたとき）
///
/// - Listener: ポート登録を外し、保留中の要求をすべて拒否し、Accept を起こす
/// - Peer: 開いている方向をすべて閉じる
pub(crate) fn close(state: &mut KernelState, sid: SocketId) {
    let Some(scb) = state.sockets.get_mut(sid) else {
        return;
    };
    scb.fcb_open = false;
    let port = scb.port;
    let teardown = match &mut scb.kind {
        SocketKind::Listener(listener) => Teardown::Listener {
            port,
            queued: listener.queue.drain(..).collect(),
            req_available: listener.req_available.clone(),
        },
        SocketKind::Peer(_) => Teardown::Peer,
        SocketKind::Unbound => Teardown::Unbound,
    };

    match teardown {
        Teardown::Listener {
            port,
            queued,
            req_available,
        } => {
            if let Some(port) = port {
                state.ports.unregister(port, sid);
            }
            let refused = queued.len();
            for req in queued {
                refuse(state, req);
            }
            req_available.broadcast();
            log::debug!(
                "listener {} closed, {} pending request(s) refused",
                sid.as_u64(),
                refused
            );
        }
        Teardown::Peer => close_peer_ends(state, sid),
        Teardown::Unbound => {}
    }
    decref(state, sid);
}
