// ============================================================================
// src/net/port.rs - ポート番号とリスナー登録表
// ============================================================================
//!
//! ポートごとに高々一つのリスナーを登録する表。
//! カーネル状態の一部としてモニタロックの内側でのみ変更される。

use hashbrown::HashMap;

use super::socket::SocketId;

/// ポート番号
///
/// 0 は「ポートなし」を表すため、正当なポートは `1..=max_port`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Port(pub u16);

impl Port {
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 構成された範囲内かどうか
    pub const fn is_legal(self, max_port: u16) -> bool {
        self.0 >= 1 && self.0 <= max_port
    }
}

/// ポート → リスナーソケット
#[derive(Default)]
pub struct PortMap {
    listeners: HashMap<Port, SocketId>,
}

impl PortMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// ポートに登録されているリスナー
    pub fn listener(&self, port: Port) -> Option<SocketId> {
        self.listeners.get(&port).copied()
    }

    pub fn is_bound(&self, port: Port) -> bool {
        self.listeners.contains_key(&port)
    }

    /// 登録（既に登録済みなら false を返し何もしない）
    pub fn register(&mut self, port: Port, socket: SocketId) -> bool {
        if self.is_bound(port) {
            return false;
        }
        self.listeners.insert(port, socket);
        true
    }

    /// `socket` が登録者である場合に限り登録を外す
    pub fn unregister(&mut self, port: Port, socket: SocketId) {
        if self.listener(port) == Some(socket) {
            self.listeners.remove(&port);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::ArenaKey;

    #[test]
    fn test_port_range() {
        assert!(!Port::new(0).is_legal(1023));
        assert!(Port::new(1).is_legal(1023));
        assert!(Port::new(1023).is_legal(1023));
        assert!(!Port::new(1024).is_legal(1023));
    }

    #[test]
    fn test_one_listener_per_port() {
        let mut map = PortMap::new();
        let a = SocketId::from_raw(1);
        let b = SocketId::from_raw(2);
        assert!(map.register(Port::new(80), a));
        assert!(!map.register(Port::new(80), b));
        // 登録者以外は外せない
        map.unregister(Port::new(80), b);
        assert_eq!(map.listener(Port::new(80)), Some(a));
        map.unregister(Port::new(80), a);
        assert!(map.is_empty());
    }
}
