// ============================================================================
// src/sync/arena.rs - ハンドル指向レコードアリーナ
// ============================================================================
//!
//! パイプ・ソケット・接続要求・スレッドレコードはすべてアリーナに格納され、
//! 不透明なハンドルで参照される。
//!
//! ハンドルは単調増加で再利用されないため、解放済みレコードへの参照は
//! 別レコードに化けることなく「存在しない」として観測される。
//! アリーナ自体はモニタロックの内側でのみ操作される。

use core::hash::Hash;

use hashbrown::HashMap;

/// アリーナのキーとして使えるハンドル型
pub trait ArenaKey: Copy + Eq + Hash {
    fn from_raw(raw: u64) -> Self;
}

/// レコードアリーナ
pub struct Arena<K: ArenaKey, V> {
    slots: HashMap<K, V>,
    next: u64,
}

impl<K: ArenaKey, V> Arena<K, V> {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// 最初に払い出すハンドル値を指定して作成
    pub fn starting_at(first: u64) -> Self {
        Self {
            slots: HashMap::new(),
            next: first,
        }
    }

    /// 次に払い出されるハンドル（まだ確保はしない）
    pub fn peek_key(&self) -> K {
        K::from_raw(self.next)
    }

    /// レコードを格納してハンドルを返す
    pub fn insert(&mut self, value: V) -> K {
        self.insert_with(|_| value)
    }

    /// ハンドルを受け取ってレコードを構築・格納する
    pub fn insert_with(&mut self, build: impl FnOnce(K) -> V) -> K {
        let key = K::from_raw(self.next);
        self.next += 1;
        self.slots.insert(key, build(key));
        key
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(&key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut V> {
        self.slots.get_mut(&key)
    }

    pub fn contains(&self, key: K) -> bool {
        self.slots.contains_key(&key)
    }

    /// レコードを解放する
    pub fn remove(&mut self, key: K) -> Option<V> {
        self.slots.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.slots.values()
    }
}

impl<K: ArenaKey, V> Default for Arena<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    struct Handle(u64);

    impl ArenaKey for Handle {
        fn from_raw(raw: u64) -> Self {
            Handle(raw)
        }
    }

    #[test]
    fn test_handles_are_never_reused() {
        let mut arena: Arena<Handle, &str> = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_insert_with_sees_own_key() {
        let mut arena: Arena<Handle, Handle> = Arena::starting_at(10);
        assert_eq!(arena.peek_key(), Handle(10));
        let key = arena.insert_with(|k| k);
        assert_eq!(arena.get(key), Some(&Handle(10)));
        assert_eq!(arena.len(), 1);
    }
}
