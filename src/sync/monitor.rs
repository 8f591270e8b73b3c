// ============================================================================
// src/sync/monitor.rs - カーネルモニタ
//
// パイプ・ソケット・スレッドライフサイクルはすべて単一のモニタロックの
// 内側で実行される。条件変数での待機はロックを原子的に解放し、
// 起床時に再取得する。
//
// 起床は broadcast（全員起床・順序保証なし）と見せかけの起床を許容するため、
// すべての待機は述語を再評価するループの中に置くこと。
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

/// モニタ
///
/// 保護されたデータへのアクセスは `enter()` が返すガード経由のみ。
pub struct Monitor<T> {
    lock: Mutex<T>,
}

/// モニタガード（モニタ内部にいることの証明）
pub type MonitorGuard<'a, T> = MutexGuard<'a, T>;

impl<T> Monitor<T> {
    /// 新しいモニタを作成
    pub fn new(data: T) -> Self {
        Self {
            lock: Mutex::new(data),
        }
    }

    /// モニタに入る
    pub fn enter(&self) -> MonitorGuard<'_, T> {
        self.lock.lock()
    }
}

/// 時限待機の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// broadcast（または見せかけの起床）で起きた
    Woken,
    /// 期限切れ
    TimedOut,
}

/// 条件変数
///
/// 待機理由ごとに一つ用意する（`has_space`, `has_data`, 接続承認, スレッド終了 ...）。
/// レコードが解放されても待機中のスレッドが参照し続けられるよう `Arc` で共有する。
/// 待機前に `clone()` してからレコードへの借用を手放すこと。
#[derive(Clone, Default)]
pub struct CondVar(Arc<Condvar>);

impl CondVar {
    pub fn new() -> Self {
        Self(Arc::new(Condvar::new()))
    }

    /// ロックを解放して待機し、起床時に再取得する
    pub fn wait<T>(&self, guard: &mut MonitorGuard<'_, T>) {
        #[cfg(feature = "verbose_logging")]
        log::trace!("monitor: wait on {:p}", Arc::as_ptr(&self.0));
        self.0.wait(guard);
    }

    /// 期限付き待機
    pub fn wait_until<T>(&self, guard: &mut MonitorGuard<'_, T>, deadline: Instant) -> WaitOutcome {
        #[cfg(feature = "verbose_logging")]
        log::trace!("monitor: timed wait on {:p}", Arc::as_ptr(&self.0));
        if self.0.wait_until(guard, deadline).timed_out() {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Woken
        }
    }

    /// 待機中の全スレッドを起床させる
    pub fn broadcast(&self) -> usize {
        self.0.notify_all()
    }
}

impl core::fmt::Debug for CondVar {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("CondVar").field(&Arc::as_ptr(&self.0)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timed_wait_expires() {
        let monitor = Monitor::new(false);
        let cv = CondVar::new();
        let mut guard = monitor.enter();
        let deadline = Instant::now() + Duration::from_millis(20);
        let mut outcome = WaitOutcome::Woken;
        while !*guard {
            outcome = cv.wait_until(&mut guard, deadline);
            if outcome == WaitOutcome::TimedOut {
                break;
            }
        }
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }

    #[test]
    fn test_broadcast_wakes_predicate_loop() {
        let monitor = Arc::new(Monitor::new(0u32));
        let cv = CondVar::new();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                let cv = cv.clone();
                thread::spawn(move || {
                    let mut guard = monitor.enter();
                    while *guard == 0 {
                        cv.wait(&mut guard);
                    }
                    *guard
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(10));
        {
            let mut guard = monitor.enter();
            *guard = 7;
            cv.broadcast();
        }

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 7);
        }
    }
}
