// ============================================================================
// src/io/log.rs - Kernel Logging System using the `log` crate
// ============================================================================
//!
//! ホスト側ロガー。
//!
//! ## 機能
//! - `log`クレートを使用した標準的なログインターフェース
//! - 標準エラー出力への行単位の書き込み（カーネルスレッド名付き）
//! - コンパイル時のログレベル上限（`verbose_logging` で Trace まで）
//! - 実行時のログレベル変更
//!
//! ## 使用方法
//! ```no_run
//! rany_ipc::io::log::init().expect("logger already installed");
//! log::info!("システム起動");
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

// ============================================================================
// ログレベル定義
// ============================================================================

/// コンパイル時のログレベル（featureで変更可能）
#[cfg(feature = "verbose_logging")]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Trace;

#[cfg(not(feature = "verbose_logging"))]
const MAX_LOG_LEVEL: LevelFilter = LevelFilter::Info;

// ============================================================================
// ロガー状態管理
// ============================================================================

/// 現在のログレベル（実行時変更可能）
static CURRENT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LevelFilter::Info as u8);

// ============================================================================
// ロガー実装
// ============================================================================

/// カーネル用ロガー
struct KernelLogger;

impl KernelLogger {
    /// ログレベルのプレフィックスを取得
    fn level_prefix(level: Level) -> &'static str {
        match level {
            Level::Error => "[ERROR] ",
            Level::Warn => "[WARN]  ",
            Level::Info => "[INFO]  ",
            Level::Debug => "[DEBUG] ",
            Level::Trace => "[TRACE] ",
        }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= current_log_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let thread = std::thread::current();
        let mut line = String::from(Self::level_prefix(record.level()));
        if let Some(name) = thread.name() {
            line.push('<');
            line.push_str(name);
            line.push_str("> ");
        }
        if let Some(module) = record.module_path() {
            line.push('[');
            line.push_str(module);
            line.push_str("] ");
        }
        line.push_str(&record.args().to_string());
        line.push('\n');

        // 1行を1回で書き、スレッド間で行が混ざらないようにする
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// グローバルロガーインスタンス
static LOGGER: KernelLogger = KernelLogger;

// ============================================================================
// 公開API
// ============================================================================

/// ロギングシステムを初期化
///
/// 他のロガーが既に登録されていればエラー。
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    set_log_level(MAX_LOG_LEVEL);
    Ok(())
}

/// 実行時にログレベルを変更（コンパイル時の上限を超えない）
pub fn set_log_level(level: LevelFilter) {
    let level = level.min(MAX_LOG_LEVEL);
    CURRENT_LOG_LEVEL.store(level as u8, Ordering::SeqCst);
    log::set_max_level(level);
}

/// 現在のログレベルを取得
pub fn current_log_level() -> LevelFilter {
    LevelFilter::iter()
        .nth(CURRENT_LOG_LEVEL.load(Ordering::Relaxed) as usize)
        .unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_capped_at_compile_time_maximum() {
        set_log_level(LevelFilter::Trace);
        assert_eq!(current_log_level(), MAX_LOG_LEVEL);
        set_log_level(LevelFilter::Warn);
        assert_eq!(current_log_level(), LevelFilter::Warn);
        set_log_level(MAX_LOG_LEVEL);
    }

    #[test]
    fn test_level_prefix() {
        assert_eq!(KernelLogger::level_prefix(Level::Error), "[ERROR] ");
        assert_eq!(KernelLogger::level_prefix(Level::Trace), "[TRACE] ");
    }
}
