//! 統一エラーハンドリングモジュール
//!
//! モニタコア全体で使用される統一エラー型を定義し、
//! 各サブシステムのエラーから変換を提供します。
//!
//! すべての操作は同期的に失敗を呼び出し元へ返す。
//! モニタ境界を越えてパニックが伝播することはない。

use core::fmt;

/// カーネル全体の統一エラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// ファイルディスクリプタ関連エラー
    File(FileError),
    /// パイプ関連エラー
    Pipe(PipeError),
    /// ソケット関連エラー
    Socket(SocketError),
    /// スレッド関連エラー
    Thread(ThreadError),
    /// プロセス関連エラー
    Process(ProcessError),
}

/// ファイルディスクリプタ関連エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileError {
    /// 無効なファイルディスクリプタ
    InvalidDescriptor,
    /// 空きディスクリプタスロットがない
    ResourceExhausted,
    /// このストリームではサポートされない操作
    NotSupported,
}

/// パイプ関連エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// 読み取り端が閉じている（または書き込み端が既に閉じている）
    BrokenPipe,
    /// 読み取り端が既に閉じている
    ReaderClosed,
}

/// ソケット関連エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketError {
    /// ポートが範囲外、未指定、または既にリスナーが登録済み
    InvalidPort,
    /// 接続先ポートにリスナーがいない
    NoListener,
    /// ソケットが Unbound 状態ではない
    NotUnbound,
    /// ソケットがリスナーではない
    NotListener,
    /// ソケットが Peer 状態ではない
    NotConnected,
    /// Connect のタイムアウト
    Timeout,
    /// リスナーが閉じられた
    ListenerClosed,
}

/// スレッド関連エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// 呼び出し元プロセスに存在しないスレッド
    InvalidThread,
    /// 自分自身への Join
    SelfJoin,
    /// 既にデタッチ済み
    AlreadyDetached,
    /// 既に終了済み
    AlreadyExited,
    /// カーネルスレッド以外からの呼び出し
    NotKernelThread,
    /// ホストスレッドを起動できなかった
    SpawnFailed,
}

/// プロセス関連エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// プロセスが見つからない
    NoSuchProcess,
    /// 待機できる子プロセスがない
    NoChildren,
    /// プロセステーブルがいっぱい
    ProcessTableFull,
}

impl KernelError {
    /// 呼び出し規約上のステータスコード（常に負）
    pub const fn status(&self) -> i32 {
        match self {
            KernelError::File(FileError::InvalidDescriptor) => -1,
            KernelError::File(FileError::ResourceExhausted) => -2,
            KernelError::File(FileError::NotSupported) => -3,
            KernelError::Pipe(PipeError::BrokenPipe) => -10,
            KernelError::Pipe(PipeError::ReaderClosed) => -11,
            KernelError::Socket(SocketError::InvalidPort) => -20,
            KernelError::Socket(SocketError::NoListener) => -21,
            KernelError::Socket(SocketError::NotUnbound) => -22,
            KernelError::Socket(SocketError::NotListener) => -23,
            KernelError::Socket(SocketError::NotConnected) => -24,
            KernelError::Socket(SocketError::Timeout) => -25,
            KernelError::Socket(SocketError::ListenerClosed) => -26,
            KernelError::Thread(ThreadError::InvalidThread) => -30,
            KernelError::Thread(ThreadError::SelfJoin) => -31,
            KernelError::Thread(ThreadError::AlreadyDetached) => -32,
            KernelError::Thread(ThreadError::AlreadyExited) => -33,
            KernelError::Thread(ThreadError::NotKernelThread) => -34,
            KernelError::Thread(ThreadError::SpawnFailed) => -35,
            KernelError::Process(ProcessError::NoSuchProcess) => -40,
            KernelError::Process(ProcessError::NoChildren) => -41,
            KernelError::Process(ProcessError::ProcessTableFull) => -42,
        }
    }
}

// ===== Display implementations =====

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::File(e) => write!(f, "File error: {}", e),
            KernelError::Pipe(e) => write!(f, "Pipe error: {}", e),
            KernelError::Socket(e) => write!(f, "Socket error: {}", e),
            KernelError::Thread(e) => write!(f, "Thread error: {}", e),
            KernelError::Process(e) => write!(f, "Process error: {}", e),
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::InvalidDescriptor => write!(f, "invalid descriptor"),
            FileError::ResourceExhausted => write!(f, "no free descriptor slot"),
            FileError::NotSupported => write!(f, "operation not supported"),
        }
    }
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::BrokenPipe => write!(f, "broken pipe"),
            PipeError::ReaderClosed => write!(f, "read end closed"),
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketError::InvalidPort => write!(f, "invalid port"),
            SocketError::NoListener => write!(f, "no listener on port"),
            SocketError::NotUnbound => write!(f, "socket is not unbound"),
            SocketError::NotListener => write!(f, "socket is not a listener"),
            SocketError::NotConnected => write!(f, "socket is not connected"),
            SocketError::Timeout => write!(f, "connect timed out"),
            SocketError::ListenerClosed => write!(f, "listener closed"),
        }
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::InvalidThread => write!(f, "invalid thread"),
            ThreadError::SelfJoin => write!(f, "thread cannot join itself"),
            ThreadError::AlreadyDetached => write!(f, "thread already detached"),
            ThreadError::AlreadyExited => write!(f, "thread already exited"),
            ThreadError::NotKernelThread => write!(f, "caller is not a kernel thread"),
            ThreadError::SpawnFailed => write!(f, "failed to start host thread"),
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::NoSuchProcess => write!(f, "no such process"),
            ProcessError::NoChildren => write!(f, "no child to wait for"),
            ProcessError::ProcessTableFull => write!(f, "process table full"),
        }
    }
}

impl std::error::Error for KernelError {}

// ===== From implementations for sub-errors =====

impl From<FileError> for KernelError {
    fn from(e: FileError) -> Self {
        KernelError::File(e)
    }
}

impl From<PipeError> for KernelError {
    fn from(e: PipeError) -> Self {
        KernelError::Pipe(e)
    }
}

impl From<SocketError> for KernelError {
    fn from(e: SocketError) -> Self {
        KernelError::Socket(e)
    }
}

impl From<ThreadError> for KernelError {
    fn from(e: ThreadError) -> Self {
        KernelError::Thread(e)
    }
}

impl From<ProcessError> for KernelError {
    fn from(e: ProcessError) -> Self {
        KernelError::Process(e)
    }
}

// ===== Result type alias =====

/// カーネルの結果型エイリアス
pub type KernelResult<T> = Result<T, KernelError>;

// ===== Error extension trait =====

/// エラーに追加情報を付加するためのトレイト
pub trait ErrorContext<T> {
    /// エラーにコンテキスト情報を追加
    fn context(self, ctx: &'static str) -> Result<T, ContextualError>;
}

/// コンテキスト付きエラー
#[derive(Debug)]
pub struct ContextualError {
    pub error: KernelError,
    pub context: &'static str,
}

impl<T, E: Into<KernelError>> ErrorContext<T> for Result<T, E> {
    fn context(self, ctx: &'static str) -> Result<T, ContextualError> {
        self.map_err(|e| ContextualError {
            error: e.into(),
            context: ctx,
        })
    }
}

impl fmt::Display for ContextualError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.error)
    }
}

impl std::error::Error for ContextualError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let pipe_err = PipeError::BrokenPipe;
        let kernel_err: KernelError = pipe_err.into();
        assert!(matches!(
            kernel_err,
            KernelError::Pipe(PipeError::BrokenPipe)
        ));
    }

    #[test]
    fn test_error_display() {
        let err = KernelError::Socket(SocketError::ListenerClosed);
        assert_eq!(format!("{}", err), "Socket error: listener closed");
    }

    #[test]
    fn test_status_codes_are_negative() {
        let errors = [
            KernelError::File(FileError::InvalidDescriptor),
            KernelError::Pipe(PipeError::BrokenPipe),
            KernelError::Socket(SocketError::Timeout),
            KernelError::Thread(ThreadError::SelfJoin),
            KernelError::Process(ProcessError::NoChildren),
        ];
        for err in errors {
            assert!(err.status() < 0, "{} should map to a failure status", err);
        }
    }

    #[test]
    fn test_context_wraps_error() {
        let result: Result<(), ThreadError> = Err(ThreadError::AlreadyExited);
        let err = result.context("detach").unwrap_err();
        assert_eq!(err.error, KernelError::Thread(ThreadError::AlreadyExited));
        assert_eq!(format!("{}", err), "detach: Thread error: thread already exited");
    }
}
