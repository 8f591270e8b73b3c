// ============================================================================
// src/config.rs - カーネル構成
// ============================================================================
//!
//! モニタコアの静的パラメータ。
//!
//! すべての値はカーネル生成時に一度だけ決まり、以後は変更されない。

/// パイプバッファサイズ (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeBufferSize(usize);

impl PipeBufferSize {
    pub const DEFAULT: Self = Self(1024);
    pub const MIN: Self = Self(1);

    pub const fn new(size: usize) -> Self {
        Self(if size < Self::MIN.0 { Self::MIN.0 } else { size })
    }

    pub const fn as_usize(&self) -> usize {
        self.0
    }
}

/// カーネル構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// パイプのリングバッファ容量
    pub pipe_buffer_size: PipeBufferSize,
    /// プロセスあたりのファイルディスクリプタ数
    pub max_fileid: usize,
    /// 使用可能な最大ポート番号（1..=max_port）
    pub max_port: u16,
    /// プロセステーブルの最大エントリ数
    pub max_processes: usize,
}

impl KernelConfig {
    pub const DEFAULT_MAX_FILEID: usize = 16;
    pub const DEFAULT_MAX_PORT: u16 = 1023;
    pub const DEFAULT_MAX_PROCESSES: usize = 1024;

    pub const fn new() -> Self {
        Self {
            pipe_buffer_size: PipeBufferSize::DEFAULT,
            max_fileid: Self::DEFAULT_MAX_FILEID,
            max_port: Self::DEFAULT_MAX_PORT,
            max_processes: Self::DEFAULT_MAX_PROCESSES,
        }
    }

    pub const fn with_pipe_buffer_size(mut self, size: usize) -> Self {
        self.pipe_buffer_size = PipeBufferSize::new(size);
        self
    }

    pub const fn with_max_fileid(mut self, max_fileid: usize) -> Self {
        self.max_fileid = max_fileid;
        self
    }

    pub const fn with_max_port(mut self, max_port: u16) -> Self {
        self.max_port = max_port;
        self
    }

    pub const fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KernelConfig::default();
        assert_eq!(config.pipe_buffer_size.as_usize(), 1024);
        assert_eq!(config.max_fileid, 16);
        assert_eq!(config.max_port, 1023);
    }

    #[test]
    fn test_builder_clamps_pipe_size() {
        let config = KernelConfig::new().with_pipe_buffer_size(0).with_max_port(8);
        assert_eq!(config.pipe_buffer_size, PipeBufferSize::MIN);
        assert_eq!(config.max_port, 8);
    }
}
