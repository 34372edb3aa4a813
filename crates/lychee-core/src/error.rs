//! 统一错误类型定义.
//!
//! 所有 Lychee crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// Lychee 统一错误类型
#[derive(Debug, Error)]
pub enum LycheeError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 编解码器错误
    #[error("编解码器错误: {0}")]
    Codec(String),

    /// 容器格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 操作被中断 (队列中止或播放器关闭)
    #[error("操作已中止")]
    Aborted,

    /// 未找到指定的编解码器
    #[error("未找到编解码器: {0}")]
    CodecNotFound(String),

    /// 未找到指定的容器格式
    #[error("未找到容器格式: {0}")]
    FormatNotFound(String),

    /// 未找到指定的流
    #[error("未找到流: 索引 {0}")]
    StreamNotFound(usize),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 音视频输出设备错误
    #[error("输出设备错误: {0}")]
    Device(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

impl LycheeError {
    /// 是否为流结束信号 (包括底层 I/O 的 UnexpectedEof)
    pub fn is_eof(&self) -> bool {
        match self {
            Self::Eof => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// 是否为可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NeedMoreData => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Lychee 统一 Result 类型
pub type LycheeResult<T> = Result<T, LycheeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_eof_分类() {
        assert!(LycheeError::Eof.is_eof());
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(LycheeError::from(io).is_eof());
        assert!(!LycheeError::Aborted.is_eof());
    }

    #[test]
    fn test_error_瞬时错误() {
        let io = std::io::Error::new(std::io::ErrorKind::WouldBlock, "busy");
        assert!(LycheeError::from(io).is_transient());
        assert!(!LycheeError::InvalidData("x".into()).is_transient());
    }
}
