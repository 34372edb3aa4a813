//! 编解码器标识符.

use std::fmt;
use lychee_core::MediaType;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CodecId {
    /// 未知编解码器
    None,

    // ========================
    // 视频
    // ========================
    /// 未压缩视频
    RawVideo,

    // ========================
    // 音频
    // ========================
    PcmU8,
    PcmS16le,
    PcmS32le,
    PcmF32le,

    // ========================
    // 字幕
    // ========================
    /// UTF-8 纯文本字幕
    Text,
}

impl CodecId {
    /// 编解码器名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::RawVideo => "rawvideo",
            Self::PcmU8 => "pcm_u8",
            Self::PcmS16le => "pcm_s16le",
            Self::PcmS32le => "pcm_s32le",
            Self::PcmF32le => "pcm_f32le",
            Self::Text => "text",
        }
    }

    /// 所属媒体类型
    pub const fn media_type(&self) -> MediaType {
        match self {
            Self::RawVideo => MediaType::Video,
            Self::PcmU8 | Self::PcmS16le | Self::PcmS32le | Self::PcmF32le => MediaType::Audio,
            Self::Text => MediaType::Subtitle,
            Self::None => MediaType::Data,
        }
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
