//! 音频采样格式定义.

use std::fmt;

/// 音频采样格式
///
/// - 交错 (Interleaved): 所有声道的采样点交替排列, 如 LRLRLR...
/// - 平面 (Planar): 每个声道独立存储, 如 LLL...RRR...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SampleFormat {
    /// 未指定
    None,

    // ========================
    // 交错格式
    // ========================
    U8,
    S16,
    S32,
    F32,
    F64,

    // ========================
    // 平面格式
    // ========================
    U8p,
    S16p,
    S32p,
    F32p,
    F64p,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::U8 | Self::U8p => 1,
            Self::S16 | Self::S16p => 2,
            Self::S32 | Self::S32p | Self::F32 | Self::F32p => 4,
            Self::F64 | Self::F64p => 8,
        }
    }

    /// 是否为平面格式
    pub const fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8p | Self::S16p | Self::S32p | Self::F32p | Self::F64p
        )
    }

    /// 是否为浮点格式
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F32p | Self::F64 | Self::F64p)
    }

    /// 获取对应的交错格式
    pub const fn to_interleaved(&self) -> Self {
        match self {
            Self::U8p => Self::U8,
            Self::S16p => Self::S16,
            Self::S32p => Self::S32,
            Self::F32p => Self::F32,
            Self::F64p => Self::F64,
            other => *other,
        }
    }

    /// 给定声道数时, 一个采样帧 (所有声道各一个采样) 的字节数
    pub const fn frame_bytes(&self, channels: u32) -> u32 {
        self.bytes_per_sample() * channels
    }

    /// 静音对应的字节值 (U8 以 0x80 为零点)
    pub const fn silence_byte(&self) -> u8 {
        match self {
            Self::U8 | Self::U8p => 0x80,
            _ => 0,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S32 => "s32",
            Self::F32 => "flt",
            Self::F64 => "dbl",
            Self::U8p => "u8p",
            Self::S16p => "s16p",
            Self::S32p => "s32p",
            Self::F32p => "fltp",
            Self::F64p => "dblp",
        };
        write!(f, "{name}")
    }
}
