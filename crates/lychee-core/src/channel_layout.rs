//! 音频声道布局定义.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// 声道位掩码, 每个位代表一个扬声器位置
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMask: u64 {
        const FRONT_LEFT    = 1 << 0;
        const FRONT_RIGHT   = 1 << 1;
        const FRONT_CENTER  = 1 << 2;
        const LOW_FREQUENCY = 1 << 3;
        const BACK_LEFT     = 1 << 4;
        const BACK_RIGHT    = 1 << 5;
        const SIDE_LEFT     = 1 << 9;
        const SIDE_RIGHT    = 1 << 10;
    }
}

/// 声道布局
///
/// `mask` 为空表示非标准布局, 此时仅 `channels` 有意义.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelLayout {
    /// 声道数量
    pub channels: u32,
    /// 声道位掩码
    pub mask: ChannelMask,
}

impl ChannelLayout {
    /// 单声道
    pub const MONO: Self = Self {
        channels: 1,
        mask: ChannelMask::FRONT_CENTER,
    };

    /// 立体声
    pub const STEREO: Self = Self {
        channels: 2,
        mask: ChannelMask::FRONT_LEFT.union(ChannelMask::FRONT_RIGHT),
    };

    /// 5.1 环绕声
    pub const SURROUND_5_1: Self = Self {
        channels: 6,
        mask: ChannelMask::FRONT_LEFT
            .union(ChannelMask::FRONT_RIGHT)
            .union(ChannelMask::FRONT_CENTER)
            .union(ChannelMask::LOW_FREQUENCY)
            .union(ChannelMask::BACK_LEFT)
            .union(ChannelMask::BACK_RIGHT),
    };

    /// 根据声道数创建默认布局
    pub fn from_channels(channels: u32) -> Self {
        match channels {
            1 => Self::MONO,
            2 => Self::STEREO,
            6 => Self::SURROUND_5_1,
            n => Self {
                channels: n,
                mask: ChannelMask::empty(),
            },
        }
    }

    /// 掩码与声道数是否一致; 不一致时应退回 `from_channels` 的默认布局
    pub fn is_consistent(&self) -> bool {
        self.mask.is_empty() || self.mask.bits().count_ones() == self.channels
    }

    /// 返回可用的布局: 自身一致则原样返回, 否则按声道数取默认值
    pub fn validated(self) -> Self {
        if self.is_consistent() {
            self
        } else {
            Self::from_channels(self.channels)
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MONO => write!(f, "mono"),
            Self::STEREO => write!(f, "stereo"),
            Self::SURROUND_5_1 => write!(f, "5.1"),
            _ => write!(f, "{}ch", self.channels),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_layout_默认布局() {
        assert_eq!(ChannelLayout::from_channels(2), ChannelLayout::STEREO);
        assert_eq!(ChannelLayout::from_channels(3).channels, 3);
    }

    #[test]
    fn test_channel_layout_掩码校验() {
        let bad = ChannelLayout {
            channels: 1,
            mask: ChannelLayout::STEREO.mask,
        };
        assert!(!bad.is_consistent());
        assert_eq!(bad.validated(), ChannelLayout::MONO);
        assert!(ChannelLayout::SURROUND_5_1.is_consistent());
    }
}
