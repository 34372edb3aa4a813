//! 压缩数据包 (Packet).
//!
//! 从容器中读取的一个编码单元, 送入解码器前在各队列之间按值移动.

use bitflags::bitflags;
use bytes::Bytes;
use lychee_core::{NOPTS_VALUE, Rational};

bitflags! {
    /// 数据包标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u32 {
        /// 关键帧
        const KEYFRAME = 1 << 0;
        /// 数据已损坏
        const CORRUPT = 1 << 1;
    }
}

/// 压缩数据包
#[derive(Debug, Clone)]
pub struct Packet {
    /// 压缩数据, 克隆只增加引用计数
    pub data: Bytes,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 解码时间戳 (DTS)
    pub dts: i64,
    /// 数据包时长 (以 time_base 为单位)
    pub duration: i64,
    /// 时间基
    pub time_base: Rational,
    /// 所属流的索引
    pub stream_index: usize,
    /// 标志位
    pub flags: PacketFlags,
    /// 在容器中的字节偏移量 (-1 表示未知)
    pub pos: i64,
}

impl Packet {
    /// 创建空数据包, 送入解码器表示排空
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            duration: 0,
            time_base: Rational::UNDEFINED,
            stream_index: 0,
            flags: PacketFlags::empty(),
            pos: -1,
        }
    }

    /// 从数据创建数据包
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空包
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_keyframe(&self) -> bool {
        self.flags.contains(PacketFlags::KEYFRAME)
    }

    /// 优先使用 pts, 缺失时退回 dts
    pub fn best_timestamp(&self) -> i64 {
        if self.pts != NOPTS_VALUE {
            self.pts
        } else {
            self.dts
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_时间戳回退() {
        let mut pkt = Packet::from_data(vec![1u8, 2, 3]);
        assert_eq!(pkt.size(), 3);
        assert_eq!(pkt.best_timestamp(), NOPTS_VALUE);
        pkt.dts = 40;
        assert_eq!(pkt.best_timestamp(), 40);
        pkt.pts = 80;
        assert_eq!(pkt.best_timestamp(), 80);
    }

    #[test]
    fn test_packet_关键帧标志() {
        let mut pkt = Packet::empty();
        assert!(pkt.is_empty());
        assert!(!pkt.is_keyframe());
        pkt.flags |= PacketFlags::KEYFRAME;
        assert!(pkt.is_keyframe());
    }
}
