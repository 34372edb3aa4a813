//! 解封装器 (Demuxer) trait 定义.

use bitflags::bitflags;
use lychee_codec::Packet;
use lychee_core::{LycheeResult, Rational, timestamp};

use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::stream::Stream;

/// 解封装器 trait
///
/// 使用流程:
/// 1. 调用 `open()` 打开容器并解析头部
/// 2. 调用 `streams()` 获取流信息
/// 3. 循环调用 `read_packet()` 读取数据包, 到达末尾时返回 `Err(Eof)`
/// 4. 可选: 调用 `seek()` 进行定位
pub trait Demuxer: Send {
    /// 获取格式标识
    fn format_id(&self) -> FormatId;

    /// 获取格式名称
    fn name(&self) -> &str;

    /// 打开容器并解析头部信息
    fn open(&mut self, io: &mut IoContext) -> LycheeResult<()>;

    /// 获取所有流信息
    fn streams(&self) -> &[Stream];

    /// 读取下一个数据包
    fn read_packet(&mut self, io: &mut IoContext) -> LycheeResult<Packet>;

    /// 定位
    fn seek(&mut self, io: &mut IoContext, request: &SeekRequest) -> LycheeResult<()>;

    /// 容器时长 (秒), None 表示未知
    fn duration(&self) -> Option<f64>;

    /// 容器起始时间 (秒), None 表示未知
    fn start_time(&self) -> Option<f64> {
        None
    }

    /// 总码率 (bits/s, 0 表示未知), 用于按字节 seek 时换算位置
    fn bit_rate(&self) -> u64 {
        0
    }

    /// 章节列表
    fn chapters(&self) -> &[Chapter] {
        &[]
    }

    /// 容器元数据
    fn metadata(&self) -> &[(String, String)] {
        &[]
    }

    /// 格式标志
    fn flags(&self) -> FormatFlags {
        FormatFlags::empty()
    }

    /// 是否为实时流 (不应积压缓冲)
    fn is_realtime(&self) -> bool {
        false
    }
}

bitflags! {
    /// 容器格式标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatFlags: u32 {
        /// 时间戳允许不连续 (如 MPEG-TS), 播放器应按字节 seek 并缩短最大帧时长
        const TS_DISCONT = 1 << 0;
        /// 不支持按字节 seek
        const NO_BYTE_SEEK = 1 << 1;
    }
}

/// Seek 标志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekFlags {
    /// 向后 seek (寻找目标之前最近的关键帧)
    pub backward: bool,
    /// 基于字节位置 seek (而非时间戳)
    pub byte: bool,
    /// 寻找任意帧 (不仅是关键帧)
    pub any: bool,
}

impl Default for SeekFlags {
    fn default() -> Self {
        Self {
            backward: true,
            byte: false,
            any: false,
        }
    }
}

/// Seek 请求
///
/// 时间 seek 时 `min_ts/target/max_ts` 以微秒 (`TIME_BASE`) 为单位,
/// 字节 seek 时为容器中的字节偏移.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekRequest {
    /// 目标流, None 表示以容器时间为准
    pub stream_index: Option<usize>,
    pub min_ts: i64,
    pub target: i64,
    pub max_ts: i64,
    pub flags: SeekFlags,
}

impl SeekRequest {
    /// 以秒为单位的时间 seek, 不限制范围
    pub fn to_seconds(seconds: f64) -> Self {
        Self {
            stream_index: None,
            min_ts: i64::MIN,
            target: (seconds * timestamp::TIME_BASE as f64) as i64,
            max_ts: i64::MAX,
            flags: SeekFlags::default(),
        }
    }

    /// 目标时间 (秒); 字节 seek 时无意义, 返回 NaN
    pub fn target_seconds(&self) -> f64 {
        if self.flags.byte {
            return f64::NAN;
        }
        self.target as f64 / timestamp::TIME_BASE as f64
    }
}

/// 章节
#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: i64,
    pub time_base: Rational,
    /// 起始时间 (以 time_base 为单位)
    pub start: i64,
    /// 结束时间 (以 time_base 为单位)
    pub end: i64,
    /// 章节元数据
    pub metadata: Vec<(String, String)>,
}

impl Chapter {
    /// 起始时间 (秒)
    pub fn start_seconds(&self) -> f64 {
        timestamp::to_seconds(self.start, self.time_base)
    }

    /// 结束时间 (秒)
    pub fn end_seconds(&self) -> f64 {
        timestamp::to_seconds(self.end, self.time_base)
    }

    /// 章节标题
    pub fn title(&self) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("title"))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seek_request_秒换算() {
        let req = SeekRequest::to_seconds(5.0);
        assert_eq!(req.target, 5_000_000);
        assert!((req.target_seconds() - 5.0).abs() < 1e-9);
        let byte = SeekRequest {
            flags: SeekFlags {
                byte: true,
                ..SeekFlags::default()
            },
            ..req
        };
        assert!(byte.target_seconds().is_nan());
    }

    #[test]
    fn test_chapter_时间与标题() {
        let ch = Chapter {
            id: 1,
            time_base: Rational::MILLI,
            start: 2500,
            end: 5000,
            metadata: vec![("TITLE".into(), "序章".into())],
        };
        assert!((ch.start_seconds() - 2.5).abs() < 1e-9);
        assert!((ch.end_seconds() - 5.0).abs() < 1e-9);
        assert_eq!(ch.title(), Some("序章"));
    }
}
