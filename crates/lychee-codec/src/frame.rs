//! 解码后的帧数据 (Frame).

use lychee_core::{ChannelLayout, NOPTS_VALUE, PixelFormat, Rational, SampleFormat};

/// 视频帧
///
/// 按像素格式分平面存储, 例如 YUV420P 有 Y/U/V 三个平面.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// 各平面的像素数据
    pub data: Vec<Vec<u8>>,
    /// 各平面每行的字节数
    pub linesize: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
    /// 来源数据包在容器中的字节偏移
    pub pos: i64,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
}

impl VideoFrame {
    /// 创建空的视频帧
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        let plane_count = pixel_format.plane_count();
        Self {
            data: vec![Vec::new(); plane_count],
            linesize: vec![0; plane_count],
            width,
            height,
            pixel_format,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
            pos: -1,
            sample_aspect_ratio: Rational::new(1, 1),
        }
    }
}

/// 音频帧
///
/// 平面格式: data 中每个 Vec 对应一个声道; 交错格式: data 中只有一个 Vec.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// 音频采样数据
    pub data: Vec<Vec<u8>>,
    /// 本帧包含的采样数 (每声道)
    pub nb_samples: u32,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 帧时长 (以 time_base 为单位)
    pub duration: i64,
    /// 来源数据包在容器中的字节偏移
    pub pos: i64,
}

impl AudioFrame {
    /// 创建空的音频帧
    pub fn new(
        nb_samples: u32,
        sample_rate: u32,
        sample_format: SampleFormat,
        channel_layout: ChannelLayout,
    ) -> Self {
        let plane_count = if sample_format.is_planar() {
            channel_layout.channels as usize
        } else {
            1
        };
        Self {
            data: vec![Vec::new(); plane_count],
            nb_samples,
            sample_rate,
            sample_format,
            channel_layout,
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
            duration: 0,
            pos: -1,
        }
    }

    /// 按帧参数计算的数据字节数
    pub fn data_size(&self) -> usize {
        self.nb_samples as usize
            * self.sample_format.frame_bytes(self.channel_layout.channels) as usize
    }
}

/// 字幕帧
///
/// 显示区间相对于 `pts`, 单位毫秒.
#[derive(Debug, Clone)]
pub struct SubtitleFrame {
    /// 字幕文本
    pub text: String,
    /// 显示时间戳
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
    /// 开始显示时间 (毫秒, 相对 pts)
    pub start_display_time: u32,
    /// 结束显示时间 (毫秒, 相对 pts)
    pub end_display_time: u32,
}

/// 解码输出
#[derive(Debug, Clone)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
    Subtitle(SubtitleFrame),
}

impl Frame {
    /// 显示时间戳 (原始单位)
    pub fn pts(&self) -> i64 {
        match self {
            Self::Video(v) => v.pts,
            Self::Audio(a) => a.pts,
            Self::Subtitle(s) => s.pts,
        }
    }

    /// 时间基
    pub fn time_base(&self) -> Rational {
        match self {
            Self::Video(v) => v.time_base,
            Self::Audio(a) => a.time_base,
            Self::Subtitle(s) => s.time_base,
        }
    }
}
