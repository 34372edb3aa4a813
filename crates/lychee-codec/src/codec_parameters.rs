//! 编解码器参数.
//!
//! 通常从容器的流信息中提取, 在打开解码器时传入.

use lychee_core::{ChannelLayout, PixelFormat, Rational, SampleFormat};

use crate::codec_id::CodecId;

/// 编解码器参数
#[derive(Debug, Clone)]
pub struct CodecParameters {
    /// 编解码器标识
    pub codec_id: CodecId,
    /// 额外数据
    pub extra_data: Vec<u8>,
    /// 码率 (bits/s, 0 表示未知)
    pub bit_rate: u64,
    /// 媒体类型特定参数
    pub params: CodecParamsType,
}

/// 媒体类型特定参数
#[derive(Debug, Clone)]
pub enum CodecParamsType {
    /// 视频参数
    Video(VideoCodecParams),
    /// 音频参数
    Audio(AudioCodecParams),
    /// 无特定参数 (字幕等)
    None,
}

/// 视频编解码器参数
#[derive(Debug, Clone)]
pub struct VideoCodecParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// 帧率
    pub frame_rate: Rational,
    /// 采样宽高比 (SAR)
    pub sample_aspect_ratio: Rational,
}

/// 音频编解码器参数
#[derive(Debug, Clone)]
pub struct AudioCodecParams {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    /// 每帧采样数 (0 表示可变)
    pub frame_size: u32,
}

impl CodecParameters {
    /// 仅带编解码器标识的参数
    pub fn new(codec_id: CodecId, params: CodecParamsType) -> Self {
        Self {
            codec_id,
            extra_data: Vec::new(),
            bit_rate: 0,
            params,
        }
    }

    /// 获取视频参数
    pub fn video(&self) -> Option<&VideoCodecParams> {
        match &self.params {
            CodecParamsType::Video(v) => Some(v),
            _ => None,
        }
    }

    /// 获取音频参数
    pub fn audio(&self) -> Option<&AudioCodecParams> {
        match &self.params {
            CodecParamsType::Audio(a) => Some(a),
            _ => None,
        }
    }
}
