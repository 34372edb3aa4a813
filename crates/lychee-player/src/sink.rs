//! 音视频输出设备抽象.
//!
//! 音频设备以拉模式工作: 打开时登记回调, 设备线程按自身节奏要求填充缓冲.
//! 视频设备只负责把渲染器选中的帧画出来.

use std::sync::{Arc, Mutex, PoisonError};

use lychee_core::{ChannelLayout, LycheeResult, SampleFormat};

use crate::frame_queue::DecodedFrame;

/// 音频设备参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    /// 交错采样格式
    pub sample_format: SampleFormat,
    /// 每次回调的采样数
    pub samples: u32,
}

impl AudioSpec {
    /// 按采样率选取缓冲采样数: 每秒回调不超过 30 次, 至少 512
    pub fn wanted(sample_rate: u32, channel_layout: ChannelLayout) -> Self {
        let per_callback = (sample_rate / 30).max(1);
        let samples = (2u32 << per_callback.ilog2()).max(512);
        Self {
            sample_rate,
            channel_layout,
            sample_format: SampleFormat::S16,
            samples,
        }
    }

    /// 一次回调的缓冲字节数
    pub fn buffer_size(&self) -> usize {
        self.samples as usize * self.sample_format.frame_bytes(self.channel_layout.channels) as usize
    }
}

/// 音频拉取回调, 必须填满整个缓冲
pub type AudioCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// 音频输出设备
pub trait AudioSink: Send {
    /// 打开设备, 返回实际协商的参数
    fn open(&mut self, wanted: &AudioSpec, callback: AudioCallback) -> LycheeResult<AudioSpec>;

    /// 暂停或恢复拉取
    fn pause(&mut self, _paused: bool) {}

    /// 关闭设备, 之后不再调用回调
    fn close(&mut self);
}

/// 视频输出设备
pub trait VideoSink: Send {
    /// 显示一帧, `subtitle` 为当前应叠加的字幕文本
    fn paint(&mut self, frame: &DecodedFrame, subtitle: Option<&str>);
}

/// 空音频设备: 接受任何参数, 从不调用回调
///
/// 宿主通过 `MediaPlayer::read_audio` 自行拉取数据.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn open(&mut self, wanted: &AudioSpec, _callback: AudioCallback) -> LycheeResult<AudioSpec> {
        Ok(*wanted)
    }

    fn close(&mut self) {}
}

/// 空视频设备
#[derive(Debug, Default)]
pub struct NullVideoSink;

impl VideoSink for NullVideoSink {
    fn paint(&mut self, _frame: &DecodedFrame, _subtitle: Option<&str>) {}
}

/// 已显示帧的记录
#[derive(Debug, Clone, PartialEq)]
pub struct PaintedFrame {
    pub pts: f64,
    pub serial: i32,
    pub width: u32,
    pub height: u32,
    pub subtitle: Option<String>,
}

/// 记录每次显示的视频设备, 用于测试和宿主轮询
#[derive(Debug, Default, Clone)]
pub struct CaptureVideoSink {
    frames: Arc<Mutex<Vec<PaintedFrame>>>,
}

impl CaptureVideoSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 共享的记录列表
    pub fn frames(&self) -> Arc<Mutex<Vec<PaintedFrame>>> {
        Arc::clone(&self.frames)
    }
}

impl VideoSink for CaptureVideoSink {
    fn paint(&mut self, frame: &DecodedFrame, subtitle: Option<&str>) {
        let (width, height) = frame.dimensions().unwrap_or((0, 0));
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PaintedFrame {
                pts: frame.pts,
                serial: frame.serial,
                width,
                height,
                subtitle: subtitle.map(str::to_string),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lychee_codec::{Frame, VideoFrame};
    use lychee_core::PixelFormat;

    #[test]
    fn test_期望缓冲采样数() {
        let spec = AudioSpec::wanted(48000, ChannelLayout::STEREO);
        assert_eq!(spec.samples, 2048);
        assert_eq!(spec.buffer_size(), 8192);
        assert_eq!(AudioSpec::wanted(8000, ChannelLayout::MONO).samples, 512);
        assert_eq!(AudioSpec::wanted(44100, ChannelLayout::MONO).samples, 2048);
    }

    #[test]
    fn test_空音频设备返回期望参数() {
        let wanted = AudioSpec::wanted(44100, ChannelLayout::STEREO);
        let mut sink = NullAudioSink;
        let got = sink.open(&wanted, Box::new(|_| {})).unwrap();
        assert_eq!(got, wanted);
        sink.close();
    }

    #[test]
    fn test_记录显示的帧() {
        let mut sink = CaptureVideoSink::new();
        let frames = sink.frames();
        let frame = DecodedFrame::new(
            Frame::Video(VideoFrame::new(32, 16, PixelFormat::Gray8)),
            1.5,
            0.04,
            0,
            3,
        );
        sink.paint(&frame, Some("你好"));
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pts, 1.5);
        assert_eq!(frames[0].serial, 3);
        assert_eq!((frames[0].width, frames[0].height), (32, 16));
        assert_eq!(frames[0].subtitle.as_deref(), Some("你好"));
    }
}
