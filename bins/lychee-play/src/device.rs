//! 模拟输出设备.
//!
//! 没有声卡与窗口时, 用线程按设备节奏驱动播放器:
//! - 音频线程每隔一个缓冲时长拉取一次数据
//! - 视频线程按渲染器建议的间隔刷新

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, trace, warn};
use lychee_core::{LycheeError, LycheeResult};
use lychee_player::{AudioCallback, AudioSink, AudioSpec, DecodedFrame, MediaPlayer, VideoSink};

/// 按实时节奏拉取数据的音频设备
#[derive(Default)]
pub struct SimulatedAudioDevice {
    paused: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SimulatedAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for SimulatedAudioDevice {
    fn open(&mut self, wanted: &AudioSpec, mut callback: AudioCallback) -> LycheeResult<AudioSpec> {
        if self.thread.is_some() {
            return Err(LycheeError::Device("音频设备已打开".into()));
        }
        let spec = *wanted;
        let period = Duration::from_secs_f64(f64::from(spec.samples) / f64::from(spec.sample_rate));
        let paused = Arc::clone(&self.paused);
        let closed = Arc::clone(&self.closed);
        closed.store(false, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("lychee-audio-dev".into())
            .spawn(move || {
                let mut buf = vec![0u8; spec.buffer_size()];
                while !closed.load(Ordering::SeqCst) {
                    if !paused.load(Ordering::SeqCst) {
                        callback(&mut buf);
                    }
                    thread::sleep(period);
                }
            })
            .map_err(|e| LycheeError::Device(format!("启动音频设备线程失败: {e}")))?;
        self.thread = Some(handle);
        debug!("模拟音频设备: 每 {:?} 拉取 {} 字节", period, spec.buffer_size());
        Ok(spec)
    }

    fn pause(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("音频设备线程异常退出");
            }
        }
    }
}

impl Drop for SimulatedAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

/// 只记录显示帧数的视频设备
pub struct CountingVideoSink {
    painted: Arc<AtomicU64>,
}

impl CountingVideoSink {
    pub fn new(painted: Arc<AtomicU64>) -> Self {
        Self { painted }
    }
}

impl VideoSink for CountingVideoSink {
    fn paint(&mut self, frame: &DecodedFrame, subtitle: Option<&str>) {
        let n = self.painted.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("显示第 {} 帧: pts={:.3} serial={}", n, frame.pts, frame.serial);
        if let Some(text) = subtitle {
            trace!("字幕: {}", text);
        }
    }
}

/// 视频刷新线程
pub struct VideoPainter {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl VideoPainter {
    pub fn spawn(player: Arc<MediaPlayer>) -> anyhow::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("lychee-paint".into())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    let remaining = player.refresh_video();
                    if remaining > 0.0 {
                        thread::sleep(Duration::from_secs_f64(remaining));
                    }
                }
            })?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for VideoPainter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lychee_core::ChannelLayout;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_模拟设备按节奏拉取() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let mut device = SimulatedAudioDevice::new();
        let wanted = AudioSpec::wanted(8000, ChannelLayout::MONO);
        let got = device
            .open(
                &wanted,
                Box::new(move |buf: &mut [u8]| {
                    assert_eq!(buf.len(), 1024);
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(got, wanted);
        thread::sleep(Duration::from_millis(300));
        device.close();
        let n = pulls.load(Ordering::SeqCst);
        // 512 采样 @ 8000Hz = 64ms 一次
        assert!((2..=8).contains(&n), "拉取次数 {n}");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(pulls.load(Ordering::SeqCst), n);
    }

    #[test]
    fn test_暂停时不拉取() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulls);
        let mut device = SimulatedAudioDevice::new();
        device.pause(true);
        device
            .open(
                &AudioSpec::wanted(48000, ChannelLayout::STEREO),
                Box::new(move |_: &mut [u8]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        thread::sleep(Duration::from_millis(150));
        device.close();
        assert_eq!(pulls.load(Ordering::SeqCst), 0);
    }
}
