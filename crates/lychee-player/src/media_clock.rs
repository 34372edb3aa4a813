//! 音频/视频/外部三个时钟与主时钟选择.

use std::fmt;
use std::sync::atomic::AtomicI32;
use std::sync::{Arc, Mutex, PoisonError};

use lychee_core::time::relative_seconds;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;

/// 主时钟类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncType {
    /// 以音频为主
    Audio,
    /// 以视频为主
    Video,
    /// 以外部时钟为主
    External,
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::External => "external",
        };
        write!(f, "{name}")
    }
}

/// 判断某类时钟背后的流是否存在
pub type StreamPresence = Arc<dyn Fn(SyncType) -> bool + Send + Sync>;

/// 时钟上下文
pub struct MediaClock {
    audclk: Clock,
    vidclk: Clock,
    extclk: Clock,
    sync_type: SyncType,
    confirm: StreamPresence,
    /// 上一帧视频应当显示的墙钟时间
    frame_timer: Mutex<f64>,
}

impl MediaClock {
    /// 创建时钟上下文
    ///
    /// 音频/视频时钟分别绑定对应数据包队列的 serial, 外部时钟不绑定.
    pub fn new(
        sync_type: SyncType,
        audio_serial: Arc<AtomicI32>,
        video_serial: Arc<AtomicI32>,
        confirm: StreamPresence,
    ) -> Self {
        Self {
            audclk: Clock::new(Some(audio_serial)),
            vidclk: Clock::new(Some(video_serial)),
            extclk: Clock::new(None),
            sync_type,
            confirm,
            frame_timer: Mutex::new(0.0),
        }
    }

    pub fn audio(&self) -> &Clock {
        &self.audclk
    }

    pub fn video(&self) -> &Clock {
        &self.vidclk
    }

    pub fn external(&self) -> &Clock {
        &self.extclk
    }

    /// 请求的主时钟类型
    pub fn requested_sync_type(&self) -> SyncType {
        self.sync_type
    }

    /// 实际生效的主时钟类型
    ///
    /// 视频缺失时退回音频, 音频缺失时退回外部时钟.
    pub fn master_sync_type(&self) -> SyncType {
        match self.sync_type {
            SyncType::Video if (self.confirm)(SyncType::Video) => SyncType::Video,
            SyncType::Video | SyncType::Audio if (self.confirm)(SyncType::Audio) => {
                SyncType::Audio
            }
            _ => SyncType::External,
        }
    }

    /// 主时钟当前值
    pub fn master_clock(&self) -> f64 {
        self.master().get()
    }

    fn master(&self) -> &Clock {
        match self.master_sync_type() {
            SyncType::Audio => &self.audclk,
            SyncType::Video => &self.vidclk,
            SyncType::External => &self.extclk,
        }
    }

    pub fn frame_timer(&self) -> f64 {
        *self.frame_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_frame_timer(&self, value: f64) {
        *self.frame_timer.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// 切换暂停, 返回新的暂停状态
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.is_paused();
        self.set_paused(paused);
        paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.set_paused_at(paused, relative_seconds());
    }

    /// 暂停或恢复全部时钟
    ///
    /// 恢复时帧定时器后移暂停时长, 视频不会为追赶而连续丢帧.
    pub fn set_paused_at(&self, paused: bool, now: f64) {
        if paused == self.is_paused() {
            return;
        }
        if !paused {
            let mut timer = self.frame_timer.lock().unwrap_or_else(PoisonError::into_inner);
            *timer += now - self.vidclk.last_updated();
        }
        self.extclk.set_paused_at(paused, now);
        self.audclk.set_paused_at(paused, now);
        self.vidclk.set_paused_at(paused, now);
    }

    pub fn is_paused(&self) -> bool {
        self.extclk.is_paused()
    }

    /// 三个时钟同时变速
    pub fn set_speed(&self, speed: f64) {
        self.audclk.set_speed(speed);
        self.vidclk.set_speed(speed);
        self.extclk.set_speed(speed);
    }

    pub fn speed(&self) -> f64 {
        self.extclk.speed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn clocks(sync_type: SyncType, has_audio: bool, has_video: bool) -> MediaClock {
        MediaClock::new(
            sync_type,
            Arc::new(AtomicI32::new(0)),
            Arc::new(AtomicI32::new(0)),
            Arc::new(move |t| match t {
                SyncType::Audio => has_audio,
                SyncType::Video => has_video,
                SyncType::External => true,
            }),
        )
    }

    #[test]
    fn test_主时钟降级() {
        assert_eq!(clocks(SyncType::Audio, true, true).master_sync_type(), SyncType::Audio);
        assert_eq!(clocks(SyncType::Audio, false, true).master_sync_type(), SyncType::External);
        assert_eq!(clocks(SyncType::Video, true, true).master_sync_type(), SyncType::Video);
        assert_eq!(clocks(SyncType::Video, true, false).master_sync_type(), SyncType::Audio);
        assert_eq!(clocks(SyncType::Video, false, false).master_sync_type(), SyncType::External);
        assert_eq!(clocks(SyncType::External, true, true).master_sync_type(), SyncType::External);
    }

    #[test]
    fn test_主时钟取值() {
        let mc = clocks(SyncType::Audio, true, true);
        assert!(mc.master_clock().is_nan());
        mc.audio().set(3.0, 0);
        assert!((mc.master_clock() - 3.0).abs() < 0.5);
    }

    #[test]
    fn test_暂停两秒后恢复不跳变() {
        let audio_serial = Arc::new(AtomicI32::new(0));
        let mc = MediaClock::new(
            SyncType::Audio,
            Arc::clone(&audio_serial),
            Arc::new(AtomicI32::new(0)),
            Arc::new(|_| true),
        );
        mc.audio().set_at(8.0, 0, 50.0);
        mc.video().set_at(8.0, 0, 50.0);
        mc.external().set_at(8.0, 0, 50.0);
        mc.set_frame_timer(50.0);

        mc.set_paused_at(true, 51.0);
        assert!(mc.is_paused());
        assert!((mc.audio().get_at(51.0) - 9.0).abs() < 1e-9);
        assert!((mc.audio().get_at(53.0) - 9.0).abs() < 1e-9);

        mc.set_paused_at(false, 53.0);
        assert!(!mc.is_paused());
        assert!((mc.audio().get_at(53.0) - 9.0).abs() < 1e-9);
        assert!((mc.external().get_at(53.5) - 9.5).abs() < 1e-9);
        assert!((mc.video().get_at(54.0) - 10.0).abs() < 1e-9);
        assert!((mc.frame_timer() - 52.0).abs() < 1e-9);

        audio_serial.store(1, Ordering::SeqCst);
        assert!(mc.audio().get_at(54.0).is_nan());
    }

    #[test]
    fn test_sync_type_序列化() {
        let json = serde_json::to_string(&SyncType::External).unwrap();
        assert_eq!(json, "\"external\"");
        let t: SyncType = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(t, SyncType::Video);
        assert_eq!(SyncType::Audio.to_string(), "audio");
    }
}
