//! 播放器配置.
//!
//! 所有可调参数集中在 [`PlayerConfig`], 可从 JSON 文件加载,
//! 未出现的字段取默认值.

use std::path::Path;

use lychee_core::{LycheeError, LycheeResult};
use serde::{Deserialize, Serialize};

use crate::media_clock::SyncType;

/// 播放器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 禁用音频流
    pub audio_disable: bool,
    /// 禁用视频流
    pub video_disable: bool,
    /// 禁用字幕流
    pub subtitle_disable: bool,
    /// 按字节 seek, None 表示按容器标志自动选择
    pub seek_by_bytes: Option<bool>,
    /// 起始播放位置 (秒)
    pub start_time: Option<f64>,
    /// 播放时长 (秒), 超出范围的数据包被丢弃
    pub duration: Option<f64>,
    /// 循环次数, 0 表示无限循环, 1 表示只播放一次
    pub loop_count: u32,
    /// 期望的主时钟
    pub sync_type: SyncType,
    /// 丢帧策略, None 表示视频不是主时钟时丢帧
    pub framedrop: Option<bool>,
    /// 不限制读取缓冲, None 表示实时流自动开启
    pub infinite_buffer: Option<bool>,
    /// 初始音量 (0..=100)
    pub volume: u32,
    /// 初始静音
    pub muted: bool,
    /// 播放速度
    pub speed: f64,
    pub queue: QueueConfig,
    pub sync: SyncConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_disable: false,
            video_disable: false,
            subtitle_disable: false,
            seek_by_bytes: None,
            start_time: None,
            duration: None,
            loop_count: 1,
            sync_type: SyncType::Audio,
            framedrop: None,
            infinite_buffer: None,
            volume: 100,
            muted: false,
            speed: 1.0,
            queue: QueueConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// 队列容量与缓冲阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 视频帧队列容量
    pub video_frames: usize,
    /// 音频帧队列容量
    pub audio_frames: usize,
    /// 字幕帧队列容量
    pub subtitle_frames: usize,
    /// 所有数据包队列的总字节上限
    pub max_queue_size: usize,
    /// 每条流认为 "足够" 的最少数据包数
    pub min_frames: usize,
    /// 缓冲检查认为就绪的最少数据包数
    pub cache_threshold_min_frames: usize,
    /// 每条流认为 "足够" 的最短缓冲时长 (秒)
    pub min_buffered_duration: f64,
    /// 读取线程限流时的等待时间 (毫秒)
    pub read_wait_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            video_frames: 3,
            audio_frames: 9,
            subtitle_frames: 16,
            max_queue_size: 15 * 1024 * 1024,
            min_frames: 25,
            cache_threshold_min_frames: 2,
            min_buffered_duration: 1.0,
            read_wait_ms: 10,
        }
    }
}

/// 音视频同步阈值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 同步阈值下限 (秒)
    pub av_sync_threshold_min: f64,
    /// 同步阈值上限 (秒)
    pub av_sync_threshold_max: f64,
    /// 帧时长超过此值时不再通过重复帧补偿 (秒)
    pub av_sync_framedup_threshold: f64,
    /// 误差超过此值时放弃校正 (秒)
    pub av_nosync_threshold: f64,
    /// 音频采样数校正的最大百分比
    pub sample_correction_percent_max: u32,
    /// 计算平均误差所需的测量次数
    pub audio_diff_avg_nb: u32,
    /// 视频刷新的默认轮询间隔 (秒)
    pub refresh_rate: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            av_sync_threshold_min: 0.04,
            av_sync_threshold_max: 0.1,
            av_sync_framedup_threshold: 0.1,
            av_nosync_threshold: 10.0,
            sample_correction_percent_max: 10,
            audio_diff_avg_nb: 20,
            refresh_rate: 0.01,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> LycheeResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            LycheeError::InvalidArgument(format!(
                "解析配置文件 {} 失败: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 检查配置是否合法
    pub fn validate(&self) -> LycheeResult<()> {
        let q = &self.queue;
        if q.video_frames == 0 || q.audio_frames == 0 || q.subtitle_frames == 0 {
            return Err(LycheeError::InvalidArgument("帧队列容量不能为 0".into()));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(LycheeError::InvalidArgument(format!(
                "播放速度必须为正数: {}",
                self.speed
            )));
        }
        if self.volume > 100 {
            return Err(LycheeError::InvalidArgument(format!(
                "音量超出范围 (0-100): {}",
                self.volume
            )));
        }
        if self.sync.av_sync_threshold_min > self.sync.av_sync_threshold_max {
            return Err(LycheeError::InvalidArgument(
                "av_sync_threshold_min 不能大于 av_sync_threshold_max".into(),
            ));
        }
        Ok(())
    }

    /// 当前主时钟下是否启用丢帧
    pub fn framedrop_active(&self, master: SyncType) -> bool {
        match self.framedrop {
            Some(enabled) => enabled,
            None => master != SyncType::Video,
        }
    }

    /// 是否跳过读取限流
    pub fn infinite_buffer_active(&self, realtime: bool) -> bool {
        self.infinite_buffer.unwrap_or(realtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_默认配置合法() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.video_frames, 3);
        assert_eq!(config.queue.audio_frames, 9);
        assert_eq!(config.queue.subtitle_frames, 16);
        assert_eq!(config.queue.max_queue_size, 15 * 1024 * 1024);
        assert_eq!(config.loop_count, 1);
    }

    #[test]
    fn test_非法配置被拒绝() {
        let mut config = PlayerConfig {
            speed: 0.0,
            ..PlayerConfig::default()
        };
        assert!(config.validate().is_err());

        config.speed = 1.0;
        config.volume = 101;
        assert!(config.validate().is_err());

        config.volume = 50;
        config.queue.video_frames = 0;
        assert!(config.validate().is_err());

        config.queue.video_frames = 3;
        config.sync.av_sync_threshold_min = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_从json加载_缺省字段取默认值() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sync_type": "external", "loop_count": 0, "queue": {{"video_frames": 5}}}}"#
        )
        .unwrap();
        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.sync_type, SyncType::External);
        assert_eq!(config.loop_count, 0);
        assert_eq!(config.queue.video_frames, 5);
        assert_eq!(config.queue.audio_frames, 9);
        assert_eq!(config.volume, 100);
    }

    #[test]
    fn test_丢帧与无限缓冲的自动模式() {
        let mut config = PlayerConfig::default();
        assert!(config.framedrop_active(SyncType::Audio));
        assert!(!config.framedrop_active(SyncType::Video));
        config.framedrop = Some(true);
        assert!(config.framedrop_active(SyncType::Video));

        assert!(config.infinite_buffer_active(true));
        assert!(!config.infinite_buffer_active(false));
        config.infinite_buffer = Some(false);
        assert!(!config.infinite_buffer_active(true));
    }
}
