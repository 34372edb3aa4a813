//! # lychee-player
//!
//! Lychee 播放同步与缓冲引擎.
//!
//! 一次播放由以下线程协作完成:
//! - 读取线程 ([`data_source`]): 解封装, 按流分发数据包, 限流, 处理 seek
//! - 解码线程 ([`decoder`]): 每条流一个, 数据包解码为帧
//! - 音频设备线程: 通过回调拉取 [`audio_renderer`] 的输出
//! - 宿主的显示循环: 周期性调用 [`MediaPlayer::refresh_video`]
//!
//! 三个时钟 ([`media_clock`]) 决定帧的显示时刻, seek 通过队列 serial 作废旧数据.

pub mod audio_renderer;
pub mod clock;
pub mod config;
pub mod data_source;
pub mod decoder;
pub mod frame_queue;
pub mod media_clock;
pub mod message;
pub mod packet_queue;
pub mod player;
pub mod sink;
pub mod video_renderer;

pub use audio_renderer::VolumeControl;
pub use config::{PlayerConfig, QueueConfig, SyncConfig};
pub use frame_queue::DecodedFrame;
pub use media_clock::SyncType;
pub use message::{PlayerMessage, PlayerState};
pub use player::{MediaPlayer, PlayerBuilder};
pub use sink::{
    AudioCallback, AudioSink, AudioSpec, CaptureVideoSink, NullAudioSink, NullVideoSink,
    PaintedFrame, VideoSink,
};
