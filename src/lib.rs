//! # Lychee
//!
//! 纯 Rust 实现的媒体播放同步与缓冲引擎, 对标 ffplay 的播放内核.
//!
//! Lychee 负责播放管线中与具体编解码无关的部分:
//! - **队列**: 带 serial 的数据包队列与定长帧队列
//! - **时钟**: 音频/视频/外部三个时钟与主时钟选择
//! - **同步**: 视频延迟计算, 丢帧, 音频漂移补偿
//! - **缓冲**: 读取限流, 缓冲进度与状态通知
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use lychee::player::{MediaPlayer, PlayerState};
//!
//! let player = MediaPlayer::builder().build().unwrap();
//! player.set_message_callback(|msg| println!("{msg:?}"));
//! player.open("testsrc:duration=5").unwrap();
//! while player.state() != PlayerState::End {
//!     let wait = player.refresh_video();
//!     std::thread::sleep(std::time::Duration::from_secs_f64(wait));
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `lychee-core` | 核心类型与工具 |
//! | `lychee-codec` | 解码器抽象与参考解码器 |
//! | `lychee-format` | 字节源与解封装 |
//! | `lychee-resample` | 音频重采样与同步补偿 |
//! | `lychee-player` | 播放同步与缓冲引擎 |

/// 核心类型与工具
pub use lychee_core as core;

/// 解码器框架
pub use lychee_codec as codec;

/// 容器格式框架
pub use lychee_format as format;

/// 音频重采样
pub use lychee_resample as resample;

/// 播放引擎
pub use lychee_player as player;

pub mod logging;

/// 获取 Lychee 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
