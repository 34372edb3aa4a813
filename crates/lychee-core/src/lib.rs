//! # lychee-core
//!
//! Lychee 播放引擎核心库, 提供基础类型定义、错误处理和时间工具.
//!
//! 其余 crate (编解码、容器、重采样、播放器) 共用这里的类型.

pub mod channel_layout;
pub mod error;
pub mod media_type;
pub mod pixel_format;
pub mod rational;
pub mod sample_format;
pub mod time;
pub mod timestamp;

// 重导出常用类型
pub use channel_layout::ChannelLayout;
pub use error::{LycheeError, LycheeResult};
pub use media_type::MediaType;
pub use pixel_format::PixelFormat;
pub use rational::Rational;
pub use sample_format::SampleFormat;
pub use timestamp::{NOPTS_VALUE, TIME_BASE, Timestamp};
