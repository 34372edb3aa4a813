//! # lychee-format
//!
//! Lychee 播放引擎的容器层: 字节源抽象 (`IoContext`)、`Demuxer` trait、
//! 格式探测与注册表.
//!
//! 内置两个参考解封装器:
//! - `wav`: 标准 PCM WAV 文件
//! - `testsrc`: 合成音视频测试源, 通过 `testsrc:` URL 打开

pub mod demuxer;
pub mod demuxers;
pub mod format_id;
pub mod io;
pub mod probe;
pub mod registry;
pub mod stream;

// 重导出常用类型
pub use demuxer::{Chapter, Demuxer, FormatFlags, SeekFlags, SeekRequest};
pub use format_id::FormatId;
pub use io::{InterruptCallback, IoContext};
pub use probe::ProbeResult;
pub use registry::FormatRegistry;
pub use stream::{Disposition, Stream};
