//! # lychee-codec
//!
//! Lychee 播放引擎的解码层: Packet/Frame 抽象、`Decoder` trait 与注册表.
//!
//! 内置解码器只覆盖无需压缩算法的格式 (PCM、原始视频、纯文本字幕),
//! 真正的编解码库通过实现 `Decoder` 并注册到 `CodecRegistry` 接入.
//!
//! ```rust
//! use lychee_codec::{CodecId, CodecRegistry};
//!
//! let reg = CodecRegistry::with_builtin();
//! let decoder = reg.create_decoder(CodecId::PcmS16le).unwrap();
//! assert_eq!(decoder.name(), "pcm_s16le");
//! ```

pub mod codec_id;
pub mod codec_parameters;
pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod registry;

// 重导出常用类型
pub use codec_id::CodecId;
pub use codec_parameters::{AudioCodecParams, CodecParameters, CodecParamsType, VideoCodecParams};
pub use decoder::Decoder;
pub use frame::{AudioFrame, Frame, SubtitleFrame, VideoFrame};
pub use packet::{Packet, PacketFlags};
pub use registry::CodecRegistry;
