//! 内置解码器.

pub mod pcm;
pub mod rawvideo;
pub mod text;

use crate::codec_id::CodecId;
use crate::registry::CodecRegistry;

/// 注册所有内置解码器
pub fn register_all_decoders(registry: &mut CodecRegistry) {
    registry.register_decoder(CodecId::RawVideo, "rawvideo", rawvideo::RawVideoDecoder::create);
    registry.register_decoder(CodecId::PcmU8, "pcm_u8", pcm::PcmDecoder::new_u8);
    registry.register_decoder(CodecId::PcmS16le, "pcm_s16le", pcm::PcmDecoder::new_s16le);
    registry.register_decoder(CodecId::PcmS32le, "pcm_s32le", pcm::PcmDecoder::new_s32le);
    registry.register_decoder(CodecId::PcmF32le, "pcm_f32le", pcm::PcmDecoder::new_f32le);
    registry.register_decoder(CodecId::Text, "text", text::TextSubtitleDecoder::create);
}
