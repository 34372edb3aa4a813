//! 内置解封装器.

pub mod testsrc;
pub mod wav;

use crate::format_id::FormatId;
use crate::registry::FormatRegistry;

/// 注册所有内置解封装器与探测器
pub fn register_all_demuxers(registry: &mut FormatRegistry) {
    registry.register_demuxer(FormatId::Wav, "wav", wav::WavDemuxer::create);
    registry.register_probe(Box::new(wav::WavProbe));
    registry.register_demuxer(FormatId::TestSrc, "testsrc", testsrc::TestSrcDemuxer::create);
    registry.register_probe(Box::new(testsrc::TestSrcProbe));
}
