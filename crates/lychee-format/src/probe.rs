//! 格式探测.
//!
//! 通过分析头部数据和文件名识别容器格式.

use crate::format_id::FormatId;

/// 探测置信度, 数值越高越有把握
pub type ProbeScore = u32;

/// 仅根据扩展名
pub const SCORE_EXTENSION: ProbeScore = 50;

/// 魔数或 URL 协议完全匹配
pub const SCORE_MAX: ProbeScore = 100;

/// 探测结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub format_id: FormatId,
    pub score: ProbeScore,
}

/// 格式探测器 trait
pub trait FormatProbe {
    /// 根据头部数据 (可能为空) 与文件名探测格式, 不是此格式时返回 None
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore>;

    /// 对应的格式标识
    fn format_id(&self) -> FormatId;
}
