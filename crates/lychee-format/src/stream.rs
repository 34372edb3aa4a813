//! 流信息定义.

use bitflags::bitflags;
use lychee_codec::{CodecId, CodecParameters, Packet};
use lychee_core::{MediaType, NOPTS_VALUE, Rational, timestamp};

bitflags! {
    /// 流的处置标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Disposition: u32 {
        /// 默认流
        const DEFAULT = 1 << 0;
        /// 附加图片 (封面), 整条流只有 `attached_pic` 一个数据包
        const ATTACHED_PIC = 1 << 1;
    }
}

/// 流信息
#[derive(Debug, Clone)]
pub struct Stream {
    /// 流索引 (从 0 开始)
    pub index: usize,
    pub media_type: MediaType,
    /// 编解码器参数
    pub codec_params: CodecParameters,
    /// 时间基
    pub time_base: Rational,
    /// 流时长 (以 time_base 为单位, `NOPTS_VALUE` 表示未知)
    pub duration: i64,
    /// 起始时间 (以 time_base 为单位, `NOPTS_VALUE` 表示未知)
    pub start_time: i64,
    /// 总帧数 (0 表示未知)
    pub nb_frames: u64,
    pub disposition: Disposition,
    /// 附加图片数据包
    pub attached_pic: Option<Packet>,
    /// 元数据 (标题, 语言等)
    pub metadata: Vec<(String, String)>,
}

impl Stream {
    /// 以编解码器参数创建流, 其余字段为未知
    pub fn new(index: usize, media_type: MediaType, codec_params: CodecParameters, time_base: Rational) -> Self {
        Self {
            index,
            media_type,
            codec_params,
            time_base,
            duration: NOPTS_VALUE,
            start_time: NOPTS_VALUE,
            nb_frames: 0,
            disposition: Disposition::empty(),
            attached_pic: None,
            metadata: Vec::new(),
        }
    }

    pub fn codec_id(&self) -> CodecId {
        self.codec_params.codec_id
    }

    /// 是否为附加图片流
    pub fn is_attached_pic(&self) -> bool {
        self.disposition.contains(Disposition::ATTACHED_PIC)
    }

    /// 起始时间 (秒), 未知时为 0
    pub fn start_seconds(&self) -> f64 {
        if self.start_time == NOPTS_VALUE {
            0.0
        } else {
            timestamp::to_seconds(self.start_time, self.time_base)
        }
    }
}
