//! 纯文本字幕解码器.
//!
//! 数据包内容按 UTF-8 解释, 显示时长取数据包时长.

use lychee_core::{LycheeError, LycheeResult, Rational};

use crate::codec_id::CodecId;
use crate::decoder::Decoder;
use crate::frame::{Frame, SubtitleFrame};
use crate::packet::Packet;

/// 纯文本字幕解码器
pub struct TextSubtitleDecoder {
    output_frame: Option<Frame>,
    draining: bool,
}

impl TextSubtitleDecoder {
    pub fn create() -> LycheeResult<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            output_frame: None,
            draining: false,
        }))
    }
}

/// 将以 `time_base` 为单位的时长换算为毫秒, 无法换算时为 0
fn duration_millis(duration: i64, time_base: Rational) -> u32 {
    if duration <= 0 || !time_base.is_valid() {
        return 0;
    }
    (duration as f64 * time_base.to_f64() * 1000.0).round() as u32
}

impl Decoder for TextSubtitleDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::Text
    }

    fn name(&self) -> &str {
        "text"
    }

    fn send_packet(&mut self, packet: &Packet) -> LycheeResult<()> {
        if self.output_frame.is_some() {
            return Err(LycheeError::NeedMoreData);
        }
        if packet.is_empty() {
            self.draining = true;
            return Ok(());
        }
        let text = std::str::from_utf8(&packet.data)
            .map_err(|e| LycheeError::InvalidData(format!("字幕不是有效的 UTF-8: {}", e)))?;
        self.output_frame = Some(Frame::Subtitle(SubtitleFrame {
            text: text.trim_end().to_string(),
            pts: packet.pts,
            time_base: packet.time_base,
            start_display_time: 0,
            end_display_time: duration_millis(packet.duration, packet.time_base),
        }));
        Ok(())
    }

    fn receive_frame(&mut self) -> LycheeResult<Frame> {
        if let Some(frame) = self.output_frame.take() {
            return Ok(frame);
        }
        if self.draining {
            return Err(LycheeError::Eof);
        }
        Err(LycheeError::NeedMoreData)
    }

    fn flush(&mut self) {
        self.output_frame = None;
        self.draining = false;
    }
}
