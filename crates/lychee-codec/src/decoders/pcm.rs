//! PCM 音频解码器.
//!
//! 小端 PCM 不需要字节变换, 解码只是按 block_align 切分并附上时间戳.

use log::debug;
use lychee_core::{ChannelLayout, LycheeError, LycheeResult, SampleFormat};

use crate::codec_id::CodecId;
use crate::codec_parameters::{CodecParameters, CodecParamsType};
use crate::decoder::Decoder;
use crate::frame::{AudioFrame, Frame};
use crate::packet::Packet;

/// PCM 音频解码器
pub struct PcmDecoder {
    codec_id: CodecId,
    /// 输出的采样格式
    output_format: SampleFormat,
    sample_rate: u32,
    channel_layout: ChannelLayout,
    /// 每个采样帧的字节数 (每样本字节数 * 声道数)
    block_align: u32,
    /// 已解码帧缓冲
    output_frame: Option<Frame>,
    opened: bool,
    /// 是否已收到排空信号
    draining: bool,
}

impl PcmDecoder {
    fn create(codec_id: CodecId) -> LycheeResult<Box<dyn Decoder>> {
        let output_format = match codec_id {
            CodecId::PcmU8 => SampleFormat::U8,
            CodecId::PcmS16le => SampleFormat::S16,
            CodecId::PcmS32le => SampleFormat::S32,
            CodecId::PcmF32le => SampleFormat::F32,
            other => {
                return Err(LycheeError::CodecNotFound(format!(
                    "不支持的 PCM 格式: {}",
                    other
                )));
            }
        };
        Ok(Box::new(Self {
            codec_id,
            output_format,
            sample_rate: 0,
            channel_layout: ChannelLayout::MONO,
            block_align: 0,
            output_frame: None,
            opened: false,
            draining: false,
        }))
    }

    pub fn new_u8() -> LycheeResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmU8)
    }

    pub fn new_s16le() -> LycheeResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmS16le)
    }

    pub fn new_s32le() -> LycheeResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmS32le)
    }

    pub fn new_f32le() -> LycheeResult<Box<dyn Decoder>> {
        Self::create(CodecId::PcmF32le)
    }
}

impl Decoder for PcmDecoder {
    fn codec_id(&self) -> CodecId {
        self.codec_id
    }

    fn name(&self) -> &str {
        self.codec_id.name()
    }

    fn open(&mut self, params: &CodecParameters) -> LycheeResult<()> {
        let audio = match &params.params {
            CodecParamsType::Audio(a) => a,
            _ => {
                return Err(LycheeError::InvalidArgument("PCM 解码器需要音频参数".into()));
            }
        };
        if audio.sample_rate == 0 {
            return Err(LycheeError::InvalidArgument("采样率不能为 0".into()));
        }
        if audio.channel_layout.channels == 0 {
            return Err(LycheeError::InvalidArgument("声道数不能为 0".into()));
        }

        self.sample_rate = audio.sample_rate;
        self.channel_layout = audio.channel_layout.validated();
        self.block_align = self.output_format.frame_bytes(self.channel_layout.channels);
        self.output_frame = None;
        self.opened = true;
        self.draining = false;

        debug!(
            "打开 {} 解码器: {} Hz, {} 声道",
            self.name(),
            self.sample_rate,
            self.channel_layout.channels,
        );
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> LycheeResult<()> {
        if !self.opened {
            return Err(LycheeError::Codec("解码器未打开, 请先调用 open()".into()));
        }
        if self.output_frame.is_some() {
            return Err(LycheeError::NeedMoreData);
        }
        if packet.is_empty() {
            self.draining = true;
            return Ok(());
        }

        let data_len = packet.data.len() as u32;
        if data_len % self.block_align != 0 {
            return Err(LycheeError::InvalidData(format!(
                "数据大小 {} 不是 block_align {} 的整数倍",
                data_len, self.block_align,
            )));
        }

        let mut frame = AudioFrame::new(
            data_len / self.block_align,
            self.sample_rate,
            self.output_format,
            self.channel_layout,
        );
        frame.pts = packet.pts;
        frame.time_base = packet.time_base;
        frame.duration = packet.duration;
        frame.pos = packet.pos;
        frame.data[0] = packet.data.to_vec();

        self.output_frame = Some(Frame::Audio(frame));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec_parameters::AudioCodecParams;
    use lychee_core::Rational;

    fn make_audio_params(codec_id: CodecId, channels: u32) -> CodecParameters {
        CodecParameters::new(
            codec_id,
            CodecParamsType::Audio(AudioCodecParams {
                sample_rate: 44100,
                channel_layout: ChannelLayout::from_channels(channels),
                sample_format: SampleFormat::None,
                frame_size: 0,
            }),
        )
    }

    #[test]
    fn test_pcm_s16le_解码() {
        let mut dec = PcmDecoder::new_s16le().unwrap();
        dec.open(&make_audio_params(CodecId::PcmS16le, 2)).unwrap();

        let data = vec![0x00, 0x01, 0xFF, 0x7F, 0x00, 0x80, 0x01, 0x00];
        let mut pkt = Packet::from_data(data.clone());
        pkt.pts = 100;
        pkt.time_base = Rational::new(1, 44100);
        dec.send_packet(&pkt).unwrap();
        match dec.receive_frame().unwrap() {
            Frame::Audio(af) => {
                assert_eq!(af.nb_samples, 2);
                assert_eq!(af.sample_format, SampleFormat::S16);
                assert_eq!(af.pts, 100);
                assert_eq!(af.data[0], data);
            }
            _ => panic!("期望音频帧"),
        }
        assert!(matches!(dec.receive_frame(), Err(LycheeError::NeedMoreData)));
    }

    #[test]
    fn test_pcm_未取帧时拒绝新包() {
        let mut dec = PcmDecoder::new_u8().unwrap();
        dec.open(&make_audio_params(CodecId::PcmU8, 1)).unwrap();
        dec.send_packet(&Packet::from_data(vec![1u8, 2])).unwrap();
        let err = dec.send_packet(&Packet::from_data(vec![3u8])).unwrap_err();
        assert!(matches!(err, LycheeError::NeedMoreData));
    }

    #[test]
    fn test_pcm_未打开() {
        let mut dec = PcmDecoder::new_f32le().unwrap();
        let err = dec.send_packet(&Packet::from_data(vec![0u8; 4])).unwrap_err();
        assert!(matches!(err, LycheeError::Codec(_)));
    }

    #[test]
    fn test_pcm_数据未对齐() {
        let mut dec = PcmDecoder::new_s16le().unwrap();
        dec.open(&make_audio_params(CodecId::PcmS16le, 2)).unwrap();
        let err = dec.send_packet(&Packet::from_data(vec![0u8; 3])).unwrap_err();
        assert!(matches!(err, LycheeError::InvalidData(_)));
    }

    #[test]
    fn test_pcm_排空与刷新() {
        let mut dec = PcmDecoder::new_s32le().unwrap();
        dec.open(&make_audio_params(CodecId::PcmS32le, 1)).unwrap();
        dec.send_packet(&Packet::empty()).unwrap();
        assert!(matches!(dec.receive_frame(), Err(LycheeError::Eof)));
        dec.flush();
        assert!(matches!(dec.receive_frame(), Err(LycheeError::NeedMoreData)));
    }
}
