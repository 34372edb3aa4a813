//! WAV (RIFF WAVE) 解封装器.
//!
//! ```text
//! RIFF header:  "RIFF" + file_size-8 + "WAVE"
//! fmt  chunk:   "fmt " + chunk_size + audio_format + channels + sample_rate
//!              + byte_rate + block_align + bits_per_sample
//! LIST chunk:   "LIST" + size + "INFO" + { id + size + text }  (可选)
//! data chunk:   "data" + data_size + PCM samples...
//! ```

use log::{debug, warn};
use lychee_codec::{AudioCodecParams, CodecId, CodecParameters, CodecParamsType, Packet, PacketFlags};
use lychee_core::{ChannelLayout, LycheeError, LycheeResult, MediaType, Rational, SampleFormat, TIME_BASE};

use crate::demuxer::{Demuxer, SeekRequest};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_EXTENSION, SCORE_MAX};
use crate::stream::{Disposition, Stream};

/// WAV 整数 PCM 格式码
const WAV_FORMAT_PCM: u16 = 0x0001;
/// WAV IEEE 浮点格式码
const WAV_FORMAT_IEEE_FLOAT: u16 = 0x0003;
/// 每个数据包的采样数
const SAMPLES_PER_PACKET: u32 = 1024;

/// WAV 解封装器
pub struct WavDemuxer {
    streams: Vec<Stream>,
    /// data 块在文件中的起始偏移
    data_offset: u64,
    /// data 块的大小 (字节)
    data_size: u64,
    /// 当前读取位置 (相对于 data 块起始)
    data_pos: u64,
    packet_size: usize,
    block_align: u16,
    sample_rate: u32,
    bit_rate: u64,
    metadata: Vec<(String, String)>,
}

impl WavDemuxer {
    /// 工厂函数
    pub fn create() -> LycheeResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self {
            streams: Vec::new(),
            data_offset: 0,
            data_size: 0,
            data_pos: 0,
            packet_size: 0,
            block_align: 0,
            sample_rate: 0,
            bit_rate: 0,
            metadata: Vec::new(),
        }))
    }

    fn resolve_codec(audio_format: u16, bits_per_sample: u16) -> LycheeResult<(CodecId, SampleFormat)> {
        match (audio_format, bits_per_sample) {
            (WAV_FORMAT_PCM, 8) => Ok((CodecId::PcmU8, SampleFormat::U8)),
            (WAV_FORMAT_PCM, 16) => Ok((CodecId::PcmS16le, SampleFormat::S16)),
            (WAV_FORMAT_PCM, 32) => Ok((CodecId::PcmS32le, SampleFormat::S32)),
            (WAV_FORMAT_IEEE_FLOAT, 32) => Ok((CodecId::PcmF32le, SampleFormat::F32)),
            _ => Err(LycheeError::Unsupported(format!(
                "不支持的 WAV 格式: 0x{:04X}, {} 位",
                audio_format, bits_per_sample
            ))),
        }
    }

    /// 解析 LIST/INFO 块中的文本字段
    fn parse_info_list(&mut self, io: &mut IoContext, chunk_size: u64) -> LycheeResult<()> {
        let body = io.read_bytes(chunk_size as usize)?;
        if body.len() < 4 || &body[0..4] != b"INFO" {
            return Ok(());
        }
        let mut pos = 4;
        while pos + 8 <= body.len() {
            let id = &body[pos..pos + 4];
            let size = u32::from_le_bytes([body[pos + 4], body[pos + 5], body[pos + 6], body[pos + 7]]) as usize;
            let start = pos + 8;
            let end = (start + size).min(body.len());
            let text = String::from_utf8_lossy(&body[start..end])
                .trim_end_matches('\0')
                .to_string();
            let key = match id {
                b"INAM" => "title",
                b"IART" => "artist",
                b"ICMT" => "comment",
                b"IPRD" => "album",
                b"ICRD" => "date",
                _ => "",
            };
            if !key.is_empty() {
                self.metadata.push((key.to_string(), text));
            }
            pos = start + size + (size & 1);
        }
        Ok(())
    }
}

impl Demuxer for WavDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }

    fn name(&self) -> &str {
        "wav"
    }

    fn open(&mut self, io: &mut IoContext) -> LycheeResult<()> {
        if &io.read_tag()? != b"RIFF" {
            return Err(LycheeError::InvalidData("不是有效的 RIFF 文件".into()));
        }
        let _file_size = io.read_u32_le()?;
        if &io.read_tag()? != b"WAVE" {
            return Err(LycheeError::InvalidData("不是有效的 WAVE 文件".into()));
        }

        let mut fmt: Option<(u16, u16, u32, u16, u16)> = None;
        loop {
            let chunk_id = match io.read_tag() {
                Ok(tag) => tag,
                Err(LycheeError::Eof) => break,
                Err(e) => return Err(e),
            };
            let chunk_size = u64::from(io.read_u32_le()?);
            match &chunk_id {
                b"fmt " => {
                    if chunk_size < 16 {
                        return Err(LycheeError::InvalidData("fmt 块大小不足 16 字节".into()));
                    }
                    let audio_format = io.read_u16_le()?;
                    let channels = io.read_u16_le()?;
                    let sample_rate = io.read_u32_le()?;
                    let _byte_rate = io.read_u32_le()?;
                    let block_align = io.read_u16_le()?;
                    let bits_per_sample = io.read_u16_le()?;
                    if chunk_size > 16 {
                        io.skip((chunk_size - 16) as usize)?;
                    }
                    fmt = Some((audio_format, channels, sample_rate, block_align, bits_per_sample));
                }
                b"LIST" => self.parse_info_list(io, chunk_size)?,
                b"data" => {
                    if fmt.is_none() {
                        return Err(LycheeError::InvalidData("data 块出现在 fmt 块之前".into()));
                    }
                    self.data_offset = io.position()?;
                    self.data_size = chunk_size;
                    if let Some(total) = io.size() {
                        self.data_size = self.data_size.min(total.saturating_sub(self.data_offset));
                    }
                    break;
                }
                _ => {
                    warn!("跳过未知块: '{}', 大小={}", String::from_utf8_lossy(&chunk_id), chunk_size);
                    io.skip(chunk_size as usize)?;
                }
            }
            if chunk_size % 2 != 0 {
                io.skip(1)?;
            }
        }

        let (audio_format, channels, sample_rate, block_align, bits_per_sample) =
            fmt.ok_or_else(|| LycheeError::InvalidData("未找到 fmt 块".into()))?;
        if self.data_offset == 0 {
            return Err(LycheeError::InvalidData("未找到 data 块".into()));
        }
        if sample_rate == 0 || block_align == 0 {
            return Err(LycheeError::InvalidData("采样率或 block_align 为 0".into()));
        }

        let (codec_id, sample_format) = Self::resolve_codec(audio_format, bits_per_sample)?;
        let time_base = Rational::new(1, sample_rate as i32);
        let total_samples = self.data_size / u64::from(block_align);
        self.bit_rate = u64::from(sample_rate) * u64::from(block_align) * 8;

        let mut codec_params = CodecParameters::new(
            codec_id,
            CodecParamsType::Audio(AudioCodecParams {
                sample_rate,
                channel_layout: ChannelLayout::from_channels(u32::from(channels)),
                sample_format,
                frame_size: 0,
            }),
        );
        codec_params.bit_rate = self.bit_rate;

        let mut stream = Stream::new(0, MediaType::Audio, codec_params, time_base);
        stream.duration = total_samples as i64;
        stream.start_time = 0;
        stream.nb_frames = total_samples;
        stream.disposition = Disposition::DEFAULT;

        self.streams = vec![stream];
        self.block_align = block_align;
        self.sample_rate = sample_rate;
        self.data_pos = 0;
        self.packet_size = (u32::from(block_align) * SAMPLES_PER_PACKET) as usize;

        debug!(
            "WAV 打开完成: {} Hz, {} 声道, {} 位, 总采样数={}",
            sample_rate, channels, bits_per_sample, total_samples,
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LycheeResult<Packet> {
        let ba = u64::from(self.block_align);
        let remaining = self.data_size.saturating_sub(self.data_pos);
        let size = (remaining.min(self.packet_size as u64) / ba) * ba;
        if size == 0 {
            return Err(LycheeError::Eof);
        }

        let data = io.read_bytes(size as usize)?;
        let mut pkt = Packet::from_data(data);
        pkt.stream_index = 0;
        pkt.pts = (self.data_pos / ba) as i64;
        pkt.dts = pkt.pts;
        pkt.duration = (size / ba) as i64;
        pkt.time_base = Rational::new(1, self.sample_rate as i32);
        pkt.flags = PacketFlags::KEYFRAME;
        pkt.pos = (self.data_offset + self.data_pos) as i64;

        self.data_pos += size;
        Ok(pkt)
    }

    fn seek(&mut self, io: &mut IoContext, request: &SeekRequest) -> LycheeResult<()> {
        if !io.is_seekable() {
            return Err(LycheeError::Unsupported("不支持在非可寻址流上 seek".into()));
        }
        let ba = u64::from(self.block_align);
        let byte_offset = if request.flags.byte {
            (request.target.max(0) as u64).saturating_sub(self.data_offset)
        } else {
            let sample = (i128::from(request.target.max(0)) * i128::from(self.sample_rate)
                / i128::from(TIME_BASE)) as u64;
            sample * ba
        };
        let aligned = (byte_offset.min(self.data_size) / ba) * ba;

        io.seek(std::io::SeekFrom::Start(self.data_offset + aligned))?;
        self.data_pos = aligned;
        debug!("WAV seek: 字节偏移={}", aligned);
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        if self.sample_rate > 0 && self.block_align > 0 {
            let total_samples = self.data_size / u64::from(self.block_align);
            Some(total_samples as f64 / f64::from(self.sample_rate))
        } else {
            None
        }
    }

    fn start_time(&self) -> Option<f64> {
        Some(0.0)
    }

    fn bit_rate(&self) -> u64 {
        self.bit_rate
    }

    fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }
}

/// WAV 格式探测器
pub struct WavProbe;

impl FormatProbe for WavProbe {
    fn probe(&self, data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            return Some(SCORE_MAX);
        }
        let lower = filename?.to_ascii_lowercase();
        if lower.ends_with(".wav") || lower.ends_with(".wave") {
            return Some(SCORE_EXTENSION);
        }
        None
    }

    fn format_id(&self) -> FormatId {
        FormatId::Wav
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::SeekFlags;

    /// 构建 PCM S16LE 单声道 8000Hz WAV, 可选 INFO 标题
    fn make_wav(nb_samples: usize, title: Option<&str>) -> Vec<u8> {
        let pcm: Vec<u8> = (0..nb_samples as i16).flat_map(|s| s.to_le_bytes()).collect();
        let mut list = Vec::new();
        if let Some(t) = title {
            let mut text = t.as_bytes().to_vec();
            text.push(0);
            list.extend_from_slice(b"INFO");
            list.extend_from_slice(b"INAM");
            list.extend_from_slice(&(text.len() as u32).to_le_bytes());
            list.extend_from_slice(&text);
            if text.len() % 2 != 0 {
                list.push(0);
            }
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&8000u32.to_le_bytes());
        buf.extend_from_slice(&16000u32.to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        if !list.is_empty() {
            buf.extend_from_slice(b"LIST");
            buf.extend_from_slice(&(list.len() as u32).to_le_bytes());
            buf.extend_from_slice(&list);
        }
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(pcm.len() as u32).to_le_bytes());
        buf.extend_from_slice(&pcm);
        buf
    }

    fn open(data: Vec<u8>) -> (Box<dyn Demuxer>, IoContext) {
        let mut io = IoContext::from_memory(data, "test.wav");
        let mut demuxer = WavDemuxer::create().unwrap();
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    #[test]
    fn test_wav_打开与读取() {
        let (mut demuxer, mut io) = open(make_wav(3000, Some("测试")));
        assert_eq!(demuxer.streams().len(), 1);
        assert_eq!(demuxer.streams()[0].codec_id(), CodecId::PcmS16le);
        assert!((demuxer.duration().unwrap() - 0.375).abs() < 1e-9);
        assert_eq!(demuxer.metadata()[0], ("title".to_string(), "测试".to_string()));

        let p1 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p1.pts, 0);
        assert_eq!(p1.duration, 1024);
        let p2 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p2.pts, 1024);
        let p3 = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(p3.duration, 3000 - 2048);
        assert!(matches!(demuxer.read_packet(&mut io), Err(LycheeError::Eof)));
    }

    #[test]
    fn test_wav_时间与字节seek() {
        let (mut demuxer, mut io) = open(make_wav(8000, None));
        demuxer.seek(&mut io, &SeekRequest::to_seconds(0.5)).unwrap();
        assert_eq!(demuxer.read_packet(&mut io).unwrap().pts, 4000);

        let byte_req = SeekRequest {
            flags: SeekFlags {
                byte: true,
                ..SeekFlags::default()
            },
            target: 44 + 200,
            ..SeekRequest::to_seconds(0.0)
        };
        demuxer.seek(&mut io, &byte_req).unwrap();
        let pkt = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(pkt.pts, 100);
        assert_eq!(pkt.pos, 244);
    }

    #[test]
    fn test_wav_探测() {
        assert_eq!(WavProbe.probe(&make_wav(1, None), None), Some(SCORE_MAX));
        assert_eq!(WavProbe.probe(&[], Some("A.WAV")), Some(SCORE_EXTENSION));
        assert_eq!(WavProbe.probe(&[], Some("a.mp3")), None);
    }
}
