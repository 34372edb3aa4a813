//! # lychee-resample
//!
//! Lychee 播放引擎音频重采样库, 提供:
//! - 采样格式转换 (如 S16 -> F32)
//! - 声道布局转换 (如立体声 -> 单声道)
//! - 采样率转换 (线性插值)
//! - 音视频同步所需的采样数补偿 (拉伸或压缩一帧的采样数)

mod convert;

use log::trace;
use lychee_core::{ChannelLayout, LycheeError, LycheeResult, SampleFormat};

pub use convert::{convert_samples, interleave_planes, mix_channels, scale_volume};

/// 音频参数 (采样率, 采样格式, 声道布局)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub channel_layout: ChannelLayout,
}

impl AudioParams {
    /// 每秒字节数
    pub fn bytes_per_sec(&self) -> u32 {
        self.sample_rate * self.frame_bytes()
    }

    /// 每个采样帧 (所有声道) 的字节数
    pub fn frame_bytes(&self) -> u32 {
        self.sample_format.frame_bytes(self.channel_layout.channels)
    }
}

/// 重采样上下文
///
/// 配置一次后可多次复用. 源参数变化时调用方应重建上下文.
#[derive(Debug, Clone)]
pub struct ResampleContext {
    pub src: AudioParams,
    pub dst: AudioParams,
}

impl ResampleContext {
    /// 创建新的重采样上下文
    pub fn new(src: AudioParams, dst: AudioParams) -> LycheeResult<Self> {
        if src.sample_rate == 0 || dst.sample_rate == 0 {
            return Err(LycheeError::InvalidArgument("采样率不能为 0".to_string()));
        }
        if src.channel_layout.channels == 0 || dst.channel_layout.channels == 0 {
            return Err(LycheeError::InvalidArgument("声道数不能为 0".to_string()));
        }
        if dst.sample_format.is_planar() {
            return Err(LycheeError::Unsupported("输出必须为交错格式".to_string()));
        }
        Ok(Self { src, dst })
    }

    /// 是否需要转换 (源和目标参数不同)
    pub fn is_needed(&self) -> bool {
        self.src.sample_rate != self.dst.sample_rate
            || self.src.sample_format.to_interleaved() != self.dst.sample_format
            || self.src.channel_layout != self.dst.channel_layout
    }

    /// 执行重采样
    ///
    /// `input` 为交错格式字节, `nb_samples` 为每声道采样数.
    /// 返回转换后的交错数据和输出每声道采样数.
    pub fn convert(&self, input: &[u8], nb_samples: u32) -> LycheeResult<(Vec<u8>, u32)> {
        self.convert_with_compensation(input, nb_samples, nb_samples)
    }

    /// 带采样数补偿的重采样
    ///
    /// 以源采样率计, 把 `nb_samples` 个采样拉伸或压缩为 `wanted_nb_samples` 个,
    /// 再换算到目标采样率. 用于让音频追赶或等待主时钟.
    pub fn convert_with_compensation(
        &self,
        input: &[u8],
        nb_samples: u32,
        wanted_nb_samples: u32,
    ) -> LycheeResult<(Vec<u8>, u32)> {
        if !self.is_needed() && wanted_nb_samples == nb_samples {
            let len = (nb_samples * self.src.frame_bytes()) as usize;
            let end = len.min(input.len());
            return Ok((input[..end].to_vec(), nb_samples));
        }

        let src_channels = self.src.channel_layout.channels as usize;
        let dst_channels = self.dst.channel_layout.channels as usize;
        let src_format = self.src.sample_format.to_interleaved();
        let dst_format = self.dst.sample_format;
        let nb = nb_samples as usize;

        // 步骤 1: 采样格式转换
        let mut data = if src_format != dst_format {
            convert_samples(input, src_format, dst_format, nb, src_channels)?
        } else {
            input.to_vec()
        };

        // 步骤 2: 声道布局转换
        if src_channels != dst_channels {
            data = mix_channels(&data, dst_format, nb, src_channels, dst_channels)?;
        }

        // 步骤 3: 采样数补偿与采样率转换
        let out_samples = (u64::from(wanted_nb_samples) * u64::from(self.dst.sample_rate))
            .div_ceil(u64::from(self.src.sample_rate)) as usize;
        if out_samples != nb {
            data = resample_linear(&data, dst_format, nb, dst_channels, out_samples)?;
            trace!("重采样: {} -> {} 个采样 (期望 {})", nb, out_samples, wanted_nb_samples);
        }

        Ok((data, out_samples as u32))
    }
}

/// 线性插值, 把 `nb_samples` 个采样映射为 `out_samples` 个
fn resample_linear(
    input: &[u8],
    format: SampleFormat,
    nb_samples: usize,
    channels: usize,
    out_samples: usize,
) -> LycheeResult<Vec<u8>> {
    let bps = format.bytes_per_sample() as usize;
    if bps == 0 {
        return Err(LycheeError::InvalidArgument("无效的采样格式".to_string()));
    }
    if nb_samples == 0 || out_samples == 0 {
        return Ok(Vec::new());
    }
    if input.len() < nb_samples * channels * bps {
        return Err(LycheeError::InvalidArgument("数据不足".to_string()));
    }

    let samples = input[..nb_samples * channels * bps]
        .chunks_exact(bps)
        .map(|c| convert::decode_sample(c, format))
        .collect::<LycheeResult<Vec<f64>>>()?;

    let ratio = nb_samples as f64 / out_samples as f64;
    let mut output = Vec::with_capacity(out_samples * channels * bps);
    for i in 0..out_samples {
        let src_pos = i as f64 * ratio;
        let idx0 = (src_pos.floor() as usize).min(nb_samples - 1);
        let frac = src_pos - idx0 as f64;
        let idx1 = (idx0 + 1).min(nb_samples - 1);

        for ch in 0..channels {
            let s0 = samples[idx0 * channels + ch];
            let s1 = samples[idx1 * channels + ch];
            convert::encode_sample(s0 + (s1 - s0) * frac, format, &mut output)?;
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(rate: u32, fmt: SampleFormat, layout: ChannelLayout) -> AudioParams {
        AudioParams {
            sample_rate: rate,
            sample_format: fmt,
            channel_layout: layout,
        }
    }

    fn ramp(nb: usize) -> Vec<u8> {
        (0..nb).flat_map(|i| ((i * 100) as i16).to_le_bytes()).collect()
    }

    #[test]
    fn test_无需转换时原样输出() {
        let p = params(44100, SampleFormat::S16, ChannelLayout::STEREO);
        let ctx = ResampleContext::new(p, p).unwrap();
        assert!(!ctx.is_needed());
        let data = vec![7u8; 100];
        let (result, nb) = ctx.convert(&data, 25).unwrap();
        assert_eq!(result, data);
        assert_eq!(nb, 25);
        assert_eq!(p.bytes_per_sec(), 44100 * 4);
    }

    #[test]
    fn test_采样率转换_44100_到_48000() {
        let ctx = ResampleContext::new(
            params(44100, SampleFormat::S16, ChannelLayout::MONO),
            params(48000, SampleFormat::S16, ChannelLayout::MONO),
        )
        .unwrap();
        let (result, nb_out) = ctx.convert(&ramp(100), 100).unwrap();
        let expected = (100u64 * 48000).div_ceil(44100) as u32;
        assert_eq!(nb_out, expected);
        assert_eq!(result.len(), nb_out as usize * 2);
    }

    #[test]
    fn test_格式与声道联合转换() {
        let ctx = ResampleContext::new(
            params(8000, SampleFormat::F32p, ChannelLayout::MONO),
            params(8000, SampleFormat::S16, ChannelLayout::STEREO),
        )
        .unwrap();
        let input = 0.5f32.to_le_bytes().to_vec();
        let (result, nb) = ctx.convert(&input, 1).unwrap();
        assert_eq!(nb, 1);
        assert_eq!(result.len(), 4);
        assert_eq!(i16::from_le_bytes([result[0], result[1]]), 16384);
        assert_eq!(i16::from_le_bytes([result[2], result[3]]), 16384);
    }

    #[test]
    fn test_同步补偿拉伸与压缩() {
        let p = params(48000, SampleFormat::S16, ChannelLayout::MONO);
        let ctx = ResampleContext::new(p, p).unwrap();

        let (stretched, nb) = ctx.convert_with_compensation(&ramp(100), 100, 110).unwrap();
        assert_eq!(nb, 110);
        assert_eq!(stretched.len(), 220);

        let (shrunk, nb) = ctx.convert_with_compensation(&ramp(100), 100, 90).unwrap();
        assert_eq!(nb, 90);
        assert_eq!(i16::from_le_bytes([shrunk[0], shrunk[1]]), 0);
    }

    #[test]
    fn test_无效参数() {
        let ok = params(48000, SampleFormat::S16, ChannelLayout::MONO);
        assert!(ResampleContext::new(params(0, SampleFormat::S16, ChannelLayout::MONO), ok).is_err());
        assert!(ResampleContext::new(ok, params(48000, SampleFormat::S16p, ChannelLayout::MONO)).is_err());
    }
}
