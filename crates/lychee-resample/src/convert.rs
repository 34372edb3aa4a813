//! 采样格式, 声道布局与音量转换.

use lychee_core::{LycheeError, LycheeResult, SampleFormat};

/// 采样格式转换
///
/// 将交错格式的音频数据从一种采样格式转换为另一种,
/// 内部通过 f64 中间格式完成.
pub fn convert_samples(
    input: &[u8],
    src_format: SampleFormat,
    dst_format: SampleFormat,
    nb_samples: usize,
    channels: usize,
) -> LycheeResult<Vec<u8>> {
    let total = nb_samples * channels;
    let src_bps = src_format.bytes_per_sample() as usize;
    let dst_bps = dst_format.bytes_per_sample() as usize;

    if src_bps == 0 || dst_bps == 0 {
        return Err(LycheeError::InvalidArgument("无效的采样格式".to_string()));
    }

    let expected_len = total * src_bps;
    if input.len() < expected_len {
        return Err(LycheeError::InvalidArgument(format!(
            "数据不足: 期望 {expected_len} 字节, 实际 {} 字节",
            input.len()
        )));
    }

    let mut output = Vec::with_capacity(total * dst_bps);
    for chunk in input[..expected_len].chunks_exact(src_bps) {
        let sample = decode_sample(chunk, src_format)?;
        encode_sample(sample, dst_format, &mut output)?;
    }
    Ok(output)
}

/// 将平面格式的各声道数据交错为一个缓冲区
///
/// 输入已是交错格式 (只有一个平面) 时直接复制.
pub fn interleave_planes(
    planes: &[Vec<u8>],
    format: SampleFormat,
    nb_samples: usize,
) -> LycheeResult<Vec<u8>> {
    let bps = format.bytes_per_sample() as usize;
    if bps == 0 {
        return Err(LycheeError::InvalidArgument("无效的采样格式".to_string()));
    }
    if !format.is_planar() {
        return planes
            .first()
            .cloned()
            .ok_or_else(|| LycheeError::InvalidArgument("音频帧没有数据".to_string()));
    }
    if planes.iter().any(|p| p.len() < nb_samples * bps) {
        return Err(LycheeError::InvalidArgument("平面数据不足".to_string()));
    }

    let mut output = Vec::with_capacity(nb_samples * bps * planes.len());
    for s in 0..nb_samples {
        for plane in planes {
            output.extend_from_slice(&plane[s * bps..(s + 1) * bps]);
        }
    }
    Ok(output)
}

/// 声道混合
///
/// - 单声道 → 多声道: 复制
/// - 多声道 → 单声道: 取平均
/// - 其余: 对应声道直接映射, 多出的目标声道填静音
pub fn mix_channels(
    input: &[u8],
    format: SampleFormat,
    nb_samples: usize,
    src_channels: usize,
    dst_channels: usize,
) -> LycheeResult<Vec<u8>> {
    if src_channels == dst_channels {
        return Ok(input.to_vec());
    }

    let bps = format.bytes_per_sample() as usize;
    if bps == 0 || src_channels == 0 {
        return Err(LycheeError::InvalidArgument("无效的采样格式或声道数".to_string()));
    }

    let src_frame_size = src_channels * bps;
    if input.len() < nb_samples * src_frame_size {
        return Err(LycheeError::InvalidArgument("数据不足".to_string()));
    }
    let mut output = Vec::with_capacity(nb_samples * dst_channels * bps);
    let mut src_samples = Vec::with_capacity(src_channels);

    for frame in input.chunks_exact(src_frame_size).take(nb_samples) {
        src_samples.clear();
        for sample in frame.chunks_exact(bps) {
            src_samples.push(decode_sample(sample, format)?);
        }

        for dst_ch in 0..dst_channels {
            let val = if src_channels == 1 {
                src_samples[0]
            } else if dst_channels == 1 {
                src_samples.iter().sum::<f64>() / src_channels as f64
            } else if dst_ch < src_channels {
                src_samples[dst_ch]
            } else {
                0.0
            };
            encode_sample(val, format, &mut output)?;
        }
    }
    Ok(output)
}

/// 按线性音量缩放交错数据 (0.0 静音, 1.0 原样)
pub fn scale_volume(data: &mut [u8], format: SampleFormat, volume: f64) -> LycheeResult<()> {
    if (volume - 1.0).abs() < f64::EPSILON {
        return Ok(());
    }
    let bps = format.bytes_per_sample() as usize;
    if bps == 0 {
        return Err(LycheeError::InvalidArgument("无效的采样格式".to_string()));
    }
    if volume <= 0.0 {
        data.fill(format.silence_byte());
        return Ok(());
    }

    let mut scratch = Vec::with_capacity(bps);
    for sample in data.chunks_exact_mut(bps) {
        let v = decode_sample(sample, format)? * volume;
        scratch.clear();
        encode_sample(v, format, &mut scratch)?;
        sample.copy_from_slice(&scratch);
    }
    Ok(())
}

/// 将原始字节解码为归一化 f64 样本 (-1.0 ~ 1.0)
pub(crate) fn decode_sample(data: &[u8], format: SampleFormat) -> LycheeResult<f64> {
    match format.to_interleaved() {
        SampleFormat::U8 => Ok((data[0] as f64 - 128.0) / 128.0),
        SampleFormat::S16 => {
            let v = i16::from_le_bytes([data[0], data[1]]);
            Ok(v as f64 / 32768.0)
        }
        SampleFormat::S32 => {
            let v = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(v as f64 / 2_147_483_648.0)
        }
        SampleFormat::F32 => {
            let v = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            Ok(v as f64)
        }
        SampleFormat::F64 => {
            let v = f64::from_le_bytes([
                data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
            ]);
            Ok(v)
        }
        _ => Err(LycheeError::Unsupported(format!("不支持的采样格式: {format}"))),
    }
}

/// 将归一化 f64 样本编码为原始字节
pub(crate) fn encode_sample(value: f64, format: SampleFormat, output: &mut Vec<u8>) -> LycheeResult<()> {
    match format.to_interleaved() {
        SampleFormat::U8 => {
            let v = ((value * 128.0) + 128.0).round().clamp(0.0, 255.0) as u8;
            output.push(v);
        }
        SampleFormat::S16 => {
            let v = (value * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::S32 => {
            let v = (value * 2_147_483_648.0)
                .round()
                .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
            output.extend_from_slice(&v.to_le_bytes());
        }
        SampleFormat::F32 => {
            output.extend_from_slice(&(value as f32).to_le_bytes());
        }
        SampleFormat::F64 => {
            output.extend_from_slice(&value.to_le_bytes());
        }
        _ => {
            return Err(LycheeError::Unsupported(format!("不支持的采样格式: {format}")));
        }
    }
    Ok(())
}
