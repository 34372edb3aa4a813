//! 音频输出模块.
//!
//! 使用 cpal 进行跨平台音频输出. 引擎按 S16 交错格式填充,
//! 设备回调中再转换为设备的采样类型.
//! cpal 的流对象不能跨线程移动, 由专用线程持有, 通过通道控制.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{debug, error, info, warn};
use lychee_core::{ChannelLayout, LycheeError, LycheeResult, SampleFormat};
use lychee_player::{AudioCallback, AudioSink, AudioSpec};

enum Control {
    Pause(bool),
    Close,
}

/// cpal 音频设备
#[derive(Default)]
pub struct CpalAudioDevice {
    control: Option<mpsc::Sender<Control>>,
    thread: Option<JoinHandle<()>>,
    paused: bool,
}

impl CpalAudioDevice {
    /// 检查默认输出设备是否可用
    pub fn detect() -> LycheeResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| LycheeError::Device("找不到音频输出设备".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| LycheeError::Device(format!("获取默认音频配置失败: {e}")))?;
        info!(
            "音频设备: {:?}, {}Hz/{}ch/{:?}",
            device.name().unwrap_or_default(),
            config.sample_rate(),
            config.channels(),
            config.sample_format()
        );
        Ok(Self::default())
    }
}

/// 按设备默认配置协商参数: 采样率与声道数跟随设备, 格式固定为 S16
fn negotiate(wanted: &AudioSpec, sample_rate: u32, channels: u16) -> AudioSpec {
    AudioSpec {
        sample_rate,
        channel_layout: ChannelLayout::from_channels(u32::from(channels)),
        sample_format: SampleFormat::S16,
        samples: wanted.samples,
    }
}

/// 用 S16 缓冲驱动回调, 再转换为设备采样类型
fn fill_device<T: cpal::SizedSample + cpal::FromSample<i16>>(
    data: &mut [T],
    bytes: &mut Vec<u8>,
    callback: &mut AudioCallback,
) {
    bytes.resize(data.len() * 2, 0);
    callback(bytes.as_mut_slice());
    for (sample, raw) in data.iter_mut().zip(bytes.chunks_exact(2)) {
        *sample = T::from_sample(i16::from_le_bytes([raw[0], raw[1]]));
    }
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<i16>>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut callback: AudioCallback,
) -> LycheeResult<cpal::Stream> {
    let mut bytes = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                fill_device(data, &mut bytes, &mut callback);
            },
            move |err| {
                error!("音频输出错误: {}", err);
            },
            None,
        )
        .map_err(|e| LycheeError::Device(format!("创建音频流失败: {e}")))
}

/// 在设备线程中打开流, 成功后把协商结果发回
fn open_stream(
    wanted: &AudioSpec,
    callback: AudioCallback,
) -> LycheeResult<(cpal::Stream, AudioSpec)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| LycheeError::Device("找不到音频输出设备".into()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| LycheeError::Device(format!("获取默认音频配置失败: {e}")))?;
    let format = supported.sample_format();
    let config = supported.config();
    let spec = negotiate(wanted, config.sample_rate, config.channels);

    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, callback)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, callback)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, callback)?,
        other => {
            return Err(LycheeError::Device(format!("不支持的设备采样格式: {other:?}")));
        }
    };
    stream
        .play()
        .map_err(|e| LycheeError::Device(format!("启动音频播放失败: {e}")))?;
    Ok((stream, spec))
}

impl AudioSink for CpalAudioDevice {
    fn open(&mut self, wanted: &AudioSpec, callback: AudioCallback) -> LycheeResult<AudioSpec> {
        if self.thread.is_some() {
            return Err(LycheeError::Device("音频设备已打开".into()));
        }
        let wanted = *wanted;
        let start_paused = self.paused;
        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<LycheeResult<AudioSpec>>(1);

        let handle = thread::Builder::new()
            .name("lychee-cpal".into())
            .spawn(move || {
                let stream = match open_stream(&wanted, callback) {
                    Ok((stream, spec)) => {
                        let _ = ready_tx.send(Ok(spec));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if start_paused {
                    let _ = stream.pause();
                }
                // 发送端丢弃也视为关闭
                while let Ok(Control::Pause(paused)) = control_rx.recv() {
                    let result = if paused { stream.pause() } else { stream.play() };
                    if let Err(e) = result {
                        warn!("切换音频流状态失败: {}", e);
                    }
                }
            })
            .map_err(|e| LycheeError::Device(format!("启动音频设备线程失败: {e}")))?;

        let spec = match ready_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(LycheeError::Device("音频设备线程异常退出".into())),
        };
        match spec {
            Ok(spec) => {
                debug!(
                    "音频输出已启动: 期望 {}Hz/{}ch, 设备 {}Hz/{}ch",
                    wanted.sample_rate,
                    wanted.channel_layout.channels,
                    spec.sample_rate,
                    spec.channel_layout.channels
                );
                self.control = Some(control_tx);
                self.thread = Some(handle);
                Ok(spec)
            }
            Err(e) => {
                let _ = handle.join();
                Err(e)
            }
        }
    }

    fn pause(&mut self, paused: bool) {
        self.paused = paused;
        if let Some(control) = &self.control {
            let _ = control.send(Control::Pause(paused));
        }
    }

    fn close(&mut self) {
        if let Some(control) = self.control.take() {
            let _ = control.send(Control::Close);
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("音频设备线程异常退出");
            }
        }
    }
}

impl Drop for CpalAudioDevice {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_协商参数跟随设备() {
        let wanted = AudioSpec::wanted(44100, ChannelLayout::MONO);
        let spec = negotiate(&wanted, 48000, 2);
        assert_eq!(spec.sample_rate, 48000);
        assert_eq!(spec.channel_layout.channels, 2);
        assert_eq!(spec.sample_format, SampleFormat::S16);
        assert_eq!(spec.samples, wanted.samples);
    }

    #[test]
    fn test_s16_转换为设备采样类型() {
        let mut callback: AudioCallback = Box::new(|buf: &mut [u8]| {
            let samples = [0i16, i16::MAX, i16::MIN, 16384];
            for (dst, s) in buf.chunks_exact_mut(2).zip(samples) {
                dst.copy_from_slice(&s.to_le_bytes());
            }
        });
        let mut bytes = Vec::new();

        let mut out = [1.0f32; 4];
        fill_device(&mut out, &mut bytes, &mut callback);
        assert_eq!(bytes.len(), 8);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 1.0).abs() < 1e-3);
        assert_eq!(out[2], -1.0);
        assert!((out[3] - 0.5).abs() < 1e-3);

        let mut out = [0i16; 4];
        fill_device(&mut out, &mut bytes, &mut callback);
        assert_eq!(out, [0, i16::MAX, i16::MIN, 16384]);

        let mut out = [0u16; 2];
        fill_device(&mut out, &mut bytes, &mut callback);
        assert_eq!(bytes.len(), 4);
        assert_eq!(out, [32768, 65535]);
    }
}
