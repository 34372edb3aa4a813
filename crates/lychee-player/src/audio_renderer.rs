//! 音频渲染.
//!
//! 设备线程拉取数据时, 从音频帧队列取帧, 转换为设备格式后填入缓冲.
//! 音频不是主时钟时, 按与主时钟的误差微调每帧输出的采样数.
//! 每次回调结束后以回调开始的时刻为锚点更新音频时钟.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use log::{trace, warn};
use lychee_codec::Frame;
use lychee_core::time::relative_seconds;
use lychee_resample::{AudioParams, ResampleContext, interleave_planes, scale_volume};

use crate::config::SyncConfig;
use crate::frame_queue::FrameQueue;
use crate::media_clock::{MediaClock, SyncType};
use crate::packet_queue::PacketQueue;
use crate::sink::AudioSpec;

/// 解码失败时输出静音的最小字节数
pub const AUDIO_MIN_BUFFER_SIZE: usize = 512;

/// 音量与静音, 可在任意线程修改
#[derive(Debug)]
pub struct VolumeControl {
    /// 0..=100
    volume: AtomicU32,
    muted: AtomicBool,
}

impl VolumeControl {
    pub fn new(volume: u32, muted: bool) -> Self {
        Self {
            volume: AtomicU32::new(volume.min(100)),
            muted: AtomicBool::new(muted),
        }
    }

    pub fn set_volume(&self, volume: u32) {
        self.volume.store(volume.min(100), Ordering::Relaxed);
    }

    pub fn volume(&self) -> u32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// 线性增益, 静音时为 0
    pub fn gain(&self) -> f64 {
        if self.is_muted() {
            0.0
        } else {
            f64::from(self.volume()) / 100.0
        }
    }
}

// ========================
// 漂移校正
// ========================

/// 音频相对主时钟的漂移校正
///
/// 误差经指数滑动平均后, 累计足够次数且平均值超过阈值才开始校正,
/// 校正幅度不超过 `sample_correction_percent_max`.
#[derive(Debug, Clone)]
pub struct AudioDriftCorrector {
    diff_cum: f64,
    avg_coef: f64,
    avg_count: u32,
    avg_nb: u32,
    /// 开始校正的平均误差阈值 (秒)
    threshold: f64,
    nosync_threshold: f64,
    percent_max: u32,
}

impl AudioDriftCorrector {
    pub fn new(sync: &SyncConfig, threshold: f64) -> Self {
        let avg_nb = sync.audio_diff_avg_nb.max(1);
        Self {
            diff_cum: 0.0,
            avg_coef: (0.01f64.ln() / f64::from(avg_nb)).exp(),
            avg_count: 0,
            avg_nb,
            threshold,
            nosync_threshold: sync.av_nosync_threshold,
            percent_max: sync.sample_correction_percent_max.min(100),
        }
    }

    pub fn reset(&mut self) {
        self.diff_cum = 0.0;
        self.avg_count = 0;
    }

    /// 根据本次误差 `diff` (音频时钟 - 主时钟) 计算期望输出的采样数
    pub fn wanted_samples(&mut self, nb_samples: u32, diff: f64, sample_rate: u32) -> u32 {
        if !(diff.is_finite() && diff.abs() < self.nosync_threshold) {
            self.reset();
            return nb_samples;
        }

        self.diff_cum = diff + self.avg_coef * self.diff_cum;
        if self.avg_count < self.avg_nb {
            self.avg_count += 1;
            return nb_samples;
        }

        let avg_diff = self.diff_cum * (1.0 - self.avg_coef);
        if avg_diff.abs() < self.threshold {
            return nb_samples;
        }
        let nb = i64::from(nb_samples);
        let wanted = nb + (diff * f64::from(sample_rate)) as i64;
        let min = nb * i64::from(100 - self.percent_max) / 100;
        let max = nb * i64::from(100 + self.percent_max) / 100;
        let wanted = wanted.clamp(min, max);
        trace!(
            "音频漂移校正: diff={:.3}, avg={:.3}, {} -> {} 个采样",
            diff, avg_diff, nb_samples, wanted
        );
        wanted as u32
    }
}

// ========================
// 渲染器
// ========================

/// 音频渲染器
pub struct AudioRenderer {
    sampq: Arc<FrameQueue>,
    audioq: Arc<PacketQueue>,
    clocks: Arc<MediaClock>,
    volume: Arc<VolumeControl>,
    /// 设备参数
    tgt: AudioParams,
    hw_buf_size: usize,
    bytes_per_sec: f64,
    resampler: Option<ResampleContext>,
    buf: Vec<u8>,
    buf_index: usize,
    /// 当前缓冲结束处的音频时间, 未知时为 NaN
    audio_clock: f64,
    audio_clock_serial: i32,
    corrector: AudioDriftCorrector,
}

impl AudioRenderer {
    pub fn new(
        sampq: Arc<FrameQueue>,
        audioq: Arc<PacketQueue>,
        clocks: Arc<MediaClock>,
        spec: &AudioSpec,
        sync: &SyncConfig,
        volume: Arc<VolumeControl>,
    ) -> Self {
        let tgt = AudioParams {
            sample_rate: spec.sample_rate,
            sample_format: spec.sample_format,
            channel_layout: spec.channel_layout,
        };
        let hw_buf_size = spec.buffer_size();
        let bytes_per_sec = f64::from(tgt.bytes_per_sec().max(1));
        Self {
            sampq,
            audioq,
            clocks,
            volume,
            tgt,
            hw_buf_size,
            bytes_per_sec,
            resampler: None,
            buf: Vec::new(),
            buf_index: 0,
            audio_clock: f64::NAN,
            audio_clock_serial: -1,
            corrector: AudioDriftCorrector::new(sync, hw_buf_size as f64 / bytes_per_sec),
        }
    }

    pub fn target(&self) -> &AudioParams {
        &self.tgt
    }

    /// 填满设备缓冲
    pub fn fill(&mut self, stream: &mut [u8]) {
        let callback_time = relative_seconds();
        let silence = self.tgt.sample_format.silence_byte();
        let gain = self.volume.gain();
        let mut offset = 0;

        while offset < stream.len() {
            if self.buf_index < self.buf.len() && self.is_stale() {
                // seek 之后缓冲中剩下的旧数据
                self.buf_index = self.buf.len();
            }
            if self.buf_index >= self.buf.len() {
                if self.decode_frame(callback_time).is_none() {
                    let frame_size = self.tgt.frame_bytes().max(1) as usize;
                    self.buf.clear();
                    self.buf
                        .resize(AUDIO_MIN_BUFFER_SIZE / frame_size * frame_size, silence);
                    self.audio_clock = f64::NAN;
                }
                self.buf_index = 0;
                if self.buf.is_empty() {
                    stream[offset..].fill(silence);
                    break;
                }
            }

            let len = (self.buf.len() - self.buf_index).min(stream.len() - offset);
            let out = &mut stream[offset..offset + len];
            if gain <= 0.0 {
                out.fill(silence);
            } else {
                out.copy_from_slice(&self.buf[self.buf_index..self.buf_index + len]);
                if let Err(e) = scale_volume(out, self.tgt.sample_format, gain) {
                    warn!("音量调整失败: {}", e);
                }
            }
            offset += len;
            self.buf_index += len;
        }

        let write_buf_size = self.buf.len() - self.buf_index;
        if !self.audio_clock.is_nan() && !self.is_stale() {
            let latency = (2 * self.hw_buf_size + write_buf_size) as f64 / self.bytes_per_sec;
            self.clocks.audio().set_at(
                self.audio_clock - latency,
                self.audio_clock_serial,
                callback_time,
            );
            self.clocks.external().sync_to(self.clocks.audio());
        }
    }

    /// 缓冲中的数据属于已被 seek 作废的 serial
    fn is_stale(&self) -> bool {
        !self.audio_clock.is_nan() && self.audio_clock_serial != self.audioq.latest_serial()
    }

    /// 解码并转换一帧到内部缓冲, 返回缓冲字节数
    ///
    /// 最多等待半个设备缓冲的时长, 超时返回 None 由调用方补静音.
    fn decode_frame(&mut self, callback_time: f64) -> Option<usize> {
        if self.clocks.is_paused() {
            return None;
        }
        let max_wait = self.hw_buf_size as f64 / self.bytes_per_sec / 2.0;

        let af = loop {
            while self.sampq.nb_remaining() == 0 {
                if self.audioq.is_aborted() || relative_seconds() - callback_time > max_wait {
                    return None;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let af = self.sampq.peek()?;
            self.sampq.next();
            if af.serial == self.audioq.latest_serial() {
                break af;
            }
        };

        let Frame::Audio(frame) = &af.frame else {
            return None;
        };
        let src = AudioParams {
            sample_rate: frame.sample_rate,
            sample_format: frame.sample_format,
            channel_layout: frame.channel_layout,
        };
        let nb_samples = frame.nb_samples;
        let data = match interleave_planes(&frame.data, frame.sample_format, nb_samples as usize) {
            Ok(data) => data,
            Err(e) => {
                warn!("音频帧交错失败: {}", e);
                return None;
            }
        };

        let wanted = self.synchronize(nb_samples, src.sample_rate);
        if self.resampler.as_ref().is_none_or(|r| r.src != src) {
            match ResampleContext::new(src, self.tgt) {
                Ok(ctx) => self.resampler = Some(ctx),
                Err(e) => {
                    warn!("无法创建重采样上下文: {}", e);
                    return None;
                }
            }
        }
        let resampler = self.resampler.as_ref()?;
        let (out, _) = match resampler.convert_with_compensation(&data, nb_samples, wanted) {
            Ok(out) => out,
            Err(e) => {
                warn!("音频重采样失败: {}", e);
                return None;
            }
        };

        self.audio_clock = if af.pts.is_nan() {
            f64::NAN
        } else {
            af.pts + f64::from(nb_samples) / f64::from(src.sample_rate.max(1))
        };
        self.audio_clock_serial = af.serial;
        self.buf = out;
        Some(self.buf.len())
    }

    /// 音频不是主时钟时计算校正后的采样数
    fn synchronize(&mut self, nb_samples: u32, sample_rate: u32) -> u32 {
        if self.clocks.master_sync_type() == SyncType::Audio {
            return nb_samples;
        }
        let diff = self.clocks.audio().get() - self.clocks.master_clock();
        self.corrector.wanted_samples(nb_samples, diff, sample_rate)
    }
}
