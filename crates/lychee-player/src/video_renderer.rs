//! 视频渲染.
//!
//! 宿主按 [`VideoRenderer::refresh`] 返回的剩余时间轮询. 每次刷新决定是否切换到下一帧:
//! 帧间延迟以帧时长为基础, 视频不是主时钟时按与主时钟的误差加长或缩短,
//! 已来不及显示的帧直接丢弃.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use lychee_codec::Frame;
use lychee_core::time::relative_seconds;

use crate::config::{PlayerConfig, SyncConfig};
use crate::frame_queue::{DecodedFrame, FrameQueue};
use crate::media_clock::{MediaClock, SyncType};
use crate::message::{MessageQueue, PlayerMessage};
use crate::packet_queue::PacketQueue;
use crate::sink::VideoSink;

/// 丢帧计数与当前画面宽高比
#[derive(Debug, Default)]
pub struct FrameStats {
    frame_drops_early: AtomicU64,
    frame_drops_late: AtomicU64,
    /// f64 的位模式
    aspect_ratio: AtomicU64,
}

impl FrameStats {
    /// 解码后提前丢帧, 返回累计值
    pub fn add_early_drop(&self) -> u64 {
        self.frame_drops_early.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 显示前丢帧, 返回累计值
    pub fn add_late_drop(&self) -> u64 {
        self.frame_drops_late.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frame_drops_early(&self) -> u64 {
        self.frame_drops_early.load(Ordering::Relaxed)
    }

    pub fn frame_drops_late(&self) -> u64 {
        self.frame_drops_late.load(Ordering::Relaxed)
    }

    pub fn set_aspect_ratio(&self, ratio: f64) {
        self.aspect_ratio.store(ratio.to_bits(), Ordering::Relaxed);
    }

    /// 最近显示帧的宽高比, 尚未显示时为 0
    pub fn aspect_ratio(&self) -> f64 {
        f64::from_bits(self.aspect_ratio.load(Ordering::Relaxed))
    }
}

/// 字幕队列
pub struct SubtitleQueues {
    pub subpq: Arc<FrameQueue>,
    pub subtitleq: Arc<PacketQueue>,
}

/// 视频渲染器
pub struct VideoRenderer {
    pictq: Arc<FrameQueue>,
    videoq: Arc<PacketQueue>,
    subtitles: Option<SubtitleQueues>,
    clocks: Arc<MediaClock>,
    sink: Box<dyn VideoSink>,
    messages: Arc<MessageQueue>,
    stats: Arc<FrameStats>,
    sync: SyncConfig,
    framedrop: Option<bool>,
    /// 超过此值的帧间隔视为时间戳跳变
    max_frame_duration: f64,
    force_refresh: bool,
    first_frame_loaded: bool,
    last_subtitle: Option<String>,
}

impl VideoRenderer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pictq: Arc<FrameQueue>,
        videoq: Arc<PacketQueue>,
        clocks: Arc<MediaClock>,
        sink: Box<dyn VideoSink>,
        messages: Arc<MessageQueue>,
        stats: Arc<FrameStats>,
        config: &PlayerConfig,
        max_frame_duration: f64,
    ) -> Self {
        Self {
            pictq,
            videoq,
            subtitles: None,
            clocks,
            sink,
            messages,
            stats,
            sync: config.sync.clone(),
            framedrop: config.framedrop,
            max_frame_duration,
            force_refresh: false,
            first_frame_loaded: false,
            last_subtitle: None,
        }
    }

    /// 启用字幕叠加
    pub fn with_subtitles(mut self, subtitles: SubtitleQueues) -> Self {
        self.subtitles = Some(subtitles);
        self
    }

    /// 需要重画当前帧
    pub fn force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn request_refresh(&mut self) {
        self.force_refresh = true;
    }

    /// 取回视频设备, 供下次打开复用
    pub fn into_sink(self) -> Box<dyn VideoSink> {
        self.sink
    }

    /// 刷新一次
    ///
    /// `remaining_time` 传入默认轮询间隔, 返回时被缩短为距下一帧的时间.
    pub fn refresh(&mut self, remaining_time: &mut f64) {
        self.refresh_frames(remaining_time);
        if self.force_refresh && self.pictq.rindex_shown() {
            self.display();
        }
        self.force_refresh = false;
    }

    fn refresh_frames(&mut self, remaining_time: &mut f64) {
        loop {
            if self.pictq.nb_remaining() == 0 {
                return;
            }
            let (Some(lastvp), Some(vp)) = (self.pictq.peek_last(), self.pictq.peek()) else {
                return;
            };
            if vp.serial != self.videoq.latest_serial() {
                self.pictq.next();
                continue;
            }
            // 第一帧到达即显示
            let first = !self.pictq.rindex_shown();
            if first || lastvp.serial != vp.serial {
                self.clocks.set_frame_timer(relative_seconds());
            }
            if self.clocks.is_paused() {
                return;
            }
            // 后面还有帧时不等显示时间直接丢弃
            if self.pictq.nb_remaining() > 1 && self.lags_master(vp.pts) {
                let drops = self.stats.add_late_drop();
                debug!("丢弃过期视频帧 pts={:.3}, 累计 {}", vp.pts, drops);
                self.pictq.next();
                continue;
            }

            let delay = if first {
                0.0
            } else {
                let last_duration = self.vp_duration(&lastvp, &vp);
                self.compute_target_delay(last_duration)
            };

            let time = relative_seconds();
            let mut frame_timer = self.clocks.frame_timer();
            if time < frame_timer + delay {
                *remaining_time = remaining_time.min(frame_timer + delay - time);
                return;
            }

            frame_timer += delay;
            if delay > 0.0 && time - frame_timer > self.sync.av_sync_threshold_max {
                frame_timer = time;
            }
            self.clocks.set_frame_timer(frame_timer);

            if !vp.pts.is_nan() {
                self.clocks.video().set(vp.pts, vp.serial);
                self.clocks.external().sync_to(self.clocks.video());
            }

            self.retire_subtitles(vp.pts);
            self.pictq.next();
            self.force_refresh = true;
            return;
        }
    }

    /// 视频不是主时钟且启用丢帧时, pts 落后主时钟超过失步阈值
    fn lags_master(&self, pts: f64) -> bool {
        let master = self.clocks.master_sync_type();
        if master == SyncType::Video || !self.framedrop.unwrap_or(true) {
            return false;
        }
        self.clocks.master_clock() - pts > self.sync.av_nosync_threshold
    }

    /// 两帧之间的显示时长
    fn vp_duration(&self, vp: &DecodedFrame, nextvp: &DecodedFrame) -> f64 {
        if vp.serial != nextvp.serial {
            return 0.0;
        }
        let duration = nextvp.pts - vp.pts;
        if duration.is_nan() || duration <= 0.0 || duration > self.max_frame_duration {
            vp.duration
        } else {
            duration
        }
    }

    /// 按视频时钟与主时钟的误差调整帧间延迟
    fn compute_target_delay(&self, delay: f64) -> f64 {
        if self.clocks.master_sync_type() == SyncType::Video {
            return delay;
        }
        let diff = self.clocks.video().get() - self.clocks.master_clock();
        let adjusted = target_delay(delay, diff, &self.sync, self.max_frame_duration);
        debug!("视频延迟={:.3} A-V={:.3}", adjusted, -diff);
        adjusted
    }

    /// 移除已过期的字幕
    fn retire_subtitles(&self, video_pts: f64) {
        let Some(subs) = &self.subtitles else {
            return;
        };
        while subs.subpq.nb_remaining() > 0 {
            let Some(sp) = subs.subpq.peek() else {
                break;
            };
            let next_started = subs
                .subpq
                .peek_next()
                .is_some_and(|sp2| video_pts > sp2.pts + subtitle_start(&sp2));
            if sp.serial != subs.subtitleq.latest_serial()
                || video_pts > sp.pts + sp.duration
                || next_started
            {
                subs.subpq.next();
            } else {
                break;
            }
        }
    }

    /// 当前帧应叠加的字幕
    fn current_subtitle(&self, video_pts: f64) -> Option<String> {
        let subs = self.subtitles.as_ref()?;
        let sp = subs.subpq.peek()?;
        if video_pts < sp.pts + subtitle_start(&sp) {
            return None;
        }
        match &sp.frame {
            Frame::Subtitle(s) => Some(s.text.clone()),
            _ => None,
        }
    }

    fn display(&mut self) {
        let Some(vp) = self.pictq.peek_last() else {
            return;
        };
        let subtitle = self.current_subtitle(vp.pts);
        if vp.is_uploaded() && subtitle == self.last_subtitle {
            return;
        }
        self.sink.paint(&vp, subtitle.as_deref());
        vp.mark_uploaded();
        self.last_subtitle = subtitle;

        if let Some((width, height)) = vp.dimensions() {
            if height > 0 {
                let sar = vp.sample_aspect_ratio().to_f64_or_one();
                self.stats
                    .set_aspect_ratio(f64::from(width) * sar / f64::from(height));
            }
            if !self.first_frame_loaded {
                self.first_frame_loaded = true;
                self.messages
                    .post(PlayerMessage::VideoFrameLoaded { width, height });
            }
        }
    }
}

/// 帧间延迟校正
///
/// `diff` 为视频时钟减主时钟. 落后时缩短延迟 (最少为 0), 超前时加倍延迟,
/// 帧时长本身已超过重复帧阈值时改为加上整个误差.
/// 误差未知或超过 `max_frame_duration` 时不校正.
fn target_delay(delay: f64, diff: f64, sync: &SyncConfig, max_frame_duration: f64) -> f64 {
    let sync_threshold = delay
        .min(sync.av_sync_threshold_max)
        .max(sync.av_sync_threshold_min);
    if diff.is_nan() || diff.abs() >= max_frame_duration {
        return delay;
    }
    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > sync.av_sync_framedup_threshold {
        delay + diff
    } else if diff >= sync_threshold {
        2.0 * delay
    } else {
        delay
    }
}

fn subtitle_start(sp: &DecodedFrame) -> f64 {
    match &sp.frame {
        Frame::Subtitle(s) => f64::from(s.start_display_time) / 1000.0,
        _ => 0.0,
    }
}
