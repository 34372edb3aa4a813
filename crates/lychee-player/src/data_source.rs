//! 读取线程.
//!
//! 循环: 处理 seek 请求, 补发封面, 按队列水位限流, 检查播放完成,
//! 读取一个数据包并分发到对应流的队列, 最后更新缓冲状态.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use lychee_codec::Packet;
use lychee_core::{LycheeError, LycheeResult, NOPTS_VALUE, TIME_BASE, timestamp};
use lychee_format::{Demuxer, IoContext, SeekFlags, SeekRequest};

use crate::message::{PlayerMessage, PlayerState};
use crate::player::{PlaybackContext, StreamKind, StreamSlot};

/// 缓冲检查间隔 (正常播放时)
const BUFFERING_CHECK_INTERVAL: Duration = Duration::from_millis(500);
/// 缓冲检查间隔 (缓冲中)
const BUFFERING_CHECK_INTERVAL_FAST: Duration = Duration::from_millis(20);

/// 唤醒读取线程的信号
///
/// 解码线程把队列取空时通知, 避免读取线程等满整个限流间隔.
pub struct ContinueRead {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl ContinueRead {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cond.notify_all();
    }

    /// 等待通知或超时
    pub fn wait_timeout(&self, timeout: Duration) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if !*pending {
            pending = self
                .cond
                .wait_timeout(pending, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *pending = false;
    }
}

impl Default for ContinueRead {
    fn default() -> Self {
        Self::new()
    }
}

/// 读取线程状态
pub struct DataSource {
    ctx: Arc<PlaybackContext>,
    demuxer: Box<dyn Demuxer>,
    io: IoContext,
    last_buffering_check: Option<Instant>,
}

impl DataSource {
    pub fn new(ctx: Arc<PlaybackContext>, demuxer: Box<dyn Demuxer>, io: IoContext) -> Self {
        Self {
            ctx,
            demuxer,
            io,
            last_buffering_check: None,
        }
    }

    /// 在独立线程中运行
    pub fn spawn(self) -> LycheeResult<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("lychee-read".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    pub fn run(mut self) {
        let wait = Duration::from_millis(self.ctx.config.queue.read_wait_ms);
        info!("读取线程启动: {}", self.io.url());

        loop {
            if self.ctx.is_abort_requested() {
                break;
            }
            self.handle_seek();
            self.queue_attachments();

            if !self.ctx.infinite_buffer() && self.queues_full() {
                self.ctx.continue_read.wait_timeout(wait);
                continue;
            }

            self.check_completion();

            match self.demuxer.read_packet(&mut self.io) {
                Ok(packet) => {
                    self.ctx.eof.store(false, Ordering::SeqCst);
                    self.route(packet);
                    self.check_buffering();
                }
                Err(e) if e.is_eof() => {
                    if !self.ctx.eof.swap(true, Ordering::SeqCst) {
                        debug!("到达输入末尾");
                        self.put_null_packets();
                    }
                    self.check_buffering();
                    self.ctx.continue_read.wait_timeout(wait);
                }
                Err(LycheeError::Aborted) => break,
                Err(e) if e.is_transient() => {
                    debug!("读取暂时失败, 稍后重试: {}", e);
                    self.ctx.continue_read.wait_timeout(wait);
                }
                Err(e) => {
                    error!("{}: 读取失败: {}", self.io.url(), e);
                    self.ctx.eof.store(true, Ordering::SeqCst);
                    self.put_null_packets();
                    self.ctx.state.set(PlayerState::Idle);
                    break;
                }
            }
        }
        info!("读取线程退出");
    }

    // ========================
    // seek
    // ========================

    fn handle_seek(&mut self) {
        let (target, rel, byte) = {
            let control = self.ctx.control();
            if !control.seek_req {
                return;
            }
            (control.seek_pos, control.seek_rel, control.seek_by_bytes)
        };

        let request = SeekRequest {
            stream_index: None,
            min_ts: if rel > 0 { target - rel + 2 } else { i64::MIN },
            target,
            max_ts: if rel < 0 { target - rel - 2 } else { i64::MAX },
            flags: SeekFlags {
                byte,
                ..SeekFlags::default()
            },
        };

        match self.demuxer.seek(&mut self.io, &request) {
            Ok(()) => {
                for (_, slot) in self.ctx.slots() {
                    slot.packets.flush();
                    if slot.packets.put_flush().is_err() {
                        debug!("队列已中止, 跳过刷新标记");
                    }
                }
                let clock = if byte {
                    f64::NAN
                } else {
                    target as f64 / TIME_BASE as f64
                };
                self.ctx.clocks.external().set(clock, 0);
                debug!("seek 完成: target={} byte={}", target, byte);
            }
            Err(e) => {
                error!("{}: seek 失败: {}", self.io.url(), e);
            }
        }

        let resume = {
            let mut control = self.ctx.control();
            control.seek_req = false;
            control.queue_attachments_req = true;
            control.completed = false;
            control.resume_after_seek
        };
        self.ctx.eof.store(false, Ordering::SeqCst);
        self.last_buffering_check = None;
        if resume {
            self.ctx.clocks.set_paused(false);
        }
        self.ctx.state.set(PlayerState::Ready);
    }

    /// 封面流在打开和每次 seek 后补发一次
    fn queue_attachments(&self) {
        let mut control = self.ctx.control();
        if !control.queue_attachments_req {
            return;
        }
        control.queue_attachments_req = false;
        drop(control);

        let Some(video) = &self.ctx.video else {
            return;
        };
        if let Some(pic) = &video.attached_pic {
            if video.packets.put(pic.clone()).is_ok() {
                let _ = video.packets.put_null_packet(video.index);
            }
        }
    }

    // ========================
    // 限流与完成
    // ========================

    /// 队列总字节数超限, 或每条流都已缓冲足够
    fn queues_full(&self) -> bool {
        let q = &self.ctx.config.queue;
        let total: usize = self.ctx.slots().map(|(_, s)| s.packets.size()).sum();
        if total > q.max_queue_size {
            return true;
        }
        let enough = |slot: Option<&StreamSlot>| {
            slot.is_none_or(|s| {
                s.packets.is_aborted()
                    || s.is_attached_pic()
                    || (s.packets.nb_packets() > q.min_frames
                        && (s.packets.duration() == 0
                            || timestamp::to_seconds(s.packets.duration(), s.time_base)
                                > q.min_buffered_duration))
            })
        };
        enough(self.ctx.audio.as_ref())
            && enough(self.ctx.video.as_ref())
            && enough(self.ctx.subtitle.as_ref())
    }

    /// 所有音视频流都已解码并渲染完毕时, 发送一次完成通知
    fn check_completion(&self) {
        if self.ctx.clocks.is_paused() {
            return;
        }
        let drained = |slot: &StreamSlot| {
            slot.finished.load(Ordering::SeqCst) == slot.packets.latest_serial()
                && slot.frames.nb_remaining() == 0
                && slot.packets.nb_packets() == 0
        };
        let all_drained = [self.ctx.audio.as_ref(), self.ctx.video.as_ref()]
            .into_iter()
            .flatten()
            .all(drained);
        if !all_drained {
            return;
        }

        let will_loop = {
            let mut control = self.ctx.control();
            if control.completed || control.seek_req {
                return;
            }
            control.completed = true;
            control.loop_count != 1 && (control.loop_count == 0 || {
                control.loop_count -= 1;
                control.loop_count != 0
            })
        };

        info!("播放完成 (循环={})", will_loop);
        self.ctx.messages.post(PlayerMessage::Completed { will_loop });
        if will_loop {
            let start = self.ctx.info.start_time + self.ctx.config.start_time.unwrap_or(0.0);
            self.ctx.stream_seek(start, 0.0);
        } else {
            self.ctx.state.set(PlayerState::End);
            self.ctx.clocks.set_paused(true);
        }
    }

    // ========================
    // 分发
    // ========================

    fn route(&self, packet: Packet) {
        let index = packet.stream_index;
        let Some((kind, slot)) = self.ctx.slots().find(|(_, s)| s.index == index) else {
            return;
        };
        if kind == StreamKind::Video && slot.is_attached_pic() {
            return;
        }
        if !self.in_play_range(slot, &packet) {
            return;
        }
        if slot.packets.put(packet).is_err() {
            debug!("队列已中止, 丢弃数据包");
        }
    }

    /// 数据包是否在播放范围内 (相对起始位置不超过 `duration`)
    fn in_play_range(&self, slot: &StreamSlot, packet: &Packet) -> bool {
        let Some(duration) = self.ctx.config.duration else {
            return true;
        };
        let ts = packet.best_timestamp();
        if ts == NOPTS_VALUE {
            return true;
        }
        let t = timestamp::to_seconds(ts, slot.time_base) - slot.start_time;
        t - self.ctx.config.start_time.unwrap_or(0.0) <= duration
    }

    fn put_null_packets(&self) {
        for (_, slot) in self.ctx.slots() {
            let _ = slot.packets.put_null_packet(slot.index);
        }
    }

    // ========================
    // 缓冲状态
    // ========================

    fn check_buffering(&mut self) {
        let state = self.ctx.state.get();
        if matches!(state, PlayerState::End | PlayerState::Idle) {
            return;
        }
        let interval = if state == PlayerState::Buffering {
            BUFFERING_CHECK_INTERVAL_FAST
        } else {
            BUFFERING_CHECK_INTERVAL
        };
        if self
            .last_buffering_check
            .is_some_and(|last| last.elapsed() < interval)
        {
            return;
        }
        self.last_buffering_check = Some(Instant::now());

        if self.ctx.eof.load(Ordering::SeqCst) {
            let end = match self.ctx.info.duration {
                Some(d) if d > 0.0 => d,
                _ => [self.ctx.audio.as_ref(), self.ctx.video.as_ref()]
                    .into_iter()
                    .flatten()
                    .filter_map(|s| {
                        let end = s.packets.last_end();
                        (end != NOPTS_VALUE).then(|| timestamp::to_seconds(end, s.time_base))
                    })
                    .fold(0.0, f64::max),
            };
            self.ctx.update_buffered_position((end * 1000.0) as i64);
            self.ctx.state.set(PlayerState::Ready);
            return;
        }

        let threshold = self.ctx.config.queue.cache_threshold_min_frames;
        let mut cached = f64::INFINITY;
        let mut ready = true;
        for (kind, slot) in self.ctx.slots() {
            let q = &slot.packets;
            if q.is_aborted() || slot.is_attached_pic() {
                continue;
            }
            let position = match kind {
                StreamKind::Audio => {
                    let pts = q.last_pts();
                    if pts == NOPTS_VALUE {
                        0.0
                    } else {
                        timestamp::to_seconds(pts, slot.time_base)
                    }
                }
                StreamKind::Video | StreamKind::Subtitle => {
                    timestamp::to_seconds(q.duration(), slot.time_base)
                }
            };
            cached = cached.min(position);
            if q.nb_packets() <= threshold {
                ready = false;
            }
        }
        if cached.is_finite() {
            self.ctx.update_buffered_position((cached * 1000.0) as i64);
        }
        if ready && state == PlayerState::Buffering {
            debug!("缓冲就绪");
            self.ctx.state.set(PlayerState::Ready);
        }
    }
}

/// 打开时定位到起始播放位置, 失败时从头播放
pub(crate) fn seek_to_start(demuxer: &mut dyn Demuxer, io: &mut IoContext, position: f64) {
    let request = SeekRequest::to_seconds(position);
    if let Err(e) = demuxer.seek(io, &request) {
        warn!("{}: 无法定位到 {:.3}s: {}", io.url(), position, e);
    }
}
