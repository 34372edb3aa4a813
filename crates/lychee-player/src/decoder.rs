//! 解码线程.
//!
//! 每条流一个线程: 从数据包队列取包送入解码器, 产出的帧换算为秒后写入帧队列.
//! 取到刷新标记时 serial 前进, 清空解码器内部状态.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use lychee_codec::{Decoder, Frame, Packet};
use lychee_core::{LycheeError, LycheeResult, NOPTS_VALUE, Rational, timestamp};

use crate::data_source::ContinueRead;
use crate::frame_queue::{DecodedFrame, FrameQueue};
use crate::media_clock::{MediaClock, SyncType};
use crate::packet_queue::{PacketQueue, QueuedPacket};
use crate::video_renderer::FrameStats;

/// `finished` 的初始值, 表示尚未排空
pub const NOT_FINISHED: i32 = -1;

/// 单步解码结果
#[derive(Debug)]
pub enum DecodeOutcome {
    /// 产出一帧, 所属 serial 见 [`DecoderContext::pkt_serial`]
    Frame(Frame),
    /// 当前 serial 的数据已全部排空
    Drained,
    /// 队列已中止
    Aborted,
}

/// 单条流的解码状态
pub struct DecoderContext {
    codec: Box<dyn Decoder>,
    queue: Arc<PacketQueue>,
    continue_read: Arc<ContinueRead>,
    /// 已排空的 serial
    finished: Arc<AtomicI32>,
    /// 最近取出的数据包所属 serial
    pkt_serial: i32,
    /// 解码器暂不接收时保留的数据包
    pending: Option<Packet>,
}

impl DecoderContext {
    pub fn new(
        codec: Box<dyn Decoder>,
        queue: Arc<PacketQueue>,
        continue_read: Arc<ContinueRead>,
        finished: Arc<AtomicI32>,
    ) -> Self {
        finished.store(NOT_FINISHED, Ordering::SeqCst);
        Self {
            codec,
            queue,
            continue_read,
            finished,
            pkt_serial: -1,
            pending: None,
        }
    }

    pub fn pkt_serial(&self) -> i32 {
        self.pkt_serial
    }

    pub fn queue(&self) -> &Arc<PacketQueue> {
        &self.queue
    }

    /// 解码出下一帧
    pub fn decode_frame(&mut self) -> DecodeOutcome {
        loop {
            if self.queue.serial() == self.pkt_serial {
                loop {
                    if self.queue.is_aborted() {
                        return DecodeOutcome::Aborted;
                    }
                    match self.codec.receive_frame() {
                        Ok(frame) => return DecodeOutcome::Frame(frame),
                        Err(LycheeError::NeedMoreData) => break,
                        Err(LycheeError::Eof) => {
                            self.finished.store(self.pkt_serial, Ordering::SeqCst);
                            self.codec.flush();
                            return DecodeOutcome::Drained;
                        }
                        Err(e) => {
                            warn!("{} 解码失败: {}", self.codec.name(), e);
                            break;
                        }
                    }
                }
            }

            let packet = match self.next_packet() {
                Some(packet) => packet,
                None => return DecodeOutcome::Aborted,
            };

            match self.codec.send_packet(&packet) {
                Ok(()) => {}
                Err(LycheeError::NeedMoreData) => self.pending = Some(packet),
                Err(e) => warn!("{} 送入数据包失败: {}", self.codec.name(), e),
            }
        }
    }

    /// 取出当前 serial 的下一个数据包, 过期的直接丢弃
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if self.queue.nb_packets() == 0 {
                self.continue_read.notify();
            }
            if let Some(packet) = self.pending.take() {
                if self.queue.serial() == self.pkt_serial {
                    return Some(packet);
                }
                continue;
            }

            let (entry, serial) = self.queue.get(true)?;
            if serial != self.pkt_serial {
                self.pkt_serial = serial;
                self.codec.flush();
                self.finished.store(NOT_FINISHED, Ordering::SeqCst);
            }
            if self.queue.serial() != self.pkt_serial {
                continue;
            }
            match entry {
                QueuedPacket::Flush => continue,
                QueuedPacket::Eof { stream_index } => {
                    let mut packet = Packet::empty();
                    packet.stream_index = stream_index;
                    return Some(packet);
                }
                QueuedPacket::Data(packet) => return Some(packet),
            }
        }
    }
}

// ========================
// 解码线程
// ========================

/// 解码线程句柄
pub struct DecoderHandle {
    name: &'static str,
    queue: Arc<PacketQueue>,
    frame_queue: Arc<FrameQueue>,
    thread: Option<JoinHandle<()>>,
}

impl DecoderHandle {
    /// 中止队列, 等待线程退出后清空两个队列
    pub fn abort(&mut self) {
        self.queue.abort();
        self.frame_queue.signal();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("{} 解码线程异常退出", self.name);
            }
        }
        self.queue.flush();
        self.frame_queue.clear();
    }
}

impl Drop for DecoderHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

fn spawn_decoder<F>(
    name: &'static str,
    ctx: DecoderContext,
    frame_queue: Arc<FrameQueue>,
    body: F,
) -> LycheeResult<DecoderHandle>
where
    F: FnOnce(DecoderContext) + Send + 'static,
{
    let queue = Arc::clone(ctx.queue());
    let thread = thread::Builder::new()
        .name(format!("lychee-{name}"))
        .spawn(move || {
            body(ctx);
            debug!("{name} 解码线程退出");
        })?;
    Ok(DecoderHandle {
        name,
        queue,
        frame_queue,
        thread: Some(thread),
    })
}

/// 时间戳换算为秒, 未知时为 NaN
fn seconds(pts: i64, time_base: Rational) -> f64 {
    if pts == NOPTS_VALUE || !time_base.is_valid() {
        f64::NAN
    } else {
        timestamp::to_seconds(pts, time_base)
    }
}

/// 视频解码线程参数
pub struct VideoDecodeParams {
    pub time_base: Rational,
    pub frame_rate: Rational,
    pub clocks: Arc<MediaClock>,
    /// 丢帧策略, None 表示视频不是主时钟时丢帧
    pub framedrop: Option<bool>,
    pub nosync_threshold: f64,
    /// 丢帧计数
    pub stats: Arc<FrameStats>,
}

impl VideoDecodeParams {
    /// 解码后立即丢弃已落后于主时钟的帧
    fn should_drop(&self, pts: f64, serial: i32, queue: &PacketQueue) -> bool {
        let master = self.clocks.master_sync_type();
        let enabled = self.framedrop.unwrap_or(master != SyncType::Video);
        if !enabled || master == SyncType::Video || pts.is_nan() {
            return false;
        }
        let diff = pts - self.clocks.master_clock();
        diff.is_finite()
            && diff.abs() < self.nosync_threshold
            && diff < 0.0
            && serial == self.clocks.video().serial()
            && queue.nb_packets() > 0
    }

    /// 判断并计数提前丢帧
    fn drop_early(&self, pts: f64, serial: i32, queue: &PacketQueue) -> bool {
        if !self.should_drop(pts, serial, queue) {
            return false;
        }
        let drops = self.stats.add_early_drop();
        debug!("提前丢弃视频帧 pts={:.3}, 累计 {}", pts, drops);
        true
    }
}

/// 启动视频解码线程
pub fn spawn_video_decoder(
    ctx: DecoderContext,
    frame_queue: Arc<FrameQueue>,
    params: VideoDecodeParams,
) -> LycheeResult<DecoderHandle> {
    let fq = Arc::clone(&frame_queue);
    spawn_decoder("video", ctx, frame_queue, move |mut ctx| {
        let duration = if params.frame_rate.num > 0 && params.frame_rate.den > 0 {
            1.0 / params.frame_rate.to_f64()
        } else {
            0.0
        };
        loop {
            let frame = match ctx.decode_frame() {
                DecodeOutcome::Frame(frame) => frame,
                DecodeOutcome::Drained => continue,
                DecodeOutcome::Aborted => break,
            };
            let (pts, pos) = match &frame {
                Frame::Video(v) => {
                    let tb = if v.time_base.is_valid() { v.time_base } else { params.time_base };
                    (seconds(v.pts, tb), v.pos)
                }
                _ => continue,
            };
            let serial = ctx.pkt_serial();
            if params.drop_early(pts, serial, ctx.queue()) {
                continue;
            }
            if !fq.peek_writable() {
                break;
            }
            if fq.push(DecodedFrame::new(frame, pts, duration, pos, serial)).is_err() {
                break;
            }
        }
    })
}

/// 启动音频解码线程
///
/// 帧时间戳缺失时按上一帧结束位置推算.
pub fn spawn_audio_decoder(
    ctx: DecoderContext,
    frame_queue: Arc<FrameQueue>,
    time_base: Rational,
) -> LycheeResult<DecoderHandle> {
    let fq = Arc::clone(&frame_queue);
    spawn_decoder("audio", ctx, frame_queue, move |mut ctx| {
        let mut next_pts = f64::NAN;
        let mut next_serial = -1;
        loop {
            let frame = match ctx.decode_frame() {
                DecodeOutcome::Frame(frame) => frame,
                DecodeOutcome::Drained => continue,
                DecodeOutcome::Aborted => break,
            };
            let serial = ctx.pkt_serial();
            if serial != next_serial {
                next_pts = f64::NAN;
                next_serial = serial;
            }
            let (pts, duration, pos) = match &frame {
                Frame::Audio(a) => {
                    let tb = if a.time_base.is_valid() { a.time_base } else { time_base };
                    let mut pts = seconds(a.pts, tb);
                    if pts.is_nan() {
                        pts = next_pts;
                    }
                    let duration = if a.sample_rate > 0 {
                        f64::from(a.nb_samples) / f64::from(a.sample_rate)
                    } else {
                        0.0
                    };
                    if !pts.is_nan() {
                        next_pts = pts + duration;
                    }
                    (pts, duration, a.pos)
                }
                _ => continue,
            };
            if !fq.peek_writable() {
                break;
            }
            if fq.push(DecodedFrame::new(frame, pts, duration, pos, serial)).is_err() {
                break;
            }
        }
    })
}

/// 启动字幕解码线程
pub fn spawn_subtitle_decoder(
    ctx: DecoderContext,
    frame_queue: Arc<FrameQueue>,
    time_base: Rational,
) -> LycheeResult<DecoderHandle> {
    let fq = Arc::clone(&frame_queue);
    spawn_decoder("subtitle", ctx, frame_queue, move |mut ctx| loop {
        let frame = match ctx.decode_frame() {
            DecodeOutcome::Frame(frame) => frame,
            DecodeOutcome::Drained => continue,
            DecodeOutcome::Aborted => break,
        };
        let (pts, duration) = match &frame {
            Frame::Subtitle(s) => {
                let tb = if s.time_base.is_valid() { s.time_base } else { time_base };
                (seconds(s.pts, tb), f64::from(s.end_display_time) / 1000.0)
            }
            _ => continue,
        };
        if !fq.peek_writable() {
            break;
        }
        let serial = ctx.pkt_serial();
        if fq.push(DecodedFrame::new(frame, pts, duration, -1, serial)).is_err() {
            break;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lychee_codec::{AudioCodecParams, CodecId, CodecParameters, CodecParamsType, CodecRegistry};
    use lychee_core::{ChannelLayout, SampleFormat};
    use std::time::{Duration, Instant};

    fn pcm_decoder() -> Box<dyn Decoder> {
        let mut dec = CodecRegistry::with_builtin()
            .create_decoder(CodecId::PcmS16le)
            .unwrap();
        dec.open(&CodecParameters::new(
            CodecId::PcmS16le,
            CodecParamsType::Audio(AudioCodecParams {
                sample_rate: 8000,
                channel_layout: ChannelLayout::MONO,
                sample_format: SampleFormat::S16,
                frame_size: 0,
            }),
        ))
        .unwrap();
        dec
    }

    fn pcm_packet(pts: i64) -> Packet {
        let mut pkt = Packet::from_data(vec![0u8; 160]);
        pkt.pts = pts;
        pkt.duration = 80;
        pkt.time_base = Rational::new(1, 8000);
        pkt
    }

    fn context(queue: &Arc<PacketQueue>) -> (DecoderContext, Arc<AtomicI32>) {
        let finished = Arc::new(AtomicI32::new(0));
        let ctx = DecoderContext::new(
            pcm_decoder(),
            Arc::clone(queue),
            Arc::new(ContinueRead::new()),
            Arc::clone(&finished),
        );
        (ctx, finished)
    }

    #[test]
    fn test_解码与排空() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();
        queue.put(pcm_packet(0)).unwrap();
        queue.put(pcm_packet(80)).unwrap();
        queue.put_null_packet(0).unwrap();
        let (mut ctx, finished) = context(&queue);
        assert_eq!(finished.load(Ordering::SeqCst), NOT_FINISHED);

        for expected in [0, 80] {
            match ctx.decode_frame() {
                DecodeOutcome::Frame(f) => assert_eq!(f.pts(), expected),
                other => panic!("期望解码帧, 实际 {:?}", other),
            }
        }
        assert_eq!(ctx.pkt_serial(), 1);
        assert!(matches!(ctx.decode_frame(), DecodeOutcome::Drained));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_刷新标记后丢弃旧数据并重置排空状态() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();
        queue.put(pcm_packet(0)).unwrap();
        queue.put_null_packet(0).unwrap();
        let (mut ctx, finished) = context(&queue);
        assert!(matches!(ctx.decode_frame(), DecodeOutcome::Frame(_)));
        assert!(matches!(ctx.decode_frame(), DecodeOutcome::Drained));
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        queue.flush();
        queue.put_flush().unwrap();
        queue.put(pcm_packet(4000)).unwrap();
        match ctx.decode_frame() {
            DecodeOutcome::Frame(f) => assert_eq!(f.pts(), 4000),
            other => panic!("期望解码帧, 实际 {:?}", other),
        }
        assert_eq!(ctx.pkt_serial(), 2);
        assert_eq!(finished.load(Ordering::SeqCst), NOT_FINISHED);
    }

    #[test]
    fn test_损坏数据包不终止解码() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();
        let mut bad = Packet::from_data(vec![0u8; 3]);
        bad.time_base = Rational::new(1, 8000);
        queue.put(bad).unwrap();
        queue.put(pcm_packet(160)).unwrap();
        let (mut ctx, _) = context(&queue);
        match ctx.decode_frame() {
            DecodeOutcome::Frame(f) => assert_eq!(f.pts(), 160),
            other => panic!("期望解码帧, 实际 {:?}", other),
        }
    }

    fn video_params(sync_type: SyncType, framedrop: Option<bool>) -> VideoDecodeParams {
        VideoDecodeParams {
            time_base: Rational::new(1, 25),
            frame_rate: Rational::new(25, 1),
            clocks: Arc::new(MediaClock::new(
                sync_type,
                Arc::new(AtomicI32::new(0)),
                Arc::new(AtomicI32::new(1)),
                Arc::new(|_| true),
            )),
            framedrop,
            nosync_threshold: 10.0,
            stats: Arc::new(FrameStats::default()),
        }
    }

    #[test]
    fn test_提前丢帧条件() {
        let queue = PacketQueue::new();
        queue.put(pcm_packet(0)).unwrap();
        let params = video_params(SyncType::External, None);
        params.clocks.video().set(0.0, 1);

        // 主时钟未设置 (NaN)
        assert!(!params.drop_early(4.0, 1, &queue));
        params.clocks.external().set(5.0, 0);

        // 超前主时钟
        assert!(!params.drop_early(6.0, 1, &queue));
        // 与视频时钟不属于同一 serial
        assert!(!params.drop_early(4.0, 2, &queue));
        // 落后超过失步阈值
        assert!(!params.drop_early(-20.0, 1, &queue));
        // pts 未知
        assert!(!params.drop_early(f64::NAN, 1, &queue));
        assert_eq!(params.stats.frame_drops_early(), 0);

        assert!(params.drop_early(4.0, 1, &queue));
        assert!(params.drop_early(4.5, 1, &queue));
        assert_eq!(params.stats.frame_drops_early(), 2);

        // 后面没有数据包时保留
        let empty = PacketQueue::new();
        assert!(!params.drop_early(4.0, 1, &empty));
        assert_eq!(params.stats.frame_drops_early(), 2);
    }

    #[test]
    fn test_禁用丢帧或视频为主时钟时不提前丢帧() {
        let queue = PacketQueue::new();
        queue.put(pcm_packet(0)).unwrap();
        for params in [
            video_params(SyncType::External, Some(false)),
            video_params(SyncType::Video, None),
            video_params(SyncType::Video, Some(true)),
        ] {
            params.clocks.video().set(0.0, 1);
            params.clocks.external().set(5.0, 0);
            assert!(!params.drop_early(4.0, 1, &queue));
            assert_eq!(params.stats.frame_drops_early(), 0);
        }
    }

    #[test]
    fn test_音频解码线程写入帧队列() {
        let queue = Arc::new(PacketQueue::new());
        queue.start();
        let fq = Arc::new(FrameQueue::new(Arc::clone(&queue), 9, true));
        let (ctx, finished) = context(&queue);
        let mut handle = spawn_audio_decoder(ctx, Arc::clone(&fq), Rational::new(1, 8000)).unwrap();

        queue.put(pcm_packet(8000)).unwrap();
        let mut no_pts = pcm_packet(0);
        no_pts.pts = NOPTS_VALUE;
        queue.put(no_pts).unwrap();
        queue.put_null_packet(0).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while finished.load(Ordering::SeqCst) != 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fq.nb_remaining(), 2);
        let first = fq.peek().unwrap();
        assert!((first.pts - 1.0).abs() < 1e-9);
        assert!((first.duration - 0.01).abs() < 1e-9);
        assert_eq!(first.serial, 1);
        fq.next();
        let second = fq.peek().unwrap();
        assert!((second.pts - 1.01).abs() < 1e-9);

        handle.abort();
        assert_eq!(fq.nb_remaining(), 0);
    }
}
