//! 解码帧环形队列.
//!
//! 固定容量, 单生产者 (解码线程) 单消费者 (渲染器).
//! `keep_last` 模式下保留最近显示过的一帧, `peek_last` 返回当前画面.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use lychee_codec::Frame;
use lychee_core::{LycheeError, LycheeResult, Rational};

use crate::packet_queue::PacketQueue;

/// 队列中的解码帧
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: Frame,
    /// 显示时间 (秒), 未知时为 NaN
    pub pts: f64,
    /// 估计时长 (秒)
    pub duration: f64,
    /// 来源数据包的字节偏移
    pub pos: i64,
    /// 来源数据包的 serial
    pub serial: i32,
    /// 是否已交给输出设备
    uploaded: AtomicBool,
}

impl DecodedFrame {
    pub fn new(frame: Frame, pts: f64, duration: f64, pos: i64, serial: i32) -> Self {
        Self {
            frame,
            pts,
            duration,
            pos,
            serial,
            uploaded: AtomicBool::new(false),
        }
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn mark_uploaded(&self) {
        self.uploaded.store(true, Ordering::Relaxed);
    }

    /// 视频帧尺寸, 非视频帧返回 None
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match &self.frame {
            Frame::Video(v) => Some((v.width, v.height)),
            _ => None,
        }
    }

    /// 采样宽高比, 未知时为 1
    pub fn sample_aspect_ratio(&self) -> Rational {
        match &self.frame {
            Frame::Video(v) if v.sample_aspect_ratio.num > 0 && v.sample_aspect_ratio.den > 0 => {
                v.sample_aspect_ratio
            }
            _ => Rational::new(1, 1),
        }
    }
}

struct RingState {
    slots: Vec<Option<Arc<DecodedFrame>>>,
    rindex: usize,
    windex: usize,
    size: usize,
    rindex_shown: usize,
}

/// 解码帧队列
pub struct FrameQueue {
    state: Mutex<RingState>,
    cond: Condvar,
    max_size: usize,
    keep_last: bool,
    pkt_queue: Arc<PacketQueue>,
}

impl FrameQueue {
    /// 创建队列, 容量在构造后不再改变
    pub fn new(pkt_queue: Arc<PacketQueue>, max_size: usize, keep_last: bool) -> Self {
        let max_size = max_size.max(1);
        Self {
            state: Mutex::new(RingState {
                slots: (0..max_size).map(|_| None).collect(),
                rindex: 0,
                windex: 0,
                size: 0,
                rindex_shown: 0,
            }),
            cond: Condvar::new(),
            max_size,
            keep_last,
            pkt_queue,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// 唤醒所有等待者 (用于中止)
    pub fn signal(&self) {
        let _state = self.lock();
        self.cond.notify_all();
    }

    /// 等待可写槽位, 队列被中止时返回 false
    pub fn peek_writable(&self) -> bool {
        let mut state = self.lock();
        while state.size >= self.max_size && !self.pkt_queue.is_aborted() {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        !self.pkt_queue.is_aborted()
    }

    /// 是否有空闲槽位 (不等待)
    pub fn has_writable(&self) -> bool {
        self.lock().size < self.max_size
    }

    /// 提交一帧到写位置
    pub fn push(&self, frame: DecodedFrame) -> LycheeResult<()> {
        let mut state = self.lock();
        if self.pkt_queue.is_aborted() {
            return Err(LycheeError::Aborted);
        }
        if state.size >= self.max_size {
            return Err(LycheeError::Internal("帧队列已满".into()));
        }
        let windex = state.windex;
        state.slots[windex] = Some(Arc::new(frame));
        state.windex = (windex + 1) % self.max_size;
        state.size += 1;
        drop(state);
        self.cond.notify_all();
        Ok(())
    }

    /// 等待可读帧, 队列被中止时返回 None
    pub fn peek_readable(&self) -> Option<Arc<DecodedFrame>> {
        let mut state = self.lock();
        while state.size <= state.rindex_shown && !self.pkt_queue.is_aborted() {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if self.pkt_queue.is_aborted() {
            return None;
        }
        let idx = (state.rindex + state.rindex_shown) % self.max_size;
        state.slots[idx].clone()
    }

    /// 下一个待显示的帧
    pub fn peek(&self) -> Option<Arc<DecodedFrame>> {
        let state = self.lock();
        if state.size <= state.rindex_shown {
            return None;
        }
        let idx = (state.rindex + state.rindex_shown) % self.max_size;
        state.slots[idx].clone()
    }

    /// 待显示帧之后的一帧
    pub fn peek_next(&self) -> Option<Arc<DecodedFrame>> {
        let state = self.lock();
        if state.size <= state.rindex_shown + 1 {
            return None;
        }
        let idx = (state.rindex + state.rindex_shown + 1) % self.max_size;
        state.slots[idx].clone()
    }

    /// 最近显示的帧 (keep_last 模式下为当前画面)
    pub fn peek_last(&self) -> Option<Arc<DecodedFrame>> {
        let state = self.lock();
        if state.size == 0 {
            return None;
        }
        state.slots[state.rindex].clone()
    }

    /// 读位置前进一帧
    pub fn next(&self) {
        let mut state = self.lock();
        if self.keep_last && state.rindex_shown == 0 {
            state.rindex_shown = 1;
            return;
        }
        if state.size == 0 {
            return;
        }
        let rindex = state.rindex;
        state.slots[rindex] = None;
        state.rindex = (rindex + 1) % self.max_size;
        state.size -= 1;
        drop(state);
        self.cond.notify_all();
    }

    /// 尚未显示的帧数
    pub fn nb_remaining(&self) -> usize {
        let state = self.lock();
        state.size - state.rindex_shown
    }

    /// 已显示过帧 (keep_last)
    pub fn rindex_shown(&self) -> bool {
        self.lock().rindex_shown > 0
    }

    /// 当前显示帧的字节位置, 已过期或未显示时为 -1
    pub fn last_pos(&self) -> i64 {
        let state = self.lock();
        if state.rindex_shown == 0 {
            return -1;
        }
        match &state.slots[state.rindex] {
            Some(f) if f.serial == self.pkt_queue.latest_serial() => f.pos,
            _ => -1,
        }
    }

    /// 丢弃全部帧
    pub fn clear(&self) {
        let mut state = self.lock();
        state.slots.iter_mut().for_each(|s| *s = None);
        state.rindex = 0;
        state.windex = 0;
        state.size = 0;
        state.rindex_shown = 0;
        drop(state);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lychee_codec::VideoFrame;
    use lychee_core::PixelFormat;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn video(pts: f64, serial: i32) -> DecodedFrame {
        let frame = Frame::Video(VideoFrame::new(4, 2, PixelFormat::Gray8));
        DecodedFrame::new(frame, pts, 0.04, (pts * 100.0) as i64, serial)
    }

    #[test]
    fn test_容量与读写顺序() {
        let pq = Arc::new(PacketQueue::new());
        let fq = FrameQueue::new(pq, 3, false);
        for i in 0..3 {
            assert!(fq.peek_writable());
            fq.push(video(i as f64, 0)).unwrap();
        }
        assert!(!fq.has_writable());
        assert!(fq.push(video(9.0, 0)).is_err());
        assert_eq!(fq.nb_remaining(), 3);

        assert_eq!(fq.peek().unwrap().pts, 0.0);
        assert_eq!(fq.peek_next().unwrap().pts, 1.0);
        fq.next();
        assert_eq!(fq.peek_readable().unwrap().pts, 1.0);
        assert_eq!(fq.nb_remaining(), 2);
        assert!(fq.has_writable());
    }

    #[test]
    fn test_keep_last_保留当前画面() {
        let pq = Arc::new(PacketQueue::new());
        let fq = FrameQueue::new(pq, 3, true);
        fq.push(video(0.0, 0)).unwrap();
        assert!(fq.peek_readable().is_some());
        assert_eq!(fq.last_pos(), -1);

        fq.next();
        assert_eq!(fq.nb_remaining(), 0);
        assert!(fq.rindex_shown());
        assert_eq!(fq.peek_last().unwrap().pts, 0.0);
        assert!(fq.peek().is_none());
        assert_eq!(fq.last_pos(), 0);

        fq.push(video(1.0, 0)).unwrap();
        assert_eq!(fq.peek().unwrap().pts, 1.0);
        fq.next();
        assert_eq!(fq.peek_last().unwrap().pts, 1.0);
    }

    #[test]
    fn test_队满时写入阻塞直到读取前进() {
        let pq = Arc::new(PacketQueue::new());
        let fq = Arc::new(FrameQueue::new(pq, 3, true));
        fq.push(video(0.0, 0)).unwrap();
        fq.next();
        fq.push(video(1.0, 0)).unwrap();
        fq.push(video(2.0, 0)).unwrap();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let fq = Arc::clone(&fq);
            thread::spawn(move || {
                let ok = fq.peek_writable();
                tx.send(ok).unwrap();
            })
        };
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        fq.next();
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
        writer.join().unwrap();
    }

    #[test]
    fn test_中止时等待返回() {
        let pq = Arc::new(PacketQueue::new());
        let fq = Arc::new(FrameQueue::new(Arc::clone(&pq), 2, false));
        let reader = {
            let fq = Arc::clone(&fq);
            thread::spawn(move || fq.peek_readable())
        };
        thread::sleep(Duration::from_millis(30));
        pq.abort();
        fq.signal();
        assert!(reader.join().unwrap().is_none());
        assert!(!fq.peek_writable());
        assert!(matches!(fq.push(video(0.0, 0)), Err(LycheeError::Aborted)));
    }

    #[test]
    fn test_清空() {
        let pq = Arc::new(PacketQueue::new());
        let fq = FrameQueue::new(pq, 2, true);
        fq.push(video(0.0, 0)).unwrap();
        fq.next();
        fq.clear();
        assert_eq!(fq.nb_remaining(), 0);
        assert!(fq.peek_last().is_none());
        assert!(!fq.rindex_shown());
    }
}
