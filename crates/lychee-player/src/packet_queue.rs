//! 数据包队列.
//!
//! 每条流一个线程安全的 FIFO, 记录总字节数与总时长供读取线程限流.
//! `serial` 在取出刷新标记时加一, 下游据此丢弃 seek 之前的旧数据.
//! 已入队但尚未取出的刷新标记计入 [`PacketQueue::latest_serial`],
//! 渲染端据此在解码线程追上之前就能识别旧帧.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use lychee_codec::Packet;
use lychee_core::{LycheeError, LycheeResult, NOPTS_VALUE};

/// 队列中的条目
#[derive(Debug, Clone)]
pub enum QueuedPacket {
    /// 普通数据包
    Data(Packet),
    /// 刷新标记: 此前的数据全部作废, 开始新的 serial
    Flush,
    /// 流结束标记, 只携带流索引
    Eof { stream_index: usize },
}

impl QueuedPacket {
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }
}

#[derive(Default)]
struct QueueState {
    packets: VecDeque<QueuedPacket>,
    /// 数据包负载总字节数
    size: usize,
    /// 数据包总时长 (流时间基)
    duration: i64,
    /// 最近一个入队的数据包 (pts, duration)
    last: Option<(i64, i64)>,
    /// 队列中尚未取出的刷新标记数
    pending_flushes: i32,
}

/// 数据包队列
pub struct PacketQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    serial: Arc<AtomicI32>,
    abort_request: AtomicBool,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            cond: Condvar::new(),
            serial: Arc::new(AtomicI32::new(0)),
            abort_request: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 启动队列: 清除中止标志并放入一个刷新标记
    pub fn start(&self) {
        self.abort_request.store(false, Ordering::SeqCst);
        let _ = self.put_flush();
    }

    /// 放入数据包
    pub fn put(&self, packet: Packet) -> LycheeResult<()> {
        self.put_entry(QueuedPacket::Data(packet))
    }

    /// 放入刷新标记
    pub fn put_flush(&self) -> LycheeResult<()> {
        self.put_entry(QueuedPacket::Flush)
    }

    /// 放入流结束标记
    pub fn put_null_packet(&self, stream_index: usize) -> LycheeResult<()> {
        self.put_entry(QueuedPacket::Eof { stream_index })
    }

    fn put_entry(&self, entry: QueuedPacket) -> LycheeResult<()> {
        let mut state = self.lock();
        if self.is_aborted() {
            return Err(LycheeError::Aborted);
        }
        match &entry {
            QueuedPacket::Data(pkt) => {
                state.size += pkt.size();
                state.duration += pkt.duration.max(0);
                state.last = Some((pkt.best_timestamp(), pkt.duration));
            }
            QueuedPacket::Flush => state.pending_flushes += 1,
            QueuedPacket::Eof { .. } => {}
        }
        state.packets.push_back(entry);
        drop(state);
        self.cond.notify_one();
        Ok(())
    }

    /// 取出队首条目及其所属 serial
    ///
    /// `block` 为 true 时在队列为空时等待. 返回 None 表示队列已中止,
    /// 或非阻塞模式下队列为空.
    pub fn get(&self, block: bool) -> Option<(QueuedPacket, i32)> {
        let mut state = self.lock();
        loop {
            if self.is_aborted() {
                return None;
            }
            if let Some(entry) = state.packets.pop_front() {
                match &entry {
                    QueuedPacket::Data(pkt) => {
                        state.size -= pkt.size();
                        state.duration -= pkt.duration.max(0);
                    }
                    QueuedPacket::Flush => {
                        state.pending_flushes -= 1;
                        self.serial.fetch_add(1, Ordering::SeqCst);
                    }
                    QueuedPacket::Eof { .. } => {}
                }
                return Some((entry, self.serial()));
            }
            if !block {
                return None;
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 清空队列, 不改变 serial
    pub fn flush(&self) {
        let mut state = self.lock();
        state.packets.clear();
        state.size = 0;
        state.duration = 0;
        state.last = None;
        state.pending_flushes = 0;
    }

    /// 中止队列并唤醒所有等待者
    pub fn abort(&self) {
        let _state = self.lock();
        self.abort_request.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_request.load(Ordering::SeqCst)
    }

    pub fn serial(&self) -> i32 {
        self.serial.load(Ordering::SeqCst)
    }

    /// 取出队中全部刷新标记后将到达的 serial
    ///
    /// seek 后解码线程可能仍阻塞在满的帧队列上, 此时 `serial()` 尚未前进,
    /// 已解码的旧帧要与这个值比较.
    pub fn latest_serial(&self) -> i32 {
        let state = self.lock();
        self.serial() + state.pending_flushes
    }

    /// serial 的共享句柄, 供时钟判断是否过期
    pub fn serial_handle(&self) -> Arc<AtomicI32> {
        Arc::clone(&self.serial)
    }

    pub fn nb_packets(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn size(&self) -> usize {
        self.lock().size
    }

    pub fn duration(&self) -> i64 {
        self.lock().duration
    }

    /// 最近入队数据包的时间戳, 没有时为 `NOPTS_VALUE`
    pub fn last_pts(&self) -> i64 {
        self.lock().last.map_or(NOPTS_VALUE, |(pts, _)| pts)
    }

    /// 最近入队数据包的结束时间戳, 没有时为 `NOPTS_VALUE`
    pub fn last_end(&self) -> i64 {
        match self.lock().last {
            Some((pts, duration)) if pts != NOPTS_VALUE => pts + duration,
            _ => NOPTS_VALUE,
        }
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn packet(pts: i64, size: usize) -> Packet {
        let mut pkt = Packet::from_data(vec![0u8; size]);
        pkt.pts = pts;
        pkt.duration = 10;
        pkt
    }

    #[test]
    fn test_fifo_与计数() {
        let q = PacketQueue::new();
        q.put(packet(0, 100)).unwrap();
        q.put(packet(10, 50)).unwrap();
        assert_eq!(q.nb_packets(), 2);
        assert_eq!(q.size(), 150);
        assert_eq!(q.duration(), 20);
        assert_eq!(q.last_pts(), 10);
        assert_eq!(q.last_end(), 20);

        let (first, serial) = q.get(false).unwrap();
        assert!(matches!(first, QueuedPacket::Data(p) if p.pts == 0));
        assert_eq!(serial, 0);
        assert_eq!(q.size(), 50);
        assert_eq!(q.duration(), 10);
    }

    #[test]
    fn test_serial_在取出刷新标记时递增() {
        let q = PacketQueue::new();
        q.put(packet(0, 10)).unwrap();
        q.flush();
        assert_eq!(q.serial(), 0);
        assert_eq!(q.nb_packets(), 0);

        q.put_flush().unwrap();
        q.put(packet(5, 10)).unwrap();
        assert_eq!(q.serial(), 0);

        let (entry, serial) = q.get(false).unwrap();
        assert!(entry.is_flush());
        assert_eq!(serial, 1);
        let (_, serial) = q.get(false).unwrap();
        assert_eq!(serial, 1);

        for _ in 0..3 {
            q.put_flush().unwrap();
            q.get(false).unwrap();
        }
        assert_eq!(q.serial(), 4);
    }

    #[test]
    fn test_最新serial计入未取出的刷新标记() {
        let q = PacketQueue::new();
        q.start();
        assert_eq!((q.serial(), q.latest_serial()), (0, 1));
        q.get(false).unwrap();
        assert_eq!((q.serial(), q.latest_serial()), (1, 1));

        // 连续两次 seek, 第一次的刷新标记被第二次清掉
        q.put(packet(0, 10)).unwrap();
        q.flush();
        q.put_flush().unwrap();
        assert_eq!(q.latest_serial(), 2);
        q.flush();
        q.put_flush().unwrap();
        assert_eq!(q.latest_serial(), 2);

        let (_, serial) = q.get(false).unwrap();
        assert_eq!(serial, q.latest_serial());
    }

    #[test]
    fn test_结束标记携带流索引() {
        let q = PacketQueue::new();
        q.put_null_packet(3).unwrap();
        assert!(matches!(q.get(false), Some((QueuedPacket::Eof { stream_index: 3 }, _))));
        assert!(q.get(false).is_none());
    }

    #[test]
    fn test_中止唤醒阻塞的读取者() {
        let q = Arc::new(PacketQueue::new());
        let reader = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.get(true))
        };
        thread::sleep(Duration::from_millis(50));
        q.abort();
        assert!(reader.join().unwrap().is_none());
        assert!(matches!(q.put(packet(0, 1)), Err(LycheeError::Aborted)));

        q.start();
        assert!(!q.is_aborted());
        assert!(q.get(false).unwrap().0.is_flush());
    }

    #[test]
    fn test_阻塞读取等待写入() {
        let q = Arc::new(PacketQueue::new());
        let writer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                q.put(packet(42, 4)).unwrap();
            })
        };
        let (entry, _) = q.get(true).unwrap();
        assert!(matches!(entry, QueuedPacket::Data(p) if p.pts == 42));
        writer.join().unwrap();
    }
}
