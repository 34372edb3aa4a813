//! 播放状态与消息通知.
//!
//! 生产者 (读取线程, 渲染器) 把消息投递到 [`MessageQueue`],
//! 由独立的分发线程调用使用者注册的回调, 慢回调不会阻塞播放.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use lychee_core::LycheeResult;

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlayerState {
    /// 未打开或出错
    Idle = 0,
    /// 可以播放
    Ready = 1,
    /// 正在缓冲
    Buffering = 2,
    /// 播放结束
    End = 3,
}

impl PlayerState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Buffering,
            3 => Self::End,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Ready => "ready",
            Self::Buffering => "buffering",
            Self::End => "end",
        };
        write!(f, "{name}")
    }
}

// ========================
// 消息
// ========================

pub const MSG_PLAYBACK_STATE_CHANGED: i32 = 1;
pub const MSG_VIDEO_FRAME_LOADED: i32 = 2;
pub const MSG_BUFFERING_TIME_UPDATE: i32 = 3;
pub const MSG_COMPLETED: i32 = 4;
pub const MSG_METADATA_LOADED: i32 = 5;

/// 播放器消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMessage {
    PlaybackStateChanged(PlayerState),
    /// 第一帧视频已显示
    VideoFrameLoaded { width: u32, height: u32 },
    /// 已缓冲的播放位置 (毫秒)
    BufferingTimeUpdate(i64),
    /// 播放到结尾, `will_loop` 表示是否会从头继续
    Completed { will_loop: bool },
    /// 容器信息 (时长, 章节, 元数据) 已可查询
    MetadataLoaded,
}

impl PlayerMessage {
    /// 消息 id
    pub fn what(&self) -> i32 {
        match self {
            Self::PlaybackStateChanged(_) => MSG_PLAYBACK_STATE_CHANGED,
            Self::VideoFrameLoaded { .. } => MSG_VIDEO_FRAME_LOADED,
            Self::BufferingTimeUpdate(_) => MSG_BUFFERING_TIME_UPDATE,
            Self::Completed { .. } => MSG_COMPLETED,
            Self::MetadataLoaded => MSG_METADATA_LOADED,
        }
    }

    pub fn arg1(&self) -> i64 {
        match self {
            Self::PlaybackStateChanged(state) => *state as i64,
            Self::VideoFrameLoaded { width, .. } => i64::from(*width),
            Self::BufferingTimeUpdate(ms) => *ms,
            Self::Completed { will_loop } => i64::from(*will_loop),
            Self::MetadataLoaded => 0,
        }
    }

    pub fn arg2(&self) -> i64 {
        match self {
            Self::VideoFrameLoaded { height, .. } => i64::from(*height),
            _ => 0,
        }
    }
}

// ========================
// 消息队列
// ========================

/// 阻塞消息队列
pub struct MessageQueue {
    messages: Mutex<VecDeque<PlayerMessage>>,
    cond: Condvar,
    abort_request: AtomicBool,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            abort_request: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PlayerMessage>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 投递消息, 队列中止后丢弃
    pub fn post(&self, message: PlayerMessage) {
        if self.is_aborted() {
            return;
        }
        self.lock().push_back(message);
        self.cond.notify_one();
    }

    /// 取出一条消息, None 表示已中止或非阻塞模式下为空
    pub fn get(&self, block: bool) -> Option<PlayerMessage> {
        let mut messages = self.lock();
        loop {
            if self.is_aborted() {
                return None;
            }
            if let Some(message) = messages.pop_front() {
                return Some(message);
            }
            if !block {
                return None;
            }
            messages = self.cond.wait(messages).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn abort(&self) {
        let _messages = self.lock();
        self.abort_request.store(true, Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_request.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ========================
// 状态
// ========================

/// 播放状态, 变化时投递 `PlaybackStateChanged`
pub struct StateCell {
    state: AtomicU8,
    queue: Arc<MessageQueue>,
}

impl StateCell {
    pub fn new(queue: Arc<MessageQueue>) -> Self {
        Self {
            state: AtomicU8::new(PlayerState::Idle as u8),
            queue,
        }
    }

    pub fn get(&self) -> PlayerState {
        PlayerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// 切换状态, 返回是否发生了变化
    pub fn set(&self, state: PlayerState) -> bool {
        let old = self.state.swap(state as u8, Ordering::SeqCst);
        if old == state as u8 {
            return false;
        }
        debug!("播放状态: {} -> {}", PlayerState::from_u8(old), state);
        self.queue.post(PlayerMessage::PlaybackStateChanged(state));
        true
    }
}

// ========================
// 分发线程
// ========================

/// 消息回调
pub type MessageCallback = Box<dyn FnMut(&PlayerMessage) + Send>;

struct CallbackSlot {
    callback: Mutex<Option<MessageCallback>>,
    cond: Condvar,
}

/// 消息分发线程
///
/// 尚未注册回调时消息留在队列中, 注册后按顺序送达.
pub struct MessageDispatcher {
    queue: Arc<MessageQueue>,
    slot: Arc<CallbackSlot>,
    handle: Option<JoinHandle<()>>,
}

impl MessageDispatcher {
    /// 启动分发线程
    pub fn start(queue: Arc<MessageQueue>) -> LycheeResult<Self> {
        let slot = Arc::new(CallbackSlot {
            callback: Mutex::new(None),
            cond: Condvar::new(),
        });
        let handle = {
            let queue = Arc::clone(&queue);
            let slot = Arc::clone(&slot);
            thread::Builder::new()
                .name("lychee-msg".into())
                .spawn(move || dispatch_loop(&queue, &slot))?
        };
        Ok(Self {
            queue,
            slot,
            handle: Some(handle),
        })
    }

    /// 注册或替换回调
    pub fn set_callback(&self, callback: MessageCallback) {
        let mut guard = self
            .slot
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(callback);
        self.slot.cond.notify_all();
    }

    /// 中止队列并等待分发线程退出
    pub fn stop(&mut self) {
        self.queue.abort();
        {
            let _guard = self
                .slot
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.slot.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("消息分发线程异常退出");
            }
        }
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(queue: &MessageQueue, slot: &CallbackSlot) {
    while let Some(message) = queue.get(true) {
        let mut guard = slot.callback.lock().unwrap_or_else(PoisonError::into_inner);
        while guard.is_none() && !queue.is_aborted() {
            guard = slot.cond.wait(guard).unwrap_or_else(PoisonError::into_inner);
        }
        match guard.as_mut() {
            Some(callback) => callback(&message),
            None => break,
        }
    }
    debug!("消息分发线程退出");
}
