//! 播放时钟.
//!
//! 时钟值 = 最近一次设置的 pts + 此后经过的墙钟时间 (按速度缩放).
//! 绑定的队列 serial 前进后 (seek), 时钟在重新设置前读出 NaN.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lychee_core::time::relative_seconds;

/// 时钟之间误差超过此值 (秒) 时直接对齐
pub const CLOCK_SYNC_THRESHOLD: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
struct ClockState {
    pts: f64,
    /// pts - 设置时的墙钟时间
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    /// pts 所属的 serial
    serial: i32,
    paused: bool,
}

impl ClockState {
    /// 不考虑 serial 的当前值
    fn value_at(&self, now: f64) -> f64 {
        if self.paused {
            self.pts
        } else {
            self.pts_drift + now - (now - self.last_updated) * (1.0 - self.speed)
        }
    }

    fn rebase(&mut self, pts: f64, serial: i32, now: f64) {
        self.pts = pts;
        self.last_updated = now;
        self.pts_drift = pts - now;
        self.serial = serial;
    }
}

/// 播放时钟
pub struct Clock {
    state: Mutex<ClockState>,
    /// 绑定的队列 serial, None 表示只与自身比较 (永不过期)
    queue_serial: Option<Arc<AtomicI32>>,
}

impl Clock {
    /// 创建时钟, pts 初始为 NaN
    pub fn new(queue_serial: Option<Arc<AtomicI32>>) -> Self {
        let now = relative_seconds();
        Self {
            state: Mutex::new(ClockState {
                pts: f64::NAN,
                pts_drift: f64::NAN,
                last_updated: now,
                speed: 1.0,
                serial: -1,
                paused: false,
            }),
            queue_serial,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, state: &ClockState) -> bool {
        match &self.queue_serial {
            Some(serial) => serial.load(Ordering::SeqCst) != state.serial,
            None => false,
        }
    }

    /// 当前时钟值 (秒), 过期或未设置时为 NaN
    pub fn get(&self) -> f64 {
        self.get_at(relative_seconds())
    }

    /// 指定墙钟时间下的时钟值
    pub fn get_at(&self, now: f64) -> f64 {
        let state = self.lock();
        if self.is_stale(&state) {
            return f64::NAN;
        }
        state.value_at(now)
    }

    pub fn set(&self, pts: f64, serial: i32) {
        self.set_at(pts, serial, relative_seconds());
    }

    /// 以给定的墙钟时间为锚点设置时钟
    pub fn set_at(&self, pts: f64, serial: i32, time: f64) {
        self.lock().rebase(pts, serial, time);
    }

    /// 修改速度前先在当前值处重新锚定, 避免跳变
    pub fn set_speed(&self, speed: f64) {
        self.set_speed_at(speed, relative_seconds());
    }

    pub fn set_speed_at(&self, speed: f64, now: f64) {
        let mut state = self.lock();
        let value = if self.is_stale(&state) {
            f64::NAN
        } else {
            state.value_at(now)
        };
        let serial = state.serial;
        state.rebase(value, serial, now);
        state.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.lock().speed
    }

    /// 暂停或恢复
    ///
    /// 暂停时冻结在当前值; 恢复时从冻结值继续走, 不计入暂停期间的时间.
    pub fn set_paused(&self, paused: bool) {
        self.set_paused_at(paused, relative_seconds());
    }

    pub fn set_paused_at(&self, paused: bool, now: f64) {
        let mut state = self.lock();
        if state.paused == paused {
            return;
        }
        let value = state.value_at(now);
        let serial = state.serial;
        state.paused = paused;
        state.rebase(value, serial, now);
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// pts 所属的 serial
    pub fn serial(&self) -> i32 {
        self.lock().serial
    }

    /// 最近一次设置的墙钟时间
    pub fn last_updated(&self) -> f64 {
        self.lock().last_updated
    }

    /// 最近一次设置的 pts
    pub fn pts(&self) -> f64 {
        self.lock().pts
    }

    /// 向另一个时钟对齐
    ///
    /// 另一个时钟有效, 且本时钟为 NaN 或误差超过 [`CLOCK_SYNC_THRESHOLD`] 时生效.
    pub fn sync_to(&self, other: &Clock) {
        let now = relative_seconds();
        let clock = self.get_at(now);
        let other_clock = other.get_at(now);
        if !other_clock.is_nan()
            && (clock.is_nan() || (clock - other_clock).abs() > CLOCK_SYNC_THRESHOLD)
        {
            self.set_at(other_clock, other.serial(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_初始为nan() {
        let clock = Clock::new(None);
        assert!(clock.get().is_nan());
        assert_eq!(clock.serial(), -1);
    }

    #[test]
    fn test_按墙钟推进() {
        let clock = Clock::new(None);
        clock.set_at(10.0, 0, 100.0);
        assert!(approx(clock.get_at(100.0), 10.0));
        assert!(approx(clock.get_at(101.5), 11.5));
    }

    #[test]
    fn test_serial_前进后过期() {
        let serial = Arc::new(AtomicI32::new(0));
        let clock = Clock::new(Some(Arc::clone(&serial)));
        clock.set_at(5.0, 0, 10.0);
        assert!(approx(clock.get_at(11.0), 6.0));

        serial.store(1, Ordering::SeqCst);
        assert!(clock.get_at(11.0).is_nan());
        assert!(clock.get_at(20.0).is_nan());

        clock.set_at(42.0, 1, 20.0);
        assert!(approx(clock.get_at(21.0), 43.0));
    }

    #[test]
    fn test_暂停与恢复不跳变() {
        let clock = Clock::new(None);
        clock.set_at(10.0, 0, 100.0);
        clock.set_paused_at(true, 101.0);
        assert!(clock.is_paused());
        assert!(approx(clock.get_at(101.0), 11.0));
        assert!(approx(clock.get_at(103.0), 11.0));

        clock.set_paused_at(false, 103.0);
        assert!(approx(clock.get_at(103.0), 11.0));
        assert!(approx(clock.get_at(104.0), 12.0));
    }

    #[test]
    fn test_变速重新锚定() {
        let clock = Clock::new(None);
        clock.set_at(0.0, 0, 0.0);
        clock.set_speed_at(2.0, 4.0);
        assert!(approx(clock.get_at(4.0), 4.0));
        assert!(approx(clock.get_at(5.0), 6.0));
        assert_eq!(clock.speed(), 2.0);

        clock.set_speed_at(0.5, 5.0);
        assert!(approx(clock.get_at(7.0), 7.0));
    }

    #[test]
    fn test_向另一时钟对齐() {
        let audio = Clock::new(None);
        let external = Clock::new(None);
        external.sync_to(&audio);
        assert!(external.get().is_nan());

        audio.set(30.0, 2);
        external.sync_to(&audio);
        assert!((external.get() - 30.0).abs() < 0.5);
        assert_eq!(external.serial(), 2);

        // 误差在阈值内不对齐
        external.set(33.0, 3);
        external.sync_to(&audio);
        assert_eq!(external.serial(), 3);
    }
}
