//! 单调相对时间.
//!
//! 播放时钟需要一个不受系统时间调整影响的时间源, 这里以进程内首次调用为零点.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// 当前相对时间 (微秒)
pub fn relative_micros() -> i64 {
    epoch().elapsed().as_micros() as i64
}

/// 当前相对时间 (秒)
pub fn relative_seconds() -> f64 {
    epoch().elapsed().as_secs_f64()
}
