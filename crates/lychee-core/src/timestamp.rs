//! 时间戳类型与时间基换算.
//!
//! 容器时间戳以 `time_base` 为单位, 播放器内部统一使用秒 (f64) 或微秒 (`TIME_BASE`).

use crate::rational::Rational;
use std::fmt;

/// 表示"未定义"的时间戳值
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 内部时间基: 微秒
pub const TIME_BASE: i64 = 1_000_000;

/// 时间戳
///
/// 实际时间 (秒) = pts * time_base.num / time_base.den.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    /// 时间戳值, `NOPTS_VALUE` 表示未定义
    pub pts: i64,
    /// 时间基
    pub time_base: Rational,
}

impl Timestamp {
    /// 创建新的时间戳
    pub const fn new(pts: i64, time_base: Rational) -> Self {
        Self { pts, time_base }
    }

    /// 创建未定义的时间戳
    pub const fn none() -> Self {
        Self {
            pts: NOPTS_VALUE,
            time_base: Rational::UNDEFINED,
        }
    }

    /// 由秒数构造, 使用给定时间基 (四舍五入)
    pub fn from_seconds(seconds: f64, time_base: Rational) -> Self {
        if !seconds.is_finite() || !time_base.is_valid() || time_base.num == 0 {
            return Self::none();
        }
        let pts = (seconds / time_base.to_f64()).round() as i64;
        Self { pts, time_base }
    }

    /// 判断时间戳是否有效 (非 NOPTS_VALUE)
    pub const fn is_valid(&self) -> bool {
        self.pts != NOPTS_VALUE && self.time_base.is_valid()
    }

    /// 转换为秒, 无效时间戳返回 `f64::NAN`
    pub fn to_seconds(&self) -> f64 {
        if !self.is_valid() {
            return f64::NAN;
        }
        self.pts as f64 * self.time_base.to_f64()
    }

    /// 将时间戳重缩放到新的时间基
    pub fn rescale(&self, new_time_base: Rational) -> Self {
        if !self.is_valid() {
            return Self::none();
        }
        match rescale(self.pts, self.time_base, new_time_base) {
            NOPTS_VALUE => Self::none(),
            pts => Self {
                pts,
                time_base: new_time_base,
            },
        }
    }
}

/// 将 `value` 从 `from` 时间基换算到 `to` 时间基
///
/// 通过 i128 交叉乘法避免溢出. 参数无效时返回 `NOPTS_VALUE`.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    if value == NOPTS_VALUE || !from.is_valid() || !to.is_valid() {
        return NOPTS_VALUE;
    }
    let num = value as i128 * i128::from(from.num) * i128::from(to.den);
    let den = i128::from(from.den) * i128::from(to.num);
    if den == 0 {
        return NOPTS_VALUE;
    }
    (num / den) as i64
}

/// 将以 `time_base` 为单位的值转换为秒, `NOPTS_VALUE` 转换为 NaN
pub fn to_seconds(value: i64, time_base: Rational) -> f64 {
    if value == NOPTS_VALUE {
        return f64::NAN;
    }
    value as f64 * time_base.to_f64()
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            write!(f, "NOPTS")
        } else {
            write!(f, "{:.6}s", self.to_seconds())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_转换为秒() {
        let ts = Timestamp::new(90000, Rational::new(1, 90000));
        assert!((ts.to_seconds() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_timestamp_重缩放() {
        let ts = Timestamp::new(90000, Rational::new(1, 90000));
        let rescaled = ts.rescale(Rational::new(1, 1000));
        assert_eq!(rescaled.pts, 1000);
    }

    #[test]
    fn test_timestamp_从秒构造() {
        let ts = Timestamp::from_seconds(5.0, Rational::new(1, 25));
        assert_eq!(ts.pts, 125);
        assert!(!Timestamp::from_seconds(f64::NAN, Rational::MILLI).is_valid());
    }

    #[test]
    fn test_timestamp_无效值() {
        let ts = Timestamp::none();
        assert!(!ts.is_valid());
        assert!(ts.to_seconds().is_nan());
        assert!(to_seconds(NOPTS_VALUE, Rational::MILLI).is_nan());
        assert_eq!(rescale(NOPTS_VALUE, Rational::MILLI, Rational::MICRO), NOPTS_VALUE);
    }
}
