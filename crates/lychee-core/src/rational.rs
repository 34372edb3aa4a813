//! 有理数类型, 用于时间基 (time_base)、帧率、宽高比等场景.

use std::fmt;

/// 有理数, 由分子和分母组成
///
/// 例如: 时间基 1/90000 表示 90kHz 时钟, 帧率 30000/1001 表示 29.97fps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    /// 分子
    pub num: i32,
    /// 分母
    pub den: i32,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 零值
    pub const ZERO: Self = Self { num: 0, den: 1 };

    /// 未定义 (分母为 0)
    pub const UNDEFINED: Self = Self { num: 0, den: 0 };

    /// 微秒时间基 (1/1_000_000)
    pub const MICRO: Self = Self {
        num: 1,
        den: 1_000_000,
    };

    /// 毫秒时间基 (1/1_000)
    pub const MILLI: Self = Self { num: 1, den: 1_000 };

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 转换为 f64 浮点数, 分母为 0 时返回 `f64::NAN`
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 同 `to_f64`, 分子为 0 时视为 1 (用于宽高比, 0 表示未知)
    pub fn to_f64_or_one(self) -> f64 {
        if self.num == 0 || self.den == 0 {
            return 1.0;
        }
        self.to_f64()
    }

    /// 对有理数进行约分
    pub fn reduce(self) -> Self {
        if self.den == 0 {
            return self;
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        if g == 0 {
            return self;
        }
        let g = g as i32;
        let sign = if self.den < 0 { -1 } else { 1 };
        Self {
            num: sign * self.num / g,
            den: sign * self.den / g,
        }
    }

    /// 求倒数
    pub const fn invert(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }
}

impl std::ops::Mul for Rational {
    type Output = Self;

    fn mul(self, other: Self) -> Self {
        Self {
            num: self.num * other.num,
            den: self.den * other.den,
        }
        .reduce()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self { num, den }
    }
}

impl From<i32> for Rational {
    fn from(num: i32) -> Self {
        Self { num, den: 1 }
    }
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_to_float() {
        let r = Rational::new(1, 4);
        assert!((r.to_f64() - 0.25).abs() < f64::EPSILON);
        assert!(Rational::UNDEFINED.to_f64().is_nan());
    }

    #[test]
    fn test_rational_reduce() {
        assert_eq!(Rational::new(30, 60).reduce(), Rational::new(1, 2));
        assert_eq!(Rational::new(3, -6).reduce(), Rational::new(-1, 2));
    }

    #[test]
    fn test_rational_宽高比缺省为一() {
        assert_eq!(Rational::ZERO.to_f64_or_one(), 1.0);
        assert!((Rational::new(4, 3).to_f64_or_one() - 4.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rational_mul() {
        let r = Rational::new(1, 2) * Rational::new(2, 3);
        assert_eq!(r, Rational::new(1, 3));
    }
}
