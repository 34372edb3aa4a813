//! 容器格式标识符.

use std::fmt;

/// 容器格式标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FormatId {
    /// WAV (RIFF WAVE)
    Wav,
    /// 合成测试源
    TestSrc,
}

impl FormatId {
    /// 格式名称
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::TestSrc => "testsrc",
        }
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
