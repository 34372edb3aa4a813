//! 像素格式定义.
//!
//! 播放引擎不做像素格式转换, 这里只描述平面布局以便计算帧大小.

use std::fmt;

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PixelFormat {
    /// 未指定
    None,
    /// 8 位灰度
    Gray8,
    /// 打包 RGB, 每像素 3 字节
    Rgb24,
    /// 打包 RGBA, 每像素 4 字节
    Rgba,
    /// YUV 4:2:0 平面, 色度宽高减半
    Yuv420p,
}

impl PixelFormat {
    /// 平面数量
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Gray8 | Self::Rgb24 | Self::Rgba => 1,
            Self::Yuv420p => 3,
        }
    }

    /// 第 `plane` 个平面的 (行字节数, 行数)
    pub fn plane_geometry(&self, plane: usize, width: u32, height: u32) -> Option<(usize, usize)> {
        let (w, h) = (width as usize, height as usize);
        match (self, plane) {
            (Self::Gray8, 0) => Some((w, h)),
            (Self::Rgb24, 0) => Some((w * 3, h)),
            (Self::Rgba, 0) => Some((w * 4, h)),
            (Self::Yuv420p, 0) => Some((w, h)),
            (Self::Yuv420p, 1 | 2) => Some((w.div_ceil(2), h.div_ceil(2))),
            _ => None,
        }
    }

    /// 一帧图像的总字节数 (无行填充)
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        (0..self.plane_count())
            .filter_map(|p| self.plane_geometry(p, width, height))
            .map(|(linesize, rows)| linesize * rows)
            .sum()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Gray8 => "gray",
            Self::Rgb24 => "rgb24",
            Self::Rgba => "rgba",
            Self::Yuv420p => "yuv420p",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_帧大小() {
        assert_eq!(PixelFormat::Gray8.frame_size(4, 2), 8);
        assert_eq!(PixelFormat::Rgb24.frame_size(4, 2), 24);
        // 5x3 的色度平面为 3x2
        assert_eq!(PixelFormat::Yuv420p.frame_size(5, 3), 15 + 6 + 6);
        assert_eq!(PixelFormat::None.frame_size(4, 4), 0);
    }
}
