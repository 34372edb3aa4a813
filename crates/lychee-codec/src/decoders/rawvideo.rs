//! 原始视频解码器.
//!
//! 不做解压缩, 仅按像素格式把一个数据包拆分为平面.

use log::debug;
use lychee_core::{LycheeError, LycheeResult, PixelFormat, Rational};

use crate::codec_id::CodecId;
use crate::codec_parameters::{CodecParameters, CodecParamsType};
use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::Packet;

/// 原始视频解码器
pub struct RawVideoDecoder {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    sample_aspect_ratio: Rational,
    /// 每帧总字节数
    frame_size: usize,
    /// 各平面 (行字节数, 行数)
    planes: Vec<(usize, usize)>,
    output_frame: Option<Frame>,
    opened: bool,
    draining: bool,
}

impl RawVideoDecoder {
    pub fn create() -> LycheeResult<Box<dyn Decoder>> {
        Ok(Box::new(Self {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::None,
            sample_aspect_ratio: Rational::new(1, 1),
            frame_size: 0,
            planes: Vec::new(),
            output_frame: None,
            opened: false,
            draining: false,
        }))
    }
}

impl Decoder for RawVideoDecoder {
    fn codec_id(&self) -> CodecId {
        CodecId::RawVideo
    }

    fn name(&self) -> &str {
        "rawvideo"
    }

    fn open(&mut self, params: &CodecParameters) -> LycheeResult<()> {
        let video = params.video().ok_or_else(|| {
            LycheeError::InvalidArgument("rawvideo 解码器需要视频参数".into())
        })?;
        if video.width == 0 || video.height == 0 {
            return Err(LycheeError::InvalidArgument("宽度和高度不能为 0".into()));
        }
        let pf = video.pixel_format;
        let planes: Vec<_> = (0..pf.plane_count())
            .filter_map(|p| pf.plane_geometry(p, video.width, video.height))
            .collect();
        if planes.is_empty() {
            return Err(LycheeError::Unsupported(format!("不支持的像素格式: {}", pf)));
        }

        self.width = video.width;
        self.height = video.height;
        self.pixel_format = pf;
        self.sample_aspect_ratio = video.sample_aspect_ratio;
        self.frame_size = pf.frame_size(video.width, video.height);
        self.planes = planes;
        self.output_frame = None;
        self.opened = true;
        self.draining = false;

        debug!(
            "打开 rawvideo 解码器: {}x{}, 格式={}, 帧大小={}",
            self.width, self.height, self.pixel_format, self.frame_size,
        );
        Ok(())
    }

    fn send_packet(&mut self, packet: &Packet) -> LycheeResult<()> {
        if !self.opened {
            return Err(LycheeError::Codec("解码器未打开, 请先调用 open()".into()));
        }
        if self.output_frame.is_some() {
            return Err(LycheeError::NeedMoreData);
        }
        if packet.is_empty() {
            self.draining = true;
            return Ok(());
        }
        if packet.data.len() < self.frame_size {
            return Err(LycheeError::InvalidData(format!(
                "rawvideo 数据不足: 需要 {} 字节, 实际 {} 字节",
                self.frame_size,
                packet.data.len(),
            )));
        }

        let mut frame = VideoFrame::new(self.width, self.height, self.pixel_format);
        let mut offset = 0;
        for (i, &(linesize, rows)) in self.planes.iter().enumerate() {
            let size = linesize * rows;
            frame.data[i] = packet.data[offset..offset + size].to_vec();
            frame.linesize[i] = linesize;
            offset += size;
        }
        frame.pts = packet.pts;
        frame.time_base = packet.time_base;
        frame.duration = packet.duration;
        frame.pos = packet.pos;
        frame.sample_aspect_ratio = self.sample_aspect_ratio;

        self.output_frame = Some(Frame::Video(frame));
        Ok(())
    }

    fn receive_frame(&mut self) -> LycheeResult<Frame> {
        if let Some(frame) = self.output_frame.take() {
            return Ok(frame);
        }
        if self.draining {
            return Err(LycheeError::Eof);
        }
        Err(LycheeError::NeedMoreData)
    }

    fn flush(&mut self) {
        self.output_frame = None;
        self.draining = false;
    }
}
