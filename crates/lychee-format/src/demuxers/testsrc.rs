//! 合成测试源解封装器.
//!
//! URL 形如 `testsrc:duration=10,fps=25,rate=48000` (`,` 与 `:` 均可分隔), 不读取任何字节,
//! 按参数生成灰度渐变视频, 440Hz 正弦音频与定时文本字幕.
//!
//! 支持的参数:
//! - `duration` 时长 (秒, 默认 10)
//! - `fps` `width` `height` 视频参数 (默认 25, 64x48)
//! - `rate` `channels` 音频参数 (默认 48000, 2)
//! - `video` `audio` `subtitles` 是否生成对应流 (默认 1, 1, 0)
//! - `chapters` 章节数, `cover` 是否附带封面流
//! - `tsdiscont` 声明时间戳不连续, `realtime` 声明为实时流
//! - `fail_after` 输出 N 个数据包后持续返回 I/O 错误
//! - `stall_every` 每 N 次读取返回一次可重试错误
//! - `seek_fail` 所有 seek 请求都失败

use std::io;

use log::{debug, warn};
use lychee_codec::{
    AudioCodecParams, CodecId, CodecParameters, CodecParamsType, Packet, PacketFlags,
    VideoCodecParams,
};
use lychee_core::{
    ChannelLayout, LycheeError, LycheeResult, MediaType, PixelFormat, Rational, SampleFormat,
    TIME_BASE,
};

use crate::demuxer::{Chapter, Demuxer, FormatFlags, SeekRequest};
use crate::format_id::FormatId;
use crate::io::IoContext;
use crate::probe::{FormatProbe, ProbeScore, SCORE_MAX};
use crate::stream::{Disposition, Stream};

/// URL 前缀
const URL_PREFIX: &str = "testsrc:";
/// 每个音频数据包的采样数
const AUDIO_PACKET_SAMPLES: u64 = 1024;
/// 字幕间隔 (秒)
const SUBTITLE_INTERVAL: f64 = 2.0;
/// 字幕显示时长 (毫秒)
const SUBTITLE_DISPLAY_MS: i64 = 1000;
/// 封面边长
const COVER_SIZE: u32 = 16;

/// 判断 URL 是否为测试源
pub fn is_testsrc_url(url: &str) -> bool {
    url.starts_with(URL_PREFIX)
}

/// 测试源参数
#[derive(Debug, Clone)]
struct TestSrcOptions {
    duration: f64,
    fps: u32,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u32,
    video: bool,
    audio: bool,
    subtitles: bool,
    chapters: u32,
    cover: bool,
    ts_discont: bool,
    realtime: bool,
    fail_after: Option<u64>,
    stall_every: Option<u64>,
    seek_fail: bool,
}

impl Default for TestSrcOptions {
    fn default() -> Self {
        Self {
            duration: 10.0,
            fps: 25,
            width: 64,
            height: 48,
            sample_rate: 48000,
            channels: 2,
            video: true,
            audio: true,
            subtitles: false,
            chapters: 0,
            cover: false,
            ts_discont: false,
            realtime: false,
            fail_after: None,
            stall_every: None,
            seek_fail: false,
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> LycheeResult<T> {
    value
        .parse()
        .map_err(|_| LycheeError::InvalidArgument(format!("testsrc 参数 {} 的值无效: {}", key, value)))
}

fn parse_flag(key: &str, value: &str) -> LycheeResult<bool> {
    Ok(parse_value::<u32>(key, value)? != 0)
}

impl TestSrcOptions {
    fn parse(url: &str) -> LycheeResult<Self> {
        let body = url
            .strip_prefix(URL_PREFIX)
            .ok_or_else(|| LycheeError::InvalidArgument(format!("不是 testsrc URL: {}", url)))?;
        let mut opts = Self::default();
        for item in body.split([':', ',']).filter(|s| !s.is_empty()) {
            let (key, value) = item
                .split_once('=')
                .ok_or_else(|| LycheeError::InvalidArgument(format!("testsrc 参数缺少值: {}", item)))?;
            match key {
                "duration" => opts.duration = parse_value(key, value)?,
                "fps" => opts.fps = parse_value(key, value)?,
                "width" => opts.width = parse_value(key, value)?,
                "height" => opts.height = parse_value(key, value)?,
                "rate" => opts.sample_rate = parse_value(key, value)?,
                "channels" => opts.channels = parse_value(key, value)?,
                "video" => opts.video = parse_flag(key, value)?,
                "audio" => opts.audio = parse_flag(key, value)?,
                "subtitles" => opts.subtitles = parse_flag(key, value)?,
                "chapters" => opts.chapters = parse_value(key, value)?,
                "cover" => opts.cover = parse_flag(key, value)?,
                "tsdiscont" => opts.ts_discont = parse_flag(key, value)?,
                "realtime" => opts.realtime = parse_flag(key, value)?,
                "fail_after" => opts.fail_after = Some(parse_value(key, value)?),
                "stall_every" => opts.stall_every = Some(parse_value(key, value)?).filter(|n| *n > 0),
                "seek_fail" => opts.seek_fail = parse_flag(key, value)?,
                _ => warn!("忽略未知的 testsrc 参数: {}", key),
            }
        }
        if !(opts.duration.is_finite() && opts.duration > 0.0) {
            return Err(LycheeError::InvalidArgument("testsrc 时长必须为正数".into()));
        }
        if opts.fps == 0 || opts.width == 0 || opts.height == 0 {
            return Err(LycheeError::InvalidArgument("testsrc 视频参数不能为 0".into()));
        }
        if opts.sample_rate == 0 || opts.channels == 0 {
            return Err(LycheeError::InvalidArgument("testsrc 音频参数不能为 0".into()));
        }
        Ok(opts)
    }

    fn video_byte_rate(&self) -> f64 {
        if self.video {
            f64::from(self.width) * f64::from(self.height) * f64::from(self.fps)
        } else {
            0.0
        }
    }

    fn audio_byte_rate(&self) -> f64 {
        if self.audio {
            f64::from(self.sample_rate) * f64::from(self.channels) * 2.0
        } else {
            0.0
        }
    }
}

/// 生成位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Track {
    Video,
    Audio,
    Subtitle,
}

/// 合成测试源解封装器
pub struct TestSrcDemuxer {
    opts: TestSrcOptions,
    streams: Vec<Stream>,
    chapters: Vec<Chapter>,
    metadata: Vec<(String, String)>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    subtitle_index: Option<usize>,
    /// 下一个视频帧序号
    video_next: u64,
    video_total: u64,
    /// 下一个音频采样序号
    audio_next: u64,
    audio_total: u64,
    subtitle_next: u64,
    subtitle_total: u64,
    /// 已输出的数据包数
    emitted: u64,
    /// read_packet 调用次数
    reads: u64,
}

impl TestSrcDemuxer {
    /// 工厂函数
    pub fn create() -> LycheeResult<Box<dyn Demuxer>> {
        Ok(Box::new(Self {
            opts: TestSrcOptions::default(),
            streams: Vec::new(),
            chapters: Vec::new(),
            metadata: Vec::new(),
            video_index: None,
            audio_index: None,
            subtitle_index: None,
            video_next: 0,
            video_total: 0,
            audio_next: 0,
            audio_total: 0,
            subtitle_next: 0,
            subtitle_total: 0,
            emitted: 0,
            reads: 0,
        }))
    }

    fn byte_rate(&self) -> f64 {
        self.opts.video_byte_rate() + self.opts.audio_byte_rate()
    }

    fn build_streams(&mut self) {
        let opts = &self.opts;
        let mut streams = Vec::new();

        if opts.video {
            let params = CodecParameters::new(
                CodecId::RawVideo,
                CodecParamsType::Video(VideoCodecParams {
                    width: opts.width,
                    height: opts.height,
                    pixel_format: PixelFormat::Gray8,
                    frame_rate: Rational::new(opts.fps as i32, 1),
                    sample_aspect_ratio: Rational::new(1, 1),
                }),
            );
            let mut s = Stream::new(streams.len(), MediaType::Video, params, Rational::new(1, opts.fps as i32));
            s.duration = self.video_total as i64;
            s.start_time = 0;
            s.nb_frames = self.video_total;
            s.disposition = Disposition::DEFAULT;
            self.video_index = Some(s.index);
            streams.push(s);
        }

        if opts.audio {
            let mut params = CodecParameters::new(
                CodecId::PcmS16le,
                CodecParamsType::Audio(AudioCodecParams {
                    sample_rate: opts.sample_rate,
                    channel_layout: ChannelLayout::from_channels(opts.channels),
                    sample_format: SampleFormat::S16,
                    frame_size: AUDIO_PACKET_SAMPLES as u32,
                }),
            );
            params.bit_rate = (opts.audio_byte_rate() * 8.0) as u64;
            let mut s = Stream::new(
                streams.len(),
                MediaType::Audio,
                params,
                Rational::new(1, opts.sample_rate as i32),
            );
            s.duration = self.audio_total as i64;
            s.start_time = 0;
            s.disposition = Disposition::DEFAULT;
            self.audio_index = Some(s.index);
            streams.push(s);
        }

        if opts.subtitles {
            let params = CodecParameters::new(CodecId::Text, CodecParamsType::None);
            let mut s = Stream::new(streams.len(), MediaType::Subtitle, params, Rational::MILLI);
            s.duration = (opts.duration * 1000.0) as i64;
            s.start_time = 0;
            s.metadata.push(("language".into(), "zho".into()));
            self.subtitle_index = Some(s.index);
            streams.push(s);
        }

        if opts.cover {
            let params = CodecParameters::new(
                CodecId::RawVideo,
                CodecParamsType::Video(VideoCodecParams {
                    width: COVER_SIZE,
                    height: COVER_SIZE,
                    pixel_format: PixelFormat::Rgb24,
                    frame_rate: Rational::UNDEFINED,
                    sample_aspect_ratio: Rational::new(1, 1),
                }),
            );
            let index = streams.len();
            let mut s = Stream::new(index, MediaType::Video, params, Rational::new(1, 90000));
            s.disposition = Disposition::ATTACHED_PIC;
            let data: Vec<u8> = (0..COVER_SIZE * COVER_SIZE)
                .flat_map(|i| [(i % 256) as u8, 0x80, 0xFF - (i % 256) as u8])
                .collect();
            let mut pic = Packet::from_data(data);
            pic.stream_index = index;
            pic.pts = 0;
            pic.dts = 0;
            pic.time_base = s.time_base;
            pic.flags = PacketFlags::KEYFRAME;
            s.attached_pic = Some(pic);
            streams.push(s);
        }

        self.streams = streams;
    }

    fn build_chapters(&mut self) {
        let n = i64::from(self.opts.chapters);
        let total_ms = (self.opts.duration * 1000.0) as i64;
        self.chapters = (0..n)
            .map(|i| Chapter {
                id: i,
                time_base: Rational::MILLI,
                start: total_ms * i / n,
                end: total_ms * (i + 1) / n,
                metadata: vec![("title".into(), format!("第 {} 章", i + 1))],
            })
            .collect();
    }

    /// 选出下一个要输出的轨道 (按时间交错, 同一时刻按流序号)
    fn next_track(&self) -> Option<(Track, f64)> {
        let mut candidates = Vec::with_capacity(3);
        if self.video_index.is_some() && self.video_next < self.video_total {
            candidates.push((Track::Video, self.video_next as f64 / f64::from(self.opts.fps)));
        }
        if self.audio_index.is_some() && self.audio_next < self.audio_total {
            candidates.push((Track::Audio, self.audio_next as f64 / f64::from(self.opts.sample_rate)));
        }
        if self.subtitle_index.is_some() && self.subtitle_next < self.subtitle_total {
            candidates.push((Track::Subtitle, self.subtitle_next as f64 * SUBTITLE_INTERVAL));
        }
        candidates
            .into_iter()
            .fold(None, |best: Option<(Track, f64)>, c| match best {
                Some(b) if b.1 <= c.1 => Some(b),
                _ => Some(c),
            })
    }

    fn byte_pos(&self, seconds: f64) -> i64 {
        (seconds * self.byte_rate()) as i64
    }

    fn make_video_packet(&mut self) -> Packet {
        let idx = self.video_next;
        let (w, h) = (self.opts.width as usize, self.opts.height as usize);
        let mut data = vec![0u8; w * h];
        for (y, row) in data.chunks_mut(w).enumerate() {
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + idx as usize) % 256) as u8;
            }
        }
        let mut pkt = Packet::from_data(data);
        pkt.stream_index = self.video_index.unwrap_or(0);
        pkt.pts = idx as i64;
        pkt.dts = idx as i64;
        pkt.duration = 1;
        pkt.time_base = Rational::new(1, self.opts.fps as i32);
        pkt.flags = PacketFlags::KEYFRAME;
        pkt.pos = self.byte_pos(idx as f64 / f64::from(self.opts.fps));
        self.video_next += 1;
        pkt
    }

    fn make_audio_packet(&mut self) -> Packet {
        let start = self.audio_next;
        let count = AUDIO_PACKET_SAMPLES.min(self.audio_total - start);
        let rate = f64::from(self.opts.sample_rate);
        let channels = self.opts.channels as usize;
        let mut data = Vec::with_capacity(count as usize * channels * 2);
        for n in start..start + count {
            let v = (2.0 * std::f64::consts::PI * 440.0 * n as f64 / rate).sin() * 0.25;
            let s = (v * f64::from(i16::MAX)) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&s.to_le_bytes());
            }
        }
        let mut pkt = Packet::from_data(data);
        pkt.stream_index = self.audio_index.unwrap_or(0);
        pkt.pts = start as i64;
        pkt.dts = start as i64;
        pkt.duration = count as i64;
        pkt.time_base = Rational::new(1, self.opts.sample_rate as i32);
        pkt.flags = PacketFlags::KEYFRAME;
        pkt.pos = self.byte_pos(start as f64 / rate);
        self.audio_next += count;
        pkt
    }

    fn make_subtitle_packet(&mut self) -> Packet {
        let idx = self.subtitle_next;
        let start_ms = (idx as f64 * SUBTITLE_INTERVAL * 1000.0) as i64;
        let mut pkt = Packet::from_data(format!("字幕 {}", idx + 1).into_bytes());
        pkt.stream_index = self.subtitle_index.unwrap_or(0);
        pkt.pts = start_ms;
        pkt.dts = start_ms;
        pkt.duration = SUBTITLE_DISPLAY_MS;
        pkt.time_base = Rational::MILLI;
        pkt.flags = PacketFlags::KEYFRAME;
        pkt.pos = self.byte_pos(start_ms as f64 / 1000.0);
        self.subtitle_next += 1;
        pkt
    }
}

impl Demuxer for TestSrcDemuxer {
    fn format_id(&self) -> FormatId {
        FormatId::TestSrc
    }

    fn name(&self) -> &str {
        "testsrc"
    }

    fn open(&mut self, io: &mut IoContext) -> LycheeResult<()> {
        self.opts = TestSrcOptions::parse(io.url())?;
        let opts = &self.opts;
        self.video_total = (opts.duration * f64::from(opts.fps)).ceil() as u64;
        self.audio_total = (opts.duration * f64::from(opts.sample_rate)).round() as u64;
        self.subtitle_total = (opts.duration / SUBTITLE_INTERVAL).ceil() as u64;

        self.build_streams();
        self.build_chapters();
        self.metadata = vec![
            ("title".into(), "Lychee 测试源".into()),
            ("artist".into(), "lychee".into()),
        ];

        debug!(
            "testsrc 打开完成: 时长={}s, 流数量={}, 章节数={}",
            self.opts.duration,
            self.streams.len(),
            self.chapters.len(),
        );
        Ok(())
    }

    fn streams(&self) -> &[Stream] {
        &self.streams
    }

    fn read_packet(&mut self, io: &mut IoContext) -> LycheeResult<Packet> {
        io.check_interrupt()?;
        self.reads += 1;
        if let Some(n) = self.opts.fail_after {
            if self.emitted >= n {
                return Err(LycheeError::Io(io::Error::other("testsrc 模拟读取失败")));
            }
        }
        if let Some(n) = self.opts.stall_every {
            if self.reads % n == 0 {
                return Err(LycheeError::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "testsrc 暂无数据",
                )));
            }
        }

        let (track, _) = self.next_track().ok_or(LycheeError::Eof)?;
        let pkt = match track {
            Track::Video => self.make_video_packet(),
            Track::Audio => self.make_audio_packet(),
            Track::Subtitle => self.make_subtitle_packet(),
        };
        self.emitted += 1;
        Ok(pkt)
    }

    fn seek(&mut self, _io: &mut IoContext, request: &SeekRequest) -> LycheeResult<()> {
        if self.opts.seek_fail {
            return Err(LycheeError::Format("testsrc 模拟 seek 失败".into()));
        }
        if request.min_ts > request.max_ts {
            return Err(LycheeError::InvalidArgument("seek 范围无效".into()));
        }

        let seconds = if request.flags.byte {
            let rate = self.byte_rate();
            if rate <= 0.0 {
                return Err(LycheeError::Unsupported("testsrc 无法按字节 seek".into()));
            }
            request.target as f64 / rate
        } else {
            request.target as f64 / TIME_BASE as f64
        };
        let t = seconds.clamp(0.0, self.opts.duration);

        self.video_next = ((t * f64::from(self.opts.fps) + 1e-9).floor() as u64).min(self.video_total);
        let sample = (t * f64::from(self.opts.sample_rate) + 1e-9).floor() as u64;
        self.audio_next = (sample / AUDIO_PACKET_SAMPLES * AUDIO_PACKET_SAMPLES).min(self.audio_total);
        self.subtitle_next = ((t / SUBTITLE_INTERVAL - 1e-9).ceil().max(0.0) as u64).min(self.subtitle_total);

        debug!("testsrc seek 到 {:.3}s (视频帧={}, 音频采样={})", t, self.video_next, self.audio_next);
        Ok(())
    }

    fn duration(&self) -> Option<f64> {
        Some(self.opts.duration)
    }

    fn start_time(&self) -> Option<f64> {
        Some(0.0)
    }

    fn bit_rate(&self) -> u64 {
        (self.byte_rate() * 8.0) as u64
    }

    fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    fn flags(&self) -> FormatFlags {
        if self.opts.ts_discont {
            FormatFlags::TS_DISCONT
        } else {
            FormatFlags::empty()
        }
    }

    fn is_realtime(&self) -> bool {
        self.opts.realtime
    }
}

/// 测试源探测器, 只看 URL 前缀
pub struct TestSrcProbe;

impl FormatProbe for TestSrcProbe {
    fn probe(&self, _data: &[u8], filename: Option<&str>) -> Option<ProbeScore> {
        filename.filter(|f| is_testsrc_url(f)).map(|_| SCORE_MAX)
    }

    fn format_id(&self) -> FormatId {
        FormatId::TestSrc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demuxer::SeekFlags;

    fn open(url: &str) -> (Box<dyn Demuxer>, IoContext) {
        let mut io = IoContext::open(url).unwrap();
        let mut demuxer = TestSrcDemuxer::create().unwrap();
        demuxer.open(&mut io).unwrap();
        (demuxer, io)
    }

    #[test]
    fn test_testsrc_参数解析() {
        let opts = TestSrcOptions::parse("testsrc:duration=2.5:fps=30:audio=0:chapters=3").unwrap();
        assert!((opts.duration - 2.5).abs() < 1e-9);
        assert_eq!(opts.fps, 30);
        assert!(!opts.audio);
        assert_eq!(opts.chapters, 3);
        assert!(TestSrcOptions::parse("testsrc:duration=abc").is_err());
        assert!(TestSrcOptions::parse("testsrc:duration=0").is_err());
        assert!(TestSrcOptions::parse("testsrc:fps").is_err());
    }

    #[test]
    fn test_testsrc_流与元数据() {
        let (demuxer, _io) = open("testsrc:duration=4:subtitles=1:cover=1:chapters=2");
        let streams = demuxer.streams();
        assert_eq!(streams.len(), 4);
        assert_eq!(streams[0].media_type, MediaType::Video);
        assert_eq!(streams[1].media_type, MediaType::Audio);
        assert_eq!(streams[2].media_type, MediaType::Subtitle);
        assert!(streams[3].is_attached_pic());
        assert!(streams[3].attached_pic.is_some());

        let chapters = demuxer.chapters();
        assert_eq!(chapters.len(), 2);
        assert!((chapters[1].start_seconds() - 2.0).abs() < 1e-9);
        assert_eq!(chapters[1].title(), Some("第 2 章"));
        assert_eq!(demuxer.metadata()[0].1, "Lychee 测试源");
        assert_eq!(demuxer.duration(), Some(4.0));
    }

    #[test]
    fn test_testsrc_数据包交错且读完返回eof() {
        let (mut demuxer, mut io) = open("testsrc:duration=1:fps=10:rate=8000:channels=1");
        let mut video = 0;
        let mut audio = 0;
        let mut last_time = 0.0;
        loop {
            match demuxer.read_packet(&mut io) {
                Ok(pkt) => {
                    let t = pkt.pts as f64 * pkt.time_base.to_f64();
                    assert!(t + 1e-9 >= last_time);
                    last_time = t;
                    if pkt.stream_index == 0 {
                        assert_eq!(pkt.size(), 64 * 48);
                        video += 1;
                    } else {
                        audio += 1;
                    }
                }
                Err(LycheeError::Eof) => break,
                Err(e) => panic!("意外错误: {}", e),
            }
        }
        assert_eq!(video, 10);
        assert_eq!(audio, 8);
    }

    fn first_video_pts(demuxer: &mut dyn Demuxer, io: &mut IoContext) -> i64 {
        loop {
            let pkt = demuxer.read_packet(io).unwrap();
            if pkt.stream_index == 0 {
                return pkt.pts;
            }
        }
    }

    #[test]
    fn test_testsrc_seek_对齐到帧边界() {
        let (mut demuxer, mut io) = open("testsrc:duration=10");
        demuxer.seek(&mut io, &SeekRequest::to_seconds(5.0)).unwrap();
        let audio = demuxer.read_packet(&mut io).unwrap();
        assert_eq!(audio.stream_index, 1);
        assert!(audio.pts <= 240000);
        assert_eq!(first_video_pts(demuxer.as_mut(), &mut io), 125);

        let byte_rate = 64.0 * 48.0 * 25.0 + 48000.0 * 2.0 * 2.0;
        let req = SeekRequest {
            flags: SeekFlags {
                byte: true,
                ..SeekFlags::default()
            },
            target: (2.0 * byte_rate) as i64,
            ..SeekRequest::to_seconds(0.0)
        };
        demuxer.seek(&mut io, &req).unwrap();
        assert_eq!(first_video_pts(demuxer.as_mut(), &mut io), 50);
    }

    #[test]
    fn test_testsrc_模拟故障() {
        let (mut demuxer, mut io) = open("testsrc:duration=1:fail_after=2:seek_fail=1");
        assert!(demuxer.read_packet(&mut io).is_ok());
        assert!(demuxer.read_packet(&mut io).is_ok());
        let err = demuxer.read_packet(&mut io).unwrap_err();
        assert!(!err.is_transient());
        assert!(demuxer.seek(&mut io, &SeekRequest::to_seconds(0.5)).is_err());

        let (mut demuxer, mut io) = open("testsrc:duration=1:stall_every=2");
        assert!(demuxer.read_packet(&mut io).is_ok());
        assert!(demuxer.read_packet(&mut io).unwrap_err().is_transient());
        assert!(demuxer.read_packet(&mut io).is_ok());
    }

    #[test]
    fn test_testsrc_探测() {
        assert_eq!(TestSrcProbe.probe(&[], Some("testsrc:")), Some(SCORE_MAX));
        assert_eq!(TestSrcProbe.probe(&[], Some("a.wav")), None);
        assert_eq!(TestSrcProbe.probe(&[], None), None);
    }
}
