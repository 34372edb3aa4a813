//! 播放器.
//!
//! [`MediaPlayer`] 把读取线程, 解码线程和两个渲染器组装成一次播放会话,
//! 对外提供打开, 暂停, seek, 音量, 章节与元数据查询等控制接口.
//! 状态变化通过消息回调异步通知.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, error, info, warn};
use lychee_codec::{CodecRegistry, Decoder, Packet};
use lychee_core::{LycheeError, LycheeResult, MediaType, Rational, TIME_BASE};
use lychee_format::{Chapter, Demuxer, FormatFlags, FormatRegistry, IoContext, Stream};

use crate::audio_renderer::{AudioRenderer, VolumeControl};
use crate::config::PlayerConfig;
use crate::data_source::{self, ContinueRead, DataSource};
use crate::decoder::{self, DecoderContext, DecoderHandle, NOT_FINISHED, VideoDecodeParams};
use crate::frame_queue::FrameQueue;
use crate::media_clock::{MediaClock, SyncType};
use crate::message::{MessageDispatcher, MessageQueue, PlayerMessage, PlayerState, StateCell};
use crate::packet_queue::PacketQueue;
use crate::sink::{AudioCallback, AudioSink, AudioSpec, NullAudioSink, NullVideoSink, VideoSink};
use crate::video_renderer::{FrameStats, SubtitleQueues, VideoRenderer};

/// 码率未知时按字节 seek 使用的估算值 (字节/秒)
const DEFAULT_BYTE_RATE: f64 = 180_000.0;

/// 时间戳允许跳变的容器中, 帧间隔超过此值视为不连续
const MAX_FRAME_DURATION_DISCONT: f64 = 10.0;
const MAX_FRAME_DURATION: f64 = 3600.0;

// ========================
// 播放上下文
// ========================

/// 流类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
    Subtitle,
}

/// 已选中流的队列与状态
pub struct StreamSlot {
    pub index: usize,
    pub time_base: Rational,
    /// 流起始时间 (秒)
    pub start_time: f64,
    /// 封面数据包, 仅封面流有
    pub attached_pic: Option<Packet>,
    pub packets: Arc<PacketQueue>,
    pub frames: Arc<FrameQueue>,
    /// 解码器已排空的 serial
    pub finished: Arc<AtomicI32>,
}

impl StreamSlot {
    fn new(stream: &Stream, frame_capacity: usize, keep_last: bool) -> Self {
        let packets = Arc::new(PacketQueue::new());
        let frames = Arc::new(FrameQueue::new(
            Arc::clone(&packets),
            frame_capacity,
            keep_last,
        ));
        Self {
            index: stream.index,
            time_base: stream.time_base,
            start_time: stream.start_seconds(),
            attached_pic: stream
                .attached_pic
                .clone()
                .filter(|_| stream.is_attached_pic()),
            packets,
            frames,
            finished: Arc::new(AtomicI32::new(NOT_FINISHED)),
        }
    }

    pub fn is_attached_pic(&self) -> bool {
        self.attached_pic.is_some()
    }
}

/// 容器级信息
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    /// 时长 (秒), None 表示未知
    pub duration: Option<f64>,
    /// 起始时间 (秒)
    pub start_time: f64,
    pub chapters: Vec<Chapter>,
    pub metadata: Vec<(String, String)>,
    pub realtime: bool,
    pub seek_by_bytes: bool,
    /// 总码率 (bits/s), 0 表示未知
    pub bit_rate: u64,
    pub ts_discont: bool,
}

impl MediaInfo {
    fn from_demuxer(demuxer: &dyn Demuxer, config: &PlayerConfig) -> Self {
        let flags = demuxer.flags();
        let ts_discont = flags.contains(FormatFlags::TS_DISCONT);
        let seek_by_bytes = config
            .seek_by_bytes
            .unwrap_or(ts_discont && !flags.contains(FormatFlags::NO_BYTE_SEEK));
        Self {
            duration: demuxer.duration(),
            start_time: demuxer.start_time().unwrap_or(0.0),
            chapters: demuxer.chapters().to_vec(),
            metadata: demuxer.metadata().to_vec(),
            realtime: demuxer.is_realtime(),
            seek_by_bytes,
            bit_rate: demuxer.bit_rate(),
            ts_discont,
        }
    }

    /// 按字节 seek 时每秒对应的字节数
    fn byte_rate(&self) -> f64 {
        if self.bit_rate > 0 {
            self.bit_rate as f64 / 8.0
        } else {
            DEFAULT_BYTE_RATE
        }
    }
}

/// 读取线程与控制接口共享的请求状态
#[derive(Debug)]
pub(crate) struct ControlState {
    pub seek_req: bool,
    /// seek 目标 (微秒或字节)
    pub seek_pos: i64,
    pub seek_rel: i64,
    pub seek_by_bytes: bool,
    /// 最近一次 seek 的目标 (秒)
    pub last_seek_pos: f64,
    /// seek 完成后是否恢复播放
    pub resume_after_seek: bool,
    pub queue_attachments_req: bool,
    /// 剩余播放次数, 0 表示无限循环
    pub loop_count: u32,
    /// 本轮已发送完成通知
    pub completed: bool,
}

/// 各线程共享的播放上下文
pub struct PlaybackContext {
    pub config: PlayerConfig,
    pub info: MediaInfo,
    pub audio: Option<StreamSlot>,
    pub video: Option<StreamSlot>,
    pub subtitle: Option<StreamSlot>,
    pub clocks: Arc<MediaClock>,
    pub continue_read: Arc<ContinueRead>,
    /// 读取线程已到达输入末尾
    pub eof: AtomicBool,
    pub messages: Arc<MessageQueue>,
    pub state: Arc<StateCell>,
    pub stats: Arc<FrameStats>,
    /// 超过此值的帧间隔视为时间戳跳变
    pub max_frame_duration: f64,
    abort_request: Arc<AtomicBool>,
    control: Mutex<ControlState>,
    buffered_position_ms: AtomicI64,
}

/// 选中的流
#[derive(Default)]
struct SelectedStreams {
    audio: Option<Stream>,
    video: Option<Stream>,
    subtitle: Option<Stream>,
}

impl SelectedStreams {
    /// 每种类型取第一条流, 视频优先选择非封面流
    fn select(streams: &[Stream], config: &PlayerConfig) -> Self {
        let first = |media_type: MediaType| {
            streams
                .iter()
                .filter(|s| s.media_type == media_type)
                .min_by_key(|s| s.is_attached_pic())
                .cloned()
        };
        Self {
            audio: first(MediaType::Audio).filter(|_| !config.audio_disable),
            video: first(MediaType::Video).filter(|_| !config.video_disable),
            subtitle: first(MediaType::Subtitle).filter(|_| !config.subtitle_disable),
        }
    }
}

impl PlaybackContext {
    fn new(
        config: PlayerConfig,
        info: MediaInfo,
        streams: &SelectedStreams,
        messages: Arc<MessageQueue>,
        state: Arc<StateCell>,
        abort_request: Arc<AtomicBool>,
    ) -> Self {
        let q = &config.queue;
        let audio = streams
            .audio
            .as_ref()
            .map(|s| StreamSlot::new(s, q.audio_frames, true));
        let video = streams
            .video
            .as_ref()
            .map(|s| StreamSlot::new(s, q.video_frames, true));
        let subtitle = streams
            .subtitle
            .as_ref()
            .map(|s| StreamSlot::new(s, q.subtitle_frames, false));

        let serial_of = |slot: &Option<StreamSlot>| {
            slot.as_ref()
                .map_or_else(|| Arc::new(AtomicI32::new(0)), |s| s.packets.serial_handle())
        };
        let (has_audio, has_video) = (audio.is_some(), video.is_some());
        let clocks = Arc::new(MediaClock::new(
            config.sync_type,
            serial_of(&audio),
            serial_of(&video),
            Arc::new(move |sync_type| match sync_type {
                SyncType::Audio => has_audio,
                SyncType::Video => has_video,
                SyncType::External => true,
            }),
        ));

        let max_frame_duration = if info.ts_discont {
            MAX_FRAME_DURATION_DISCONT
        } else {
            MAX_FRAME_DURATION
        };
        let control = ControlState {
            seek_req: false,
            seek_pos: 0,
            seek_rel: 0,
            seek_by_bytes: info.seek_by_bytes,
            last_seek_pos: config.start_time.unwrap_or(0.0) + info.start_time,
            resume_after_seek: true,
            queue_attachments_req: true,
            loop_count: config.loop_count,
            completed: false,
        };

        Self {
            config,
            info,
            audio,
            video,
            subtitle,
            clocks,
            continue_read: Arc::new(ContinueRead::new()),
            eof: AtomicBool::new(false),
            messages,
            state,
            stats: Arc::new(FrameStats::default()),
            max_frame_duration,
            abort_request,
            control: Mutex::new(control),
            buffered_position_ms: AtomicI64::new(-1),
        }
    }

    /// 直接从解封装器构造并启动全部队列, 不创建解码线程
    #[cfg(test)]
    pub(crate) fn for_demuxer(config: PlayerConfig, demuxer: &dyn Demuxer) -> Self {
        let info = MediaInfo::from_demuxer(demuxer, &config);
        let streams = SelectedStreams::select(demuxer.streams(), &config);
        let messages = Arc::new(MessageQueue::new());
        let state = Arc::new(StateCell::new(Arc::clone(&messages)));
        let ctx = Self::new(
            config,
            info,
            &streams,
            messages,
            state,
            Arc::new(AtomicBool::new(false)),
        );
        for (_, slot) in ctx.slots() {
            slot.packets.start();
        }
        ctx
    }

    pub(crate) fn control(&self) -> MutexGuard<'_, ControlState> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 已选中的流
    pub fn slots(&self) -> impl Iterator<Item = (StreamKind, &StreamSlot)> {
        [
            (StreamKind::Audio, self.audio.as_ref()),
            (StreamKind::Video, self.video.as_ref()),
            (StreamKind::Subtitle, self.subtitle.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, slot)| slot.map(|s| (kind, s)))
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_request.load(Ordering::SeqCst)
    }

    /// 中止全部队列并唤醒所有线程
    pub fn request_abort(&self) {
        self.abort_request.store(true, Ordering::SeqCst);
        for (_, slot) in self.slots() {
            slot.packets.abort();
            slot.frames.signal();
        }
        self.continue_read.notify();
    }

    /// 是否不限制读取 (实时流)
    pub fn infinite_buffer(&self) -> bool {
        self.config.infinite_buffer_active(self.info.realtime)
    }

    /// 发起 seek
    ///
    /// `pos` 与 `rel` 以秒为单位, 按字节 seek 时换算为字节偏移.
    /// 已有请求未处理时忽略新请求.
    pub fn stream_seek(&self, pos: f64, rel: f64) {
        let mut control = self.control();
        if control.seek_req {
            debug!("上一个 seek 尚未完成, 忽略 {:.3}s", pos);
            return;
        }
        let scale = if self.info.seek_by_bytes {
            self.info.byte_rate()
        } else {
            TIME_BASE as f64
        };
        control.seek_pos = (pos * scale) as i64;
        control.seek_rel = (rel * scale) as i64;
        control.seek_by_bytes = self.info.seek_by_bytes;
        control.seek_req = true;
        control.last_seek_pos = pos;
        control.resume_after_seek = !self.clocks.is_paused();
        drop(control);

        info!("seek 到 {:.3}s", pos);
        self.clocks.set_paused(true);
        self.state.set(PlayerState::Buffering);
        self.buffered_position_ms.store(-1, Ordering::SeqCst);
        self.continue_read.notify();
    }

    /// 切换暂停, 返回新的暂停状态
    ///
    /// seek 进行中只改变 seek 完成后的状态.
    pub fn toggle_pause(&self) -> bool {
        let mut control = self.control();
        if control.seek_req {
            control.resume_after_seek = !control.resume_after_seek;
            return !control.resume_after_seek;
        }
        drop(control);
        self.clocks.toggle_pause()
    }

    pub fn is_paused(&self) -> bool {
        let control = self.control();
        if control.seek_req {
            return !control.resume_after_seek;
        }
        drop(control);
        self.clocks.is_paused()
    }

    /// 当前播放位置 (秒), seek 尚未处理时为 seek 目标
    pub fn current_position(&self) -> f64 {
        let (pending, last_seek_pos) = {
            let control = self.control();
            (control.seek_req, control.last_seek_pos)
        };
        let pos = if pending || !self.master_clock_current() {
            last_seek_pos
        } else {
            let clock = self.clocks.master_clock();
            if clock.is_nan() { last_seek_pos } else { clock }
        };
        pos.max(0.0)
    }

    /// 主时钟已由 seek 之后的数据设置
    fn master_clock_current(&self) -> bool {
        let (clock, slot) = match self.clocks.master_sync_type() {
            SyncType::Audio => (self.clocks.audio(), self.audio.as_ref()),
            SyncType::Video => (self.clocks.video(), self.video.as_ref()),
            SyncType::External => return true,
        };
        slot.is_none_or(|s| clock.serial() == s.packets.latest_serial())
    }

    /// 记录缓冲位置, 变化时通知
    pub fn update_buffered_position(&self, ms: i64) {
        if self.buffered_position_ms.swap(ms, Ordering::SeqCst) != ms {
            self.messages.post(PlayerMessage::BufferingTimeUpdate(ms));
        }
    }

    /// 已缓冲位置 (毫秒), seek 后未更新前为 -1
    pub fn buffered_position(&self) -> i64 {
        self.buffered_position_ms.load(Ordering::SeqCst)
    }
}

// ========================
// 播放器
// ========================

/// 播放器构建器
pub struct PlayerBuilder {
    config: PlayerConfig,
    audio_sink: Option<Box<dyn AudioSink>>,
    video_sink: Option<Box<dyn VideoSink>>,
    formats: Option<FormatRegistry>,
    codecs: Option<CodecRegistry>,
}

impl PlayerBuilder {
    pub fn new() -> Self {
        Self {
            config: PlayerConfig::default(),
            audio_sink: None,
            video_sink: None,
            formats: None,
            codecs: None,
        }
    }

    pub fn config(mut self, config: PlayerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audio_sink(mut self, sink: impl AudioSink + 'static) -> Self {
        self.audio_sink = Some(Box::new(sink));
        self
    }

    pub fn video_sink(mut self, sink: impl VideoSink + 'static) -> Self {
        self.video_sink = Some(Box::new(sink));
        self
    }

    /// 使用自定义容器注册表, 默认为全部内置格式
    pub fn format_registry(mut self, formats: FormatRegistry) -> Self {
        self.formats = Some(formats);
        self
    }

    /// 使用自定义解码器注册表, 默认为全部内置解码器
    pub fn codec_registry(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn build(self) -> LycheeResult<MediaPlayer> {
        self.config.validate()?;
        let messages = Arc::new(MessageQueue::new());
        let dispatcher = MessageDispatcher::start(Arc::clone(&messages))?;
        let state = Arc::new(StateCell::new(Arc::clone(&messages)));
        let volume = Arc::new(VolumeControl::new(self.config.volume, self.config.muted));
        Ok(MediaPlayer {
            speed: Mutex::new(self.config.speed),
            config: self.config,
            formats: self.formats.unwrap_or_else(FormatRegistry::with_builtin),
            codecs: self.codecs.unwrap_or_else(CodecRegistry::with_builtin),
            messages,
            dispatcher,
            state,
            volume,
            audio_sink: Mutex::new(
                self.audio_sink
                    .unwrap_or_else(|| Box::new(NullAudioSink)),
            ),
            video_sink: Mutex::new(Some(
                self.video_sink
                    .unwrap_or_else(|| Box::new(NullVideoSink)),
            )),
            session: Mutex::new(None),
        })
    }
}

impl Default for PlayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type SharedAudioRenderer = Arc<Mutex<Option<AudioRenderer>>>;

/// 一次打开到关闭之间的播放会话
struct Session {
    ctx: Arc<PlaybackContext>,
    /// 音频设备回调与 `read_audio` 共用
    audio: Option<SharedAudioRenderer>,
    video: Option<VideoRenderer>,
    reader: Option<JoinHandle<()>>,
    decoders: Vec<DecoderHandle>,
}

/// 媒体播放器
///
/// 所有方法都可以从任意线程调用. 视频显示由宿主周期性调用
/// [`MediaPlayer::refresh_video`] 驱动, 音频由音频设备回调拉取.
pub struct MediaPlayer {
    config: PlayerConfig,
    formats: FormatRegistry,
    codecs: CodecRegistry,
    messages: Arc<MessageQueue>,
    dispatcher: MessageDispatcher,
    state: Arc<StateCell>,
    volume: Arc<VolumeControl>,
    speed: Mutex<f64>,
    audio_sink: Mutex<Box<dyn AudioSink>>,
    video_sink: Mutex<Option<Box<dyn VideoSink>>>,
    session: Mutex<Option<Session>>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MediaPlayer {
    pub fn builder() -> PlayerBuilder {
        PlayerBuilder::new()
    }

    /// 打开媒体并开始播放
    pub fn open(&self, url: &str) -> LycheeResult<()> {
        let mut session = lock(&self.session);
        if session.is_some() {
            return Err(LycheeError::InvalidArgument("播放器已打开".into()));
        }
        self.state.set(PlayerState::Buffering);
        match self.open_session(url) {
            Ok(opened) => {
                *session = Some(opened);
                Ok(())
            }
            Err(e) => {
                error!("{}: 打开失败: {}", url, e);
                self.state.set(PlayerState::Idle);
                Err(e)
            }
        }
    }

    fn open_codec(&self, stream: &Stream) -> Option<Box<dyn Decoder>> {
        let opened = self.codecs.create_decoder(stream.codec_id()).and_then(|mut codec| {
            codec.open(&stream.codec_params)?;
            Ok(codec)
        });
        match opened {
            Ok(codec) => {
                info!(
                    "流 #{} ({:?}) 使用解码器 {}",
                    stream.index,
                    stream.media_type,
                    codec.name()
                );
                Some(codec)
            }
            Err(e) => {
                warn!("流 #{} 无法打开解码器: {}", stream.index, e);
                None
            }
        }
    }

    /// 打开音频设备, 回调在渲染器就绪前输出静音
    fn open_audio_sink(&self, stream: &Stream, renderer: &SharedAudioRenderer) -> Option<AudioSpec> {
        let params = stream.codec_params.audio()?;
        let wanted = AudioSpec::wanted(params.sample_rate, params.channel_layout);
        let silence = wanted.sample_format.silence_byte();
        let shared = Arc::clone(renderer);
        let callback: AudioCallback = Box::new(move |buf: &mut [u8]| {
            match lock(&shared).as_mut() {
                Some(renderer) => renderer.fill(buf),
                None => buf.fill(silence),
            }
        });
        match lock(&self.audio_sink).open(&wanted, callback) {
            Ok(spec) => {
                info!(
                    "音频设备: {}Hz {} 声道 {}, 缓冲 {} 采样",
                    spec.sample_rate, spec.channel_layout.channels, spec.sample_format, spec.samples
                );
                Some(spec)
            }
            Err(e) => {
                warn!("无法打开音频设备: {}", e);
                None
            }
        }
    }

    fn open_session(&self, url: &str) -> LycheeResult<Session> {
        let abort_request = Arc::new(AtomicBool::new(false));
        let mut io = IoContext::open(url)?;
        let flag = Arc::clone(&abort_request);
        io.set_interrupt_callback(Arc::new(move || flag.load(Ordering::SeqCst)));
        let mut demuxer = self.formats.open_input(&mut io)?;
        info!("{}: 格式 {}, 流数量 {}", url, demuxer.name(), demuxer.streams().len());

        let info = MediaInfo::from_demuxer(demuxer.as_ref(), &self.config);
        let mut streams = SelectedStreams::select(demuxer.streams(), &self.config);

        let mut audio_codec = streams.audio.as_ref().and_then(|s| self.open_codec(s));
        let video_codec = streams.video.as_ref().and_then(|s| self.open_codec(s));
        let subtitle_codec = streams.subtitle.as_ref().and_then(|s| self.open_codec(s));

        let renderer: SharedAudioRenderer = Arc::new(Mutex::new(None));
        let mut audio_spec = None;
        if let (Some(stream), Some(_)) = (&streams.audio, &audio_codec) {
            audio_spec = self.open_audio_sink(stream, &renderer);
            if audio_spec.is_none() {
                audio_codec = None;
            }
        }
        if audio_codec.is_none() {
            streams.audio = None;
        }
        if video_codec.is_none() {
            streams.video = None;
        }
        if subtitle_codec.is_none() {
            streams.subtitle = None;
        }
        if streams.audio.is_none() && streams.video.is_none() {
            return Err(LycheeError::Unsupported("没有可播放的音频或视频流".into()));
        }

        let started = self.start_session(
            demuxer,
            io,
            info,
            &streams,
            (audio_codec, video_codec, subtitle_codec),
            audio_spec.map(|spec| (spec, renderer)),
            abort_request,
        );
        if started.is_err() && audio_spec.is_some() {
            lock(&self.audio_sink).close();
        }
        started
    }

    #[allow(clippy::type_complexity, clippy::too_many_arguments)]
    fn start_session(
        &self,
        mut demuxer: Box<dyn Demuxer>,
        mut io: IoContext,
        info: MediaInfo,
        streams: &SelectedStreams,
        codecs: (
            Option<Box<dyn Decoder>>,
            Option<Box<dyn Decoder>>,
            Option<Box<dyn Decoder>>,
        ),
        audio_out: Option<(AudioSpec, SharedAudioRenderer)>,
        abort_request: Arc<AtomicBool>,
    ) -> LycheeResult<Session> {
        let ctx = Arc::new(PlaybackContext::new(
            self.config.clone(),
            info,
            streams,
            Arc::clone(&self.messages),
            Arc::clone(&self.state),
            abort_request,
        ));
        let speed = *lock(&self.speed);
        if speed != 1.0 {
            ctx.clocks.set_speed(speed);
        }

        if let Some(start) = self.config.start_time {
            let target = start + ctx.info.start_time;
            data_source::seek_to_start(demuxer.as_mut(), &mut io, target);
        }

        for (_, slot) in ctx.slots() {
            slot.packets.start();
        }

        let (audio_codec, video_codec, subtitle_codec) = codecs;
        let mut decoders = Vec::new();
        let mut audio = None;
        let mut video = None;

        if let (Some(slot), Some(codec), Some((spec, renderer))) =
            (&ctx.audio, audio_codec, audio_out)
        {
            let dctx = self.decoder_context(&ctx, slot, codec);
            decoders.push(decoder::spawn_audio_decoder(
                dctx,
                Arc::clone(&slot.frames),
                slot.time_base,
            )?);
            *lock(&renderer) = Some(AudioRenderer::new(
                Arc::clone(&slot.frames),
                Arc::clone(&slot.packets),
                Arc::clone(&ctx.clocks),
                &spec,
                &self.config.sync,
                Arc::clone(&self.volume),
            ));
            audio = Some(renderer);
        }

        if let (Some(slot), Some(codec), Some(stream)) = (&ctx.video, video_codec, &streams.video) {
            let dctx = self.decoder_context(&ctx, slot, codec);
            let frame_rate = stream
                .codec_params
                .video()
                .map_or(Rational::UNDEFINED, |v| v.frame_rate);
            decoders.push(decoder::spawn_video_decoder(
                dctx,
                Arc::clone(&slot.frames),
                VideoDecodeParams {
                    time_base: slot.time_base,
                    frame_rate,
                    clocks: Arc::clone(&ctx.clocks),
                    framedrop: self.config.framedrop,
                    nosync_threshold: self.config.sync.av_nosync_threshold,
                    stats: Arc::clone(&ctx.stats),
                },
            )?);
            let sink = lock(&self.video_sink)
                .take()
                .unwrap_or_else(|| Box::new(NullVideoSink));
            let mut renderer = VideoRenderer::new(
                Arc::clone(&slot.frames),
                Arc::clone(&slot.packets),
                Arc::clone(&ctx.clocks),
                sink,
                Arc::clone(&self.messages),
                Arc::clone(&ctx.stats),
                &self.config,
                ctx.max_frame_duration,
            );
            if let Some(sub) = &ctx.subtitle {
                renderer = renderer.with_subtitles(SubtitleQueues {
                    subpq: Arc::clone(&sub.frames),
                    subtitleq: Arc::clone(&sub.packets),
                });
            }
            video = Some(renderer);
        }

        if let (Some(slot), Some(codec)) = (&ctx.subtitle, subtitle_codec) {
            let dctx = self.decoder_context(&ctx, slot, codec);
            decoders.push(decoder::spawn_subtitle_decoder(
                dctx,
                Arc::clone(&slot.frames),
                slot.time_base,
            )?);
        }

        self.messages.post(PlayerMessage::MetadataLoaded);
        let reader = DataSource::new(Arc::clone(&ctx), demuxer, io).spawn()?;

        Ok(Session {
            ctx,
            audio,
            video,
            reader: Some(reader),
            decoders,
        })
    }

    fn decoder_context(
        &self,
        ctx: &PlaybackContext,
        slot: &StreamSlot,
        codec: Box<dyn Decoder>,
    ) -> DecoderContext {
        DecoderContext::new(
            codec,
            Arc::clone(&slot.packets),
            Arc::clone(&ctx.continue_read),
            Arc::clone(&slot.finished),
        )
    }

    /// 停止播放并释放会话, 未打开时无操作
    pub fn close(&self) {
        let Some(mut session) = lock(&self.session).take() else {
            return;
        };
        session.ctx.request_abort();
        if let Some(reader) = session.reader.take() {
            if reader.join().is_err() {
                warn!("读取线程异常退出");
            }
        }
        for mut handle in session.decoders.drain(..) {
            handle.abort();
        }
        if let Some(audio) = session.audio.take() {
            lock(&self.audio_sink).close();
            lock(&audio).take();
        }
        if let Some(video) = session.video.take() {
            *lock(&self.video_sink) = Some(video.into_sink());
        }
        self.state.set(PlayerState::Idle);
        info!("播放已关闭");
    }

    pub fn is_open(&self) -> bool {
        lock(&self.session).is_some()
    }

    pub fn state(&self) -> PlayerState {
        self.state.get()
    }

    fn with_ctx<T>(&self, f: impl FnOnce(&PlaybackContext) -> T) -> Option<T> {
        lock(&self.session).as_ref().map(|s| f(&s.ctx))
    }

    // ========================
    // 播放控制
    // ========================

    /// 切换暂停, 返回新的暂停状态
    pub fn toggle_pause(&self) -> bool {
        let mut session = lock(&self.session);
        let Some(session) = session.as_mut() else {
            return false;
        };
        let paused = session.ctx.toggle_pause();
        if session.audio.is_some() {
            lock(&self.audio_sink).pause(paused);
        }
        if let Some(video) = session.video.as_mut() {
            video.request_refresh();
        }
        info!("{}", if paused { "暂停" } else { "继续播放" });
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.with_ctx(|ctx| ctx.is_paused()).unwrap_or(false)
    }

    /// seek 到绝对位置 (秒), 不早于容器起始时间
    pub fn seek(&self, position: f64) {
        self.with_ctx(|ctx| {
            let pos = if position.is_finite() { position } else { 0.0 };
            ctx.stream_seek(pos.max(ctx.info.start_time), 0.0);
        });
    }

    /// 从当前位置前后 seek `increment` 秒
    pub fn seek_relative(&self, increment: f64) {
        self.with_ctx(|ctx| {
            let mut pos = ctx.clocks.master_clock();
            if pos.is_nan() {
                pos = ctx.control().last_seek_pos;
            }
            let target = (pos + increment).max(ctx.info.start_time);
            ctx.stream_seek(target, increment);
        });
    }

    /// seek 到章节起点, 序号越界时忽略
    pub fn seek_to_chapter(&self, index: usize) -> bool {
        self.with_ctx(|ctx| match ctx.info.chapters.get(index) {
            Some(chapter) => {
                debug!("跳转到章节 {} ({:?})", index, chapter.title());
                ctx.stream_seek(chapter.start_seconds(), 0.0);
                true
            }
            None => {
                warn!("章节序号 {} 越界, 共 {} 章", index, ctx.info.chapters.len());
                false
            }
        })
        .unwrap_or(false)
    }

    pub fn chapter_count(&self) -> usize {
        self.with_ctx(|ctx| ctx.info.chapters.len()).unwrap_or(0)
    }

    /// 当前所在章节: 起点不晚于当前位置的最后一章
    pub fn current_chapter(&self) -> Option<usize> {
        self.with_ctx(|ctx| {
            let pos = ctx.current_position();
            ctx.info
                .chapters
                .iter()
                .rposition(|c| c.start_seconds() <= pos)
        })
        .flatten()
    }

    /// 容器元数据, 键不区分大小写
    pub fn metadata(&self, key: &str) -> Option<String> {
        self.with_ctx(|ctx| {
            ctx.info
                .metadata
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        })
        .flatten()
    }

    /// 时长 (秒): 未打开为 NaN, 未知为 0
    pub fn duration(&self) -> f64 {
        self.with_ctx(|ctx| ctx.info.duration.unwrap_or(0.0))
            .unwrap_or(f64::NAN)
    }

    /// 当前播放位置 (秒)
    pub fn current_position(&self) -> f64 {
        self.with_ctx(|ctx| ctx.current_position()).unwrap_or(0.0)
    }

    /// 已缓冲位置 (毫秒)
    pub fn buffered_position(&self) -> i64 {
        self.with_ctx(|ctx| ctx.buffered_position()).unwrap_or(-1)
    }

    // ========================
    // 音量与速度
    // ========================

    /// 设置音量 (0..=100, 超出时截断)
    pub fn set_volume(&self, volume: u32) {
        self.volume.set_volume(volume.min(100));
    }

    pub fn volume(&self) -> u32 {
        self.volume.volume()
    }

    pub fn set_mute(&self, muted: bool) {
        self.volume.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.volume.is_muted()
    }

    /// 设置播放速度, 对当前和之后的会话生效
    pub fn set_speed(&self, speed: f64) -> LycheeResult<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(LycheeError::InvalidArgument(format!("无效的播放速度: {speed}")));
        }
        *lock(&self.speed) = speed;
        self.with_ctx(|ctx| ctx.clocks.set_speed(speed));
        Ok(())
    }

    pub fn speed(&self) -> f64 {
        *lock(&self.speed)
    }

    // ========================
    // 渲染
    // ========================

    /// 刷新视频, 返回建议的下次调用间隔 (秒)
    pub fn refresh_video(&self) -> f64 {
        let mut remaining = self.config.sync.refresh_rate;
        let mut session = lock(&self.session);
        if let Some(session) = session.as_mut() {
            let paused = session.ctx.clocks.is_paused();
            if let Some(video) = session.video.as_mut() {
                if !paused || video.force_refresh() {
                    video.refresh(&mut remaining);
                }
            }
        }
        remaining
    }

    /// 由宿主直接拉取音频数据, 没有音频流时返回 false
    pub fn read_audio(&self, buf: &mut [u8]) -> bool {
        let renderer = lock(&self.session)
            .as_ref()
            .and_then(|s| s.audio.as_ref().map(Arc::clone));
        let Some(renderer) = renderer else {
            return false;
        };
        match lock(&renderer).as_mut() {
            Some(renderer) => {
                renderer.fill(buf);
                true
            }
            None => false,
        }
    }

    /// 视频显示宽高比, 尚未显示任何帧时为 0
    pub fn video_aspect_ratio(&self) -> f64 {
        self.with_ctx(|ctx| ctx.stats.aspect_ratio()).unwrap_or(0.0)
    }

    pub fn frame_drops_early(&self) -> u64 {
        self.with_ctx(|ctx| ctx.stats.frame_drops_early()).unwrap_or(0)
    }

    pub fn frame_drops_late(&self) -> u64 {
        self.with_ctx(|ctx| ctx.stats.frame_drops_late()).unwrap_or(0)
    }

    /// 注册消息回调, 回调在独立线程中执行
    pub fn set_message_callback(&self, callback: impl FnMut(&PlayerMessage) + Send + 'static) {
        self.dispatcher.set_callback(Box::new(callback));
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.close();
        self.dispatcher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CaptureVideoSink;
    use std::thread;
    use std::time::{Duration, Instant};

    fn player(config: PlayerConfig, sink: CaptureVideoSink) -> MediaPlayer {
        let _ = env_logger::builder().is_test(true).try_init();
        MediaPlayer::builder()
            .config(config)
            .video_sink(sink)
            .build()
            .unwrap()
    }

    fn external_config() -> PlayerConfig {
        PlayerConfig {
            sync_type: SyncType::External,
            ..PlayerConfig::default()
        }
    }

    fn collect_messages(player: &MediaPlayer) -> Arc<Mutex<Vec<PlayerMessage>>> {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        player.set_message_callback(move |msg| sink.lock().unwrap().push(*msg));
        messages
    }

    /// 驱动渲染直到条件满足或超时
    fn pump_until(player: &MediaPlayer, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut buf = vec![0u8; 4096];
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            player.read_audio(&mut buf);
            let remaining = player.refresh_video();
            thread::sleep(Duration::from_secs_f64(remaining.clamp(0.001, 0.01)));
        }
        false
    }

    #[test]
    fn test_完整播放到结束() {
        let sink = CaptureVideoSink::new();
        let frames = sink.frames();
        let player = player(external_config(), sink);
        let messages = collect_messages(&player);

        player.open("testsrc:duration=1").unwrap();
        assert!((player.duration() - 1.0).abs() < 1e-9);
        assert!(pump_until(&player, || player.state() == PlayerState::End));
        assert!(player.is_paused());

        let painted = frames.lock().unwrap();
        assert!(painted.len() >= 5, "显示帧数 {}", painted.len());
        assert!(painted.windows(2).all(|w| w[0].pts < w[1].pts));
        drop(painted);
        assert!((player.video_aspect_ratio() - 64.0 / 48.0).abs() < 1e-9);

        assert!(pump_until(&player, || {
            messages
                .lock()
                .unwrap()
                .contains(&PlayerMessage::Completed { will_loop: false })
        }));
        let messages = messages.lock().unwrap();
        assert!(messages.contains(&PlayerMessage::MetadataLoaded));
        assert!(messages.contains(&PlayerMessage::VideoFrameLoaded { width: 64, height: 48 }));
        let completed = messages
            .iter()
            .filter(|m| matches!(m, PlayerMessage::Completed { .. }))
            .count();
        assert_eq!(completed, 1);
    }

    #[test]
    fn test_循环播放时重新从头开始() {
        let config = PlayerConfig {
            loop_count: 2,
            ..external_config()
        };
        let player = player(config, CaptureVideoSink::new());
        let messages = collect_messages(&player);
        player.open("testsrc:duration=0.3").unwrap();
        assert!(pump_until(&player, || player.state() == PlayerState::End));
        assert!(pump_until(&player, || {
            messages
                .lock()
                .unwrap()
                .iter()
                .filter(|m| matches!(m, PlayerMessage::Completed { .. }))
                .count()
                == 2
        }));
        let messages = messages.lock().unwrap();
        let completions: Vec<_> = messages
            .iter()
            .filter_map(|m| match m {
                PlayerMessage::Completed { will_loop } => Some(*will_loop),
                _ => None,
            })
            .collect();
        assert_eq!(completions, vec![true, false]);
    }

    #[test]
    fn test_打开失败时回到空闲状态() {
        let player = player(PlayerConfig::default(), CaptureVideoSink::new());
        assert!(player.open("/nonexistent/lychee.wav").is_err());
        assert_eq!(player.state(), PlayerState::Idle);
        assert!(!player.is_open());
        assert!(player.duration().is_nan());
    }

    #[test]
    fn test_没有音视频流时打开失败() {
        let player = player(PlayerConfig::default(), CaptureVideoSink::new());
        let err = player.open("testsrc:video=0,audio=0,subtitles=1").unwrap_err();
        assert!(matches!(err, LycheeError::Unsupported(_)));
        assert_eq!(player.state(), PlayerState::Idle);
    }

    #[test]
    fn test_重复打开被拒绝() {
        let player = player(PlayerConfig::default(), CaptureVideoSink::new());
        player.open("testsrc:duration=1").unwrap();
        assert!(player.open("testsrc:duration=1").is_err());
        player.close();
        assert_eq!(player.state(), PlayerState::Idle);
        player.open("testsrc:duration=1").unwrap();
    }

    #[test]
    fn test_元数据与章节() {
        let player = player(external_config(), CaptureVideoSink::new());
        player.open("testsrc:duration=10,chapters=4").unwrap();
        assert_eq!(player.metadata("TITLE").as_deref(), Some("Lychee 测试源"));
        assert_eq!(player.metadata("missing"), None);
        assert_eq!(player.chapter_count(), 4);
        assert!(!player.seek_to_chapter(4));

        assert!(player.seek_to_chapter(2));
        assert!(pump_until(&player, || player.current_chapter() == Some(2)));
        assert!(player.current_position() >= 5.0);
    }

    #[test]
    fn test_暂停与继续() {
        let player = player(external_config(), CaptureVideoSink::new());
        assert!(!player.toggle_pause());
        player.open("testsrc:duration=10").unwrap();
        assert!(player.toggle_pause());
        assert!(player.is_paused());
        assert!(!player.toggle_pause());
        assert!(!player.is_paused());
    }

    #[test]
    fn test_音量与速度() {
        let player = player(PlayerConfig::default(), CaptureVideoSink::new());
        player.set_volume(150);
        assert_eq!(player.volume(), 100);
        player.set_mute(true);
        assert!(player.is_muted());
        assert!(player.set_speed(0.0).is_err());
        player.set_speed(1.5).unwrap();
        assert_eq!(player.speed(), 1.5);

        player.open("testsrc:duration=10").unwrap();
        assert_eq!(player.with_ctx(|ctx| ctx.clocks.speed()), Some(1.5));
    }

    #[test]
    fn test_仅音频时宽高比为零() {
        let player = player(PlayerConfig::default(), CaptureVideoSink::new());
        player.open("testsrc:duration=1,video=0").unwrap();
        let mut buf = vec![0u8; 4096];
        assert!(player.read_audio(&mut buf));
        assert_eq!(player.video_aspect_ratio(), 0.0);
    }
}
