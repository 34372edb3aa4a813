//! # lychee-play
//!
//! Lychee 无界面播放器, 对标 FFmpeg 的 ffplay.
//!
//! 默认通过 cpal 输出声音, `--audio-device sim` 或没有声卡时
//! 改用模拟设备线程按实时节奏拉取数据. 终端打印状态变化.
//! 标准输入接受行命令:
//! - `p`: 暂停/继续
//! - `s <秒>`: 跳转
//! - `+` / `-`: 前进/后退 10 秒
//! - `c <n>`: 跳到第 n 章
//! - `v <0-100>`: 音量
//! - `m`: 静音切换
//! - `q`: 退出

mod audio;
mod device;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use lychee::logging::{self, LoggingConfig};
use lychee_player::{
    MediaPlayer, PlayerBuilder, PlayerConfig, PlayerMessage, PlayerState, SyncType,
};

use crate::audio::CpalAudioDevice;
use crate::device::{CountingVideoSink, SimulatedAudioDevice, VideoPainter};

/// 相对跳转步长 (秒)
const SEEK_STEP: f64 = 10.0;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyncArg {
    Audio,
    Video,
    Ext,
}

impl From<SyncArg> for SyncType {
    fn from(value: SyncArg) -> Self {
        match value {
            SyncArg::Audio => SyncType::Audio,
            SyncArg::Video => SyncType::Video,
            SyncArg::Ext => SyncType::External,
        }
    }
}

/// 音频输出设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AudioDeviceArg {
    /// 系统声卡
    Cpal,
    /// 模拟设备, 不发声
    Sim,
}

/// Lychee 无界面播放器 (对标 ffplay)
#[derive(Parser, Debug)]
#[command(name = "lychee-play", version, about = "Lychee 无界面播放器")]
struct Args {
    /// 输入文件路径或 testsrc: URL
    input: String,

    /// 日志详细程度 (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// JSON 配置文件, 命令行参数覆盖其中的同名项
    #[arg(long)]
    config: Option<PathBuf>,

    /// 禁用视频
    #[arg(long = "novideo")]
    no_video: bool,

    /// 禁用音频
    #[arg(long = "noaudio")]
    no_audio: bool,

    /// 禁用字幕
    #[arg(long = "nosub")]
    no_subtitle: bool,

    /// 音量 (0-100)
    #[arg(long)]
    volume: Option<u32>,

    /// 循环次数, 0 表示无限
    #[arg(long = "loop")]
    loop_count: Option<u32>,

    /// 主时钟
    #[arg(long, value_enum)]
    sync: Option<SyncArg>,

    /// 起始位置 (秒)
    #[arg(long = "ss")]
    start: Option<f64>,

    /// 播放时长 (秒)
    #[arg(short = 't', long = "duration")]
    duration: Option<f64>,

    /// 播放速度
    #[arg(long)]
    speed: Option<f64>,

    /// 丢帧策略
    #[arg(long)]
    framedrop: Option<bool>,

    /// 按字节跳转
    #[arg(long)]
    bytes: Option<bool>,

    /// 音频输出设备
    #[arg(long = "audio-device", value_enum, default_value = "cpal")]
    audio_device: AudioDeviceArg,
}

impl Args {
    fn player_config(&self) -> anyhow::Result<PlayerConfig> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load(path)
                .with_context(|| format!("加载配置失败: {}", path.display()))?,
            None => PlayerConfig::default(),
        };
        config.audio_disable |= self.no_audio;
        config.video_disable |= self.no_video;
        config.subtitle_disable |= self.no_subtitle;
        if let Some(volume) = self.volume {
            config.volume = volume.min(100);
        }
        if let Some(loop_count) = self.loop_count {
            config.loop_count = loop_count;
        }
        if let Some(sync) = self.sync {
            config.sync_type = sync.into();
        }
        if self.start.is_some() {
            config.start_time = self.start;
        }
        if self.duration.is_some() {
            config.duration = self.duration;
        }
        if let Some(speed) = self.speed {
            config.speed = speed;
        }
        if self.framedrop.is_some() {
            config.framedrop = self.framedrop;
        }
        if self.bytes.is_some() {
            config.seek_by_bytes = self.bytes;
        }
        config.validate()?;
        Ok(config)
    }
}

/// 按选择挂接音频设备, 声卡不可用时回退到模拟设备
fn attach_audio_device(builder: PlayerBuilder, device: AudioDeviceArg) -> PlayerBuilder {
    match device {
        AudioDeviceArg::Cpal => match CpalAudioDevice::detect() {
            Ok(device) => return builder.audio_sink(device),
            Err(e) => warn!("{}, 改用模拟音频设备", e),
        },
        AudioDeviceArg::Sim => info!("使用模拟音频设备"),
    }
    builder.audio_sink(SimulatedAudioDevice::new())
}

/// 终端命令
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    TogglePause,
    Seek(f64),
    SeekRelative(f64),
    Chapter(usize),
    Volume(u32),
    ToggleMute,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let cmd = parts.next()?;
        let arg = parts.next();
        match (cmd, arg) {
            ("p", None) => Some(Self::TogglePause),
            ("s", Some(v)) => v.parse().ok().map(Self::Seek),
            ("+", None) => Some(Self::SeekRelative(SEEK_STEP)),
            ("-", None) => Some(Self::SeekRelative(-SEEK_STEP)),
            ("c", Some(v)) => v.parse().ok().map(Self::Chapter),
            ("v", Some(v)) => v.parse().ok().map(Self::Volume),
            ("m", None) => Some(Self::ToggleMute),
            ("q", None) => Some(Self::Quit),
            _ => None,
        }
    }
}

enum Event {
    Command(Command),
    Message(PlayerMessage),
}

fn spawn_stdin_reader(tx: mpsc::Sender<Event>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("lychee-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(cmd) => {
                        if tx.send(Event::Command(cmd)).is_err() {
                            break;
                        }
                    }
                    None => println!("未知命令: {}", line.trim()),
                }
            }
        })?;
    Ok(())
}

/// 执行命令, 返回 false 表示退出
fn execute(player: &MediaPlayer, cmd: Command) -> bool {
    match cmd {
        Command::TogglePause => {
            let paused = player.toggle_pause();
            println!("{}", if paused { "已暂停" } else { "继续播放" });
        }
        Command::Seek(pos) => player.seek(pos),
        Command::SeekRelative(step) => player.seek_relative(step),
        Command::Chapter(index) => {
            if !player.seek_to_chapter(index) {
                println!("没有第 {} 章 (共 {} 章)", index, player.chapter_count());
            }
        }
        Command::Volume(volume) => player.set_volume(volume),
        Command::ToggleMute => player.set_mute(!player.is_muted()),
        Command::Quit => return false,
    }
    true
}

fn print_message(player: &MediaPlayer, msg: &PlayerMessage) {
    match msg {
        PlayerMessage::PlaybackStateChanged(state) => {
            println!("[{:8.3}] 状态: {}", player.current_position(), state);
        }
        PlayerMessage::VideoFrameLoaded { width, height } => {
            println!("视频: {}x{}", width, height);
        }
        PlayerMessage::Completed { will_loop } => {
            println!("播放完成{}", if *will_loop { ", 从头继续" } else { "" });
        }
        PlayerMessage::MetadataLoaded => {
            println!(
                "时长: {:.3}s, 章节: {}, 标题: {}",
                player.duration(),
                player.chapter_count(),
                player.metadata("title").unwrap_or_default()
            );
        }
        PlayerMessage::BufferingTimeUpdate(_) => {}
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = logging::init(LoggingConfig::with_prefix("lychee-play"), args.verbose)?;
    let config = args.player_config()?;

    info!("lychee-play: 打开 {}", args.input);

    let painted = Arc::new(AtomicU64::new(0));
    let builder = MediaPlayer::builder()
        .config(config)
        .video_sink(CountingVideoSink::new(Arc::clone(&painted)));
    let player = Arc::new(attach_audio_device(builder, args.audio_device).build()?);

    let (tx, rx) = mpsc::channel();
    let msg_tx = tx.clone();
    player.set_message_callback(move |msg: &PlayerMessage| {
        let _ = msg_tx.send(Event::Message(*msg));
    });
    spawn_stdin_reader(tx)?;

    player
        .open(&args.input)
        .with_context(|| format!("打开 {} 失败", args.input))?;
    let mut painter = VideoPainter::spawn(Arc::clone(&player))?;

    while let Ok(event) = rx.recv() {
        match event {
            Event::Command(cmd) => {
                if !execute(&player, cmd) {
                    break;
                }
            }
            Event::Message(msg) => {
                print_message(&player, &msg);
                if msg == PlayerMessage::PlaybackStateChanged(PlayerState::End) {
                    break;
                }
            }
        }
    }

    painter.stop();
    let (early, late) = (player.frame_drops_early(), player.frame_drops_late());
    if player.state() == PlayerState::Idle {
        warn!("播放因错误中止");
    }
    player.close();
    info!(
        "显示 {} 帧, 丢弃 {} 帧 (解码后 {}, 显示前 {})",
        painted.load(Ordering::Relaxed),
        early + late,
        early,
        late
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lychee_player::CaptureVideoSink;
    use std::time::{Duration, Instant};

    #[test]
    fn test_解析命令() {
        assert_eq!(Command::parse("p"), Some(Command::TogglePause));
        assert_eq!(Command::parse("s 12.5"), Some(Command::Seek(12.5)));
        assert_eq!(Command::parse(" + "), Some(Command::SeekRelative(10.0)));
        assert_eq!(Command::parse("-"), Some(Command::SeekRelative(-10.0)));
        assert_eq!(Command::parse("c 2"), Some(Command::Chapter(2)));
        assert_eq!(Command::parse("v 40"), Some(Command::Volume(40)));
        assert_eq!(Command::parse("m"), Some(Command::ToggleMute));
        assert_eq!(Command::parse("q"), Some(Command::Quit));
        assert_eq!(Command::parse("s"), None);
        assert_eq!(Command::parse("c -1"), None);
        assert_eq!(Command::parse("x"), None);
    }

    #[test]
    fn test_命令行覆盖配置() {
        let args = Args::parse_from([
            "lychee-play",
            "testsrc:duration=3",
            "--noaudio",
            "--volume",
            "150",
            "--loop",
            "0",
            "--sync",
            "ext",
            "--ss",
            "1.5",
        ]);
        let config = args.player_config().unwrap();
        assert!(config.audio_disable);
        assert_eq!(config.volume, 100);
        assert_eq!(config.loop_count, 0);
        assert_eq!(config.sync_type, SyncType::External);
        assert_eq!(config.start_time, Some(1.5));
        assert_eq!(config.speed, 1.0);
    }

    #[test]
    fn test_音频设备选择() {
        let args = Args::parse_from(["lychee-play", "a.wav"]);
        assert_eq!(args.audio_device, AudioDeviceArg::Cpal);
        let args = Args::parse_from(["lychee-play", "a.wav", "--audio-device", "sim"]);
        assert_eq!(args.audio_device, AudioDeviceArg::Sim);
        assert!(Args::try_parse_from(["lychee-play", "a.wav", "--audio-device", "alsa"]).is_err());
    }

    #[test]
    fn test_模拟设备驱动无声卡播放() {
        let sink = CaptureVideoSink::new();
        let frames = sink.frames();
        let config = PlayerConfig {
            sync_type: SyncType::Audio,
            ..PlayerConfig::default()
        };
        let builder = MediaPlayer::builder().config(config).video_sink(sink);
        let player = Arc::new(attach_audio_device(builder, AudioDeviceArg::Sim).build().unwrap());
        player.open("testsrc:duration=10").unwrap();
        let mut painter = VideoPainter::spawn(Arc::clone(&player)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while player.current_position() < 0.5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        painter.stop();
        let position = player.current_position();
        player.close();
        assert!(position >= 0.5, "音频时钟未前进: {position}");
        assert!(!frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_非法速度被拒绝() {
        let args = Args::parse_from(["lychee-play", "a.wav", "--speed", "0"]);
        assert!(args.player_config().is_err());
    }
}
