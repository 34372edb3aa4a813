//! # lychee-ffi
//!
//! Lychee 播放引擎 C FFI 导出层.
//!
//! 把 [`MediaPlayer`] 导出为 C 兼容的函数接口,
//! 编译为 DLL (Windows) / SO (Linux) / dylib (macOS) 供 C/C++ 等语言调用.
//!
//! # 命名规范
//!
//! 所有导出函数以 `lychee_` 前缀命名, 播放器相关函数以 `lychee_player_` 为前缀.
//!
//! # 内存管理
//!
//! - `lychee_player_create()` 返回的句柄必须通过 `lychee_player_free()` 释放
//! - 调用方分配的缓冲区由调用方负责释放
//!
//! # 音视频输出
//!
//! 导出层不打开任何设备. 宿主通过 `lychee_player_read_audio()` 拉取音频,
//! 通过 `lychee_player_take_video_frame()` 取走最近显示的视频帧,
//! 并按 `lychee_player_refresh_video()` 的返回值安排下一次刷新.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use log::{error, warn};
use lychee_codec::Frame;
use lychee_player::{
    DecodedFrame, MediaPlayer, NullAudioSink, PlayerConfig, PlayerMessage, VideoSink,
};

/// 播放器句柄, 对 C 侧不透明
pub struct LycheePlayer {
    player: MediaPlayer,
    latest: Arc<Mutex<Option<LatestFrame>>>,
}

/// 消息回调: (player, what, arg1, arg2)
pub type LycheeMessageCallback =
    extern "C" fn(player: *mut LycheePlayer, what: c_int, arg1: i64, arg2: i64, opaque: *mut c_void);

/// 视频帧描述
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct LycheeVideoFrameInfo {
    pub width: u32,
    pub height: u32,
    /// 第一个平面每行的字节数
    pub stride: u32,
    /// 显示时间戳 (秒)
    pub pts: f64,
}

// ========================
// 最近帧
// ========================

struct LatestFrame {
    info: LycheeVideoFrameInfo,
    plane: Vec<u8>,
}

/// 只保留最近一次显示的帧
struct LatestFrameSink {
    latest: Arc<Mutex<Option<LatestFrame>>>,
}

impl VideoSink for LatestFrameSink {
    fn paint(&mut self, frame: &DecodedFrame, _subtitle: Option<&str>) {
        let Frame::Video(video) = &frame.frame else {
            return;
        };
        let stride = video.linesize.first().copied().unwrap_or(0);
        let plane = video.data.first().cloned().unwrap_or_default();
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(LatestFrame {
            info: LycheeVideoFrameInfo {
                width: video.width,
                height: video.height,
                stride: stride as u32,
                pts: frame.pts,
            },
            plane,
        });
    }
}

/// 把调用方传入的句柄转为引用
///
/// # Safety
///
/// `player` 为 null 或来自 `lychee_player_create()` 且尚未释放.
unsafe fn player_ref<'a>(player: *const LycheePlayer) -> Option<&'a LycheePlayer> {
    // 安全: 由调用方保证指针有效
    unsafe { player.as_ref() }
}

/// 读取调用方传入的 UTF-8 字符串
///
/// # Safety
///
/// `s` 为 null 或指向以 `\0` 结尾的字符串.
unsafe fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    // 安全: 由调用方保证以 \0 结尾
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

struct CallbackTarget {
    player: *mut LycheePlayer,
    opaque: *mut c_void,
}

// 安全: 回调只在分发线程中使用这两个指针, 句柄释放前分发线程已停止
unsafe impl Send for CallbackTarget {}

// ========================
// 版本
// ========================

/// 获取 Lychee 版本号字符串
///
/// # Safety
///
/// 返回的指针在程序生命周期内有效, 无需释放.
#[unsafe(no_mangle)]
pub extern "C" fn lychee_version() -> *const c_char {
    c"0.1.0".as_ptr()
}

/// 获取版本号的数字表示: (主版本 << 16) | (次版本 << 8) | 修订版本
#[unsafe(no_mangle)]
pub extern "C" fn lychee_version_int() -> u32 {
    let (major, minor, patch): (u32, u32, u32) = (0, 1, 0);
    (major << 16) | (minor << 8) | patch
}

// ========================
// 生命周期
// ========================

/// 创建播放器
///
/// `config_json` 为 JSON 格式的播放器配置, 传 null 使用默认配置.
/// 失败时返回 null.
///
/// # Safety
///
/// `config_json` 为 null 或指向以 `\0` 结尾的 UTF-8 字符串.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_create(config_json: *const c_char) -> *mut LycheePlayer {
    let config = if config_json.is_null() {
        PlayerConfig::default()
    } else {
        // 安全: 由调用方保证
        let Some(json) = (unsafe { c_str(config_json) }) else {
            error!("配置不是合法的 UTF-8 字符串");
            return ptr::null_mut();
        };
        match serde_json::from_str::<PlayerConfig>(json) {
            Ok(config) => config,
            Err(e) => {
                error!("解析播放器配置失败: {}", e);
                return ptr::null_mut();
            }
        }
    };

    let latest = Arc::new(Mutex::new(None));
    let built = MediaPlayer::builder()
        .config(config)
        .audio_sink(NullAudioSink)
        .video_sink(LatestFrameSink {
            latest: Arc::clone(&latest),
        })
        .build();
    match built {
        Ok(player) => Box::into_raw(Box::new(LycheePlayer { player, latest })),
        Err(e) => {
            error!("创建播放器失败: {}", e);
            ptr::null_mut()
        }
    }
}

/// 关闭并释放播放器
///
/// # Safety
///
/// `player` 为 null 或来自 `lychee_player_create()`, 且只能释放一次.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_free(player: *mut LycheePlayer) {
    if !player.is_null() {
        // 安全: 指针来自 Box::into_raw
        drop(unsafe { Box::from_raw(player) });
    }
}

/// 打开媒体并开始播放, 成功返回 0
///
/// # Safety
///
/// `player` 有效, `url` 指向以 `\0` 结尾的 UTF-8 字符串.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_open(player: *mut LycheePlayer, url: *const c_char) -> c_int {
    let (Some(p), Some(url)) = (unsafe { player_ref(player) }, unsafe { c_str(url) }) else {
        return -1;
    };
    match p.player.open(url) {
        Ok(()) => 0,
        Err(e) => {
            warn!("{}: {}", url, e);
            -1
        }
    }
}

/// 关闭当前媒体, 播放器可再次打开
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_close(player: *mut LycheePlayer) {
    if let Some(p) = unsafe { player_ref(player) } {
        p.player.close();
        *p.latest.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// 当前状态: 0 空闲, 1 就绪, 2 缓冲, 3 结束
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_state(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| p.player.state() as c_int)
}

// ========================
// 播放控制
// ========================

/// 切换暂停, 返回切换后是否暂停
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_toggle_pause(player: *mut LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| c_int::from(p.player.toggle_pause()))
}

/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_is_paused(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| c_int::from(p.player.is_paused()))
}

/// 跳转到绝对位置 (秒)
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_seek(player: *mut LycheePlayer, position: f64) {
    if let Some(p) = unsafe { player_ref(player) } {
        p.player.seek(position);
    }
}

/// 跳转到第 `index` 个章节, 成功返回 0
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_seek_to_chapter(
    player: *mut LycheePlayer,
    index: c_int,
) -> c_int {
    let Some(p) = (unsafe { player_ref(player) }) else {
        return -1;
    };
    match usize::try_from(index) {
        Ok(index) if p.player.seek_to_chapter(index) => 0,
        _ => -1,
    }
}

// ========================
// 查询
// ========================

/// 当前播放位置 (秒), 未打开时为 0
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_current_position(player: *const LycheePlayer) -> f64 {
    unsafe { player_ref(player) }.map_or(0.0, |p| p.player.current_position())
}

/// 媒体总时长 (秒), 未打开时为 NaN
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_duration(player: *const LycheePlayer) -> f64 {
    unsafe { player_ref(player) }.map_or(f64::NAN, |p| p.player.duration())
}

/// 已缓冲位置 (毫秒), 未知时为 -1
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_buffered_position(player: *const LycheePlayer) -> i64 {
    unsafe { player_ref(player) }.map_or(-1, |p| p.player.buffered_position())
}

/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_chapter_count(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| p.player.chapter_count() as c_int)
}

/// 当前所在章节, 没有章节时返回 -1
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_current_chapter(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }
        .and_then(|p| p.player.current_chapter())
        .map_or(-1, |index| index as c_int)
}

/// 查询元数据, 键不区分大小写
///
/// 值以 `\0` 结尾写入 `buf`, 超出部分截断. 返回值的完整字节长度,
/// 键不存在时返回 -1. `buf` 为 null 时只返回长度.
///
/// # Safety
///
/// `player` 有效, `key` 指向以 `\0` 结尾的字符串, `buf` 至少可写 `buf_size` 字节.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_metadata(
    player: *const LycheePlayer,
    key: *const c_char,
    buf: *mut c_char,
    buf_size: usize,
) -> c_int {
    let (Some(p), Some(key)) = (unsafe { player_ref(player) }, unsafe { c_str(key) }) else {
        return -1;
    };
    let Some(value) = p.player.metadata(key) else {
        return -1;
    };
    let bytes = value.as_bytes();
    if !buf.is_null() && buf_size > 0 {
        let n = bytes.len().min(buf_size - 1);
        // 安全: 由调用方保证 buf 至少 buf_size 字节
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n);
            *buf.add(n) = 0;
        }
    }
    bytes.len() as c_int
}

/// 视频显示宽高比, 尚未显示任何帧时为 0
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_video_aspect_ratio(player: *const LycheePlayer) -> f64 {
    unsafe { player_ref(player) }.map_or(0.0, |p| p.player.video_aspect_ratio())
}

// ========================
// 音量
// ========================

/// 设置音量 (0..=100)
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_set_volume(player: *mut LycheePlayer, volume: c_int) {
    if let Some(p) = unsafe { player_ref(player) } {
        p.player.set_volume(volume.max(0) as u32);
    }
}

/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_get_volume(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| p.player.volume() as c_int)
}

/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_set_mute(player: *mut LycheePlayer, mute: c_int) {
    if let Some(p) = unsafe { player_ref(player) } {
        p.player.set_mute(mute != 0);
    }
}

/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_is_mute(player: *const LycheePlayer) -> c_int {
    unsafe { player_ref(player) }.map_or(0, |p| c_int::from(p.player.is_muted()))
}

// ========================
// 消息
// ========================

/// 注册消息回调, 传 null 取消
///
/// 回调在播放器的消息线程中执行, 不得在回调内释放播放器.
///
/// # Safety
///
/// `player` 有效, `opaque` 在回调生命周期内有效.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_set_message_callback(
    player: *mut LycheePlayer,
    callback: Option<LycheeMessageCallback>,
    opaque: *mut c_void,
) {
    let Some(p) = (unsafe { player_ref(player) }) else {
        return;
    };
    let Some(callback) = callback else {
        p.player.set_message_callback(|_: &PlayerMessage| {});
        return;
    };
    let target = CallbackTarget { player, opaque };
    p.player.set_message_callback(move |msg: &PlayerMessage| {
        let _ = &target;
        callback(target.player, msg.what(), msg.arg1(), msg.arg2(), target.opaque);
    });
}

// ========================
// 宿主拉取
// ========================

/// 拉取 `size` 字节音频 (交错 S16), 没有音频流时返回 -1
///
/// # Safety
///
/// `player` 有效, `buf` 至少可写 `size` 字节.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_read_audio(
    player: *mut LycheePlayer,
    buf: *mut u8,
    size: usize,
) -> c_int {
    let Some(p) = (unsafe { player_ref(player) }) else {
        return -1;
    };
    if buf.is_null() {
        return -1;
    }
    // 安全: 由调用方保证 buf 至少 size 字节
    let buf = unsafe { std::slice::from_raw_parts_mut(buf, size) };
    if p.player.read_audio(buf) { 0 } else { -1 }
}

/// 刷新视频, 返回建议的下次调用间隔 (秒)
///
/// # Safety
///
/// `player` 为 null 或有效句柄.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_refresh_video(player: *mut LycheePlayer) -> f64 {
    unsafe { player_ref(player) }.map_or(0.01, |p| p.player.refresh_video())
}

/// 取走最近显示的视频帧的第一个平面
///
/// 返回值:
/// - `> 0`: 写入 `buf` 的字节数, 帧被取走
/// - `0`: 自上次取走后没有新帧
/// - `-1`: 参数无效
/// - `-2`: `buf` 太小, `info` 已填写, 帧保留
///
/// # Safety
///
/// `player` 有效, `info` 可写, `buf` 为 null 或至少可写 `buf_size` 字节.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lychee_player_take_video_frame(
    player: *mut LycheePlayer,
    buf: *mut u8,
    buf_size: usize,
    info: *mut LycheeVideoFrameInfo,
) -> i64 {
    let Some(p) = (unsafe { player_ref(player) }) else {
        return -1;
    };
    if info.is_null() {
        return -1;
    }
    let mut latest = p.latest.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(frame) = latest.as_ref() else {
        return 0;
    };
    // 安全: 由调用方保证 info 可写
    unsafe { info.write(frame.info) };
    if buf.is_null() || buf_size < frame.plane.len() {
        return -2;
    }
    // 安全: 已检查 buf 长度
    unsafe { ptr::copy_nonoverlapping(frame.plane.as_ptr(), buf, frame.plane.len()) };
    let written = frame.plane.len() as i64;
    *latest = None;
    written
}
