//! 日志初始化模块.
//!
//! 双输出:
//! - console: 彩色, 带源码位置, 级别由 `-v` 次数决定
//! - file: 无色, 级别由 [`LoggingConfig::level`] 决定
//!
//! `LYCHEE_LOG` 环境变量 (EnvFilter 语法) 同时覆盖两路输出的级别.
//! 引擎各 crate 通过 `log` 门面输出, 经 tracing-log 汇入同一订阅器.
//!
//! 日志文件为 `{directory}/{prefix}.{YYYY-MM-DD}.log`, 后台维护线程
//! 负责午夜翻滚, 压缩历史文件与按保留天数清理.

use anyhow::{Context, Result};
use chrono::{Datelike, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod task;

/// 覆盖日志级别的环境变量
pub const LOG_ENV: &str = "LYCHEE_LOG";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 文件日志级别 (EnvFilter 语法)
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress_history: bool,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl LoggingConfig {
    /// `logs/{prefix}.*.log`, 文件级别 info
    pub fn with_prefix(file_prefix: &str) -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: file_prefix.to_string(),
            retention_days: default_retention_days(),
            compress_history: true,
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> i64 {
    30
}

fn default_cleanup_interval() -> u64 {
    3600
}

/// 控制台级别: 0=warn, 1=info, 2=debug, 3+=trace
fn console_filter(verbosity: u8) -> EnvFilter {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(level)
}

/// 日志系统句柄
///
/// 释放时停止维护线程, 并把缓冲中的日志写入文件.
pub struct LoggingGuard {
    maintenance: Option<task::MaintenanceHandle>,
    _worker: WorkerGuard,
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.stop();
        }
    }
}

/// 初始化日志系统
///
/// - `config`: 文件输出配置
/// - `verbosity`: 命令行 `-v` 次数, 决定控制台级别
///
/// 全局订阅器只能安装一次, 重复调用返回错误.
pub fn init(config: LoggingConfig, verbosity: u8) -> Result<LoggingGuard> {
    std::fs::create_dir_all(&config.directory)
        .with_context(|| format!("创建日志目录失败, path={}", config.directory))?;

    let rotate_requested = Arc::new(AtomicBool::new(false));
    let file_appender = CurrentFileWriter::new(
        Path::new(&config.directory),
        &config.file_prefix,
        Arc::clone(&rotate_requested),
    )?;

    let (non_blocking, worker) = tracing_appender::non_blocking(file_appender);

    let console_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| console_filter(verbosity));
    let file_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::Layer::default()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .event_format(LineFormatter::CONSOLE)
        .with_filter(console_filter);

    let file_layer = fmt::Layer::default()
        .with_writer(non_blocking)
        .with_ansi(false)
        .event_format(LineFormatter::FILE)
        .with_filter(file_filter);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装全局日志订阅器失败")?;

    let maintenance = task::spawn_log_maintenance_task(config, rotate_requested)?;

    Ok(LoggingGuard {
        maintenance: Some(maintenance),
        _worker: worker,
    })
}

struct CurrentFileWriter {
    directory: PathBuf,
    prefix: String,
    rotate_requested: Arc<AtomicBool>,
    file: File,
}

impl CurrentFileWriter {
    fn new(directory: &Path, prefix: &str, rotate_requested: Arc<AtomicBool>) -> Result<Self> {
        let today = Local::now().date_naive();
        let file_path = build_current_log_path(directory, prefix, today);
        let file = open_append_file(&file_path)?;
        Ok(Self {
            directory: directory.to_path_buf(),
            prefix: prefix.to_string(),
            rotate_requested,
            file,
        })
    }

    fn reopen_current_file(&mut self) -> std::io::Result<()> {
        let today = Local::now().date_naive();
        let file_path = build_current_log_path(&self.directory, &self.prefix, today);
        self.file = open_append_file(&file_path).map_err(std::io::Error::other)?;
        Ok(())
    }
}

impl Write for CurrentFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.rotate_requested.swap(false, Ordering::AcqRel) {
            self.reopen_current_file()?;
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn open_append_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("打开日志文件失败, path={}", path.display()))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 单行日志格式: `[MM-DD hh:mm:ss.mmm] LEVEL 位置 > 字段`
///
/// 控制台输出带颜色与源码位置, 文件输出两者都不带.
struct LineFormatter {
    console: bool,
}

impl LineFormatter {
    const CONSOLE: Self = Self { console: true };
    const FILE: Self = Self { console: false };

    fn level_color(level: tracing::Level) -> &'static str {
        match level {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = Local::now();
        let meta = event.metadata();
        write!(
            writer,
            "[{:02}-{:02} {:02}:{:02}:{:02}.{:03}] ",
            now.month(),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.timestamp_subsec_millis()
        )?;
        let level = meta.level().to_string();
        if self.console {
            write!(
                writer,
                "{}{:5}\x1b[0m {}:{} > ",
                Self::level_color(*meta.level()),
                level,
                meta.file().unwrap_or("unknown"),
                meta.line().unwrap_or(0)
            )?;
        } else {
            write!(writer, "{:5} > ", level)?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_current_log_path() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 6).unwrap();
        let path = build_current_log_path(Path::new("logs"), "lychee-play", date);
        assert_eq!(path, PathBuf::from("logs/lychee-play.2026-02-06.log"));
    }

    #[test]
    fn test_配置缺省字段取默认值() {
        let json = r#"{"level": "debug", "directory": "logs", "file_prefix": "lychee"}"#;
        let config: LoggingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(config.compress_history);
        assert_eq!(config.cleanup_interval_seconds, 3600);
    }
}
