use super::{LoggingConfig, build_current_log_path};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tracing::{error, warn};

/// 维护线程句柄
pub(super) struct MaintenanceHandle {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// 通知维护线程退出并等待
    pub(super) fn stop(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            warn!("日志维护线程异常退出");
        }
    }
}

/// 在独立线程上运行日志维护任务: 午夜翻滚, 周期清理
pub(super) fn spawn_log_maintenance_task(
    config: LoggingConfig,
    rotate_requested: Arc<AtomicBool>,
) -> Result<MaintenanceHandle> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("创建日志维护运行时失败")?;
    let (shutdown, shutdown_rx) = oneshot::channel();
    let thread = thread::Builder::new()
        .name("lychee-log".into())
        .spawn(move || runtime.block_on(maintenance_loop(config, rotate_requested, shutdown_rx)))
        .context("启动日志维护线程失败")?;
    Ok(MaintenanceHandle { shutdown, thread })
}

async fn maintenance_loop(
    config: LoggingConfig,
    rotate_requested: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut cleanup_interval =
        tokio::time::interval(Duration::from_secs(config.cleanup_interval_seconds.max(1)));

    if let Err(err) = ensure_current_log_file(&config) {
        error!("初始化当前日志文件失败: {}", err);
    }
    if let Err(err) = cleanup_logs(&config) {
        error!("启动时清理日志失败: {}", err);
    }

    let mut next_rollover_at = match compute_next_rollover(Local::now()) {
        Ok(at) => at,
        Err(err) => {
            error!("计算下一次翻滚时间失败: {}", err);
            tokio::time::Instant::now() + Duration::from_secs(1)
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = cleanup_interval.tick() => {
                if let Err(err) = cleanup_logs(&config) {
                    error!("清理日志失败: {}", err);
                }
            }
            _ = tokio::time::sleep_until(next_rollover_at) => {
                if let Err(err) = rotate_current_log(&config) {
                    error!("日志翻滚失败: {}", err);
                } else {
                    rotate_requested.store(true, Ordering::Release);
                }

                if let Err(err) = cleanup_logs(&config) {
                    error!("翻滚后清理日志失败: {}", err);
                }

                next_rollover_at = match compute_next_rollover(Local::now()) {
                    Ok(at) => at,
                    Err(err) => {
                        error!("重新计算下一次翻滚时间失败: {}", err);
                        tokio::time::Instant::now() + Duration::from_secs(1)
                    }
                };
            }
        }
    }
}

fn ensure_current_log_file(config: &LoggingConfig) -> Result<()> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;
    let today = Local::now().date_naive();
    let current_path = build_current_log_path(directory, &config.file_prefix, today);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&current_path)
        .with_context(|| format!("创建当前日志文件失败, path={}", current_path.display()))?;
    Ok(())
}

/// 创建新一天的日志文件, 写入端在下一次写入时切换过去
fn rotate_current_log(config: &LoggingConfig) -> Result<()> {
    ensure_current_log_file(config).context("创建当前日期日志文件失败")
}

/// 压缩昨天及更早的日志, 删除超过保留天数的日志
fn cleanup_logs(config: &LoggingConfig) -> Result<()> {
    cleanup_logs_at(config, Local::now().date_naive())
}

fn cleanup_logs_at(config: &LoggingConfig, today: NaiveDate) -> Result<()> {
    let directory = Path::new(&config.directory);
    if !directory.exists() {
        return Ok(());
    }

    let cutoff = today - ChronoDuration::days(config.retention_days);

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let file_path = entry.path();

        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix)
        else {
            continue;
        };

        if date < cutoff {
            let _ = fs::remove_file(&file_path);
            continue;
        }

        if config.compress_history && !compressed && date < today {
            if let Err(err) = compress_to_gz(&file_path) {
                warn!("压缩历史日志失败: {}", err);
            }
        }
    }

    Ok(())
}

fn compress_to_gz(path: &Path) -> Result<()> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(());
    }

    let mut input =
        File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path)
        .with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());

    let mut buf = [0u8; 8 * 1024];
    loop {
        let read = input.read(&mut buf)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read])?;
    }

    encoder.finish()?;
    fs::remove_file(path)
        .with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(())
}

fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let with_prefix = file_name.strip_prefix(prefix)?;
    let with_dot = with_prefix.strip_prefix('.')?;

    if let Some(date_part) = with_dot.strip_suffix(".log") {
        let date = parse_date(date_part)?;
        return Some((date, false));
    }

    if let Some(date_part) = with_dot.strip_suffix(".log.gz") {
        let date = parse_date(date_part)?;
        return Some((date, true));
    }

    None
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn compute_next_rollover(now: DateTime<Local>) -> Result<tokio::time::Instant> {
    let next_date = now.date_naive() + ChronoDuration::days(1);
    let next_midnight = next_date
        .and_hms_opt(0, 0, 0)
        .context("计算下一次日志翻滚时间失败")?;
    let next_local = Local
        .from_local_datetime(&next_midnight)
        .earliest()
        .context("转换本地时间失败")?;
    let system_time = SystemTime::from(next_local.with_timezone(&Utc));
    let duration = system_time
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Ok(tokio::time::Instant::now() + duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            directory: dir.path().to_string_lossy().to_string(),
            file_prefix: "lychee".to_string(),
            retention_days: 7,
            compress_history: true,
            cleanup_interval_seconds: 60,
        }
    }

    #[test]
    fn test_parse_rotated_log_name() {
        let prefix = "lychee";

        let parsed = parse_rotated_log_name("lychee.2026-02-06.log", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, false)));

        let parsed = parse_rotated_log_name("lychee.2026-02-06.log.gz", prefix);
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 6).map(|d| (d, true)));

        assert!(parse_rotated_log_name("lychee.log", prefix).is_none());
        assert!(parse_rotated_log_name("other.2026-02-06.log", prefix).is_none());
    }

    #[test]
    fn test_翻滚创建当天空日志文件() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);

        ensure_current_log_file(&config).unwrap();
        rotate_current_log(&config).unwrap();

        let today = Local::now().date_naive();
        let current_path =
            build_current_log_path(Path::new(&config.directory), &config.file_prefix, today);
        assert!(current_path.exists(), "当前日志文件不存在");
        assert_eq!(current_path.metadata().unwrap().len(), 0);
    }

    #[test]
    fn test_清理时压缩历史并删除过期日志() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        let dir = temp_dir.path();
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();

        let current = build_current_log_path(dir, "lychee", today);
        let yesterday = build_current_log_path(dir, "lychee", today - ChronoDuration::days(1));
        let expired = build_current_log_path(dir, "lychee", today - ChronoDuration::days(8));
        let unrelated = dir.join("notes.txt");
        for path in [&current, &yesterday, &expired, &unrelated] {
            fs::write(path, "日志内容").unwrap();
        }

        cleanup_logs_at(&config, today).unwrap();

        assert!(current.exists());
        assert!(!yesterday.exists());
        assert!(PathBuf::from(format!("{}.gz", yesterday.display())).exists());
        assert!(!expired.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_下一次翻滚在未来一天之内() {
        let at = compute_next_rollover(Local::now()).unwrap();
        let wait = at.saturating_duration_since(tokio::time::Instant::now());
        assert!(wait <= Duration::from_secs(25 * 3600));
    }
}
