//! 日志初始化：控制台（stderr）+ `logs/latest.log`，退出时压缩归档。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{Level, error, info};
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const LATEST_LOG: &str = "latest.log";
const ROTATE_BYTES: u64 = 8 * 1024 * 1024;
const KEEP_ARCHIVES: usize = 10;

/// 依赖库日志只保留告警，避免 HTTP/HTML 解析细节刷屏。
const QUIET_CRATES: &[&str] = &["reqwest", "hyper", "hyper_util", "rustls", "html5ever", "selectors"];

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    pub logs_dir: PathBuf,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            logs_dir: PathBuf::from("logs"),
        }
    }
}

fn targets(level: LevelFilter) -> Targets {
    QUIET_CRATES
        .iter()
        .fold(Targets::new().with_default(level), |t, name| {
            t.with_target(*name, Level::WARN)
        })
}

/// 日志句柄。drop 时刷新写线程并归档本次运行的日志。
pub struct LogSystem {
    shutdown: Arc<Shutdown>,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        let logs_dir = options.logs_dir;
        fs::create_dir_all(&logs_dir)?;
        let latest_log = logs_dir.join(LATEST_LOG);

        // 上次异常退出遗留的大日志先归档
        if fs::metadata(&latest_log).is_ok_and(|m| m.len() >= ROTATE_BYTES) {
            archive_run_log(&latest_log, &logs_dir)?;
        }

        let (file_writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("log-writer")
            .finish(rolling::never(&logs_dir, LATEST_LOG));

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        // 进度条与日志都在 stderr，stdout 只输出产物路径
        let console_layer = fmt::layer()
            .with_target(false)
            .with_ansi(options.use_color)
            .with_writer(io::stderr)
            .with_filter(targets(console_level));

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(targets(LevelFilter::DEBUG));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;

        let shutdown = Arc::new(Shutdown {
            logs_dir,
            latest_log,
            guard: Mutex::new(Some(guard)),
            done: AtomicBool::new(false),
            archive: options.archive_on_exit,
        });
        shutdown.install_panic_hook();

        Ok(Self { shutdown })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.shutdown.logs_dir
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.shutdown.run();
    }
}

struct Shutdown {
    logs_dir: PathBuf,
    latest_log: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    done: AtomicBool,
    archive: bool,
}

impl Shutdown {
    fn install_panic_hook(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            error!(target: "panic", "{info}");
            shutdown.run();
            previous(info);
        }));
    }

    fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        // 先 drop guard，确保写线程把缓冲刷进文件
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
        if !self.archive {
            return;
        }
        if let Err(err) = archive_run_log(&self.latest_log, &self.logs_dir) {
            eprintln!("日志归档失败: {err}");
        }
        if let Err(err) = prune_archives(&self.logs_dir, KEEP_ARCHIVES) {
            eprintln!("清理旧日志失败: {err}");
        }
    }
}

/// 把 `latest.log` 压缩为 `log_<时间戳>.zip` 并删除原文件；空日志直接删除。
fn archive_run_log(latest_log: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    let len = match fs::metadata(latest_log) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(None),
    };
    if len == 0 {
        let _ = fs::remove_file(latest_log);
        return Ok(None);
    }

    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let mut archive_path = logs_dir.join(format!("log_{stamp}.zip"));
    let mut n = 1;
    while archive_path.exists() {
        archive_path = logs_dir.join(format!("log_{stamp}_{n}.zip"));
        n += 1;
    }

    let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(format!("{stamp}.log"), options)?;
    io::copy(&mut File::open(latest_log)?, &mut zip)?;
    zip.finish()?;

    fs::remove_file(latest_log)?;
    Ok(Some(archive_path))
}

/// 只保留最近 `keep` 个归档（按文件名中的时间戳排序）。
fn prune_archives(logs_dir: &Path, keep: usize) -> Result<usize, LogError> {
    let mut archives: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("log_") && n.ends_with(".zip"))
        })
        .collect();
    if archives.len() <= keep {
        return Ok(0);
    }
    archives.sort();
    let excess = archives.len() - keep;
    for path in &archives[..excess] {
        fs::remove_file(path)?;
        info!(target: "logging", "已删除旧日志 {}", path.display());
    }
    Ok(excess)
}
