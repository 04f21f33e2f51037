//! 晋江文学城小说下载器命令行入口。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing::{debug, info, warn};

use jjwxc_novel_downloader::base_system::config::load_or_create_with_base;
use jjwxc_novel_downloader::base_system::logging::{LogOptions, LogSystem};
use jjwxc_novel_downloader::{Config, OutputFormat, downloader_from_config};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "jjwxc-novel-downloader")]
#[command(about = "JJWXC Novel Downloader", version = VERSION)]
struct Cli {
    /// 小说 ID 或含 novelid= 的网址
    novel: String,

    /// 输出格式，覆盖配置文件
    #[arg(long, value_parser = ["txt", "epub2", "epub3"])]
    format: Option<String>,

    /// 起始章节（1 起，含）
    #[arg(long)]
    start: Option<usize>,

    /// 结束章节（含）
    #[arg(long)]
    end: Option<usize>,

    /// 下载线程数
    #[arg(long)]
    threads: Option<usize>,

    /// 数据目录路径（用于存放 config.yml 和 logs）
    #[arg(long)]
    data_dir: Option<String>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "当前版本: v{}", VERSION);
    debug!(target: "startup", "日志目录: {}", log.logs_dir().display());

    let mut config = load_or_create_with_base::<Config>(None, data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    apply_overrides(&mut config, &cli);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            warn!(target: "startup", "收到中断信号，正在停止下载（再按一次强制退出）");
        })?;
    }

    let downloader = downloader_from_config(&config, cancel)?;
    let outcome = downloader.download_novel(&cli.novel, None, None);

    if outcome.canceled {
        warn!(target: "startup", completed = outcome.completed, total = outcome.total, "下载已取消");
        return Ok(());
    }
    if !outcome.success {
        return Err(anyhow!(outcome.error.unwrap_or_else(|| "下载失败".to_string())));
    }
    if let Some(output) = &outcome.output {
        println!("{output}");
    }
    if outcome.is_partial() {
        warn!(
            target: "startup",
            failed = outcome.failed_chapters.len(),
            "部分章节未下载：{}",
            outcome.failed_chapters.join("|")
        );
    }
    Ok(())
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(format) = cli.format.as_deref() {
        config.format = match format {
            "epub2" => OutputFormat::PackageV2,
            "epub3" => OutputFormat::PackageV3,
            _ => OutputFormat::Text,
        };
    }
    if let Some(start) = cli.start {
        config.chapter_start = start;
    }
    if let Some(end) = cli.end {
        config.chapter_end = end;
    }
    if let Some(threads) = cli.threads {
        config.thread_num = threads;
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let logs_dir = base_dir
        .map(|d| d.join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"));
    let opts = LogOptions {
        debug,
        logs_dir,
        ..LogOptions::default()
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
