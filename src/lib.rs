//! 晋江文学城小说下载器。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/重试退避/文本工具/繁简转换等基础设施
//! - `network_parser`：HTTP 传输、正文解密与晋江 App 接口客户端
//! - `book_parser`：章节列表解析、正文排版、信息页与 txt/epub 产物
//! - `download`：下载流程编排（范围截取、并发抓取、进度与失败汇总）

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};

pub mod base_system;
pub mod book_parser;
pub mod download;
pub mod network_parser;

pub use base_system::context::{Config, DownloadConfig, OutputFormat, ScriptMode};
pub use download::downloader::{LogCallback, NovelDownloader, parse_novel_ref};
pub use download::models::{DownloadOutcome, ProgressSnapshot};
pub use download::progress::ProgressCallback;

/// 由持久化配置构造下载器（生产传输层、DES 解密与 opencc 转换）。
pub fn downloader_from_config(config: &Config, cancel: Arc<AtomicBool>) -> Result<NovelDownloader> {
    let cfg = config.download_config().context("配置无效")?;
    let api = network_parser::api::ApiClient::new(config.api_settings())
        .context("初始化接口客户端失败")?;
    let conv = base_system::script_convert::converter_for(config.state, &config.opencc_path);
    Ok(NovelDownloader::new(cfg, api, conv, cancel))
}
