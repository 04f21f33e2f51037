//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`      — 数据模型（NovelInfo / FetchResult / ChapterRange / DownloadOutcome 等）
//! - `run_state`   — 并发线程共享的完成计数与失败列表
//! - `worker_pool` — 有界并发任务池
//! - `progress`    — 进度上报与 CLI 进度条
//! - `downloader`  — 下载主流程编排

pub mod downloader;
pub mod models;
pub mod progress;
pub mod run_state;
pub mod worker_pool;
