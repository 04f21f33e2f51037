//! 下载相关的数据模型定义。
//!
//! 包含小说元数据、单章抓取结果、章节范围、进度快照与最终下载结果。

use serde::Serialize;

use crate::base_system::json_extract::{JsonMap, string_or_empty};

/// 小说基本信息；除 `locked_chapters` / `chapter_count` 外在一次下载中不再变化。
#[derive(Debug, Clone, Default)]
pub struct NovelInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    pub author_id: String,
    pub cover_url: String,
    pub chapter_count: usize,
    pub locked_chapters: Vec<String>,
    pub raw: JsonMap,
    /// 网页版 `#novelintro` 的 HTML 片段
    pub web_intro: Option<String>,
}

impl NovelInfo {
    pub fn from_payload(id: &str, raw: JsonMap) -> Self {
        Self {
            id: id.to_string(),
            title: string_or_empty(&raw, "novelName"),
            author: string_or_empty(&raw, "authorName"),
            author_id: string_or_empty(&raw, "authorId"),
            cover_url: string_or_empty(&raw, "novelCover"),
            chapter_count: 0,
            locked_chapters: Vec::new(),
            raw,
            web_intro: None,
        }
    }

    /// 原始元数据中的字段，缺失时为空串。
    pub fn field(&self, key: &str) -> String {
        string_or_empty(&self.raw, key)
    }
}

/// 单章抓取结果。`content` 为空即视为失败，`message` 保存最后一次的接口提示。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResult {
    pub content: String,
    /// 作者有话说
    pub note: String,
    /// 作者有话说位于正文之后
    pub note_after_body: bool,
    pub message: String,
    pub size: String,
    pub date: String,
    pub attempts: u32,
}

impl FetchResult {
    pub fn is_failure(&self) -> bool {
        self.content.is_empty()
    }
}

/// 1 起始、闭区间；0 表示该侧不限。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChapterRange {
    pub start: usize,
    pub end: usize,
}

impl ChapterRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 换算成 `[start_idx, end_idx)`。
    pub fn bounds(&self, total: usize) -> (usize, usize) {
        let start_idx = if self.start > 0 { self.start - 1 } else { 0 };
        let end_idx = if self.end > 0 {
            self.end.min(total)
        } else {
            total
        };
        let start_idx = start_idx.min(end_idx);
        (start_idx, end_idx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
}

/// 一次下载的结果。`success` 为真但 `failed_chapters` 非空表示部分成功。
#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
    pub failed_chapters: Vec<String>,
    pub completed: usize,
    pub total: usize,
    pub canceled: bool,
}

impl DownloadOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn is_partial(&self) -> bool {
        self.success && !self.failed_chapters.is_empty()
    }
}
