//! 下载主流程编排。
//!
//! 小说信息 → 章节列表 → 范围截取 → 卷标/目录/封面/信息页 → 并发抓取正文 → 合并或打包。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use tracing::{error, info, warn};

use super::models::{ChapterRange, DownloadOutcome};
use super::progress::{ProgressCallback, ProgressReporter};
use super::run_state::RunState;
use super::worker_pool::run_pool;
use crate::base_system::context::DownloadConfig;
use crate::base_system::script_convert::ScriptConverter;
use crate::book_parser::book_manager::{
    ArtifactSink, BookManager, BookTarget, FinalizeRequest, IndexEntry, SinkError,
};
use crate::book_parser::chapter::{ChapterData, VolumeMark, parse_chapters};
use crate::book_parser::epub_generator::EpubPackageWriter;
use crate::book_parser::formatter::format_content;
use crate::book_parser::info_page::render_info_page;
use crate::network_parser::api::{ApiClient, ApiError};

pub type LogCallback = Box<dyn FnMut(&str) + Send>;

/// 根据落盘目标创建产物落盘器。
pub type SinkFactory =
    Box<dyn Fn(BookTarget, &DownloadConfig) -> Result<Box<dyn ArtifactSink>, SinkError> + Send + Sync>;

const CANCELED: &str = "下载已取消";

fn re_novel_id() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)novelid=(\d+)").unwrap())
}

/// 纯数字书号或含 `novelid=<n>` 的网址。
pub fn parse_novel_ref(novel_ref: &str) -> Option<String> {
    let s = novel_ref.trim();
    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return Some(s.to_string());
    }
    re_novel_id()
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn default_sink(
    target: BookTarget,
    cfg: &DownloadConfig,
) -> Result<Box<dyn ArtifactSink>, SinkError> {
    Ok(Box::new(BookManager::new(
        target,
        cfg,
        Arc::new(EpubPackageWriter),
    )?))
}

/// 同时写入 tracing 与调用方的日志回调。
struct RunLog {
    cb: Option<LogCallback>,
}

impl RunLog {
    fn line(&mut self, msg: &str) {
        info!(target: "download", "{}", msg);
        if let Some(cb) = self.cb.as_mut() {
            cb(msg);
        }
    }
}

pub struct NovelDownloader {
    cfg: DownloadConfig,
    api: ApiClient,
    conv: Arc<dyn ScriptConverter>,
    sink_factory: SinkFactory,
    cancel: Arc<AtomicBool>,
}

impl NovelDownloader {
    pub fn new(
        cfg: DownloadConfig,
        api: ApiClient,
        conv: Arc<dyn ScriptConverter>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            api,
            conv,
            sink_factory: Box::new(default_sink),
            cancel,
        }
    }

    pub fn with_sink_factory(mut self, factory: SinkFactory) -> Self {
        self.sink_factory = factory;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// 下载一本小说。任何错误都折叠进返回的 [`DownloadOutcome`]。
    pub fn download_novel(
        &self,
        novel_ref: &str,
        progress: Option<ProgressCallback>,
        log: Option<LogCallback>,
    ) -> DownloadOutcome {
        let mut log = RunLog { cb: log };
        match self.run(novel_ref, progress, &mut log) {
            Ok(outcome) => outcome,
            Err(err) => {
                let msg = format!("{err:#}");
                error!(target: "download", error = %msg, "下载失败");
                log.line(&format!("下载失败：{msg}"));
                DownloadOutcome::failed(msg)
            }
        }
    }

    fn run(
        &self,
        novel_ref: &str,
        progress: Option<ProgressCallback>,
        log: &mut RunLog,
    ) -> Result<DownloadOutcome> {
        let cfg = &self.cfg;
        let conv = self.conv.as_ref();
        let novel_id =
            parse_novel_ref(novel_ref).ok_or_else(|| anyhow!("无法识别的小说 ID：{novel_ref}"))?;
        let started = Instant::now();

        // ── 小说信息与章节列表 ──
        log.line("正在获取小说信息...");
        let (mut info, raw_chapters) = match self
            .api
            .fetch_novel_info(&novel_id, cfg.source_site_intro)
        {
            Ok(v) => v,
            Err(ApiError::Novel(message)) => bail!(message),
            Err(err) => return Err(anyhow!(err).context("获取小说信息失败")),
        };
        let book_title = conv.convert(&info.title);
        let book_author = conv.convert(&info.author);
        let source_url = self.api.web_page_url(&novel_id);
        log.line(&format!(
            "网址：{source_url}\n小说信息：{book_title}-{book_author}"
        ));

        let (mut data, locked) = parse_chapters(&raw_chapters, cfg, |cid| {
            self.api.chapter_content_url(&novel_id, cid)
        });
        let locked: Vec<String> = locked.iter().map(|id| conv.convert(id)).collect();
        info.chapter_count = data.len();
        info.locked_chapters = locked.clone();
        log.line(&format!("总章节数：{}", data.len()));
        if !locked.is_empty() {
            log.line(&format!("被锁章节：{}", locked.join(" ")));
        }

        // ── 范围 ──
        let range = ChapterRange::new(cfg.chapter_start, cfg.chapter_end);
        if range.start > 0 || range.end > 0 {
            let (start, end) = data.retain_range(range);
            log.line(&format!("选定范围：第{}章 ~ 第{}章", start + 1, end));
        }
        let total = data.len();
        log.line(&format!("待下载章节数：{total}"));

        // ── 暂存目录与附属页面 ──
        let sink = (self.sink_factory)(
            BookTarget {
                novel_id: novel_id.clone(),
                title: book_title.clone(),
                author: book_author.clone(),
                fill_width: data.fill_width(),
            },
            cfg,
        )
        .context("准备输出目录失败")?;

        let volumes: Vec<VolumeMark> = data
            .volumes_in_range()
            .into_iter()
            .map(|v| VolumeMark {
                label: conv.convert(&v.label),
                place: v.place,
            })
            .collect();
        sink.save_volumes(&volumes).context("保存卷标失败")?;

        data.build_index(&locked, conv);

        if cfg.fetch_cover && !cfg.format.is_text() {
            let saved = match self.api.download_cover(&info.cover_url) {
                Some(bytes) => match sink.save_cover(&bytes) {
                    Ok(()) => true,
                    Err(err) => {
                        warn!(target: "download", error = %err, "封面保存失败");
                        false
                    }
                },
                None => false,
            };
            if !saved {
                log.line("【封面下载失败或为默认封面】");
            }
        }

        let author_url = self.api.author_page_url(&info.author_id);
        let page = render_info_page(&info, &source_url, &author_url, cfg, conv);
        sink.save_info_page(&page).context("保存信息页失败")?;

        // ── 并发抓取 ──
        log.line("开始下载章节...");
        let state = RunState::new();
        let reporter = ProgressReporter::new(total, progress);
        run_pool(
            (0..total).collect(),
            cfg.worker_count,
            &self.cancel,
            |position| self.download_chapter(&data, position, sink.as_ref(), &state, &reporter),
        );
        reporter.finish();

        let snapshot = state.snapshot();
        log.line(&format!("下载完成，总进度：{}/{}", snapshot.completed, total));
        if !snapshot.failures.is_empty() {
            log.line(&format!(
                "未购买或加载失败章节：\n{}",
                snapshot.failures.join("|")
            ));
        }

        if self.cancel.load(Ordering::Relaxed) {
            log.line(CANCELED);
            return Ok(DownloadOutcome {
                success: false,
                output: None,
                error: Some(CANCELED.to_string()),
                failed_chapters: snapshot.failures,
                completed: snapshot.completed,
                total,
                canceled: true,
            });
        }

        // ── 合并 / 打包 ──
        let request = FinalizeRequest {
            chapters: index_entries(&data, conv),
            description: conv.convert(&info.field("novelIntroShort")),
        };
        let output = sink.finalize(&request).context("生成最终文件失败")?;
        log.line(&format!("输出：{}", output.display()));
        info!(
            target: "download",
            completed = snapshot.completed,
            failed = snapshot.failures.len(),
            elapsed = %format!("{:.1}s", started.elapsed().as_secs_f32()),
            "下载完成"
        );

        Ok(DownloadOutcome {
            success: true,
            output: Some(output.display().to_string()),
            error: None,
            failed_chapters: snapshot.failures,
            completed: snapshot.completed,
            total,
            canceled: false,
        })
    }

    /// 单章任务：标题 → 抓取解密 → 排版 → 落盘 → 计数。
    fn download_chapter(
        &self,
        data: &ChapterData,
        position: usize,
        sink: &dyn ArtifactSink,
        state: &RunState,
        reporter: &ProgressReporter,
    ) {
        let Some(chapter) = data.entry(position) else {
            return;
        };
        let title = data.build_title(position, &self.cfg, self.conv.as_ref());
        let result = self
            .api
            .fetch_chapter_content(chapter.href, &self.cfg.token, &self.cancel);
        let formatted = format_content(&title, &result, &self.cfg, self.conv.as_ref());
        let padded = data.padded_id(chapter.id);

        let mut failed = formatted.failed;
        if let Err(err) = sink.save_chapter(&padded, &title, &formatted.content) {
            warn!(target: "download", chapter = %chapter.id, error = %err, "章节保存失败");
            failed = true;
        }
        if failed {
            info!(target: "download", chapter = %chapter.id, message = %result.message, "章节下载失败");
        }

        let done = state.record(failed.then_some(padded));
        reporter.report(done);
    }
}

fn index_entries(data: &ChapterData, conv: &dyn ScriptConverter) -> Vec<IndexEntry> {
    data.entries()
        .zip(data.index())
        .map(|(ch, toc)| IndexEntry {
            id: ch.id.to_string(),
            padded_id: data.padded_id(ch.id),
            toc_title: toc.clone(),
            name: conv.convert(ch.title.trim()),
        })
        .collect()
}
