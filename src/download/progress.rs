//! 进度上报与 CLI 进度条管理。

use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::models::ProgressSnapshot;

pub type ProgressCallback = Box<dyn FnMut(ProgressSnapshot) + Send>;

struct Inner {
    snapshot: ProgressSnapshot,
    cb: Option<ProgressCallback>, // optional UI callback
    bar: Option<ProgressBar>,
}

/// 多个下载线程共享的进度上报器。没有 UI 回调时在 stderr 绘制进度条。
pub(crate) struct ProgressReporter {
    inner: Mutex<Inner>,
}

impl ProgressReporter {
    pub(crate) fn new(total: usize, cb: Option<ProgressCallback>) -> Self {
        let bar = if cb.is_none() && total > 0 {
            let style = ProgressStyle::with_template(
                "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
            let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
            bar.set_style(style);
            bar.set_prefix("章节下载");
            Some(bar)
        } else {
            None
        };

        let reporter = Self {
            inner: Mutex::new(Inner {
                snapshot: ProgressSnapshot {
                    completed: 0,
                    total,
                },
                cb,
                bar,
            }),
        };
        reporter.emit_current();
        reporter
    }

    fn emit_current(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = inner.snapshot;
        if let Some(cb) = inner.cb.as_mut() {
            cb(snapshot);
        }
    }

    /// 上报新的完成数。完成数只增不减，乱序到达的旧值会被忽略。
    pub(crate) fn report(&self, completed: usize) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if completed <= inner.snapshot.completed {
            return;
        }
        inner.snapshot.completed = completed.min(inner.snapshot.total);
        let snapshot = inner.snapshot;
        if let Some(bar) = inner.bar.as_ref() {
            bar.set_position(snapshot.completed as u64);
        }
        if let Some(cb) = inner.cb.as_mut() {
            cb(snapshot);
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(bar) = inner.bar.take() {
            bar.finish_and_clear();
        }
    }
}
