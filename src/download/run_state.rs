//! 一次下载中各 worker 共享的完成计数与失败列表。

use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    completed: usize,
    failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub completed: usize,
    /// 已按字典序排序
    pub failures: Vec<String>,
}

/// 完成计数与失败列表在同一把锁下更新，任一时刻 `completed >= failures.len()`。
#[derive(Debug, Default)]
pub struct RunState {
    inner: Mutex<Inner>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一章结束；`failed_id` 为补零后的章节号。返回新的完成数。
    pub fn record(&self, failed_id: Option<String>) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.completed += 1;
        if let Some(id) = failed_id {
            inner.failures.push(id);
        }
        inner.completed
    }

    pub fn completed(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .completed
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut failures = inner.failures.clone();
        failures.sort();
        RunSnapshot {
            completed: inner.completed,
            failures,
        }
    }
}
