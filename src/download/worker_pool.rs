//! 有界并发的章节任务池。

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel as channel;
use tracing::debug;

/// 用 `min(workers, tasks.len())` 个线程执行 `job`，全部结束后返回。
///
/// 取消后已在执行的任务会跑完，尚未领取的任务直接丢弃。返回实际执行的任务数。
pub fn run_pool<T, F>(tasks: Vec<T>, workers: usize, cancel: &AtomicBool, job: F) -> usize
where
    T: Send,
    F: Fn(T) + Sync,
{
    if tasks.is_empty() {
        return 0;
    }
    let size = workers.max(1).min(tasks.len());
    let (tx, rx) = channel::unbounded::<T>();
    for task in tasks {
        // 接收端此时仍存活
        let _ = tx.send(task);
    }
    drop(tx);

    debug!(target: "download", workers = size, "启动下载线程");
    let job = &job;
    thread::scope(|s| {
        let handles: Vec<_> = (0..size)
            .map(|_| {
                let rx = rx.clone();
                s.spawn(move || {
                    let mut ran = 0usize;
                    while let Ok(task) = rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        job(task);
                        ran += 1;
                    }
                    ran
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .sum()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn every_task_runs_once() {
        let seen = Mutex::new(Vec::new());
        let ran = run_pool((0..100).collect(), 7, &AtomicBool::new(false), |n: i32| {
            seen.lock().unwrap().push(n);
        });
        assert_eq!(ran, 100);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 100);
        assert_eq!(seen.into_iter().collect::<HashSet<_>>().len(), 100);
    }

    #[test]
    fn pool_never_exceeds_worker_count() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_pool((0..40).collect(), 3, &AtomicBool::new(false), |_: i32| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn cancel_stops_dispatch() {
        let cancel = AtomicBool::new(false);
        let ran = run_pool((0..50).collect(), 1, &cancel, |n: i32| {
            if n == 4 {
                cancel.store(true, Ordering::Relaxed);
            }
        });
        assert_eq!(ran, 5);
    }

    #[test]
    fn empty_task_list_is_noop() {
        let ran = run_pool(Vec::<i32>::new(), 4, &AtomicBool::new(false), |_| {});
        assert_eq!(ran, 0);
    }
}
