//! 冷却/退避重试策略。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const CANCEL_POLL: Duration = Duration::from_millis(50);

/// 第 `attempt` 次重试前的等待：`min * 2^attempt`，封顶 `max`。
pub fn backoff_delay(min: Duration, max: Duration, attempt: u32) -> Duration {
    let max = max.max(min);
    let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
    min.saturating_mul(factor).min(max)
}

/// 分段睡眠并轮询取消标记；被取消时提前返回 `false`。
pub fn sleep_unless_canceled(delay: Duration, cancel: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
