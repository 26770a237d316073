//! 调度周期与整分钟对齐。

use std::time::Duration;

/// 周期 ≥ 60 秒时，重新布置的间隔为 `60 * round(interval / 60) - 59` 秒，
/// 配合 [`alignment_delay`] 使每个周期落在整分钟边界附近。
pub fn rearm_period(interval_secs: u64) -> Duration {
    if interval_secs >= 60 {
        let minutes = (interval_secs as f64 / 60.0).round_ties_even() as u64;
        Duration::from_secs(60 * minutes - 59)
    } else {
        Duration::from_secs(interval_secs)
    }
}

/// 周期开始前等待到下一个整分钟；周期小于 60 秒时不等待。
pub fn alignment_delay(interval_secs: u64, now_epoch_secs: f64) -> Option<Duration> {
    if interval_secs < 60 {
        return None;
    }
    let into_minute = now_epoch_secs.rem_euclid(60.0);
    Some(Duration::from_secs_f64(60.0 - into_minute))
}
