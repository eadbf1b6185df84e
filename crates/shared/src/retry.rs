//! 重启退避
//!
//! 消费任务异常退出后按指数间隔重新拉起。单条消息不在进程内重试，
//! 失败消息的恢复交给 broker 重新投递。

use std::time::Duration;

use tokio::sync::watch;

/// 指数退避参数
///
/// 第 n 次重启前等待 `initial_delay * multiplier^n`，不超过 `max_delay`；
/// 连续重启 `max_retries` 次后放弃。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 连续重启次数上限，`u32::MAX` 表示不限
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 已连续失败 `restarts` 次后的等待间隔
    pub fn delay_for_attempt(&self, restarts: u32) -> Duration {
        let exponent = i32::try_from(restarts).unwrap_or(i32::MAX);
        let factor = self.multiplier.powi(exponent);
        // factor 溢出为 inf 时 mul_f64 会 panic，先与上限比较
        let ceiling = self.max_delay.as_secs_f64();
        if !factor.is_finite() || self.initial_delay.as_secs_f64() * factor >= ceiling {
            return self.max_delay;
        }
        self.initial_delay.mul_f64(factor)
    }

    pub fn should_retry(&self, restarts: u32) -> bool {
        restarts < self.max_retries
    }
}

/// 有状态的退避序列
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    restarts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            restarts: 0,
        }
    }

    /// 取出下一次等待间隔，次数耗尽返回 None
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.policy.should_retry(self.restarts).then(|| {
            let delay = self.policy.delay_for_attempt(self.restarts);
            self.restarts = self.restarts.saturating_add(1);
            delay
        })
    }

    pub fn attempts(&self) -> u32 {
        self.restarts
    }

    pub fn reset(&mut self) {
        self.restarts = 0;
    }
}

/// 睡眠 `delay`，关闭信号到达时提前醒来
///
/// 睡满返回 true；已关闭、收到关闭或发送端被 drop 时返回 false。
pub async fn sleep_unless_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, max_delay_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            max_delay: Duration::from_secs(max_delay_secs),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_delays_double_until_ceiling() {
        let policy = policy(10, 5);
        let delays: Vec<u64> = (0..5)
            .map(|n| policy.delay_for_attempt(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_huge_attempt_stays_at_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_gives_up_then_resets() {
        let mut backoff = Backoff::new(policy(2, 30));

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_unlimited_backoff_never_gives_up() {
        let mut backoff = Backoff::new(policy(u32::MAX, 30));
        for _ in 0..100 {
            assert!(backoff.next_delay().is_some());
        }
    }

    #[tokio::test]
    async fn test_sleep_runs_to_completion() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(sleep_unless_shutdown(Duration::from_millis(1), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_woken_by_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper =
            tokio::spawn(async move { sleep_unless_shutdown(Duration::from_secs(60), &mut rx).await });

        tx.send(true).unwrap();
        let slept = tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("关闭信号应中断等待")
            .unwrap();
        assert!(!slept);
    }

    #[tokio::test]
    async fn test_sleep_woken_by_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(!sleep_unless_shutdown(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test]
    async fn test_sleep_skipped_when_already_shut_down() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(!sleep_unless_shutdown(Duration::from_secs(60), &mut rx).await);
    }
}
