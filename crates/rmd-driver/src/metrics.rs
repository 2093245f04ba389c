//! 总线会话指标
//!
//! 原子计数器，可在任意线程读取，不引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 总线会话实时指标
///
/// ```rust
/// use rmd_driver::BusMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = BusMetrics::default();
/// metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().rx_frames, 1);
/// ```
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// 接收的总帧数
    pub rx_frames: AtomicU64,
    /// 成功发送的帧数
    pub tx_frames: AtomicU64,
    /// 完成在途请求的应答数
    pub fulfilled: AtomicU64,
    /// 没有匹配在途请求的帧（被动遥测）
    pub unsolicited: AtomicU64,
    /// 仲裁 ID 不属于任何已注册设备的帧
    pub unrouted: AtomicU64,
    /// 无法解析的帧
    pub malformed: AtomicU64,
    /// 因时间戳早于缓存而丢弃的遥测
    pub stale_discards: AtomicU64,
    /// 应答超时次数（每个等待者计一次）
    pub timeouts: AtomicU64,
    /// 发送失败次数
    pub tx_errors: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            fulfilled: self.fulfilled.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.rx_frames,
            &self.tx_frames,
            &self.fulfilled,
            &self.unsolicited,
            &self.unrouted,
            &self.malformed,
            &self.stale_discards,
            &self.timeouts,
            &self.tx_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub fulfilled: u64,
    pub unsolicited: u64,
    pub unrouted: u64,
    pub malformed: u64,
    pub stale_discards: u64,
    pub timeouts: u64,
    pub tx_errors: u64,
}

impl MetricsSnapshot {
    /// 应答率（百分比）：完成的请求占发送帧的比例
    ///
    /// `tx_frames` 为 0 时返回 0.0。
    pub fn response_rate(&self) -> f64 {
        if self.tx_frames == 0 {
            return 0.0;
        }
        (self.fulfilled as f64 / self.tx_frames as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_metrics_default() {
        assert_eq!(BusMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_metrics_concurrent_increment() {
        let metrics = Arc::new(BusMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.rx_frames.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().rx_frames, 4000);
    }

    #[test]
    fn test_metrics_reset_and_rate() {
        let metrics = BusMetrics::new();
        metrics.tx_frames.fetch_add(4, Ordering::Relaxed);
        metrics.fulfilled.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().response_rate(), 75.0);

        metrics.reset();
        assert_eq!(metrics.snapshot().response_rate(), 0.0);
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
