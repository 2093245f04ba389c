//! 请求/应答关联器
//!
//! 设备应答不带序列号，只能按 (设备, 指令码) 匹配请求。关联器为每个二元组维护一个槽：
//!
//! ```text
//! Idle ──begin──▶ AwaitingResponse ──fulfill──────▶ Idle（等待者收到应答）
//!                       │          ──poll_timeouts─▶ Idle（等待者收到 TimedOut）
//!                       │          ──cancel────────▶ Idle（等待者收到 Cancelled）
//!                       └── begin ▶ DeviceBusy（同一槽最多一个在途请求）
//! ```
//!
//! 槽表只在登记、完成、超时检查时短暂加锁，等待者阻塞在各自的通道上，
//! 接收路径的 `fulfill` 永远不会被挂起的调用方阻塞。

use crate::config::MAX_TIMEOUT_MS;
use crate::error::DriverError;
use crate::metrics::BusMetrics;
use crate::registry::LogicalId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::Mutex;
use rmd_protocol::{Opcode, Reply};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// 槽键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub device: LogicalId,
    pub opcode: Opcode,
}

impl SlotKey {
    pub fn new(device: LogicalId, opcode: Opcode) -> Self {
        Self { device, opcode }
    }
}

/// 槽状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    AwaitingResponse {
        issued_at: Instant,
        /// 等待者数量（只有停止指令可能大于 1）
        waiters: usize,
    },
}

/// 完成的请求
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fulfillment {
    pub reply: Reply,
    /// 应答帧时间戳（微秒）
    pub timestamp_us: u64,
}

/// 槽被非应答方式结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFailure {
    TimedOut,
    Cancelled,
    /// 设备已注销
    Purged,
}

type Outcome = Result<Fulfillment, SlotFailure>;

struct Slot {
    issued_at: Instant,
    waiters: SmallVec<[(u64, Sender<Outcome>); 1]>,
}

impl Slot {
    fn finish(self, outcome: Outcome) -> usize {
        let count = self.waiters.len();
        for (_, waiter) in self.waiters {
            // 容量为 1 且每个等待者只投递一次，不会阻塞
            let _ = waiter.try_send(outcome);
        }
        count
    }
}

/// 请求/应答关联器
pub struct Correlator {
    slots: Mutex<HashMap<SlotKey, Slot>>,
    timeout: Duration,
    next_ticket: AtomicU64,
    metrics: Arc<BusMetrics>,
}

impl Correlator {
    /// 超时超过 `MAX_TIMEOUT_MS` 时按上限处理，截止时间的计算不会溢出
    pub fn new(timeout: Duration, metrics: Arc<BusMetrics>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout: timeout.min(Duration::from_millis(MAX_TIMEOUT_MS)),
            next_ticket: AtomicU64::new(0),
            metrics,
        }
    }

    /// 应答超时
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn new_waiter(self: &Arc<Self>, key: SlotKey, now: Instant) -> (PendingRequest, (u64, Sender<Outcome>)) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        let pending = PendingRequest {
            correlator: Arc::clone(self),
            key,
            ticket,
            deadline: now + self.timeout,
            receiver: rx,
            finished: false,
        };
        (pending, (ticket, tx))
    }

    /// Idle → AwaitingResponse
    ///
    /// # 错误
    /// - `DriverError::DeviceBusy`: 该槽已有在途请求
    pub fn begin(self: &Arc<Self>, key: SlotKey) -> Result<PendingRequest, DriverError> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&key) {
            return Err(DriverError::DeviceBusy {
                device: key.device,
                opcode: key.opcode,
            });
        }

        let now = Instant::now();
        let (pending, waiter) = self.new_waiter(key, now);
        let mut waiters = SmallVec::new();
        waiters.push(waiter);
        slots.insert(
            key,
            Slot {
                issued_at: now,
                waiters,
            },
        );
        debug!("Request {:?} awaiting response from device {}", key.opcode, key.device);
        Ok(pending)
    }

    /// 不受单在途限制的登记（仅用于停止指令）
    ///
    /// 槽已在等待时加入同一槽并刷新发出时间，同一应答释放所有等待者。
    pub fn begin_override(self: &Arc<Self>, key: SlotKey) -> PendingRequest {
        let mut slots = self.slots.lock();
        let now = Instant::now();
        let (pending, waiter) = self.new_waiter(key, now);

        match slots.get_mut(&key) {
            Some(slot) => {
                slot.issued_at = now;
                slot.waiters.push(waiter);
                debug!(
                    "Override request {:?} joined in-flight slot for device {} ({} waiters)",
                    key.opcode,
                    key.device,
                    slot.waiters.len()
                );
            },
            None => {
                let mut waiters = SmallVec::new();
                waiters.push(waiter);
                slots.insert(
                    key,
                    Slot {
                        issued_at: now,
                        waiters,
                    },
                );
                debug!("Override request {:?} issued to device {}", key.opcode, key.device);
            },
        }
        pending
    }

    /// AwaitingResponse → Idle，把应答交给所有等待者
    ///
    /// 返回被唤醒的等待者数量；0 表示没有匹配的在途请求。
    pub fn fulfill(&self, key: SlotKey, reply: Reply, timestamp_us: u64) -> usize {
        let slot = self.slots.lock().remove(&key);
        match slot {
            Some(slot) => {
                let woken = slot.finish(Ok(Fulfillment {
                    reply,
                    timestamp_us,
                }));
                trace!("Fulfilled {:?} for device {} ({} waiters)", key.opcode, key.device, woken);
                woken
            },
            None => 0,
        }
    }

    fn take_waiter(&self, key: SlotKey, ticket: u64) -> Option<Sender<Outcome>> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&key)?;
        let index = slot.waiters.iter().position(|(t, _)| *t == ticket)?;
        let (_, sender) = slot.waiters.remove(index);
        if slot.waiters.is_empty() {
            slots.remove(&key);
        }
        Some(sender)
    }

    /// 移除单个等待者；槽内没有等待者时回到 Idle
    ///
    /// 返回该等待者是否仍在槽中。
    pub fn release(&self, key: SlotKey, ticket: u64) -> bool {
        self.take_waiter(key, ticket).is_some()
    }

    /// 只取消一个等待者，同槽的其他等待者不受影响
    ///
    /// 该等待者已不在槽中（已应答、已超时或已被清除）时返回 false。
    pub fn cancel_waiter(&self, key: SlotKey, ticket: u64) -> bool {
        match self.take_waiter(key, ticket) {
            Some(sender) => {
                let _ = sender.try_send(Err(SlotFailure::Cancelled));
                debug!("Cancelled one {:?} waiter for device {}", key.opcode, key.device);
                true
            },
            None => false,
        }
    }

    /// 超时检查：发出时间早于 `now - timeout` 的槽转为 Idle，等待者收到 TimedOut
    ///
    /// 返回超时的槽。
    pub fn poll_timeouts(&self, now: Instant) -> Vec<SlotKey> {
        let expired: Vec<(SlotKey, Slot)> = {
            let mut slots = self.slots.lock();
            let keys: Vec<SlotKey> = slots
                .iter()
                .filter(|(_, slot)| now.saturating_duration_since(slot.issued_at) >= self.timeout)
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| slots.remove(&key).map(|slot| (key, slot)))
                .collect()
        };

        expired
            .into_iter()
            .map(|(key, slot)| {
                let waiters = slot.finish(Err(SlotFailure::TimedOut));
                self.metrics.timeouts.fetch_add(waiters as u64, Ordering::Relaxed);
                warn!(
                    "Response timeout: device {}, {:?} after {:?}",
                    key.device, key.opcode, self.timeout
                );
                key
            })
            .collect()
    }

    /// 取消在途请求（槽直接回到 Idle）
    ///
    /// 已发出的帧无法撤回，设备可能仍会执行并应答，迟到的应答按被动遥测处理。
    pub fn cancel(&self, key: SlotKey) -> bool {
        let slot = self.slots.lock().remove(&key);
        match slot {
            Some(slot) => {
                slot.finish(Err(SlotFailure::Cancelled));
                debug!("Cancelled {:?} for device {}", key.opcode, key.device);
                true
            },
            None => false,
        }
    }

    /// 清除设备的全部在途请求，返回清除的槽数量
    pub fn purge_device(&self, device: LogicalId) -> usize {
        let purged: Vec<Slot> = {
            let mut slots = self.slots.lock();
            let keys: Vec<SlotKey> = slots.keys().filter(|k| k.device == device).copied().collect();
            keys.iter().filter_map(|k| slots.remove(k)).collect()
        };

        let count = purged.len();
        for slot in purged {
            slot.finish(Err(SlotFailure::Purged));
        }
        count
    }

    pub fn state(&self, key: SlotKey) -> SlotState {
        match self.slots.lock().get(&key) {
            Some(slot) => SlotState::AwaitingResponse {
                issued_at: slot.issued_at,
                waiters: slot.waiters.len(),
            },
            None => SlotState::Idle,
        }
    }

    /// 在途槽数量
    pub fn in_flight(&self) -> usize {
        self.slots.lock().len()
    }
}

/// 在途请求句柄
///
/// - 多线程模型：`wait()` 阻塞到应答或截止时间
/// - 协作式模型：`try_result()` 非阻塞轮询，配合 `Correlator::poll_timeouts`
///
/// 未完成就被丢弃时自动释放槽。
pub struct PendingRequest {
    correlator: Arc<Correlator>,
    key: SlotKey,
    ticket: u64,
    deadline: Instant,
    receiver: Receiver<Outcome>,
    finished: bool,
}

impl PendingRequest {
    pub fn key(&self) -> SlotKey {
        self.key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn resolve(&mut self, outcome: Outcome) -> Result<Fulfillment, DriverError> {
        self.finished = true;
        let SlotKey { device, opcode } = self.key;
        match outcome {
            Ok(fulfillment) => Ok(fulfillment),
            Err(SlotFailure::TimedOut) => Err(DriverError::ResponseTimeout {
                device,
                opcode,
                timeout: self.correlator.timeout,
            }),
            Err(SlotFailure::Cancelled) => Err(DriverError::Cancelled { device, opcode }),
            Err(SlotFailure::Purged) => Err(DriverError::UnknownDevice(device)),
        }
    }

    /// 截止时间已过：释放槽后再检查一次通道，与截止时间赛跑的应答不会丢失
    fn expire(&mut self) -> Result<Fulfillment, DriverError> {
        let still_waiting = self.correlator.release(self.key, self.ticket);
        match self.receiver.try_recv() {
            Ok(outcome) => self.resolve(outcome),
            Err(_) => {
                if still_waiting {
                    self.correlator.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Response timeout: device {}, {:?} after {:?}",
                        self.key.device, self.key.opcode, self.correlator.timeout
                    );
                }
                self.resolve(Err(SlotFailure::TimedOut))
            },
        }
    }

    /// 阻塞等待应答
    ///
    /// # 错误
    /// - `DriverError::ResponseTimeout`: 截止时间内没有应答（槽已回到 Idle，可重试）
    /// - `DriverError::Cancelled`: 请求被取消
    /// - `DriverError::UnknownDevice`: 等待期间设备被注销
    pub fn wait(mut self) -> Result<Fulfillment, DriverError> {
        match self.receiver.recv_deadline(self.deadline) {
            Ok(outcome) => self.resolve(outcome),
            Err(RecvTimeoutError::Timeout) => self.expire(),
            Err(RecvTimeoutError::Disconnected) => self.resolve(Err(SlotFailure::Cancelled)),
        }
    }

    /// 非阻塞查询结果，尚无结果时返回 `None`
    pub fn try_result(&mut self) -> Option<Result<Fulfillment, DriverError>> {
        if self.finished {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(outcome) => Some(self.resolve(outcome)),
            Err(TryRecvError::Empty) if Instant::now() >= self.deadline => Some(self.expire()),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.resolve(Err(SlotFailure::Cancelled))),
        }
    }

    /// 取消本请求
    ///
    /// 只移除本句柄自己的等待者；同槽的其他等待者（合并的停止指令）或槽被复用后
    /// 的新请求不受影响。本请求已有结果时返回 false。
    pub fn cancel(mut self) -> bool {
        self.finished = true;
        self.correlator.cancel_waiter(self.key, self.ticket)
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished {
            self.correlator.release(self.key, self.ticket);
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("key", &self.key)
            .field("deadline", &self.deadline)
            .field("finished", &self.finished)
            .finish()
    }
}
