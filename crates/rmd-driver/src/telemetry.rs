//! 遥测缓存
//!
//! 每个设备保存一份最新的解码遥测。读取无锁（`ArcSwap` 快照），
//! 写入采用 read-copy-update，写入方互不阻塞读取方。
//!
//! 不同应答携带不同字段，缓存按字段合并：状态 2 不会清掉状态 1 写入的电压。
//! 同一设备按帧时间戳单调更新，早于缓存的帧被丢弃。

use crate::error::DriverError;
use crate::registry::LogicalId;
use arc_swap::ArcSwap;
use rmd_protocol::{ErrorState, Reply, ReplyBody};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 解码后的遥测（物理单位）
///
/// 字段为 `None` 表示尚未收到携带该字段的应答。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecodedTelemetry {
    /// 电机温度（°C）
    pub temperature_c: Option<f64>,
    /// 转矩电流（A）
    pub current_a: Option<f64>,
    /// 转速（dps）
    pub speed_dps: Option<f64>,
    /// 输出轴角度（°）
    pub shaft_angle_deg: Option<f64>,
    /// 多圈角度（°）
    pub multi_turn_angle_deg: Option<f64>,
    /// 母线电压（V）
    pub voltage_v: Option<f64>,
    /// A/B/C 相电流（A）
    pub phase_currents_a: Option<[f64; 3]>,
    pub error_state: Option<ErrorState>,
    pub brake_released: Option<bool>,
    /// 最近一次更新的帧时间戳（微秒）
    pub timestamp_us: u64,
    /// 累计合并的应答数
    pub frames_applied: u64,
}

impl DecodedTelemetry {
    /// 合并一帧应答，返回是否携带遥测
    pub fn apply(&mut self, reply: &Reply, timestamp_us: u64) -> bool {
        match reply.body {
            ReplyBody::Status1(status) => {
                self.temperature_c = Some(status.temperature_c());
                self.voltage_v = Some(status.voltage_v());
                self.brake_released = Some(status.brake_released);
                self.error_state = Some(status.error_state);
            },
            ReplyBody::Status2(status) => {
                self.temperature_c = Some(status.temperature_c());
                self.current_a = Some(status.current_a());
                self.speed_dps = Some(status.speed_dps());
                self.shaft_angle_deg = Some(status.shaft_angle_deg());
            },
            ReplyBody::Status3(status) => {
                self.temperature_c = Some(status.temperature_c());
                self.phase_currents_a = Some(status.phase_currents_a());
            },
            ReplyBody::MultiTurnAngle(angle) => {
                self.multi_turn_angle_deg = Some(angle.degrees());
            },
            ReplyBody::Ack => return false,
        }
        self.timestamp_us = timestamp_us;
        self.frames_applied += 1;
        true
    }

    /// 最近一次状态 1 是否报告故障
    pub fn has_fault(&self) -> bool {
        self.error_state.is_some_and(|state| state.has_fault())
    }
}

/// 读取结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySnapshot {
    pub telemetry: DecodedTelemetry,
    /// 距最近一次更新的时长
    pub staleness: Duration,
}

/// 更新结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// 帧时间戳早于缓存，已丢弃
    Stale,
    /// 应答不携带遥测（系统指令回显）
    NoTelemetry,
}

#[derive(Debug)]
struct Entry {
    telemetry: DecodedTelemetry,
    updated_at: Instant,
}

/// 遥测缓存
#[derive(Default)]
pub struct TelemetryCache {
    entries: ArcSwap<HashMap<LogicalId, Arc<Entry>>>,
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并应答到设备的缓存条目
    pub fn update(&self, device: LogicalId, reply: &Reply, timestamp_us: u64) -> UpdateOutcome {
        if !reply.has_telemetry() {
            return UpdateOutcome::NoTelemetry;
        }

        let mut outcome = UpdateOutcome::Applied;
        self.entries.rcu(|current| {
            let previous = current.get(&device);
            if let Some(entry) = previous
                && entry.telemetry.timestamp_us > timestamp_us
            {
                outcome = UpdateOutcome::Stale;
                return Arc::clone(current);
            }

            let mut telemetry = previous.map(|e| e.telemetry).unwrap_or_default();
            telemetry.apply(reply, timestamp_us);

            let mut next = HashMap::clone(current);
            next.insert(
                device,
                Arc::new(Entry {
                    telemetry,
                    updated_at: Instant::now(),
                }),
            );
            outcome = UpdateOutcome::Applied;
            Arc::new(next)
        });

        match outcome {
            UpdateOutcome::Stale => warn!(
                "Discarded stale telemetry for device {} (timestamp {} us)",
                device, timestamp_us
            ),
            _ => trace!("Telemetry updated for device {}", device),
        }
        outcome
    }

    /// 读取设备遥测（从不阻塞）
    ///
    /// # 错误
    /// - `DriverError::NoData`: 该设备尚无遥测
    pub fn read(&self, device: LogicalId) -> Result<TelemetrySnapshot, DriverError> {
        self.entries
            .load()
            .get(&device)
            .map(|entry| TelemetrySnapshot {
                telemetry: entry.telemetry,
                staleness: entry.updated_at.elapsed(),
            })
            .ok_or(DriverError::NoData(device))
    }

    /// 移除设备条目，返回是否存在
    pub fn remove(&self, device: LogicalId) -> bool {
        if !self.entries.load().contains_key(&device) {
            return false;
        }
        let mut removed = false;
        self.entries.rcu(|current| {
            let mut next = HashMap::clone(current);
            removed = next.remove(&device).is_some();
            next
        });
        removed
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    /// 有遥测的设备数量
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
