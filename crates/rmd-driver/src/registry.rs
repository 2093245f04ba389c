//! 设备注册表
//!
//! 维护逻辑 ID 与 CAN 仲裁 ID 的一一映射。指令 ID 与应答 ID 都计入占用表，
//! 任何两个设备不会在总线上共享同一个 ID。
//!
//! 读多写少：`resolve` 在每次指令发送与每帧接收时调用，使用读锁；
//! 注册/注销串行化在写锁上。

use crate::config::{ProtocolVariant, validate_gear_ratio};
use crate::error::DriverError;
use parking_lot::RwLock;
use rmd_protocol::MAX_STANDARD_ID;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

/// 逻辑设备 ID（库分配的句柄，与总线地址无关）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogicalId(pub u8);

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for LogicalId {
    fn from(id: u8) -> Self {
        LogicalId(id)
    }
}

/// 设备在线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// 已注册，尚未收到任何帧
    Unconfirmed,
    /// 已在应答 ID 上收到过帧
    Known,
}

/// 注册表条目
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceEntry {
    pub logical_id: LogicalId,
    /// 指令仲裁 ID
    pub arbitration_id: u16,
    /// 应答仲裁 ID（由寻址方式推导）
    pub response_id: u16,
    /// 减速比（电机转子转数 / 输出轴转数）
    pub gear_ratio: f64,
    pub status: DeviceStatus,
}

#[derive(Default)]
struct RegistryInner {
    devices: HashMap<LogicalId, DeviceEntry>,
    /// 已占用的仲裁 ID（指令 ID 与应答 ID）→ 设备
    occupied: HashMap<u16, LogicalId>,
    /// 应答 ID → 设备
    by_response: HashMap<u16, LogicalId>,
}

/// 设备注册表
pub struct DeviceRegistry {
    protocol: ProtocolVariant,
    inner: RwLock<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new(protocol: ProtocolVariant) -> Self {
        Self {
            protocol,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    pub fn protocol(&self) -> ProtocolVariant {
        self.protocol
    }

    /// 注册设备（减速比 1）
    ///
    /// # 错误
    /// - `DriverError::InvalidInput`: 仲裁 ID（或推导出的应答 ID）超出 11-bit 范围
    /// - `DriverError::DuplicateIdentifier`: 逻辑 ID 已注册，或 ID 已被其他设备占用
    pub fn register(
        &self,
        logical_id: LogicalId,
        arbitration_id: u16,
    ) -> Result<DeviceEntry, DriverError> {
        self.register_geared(logical_id, arbitration_id, 1.0)
    }

    /// 注册带减速器的设备
    ///
    /// # 错误
    /// 同 [`register`](Self::register)，另外减速比不是正的有限值时返回 `DriverError::Config`。
    pub fn register_geared(
        &self,
        logical_id: LogicalId,
        arbitration_id: u16,
        gear_ratio: f64,
    ) -> Result<DeviceEntry, DriverError> {
        validate_gear_ratio(gear_ratio)?;
        let response_id = arbitration_id
            .checked_add(self.protocol.response_id_offset())
            .filter(|&id| arbitration_id <= MAX_STANDARD_ID && id <= MAX_STANDARD_ID)
            .ok_or_else(|| {
                DriverError::InvalidInput(format!(
                    "arbitration ID 0x{:X} out of standard 11-bit range for {:?}",
                    arbitration_id, self.protocol
                ))
            })?;

        let mut inner = self.inner.write();

        let collides = inner.devices.contains_key(&logical_id)
            || inner.occupied.contains_key(&arbitration_id)
            || inner.occupied.contains_key(&response_id);
        if collides {
            return Err(DriverError::DuplicateIdentifier {
                logical_id,
                arbitration_id,
            });
        }

        let entry = DeviceEntry {
            logical_id,
            arbitration_id,
            response_id,
            gear_ratio,
            status: DeviceStatus::Unconfirmed,
        };
        inner.devices.insert(logical_id, entry);
        inner.occupied.insert(arbitration_id, logical_id);
        inner.occupied.insert(response_id, logical_id);
        inner.by_response.insert(response_id, logical_id);

        info!(
            "Registered device {} at arbitration ID 0x{:03X} (response 0x{:03X})",
            logical_id, arbitration_id, response_id
        );
        Ok(entry)
    }

    /// 逻辑 ID → 指令仲裁 ID
    pub fn resolve(&self, logical_id: LogicalId) -> Result<u16, DriverError> {
        self.entry(logical_id).map(|e| e.arbitration_id)
    }

    pub fn entry(&self, logical_id: LogicalId) -> Result<DeviceEntry, DriverError> {
        self.inner
            .read()
            .devices
            .get(&logical_id)
            .copied()
            .ok_or(DriverError::UnknownDevice(logical_id))
    }

    /// 应答仲裁 ID → 逻辑 ID（接收路径使用）
    pub fn device_for_response(&self, response_id: u32) -> Option<LogicalId> {
        let id = u16::try_from(response_id).ok()?;
        self.inner.read().by_response.get(&id).copied()
    }

    /// 标记设备已在线，返回是否为首次确认
    pub fn mark_confirmed(&self, logical_id: LogicalId) -> bool {
        // 快路径：已确认时只取读锁
        if matches!(
            self.inner.read().devices.get(&logical_id),
            Some(DeviceEntry {
                status: DeviceStatus::Known,
                ..
            }) | None
        ) {
            return false;
        }

        let mut inner = self.inner.write();
        match inner.devices.get_mut(&logical_id) {
            Some(entry) if entry.status == DeviceStatus::Unconfirmed => {
                entry.status = DeviceStatus::Known;
                info!(
                    "Device {} confirmed on CAN ID 0x{:03X}",
                    logical_id, entry.response_id
                );
                true
            },
            _ => false,
        }
    }

    pub fn status(&self, logical_id: LogicalId) -> Result<DeviceStatus, DriverError> {
        self.entry(logical_id).map(|e| e.status)
    }

    /// 注销设备（幂等），返回被移除的条目
    pub fn unregister(&self, logical_id: LogicalId) -> Option<DeviceEntry> {
        let mut inner = self.inner.write();
        let entry = inner.devices.remove(&logical_id)?;
        inner.occupied.remove(&entry.arbitration_id);
        inner.occupied.remove(&entry.response_id);
        inner.by_response.remove(&entry.response_id);
        debug!("Unregistered device {}", logical_id);
        Some(entry)
    }

    /// 所有已注册设备（按逻辑 ID 排序）
    pub fn devices(&self) -> Vec<DeviceEntry> {
        let mut devices: Vec<_> = self.inner.read().devices.values().copied().collect();
        devices.sort_by_key(|e| e.logical_id);
        devices
    }

    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
