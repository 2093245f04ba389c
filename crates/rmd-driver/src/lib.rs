//! 驱动层模块
//!
//! 本模块提供 RMD 系列伺服电机的总线会话功能，包括：
//! - 设备注册表（逻辑 ID 与仲裁 ID 的双向映射）
//! - 请求/应答关联（每个 (设备, 操作码) 至多一个在途请求）
//! - 遥测缓存（ArcSwap 无锁读取）
//! - 执行器会话（类型化的指令接口）
//! - 适配器（电机、舵机与各类传感器）
//!
//! # 使用场景
//!
//! 一条 CAN 总线对应一个 [`RmdBus`]。多个总线会话可以在同一进程中共存，
//! 彼此不共享任何状态。

pub mod adaptors;
mod builder;
mod bus;
pub mod config;
pub mod correlator;
mod error;
pub mod metrics;
pub mod registry;
mod session;
pub mod telemetry;

pub use builder::RmdBusBuilder;
pub use bus::RmdBus;
pub use config::{BusConfig, DeviceConfig, ProtocolVariant};
pub use correlator::{Correlator, Fulfillment, PendingRequest, SlotFailure, SlotKey, SlotState};
pub use error::DriverError;
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use registry::{DeviceEntry, DeviceRegistry, DeviceStatus, LogicalId};
pub use session::{Actuator, DPS_PER_RPM};
pub use telemetry::{DecodedTelemetry, TelemetryCache, TelemetrySnapshot, UpdateOutcome};
