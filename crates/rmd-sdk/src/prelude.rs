//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use rmd_sdk::prelude::*;
//! ```

// 驱动层
pub use crate::driver::{
    Actuator, BusConfig, DeviceStatus, LogicalId, ProtocolVariant, RmdBus, RmdBusBuilder,
    TelemetrySnapshot,
};

// 协议层
pub use crate::protocol::{
    Command, MotorStatus1, MotorStatus2, MotorStatus3, Opcode, ReadRequest, Reply, SystemCommand,
};

// CAN 层（常用 Trait）
pub use crate::can::{CanAdapter, RmdFrame, SplittableAdapter};

// 错误类型
pub use crate::can::CanError;
pub use crate::driver::DriverError;
