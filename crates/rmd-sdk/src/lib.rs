//! RMD SDK - RMD 系列 CAN 智能伺服电机 Rust SDK
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 8 字节载荷的编码/解码，物理单位换算
//! - **CAN 层** (`can`): CAN 硬件抽象与帧路由，支持 SocketCAN 和 Mock
//! - **驱动层** (`driver`): 设备注册、请求/应答关联、遥测缓存、执行器会话
//!
//! # 快速开始
//!
//! ```no_run
//! use rmd_sdk::prelude::*;
//!
//! rmd_sdk::init_logging();
//!
//! let bus = RmdBusBuilder::new().interface("can0").device(1, 0x141).build()?;
//! let motor = bus.actuator(LogicalId(1))?;
//! let status = motor.set_velocity(90.0)?;
//! println!("speed: {} dps", status.speed_dps());
//! # Ok::<(), DriverError>(())
//! ```

pub use rmd_can as can;
pub use rmd_driver as driver;
pub use rmd_protocol as protocol;

mod logging;
pub mod prelude;

pub use logging::{init_logging, try_init_logging};

// CAN 层常用类型
pub use can::{CanAdapter, CanError, RmdFrame};

// 协议层
pub use protocol::{Command, Opcode, ReadRequest, Reply, SystemCommand};

// 驱动层
pub use driver::{Actuator, BusConfig, DriverError, LogicalId, RmdBus, RmdBusBuilder};
