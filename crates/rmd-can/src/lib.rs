//! # RMD CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象与按仲裁 ID 的帧路由。
//!
//! - `CanAdapter` / `RxAdapter` / `TxAdapter`: 收发原语
//! - `CanRouter`: 一条物理总线上多个逻辑消费者的帧分发
//! - `SocketCanAdapter`: Linux SocketCAN 后端
//! - `MockCanAdapter`: 无硬件的模拟总线（`mock` feature）

use std::time::Duration;
use thiserror::Error;

// 重新导出 rmd-protocol 中的 RmdFrame
pub use rmd_protocol::RmdFrame;

pub mod router;

pub use router::{CanRouter, FrameListener, RouteId};

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::{SocketCanAdapter, SocketCanRxAdapter, SocketCanTxAdapter};

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockBusHandle, MockCanAdapter, MockRxAdapter, MockTxAdapter};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Frame not acknowledged")]
    Nack,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 是否为不可恢复错误（RX 线程遇到后退出）
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::Device(e) => e.is_fatal(),
            CanError::BufferOverflow | CanError::NotStarted => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    UnsupportedConfig,
    InvalidFrame,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NoDevice
                | CanDeviceErrorKind::AccessDenied
                | CanDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// CAN 适配器
///
/// 发送失败（NACK、仲裁丢失、Bus-Off）必须以错误返回，调用方不会重试。
pub trait CanAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError>;
    fn receive(&mut self) -> Result<RmdFrame, CanError>;
    fn set_receive_timeout(&mut self, _timeout: Duration) {}
    fn receive_timeout(&mut self, timeout: Duration) -> Result<RmdFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }
    fn try_receive(&mut self) -> Result<Option<RmdFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
    fn send_timeout(&mut self, frame: RmdFrame, _timeout: Duration) -> Result<(), CanError> {
        self.send(frame)
    }
}

/// 只读适配器（RX 线程独占）
pub trait RxAdapter {
    fn receive(&mut self) -> Result<RmdFrame, CanError>;
}

/// 只写适配器（命令路径共享）
pub trait TxAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError>;
}

impl<T: TxAdapter + ?Sized> TxAdapter for Box<T> {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError> {
        (**self).send(frame)
    }
}

/// 可分离为独立 RX / TX 半部的适配器
pub trait SplittableAdapter: CanAdapter {
    type RxAdapter: RxAdapter;
    type TxAdapter: TxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!CanError::Timeout.is_fatal());
        assert!(!CanError::BusOff.is_fatal());
        assert!(!CanError::Nack.is_fatal());
        assert!(CanError::BufferOverflow.is_fatal());
        assert!(
            CanError::Device(CanDeviceError::new(CanDeviceErrorKind::NoDevice, "unplugged"))
                .is_fatal()
        );
        assert!(!CanError::Device("transient".into()).is_fatal());
    }

    #[test]
    fn test_device_error_display() {
        let err = CanDeviceError::new(CanDeviceErrorKind::NotFound, "can9 missing");
        assert_eq!(err.to_string(), "NotFound: can9 missing");
    }
}
