//! SocketCAN CAN 适配器实现
//!
//! Linux 平台下基于内核 SocketCAN 子系统的适配器。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**：SocketCAN 是 Linux 内核特性
//! - **接口配置**：波特率等配置由系统工具（`ip link`）完成，不在应用层设置
//! - **仅标准帧**：RMD 协议使用 11-bit 标识符，扩展帧与远程帧在接收时被丢弃
//! - **自动过滤错误帧**

use crate::{
    CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, RmdFrame, RxAdapter,
    SplittableAdapter, TxAdapter,
};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Frame, Socket, SocketOptions, StandardId};
use std::io;
use std::time::Duration;
use tracing::{error, trace, warn};

/// 默认读超时（与 `BusConfig::receive_timeout_ms` 默认值一致）
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

fn open_socket(interface: &str) -> Result<CanSocket, CanError> {
    CanSocket::open(interface).map_err(|e| {
        let kind = match e.kind() {
            io::ErrorKind::NotFound => CanDeviceErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => CanDeviceErrorKind::AccessDenied,
            _ => CanDeviceErrorKind::Backend,
        };
        CanError::Device(CanDeviceError::new(
            kind,
            format!("Failed to open CAN interface '{}': {}", interface, e),
        ))
    })
}

/// TX socket 必须关闭回环，否则 `drc` 寻址下自身指令会被当作应答
fn loopback_disabled(interface: &str, result: io::Result<()>) -> Result<(), CanError> {
    result.map_err(|e| {
        error!("Failed to disable loopback on '{}': {}", interface, e);
        CanError::Io(e)
    })
}

fn map_read_error(e: io::Error) -> CanError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => CanError::Timeout,
        io::ErrorKind::NetworkDown => CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NoDevice,
            format!("CAN interface went down: {}", e),
        )),
        _ => CanError::Io(e),
    }
}

/// 阻塞读取直到收到标准数据帧或超时
fn read_data_frame(socket: &CanSocket) -> Result<RmdFrame, CanError> {
    loop {
        let frame = socket.read_frame().map_err(map_read_error)?;
        match frame {
            CanFrame::Data(data_frame) if !data_frame.is_extended() => {
                let rmd_frame = RmdFrame::new(data_frame.raw_id(), data_frame.data());
                trace!(
                    "Received CAN frame: ID=0x{:X}, len={}",
                    rmd_frame.id, rmd_frame.len
                );
                return Ok(rmd_frame);
            },
            CanFrame::Error(error_frame) => {
                warn!("CAN error frame received: 0x{:X}", error_frame.raw_id());
            },
            other => {
                trace!("Skipping non-standard CAN frame: ID=0x{:X}", other.raw_id());
            },
        }
    }
}

fn write_standard_frame(socket: &CanSocket, frame: RmdFrame) -> Result<(), CanError> {
    let can_frame = u16::try_from(frame.id)
        .ok()
        .and_then(StandardId::new)
        .and_then(|id| CanFrame::new(id, frame.data_slice()))
        .ok_or_else(|| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InvalidFrame,
                format!("Failed to create standard frame with ID 0x{:X}", frame.id),
            ))
        })?;

    socket.write_frame(&can_frame).map_err(|e| match e.kind() {
        io::ErrorKind::NetworkDown => CanError::BusOff,
        _ => CanError::Io(e),
    })?;

    trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
    Ok(())
}

/// SocketCAN 适配器
///
/// 内部持有两个 socket：RX socket 读取总线，TX socket 关闭回环，
/// 自身发出的指令帧不会被 RX 路径当作设备应答。
///
/// ```no_run
/// use rmd_can::{CanAdapter, RmdFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(RmdFrame::new(0x141, &[0x9C])).unwrap();
/// let reply = adapter.receive().unwrap();
/// ```
pub struct SocketCanAdapter {
    rx: CanSocket,
    tx: CanSocket,
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 CAN 接口
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在、无权限或无法打开
    /// - `CanError::Io`: 设置 socket 选项失败（包括无法关闭 TX 回环）
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        let rx = open_socket(&interface)?;
        let tx = open_socket(&interface)?;

        loopback_disabled(&interface, tx.set_loopback(false))?;

        rx.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(CanError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);
        Ok(Self {
            rx,
            tx,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 设置读超时
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        self.rx.set_read_timeout(timeout).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError> {
        write_standard_frame(&self.tx, frame)
    }

    fn receive(&mut self) -> Result<RmdFrame, CanError> {
        read_data_frame(&self.rx)
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<RmdFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }
}

impl SplittableAdapter for SocketCanAdapter {
    type RxAdapter = SocketCanRxAdapter;
    type TxAdapter = SocketCanTxAdapter;

    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), CanError> {
        trace!(
            "SocketCanAdapter split into RX and TX adapters (interface: {})",
            self.interface
        );
        Ok((
            SocketCanRxAdapter {
                socket: self.rx,
                interface: self.interface.clone(),
            },
            SocketCanTxAdapter {
                socket: self.tx,
                interface: self.interface,
            },
        ))
    }
}

/// SocketCAN RX 半部
pub struct SocketCanRxAdapter {
    socket: CanSocket,
    interface: String,
}

impl SocketCanRxAdapter {
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl RxAdapter for SocketCanRxAdapter {
    fn receive(&mut self) -> Result<RmdFrame, CanError> {
        read_data_frame(&self.socket)
    }
}

/// SocketCAN TX 半部
pub struct SocketCanTxAdapter {
    socket: CanSocket,
    interface: String,
}

impl SocketCanTxAdapter {
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl TxAdapter for SocketCanTxAdapter {
    fn send(&mut self, frame: RmdFrame) -> Result<(), CanError> {
        write_standard_frame(&self.socket, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_interface() {
        let err = match SocketCanAdapter::new("rmd_missing0") {
            Err(e) => e,
            Ok(_) => return, // 环境中恰好存在同名接口
        };
        assert!(matches!(err, CanError::Device(_)));
    }

    #[test]
    fn test_loopback_failure_is_an_error() {
        assert!(loopback_disabled("can0", Ok(())).is_ok());
        assert!(matches!(
            loopback_disabled("can0", Err(io::Error::from(io::ErrorKind::PermissionDenied))),
            Err(CanError::Io(_))
        ));
    }

    #[test]
    fn test_read_error_mapping() {
        assert!(matches!(
            map_read_error(io::Error::from(io::ErrorKind::WouldBlock)),
            CanError::Timeout
        ));
        assert!(matches!(
            map_read_error(io::Error::from(io::ErrorKind::TimedOut)),
            CanError::Timeout
        ));
        assert!(map_read_error(io::Error::from(io::ErrorKind::NetworkDown)).is_fatal());
        assert!(matches!(
            map_read_error(io::Error::from(io::ErrorKind::Interrupted)),
            CanError::Io(_)
        ));
    }
}
