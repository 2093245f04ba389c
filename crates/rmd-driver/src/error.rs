//! 驱动层错误类型定义

use crate::registry::LogicalId;
use rmd_can::CanError;
use rmd_protocol::{DecodeError, EncodeError, Opcode};
use std::time::Duration;
use thiserror::Error;

/// 驱动层错误类型
///
/// 所有错误原样上报，驱动层不做自动重试。
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 传输层错误（NACK、Bus-Off、设备断开）
    #[error("CAN bus error: {0}")]
    Bus(#[from] CanError),

    /// 参数超出设备字段范围
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodeError),

    /// 应答载荷无法解析
    #[error("Decoding error: {0}")]
    Decoding(#[from] DecodeError),

    /// 逻辑 ID 或仲裁 ID 已被占用
    #[error("Duplicate identifier: logical ID {logical_id}, arbitration ID 0x{arbitration_id:03X}")]
    DuplicateIdentifier {
        logical_id: LogicalId,
        arbitration_id: u16,
    },

    /// 设备未注册
    #[error("Unknown device: {0}")]
    UnknownDevice(LogicalId),

    /// 同一 (设备, 指令码) 已有在途请求
    #[error("Device {device} busy: {opcode:?} request already awaiting response")]
    DeviceBusy { device: LogicalId, opcode: Opcode },

    /// 超时窗口内未收到应答
    #[error("Response timeout: device {device}, {opcode:?} after {timeout:?}")]
    ResponseTimeout {
        device: LogicalId,
        opcode: Opcode,
        timeout: Duration,
    },

    /// 遥测缓存中没有该设备的数据
    #[error("No telemetry data for device {0}")]
    NoData(LogicalId),

    /// 请求在应答前被取消
    #[error("Request cancelled: device {device}, {opcode:?}")]
    Cancelled { device: LogicalId, opcode: Opcode },

    /// 应答内容与请求不符
    #[error("Unexpected reply from device {device} for {opcode:?}")]
    UnexpectedReply { device: LogicalId, opcode: Opcode },

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),
}

impl DriverError {
    /// 是否为瞬时错误（调用方可选择重试）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DriverError::DeviceBusy { .. } | DriverError::ResponseTimeout { .. }
        )
    }
}
