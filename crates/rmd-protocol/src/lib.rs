//! # RMD Protocol
//!
//! RMD 系列智能伺服执行器的 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `opcode`: 指令码（Opcode）定义
//! - `constants`: 定点数定标表与协议常量
//! - `control`: 控制指令编码/解码
//! - `feedback`: 应答帧解析
//!
//! ## 字节序
//!
//! 协议使用 Intel（LSB）低位在前（小端字节序）。
//! 每个 8 字节载荷的 Byte 0 为指令码，电机应答时原样回显。

pub mod constants;
pub mod control;
pub mod feedback;
pub mod opcode;

pub use constants::*;
pub use control::*;
pub use feedback::*;
pub use opcode::*;

use thiserror::Error;

/// RMD 载荷固定长度
pub const PAYLOAD_LEN: usize = 8;

/// CAN 2.0 标准帧的统一抽象
///
/// `RmdFrame` 是协议层和硬件层之间的中间抽象：
///
/// ```text
/// Protocol Layer (rmd-protocol)
///     ↓ Command::to_frame() 构建 / Reply::try_from() 解析
/// RmdFrame (此类型)
///     ↓ 转换逻辑在 CAN 层实现
/// CAN Layer (rmd-can)
///     ↓ SocketCAN / Mock 适配器
/// Hardware
/// ```
///
/// - **Copy**：零成本复制，RX 线程与路由器之间按值传递
/// - **固定 8 字节**：RMD 协议所有帧均为 8 字节，避免堆分配
/// - **仅标准帧**：RMD 使用 11-bit 标识符
///
/// ```rust
/// use rmd_protocol::RmdFrame;
///
/// let frame = RmdFrame::new(0x141, &[0x9C]);
/// assert_eq!(frame.id(), 0x141);
/// assert_eq!(frame.data(), &[0x9C, 0, 0, 0, 0, 0, 0, 0]);
/// assert_eq!(frame.len, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RmdFrame {
    /// 仲裁 ID（11-bit 标准帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl RmdFrame {
    /// 创建标准帧（数据超过 8 字节时截断）
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(PAYLOAD_LEN);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            timestamp_us: 0,
        }
    }

    /// 由完整 8 字节载荷创建帧
    pub fn from_payload(id: u32, payload: [u8; 8]) -> Self {
        Self {
            id,
            data: payload,
            len: PAYLOAD_LEN as u8,
            timestamp_us: 0,
        }
    }

    /// 附加时间戳（微秒）
    pub fn with_timestamp(mut self, timestamp_us: u64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..(self.len as usize).min(PAYLOAD_LEN)]
    }

    /// 获取仲裁 ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取完整数据（8字节固定数组）
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }
}

/// 编码错误：参数超出设备字段的数值范围
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("{field} value {value} is not a finite number")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} value {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("No scale table entry for {opcode:?}")]
    MissingScale { opcode: Opcode },
}

/// 解码错误：载荷长度错误或指令码未知
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid payload length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Unknown opcode: 0x{opcode:02X}")]
    UnknownOpcode { opcode: u8 },

    #[error("Opcode {opcode:?} is not a command of this kind")]
    UnexpectedOpcode { opcode: Opcode },
}

/// 字节序转换工具函数（小端）
pub fn bytes_to_i16_le(bytes: [u8; 2]) -> i16 {
    i16::from_le_bytes(bytes)
}

/// 小端字节序转 u16
pub fn bytes_to_u16_le(bytes: [u8; 2]) -> u16 {
    u16::from_le_bytes(bytes)
}

/// 小端字节序转 i32
pub fn bytes_to_i32_le(bytes: [u8; 4]) -> i32 {
    i32::from_le_bytes(bytes)
}

/// 校验载荷长度并取出定长数组
pub(crate) fn fixed_payload(payload: &[u8]) -> Result<[u8; 8], DecodeError> {
    <[u8; 8]>::try_from(payload).map_err(|_| DecodeError::InvalidLength {
        expected: PAYLOAD_LEN,
        actual: payload.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new_pads_and_truncates() {
        let frame = RmdFrame::new(0x141, &[1, 2, 3]);
        assert_eq!(frame.data, [1, 2, 3, 0, 0, 0, 0, 0]);
        assert_eq!(frame.data_slice(), &[1, 2, 3]);

        let frame = RmdFrame::new(0x141, &[0xAA; 12]);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data, [0xAA; 8]);
    }

    #[test]
    fn test_frame_with_timestamp() {
        let frame = RmdFrame::from_payload(0x142, [0x9C, 0, 0, 0, 0, 0, 0, 0]).with_timestamp(42);
        assert_eq!(frame.timestamp_us, 42);
        assert_eq!(frame.len, 8);
    }

    #[test]
    fn test_bytes_le_helpers() {
        assert_eq!(bytes_to_i16_le([0x22, 0x33]), 0x3322);
        assert_eq!(bytes_to_i16_le([0xFF, 0xFF]), -1);
        assert_eq!(bytes_to_u16_le([0x68, 0x01]), 360);
        assert_eq!(bytes_to_i32_le([0xa0, 0x86, 0x01, 0x00]), 100_000);
        assert_eq!(bytes_to_i32_le([0xd8, 0xdc, 0xff, 0xff]), -9_000);
    }

    #[test]
    fn test_fixed_payload_rejects_short() {
        let err = fixed_payload(&[0x9C, 0, 0]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLength {
                expected: 8,
                actual: 3
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_frame_serde_roundtrip() {
        let frame = RmdFrame::new(0x141, &[0xA2, 0, 0, 0, 1, 2, 3, 4]).with_timestamp(7);
        let json = serde_json::to_string(&frame).unwrap();
        let back: RmdFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(frame, back);
    }
}
