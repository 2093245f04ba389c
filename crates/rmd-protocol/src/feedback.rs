//! 应答帧结构体定义
//!
//! 电机对每条指令回复一帧，Byte 0 回显指令码。
//! 应答结构体保存原始定点数值，并提供转换为物理单位的方法。

use crate::constants::*;
use crate::{DecodeError, Opcode, RmdFrame, bytes_to_i16_le, bytes_to_i32_le, bytes_to_u16_le};
use crate::fixed_payload;
use bilge::prelude::*;

// ============================================================================
// 错误状态位域
// ============================================================================

/// 错误状态位域（状态 1 应答 Byte 6-7，小端）
///
/// | 位 | 掩码 | 含义 |
/// |---|---|---|
/// | 1 | 0x0002 | 电机堵转 |
/// | 2 | 0x0004 | 欠压 |
/// | 3 | 0x0008 | 过压 |
/// | 4 | 0x0010 | 过流 |
/// | 6 | 0x0040 | 功率过载 |
/// | 7 | 0x0080 | 标定参数写入错误 |
/// | 8 | 0x0100 | 超速 |
/// | 12 | 0x1000 | 电机过温 |
/// | 13 | 0x2000 | 编码器标定错误 |
#[bitsize(16)]
#[derive(FromBits, DebugBits, Clone, Copy, Default, PartialEq)]
pub struct ErrorState {
    bit0: bool,                             // Bit 0: 保留
    pub motor_stall: bool,                  // Bit 1: 堵转
    pub low_voltage: bool,                  // Bit 2: 欠压
    pub over_voltage: bool,                 // Bit 3: 过压
    pub over_current: bool,                 // Bit 4: 过流
    bit5: bool,                             // Bit 5: 保留
    pub power_overrun: bool,                // Bit 6: 功率过载
    pub calibration_write_error: bool,      // Bit 7: 标定参数写入错误
    pub speeding: bool,                     // Bit 8: 超速
    bits9_11: u3,                           // Bit 9-11: 保留
    pub over_temperature: bool,             // Bit 12: 过温
    pub encoder_calibration_error: bool,    // Bit 13: 编码器标定错误
    bits14_15: u2,                          // Bit 14-15: 保留
}

impl ErrorState {
    /// 所有已定义故障位的掩码
    pub const FAULT_MASK: u16 = 0x0002
        | 0x0004
        | 0x0008
        | 0x0010
        | 0x0040
        | 0x0080
        | 0x0100
        | 0x1000
        | 0x2000;

    /// 原始 16 位值
    pub fn raw(self) -> u16 {
        u16::from(self)
    }

    /// 是否存在任一已定义故障
    pub fn has_fault(self) -> bool {
        self.raw() & Self::FAULT_MASK != 0
    }
}

// ============================================================================
// 状态应答
// ============================================================================

/// 电机状态 1（0x9A / 0x9B 应答）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorStatus1 {
    pub temperature: i8,          // Byte 1: 温度，1 °C/LSB
    pub brake_released: bool,     // Byte 3: 刹车释放
    pub voltage_raw: u16,         // Byte 4-5: 母线电压，0.1 V/LSB
    pub error_state: ErrorState,  // Byte 6-7: 错误状态
}

impl MotorStatus1 {
    pub fn temperature_c(&self) -> f64 {
        self.temperature as f64 * TEMPERATURE_C_PER_LSB
    }

    pub fn voltage_v(&self) -> f64 {
        self.voltage_raw as f64 * VOLTAGE_V_PER_LSB
    }

    fn parse(data: &[u8; 8]) -> Self {
        Self {
            temperature: data[1] as i8,
            brake_released: data[3] != 0,
            voltage_raw: bytes_to_u16_le([data[4], data[5]]),
            error_state: ErrorState::from(bytes_to_u16_le([data[6], data[7]])),
        }
    }
}

/// 电机状态 2（0x9C 以及 0xA1 / 0xA2 / 0xA4 运动指令的应答）
///
/// # 示例
///
/// ```rust
/// use rmd_protocol::{Reply, ReplyBody};
///
/// let reply = Reply::decode(&[0x9C, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]).unwrap();
/// let ReplyBody::Status2(status) = reply.body else { unreachable!() };
/// assert_eq!(status.temperature, 0x11);
/// assert_eq!(status.current_raw, 0x3322);
/// assert_eq!(status.speed_raw, 0x5544);
/// assert_eq!(status.shaft_angle_raw, 0x7766);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorStatus2 {
    pub temperature: i8,      // Byte 1: 温度，1 °C/LSB
    pub current_raw: i16,     // Byte 2-3: 转矩电流，0.01 A/LSB
    pub speed_raw: i16,       // Byte 4-5: 速度，1 dps/LSB
    pub shaft_angle_raw: i16, // Byte 6-7: 输出轴角度，1 °/LSB
}

impl MotorStatus2 {
    pub fn temperature_c(&self) -> f64 {
        self.temperature as f64 * TEMPERATURE_C_PER_LSB
    }

    pub fn current_a(&self) -> f64 {
        self.current_raw as f64 * FEEDBACK_CURRENT_A_PER_LSB
    }

    pub fn speed_dps(&self) -> f64 {
        self.speed_raw as f64 * FEEDBACK_SPEED_DPS_PER_LSB
    }

    pub fn shaft_angle_deg(&self) -> f64 {
        self.shaft_angle_raw as f64 * FEEDBACK_SHAFT_ANGLE_DEG_PER_LSB
    }

    /// 按协议布局编码（用于模拟设备与测试）
    pub fn to_payload(&self, opcode: Opcode) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = opcode.as_byte();
        data[1] = self.temperature as u8;
        data[2..4].copy_from_slice(&self.current_raw.to_le_bytes());
        data[4..6].copy_from_slice(&self.speed_raw.to_le_bytes());
        data[6..8].copy_from_slice(&self.shaft_angle_raw.to_le_bytes());
        data
    }

    fn parse(data: &[u8; 8]) -> Self {
        Self {
            temperature: data[1] as i8,
            current_raw: bytes_to_i16_le([data[2], data[3]]),
            speed_raw: bytes_to_i16_le([data[4], data[5]]),
            shaft_angle_raw: bytes_to_i16_le([data[6], data[7]]),
        }
    }
}

/// 电机状态 3（0x9D 应答）：三相电流
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorStatus3 {
    pub temperature: i8,
    pub phase_current_raw: [i16; 3], // Byte 2-7: A/B/C 相电流，0.01 A/LSB
}

impl MotorStatus3 {
    pub fn temperature_c(&self) -> f64 {
        self.temperature as f64 * TEMPERATURE_C_PER_LSB
    }

    pub fn phase_currents_a(&self) -> [f64; 3] {
        self.phase_current_raw
            .map(|raw| raw as f64 * PHASE_CURRENT_A_PER_LSB)
    }

    fn parse(data: &[u8; 8]) -> Self {
        Self {
            temperature: data[1] as i8,
            phase_current_raw: [
                bytes_to_i16_le([data[2], data[3]]),
                bytes_to_i16_le([data[4], data[5]]),
                bytes_to_i16_le([data[6], data[7]]),
            ],
        }
    }
}

/// 多圈角度（0x92 应答，Byte 4-7）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MultiTurnAngle {
    pub angle_raw: i32, // 0.01 °/LSB
}

impl MultiTurnAngle {
    pub fn degrees(&self) -> f64 {
        self.angle_raw as f64 * MULTI_TURN_ANGLE_DEG_PER_LSB
    }
}

// ============================================================================
// 应答
// ============================================================================

/// 应答内容
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyBody {
    Status1(MotorStatus1),
    Status2(MotorStatus2),
    Status3(MotorStatus3),
    MultiTurnAngle(MultiTurnAngle),
    /// 系统指令的回显确认（无遥测数据）
    Ack,
}

/// 解码后的应答帧
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reply {
    /// 电机回显的指令码
    pub opcode: Opcode,
    pub body: ReplyBody,
}

impl Reply {
    /// 解码应答载荷
    ///
    /// # 错误
    /// - `DecodeError::InvalidLength`: 载荷长度不是 8
    /// - `DecodeError::UnknownOpcode`: Byte 0 不在指令表中
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let data = fixed_payload(payload)?;
        let opcode = Opcode::from_byte(data[0])?;

        let body = match opcode {
            Opcode::ReadStatus2
            | Opcode::TorqueControl
            | Opcode::SpeedControl
            | Opcode::PositionControl => ReplyBody::Status2(MotorStatus2::parse(&data)),
            Opcode::ReadStatus1 | Opcode::ClearErrorFlag => {
                ReplyBody::Status1(MotorStatus1::parse(&data))
            },
            Opcode::ReadStatus3 => ReplyBody::Status3(MotorStatus3::parse(&data)),
            Opcode::ReadMultiTurnAngle => ReplyBody::MultiTurnAngle(MultiTurnAngle {
                angle_raw: bytes_to_i32_le([data[4], data[5], data[6], data[7]]),
            }),
            Opcode::MotorOff | Opcode::MotorStop | Opcode::MotorRunning => ReplyBody::Ack,
        };

        Ok(Self { opcode, body })
    }

    /// 状态 2 内容（运动指令与 0x9C 的应答）
    pub fn status2(&self) -> Option<MotorStatus2> {
        match self.body {
            ReplyBody::Status2(status) => Some(status),
            _ => None,
        }
    }

    /// 是否携带遥测数据
    pub fn has_telemetry(&self) -> bool {
        !matches!(self.body, ReplyBody::Ack)
    }
}

impl TryFrom<RmdFrame> for Reply {
    type Error = DecodeError;

    fn try_from(frame: RmdFrame) -> Result<Self, Self::Error> {
        Reply::decode(frame.data_slice())
    }
}
