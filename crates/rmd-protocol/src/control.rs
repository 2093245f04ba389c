//! 控制指令定义
//!
//! 包含所有发往电机的指令，提供编码为 8 字节载荷、
//! 从载荷解码以及转换为 `RmdFrame` 的方法。

use crate::constants::*;
use crate::{DecodeError, EncodeError, Opcode, RmdFrame, bytes_to_i16_le, bytes_to_i32_le};
use crate::{bytes_to_u16_le, fixed_payload};

// ============================================================================
// 读取与系统指令
// ============================================================================

/// 状态读取请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReadRequest {
    /// 状态 1：温度、电压、刹车、错误标志 (0x9A)
    Status1,
    /// 状态 2：温度、转矩电流、速度、轴角度 (0x9C)
    Status2,
    /// 状态 3：三相电流 (0x9D)
    Status3,
    /// 多圈角度 (0x92)
    MultiTurnAngle,
}

impl ReadRequest {
    pub fn opcode(self) -> Opcode {
        match self {
            ReadRequest::Status1 => Opcode::ReadStatus1,
            ReadRequest::Status2 => Opcode::ReadStatus2,
            ReadRequest::Status3 => Opcode::ReadStatus3,
            ReadRequest::MultiTurnAngle => Opcode::ReadMultiTurnAngle,
        }
    }
}

/// 系统指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SystemCommand {
    /// 关闭电机 (0x80)
    Off,
    /// 停止电机 (0x81)
    Stop,
    /// 恢复运行 (0x88)
    Running,
    /// 清除错误标志 (0x9B)
    ClearErrorFlag,
}

impl SystemCommand {
    pub fn opcode(self) -> Opcode {
        match self {
            SystemCommand::Off => Opcode::MotorOff,
            SystemCommand::Stop => Opcode::MotorStop,
            SystemCommand::Running => Opcode::MotorRunning,
            SystemCommand::ClearErrorFlag => Opcode::ClearErrorFlag,
        }
    }
}

// ============================================================================
// 指令
// ============================================================================

/// 发往电机的指令
///
/// 物理量单位：
/// - 速度：度/秒（dps）
/// - 角度：度
/// - 电流：安培
///
/// # 示例
///
/// ```rust
/// use rmd_protocol::Command;
///
/// let payload = Command::Speed { dps: 1000.0 }.encode().unwrap();
/// // 1000 dps × 100 = 100000 (0x000186A0)，小端
/// assert_eq!(payload, [0xA2, 0x00, 0x00, 0x00, 0xA0, 0x86, 0x01, 0x00]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Command {
    /// 速度闭环 (0xA2)
    Speed { dps: f64 },
    /// 带限速的绝对位置闭环 (0xA4)
    Position { degrees: f64, max_speed_dps: f64 },
    /// 转矩电流闭环 (0xA1)
    TorqueCurrent { amps: f64 },
    /// 状态读取
    Read(ReadRequest),
    /// 系统指令
    System(SystemCommand),
}

impl Command {
    /// 指令对应的指令码
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Speed { .. } => Opcode::SpeedControl,
            Command::Position { .. } => Opcode::PositionControl,
            Command::TorqueCurrent { .. } => Opcode::TorqueControl,
            Command::Read(request) => request.opcode(),
            Command::System(command) => command.opcode(),
        }
    }

    /// 编码为 8 字节载荷
    ///
    /// 定标因子取自 `command_scale(opcode)`。
    ///
    /// # 错误
    /// - `EncodeError::NotFinite`: 参数为 NaN 或无穷大
    /// - `EncodeError::OutOfRange`: 定标后超出字段位宽（或限速为负）
    pub fn encode(&self) -> Result<[u8; 8], EncodeError> {
        let opcode = self.opcode();
        let mut data = [0u8; 8];
        data[0] = opcode.as_byte();

        let Some(scale) = command_scale(opcode) else {
            // 读取与系统指令不带参数
            return Ok(data);
        };

        match *self {
            Command::Speed { dps } => {
                let raw =
                    to_fixed("speed", dps, scale.primary, i32::MIN as i64, i32::MAX as i64)? as i32;
                data[4..8].copy_from_slice(&raw.to_le_bytes());
            },
            Command::Position {
                degrees,
                max_speed_dps,
            } => {
                let limit_scale = scale.secondary.ok_or(EncodeError::MissingScale { opcode })?;
                // 两个字段都先校验，失败时不产生任何输出
                let speed_limit =
                    to_fixed("max_speed", max_speed_dps, limit_scale, 0, u16::MAX as i64)? as u16;
                let angle = to_fixed(
                    "angle",
                    degrees,
                    scale.primary,
                    i32::MIN as i64,
                    i32::MAX as i64,
                )? as i32;
                data[2..4].copy_from_slice(&speed_limit.to_le_bytes());
                data[4..8].copy_from_slice(&angle.to_le_bytes());
            },
            Command::TorqueCurrent { amps } => {
                let raw = to_fixed(
                    "torque_current",
                    amps,
                    scale.primary,
                    i16::MIN as i64,
                    i16::MAX as i64,
                )? as i16;
                data[4..6].copy_from_slice(&raw.to_le_bytes());
            },
            Command::Read(_) | Command::System(_) => {},
        }

        Ok(data)
    }

    /// 从载荷解码指令（编码的逆过程，精度受定标限制）
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let data = fixed_payload(payload)?;
        let opcode = Opcode::from_byte(data[0])?;

        let command = match (opcode, command_scale(opcode)) {
            (Opcode::SpeedControl, Some(scale)) => Command::Speed {
                dps: bytes_to_i32_le([data[4], data[5], data[6], data[7]]) as f64 * scale.primary,
            },
            (
                Opcode::PositionControl,
                Some(CommandScale {
                    primary,
                    secondary: Some(limit_scale),
                }),
            ) => Command::Position {
                degrees: bytes_to_i32_le([data[4], data[5], data[6], data[7]]) as f64 * primary,
                max_speed_dps: bytes_to_u16_le([data[2], data[3]]) as f64 * limit_scale,
            },
            (Opcode::TorqueControl, Some(scale)) => Command::TorqueCurrent {
                amps: bytes_to_i16_le([data[4], data[5]]) as f64 * scale.primary,
            },
            (Opcode::ReadStatus1, _) => Command::Read(ReadRequest::Status1),
            (Opcode::ReadStatus2, _) => Command::Read(ReadRequest::Status2),
            (Opcode::ReadStatus3, _) => Command::Read(ReadRequest::Status3),
            (Opcode::ReadMultiTurnAngle, _) => Command::Read(ReadRequest::MultiTurnAngle),
            (Opcode::MotorOff, _) => Command::System(SystemCommand::Off),
            (Opcode::MotorStop, _) => Command::System(SystemCommand::Stop),
            (Opcode::MotorRunning, _) => Command::System(SystemCommand::Running),
            (Opcode::ClearErrorFlag, _) => Command::System(SystemCommand::ClearErrorFlag),
            (opcode, _) => return Err(DecodeError::UnexpectedOpcode { opcode }),
        };

        Ok(command)
    }

    /// 转换为发往指定仲裁 ID 的 CAN 帧
    pub fn to_frame(&self, arbitration_id: u16) -> Result<RmdFrame, EncodeError> {
        Ok(RmdFrame::from_payload(arbitration_id as u32, self.encode()?))
    }
}

/// 物理量 → 定点数，超出 `[min_raw, max_raw]` 时返回错误
fn to_fixed(
    field: &'static str,
    value: f64,
    per_lsb: f64,
    min_raw: i64,
    max_raw: i64,
) -> Result<i64, EncodeError> {
    if !value.is_finite() {
        return Err(EncodeError::NotFinite { field, value });
    }

    let raw = (value / per_lsb).round();
    if raw < min_raw as f64 || raw > max_raw as f64 {
        return Err(EncodeError::OutOfRange {
            field,
            value,
            min: min_raw as f64 * per_lsb,
            max: max_raw as f64 * per_lsb,
        });
    }

    Ok(raw as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_speed_command_encoding() {
        // 0 dps
        assert_eq!(
            Command::Speed { dps: 0.0 }.encode().unwrap(),
            [0xa2, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0, 0x0]
        );
        // 360 dps → 36000
        assert_eq!(
            Command::Speed { dps: 360.0 }.encode().unwrap(),
            [0xa2, 0x0, 0x0, 0x0, 0xa0, 0x8c, 0x0, 0x0]
        );
        // 4428 dps → 442800
        assert_eq!(
            Command::Speed { dps: 4428.0 }.encode().unwrap(),
            [0xa2, 0x0, 0x0, 0x0, 0xb0, 0xc1, 0x6, 0x0]
        );
        // 36864 dps → 3686400
        assert_eq!(
            Command::Speed { dps: 36864.0 }.encode().unwrap(),
            [0xa2, 0x0, 0x0, 0x0, 0x0, 0x40, 0x38, 0x0]
        );
        // 1000 dps → 100000
        assert_eq!(
            Command::Speed { dps: 1000.0 }.encode().unwrap(),
            [0xa2, 0x0, 0x0, 0x0, 0xa0, 0x86, 0x01, 0x0]
        );
    }

    #[test]
    fn test_position_command_encoding() {
        let cases: [(f64, [u8; 4]); 6] = [
            (0.0, [0x0, 0x0, 0x0, 0x0]),
            (270.0, [0x78, 0x69, 0x0, 0x0]),
            (540.0, [0xf0, 0xd2, 0x0, 0x0]),
            (72.0, [0x20, 0x1c, 0x0, 0x0]),
            (-90.0, [0xd8, 0xdc, 0xff, 0xff]),
            (-4080.0, [0x40, 0xc6, 0xf9, 0xff]),
        ];

        for (degrees, angle_bytes) in cases {
            let payload = Command::Position {
                degrees,
                max_speed_dps: 360.0,
            }
            .encode()
            .unwrap();
            assert_eq!(payload[..4], [0xa4, 0x0, 0x68, 0x1], "degrees={}", degrees);
            assert_eq!(payload[4..], angle_bytes, "degrees={}", degrees);
        }
    }

    #[test]
    fn test_torque_command_encoding() {
        // 1.5 A → 150 (0x0096)
        assert_eq!(
            Command::TorqueCurrent { amps: 1.5 }.encode().unwrap(),
            [0xa1, 0x0, 0x0, 0x0, 0x96, 0x0, 0x0, 0x0]
        );
        // -1 A → -100 (0xFF9C)
        assert_eq!(
            Command::TorqueCurrent { amps: -1.0 }.encode().unwrap(),
            [0xa1, 0x0, 0x0, 0x0, 0x9c, 0xff, 0x0, 0x0]
        );
    }

    #[test]
    fn test_read_and_system_commands_are_zero_filled() {
        let cases = [
            (Command::Read(ReadRequest::MultiTurnAngle), 0x92),
            (Command::Read(ReadRequest::Status1), 0x9a),
            (Command::Read(ReadRequest::Status2), 0x9c),
            (Command::Read(ReadRequest::Status3), 0x9d),
            (Command::System(SystemCommand::ClearErrorFlag), 0x9b),
            (Command::System(SystemCommand::Off), 0x80),
            (Command::System(SystemCommand::Stop), 0x81),
            (Command::System(SystemCommand::Running), 0x88),
        ];

        for (command, opcode) in cases {
            let payload = command.encode().unwrap();
            assert_eq!(payload, [opcode, 0, 0, 0, 0, 0, 0, 0]);
            assert_eq!(Command::decode(&payload).unwrap(), command);
        }
    }

    #[test]
    fn test_encode_rejects_non_finite() {
        let err = Command::Speed { dps: f64::NAN }.encode().unwrap_err();
        assert!(matches!(err, EncodeError::NotFinite { field: "speed", .. }));

        let err = Command::Position {
            degrees: f64::INFINITY,
            max_speed_dps: 10.0,
        }
        .encode()
        .unwrap_err();
        assert!(matches!(err, EncodeError::NotFinite { field: "angle", .. }));
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let err = Command::Speed { dps: 3.0e7 }.encode().unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { field: "speed", .. }));

        let err = Command::TorqueCurrent { amps: 400.0 }.encode().unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { field: "torque_current", .. }));

        let err = Command::Position {
            degrees: 10.0,
            max_speed_dps: -5.0,
        }
        .encode()
        .unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { field: "max_speed", .. }));

        let err = Command::Position {
            degrees: 10.0,
            max_speed_dps: 70_000.0,
        }
        .encode()
        .unwrap_err();
        assert!(matches!(err, EncodeError::OutOfRange { field: "max_speed", .. }));
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        assert_eq!(
            Command::decode(&[0xa2, 0, 0]).unwrap_err(),
            DecodeError::InvalidLength {
                expected: 8,
                actual: 3
            }
        );
        assert_eq!(
            Command::decode(&[0x01, 0, 0, 0, 0, 0, 0, 0]).unwrap_err(),
            DecodeError::UnknownOpcode { opcode: 0x01 }
        );
    }

    #[test]
    fn test_one_lsb_per_table_entry() {
        // 每条指令取定标表中的一个 LSB，编码结果必须是原始值 1
        let speed = command_scale(Opcode::SpeedControl).unwrap();
        let payload = Command::Speed { dps: speed.primary }.encode().unwrap();
        assert_eq!(payload[4..8], [1, 0, 0, 0]);

        let torque = command_scale(Opcode::TorqueControl).unwrap();
        let payload = Command::TorqueCurrent {
            amps: torque.primary,
        }
        .encode()
        .unwrap();
        assert_eq!(payload[4..6], [1, 0]);

        let position = command_scale(Opcode::PositionControl).unwrap();
        let payload = Command::Position {
            degrees: position.primary,
            max_speed_dps: position.secondary.unwrap(),
        }
        .encode()
        .unwrap();
        assert_eq!(payload[2..4], [1, 0]);
        assert_eq!(payload[4..8], [1, 0, 0, 0]);

        assert_eq!(
            Command::decode(&payload).unwrap(),
            Command::Position {
                degrees: position.primary,
                max_speed_dps: position.secondary.unwrap(),
            }
        );
    }

    #[test]
    fn test_to_frame() {
        let frame = Command::Speed { dps: 1000.0 }.to_frame(0x141).unwrap();
        assert_eq!(frame.id, 0x141);
        assert_eq!(frame.len, 8);
        assert_eq!(frame.data[0], 0xa2);
    }

    proptest! {
        #[test]
        fn prop_speed_roundtrip(dps in -1.0e6f64..1.0e6) {
            let payload = Command::Speed { dps }.encode().unwrap();
            match Command::decode(&payload).unwrap() {
                Command::Speed { dps: decoded } => prop_assert!((decoded - dps).abs() <= 0.005 + 1e-9),
                other => prop_assert!(false, "unexpected command {:?}", other),
            }
        }

        #[test]
        fn prop_position_roundtrip(degrees in -1.0e6f64..1.0e6, max_speed_dps in 0.0f64..65535.0) {
            let payload = Command::Position { degrees, max_speed_dps }.encode().unwrap();
            match Command::decode(&payload).unwrap() {
                Command::Position { degrees: d, max_speed_dps: s } => {
                    prop_assert!((d - degrees).abs() <= 0.005 + 1e-9);
                    prop_assert!((s - max_speed_dps).abs() <= 0.5 + 1e-9);
                },
                other => prop_assert!(false, "unexpected command {:?}", other),
            }
        }

        #[test]
        fn prop_torque_roundtrip(amps in -327.0f64..327.0) {
            let payload = Command::TorqueCurrent { amps }.encode().unwrap();
            match Command::decode(&payload).unwrap() {
                Command::TorqueCurrent { amps: decoded } => prop_assert!((decoded - amps).abs() <= 0.005 + 1e-9),
                other => prop_assert!(false, "unexpected command {:?}", other),
            }
        }

        #[test]
        fn prop_torque_out_of_range_rejected(amps in 328.0f64..1.0e9, negative in any::<bool>()) {
            let amps = if negative { -amps } else { amps };
            let result = Command::TorqueCurrent { amps }.encode();
            prop_assert!(
                matches!(result, Err(EncodeError::OutOfRange { .. })),
                "expected out of range error, got {:?}",
                result
            );
        }

        #[test]
        fn prop_speed_out_of_range_rejected(dps in 2.2e7f64..1.0e15) {
            let result = Command::Speed { dps }.encode();
            prop_assert!(
                matches!(result, Err(EncodeError::OutOfRange { .. })),
                "expected out of range error, got {:?}",
                result
            );
            let result = Command::Speed { dps: -dps }.encode();
            prop_assert!(
                matches!(result, Err(EncodeError::OutOfRange { .. })),
                "expected out of range error, got {:?}",
                result
            );
        }
    }
}
