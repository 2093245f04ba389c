//! 协议常量与定点数定标表
//!
//! 定标因子按指令码固定，不支持运行时配置。

use crate::Opcode;

/// 速度控制指令：0.01 dps/LSB（i32）
pub const SPEED_COMMAND_DPS_PER_LSB: f64 = 0.01;

/// 位置控制指令角度：0.01 °/LSB（i32）
pub const POSITION_COMMAND_DEG_PER_LSB: f64 = 0.01;

/// 位置控制指令限速：1 dps/LSB（u16）
pub const POSITION_SPEED_LIMIT_DPS_PER_LSB: f64 = 1.0;

/// 转矩控制指令电流：0.01 A/LSB（i16）
pub const TORQUE_COMMAND_A_PER_LSB: f64 = 0.01;

/// 应答温度：1 °C/LSB（i8）
pub const TEMPERATURE_C_PER_LSB: f64 = 1.0;

/// 应答转矩电流：0.01 A/LSB（i16）
pub const FEEDBACK_CURRENT_A_PER_LSB: f64 = 0.01;

/// 应答速度：1 dps/LSB（i16）
pub const FEEDBACK_SPEED_DPS_PER_LSB: f64 = 1.0;

/// 应答轴角度：1 °/LSB（i16）
pub const FEEDBACK_SHAFT_ANGLE_DEG_PER_LSB: f64 = 1.0;

/// 多圈角度：0.01 °/LSB（i32）
pub const MULTI_TURN_ANGLE_DEG_PER_LSB: f64 = 0.01;

/// 母线电压：0.1 V/LSB（u16）
pub const VOLTAGE_V_PER_LSB: f64 = 0.1;

/// 相电流：0.01 A/LSB（i16）
pub const PHASE_CURRENT_A_PER_LSB: f64 = 0.01;

/// mc_x 系列应答 ID 相对指令 ID 的偏移
pub const MC_X_RESPONSE_ID_OFFSET: u16 = 0x100;

/// 11-bit 标准帧最大仲裁 ID
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// 指令字段定标
///
/// - `primary`: 主字段（速度 / 角度 / 电流）每 LSB 对应的物理量
/// - `secondary`: 副字段（位置指令的限速）每 LSB 对应的物理量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandScale {
    pub primary: f64,
    pub secondary: Option<f64>,
}

/// 按指令码查询定标表
///
/// 不带参数的指令（读取、系统指令）返回 `None`。
pub const fn command_scale(opcode: Opcode) -> Option<CommandScale> {
    match opcode {
        Opcode::SpeedControl => Some(CommandScale {
            primary: SPEED_COMMAND_DPS_PER_LSB,
            secondary: None,
        }),
        Opcode::PositionControl => Some(CommandScale {
            primary: POSITION_COMMAND_DEG_PER_LSB,
            secondary: Some(POSITION_SPEED_LIMIT_DPS_PER_LSB),
        }),
        Opcode::TorqueControl => Some(CommandScale {
            primary: TORQUE_COMMAND_A_PER_LSB,
            secondary: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_table_covers_motion_opcodes() {
        for opcode in Opcode::ALL {
            assert_eq!(command_scale(opcode).is_some(), opcode.is_motion(), "{:?}", opcode);
        }
    }

    #[test]
    fn test_position_scale_has_speed_limit() {
        let scale = command_scale(Opcode::PositionControl).unwrap();
        assert_eq!(scale.primary, 0.01);
        assert_eq!(scale.secondary, Some(1.0));
    }
}
