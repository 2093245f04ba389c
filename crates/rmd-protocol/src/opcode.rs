//! 指令码定义
//!
//! RMD 协议把指令类型放在载荷 Byte 0，电机在应答帧中回显同一指令码。
//! 应答与请求的匹配完全依赖 (仲裁 ID, 指令码) 二元组。

use crate::DecodeError;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 指令码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// 电机关闭（清除运行状态，释放电机）
    MotorOff = 0x80,
    /// 电机停止（保持运行状态，停止输出）
    MotorStop = 0x81,
    /// 电机运行（从停止状态恢复）
    MotorRunning = 0x88,
    /// 读取多圈角度
    ReadMultiTurnAngle = 0x92,
    /// 读取电机状态 1 与错误标志
    ReadStatus1 = 0x9A,
    /// 清除错误标志
    ClearErrorFlag = 0x9B,
    /// 读取电机状态 2（温度、转矩电流、速度、轴角度）
    ReadStatus2 = 0x9C,
    /// 读取电机状态 3（三相电流）
    ReadStatus3 = 0x9D,
    /// 转矩闭环控制
    TorqueControl = 0xA1,
    /// 速度闭环控制
    SpeedControl = 0xA2,
    /// 带限速的绝对位置闭环控制
    PositionControl = 0xA4,
}

impl Opcode {
    /// 全部指令码
    pub const ALL: [Opcode; 11] = [
        Opcode::MotorOff,
        Opcode::MotorStop,
        Opcode::MotorRunning,
        Opcode::ReadMultiTurnAngle,
        Opcode::ReadStatus1,
        Opcode::ClearErrorFlag,
        Opcode::ReadStatus2,
        Opcode::ReadStatus3,
        Opcode::TorqueControl,
        Opcode::SpeedControl,
        Opcode::PositionControl,
    ];

    /// 从载荷首字节解析指令码
    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        Opcode::try_from(byte).map_err(|_| DecodeError::UnknownOpcode { opcode: byte })
    }

    /// 指令码原始值
    pub fn as_byte(self) -> u8 {
        self.into()
    }

    /// 是否为运动控制指令（转矩/速度/位置）
    pub fn is_motion(self) -> bool {
        matches!(
            self,
            Opcode::TorqueControl | Opcode::SpeedControl | Opcode::PositionControl
        )
    }
}
