//! 执行器会话
//!
//! 对单个设备的高层操作。每个操作：校验并编码参数 → 登记在途槽 → 发送 →
//! 等待应答（遥测缓存已在接收路径更新）→ 返回解码结果。
//! 关联器返回的错误原样上报，不做自动重试：重发转矩/速度指令对电机是安全敏感操作。

use crate::bus::BusCore;
use crate::correlator::{PendingRequest, SlotKey, SlotState};
use crate::error::DriverError;
use crate::registry::{DeviceStatus, LogicalId};
use crate::telemetry::TelemetrySnapshot;
use rmd_protocol::{
    Command, MotorStatus1, MotorStatus2, Opcode, ReadRequest, Reply, ReplyBody, RmdFrame,
    SystemCommand,
};
use std::sync::Arc;
use tracing::debug;

/// 1 rpm = 6 °/s
pub const DPS_PER_RPM: f64 = 6.0;

/// 单个执行器的会话句柄（可克隆，可跨线程）
#[derive(Clone)]
pub struct Actuator {
    core: Arc<BusCore>,
    device: LogicalId,
}

impl Actuator {
    pub(crate) fn new(core: Arc<BusCore>, device: LogicalId) -> Self {
        Self { core, device }
    }

    pub fn id(&self) -> LogicalId {
        self.device
    }

    /// 当前指令仲裁 ID
    pub fn arbitration_id(&self) -> Result<u16, DriverError> {
        self.core.registry.resolve(self.device)
    }

    /// 发送指令，不等待应答
    ///
    /// 参数先编码（越界时不改变任何状态），再登记槽并发送。
    /// 停止指令不受单在途限制。发送失败时槽立即释放。
    ///
    /// # 错误
    /// - `DriverError::Encoding`: 参数越界或非有限值
    /// - `DriverError::UnknownDevice`: 设备未注册
    /// - `DriverError::DeviceBusy`: 同一指令码已有在途请求
    /// - `DriverError::Bus`: 发送失败
    pub fn submit(&self, command: Command) -> Result<PendingRequest, DriverError> {
        let payload = command.encode()?;
        let arbitration_id = self.core.registry.resolve(self.device)?;
        let opcode = command.opcode();
        let key = SlotKey::new(self.device, opcode);

        let pending = if opcode == Opcode::MotorStop {
            self.core.correlator.begin_override(key)
        } else {
            self.core.correlator.begin(key)?
        };

        let frame = RmdFrame::from_payload(arbitration_id as u32, payload);
        if let Err(e) = self.core.transmit(frame) {
            // pending 在此丢弃，释放槽
            return Err(DriverError::Bus(e));
        }

        debug!("Device {}: {:?} sent", self.device, opcode);
        Ok(pending)
    }

    /// 发送指令并阻塞等待应答
    pub fn execute(&self, command: Command) -> Result<Reply, DriverError> {
        self.submit(command)?.wait().map(|f| f.reply)
    }

    pub(crate) fn execute_status2(&self, command: Command) -> Result<MotorStatus2, DriverError> {
        let reply = self.execute(command)?;
        reply.status2().ok_or(DriverError::UnexpectedReply {
            device: self.device,
            opcode: reply.opcode,
        })
    }

    fn execute_status1(&self, command: Command) -> Result<MotorStatus1, DriverError> {
        let reply = self.execute(command)?;
        match reply.body {
            ReplyBody::Status1(status) => Ok(status),
            _ => Err(DriverError::UnexpectedReply {
                device: self.device,
                opcode: reply.opcode,
            }),
        }
    }

    fn execute_ack(&self, command: SystemCommand) -> Result<(), DriverError> {
        self.execute(Command::System(command)).map(|_| ())
    }

    /// 注册时配置的减速比
    pub fn gear_ratio(&self) -> Result<f64, DriverError> {
        self.core.registry.entry(self.device).map(|e| e.gear_ratio)
    }

    /// 速度闭环控制，返回电机状态 2
    ///
    /// `dps` 是输出轴速度，发送前乘以减速比换算为电机转速。
    pub fn set_velocity(&self, dps: f64) -> Result<MotorStatus2, DriverError> {
        let gear = self.gear_ratio()?;
        self.execute_status2(Command::Speed { dps: dps * gear })
    }

    /// 以 rpm 表示的输出轴速度控制
    pub fn set_velocity_rpm(&self, rpm: f64) -> Result<MotorStatus2, DriverError> {
        self.set_velocity(rpm * DPS_PER_RPM)
    }

    /// 绝对位置控制
    ///
    /// `degrees` 与 `max_speed_dps` 都是输出轴的量，发送前乘以减速比。
    /// 限速为负时返回 `DriverError::Encoding`。
    pub fn set_position(
        &self,
        degrees: f64,
        max_speed_dps: f64,
    ) -> Result<MotorStatus2, DriverError> {
        let gear = self.gear_ratio()?;
        self.execute_status2(Command::Position {
            degrees: degrees * gear,
            max_speed_dps: max_speed_dps * gear,
        })
    }

    /// 位置控制，限速以 rpm 表示（取绝对值）
    pub fn set_position_rpm(&self, degrees: f64, rpm: f64) -> Result<MotorStatus2, DriverError> {
        self.set_position(degrees, rpm.abs() * DPS_PER_RPM)
    }

    /// 转矩电流控制（A）
    pub fn set_torque_current(&self, amps: f64) -> Result<MotorStatus2, DriverError> {
        self.execute_status2(Command::TorqueCurrent { amps })
    }

    /// 读取状态
    pub fn request_feedback(&self, request: ReadRequest) -> Result<Reply, DriverError> {
        self.execute(Command::Read(request))
    }

    /// 读取输出轴多圈角度（°，已除以减速比）
    pub fn multi_turn_angle(&self) -> Result<f64, DriverError> {
        let gear = self.gear_ratio()?;
        let reply = self.request_feedback(ReadRequest::MultiTurnAngle)?;
        match reply.body {
            ReplyBody::MultiTurnAngle(angle) => Ok(angle.degrees() / gear),
            _ => Err(DriverError::UnexpectedReply {
                device: self.device,
                opcode: reply.opcode,
            }),
        }
    }

    /// 停止电机
    ///
    /// 使用独立的指令码槽，另一个请求在途时也可以发出。
    pub fn stop(&self) -> Result<(), DriverError> {
        self.execute_ack(SystemCommand::Stop)
    }

    /// 关闭电机（清除运行状态）
    pub fn motor_off(&self) -> Result<(), DriverError> {
        self.execute_ack(SystemCommand::Off)
    }

    /// 从停止状态恢复运行
    pub fn motor_running(&self) -> Result<(), DriverError> {
        self.execute_ack(SystemCommand::Running)
    }

    /// 清除错误标志，返回清除后的状态 1
    pub fn clear_error_flags(&self) -> Result<MotorStatus1, DriverError> {
        self.execute_status1(Command::System(SystemCommand::ClearErrorFlag))
    }

    /// 上电初始化：关闭后再运行
    pub fn initialize(&self) -> Result<(), DriverError> {
        self.motor_off()?;
        self.motor_running()
    }

    /// 取消该设备某指令码的在途请求
    ///
    /// 已发出的帧无法撤回。
    pub fn cancel(&self, opcode: Opcode) -> bool {
        self.core.correlator.cancel(SlotKey::new(self.device, opcode))
    }

    pub fn slot_state(&self, opcode: Opcode) -> SlotState {
        self.core.correlator.state(SlotKey::new(self.device, opcode))
    }

    /// 缓存中的最新遥测
    pub fn telemetry(&self) -> Result<TelemetrySnapshot, DriverError> {
        self.core.telemetry.read(self.device)
    }

    pub fn status(&self) -> Result<DeviceStatus, DriverError> {
        self.core.registry.status(self.device)
    }
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator").field("device", &self.device).finish()
    }
}
