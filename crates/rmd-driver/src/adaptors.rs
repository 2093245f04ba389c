//! 单一用途的执行器适配器
//!
//! 把 [`Actuator`] 包装成更窄的接口：电机（按功率调速）、舵机（按角度定位），
//! 以及温度、角度、角速度、电流传感器。角度与速度都是输出轴的量（已按减速比换算）。
//!
//! ```no_run
//! use rmd_driver::adaptors::{Motor, RotationSensor};
//! use rmd_driver::{LogicalId, RmdBusBuilder};
//!
//! let bus = RmdBusBuilder::new().geared_device(1, 0x141, 6.0).build()?;
//! let motor = Motor::new(bus.actuator(LogicalId(1))?, 30.0)?;
//! motor.power(0.5)?;
//! let angle = RotationSensor::new(bus.actuator(LogicalId(1))?).read()?;
//! # let _ = angle;
//! # Ok::<(), rmd_driver::DriverError>(())
//! ```

use crate::error::DriverError;
use crate::session::{Actuator, DPS_PER_RPM};
use rmd_protocol::{Command, MotorStatus2, ReadRequest};

fn checked_max_speed(max_speed_rpm: f64) -> Result<f64, DriverError> {
    if max_speed_rpm.is_finite() {
        Ok(max_speed_rpm.abs())
    } else {
        Err(DriverError::InvalidInput(format!(
            "max speed must be finite, got {} rpm",
            max_speed_rpm
        )))
    }
}

fn read_status2(actuator: &Actuator) -> Result<MotorStatus2, DriverError> {
    actuator.execute_status2(Command::Read(ReadRequest::Status2))
}

/// 按功率调速的电机
#[derive(Debug, Clone)]
pub struct Motor {
    actuator: Actuator,
    max_speed_rpm: f64,
}

impl Motor {
    /// `max_speed_rpm` 为功率 1.0 对应的输出轴转速，取绝对值
    pub fn new(actuator: Actuator, max_speed_rpm: f64) -> Result<Self, DriverError> {
        Ok(Self {
            actuator,
            max_speed_rpm: checked_max_speed(max_speed_rpm)?,
        })
    }

    pub fn max_speed_rpm(&self) -> f64 {
        self.max_speed_rpm
    }

    /// 设置功率，`power ∈ [-1, 1]`，负值反转
    ///
    /// # 错误
    /// - `DriverError::InvalidInput`: 功率超出范围或不是有限值（不发送任何帧）
    pub fn power(&self, power: f64) -> Result<MotorStatus2, DriverError> {
        if !(-1.0..=1.0).contains(&power) {
            return Err(DriverError::InvalidInput(format!(
                "power must be within [-1, 1], got {}",
                power
            )));
        }
        self.actuator.set_velocity_rpm(power * self.max_speed_rpm)
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }
}

/// 按角度定位的舵机
#[derive(Debug, Clone)]
pub struct Servo {
    actuator: Actuator,
    max_speed_rpm: f64,
}

impl Servo {
    /// `max_speed_rpm` 为定位运动的限速，取绝对值
    pub fn new(actuator: Actuator, max_speed_rpm: f64) -> Result<Self, DriverError> {
        Ok(Self {
            actuator,
            max_speed_rpm: checked_max_speed(max_speed_rpm)?,
        })
    }

    /// 转到输出轴绝对角度（°）
    pub fn position(&self, degrees: f64) -> Result<MotorStatus2, DriverError> {
        self.actuator.set_position_rpm(degrees, self.max_speed_rpm)
    }

    pub fn actuator(&self) -> &Actuator {
        &self.actuator
    }
}

/// 电机温度（°C），读取状态 2
#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    actuator: Actuator,
}

impl TemperatureSensor {
    pub fn new(actuator: Actuator) -> Self {
        Self { actuator }
    }

    pub fn read(&self) -> Result<f64, DriverError> {
        read_status2(&self.actuator).map(|s| s.temperature_c())
    }
}

/// 输出轴多圈角度（°）
#[derive(Debug, Clone)]
pub struct RotationSensor {
    actuator: Actuator,
}

impl RotationSensor {
    pub fn new(actuator: Actuator) -> Self {
        Self { actuator }
    }

    pub fn read(&self) -> Result<f64, DriverError> {
        self.actuator.multi_turn_angle()
    }
}

/// 输出轴转速（rpm），读取状态 2
#[derive(Debug, Clone)]
pub struct AngularVelocitySensor {
    actuator: Actuator,
}

impl AngularVelocitySensor {
    pub fn new(actuator: Actuator) -> Self {
        Self { actuator }
    }

    pub fn read(&self) -> Result<f64, DriverError> {
        let gear = self.actuator.gear_ratio()?;
        let status = read_status2(&self.actuator)?;
        Ok(status.speed_dps() / gear / DPS_PER_RPM)
    }
}

/// 转矩电流（A），读取状态 2
#[derive(Debug, Clone)]
pub struct CurrentSensor {
    actuator: Actuator,
}

impl CurrentSensor {
    pub fn new(actuator: Actuator) -> Self {
        Self { actuator }
    }

    pub fn read(&self) -> Result<f64, DriverError> {
        read_status2(&self.actuator).map(|s| s.current_a())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BusConfig, LogicalId, RmdBus};
    use rmd_can::{MockBusHandle, MockCanAdapter, RmdFrame};
    use rmd_protocol::Opcode;

    /// 减速比 6 的设备，状态 2 固定为 32 °C、-0.25 A、电机 360 dps
    fn geared_bus() -> (RmdBus, MockBusHandle) {
        let (adapter, handle) = MockCanAdapter::new();
        let bus = RmdBus::new(adapter, BusConfig::default()).unwrap();
        bus.register_geared(LogicalId(1), 0x140, 6.0).unwrap();
        handle.set_responder(|frame| {
            let opcode = Opcode::from_byte(frame.data[0]).ok()?;
            let payload = match opcode {
                Opcode::ReadMultiTurnAngle => {
                    let mut payload = [0x92, 0, 0, 0, 0, 0, 0, 0];
                    payload[4..].copy_from_slice(&(-54000i32).to_le_bytes());
                    payload
                },
                _ => MotorStatus2 {
                    temperature: 32,
                    current_raw: -25,
                    speed_raw: 360,
                    shaft_angle_raw: 0,
                }
                .to_payload(opcode),
            };
            Some(RmdFrame::from_payload(frame.id, payload))
        });
        (bus, handle)
    }

    #[test]
    fn test_motor_power_maps_to_output_speed() {
        let (bus, handle) = geared_bus();
        let motor = Motor::new(bus.actuator(LogicalId(1)).unwrap(), -10.0).unwrap();
        assert_eq!(motor.max_speed_rpm(), 10.0);

        motor.power(1.0).unwrap();
        motor.power(-0.5).unwrap();

        let sent = handle.sent_frames();
        // 10 rpm × 6 × 6 = 360 dps → 36000
        assert_eq!(sent[0].data, [0xA2, 0x00, 0x00, 0x00, 0xa0, 0x8c, 0x00, 0x00]);
        // -5 rpm → -180 dps → -18000
        assert_eq!(sent[1].data, [0xA2, 0x00, 0x00, 0x00, 0xb0, 0xb9, 0xff, 0xff]);
    }

    #[test]
    fn test_motor_rejects_power_out_of_range() {
        let (bus, handle) = geared_bus();
        let motor = Motor::new(bus.actuator(LogicalId(1)).unwrap(), 10.0).unwrap();

        for power in [1.5, -1.01, f64::NAN] {
            assert!(matches!(motor.power(power), Err(DriverError::InvalidInput(_))));
        }
        assert_eq!(handle.sent_count(), 0);
        assert!(matches!(
            Motor::new(bus.actuator(LogicalId(1)).unwrap(), f64::INFINITY),
            Err(DriverError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_servo_position() {
        let (bus, handle) = geared_bus();
        let servo = Servo::new(bus.actuator(LogicalId(1)).unwrap(), 10.0).unwrap();

        servo.position(45.0).unwrap();
        assert_eq!(
            handle.sent_frames()[0].data,
            [0xA4, 0x00, 0x68, 0x01, 0x78, 0x69, 0x00, 0x00]
        );
    }

    #[test]
    fn test_sensors() {
        let (bus, _handle) = geared_bus();
        let actuator = bus.actuator(LogicalId(1)).unwrap();

        assert_eq!(TemperatureSensor::new(actuator.clone()).read().unwrap(), 32.0);
        assert!((CurrentSensor::new(actuator.clone()).read().unwrap() + 0.25).abs() < 1e-9);
        // 电机 360 dps ÷ 6 = 输出轴 60 dps = 10 rpm
        assert!((AngularVelocitySensor::new(actuator.clone()).read().unwrap() - 10.0).abs() < 1e-9);
        // 电机 -540° ÷ 6 = 输出轴 -90°
        assert!((RotationSensor::new(actuator).read().unwrap() + 90.0).abs() < 1e-9);
    }
}
