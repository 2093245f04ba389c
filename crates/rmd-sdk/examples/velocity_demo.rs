//! 速度控制示例
//!
//! 在模拟总线上挂一个简化的电机模型：速度指令让电机在下一次应答时
//! 以目标速度的 99.8% 运行。演示会话调用、遥测读取与故障处理。
//!
//! 运行：
//! ```bash
//! RUST_LOG=debug cargo run -p rmd-sdk --example velocity_demo --features mock
//! ```

use rmd_sdk::can::MockCanAdapter;
use rmd_sdk::prelude::*;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    rmd_sdk::init_logging();

    let (adapter, handle) = MockCanAdapter::new();
    handle.set_responder(|frame| {
        let opcode = Opcode::from_byte(frame.data[0]).ok()?;
        let speed_raw = match Command::decode(&frame.data) {
            Ok(Command::Speed { dps }) => (dps * 0.998) as i16,
            _ => 0,
        };
        let payload = match opcode {
            Opcode::SpeedControl | Opcode::ReadStatus2 => MotorStatus2 {
                temperature: 36,
                current_raw: 85,
                speed_raw,
                shaft_angle_raw: 0,
            }
            .to_payload(opcode),
            _ => frame.data,
        };
        Some(RmdFrame::from_payload(frame.id, payload))
    });

    let bus = RmdBusBuilder::new()
        .response_timeout(Duration::from_millis(20))
        .device(1, 0x141)
        .build_with(adapter)?;
    let motor = bus.actuator(LogicalId(1))?;

    motor.initialize()?;
    println!("Device {} initialized ({:?})", motor.id(), motor.status()?);

    for target in [100.0, 500.0, 1000.0] {
        let status = motor.set_velocity(target)?;
        println!(
            "target {:>7.1} dps -> speed {:>7.1} dps, current {:.2} A, {:.0} °C",
            target,
            status.speed_dps(),
            status.current_a(),
            status.temperature_c()
        );
    }

    let snapshot = motor.telemetry()?;
    println!(
        "telemetry: speed {:?} dps, staleness {:?}",
        snapshot.telemetry.speed_dps, snapshot.staleness
    );

    // 设备失联：调用以超时返回，不会自动重发
    handle.clear_responder();
    match motor.set_velocity(0.0) {
        Err(e @ DriverError::ResponseTimeout { .. }) => println!("expected failure: {}", e),
        other => println!("unexpected result: {:?}", other),
    }

    // 停止指令总是可以发出
    let _ = motor.stop();

    let metrics = bus.metrics();
    println!(
        "tx {} / rx {} / fulfilled {} / timeouts {}",
        metrics.tx_frames, metrics.rx_frames, metrics.fulfilled, metrics.timeouts
    );
    Ok(())
}
