//! 多线程总线会话的端到端场景
//!
//! 使用 Mock 适配器模拟一条总线：RX 线程真实运行，设备由脚本化的应答器扮演。

use rmd_sdk::can::{MockBusHandle, MockCanAdapter};
use rmd_sdk::prelude::*;
use std::time::{Duration, Instant};

fn start_bus(config: BusConfig) -> (RmdBus, MockBusHandle) {
    let (adapter, handle) = MockCanAdapter::new();
    let bus = RmdBusBuilder::new().config(config).build_with(adapter).unwrap();
    (bus, handle)
}

/// 模拟设备：运动与状态 2 指令回状态 2，其他指令原样回显
///
/// `offset` 为应答 ID 相对指令 ID 的偏移（mc_x 为 0x100）。
fn simulated_device(handle: &MockBusHandle, offset: u32, speed: i16) {
    handle.set_responder(move |frame| {
        let opcode = Opcode::from_byte(frame.data[0]).ok()?;
        let payload = match opcode {
            Opcode::SpeedControl
            | Opcode::PositionControl
            | Opcode::TorqueControl
            | Opcode::ReadStatus2 => MotorStatus2 {
                temperature: 35,
                current_raw: 120,
                speed_raw: speed,
                shaft_angle_raw: 90,
            }
            .to_payload(opcode),
            _ => frame.data,
        };
        Some(RmdFrame::from_payload(frame.id + offset, payload))
    });
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

#[test]
fn test_velocity_scenario_then_unregister() {
    let (bus, handle) = start_bus(BusConfig::default());
    bus.register(LogicalId(1), 0x141).unwrap();
    simulated_device(&handle, 0, 998);

    let motor = bus.actuator(LogicalId(1)).unwrap();
    let status = motor.set_velocity(1000.0).unwrap();
    assert_eq!(status.speed_dps(), 998.0);

    let sent = handle.sent_frames();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].id, 0x141);
    assert_eq!(sent[0].data, [0xA2, 0x00, 0x00, 0x00, 0xa0, 0x86, 0x01, 0x00]);

    let snapshot = bus.telemetry(LogicalId(1)).unwrap();
    assert_eq!(snapshot.telemetry.speed_dps, Some(998.0));
    assert!(snapshot.staleness < Duration::from_millis(500));
    assert_eq!(motor.status().unwrap(), DeviceStatus::Known);

    assert!(bus.unregister(LogicalId(1)));
    assert!(matches!(
        bus.telemetry(LogicalId(1)),
        Err(DriverError::NoData(LogicalId(1)))
    ));
    assert!(matches!(
        motor.set_velocity(10.0),
        Err(DriverError::UnknownDevice(LogicalId(1)))
    ));
}

#[test]
fn test_timeout_then_retry_succeeds() {
    let (bus, handle) = start_bus(BusConfig::default());
    bus.register(LogicalId(1), 0x141).unwrap();
    let motor = bus.actuator(LogicalId(1)).unwrap();

    let started = Instant::now();
    let result = motor.set_position(90.0, 360.0);
    assert!(matches!(
        result,
        Err(DriverError::ResponseTimeout {
            opcode: Opcode::PositionControl,
            ..
        })
    ));
    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(bus.in_flight(), 0);
    assert!(bus.metrics().timeouts >= 1);

    // 超时不会自动重发
    assert_eq!(handle.sent_count(), 1);

    simulated_device(&handle, 0, 0);
    let status = motor.set_position(90.0, 360.0).unwrap();
    assert_eq!(status.shaft_angle_deg(), 90.0);
    assert_eq!(handle.sent_count(), 2);
}

#[test]
fn test_unsolicited_frame_updates_telemetry() {
    let (bus, handle) = start_bus(BusConfig::default());
    bus.register(LogicalId(1), 0x141).unwrap();

    let status = MotorStatus2 {
        temperature: 40,
        current_raw: 0,
        speed_raw: 321,
        shaft_angle_raw: 0,
    };
    handle.inject(RmdFrame::from_payload(
        0x141,
        status.to_payload(Opcode::ReadStatus2),
    ));

    assert!(wait_until(|| bus.telemetry(LogicalId(1)).is_ok()));
    let telemetry = bus.telemetry(LogicalId(1)).unwrap().telemetry;
    assert_eq!(telemetry.speed_dps, Some(321.0));
    assert_eq!(telemetry.temperature_c, Some(40.0));

    let metrics = bus.metrics();
    assert_eq!(metrics.unsolicited, 1);
    assert_eq!(metrics.fulfilled, 0);
    assert_eq!(bus.in_flight(), 0);
}

#[test]
fn test_mc_x_addressing() {
    let config = BusConfig {
        protocol: ProtocolVariant::McX,
        ..Default::default()
    };
    let (bus, handle) = start_bus(config);
    bus.register(LogicalId(3), 0x143).unwrap();
    simulated_device(&handle, 0x100, -45);

    let motor = bus.actuator(LogicalId(3)).unwrap();
    let status = motor.set_torque_current(1.2).unwrap();
    assert_eq!(status.speed_dps(), -45.0);
    assert_eq!(handle.sent_frames()[0].id, 0x143);

    // mc_x 模式下指令 ID 上的帧不属于任何设备
    handle.inject(RmdFrame::from_payload(0x143, [0x9C, 0, 0, 0, 0, 0, 0, 0]));
    assert!(wait_until(|| bus.metrics().unrouted == 1));
}

#[test]
fn test_stop_while_motion_request_in_flight() {
    let config = BusConfig {
        response_timeout_ms: 5_000,
        ..Default::default()
    };
    let (bus, handle) = start_bus(config);
    bus.register(LogicalId(1), 0x141).unwrap();
    let motor = bus.actuator(LogicalId(1)).unwrap();

    // 设备暂不应答
    let pending = motor.submit(Command::Speed { dps: 720.0 }).unwrap();
    assert!(matches!(
        motor.set_velocity(0.0),
        Err(DriverError::DeviceBusy { .. })
    ));

    simulated_device(&handle, 0, 0);
    motor.stop().unwrap();

    let opcodes: Vec<u8> = handle.sent_frames().iter().map(|f| f.data[0]).collect();
    assert_eq!(opcodes, vec![0xA2, 0x81]);

    // 速度请求仍在途，取消后可以重新发出
    assert!(matches!(
        motor.slot_state(Opcode::SpeedControl),
        rmd_sdk::driver::SlotState::AwaitingResponse { .. }
    ));
    assert!(pending.cancel());
    assert!(motor.set_velocity(0.0).is_ok());
}

#[test]
fn test_requests_to_different_devices_run_concurrently() {
    let config = BusConfig {
        response_timeout_ms: 1_000,
        ..Default::default()
    };
    let (bus, handle) = start_bus(config);
    for id in 1..=4u8 {
        bus.register(LogicalId(id), 0x140 + id as u16).unwrap();
    }
    simulated_device(&handle, 0, 12);

    let motors: Vec<Actuator> = (1..=4u8)
        .map(|id| bus.actuator(LogicalId(id)).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for motor in &motors {
            scope.spawn(move || {
                for _ in 0..20 {
                    let status = motor.set_velocity(12.0).unwrap();
                    assert_eq!(status.speed_dps(), 12.0);
                }
            });
        }
    });

    assert_eq!(handle.sent_count(), 80);
    assert_eq!(bus.metrics().fulfilled, 80);
    for id in 1..=4u8 {
        assert_eq!(bus.telemetry(LogicalId(id)).unwrap().telemetry.frames_applied, 20);
    }
}

#[test]
fn test_configured_bus_from_toml() {
    let config = BusConfig::from_toml_str(
        r#"
        response_timeout_ms = 50
        protocol = "mc_x"

        [[devices]]
        logical_id = 1
        arbitration_id = 0x141
        "#,
    )
    .unwrap();
    let (bus, handle) = start_bus(config);
    simulated_device(&handle, 0x100, 5);

    let motor = bus.actuator(LogicalId(1)).unwrap();
    let reply = motor.request_feedback(ReadRequest::Status2).unwrap();
    assert_eq!(reply.status2().unwrap().speed_dps(), 5.0);
    assert_eq!(bus.config().response_timeout(), Duration::from_millis(50));
}
