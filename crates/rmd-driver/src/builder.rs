//! Builder 模式实现
//!
//! 提供链式构造 `RmdBus` 实例的便捷方式。

use crate::bus::RmdBus;
use crate::config::{BusConfig, DeviceConfig, ProtocolVariant};
use crate::error::DriverError;
#[cfg(target_os = "linux")]
use rmd_can::SocketCanAdapter;
use rmd_can::SplittableAdapter;
use std::time::Duration;
use tracing::info;

/// 未指定接口时使用的 SocketCAN 接口
pub const DEFAULT_INTERFACE: &str = "can0";

/// RmdBus Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use rmd_driver::{ProtocolVariant, RmdBusBuilder};
/// use std::time::Duration;
///
/// let bus = RmdBusBuilder::new()
///     .interface("can1")
///     .protocol(ProtocolVariant::McX)
///     .response_timeout(Duration::from_millis(30))
///     .device(1, 0x141)
///     .geared_device(2, 0x142, 6.0)
///     .build()?;
/// # Ok::<(), rmd_driver::DriverError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct RmdBusBuilder {
    /// SocketCAN 接口名称（如 "can0"、"vcan0"）
    interface: Option<String>,
    config: BusConfig,
}

impl RmdBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置 CAN 接口（默认 "can0"）
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// 整体替换配置（例如从 TOML 文件加载的配置）
    ///
    /// 之前通过 `device` 等方法设置的值会被覆盖。
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置应答超时，精度为毫秒
    ///
    /// 超出范围的值在 `build` 时由配置校验拒绝。
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn protocol(mut self, protocol: ProtocolVariant) -> Self {
        self.config.protocol = protocol;
        self
    }

    /// 启动时注册设备（减速比 1）
    pub fn device(mut self, logical_id: u8, arbitration_id: u16) -> Self {
        self.config.devices.push(DeviceConfig::new(logical_id, arbitration_id));
        self
    }

    /// 启动时注册带减速器的设备
    pub fn geared_device(mut self, logical_id: u8, arbitration_id: u16, gear_ratio: f64) -> Self {
        self.config
            .devices
            .push(DeviceConfig::new(logical_id, arbitration_id).with_gear_ratio(gear_ratio));
        self
    }

    /// 当前累积的配置
    pub fn bus_config(&self) -> &BusConfig {
        &self.config
    }

    /// 打开 SocketCAN 接口并启动总线会话
    #[cfg(target_os = "linux")]
    pub fn build(self) -> Result<RmdBus, DriverError> {
        let interface = self.interface.as_deref().unwrap_or(DEFAULT_INTERFACE);
        let can = SocketCanAdapter::new(interface)?;
        info!("Opened SocketCAN interface {}", interface);
        RmdBus::new(can, self.config)
    }

    /// 使用给定适配器启动总线会话（接口名称被忽略）
    pub fn build_with<C>(self, can: C) -> Result<RmdBus, DriverError>
    where
        C: SplittableAdapter,
        C::RxAdapter: Send + 'static,
        C::TxAdapter: Send + 'static,
    {
        if let Some(interface) = &self.interface {
            info!("Ignoring interface {} for custom adapter", interface);
        }
        RmdBus::new(can, self.config)
    }
}
