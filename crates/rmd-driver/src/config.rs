//! 总线会话配置
//!
//! 所有字段都有默认值，TOML 中可以只写需要覆盖的部分：
//!
//! ```toml
//! response_timeout_ms = 30
//! protocol = "mc_x"
//!
//! [[devices]]
//! logical_id = 1
//! arbitration_id = 0x141
//! gear_ratio = 6.0
//! ```

use crate::error::DriverError;
use rmd_protocol::MC_X_RESPONSE_ID_OFFSET;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 应答超时与接收超时的上限（毫秒）
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// 应答寻址方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// 应答与指令使用同一仲裁 ID
    #[default]
    Drc,
    /// 应答使用仲裁 ID + 0x100
    McX,
}

impl ProtocolVariant {
    /// 应答 ID 相对指令 ID 的偏移
    pub fn response_id_offset(self) -> u16 {
        match self {
            ProtocolVariant::Drc => 0,
            ProtocolVariant::McX => MC_X_RESPONSE_ID_OFFSET,
        }
    }
}

/// 启动时注册的设备
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub logical_id: u8,
    pub arbitration_id: u16,
    /// 减速比（电机转子转数 / 输出轴转数），缺省为 1
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f64,
}

fn default_gear_ratio() -> f64 {
    1.0
}

impl DeviceConfig {
    pub fn new(logical_id: u8, arbitration_id: u16) -> Self {
        Self {
            logical_id,
            arbitration_id,
            gear_ratio: default_gear_ratio(),
        }
    }

    pub fn with_gear_ratio(mut self, gear_ratio: f64) -> Self {
        self.gear_ratio = gear_ratio;
        self
    }
}

/// 减速比必须是正的有限值
pub(crate) fn validate_gear_ratio(gear_ratio: f64) -> Result<(), DriverError> {
    if gear_ratio.is_finite() && gear_ratio > 0.0 {
        Ok(())
    } else {
        Err(DriverError::Config(format!(
            "gear_ratio must be a positive finite number, got {}",
            gear_ratio
        )))
    }
}

/// 总线会话配置
///
/// ```
/// use rmd_driver::{BusConfig, ProtocolVariant};
///
/// let config = BusConfig::default();
/// assert_eq!(config.response_timeout_ms, 20);
/// assert_eq!(config.protocol, ProtocolVariant::Drc);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 应答超时（毫秒）
    pub response_timeout_ms: u64,
    /// CAN 接收超时（毫秒），同时决定 RX 线程检查超时的节拍
    pub receive_timeout_ms: u64,
    /// 应答寻址方式
    pub protocol: ProtocolVariant,
    /// 启动时注册的设备
    pub devices: Vec<DeviceConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 20,
            receive_timeout_ms: 2,
            protocol: ProtocolVariant::Drc,
            devices: Vec::new(),
        }
    }
}

impl BusConfig {
    /// 从 TOML 字符串解析
    pub fn from_toml_str(input: &str) -> Result<Self, DriverError> {
        let config: BusConfig =
            toml::from_str(input).map_err(|e| DriverError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DriverError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&input)
    }

    /// 序列化为 TOML
    pub fn to_toml_string(&self) -> Result<String, DriverError> {
        toml::to_string(self).map_err(|e| DriverError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        for (name, value) in [
            ("response_timeout_ms", self.response_timeout_ms),
            ("receive_timeout_ms", self.receive_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(DriverError::Config(format!(
                    "{} must be in 1..={}, got {}",
                    name, MAX_TIMEOUT_MS, value
                )));
            }
        }
        for device in &self.devices {
            validate_gear_ratio(device.gear_ratio)?;
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}
