use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use uuid::Uuid;

use crate::channel::CELL_COUNT;
use crate::command::CommandEncoding;

const DEFAULT_CONFIG_FILE: &str = "balancer.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub gatt: GattConfig,
    pub telemetry: TelemetryConfig,
    pub ui: UiConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised local name the link scans for.
    pub name: String,
    pub scan_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry_delay_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "8-Cell Balancer".into(),
            scan_secs: 2,
            connect_timeout_secs: 10,
            retry_delay_ms: 1000,
        }
    }
}

/// Characteristic UUIDs of the balancer's vendor service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GattConfig {
    pub values: Uuid,
    pub deviations: Uuid,
    pub history_1h: Uuid,
    pub history_12h: Uuid,
    pub pwm_set: Uuid,
}

const fn vendor_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_1221_3443_5665_7887_9aa9_bccb | ((short as u128) << 96))
}

impl Default for GattConfig {
    fn default() -> Self {
        Self {
            values: vendor_uuid(0xab01),
            deviations: vendor_uuid(0xab02),
            history_1h: vendor_uuid(0xab03),
            history_12h: vendor_uuid(0xab04),
            pwm_set: vendor_uuid(0xab05),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub cells: usize,
    /// Slots per rolling window, identical for every resolution.
    pub capacity: usize,
    pub fine_to_medium: usize,
    pub medium_to_coarse: usize,
    /// Divisor from device fixed-point to physical units.
    pub scale: f32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            cells: CELL_COUNT,
            capacity: 121,
            fine_to_medium: 30,
            medium_to_coarse: 12,
            scale: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub refresh_ms: u64,
    pub voltage_range: [f64; 2],
    pub current_range: [f64; 2],
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            refresh_ms: 100,
            voltage_range: [3.15, 4.15],
            current_range: [-0.02, 0.25],
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub encoding: CommandEncoding,
}

impl AppConfig {
    /// Loads from `path`, else `$BALANCER_CONFIG`, else `balancer.toml` in the
    /// working directory. Falls back to defaults when no file is found.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os("BALANCER_CONFIG")
                .map(PathBuf::from)
                .or_else(|| {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }),
        };

        match path {
            Some(path) => {
                let s = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Self::load_from_str(&s).with_context(|| format!("parsing {}", path.display()))
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.device.name.is_empty(), "device.name must be non-empty");
        anyhow::ensure!(
            self.device.connect_timeout_secs > 0,
            "device.connect_timeout_secs must be > 0, got {}",
            self.device.connect_timeout_secs
        );

        let t = &self.telemetry;
        anyhow::ensure!(t.cells > 0, "telemetry.cells must be > 0, got {}", t.cells);
        anyhow::ensure!(
            t.fine_to_medium > 0 && t.medium_to_coarse > 0,
            "telemetry decimation factors must be > 0, got {} and {}",
            t.fine_to_medium,
            t.medium_to_coarse
        );
        anyhow::ensure!(
            t.capacity >= t.fine_to_medium && t.capacity >= t.medium_to_coarse,
            "telemetry.capacity ({}) must hold at least one rollup span",
            t.capacity
        );
        anyhow::ensure!(t.scale > 0.0, "telemetry.scale must be > 0, got {}", t.scale);

        let ui = &self.ui;
        anyhow::ensure!(ui.refresh_ms > 0, "ui.refresh_ms must be > 0");
        anyhow::ensure!(
            ui.voltage_range[0] < ui.voltage_range[1],
            "ui.voltage_range must be ascending, got {:?}",
            ui.voltage_range
        );
        anyhow::ensure!(
            ui.current_range[0] < ui.current_range[1],
            "ui.current_range must be ascending, got {:?}",
            ui.current_range
        );
        Ok(())
    }
}
