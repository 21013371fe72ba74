//! Set-point commands written to the balancer.

use serde::Deserialize;

use crate::channel::Resolution;
use crate::error::TelemetryError;

const MAX_PERCENT: u8 = 100;

/// Wire format of the `pwm_set` characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandEncoding {
    /// Comma separated percentages, one per cell, ASCII.
    #[default]
    AsciiCsv,
    /// A single set-point as a little-endian `i16`. Older firmware only.
    RawLe16,
}

/// Per-cell PWM duty in percent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwmCommand {
    duty: Vec<u8>,
}

impl PwmCommand {
    pub fn new(duty: Vec<u8>) -> Result<Self, TelemetryError> {
        if let Some(bad) = duty.iter().find(|&&d| d > MAX_PERCENT) {
            return Err(TelemetryError::InvalidCommand(format!("duty {bad}% is above 100%")));
        }
        Ok(Self { duty })
    }

    /// Parses user text such as `" 00, 25, 00, 00, 00, 00, 00, 100"`.
    pub fn parse(text: &str, cells: usize) -> Result<Self, TelemetryError> {
        let duty = text
            .split(',')
            .map(|field| parse_percent(field.trim()))
            .collect::<Result<Vec<u8>, _>>()?;
        if duty.len() != cells {
            return Err(TelemetryError::InvalidCommand(format!(
                "expected {cells} values, got {}",
                duty.len()
            )));
        }
        Self::new(duty)
    }

    pub fn duty(&self) -> &[u8] {
        &self.duty
    }

    pub fn encode(&self) -> Vec<u8> {
        self.duty
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
            .into_bytes()
    }
}

/// Legacy single set-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetpointCommand(pub i16);

impl SetpointCommand {
    pub fn parse(text: &str) -> Result<Self, TelemetryError> {
        parse_percent(text.trim()).map(|p| Self(i16::from(p)))
    }

    pub fn encode(&self) -> Vec<u8> {
        self.0.to_le_bytes().to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Pwm(PwmCommand),
    Setpoint(SetpointCommand),
}

impl DeviceCommand {
    pub fn parse(text: &str, encoding: CommandEncoding, cells: usize) -> Result<Self, TelemetryError> {
        match encoding {
            CommandEncoding::AsciiCsv => PwmCommand::parse(text, cells).map(DeviceCommand::Pwm),
            CommandEncoding::RawLe16 => SetpointCommand::parse(text).map(DeviceCommand::Setpoint),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            DeviceCommand::Pwm(pwm) => pwm.encode(),
            DeviceCommand::Setpoint(setpoint) => setpoint.encode(),
        }
    }
}

/// Where commands leave the process. Calls return once the command is queued;
/// delivery to the device is not awaited.
pub trait CommandSink {
    fn write(&mut self, command: DeviceCommand) -> anyhow::Result<()>;

    /// Asks the device to replay its stored history for `resolution`.
    fn request_history(&mut self, resolution: Resolution) -> anyhow::Result<()>;
}

fn parse_percent(field: &str) -> Result<u8, TelemetryError> {
    let value: u8 = field
        .parse()
        .map_err(|_| TelemetryError::InvalidCommand(format!("'{field}' is not a percentage")))?;
    if value > MAX_PERCENT {
        return Err(TelemetryError::InvalidCommand(format!("duty {value}% is above 100%")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_padded_template() {
        let pwm = PwmCommand::parse(" 00, 25, 00, 00, 00, 00, 07, 100", 8).unwrap();
        assert_eq!(pwm.duty(), &[0, 25, 0, 0, 0, 0, 7, 100]);
        assert_eq!(pwm.encode(), b"0,25,0,0,0,0,7,100".to_vec());
    }

    #[test]
    fn rejects_wrong_count() {
        assert!(matches!(
            PwmCommand::parse("1, 2, 3", 8),
            Err(TelemetryError::InvalidCommand(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!(PwmCommand::parse("0, 0, 0, 0, 0, 0, 0, 101", 8).is_err());
        assert!(PwmCommand::parse("0, 0, 0, 0, 0, 0, 0, -1", 8).is_err());
        assert!(PwmCommand::parse("0, 0, 0, 0, 0, 0, 0, x", 8).is_err());
        assert!(PwmCommand::new(vec![150]).is_err());
    }

    #[test]
    fn setpoint_is_little_endian() {
        let command = DeviceCommand::parse(" 75 ", CommandEncoding::RawLe16, 8).unwrap();
        assert_eq!(command, DeviceCommand::Setpoint(SetpointCommand(75)));
        assert_eq!(command.encode(), vec![75, 0]);
    }
}
