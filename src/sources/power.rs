//! Platform wall-power readings via the IPMI sensor repository.
//!
//! Each read invokes `ipmitool sdr` and extracts the watt value from the
//! configured sensor's row. `ipmitool` output rows look like
//! `PS1 Input Power  | 152 Watts  | ok`; the second column carries the
//! reading. Invoking the CLI per tick matches the tool's own refresh rate,
//! which is far below the sampling step anyway.

use std::process::Command;

use super::{MetricKey, MetricSource, SourceError};

/// Wall-power source backed by the `ipmitool` CLI.
#[derive(Debug)]
pub struct PowerSource {
    sensor: String,
    key: MetricKey,
}

impl PowerSource {
    /// Create a source for the named IPMI sensor, e.g. `PS1 Input Power`.
    pub fn new(sensor: impl Into<String>) -> Self {
        Self {
            sensor: sensor.into(),
            key: MetricKey::global("wall-power"),
        }
    }

    fn parse_watts(&self, output: &str) -> Result<f64, SourceError> {
        let row = output
            .lines()
            .find(|line| line.starts_with(&self.sensor))
            .ok_or_else(|| {
                SourceError::Parse(format!("sensor {} absent from sdr output", self.sensor))
            })?;

        let reading = row
            .split('|')
            .nth(1)
            .ok_or_else(|| SourceError::Parse(format!("malformed sdr row: {}", row)))?;

        reading
            .trim()
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| SourceError::Parse(format!("non-numeric reading in row: {}", row)))
    }
}

impl MetricSource for PowerSource {
    fn key(&self) -> &MetricKey {
        &self.key
    }

    fn read(&mut self) -> Result<f64, SourceError> {
        let output = Command::new("ipmitool").arg("sdr").output()?;
        if !output.status.success() {
            return Err(SourceError::Unavailable(format!(
                "ipmitool sdr exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        self.parse_watts(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDR_OUTPUT: &str = "\
Inlet Temp       | 24 degrees C      | ok
PS1 Input Power  | 152 Watts         | ok
PS2 Input Power  | 148 Watts         | ok
Fan1 RPM         | 5640 RPM          | ok
";

    #[test]
    fn parses_configured_sensor_row() {
        let src = PowerSource::new("PS1 Input Power");
        assert_eq!(src.parse_watts(SDR_OUTPUT).unwrap(), 152.0);
    }

    #[test]
    fn distinguishes_supply_sensors() {
        let src = PowerSource::new("PS2 Input Power");
        assert_eq!(src.parse_watts(SDR_OUTPUT).unwrap(), 148.0);
    }

    #[test]
    fn missing_sensor_is_parse_error() {
        let src = PowerSource::new("PS3 Input Power");
        assert!(matches!(
            src.parse_watts(SDR_OUTPUT),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn non_numeric_reading_is_parse_error() {
        let src = PowerSource::new("PS1 Input Power");
        assert!(matches!(
            src.parse_watts("PS1 Input Power | no reading | ns"),
            Err(SourceError::Parse(_))
        ));
    }
}
