//! Health diagnostics
//!
//! Rates the cached telemetry of one controller against fixed limits and
//! produces a list of named statuses, one per concern, in a stable order:
//! fault, controller status, temperatures, motor current, then the purely
//! informational RPM, supply voltage, supply current and motor power.
//!
//! Only slots that hold data produce a status. Readings the controller
//! reported as unavailable are shown as such and never trip a limit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::telemetry::{FaultFlags, StatusFlags, TelemetryCache, TelemetryKind, TelemetrySnapshot};

/// Warning margin below the channel and IC temperature limits
const TEMP_WARN_MARGIN: f64 = 10.0;
/// Warning margin below the motor temperature limit
const MOTOR_TEMP_WARN_MARGIN: f64 = 20.0;
/// Warning margin below the motor current limit
const CURRENT_WARN_MARGIN: f64 = 20.0;

/// Severity of a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Nothing to report
    Ok,
    /// Degraded but operating
    Warn,
    /// Needs attention
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Ok => f.write_str("OK"),
            DiagnosticLevel::Warn => f.write_str("WARN"),
            DiagnosticLevel::Error => f.write_str("ERROR"),
        }
    }
}

/// A reported value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Label, prefixed with the controller description
    pub key: String,
    /// Formatted reading
    pub value: String,
}

/// One diagnostic result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticStatus {
    /// Status name, prefixed with the controller description
    pub name: String,
    /// Severity
    pub level: DiagnosticLevel,
    /// Human readable summary
    pub message: String,
    /// Readings behind the status
    pub values: Vec<KeyValue>,
}

/// Limits in amps and degrees Celsius
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticThresholds {
    /// Motor current limit
    pub motor_overcurrent: f64,
    /// Motor temperature limit
    pub motor_overtemp: f64,
    /// Power channel temperature limit
    pub channel_overtemp: f64,
    /// Controller IC temperature limit
    pub ic_overtemp: f64,
}

impl Default for DiagnosticThresholds {
    fn default() -> Self {
        Self {
            motor_overcurrent: 160.0,
            motor_overtemp: 70.0,
            channel_overtemp: 50.0,
            ic_overtemp: 50.0,
        }
    }
}

/// Most severe fault first
const FAULT_RULES: [(FaultFlags, DiagnosticLevel, &str); 8] = [
    (FaultFlags::OVERHEAT, DiagnosticLevel::Error, "Motor controller overheat fault"),
    (FaultFlags::OVERVOLTAGE, DiagnosticLevel::Error, "Motor controller overvoltage fault"),
    (FaultFlags::SHORT_CIRCUIT, DiagnosticLevel::Error, "Motor controller short circuit fault"),
    (FaultFlags::MOSFET_FAILURE, DiagnosticLevel::Error, "Motor controller mosfet failure fault"),
    (FaultFlags::UNDERVOLTAGE, DiagnosticLevel::Warn, "Motor controller undervoltage fault"),
    (FaultFlags::EMERGENCY_STOP, DiagnosticLevel::Warn, "Motor controller emergency stop activated"),
    (FaultFlags::SEPEX_EXCITATION, DiagnosticLevel::Warn, "Motor controller sepex excitation faulted"),
    (FaultFlags::STARTUP_CONFIG, DiagnosticLevel::Warn, "Motor controller startup configuration is faulty"),
];

/// Most severe condition first, then the operating mode
const STATUS_RULES: [(StatusFlags, DiagnosticLevel, &str); 7] = [
    (StatusFlags::STALL_DETECTED, DiagnosticLevel::Error, "motor controller detected a stall"),
    (StatusFlags::AT_LIMIT, DiagnosticLevel::Error, "motor controller is at limit"),
    (StatusFlags::POWER_STAGE_OFF, DiagnosticLevel::Warn, "motor controller has its power stage off"),
    (StatusFlags::SCRIPT_RUNNING, DiagnosticLevel::Ok, "motor controller is running a microbasic script"),
    (StatusFlags::SERIAL_MODE, DiagnosticLevel::Ok, "in Serial Mode"),
    (StatusFlags::PULSE_MODE, DiagnosticLevel::Ok, "in Pulse Mode"),
    (StatusFlags::ANALOG_MODE, DiagnosticLevel::Ok, "in Analog Mode"),
];

/// Rate the cached telemetry. `description` prefixes every status name
/// and message, e.g. "Front left".
pub fn evaluate(
    cache: &TelemetryCache,
    description: &str,
    thresholds: &DiagnosticThresholds,
) -> Vec<DiagnosticStatus> {
    let builder = Builder { description };
    let mut statuses = Vec::new();

    if let Some(TelemetrySnapshot::Fault { flags }) = cache.value(TelemetryKind::Fault) {
        statuses.push(builder.fault(flags));
    }
    if let Some(TelemetrySnapshot::Status { flags }) = cache.value(TelemetryKind::Status) {
        statuses.push(builder.status(flags));
    }
    if let Some(TelemetrySnapshot::Temperatures { motor, channel, ic }) =
        cache.value(TelemetryKind::Temperature)
    {
        statuses.push(builder.temperatures(motor[0], channel[0], ic, thresholds));
    }
    if let Some(TelemetrySnapshot::MotorCurrents { left, .. }) =
        cache.value(TelemetryKind::MotorCurrent)
    {
        statuses.push(builder.motor_current(left, thresholds));
    }
    if let Some(TelemetrySnapshot::MotorSpeeds { left, .. }) = cache.value(TelemetryKind::MotorRpm) {
        statuses.push(builder.info("Motor RPM", "RPM", left.to_string()));
    }
    if let Some(TelemetrySnapshot::Voltages { battery, .. }) = cache.value(TelemetryKind::Volts) {
        statuses.push(builder.info("Supply Volts", "Supply Volts (V)", reading(battery)));
    }
    if let Some(TelemetrySnapshot::BatteryCurrent { amps }) =
        cache.value(TelemetryKind::BatteryCurrent)
    {
        statuses.push(builder.info("Supply Current", "Supply Current (A)", reading(amps)));
    }
    if let Some(TelemetrySnapshot::MotorPower { left, .. }) = cache.value(TelemetryKind::MotorPower) {
        statuses.push(builder.info("Motor Power", "Motor Power", left.to_string()));
    }

    statuses
}

fn reading(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "unavailable".to_string(),
    }
}

fn above(value: Option<f64>, limit: f64) -> bool {
    value.is_some_and(|v| v > limit)
}

struct Builder<'a> {
    description: &'a str,
}

impl Builder<'_> {
    fn named(&self, name: &str) -> DiagnosticStatus {
        DiagnosticStatus {
            name: format!("{} {}", self.description, name),
            level: DiagnosticLevel::Ok,
            message: "OK".to_string(),
            values: Vec::new(),
        }
    }

    fn value(&self, key: &str, value: String) -> KeyValue {
        KeyValue {
            key: format!("{} {}", self.description, key),
            value,
        }
    }

    fn set(&self, status: &mut DiagnosticStatus, level: DiagnosticLevel, message: &str) {
        status.level = level;
        status.message = format!("{} {}", self.description, message);
    }

    fn fault(&self, flags: FaultFlags) -> DiagnosticStatus {
        let mut status = self.named("Motor Fault Status");
        if let Some((_, level, message)) = FAULT_RULES.iter().find(|(flag, ..)| flags.contains(*flag)) {
            self.set(&mut status, *level, message);
        }
        status.values.push(self.value("Fault flags", format!("{:#04x}", flags.bits())));
        status
    }

    fn status(&self, flags: StatusFlags) -> DiagnosticStatus {
        let mut status = self.named("Motor Current Status");
        if let Some((_, level, message)) = STATUS_RULES.iter().find(|(flag, ..)| flags.contains(*flag)) {
            self.set(&mut status, *level, message);
        }
        status.values.push(self.value("Status flags", format!("{:#04x}", flags.bits())));
        status
    }

    /// Later checks overwrite earlier ones; the motor is checked last
    fn temperatures(
        &self,
        motor: Option<f64>,
        channel: Option<f64>,
        ic: Option<f64>,
        limits: &DiagnosticThresholds,
    ) -> DiagnosticStatus {
        use DiagnosticLevel::{Error, Warn};

        let mut status = self.named("motor system temperatures(Motor, Channel, Bridge IC)");
        if above(channel, limits.channel_overtemp - TEMP_WARN_MARGIN) {
            self.set(&mut status, Warn, "channel is approaching unsafe temperatures");
        }
        if above(ic, limits.ic_overtemp - TEMP_WARN_MARGIN) {
            self.set(&mut status, Warn, "bridge IC is approaching unsafe temperatures");
        }
        if above(motor, limits.motor_overtemp - MOTOR_TEMP_WARN_MARGIN) {
            self.set(&mut status, Warn, "motor is approaching unsafe temperatures");
        }
        if above(channel, limits.channel_overtemp) {
            self.set(&mut status, Error, "channel above safe operating temperature");
        }
        if above(ic, limits.ic_overtemp) {
            self.set(&mut status, Error, "bridge IC is above safe operating temperature");
        }
        if above(motor, limits.motor_overtemp) {
            self.set(&mut status, Error, "motor above safe operating temperature");
        }

        status.values = vec![
            self.value("Motor temperature (C)", reading(motor)),
            self.value("Channel temperature (C)", reading(channel)),
            self.value("Bridge IC temperature (C)", reading(ic)),
        ];
        status
    }

    fn motor_current(&self, current: Option<f64>, limits: &DiagnosticThresholds) -> DiagnosticStatus {
        let mut status = self.named("Motor Current");
        if above(current, limits.motor_overcurrent) {
            self.set(
                &mut status,
                DiagnosticLevel::Error,
                "Motor Current Dangerously High. Reduce torque requirement",
            );
        } else if above(current, limits.motor_overcurrent - CURRENT_WARN_MARGIN) {
            self.set(&mut status, DiagnosticLevel::Warn, "Motor Current Very High");
        }
        status.values.push(self.value("Current (A)", reading(current)));
        status
    }

    fn info(&self, name: &str, key: &str, value: String) -> DiagnosticStatus {
        let mut status = self.named(name);
        status.values.push(self.value(key, value));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temps(motor: f64, channel: f64, ic: f64) -> TelemetrySnapshot {
        TelemetrySnapshot::Temperatures {
            motor: [Some(motor), Some(20.0)],
            channel: [Some(channel), Some(20.0)],
            ic: Some(ic),
        }
    }

    fn rate(snapshots: Vec<TelemetrySnapshot>) -> Vec<DiagnosticStatus> {
        let cache = TelemetryCache::new();
        for snapshot in snapshots {
            cache.store(snapshot);
        }
        evaluate(&cache, "Left", &DiagnosticThresholds::default())
    }

    fn single(snapshot: TelemetrySnapshot) -> DiagnosticStatus {
        let mut statuses = rate(vec![snapshot]);
        assert_eq!(statuses.len(), 1);
        statuses.remove(0)
    }

    #[test]
    fn test_empty_cache_has_no_statuses() {
        assert!(rate(Vec::new()).is_empty());
    }

    #[test]
    fn test_fault_priority() {
        let status = single(TelemetrySnapshot::Fault {
            flags: FaultFlags::EMERGENCY_STOP | FaultFlags::SHORT_CIRCUIT,
        });
        assert_eq!(status.name, "Left Motor Fault Status");
        assert_eq!(status.level, DiagnosticLevel::Error);
        assert_eq!(status.message, "Left Motor controller short circuit fault");

        let status = single(TelemetrySnapshot::Fault {
            flags: FaultFlags::EMERGENCY_STOP,
        });
        assert_eq!(status.level, DiagnosticLevel::Warn);
        assert_eq!(status.message, "Left Motor controller emergency stop activated");

        let status = single(TelemetrySnapshot::Fault {
            flags: FaultFlags::empty(),
        });
        assert_eq!(status.level, DiagnosticLevel::Ok);
        assert_eq!(status.message, "OK");
    }

    #[test]
    fn test_status_levels() {
        let status = single(TelemetrySnapshot::Status {
            flags: StatusFlags::SERIAL_MODE,
        });
        assert_eq!(status.level, DiagnosticLevel::Ok);
        assert_eq!(status.message, "Left in Serial Mode");

        let status = single(TelemetrySnapshot::Status {
            flags: StatusFlags::SERIAL_MODE | StatusFlags::POWER_STAGE_OFF,
        });
        assert_eq!(status.level, DiagnosticLevel::Warn);

        let status = single(TelemetrySnapshot::Status {
            flags: StatusFlags::SERIAL_MODE | StatusFlags::STALL_DETECTED,
        });
        assert_eq!(status.level, DiagnosticLevel::Error);
        assert_eq!(status.message, "Left motor controller detected a stall");
    }

    #[test]
    fn test_temperature_thresholds() {
        assert_eq!(single(temps(30.0, 30.0, 30.0)).level, DiagnosticLevel::Ok);

        let status = single(temps(30.0, 45.0, 30.0));
        assert_eq!(status.level, DiagnosticLevel::Warn);
        assert_eq!(status.message, "Left channel is approaching unsafe temperatures");

        let status = single(temps(30.0, 30.0, 55.0));
        assert_eq!(status.level, DiagnosticLevel::Error);
        assert_eq!(status.message, "Left bridge IC is above safe operating temperature");

        // Motor warnings take precedence over earlier warnings
        let status = single(temps(55.0, 45.0, 45.0));
        assert_eq!(status.level, DiagnosticLevel::Warn);
        assert_eq!(status.message, "Left motor is approaching unsafe temperatures");

        // An error is never downgraded by a later warning
        let status = single(temps(55.0, 60.0, 30.0));
        assert_eq!(status.level, DiagnosticLevel::Error);
        assert_eq!(status.message, "Left channel above safe operating temperature");

        let status = single(temps(75.0, 60.0, 60.0));
        assert_eq!(status.message, "Left motor above safe operating temperature");
        assert_eq!(
            status.values[0],
            KeyValue {
                key: "Left Motor temperature (C)".into(),
                value: "75.0".into()
            }
        );
    }

    #[test]
    fn test_unavailable_temperatures_never_trip() {
        let status = single(TelemetrySnapshot::Temperatures {
            motor: [None, None],
            channel: [None, None],
            ic: None,
        });
        assert_eq!(status.level, DiagnosticLevel::Ok);
        assert!(status.values.iter().all(|kv| kv.value == "unavailable"));
    }

    #[test]
    fn test_motor_current_thresholds() {
        let current = |amps: f64| TelemetrySnapshot::MotorCurrents {
            left: Some(amps),
            right: Some(0.0),
        };
        assert_eq!(single(current(100.0)).level, DiagnosticLevel::Ok);
        assert_eq!(single(current(150.0)).level, DiagnosticLevel::Warn);
        let status = single(current(170.0));
        assert_eq!(status.level, DiagnosticLevel::Error);
        assert_eq!(
            status.message,
            "Left Motor Current Dangerously High. Reduce torque requirement"
        );
    }

    #[test]
    fn test_order_and_informational_statuses() {
        let statuses = rate(vec![
            TelemetrySnapshot::MotorPower { left: 250, right: 0 },
            TelemetrySnapshot::BatteryCurrent { amps: Some(3.2) },
            TelemetrySnapshot::Voltages {
                battery: Some(24.1),
                drive: Some(24.0),
                analog: Some(5.0),
            },
            TelemetrySnapshot::MotorSpeeds { left: 1200, right: 0 },
            TelemetrySnapshot::Fault {
                flags: FaultFlags::empty(),
            },
        ]);

        let names: Vec<_> = statuses.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Left Motor Fault Status",
                "Left Motor RPM",
                "Left Supply Volts",
                "Left Supply Current",
                "Left Motor Power"
            ]
        );
        assert!(statuses.iter().all(|s| s.level == DiagnosticLevel::Ok));
        assert_eq!(statuses[2].values[0].value, "24.1");
        assert_eq!(statuses[1].values[0].value, "1200");
    }

    #[test]
    fn test_custom_thresholds() {
        let cache = TelemetryCache::new();
        cache.store(TelemetrySnapshot::MotorCurrents {
            left: Some(50.0),
            right: None,
        });
        let thresholds = DiagnosticThresholds {
            motor_overcurrent: 40.0,
            ..Default::default()
        };
        let statuses = evaluate(&cache, "Rear", &thresholds);
        assert_eq!(statuses[0].level, DiagnosticLevel::Error);
    }
}
