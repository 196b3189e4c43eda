//! Typed telemetry
//!
//! Every query has a [`TelemetryKind`] that names both the command to send
//! and the cache slot its decoded [`TelemetrySnapshot`] lands in. Queries
//! that take a channel or index carry it in the kind, so each channel owns
//! its own slot.

mod decoder;
mod flags;

pub use decoder::TelemetryDecoder;
pub use flags::{FaultFlags, StatusFlags};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::protocol::commands::mnemonic;
use crate::protocol::{
    Argument, Command, ReplyShape, ANALOG_INPUT_COUNT, PULSED_INPUT_COUNT,
};

/// Identifies a telemetry query and its cache slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    /// Battery, drive and analog supply voltages
    Volts,
    /// Motor current per channel
    MotorCurrent,
    /// Battery current
    BatteryCurrent,
    /// Motor, channel and IC temperatures
    Temperature,
    /// Absolute encoder counts per channel
    EncoderCount,
    /// Encoder speed per channel
    MotorRpm,
    /// Applied power per channel
    MotorPower,
    /// Commanded value per channel
    MotorCommanded,
    /// Closed-loop error per channel
    ClosedLoopError,
    /// Controller status flags
    Status,
    /// Fault flags
    Fault,
    /// One analog input (1-8)
    AnalogInput(u8),
    /// Every analog input
    AnalogInputs,
    /// Digital input bitmask
    DigitalInputs,
    /// Digital output bitmask
    DigitalOutputs,
    /// Every pulsed input
    PulsedInputs,
    /// One user variable (1-16)
    UserVariable(u8),
}

impl TelemetryKind {
    /// Kinds without a channel argument, in polling order
    pub const FIXED: [TelemetryKind; 15] = [
        TelemetryKind::Volts,
        TelemetryKind::MotorCurrent,
        TelemetryKind::BatteryCurrent,
        TelemetryKind::Temperature,
        TelemetryKind::EncoderCount,
        TelemetryKind::MotorRpm,
        TelemetryKind::MotorPower,
        TelemetryKind::MotorCommanded,
        TelemetryKind::ClosedLoopError,
        TelemetryKind::Status,
        TelemetryKind::Fault,
        TelemetryKind::AnalogInputs,
        TelemetryKind::DigitalInputs,
        TelemetryKind::DigitalOutputs,
        TelemetryKind::PulsedInputs,
    ];

    /// Query mnemonic
    pub fn mnemonic(&self) -> &'static str {
        match self {
            TelemetryKind::Volts => mnemonic::VOLTS,
            TelemetryKind::MotorCurrent => mnemonic::MOTOR_AMPS,
            TelemetryKind::BatteryCurrent => mnemonic::BATTERY_AMPS,
            TelemetryKind::Temperature => mnemonic::TEMPERATURE,
            TelemetryKind::EncoderCount => mnemonic::ENCODER_COUNT,
            TelemetryKind::MotorRpm => mnemonic::ENCODER_RPM,
            TelemetryKind::MotorPower => mnemonic::MOTOR_POWER,
            TelemetryKind::MotorCommanded => mnemonic::MOTOR_COMMANDED,
            TelemetryKind::ClosedLoopError => mnemonic::CLOSED_LOOP_ERROR,
            TelemetryKind::Status => mnemonic::STATUS_FLAGS,
            TelemetryKind::Fault => mnemonic::FAULT_FLAGS,
            TelemetryKind::AnalogInput(_) | TelemetryKind::AnalogInputs => mnemonic::ANALOG_INPUT,
            TelemetryKind::DigitalInputs => mnemonic::DIGITAL_INPUTS,
            TelemetryKind::DigitalOutputs => mnemonic::DIGITAL_OUTPUTS,
            TelemetryKind::PulsedInputs => mnemonic::PULSED_INPUTS,
            TelemetryKind::UserVariable(_) => mnemonic::USER_VARIABLE,
        }
    }

    /// Expected reply shape
    pub fn reply_shape(&self) -> ReplyShape {
        match self {
            TelemetryKind::Volts => ReplyShape::Tuple(3),
            TelemetryKind::Temperature => ReplyShape::Tuple(5),
            TelemetryKind::MotorCurrent
            | TelemetryKind::EncoderCount
            | TelemetryKind::MotorRpm
            | TelemetryKind::MotorPower
            | TelemetryKind::MotorCommanded
            | TelemetryKind::ClosedLoopError => ReplyShape::Tuple(2),
            TelemetryKind::BatteryCurrent
            | TelemetryKind::Status
            | TelemetryKind::Fault
            | TelemetryKind::AnalogInput(_)
            | TelemetryKind::DigitalInputs
            | TelemetryKind::DigitalOutputs
            | TelemetryKind::UserVariable(_) => ReplyShape::Single,
            TelemetryKind::AnalogInputs => ReplyShape::List {
                len: ANALOG_INPUT_COUNT,
            },
            TelemetryKind::PulsedInputs => ReplyShape::List {
                len: PULSED_INPUT_COUNT,
            },
        }
    }

    /// The query that fills this slot
    pub fn command(&self) -> Command {
        let args = match self {
            TelemetryKind::AnalogInput(channel) => vec![Argument::from(*channel)],
            TelemetryKind::UserVariable(index) => vec![Argument::from(*index)],
            _ => Vec::new(),
        };
        Command::query(self.mnemonic(), args, self.reply_shape())
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryKind::AnalogInput(channel) => return write!(f, "analog_input_{}", channel),
            TelemetryKind::UserVariable(index) => return write!(f, "user_variable_{}", index),
            TelemetryKind::Volts => "volts",
            TelemetryKind::MotorCurrent => "motor_current",
            TelemetryKind::BatteryCurrent => "battery_current",
            TelemetryKind::Temperature => "temperature",
            TelemetryKind::EncoderCount => "encoder_count",
            TelemetryKind::MotorRpm => "motor_rpm",
            TelemetryKind::MotorPower => "motor_power",
            TelemetryKind::MotorCommanded => "motor_commanded",
            TelemetryKind::ClosedLoopError => "closed_loop_error",
            TelemetryKind::Status => "status",
            TelemetryKind::Fault => "fault",
            TelemetryKind::AnalogInputs => "analog_inputs",
            TelemetryKind::DigitalInputs => "digital_inputs",
            TelemetryKind::DigitalOutputs => "digital_outputs",
            TelemetryKind::PulsedInputs => "pulsed_inputs",
        };
        f.write_str(name)
    }
}

/// One decoded query reply. Channel order is fixed: left is channel 1,
/// right is channel 2. `None` marks a reading the controller reported as
/// unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetrySnapshot {
    /// Encoder speed in RPM
    MotorSpeeds {
        /// Channel 1
        left: i32,
        /// Channel 2
        right: i32,
    },
    /// Motor current in amps
    MotorCurrents {
        /// Channel 1
        left: Option<f64>,
        /// Channel 2
        right: Option<f64>,
    },
    /// Battery current in amps
    BatteryCurrent {
        /// Current drawn from the battery
        amps: Option<f64>,
    },
    /// Supply voltages in volts
    Voltages {
        /// Main battery
        battery: Option<f64>,
        /// Internal drive supply
        drive: Option<f64>,
        /// 5 V output
        analog: Option<f64>,
    },
    /// Temperatures in degrees Celsius
    Temperatures {
        /// Motor sensors, channel 1 first
        motor: [Option<f64>; 2],
        /// Power stage heatsinks, channel 1 first
        channel: [Option<f64>; 2],
        /// Controller IC
        ic: Option<f64>,
    },
    /// Absolute encoder counts
    EncoderCounts {
        /// Channel 1
        left: i64,
        /// Channel 2
        right: i64,
    },
    /// Applied power, -1000 to 1000
    MotorPower {
        /// Channel 1
        left: i32,
        /// Channel 2
        right: i32,
    },
    /// Commanded value, -1000 to 1000
    MotorCommanded {
        /// Channel 1
        left: i32,
        /// Channel 2
        right: i32,
    },
    /// Closed-loop error
    ClosedLoopError {
        /// Channel 1
        left: i32,
        /// Channel 2
        right: i32,
    },
    /// Controller status
    Status {
        /// Raised status bits
        flags: StatusFlags,
    },
    /// Active faults
    Fault {
        /// Raised fault bits
        flags: FaultFlags,
    },
    /// One analog input in volts
    AnalogInput {
        /// Input number, 1-based
        channel: u8,
        /// Reading
        volts: Option<f64>,
    },
    /// Every analog input in volts
    AnalogInputs {
        /// One reading per input, input 1 first
        volts: Vec<Option<f64>>,
    },
    /// Digital inputs
    DigitalInputs {
        /// Input 1 in bit 0
        bits: u32,
    },
    /// Digital outputs
    DigitalOutputs {
        /// Output 1 in bit 0
        bits: u32,
    },
    /// Pulsed inputs
    PulsedInputs {
        /// Raw values, input 1 first
        values: Vec<i32>,
    },
    /// User variable value
    UserVariable {
        /// Variable number, 1-based
        index: u8,
        /// Stored value
        value: i32,
    },
}

impl TelemetrySnapshot {
    /// Slot this snapshot belongs to
    pub fn kind(&self) -> TelemetryKind {
        match self {
            TelemetrySnapshot::MotorSpeeds { .. } => TelemetryKind::MotorRpm,
            TelemetrySnapshot::MotorCurrents { .. } => TelemetryKind::MotorCurrent,
            TelemetrySnapshot::BatteryCurrent { .. } => TelemetryKind::BatteryCurrent,
            TelemetrySnapshot::Voltages { .. } => TelemetryKind::Volts,
            TelemetrySnapshot::Temperatures { .. } => TelemetryKind::Temperature,
            TelemetrySnapshot::EncoderCounts { .. } => TelemetryKind::EncoderCount,
            TelemetrySnapshot::MotorPower { .. } => TelemetryKind::MotorPower,
            TelemetrySnapshot::MotorCommanded { .. } => TelemetryKind::MotorCommanded,
            TelemetrySnapshot::ClosedLoopError { .. } => TelemetryKind::ClosedLoopError,
            TelemetrySnapshot::Status { .. } => TelemetryKind::Status,
            TelemetrySnapshot::Fault { .. } => TelemetryKind::Fault,
            TelemetrySnapshot::AnalogInput { channel, .. } => TelemetryKind::AnalogInput(*channel),
            TelemetrySnapshot::AnalogInputs { .. } => TelemetryKind::AnalogInputs,
            TelemetrySnapshot::DigitalInputs { .. } => TelemetryKind::DigitalInputs,
            TelemetrySnapshot::DigitalOutputs { .. } => TelemetryKind::DigitalOutputs,
            TelemetrySnapshot::PulsedInputs { .. } => TelemetryKind::PulsedInputs,
            TelemetrySnapshot::UserVariable { index, .. } => TelemetryKind::UserVariable(*index),
        }
    }
}

/// A snapshot with the time its reply was decoded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedSnapshot {
    /// Decoded value
    pub snapshot: TelemetrySnapshot,
    /// When the reply was decoded
    pub received_at: DateTime<Utc>,
}

/// Latest snapshot per slot.
///
/// Slots are only written with snapshots that decoded completely; there is
/// no consistency between slots.
#[derive(Debug, Default)]
pub struct TelemetryCache {
    slots: RwLock<HashMap<TelemetryKind, CachedSnapshot>>,
}

impl TelemetryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot of `snapshot`, returning the stored entry
    pub fn store(&self, snapshot: TelemetrySnapshot) -> CachedSnapshot {
        let entry = CachedSnapshot {
            snapshot,
            received_at: Utc::now(),
        };
        self.slots
            .write()
            .insert(entry.snapshot.kind(), entry.clone());
        entry
    }

    /// Latest snapshot for `kind`
    pub fn latest(&self, kind: TelemetryKind) -> Option<CachedSnapshot> {
        self.slots.read().get(&kind).cloned()
    }

    /// Latest snapshot value for `kind`, without timestamp
    pub fn value(&self, kind: TelemetryKind) -> Option<TelemetrySnapshot> {
        self.slots.read().get(&kind).map(|entry| entry.snapshot.clone())
    }

    /// Every populated slot, ordered by kind
    pub fn entries(&self) -> Vec<CachedSnapshot> {
        let mut entries: Vec<_> = self.slots.read().values().cloned().collect();
        entries.sort_by_key(|entry| entry.snapshot.kind());
        entries
    }

    /// Number of populated slots
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no slot is populated
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Drop every slot
    pub fn clear(&self) {
        self.slots.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameCodec;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_commands() {
        let line = |kind: TelemetryKind| {
            String::from_utf8(FrameCodec::encode(&kind.command()).unwrap()).unwrap()
        };
        assert_eq!(line(TelemetryKind::Volts), "?V\r");
        assert_eq!(line(TelemetryKind::Temperature), "?T\r");
        assert_eq!(line(TelemetryKind::AnalogInput(3)), "?AI 3\r");
        assert_eq!(line(TelemetryKind::AnalogInputs), "?AI\r");
        assert_eq!(line(TelemetryKind::UserVariable(16)), "?VAR 16\r");

        for kind in TelemetryKind::FIXED {
            assert!(FrameCodec::encode(&kind.command()).is_ok(), "{}", kind);
        }
    }

    #[test]
    fn test_out_of_range_channel_is_rejected() {
        assert!(FrameCodec::encode(&TelemetryKind::AnalogInput(9).command()).is_err());
        assert!(FrameCodec::encode(&TelemetryKind::UserVariable(0).command()).is_err());
    }

    #[test]
    fn test_snapshot_kind_per_channel() {
        let a = TelemetrySnapshot::AnalogInput {
            channel: 2,
            volts: Some(1.5),
        };
        assert_eq!(a.kind(), TelemetryKind::AnalogInput(2));
        assert_ne!(a.kind(), TelemetryKind::AnalogInput(3));
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = TelemetrySnapshot::Voltages {
            battery: Some(24.1),
            drive: None,
            analog: Some(5.0),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "voltages", "battery": 24.1, "drive": null, "analog": 5.0})
        );
        let back: TelemetrySnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_cache_slots() {
        let cache = TelemetryCache::new();
        assert!(cache.is_empty());

        cache.store(TelemetrySnapshot::EncoderCounts { left: 1, right: 2 });
        cache.store(TelemetrySnapshot::EncoderCounts { left: 3, right: 4 });
        cache.store(TelemetrySnapshot::UserVariable { index: 1, value: 7 });
        cache.store(TelemetrySnapshot::UserVariable { index: 2, value: 8 });

        assert_eq!(cache.len(), 3);
        assert_eq!(
            cache.value(TelemetryKind::EncoderCount),
            Some(TelemetrySnapshot::EncoderCounts { left: 3, right: 4 })
        );
        assert_eq!(
            cache.value(TelemetryKind::UserVariable(2)),
            Some(TelemetrySnapshot::UserVariable { index: 2, value: 8 })
        );
        assert!(cache.latest(TelemetryKind::Volts).is_none());

        let kinds: Vec<_> = cache.entries().iter().map(|e| e.snapshot.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                TelemetryKind::EncoderCount,
                TelemetryKind::UserVariable(1),
                TelemetryKind::UserVariable(2)
            ]
        );

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TelemetryKind::MotorRpm.to_string(), "motor_rpm");
        assert_eq!(TelemetryKind::AnalogInput(4).to_string(), "analog_input_4");
    }
}
