//! Telemetry decoder
//!
//! Turns the tokens of a validated query reply into a [`TelemetrySnapshot`].
//! Analog measurements arrive as scaled integers (tenths of volts, amps and
//! degrees, millivolts for analog inputs) and the sentinel `-32768` marks a
//! reading the controller could not take. Decoding is all or nothing: any
//! missing or unparsable field fails the whole reply.

use std::str::FromStr;

use super::{FaultFlags, StatusFlags, TelemetryKind, TelemetrySnapshot};
use crate::protocol::{
    FormatError, RawResponse, ANALOG_INPUT_COUNT, PULSED_INPUT_COUNT, UNAVAILABLE_SENTINEL,
};

/// Tenths of a volt, amp or degree
const TENTHS: f64 = 10.0;
/// Millivolts
const MILLI: f64 = 1000.0;

/// Stateless reply interpreter
pub struct TelemetryDecoder;

impl TelemetryDecoder {
    /// Decode the reply to the query of `kind`
    pub fn decode(
        kind: TelemetryKind,
        response: &RawResponse,
    ) -> Result<TelemetrySnapshot, FormatError> {
        let fields = Fields {
            mnemonic: kind.mnemonic(),
            tokens: &response.tokens,
        };

        let snapshot = match kind {
            TelemetryKind::Volts => TelemetrySnapshot::Voltages {
                battery: fields.measurement(0, TENTHS)?,
                drive: fields.measurement(1, TENTHS)?,
                analog: fields.measurement(2, TENTHS)?,
            },
            TelemetryKind::MotorCurrent => TelemetrySnapshot::MotorCurrents {
                left: fields.measurement(0, TENTHS)?,
                right: fields.measurement(1, TENTHS)?,
            },
            TelemetryKind::BatteryCurrent => TelemetrySnapshot::BatteryCurrent {
                amps: fields.measurement(0, TENTHS)?,
            },
            TelemetryKind::Temperature => TelemetrySnapshot::Temperatures {
                motor: [fields.measurement(0, TENTHS)?, fields.measurement(1, TENTHS)?],
                channel: [fields.measurement(2, TENTHS)?, fields.measurement(3, TENTHS)?],
                ic: fields.measurement(4, TENTHS)?,
            },
            TelemetryKind::EncoderCount => TelemetrySnapshot::EncoderCounts {
                left: fields.parse(0, "i64")?,
                right: fields.parse(1, "i64")?,
            },
            TelemetryKind::MotorRpm => TelemetrySnapshot::MotorSpeeds {
                left: fields.parse(0, "i32")?,
                right: fields.parse(1, "i32")?,
            },
            TelemetryKind::MotorPower => TelemetrySnapshot::MotorPower {
                left: fields.parse(0, "i32")?,
                right: fields.parse(1, "i32")?,
            },
            TelemetryKind::MotorCommanded => TelemetrySnapshot::MotorCommanded {
                left: fields.parse(0, "i32")?,
                right: fields.parse(1, "i32")?,
            },
            TelemetryKind::ClosedLoopError => TelemetrySnapshot::ClosedLoopError {
                left: fields.parse(0, "i32")?,
                right: fields.parse(1, "i32")?,
            },
            TelemetryKind::Status => TelemetrySnapshot::Status {
                flags: StatusFlags::from_raw(fields.parse(0, "u32")?),
            },
            TelemetryKind::Fault => TelemetrySnapshot::Fault {
                flags: FaultFlags::from_raw(fields.parse(0, "u32")?),
            },
            TelemetryKind::AnalogInput(channel) => TelemetrySnapshot::AnalogInput {
                channel,
                volts: fields.measurement(0, MILLI)?,
            },
            TelemetryKind::AnalogInputs => TelemetrySnapshot::AnalogInputs {
                volts: fields.list(ANALOG_INPUT_COUNT, |i| fields.measurement(i, MILLI))?,
            },
            TelemetryKind::DigitalInputs => TelemetrySnapshot::DigitalInputs {
                bits: fields.parse(0, "u32")?,
            },
            TelemetryKind::DigitalOutputs => TelemetrySnapshot::DigitalOutputs {
                bits: fields.parse(0, "u32")?,
            },
            TelemetryKind::PulsedInputs => TelemetrySnapshot::PulsedInputs {
                values: fields.list(PULSED_INPUT_COUNT, |i| fields.parse(i, "i32"))?,
            },
            TelemetryKind::UserVariable(index) => TelemetrySnapshot::UserVariable {
                index,
                value: fields.parse(0, "i32")?,
            },
        };

        Ok(snapshot)
    }
}

struct Fields<'a> {
    mnemonic: &'static str,
    tokens: &'a [String],
}

impl Fields<'_> {
    fn raw(&self, index: usize) -> Result<&str, FormatError> {
        self.tokens
            .get(index)
            .map(|token| token.as_str())
            .ok_or(FormatError::MissingField {
                mnemonic: self.mnemonic,
                index,
            })
    }

    fn parse<T: FromStr>(&self, index: usize, expected: &'static str) -> Result<T, FormatError> {
        let token = self.raw(index)?;
        token.parse().map_err(|_| FormatError::InvalidField {
            mnemonic: self.mnemonic,
            index,
            token: token.to_string(),
            expected,
        })
    }

    /// Scaled reading, `None` when the controller sent the sentinel
    fn measurement(&self, index: usize, scale: f64) -> Result<Option<f64>, FormatError> {
        let raw: i64 = self.parse(index, "integer")?;
        if raw == UNAVAILABLE_SENTINEL {
            return Ok(None);
        }
        Ok(Some(raw as f64 / scale))
    }

    /// Decode the first `len` tokens, failing on the first bad or missing one
    fn list<T>(
        &self,
        len: usize,
        decode: impl Fn(usize) -> Result<T, FormatError>,
    ) -> Result<Vec<T>, FormatError> {
        (0..len).map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameCodec;
    use pretty_assertions::assert_eq;

    fn reply(line: &str) -> RawResponse {
        FrameCodec::decode(format!("{}\r", line).as_bytes()).unwrap()
    }

    fn decode(kind: TelemetryKind, line: &str) -> Result<TelemetrySnapshot, FormatError> {
        TelemetryDecoder::decode(kind, &reply(line))
    }

    #[test]
    fn test_volts() {
        assert_eq!(
            decode(TelemetryKind::Volts, "+V=123:241:87").unwrap(),
            TelemetrySnapshot::Voltages {
                battery: Some(12.3),
                drive: Some(24.1),
                analog: Some(8.7),
            }
        );
    }

    #[test]
    fn test_sentinel_is_unavailable() {
        assert_eq!(
            decode(TelemetryKind::Volts, "+V=-32768:241:87").unwrap(),
            TelemetrySnapshot::Voltages {
                battery: None,
                drive: Some(24.1),
                analog: Some(8.7),
            }
        );
        assert_eq!(
            decode(TelemetryKind::AnalogInput(2), "+AI=-32768").unwrap(),
            TelemetrySnapshot::AnalogInput {
                channel: 2,
                volts: None
            }
        );
    }

    #[test]
    fn test_negative_readings_are_not_sentinels() {
        assert_eq!(
            decode(TelemetryKind::MotorCurrent, "+A=-52:0").unwrap(),
            TelemetrySnapshot::MotorCurrents {
                left: Some(-5.2),
                right: Some(0.0),
            }
        );
    }

    #[test]
    fn test_temperatures() {
        assert_eq!(
            decode(TelemetryKind::Temperature, "+T=315:320:405:410:455").unwrap(),
            TelemetrySnapshot::Temperatures {
                motor: [Some(31.5), Some(32.0)],
                channel: [Some(40.5), Some(41.0)],
                ic: Some(45.5),
            }
        );
    }

    #[test]
    fn test_channel_pairs() {
        assert_eq!(
            decode(TelemetryKind::EncoderCount, "+C=-4000000000:12").unwrap(),
            TelemetrySnapshot::EncoderCounts {
                left: -4_000_000_000,
                right: 12
            }
        );
        assert_eq!(
            decode(TelemetryKind::MotorRpm, "+S=1200:-1190").unwrap(),
            TelemetrySnapshot::MotorSpeeds {
                left: 1200,
                right: -1190
            }
        );
        assert_eq!(
            decode(TelemetryKind::ClosedLoopError, "+E=3:-2").unwrap(),
            TelemetrySnapshot::ClosedLoopError { left: 3, right: -2 }
        );
    }

    #[test]
    fn test_flags() {
        match decode(TelemetryKind::Fault, "+FF=17").unwrap() {
            TelemetrySnapshot::Fault { flags } => {
                assert_eq!(flags, FaultFlags::OVERHEAT | FaultFlags::EMERGENCY_STOP)
            }
            other => panic!("unexpected {:?}", other),
        }
        match decode(TelemetryKind::Status, "+FS=448").unwrap() {
            TelemetrySnapshot::Status { flags } => {
                assert_eq!(flags.bits(), 448);
                assert!(flags.contains(StatusFlags::SCRIPT_RUNNING));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            decode(TelemetryKind::AnalogInputs, "+AI=1250:-32768:4999:0:0:0:0:5000").unwrap(),
            TelemetrySnapshot::AnalogInputs {
                volts: vec![
                    Some(1.25),
                    None,
                    Some(4.999),
                    Some(0.0),
                    Some(0.0),
                    Some(0.0),
                    Some(0.0),
                    Some(5.0)
                ]
            }
        );
        assert_eq!(
            decode(TelemetryKind::PulsedInputs, "+PI=0:1500:0:7").unwrap(),
            TelemetrySnapshot::PulsedInputs {
                values: vec![0, 1500, 0, 7]
            }
        );
    }

    #[test]
    fn test_indexed() {
        assert_eq!(
            decode(TelemetryKind::UserVariable(4), "+VAR=-17").unwrap(),
            TelemetrySnapshot::UserVariable {
                index: 4,
                value: -17
            }
        );
        assert_eq!(
            decode(TelemetryKind::DigitalOutputs, "+DO=5").unwrap(),
            TelemetrySnapshot::DigitalOutputs { bits: 5 }
        );
    }

    #[test]
    fn test_bad_token_is_format_error() {
        assert_eq!(
            decode(TelemetryKind::Volts, "+V=123:abc:87"),
            Err(FormatError::InvalidField {
                mnemonic: "V",
                index: 1,
                token: "abc".into(),
                expected: "integer",
            })
        );
        assert!(matches!(
            decode(TelemetryKind::MotorRpm, "+S=99999999999:0"),
            Err(FormatError::InvalidField { index: 0, .. })
        ));
        assert!(matches!(
            decode(TelemetryKind::PulsedInputs, "+PI=1:x:3:4"),
            Err(FormatError::InvalidField { index: 1, .. })
        ));
    }

    #[test]
    fn test_missing_field_never_yields_partial_snapshot() {
        assert_eq!(
            decode(TelemetryKind::Volts, "+V=123:241"),
            Err(FormatError::MissingField {
                mnemonic: "V",
                index: 2
            })
        );
        assert!(decode(TelemetryKind::AnalogInputs, "+AI=").is_err());
        assert_eq!(
            decode(TelemetryKind::PulsedInputs, "+PI=1:2:3"),
            Err(FormatError::MissingField {
                mnemonic: "PI",
                index: 3
            })
        );
    }
}
