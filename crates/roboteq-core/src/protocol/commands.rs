//! Protocol commands
//!
//! Defines the runtime commands and queries understood by the controller.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ANALOG_INPUT_COUNT, ARGUMENT_DELIMITER, QUERY_PREFIX, RUNTIME_PREFIX};

/// Mnemonics of the supported commands and queries
pub mod mnemonic {
    /// Set motor command (`!G ch value`)
    pub const SET_SETPOINT: &str = "G";
    /// Emergency stop (`!EX`)
    pub const EMERGENCY_STOP: &str = "EX";
    /// Release emergency stop (`!MG`)
    pub const RELEASE_STOP: &str = "MG";
    /// Set one digital output (`!D1 n`)
    pub const SET_DIGITAL_OUT: &str = "D1";
    /// Reset one digital output (`!D0 n`)
    pub const RESET_DIGITAL_OUT: &str = "D0";
    /// User variable, as runtime command (`!VAR n v`) or query (`?VAR n`)
    pub const USER_VARIABLE: &str = "VAR";

    /// Battery, drive and analog supply voltages
    pub const VOLTS: &str = "V";
    /// Motor amps per channel
    pub const MOTOR_AMPS: &str = "A";
    /// Battery amps
    pub const BATTERY_AMPS: &str = "BA";
    /// Motor, channel and IC temperatures
    pub const TEMPERATURE: &str = "T";
    /// Absolute encoder counts
    pub const ENCODER_COUNT: &str = "C";
    /// Encoder speed in RPM
    pub const ENCODER_RPM: &str = "S";
    /// Applied motor power
    pub const MOTOR_POWER: &str = "P";
    /// Commanded motor setpoint
    pub const MOTOR_COMMANDED: &str = "M";
    /// Closed loop error
    pub const CLOSED_LOOP_ERROR: &str = "E";
    /// Status flags
    pub const STATUS_FLAGS: &str = "FS";
    /// Fault flags
    pub const FAULT_FLAGS: &str = "FF";
    /// Analog inputs
    pub const ANALOG_INPUT: &str = "AI";
    /// Digital inputs bitmask
    pub const DIGITAL_INPUTS: &str = "D";
    /// Digital outputs bitmask
    pub const DIGITAL_OUTPUTS: &str = "DO";
    /// Pulsed inputs
    pub const PULSED_INPUTS: &str = "PI";
    /// Firmware identification string
    pub const FIRMWARE_ID: &str = "FID";
}

/// Whether a command changes controller state or asks for data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// State-changing directive, answered by a bare acknowledgement
    Runtime,
    /// Data request, answered by a value payload
    Query,
}

impl CommandKind {
    /// Line prefix of this kind
    pub fn prefix(&self) -> char {
        match self {
            CommandKind::Runtime => RUNTIME_PREFIX,
            CommandKind::Query => QUERY_PREFIX,
        }
    }

    /// Kind for a line prefix, if it is one
    pub fn from_prefix(c: char) -> Option<Self> {
        match c {
            RUNTIME_PREFIX => Some(CommandKind::Runtime),
            QUERY_PREFIX => Some(CommandKind::Query),
            _ => None,
        }
    }
}

/// A single command argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Argument {
    /// Signed integer argument
    Int(i64),
    /// Bare ASCII token
    Text(String),
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Int(v) => write!(f, "{}", v),
            Argument::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Argument {
    fn from(v: i64) -> Self {
        Argument::Int(v)
    }
}

impl From<i32> for Argument {
    fn from(v: i32) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<u8> for Argument {
    fn from(v: u8) -> Self {
        Argument::Int(v as i64)
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Argument::Text(s.to_string())
    }
}

/// What a successful reply must look like
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyShape {
    /// Bare acknowledgement, no values
    None,
    /// Exactly one value
    Single,
    /// Exactly this many values
    Tuple(usize),
    /// A delimited list of exactly `len` values of one type
    List {
        /// Number of values
        len: usize,
    },
    /// Free text, at least one token
    Text,
}

impl ReplyShape {
    /// Check a reply's token count against this shape
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            ReplyShape::None => count == 0,
            ReplyShape::Single => count == 1,
            ReplyShape::Tuple(n) => count == n,
            ReplyShape::List { len } => count == len,
            ReplyShape::Text => count >= 1,
        }
    }
}

impl fmt::Display for ReplyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyShape::None => f.write_str("no values"),
            ReplyShape::Single => f.write_str("1 value"),
            ReplyShape::Tuple(n) => write!(f, "{} values", n),
            ReplyShape::List { len } => write!(f, "a list of {} values", len),
            ReplyShape::Text => f.write_str("text"),
        }
    }
}

/// Inclusive numeric limits of the arguments of known commands.
///
/// Runtime commands must supply every listed argument; queries may omit
/// trailing ones (`?AI` reads every analog input, `?AI 3` reads one).
/// Unknown mnemonics return `None` and are only checked for syntax.
pub fn argument_limits(kind: CommandKind, name: &str) -> Option<&'static [(i64, i64)]> {
    const I32: (i64, i64) = (i32::MIN as i64, i32::MAX as i64);
    let limits: &'static [(i64, i64)] = match (kind, name) {
        (CommandKind::Runtime, mnemonic::SET_SETPOINT) => &[(0, 2), (-1000, 1000)],
        (CommandKind::Runtime, mnemonic::EMERGENCY_STOP)
        | (CommandKind::Runtime, mnemonic::RELEASE_STOP) => &[],
        (CommandKind::Runtime, mnemonic::SET_DIGITAL_OUT)
        | (CommandKind::Runtime, mnemonic::RESET_DIGITAL_OUT) => &[(1, 8)],
        (CommandKind::Runtime, mnemonic::USER_VARIABLE) => &[(1, 16), I32],
        (CommandKind::Query, mnemonic::USER_VARIABLE) => &[(1, 16)],
        (CommandKind::Query, mnemonic::ANALOG_INPUT) => &[(1, ANALOG_INPUT_COUNT as i64)],
        (CommandKind::Query, mnemonic::VOLTS)
        | (CommandKind::Query, mnemonic::MOTOR_AMPS)
        | (CommandKind::Query, mnemonic::BATTERY_AMPS)
        | (CommandKind::Query, mnemonic::TEMPERATURE)
        | (CommandKind::Query, mnemonic::ENCODER_COUNT)
        | (CommandKind::Query, mnemonic::ENCODER_RPM)
        | (CommandKind::Query, mnemonic::MOTOR_POWER)
        | (CommandKind::Query, mnemonic::MOTOR_COMMANDED)
        | (CommandKind::Query, mnemonic::CLOSED_LOOP_ERROR)
        | (CommandKind::Query, mnemonic::STATUS_FLAGS)
        | (CommandKind::Query, mnemonic::FAULT_FLAGS)
        | (CommandKind::Query, mnemonic::DIGITAL_INPUTS)
        | (CommandKind::Query, mnemonic::DIGITAL_OUTPUTS)
        | (CommandKind::Query, mnemonic::PULSED_INPUTS)
        | (CommandKind::Query, mnemonic::FIRMWARE_ID) => &[],
        _ => return None,
    };
    Some(limits)
}

/// An outgoing directive, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    kind: CommandKind,
    mnemonic: String,
    args: Vec<Argument>,
    reply: ReplyShape,
    retryable: bool,
}

impl Command {
    /// Create a command. Commands are retryable unless marked otherwise.
    pub fn new(
        kind: CommandKind,
        mnemonic: impl Into<String>,
        args: Vec<Argument>,
        reply: ReplyShape,
    ) -> Self {
        Self {
            kind,
            mnemonic: mnemonic.into(),
            args,
            reply,
            retryable: true,
        }
    }

    /// Create a runtime command expecting a bare acknowledgement
    pub fn runtime(mnemonic: impl Into<String>, args: Vec<Argument>) -> Self {
        Self::new(CommandKind::Runtime, mnemonic, args, ReplyShape::None)
    }

    /// Create a query with the given reply shape
    pub fn query(mnemonic: impl Into<String>, args: Vec<Argument>, reply: ReplyShape) -> Self {
        Self::new(CommandKind::Query, mnemonic, args, reply)
    }

    /// Mark this command as unsafe to re-send after a failed attempt
    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Command kind
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Command mnemonic, without prefix
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Ordered arguments
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Expected reply shape
    pub fn reply_shape(&self) -> ReplyShape {
        self.reply
    }

    /// Whether a failed attempt may be re-sent
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Whether this is a query
    pub fn is_query(&self) -> bool {
        self.kind == CommandKind::Query
    }

    /// Motor setpoint for one channel (1 or 2), or both channels with 0.
    /// Values run from -1000 to 1000.
    pub fn set_setpoint(channel: u8, value: i32) -> Self {
        Self::runtime(
            mnemonic::SET_SETPOINT,
            vec![Argument::from(channel), Argument::from(value)],
        )
    }

    /// Emergency stop
    pub fn set_estop() -> Self {
        Self::runtime(mnemonic::EMERGENCY_STOP, Vec::new())
    }

    /// Release a previous emergency stop
    pub fn reset_estop() -> Self {
        Self::runtime(mnemonic::RELEASE_STOP, Vec::new())
    }

    /// Activate digital output `output` (1-8)
    pub fn set_dio(output: u8) -> Self {
        Self::runtime(mnemonic::SET_DIGITAL_OUT, vec![Argument::from(output)])
    }

    /// Deactivate digital output `output` (1-8)
    pub fn reset_dio(output: u8) -> Self {
        Self::runtime(mnemonic::RESET_DIGITAL_OUT, vec![Argument::from(output)])
    }

    /// Write user variable `index` (1-16)
    pub fn set_var(index: u8, value: i32) -> Self {
        Self::runtime(
            mnemonic::USER_VARIABLE,
            vec![Argument::from(index), Argument::from(value)],
        )
    }

    /// Firmware identification query, used as a presence probe
    pub fn firmware_id() -> Self {
        Self::query(mnemonic::FIRMWARE_ID, Vec::new(), ReplyShape::Text)
    }
}

impl fmt::Display for Command {
    /// Wire form without the terminator, e.g. `!G 1 500`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.mnemonic)?;
        for arg in &self.args {
            write!(f, "{}{}", ARGUMENT_DELIMITER, arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        assert_eq!(Command::set_setpoint(1, -250).to_string(), "!G 1 -250");
        assert_eq!(Command::set_estop().to_string(), "!EX");
        assert_eq!(Command::reset_estop().to_string(), "!MG");
        assert_eq!(Command::set_var(3, 42).to_string(), "!VAR 3 42");
        assert_eq!(Command::firmware_id().to_string(), "?FID");
    }

    #[test]
    fn test_runtime_commands_expect_bare_ack() {
        for cmd in [
            Command::set_setpoint(0, 0),
            Command::set_estop(),
            Command::reset_estop(),
            Command::set_dio(1),
            Command::reset_dio(1),
            Command::set_var(1, 1),
        ] {
            assert_eq!(cmd.kind(), CommandKind::Runtime);
            assert_eq!(cmd.reply_shape(), ReplyShape::None);
            assert!(cmd.is_retryable());
        }
    }

    #[test]
    fn test_non_retryable() {
        let cmd = Command::set_dio(2).non_retryable();
        assert!(!cmd.is_retryable());
        assert_eq!(cmd.mnemonic(), "D1");
    }

    #[test]
    fn test_reply_shape_accepts() {
        assert!(ReplyShape::None.accepts(0));
        assert!(!ReplyShape::None.accepts(1));
        assert!(ReplyShape::Single.accepts(1));
        assert!(ReplyShape::Tuple(3).accepts(3));
        assert!(!ReplyShape::Tuple(3).accepts(2));
        assert!(ReplyShape::List { len: 8 }.accepts(8));
        assert!(!ReplyShape::List { len: 8 }.accepts(7));
        assert!(!ReplyShape::List { len: 8 }.accepts(9));
        assert!(ReplyShape::Text.accepts(2));
    }

    #[test]
    fn test_argument_limits() {
        assert_eq!(
            argument_limits(CommandKind::Runtime, "G"),
            Some(&[(0, 2), (-1000, 1000)][..])
        );
        assert_eq!(argument_limits(CommandKind::Query, "V"), Some(&[][..]));
        assert_eq!(argument_limits(CommandKind::Query, "XYZ"), None);
    }

    #[test]
    fn test_prefix_roundtrip() {
        for kind in [CommandKind::Runtime, CommandKind::Query] {
            assert_eq!(CommandKind::from_prefix(kind.prefix()), Some(kind));
        }
        assert_eq!(CommandKind::from_prefix('+'), None);
    }
}
