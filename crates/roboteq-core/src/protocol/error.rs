//! Protocol errors

use thiserror::Error;

/// A command argument cannot be represented on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// A numeric argument is outside the command's limits
    #[error("argument {index} of '{mnemonic}' out of range: {value} not in {min}..={max}")]
    OutOfRange {
        /// Command mnemonic
        mnemonic: String,
        /// Zero-based argument position
        index: usize,
        /// Offending value
        value: i64,
        /// Lowest accepted value
        min: i64,
        /// Highest accepted value
        max: i64,
    },

    /// Too many arguments, or too few required ones
    #[error("'{mnemonic}' expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        /// Command mnemonic
        mnemonic: String,
        /// Arguments the command takes
        expected: usize,
        /// Arguments given
        actual: usize,
    },

    /// Empty, non-ASCII, or containing a delimiter or terminator
    #[error("text argument {index} of '{mnemonic}' is not a printable ASCII token: {text:?}")]
    InvalidText {
        /// Command mnemonic
        mnemonic: String,
        /// Zero-based argument position
        index: usize,
        /// Offending text
        text: String,
    },

    /// Mnemonic is empty or not alphanumeric ASCII
    #[error("invalid mnemonic: {0:?}")]
    InvalidMnemonic(String),
}

/// A received line could not be split into a response
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Truncated read; carries the number of bytes received
    #[error("line not terminated by carriage return ({0} bytes received)")]
    MissingTerminator(usize),

    /// Line noise or a baud rate mismatch
    #[error("line contains non-ASCII byte {byte:#04x} at offset {offset}")]
    NotAscii {
        /// Offending byte
        byte: u8,
        /// Position in the line
        offset: usize,
    },
}

/// A validated reply carried a field that does not parse as its expected type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A token does not parse as its field's type
    #[error("'{mnemonic}' field {index}: cannot parse {token:?} as {expected}")]
    InvalidField {
        /// Query mnemonic
        mnemonic: &'static str,
        /// Zero-based field position
        index: usize,
        /// Offending token
        token: String,
        /// Type the field should have
        expected: &'static str,
    },

    /// The reply ended before this field
    #[error("'{mnemonic}' reply is missing field {index}")]
    MissingField {
        /// Query mnemonic
        mnemonic: &'static str,
        /// Zero-based field position
        index: usize,
    },
}

/// Errors that can occur during a command/response exchange
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Command could not be encoded; nothing was sent
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Reply line could not be framed
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// No usable reply before the last attempt's deadline
    #[error("No reply after {attempts} attempt(s)")]
    Timeout {
        /// Attempts made
        attempts: u32,
    },

    /// The transport failed; the link is marked down
    #[error("Serial link error: {0}")]
    Link(String),

    /// The controller answered with a rejection
    #[error("Controller rejected '{command}'")]
    NegativeAcknowledgement {
        /// Command line that was rejected
        command: String,
    },

    /// The reply does not fit the command
    #[error("Malformed reply to '{command}': {reason}")]
    MalformedReply {
        /// Command line that was sent
        command: String,
        /// What did not fit
        reason: String,
    },

    /// A reply field did not decode
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// `try_execute` found the link in use
    #[error("Another exchange is in flight")]
    Busy,

    /// No candidate serial device could be opened
    #[error("Port not found: {0}")]
    PortNotFound(String),
}

impl ProtocolError {
    /// Whether a failed attempt with this error may be re-sent
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::Framing(_)
                | ProtocolError::Timeout { .. }
                | ProtocolError::MalformedReply { .. }
        )
    }

    /// Whether this error means the serial link itself failed
    pub fn is_link_error(&self) -> bool {
        matches!(self, ProtocolError::Link(_) | ProtocolError::PortNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProtocolError::Timeout { attempts: 3 }.is_retryable());
        assert!(ProtocolError::Framing(FramingError::MissingTerminator(4)).is_retryable());
        assert!(ProtocolError::MalformedReply {
            command: "?V".into(),
            reason: "2 fields".into()
        }
        .is_retryable());

        assert!(!ProtocolError::NegativeAcknowledgement { command: "!EX".into() }.is_retryable());
        assert!(!ProtocolError::Link("gone".into()).is_retryable());
        assert!(!ProtocolError::Format(FormatError::MissingField {
            mnemonic: "V",
            index: 2
        })
        .is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = ProtocolError::from(EncodingError::OutOfRange {
            mnemonic: "G".into(),
            index: 1,
            value: 2000,
            min: -1000,
            max: 1000,
        });
        assert_eq!(
            err.to_string(),
            "Encoding error: argument 1 of 'G' out of range: 2000 not in -1000..=1000"
        );
        assert_eq!(
            ProtocolError::Timeout { attempts: 3 }.to_string(),
            "No reply after 3 attempt(s)"
        );
    }
}
