//! Serial Protocol Communication
//!
//! Implements the Roboteq ASCII runtime command/query protocol.
//!
//! Commands are single lines terminated by a carriage return. Runtime
//! commands start with `!` and are answered by a bare acknowledgement
//! (`+`) or rejection (`-`); queries start with `?` and are answered by an
//! acknowledged `MNEMONIC=v1:v2:...` line. The link is half-duplex, so the
//! [`Dispatcher`] allows exactly one exchange on the wire at a time.

pub mod codec;
pub mod commands;
mod dispatcher;
mod error;
pub mod serial;
mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use codec::{FrameCodec, RawResponse};
pub use commands::{Argument, Command, CommandKind, ReplyShape};
pub use dispatcher::{DispatchState, Dispatcher, LinkState, RetryPolicy};
pub use error::{EncodingError, FormatError, FramingError, ProtocolError};
pub use serial::{clear_buffers, configure_port, open_port, SerialTransport};
pub use transport::{Transport, TransportError};

/// Carriage return, terminates every line in both directions
pub const ASCII_CR_CODE: u8 = 13;

/// Line feed, ignored when it trails a previous carriage return
pub const ASCII_LF_CODE: u8 = 10;

/// First byte of a positive acknowledgement (`+`)
pub const ASCII_ACK_CODE: u8 = 43;

/// First byte of a negative acknowledgement (`-`)
pub const ASCII_NAK_CODE: u8 = 45;

/// Prefix of runtime commands
pub const RUNTIME_PREFIX: char = '!';

/// Prefix of runtime queries
pub const QUERY_PREFIX: char = '?';

/// Separates the mnemonic and arguments of an outgoing command
pub const ARGUMENT_DELIMITER: char = ' ';

/// Separates value fields in a query reply
pub const FIELD_DELIMITER: char = ':';

/// Separates the echoed mnemonic from the values in a query reply
pub const HEADER_SEPARATOR: char = '=';

/// Numeric token the controller sends for an unavailable analog reading
pub const UNAVAILABLE_SENTINEL: i64 = -32768;

/// Fixed device paths of the two redundant controller ports
pub const DEFAULT_PORTS: [&str; 2] = ["/dev/ttyACM0", "/dev/ttyACM1"];

/// Default baud rate for controller communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default number of re-sends after a failed attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default per-attempt reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Analog inputs reported by `?AI`
pub const ANALOG_INPUT_COUNT: usize = 8;

/// Pulse inputs reported by `?PI`
pub const PULSED_INPUT_COUNT: usize = 4;

/// Longest reply line accepted from the transport
pub const MAX_LINE_LENGTH: usize = 256;
