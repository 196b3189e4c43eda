//! Frame codec
//!
//! Builds the ASCII wire form of a [`Command`] and splits received lines
//! into a [`RawResponse`], without interpreting what the values mean.
//!
//! Line formats:
//! - command:       `!G 1 500\r`, `?AI 3\r`
//! - runtime reply: `+\r` (acknowledged) or `-\r` (rejected)
//! - query reply:   `+V=123:241:87\r`
//!
//! A controller with echo enabled sends the command line back before its
//! reply; such a line decodes with [`RawResponse::kind`] set.

use super::commands::{argument_limits, Argument, Command, CommandKind};
use super::{
    EncodingError, FramingError, ARGUMENT_DELIMITER, ASCII_ACK_CODE, ASCII_CR_CODE,
    ASCII_LF_CODE, ASCII_NAK_CODE, FIELD_DELIMITER, HEADER_SEPARATOR,
};

/// One decoded serial line
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    /// Line began with the acknowledgement byte
    pub acknowledged: bool,
    /// Line began with the negative acknowledgement byte
    pub rejected: bool,
    /// Set when the line is itself a command frame (an echo)
    pub kind: Option<CommandKind>,
    /// Reply header (`V` in `+V=1:2:3`) or echoed command mnemonic
    pub mnemonic: Option<String>,
    /// Value fields, or echoed command arguments
    pub tokens: Vec<String>,
}

impl RawResponse {
    /// Whether this line is the echo of `command`
    pub fn is_echo_of(&self, command: &Command) -> bool {
        self.kind == Some(command.kind())
            && self.mnemonic.as_deref() == Some(command.mnemonic())
            && self.tokens.len() == command.args().len()
            && self
                .tokens
                .iter()
                .zip(command.args())
                .all(|(token, arg)| *token == arg.to_string())
    }

    /// Acknowledgement with no payload beyond an optional `OK`
    pub fn is_bare_ack(&self) -> bool {
        self.acknowledged
            && self.kind.is_none()
            && self.mnemonic.is_none()
            && (self.tokens.is_empty() || (self.tokens.len() == 1 && self.tokens[0] == "OK"))
    }

    /// Token at `index`, if present
    pub fn token(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }
}

/// Stateless encoder/decoder for the ASCII line protocol
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a command into its terminated wire bytes
    pub fn encode(command: &Command) -> Result<Vec<u8>, EncodingError> {
        let mut bytes = Self::encode_line(command)?.into_bytes();
        bytes.push(ASCII_CR_CODE);
        Ok(bytes)
    }

    /// Encode a command into its wire text, without terminator
    pub fn encode_line(command: &Command) -> Result<String, EncodingError> {
        validate_mnemonic(command.mnemonic())?;
        validate_arguments(command)?;
        Ok(command.to_string())
    }

    /// Decode one received line
    pub fn decode(bytes: &[u8]) -> Result<RawResponse, FramingError> {
        let end = bytes
            .iter()
            .position(|&b| b == ASCII_CR_CODE)
            .ok_or(FramingError::MissingTerminator(bytes.len()))?;
        let line = &bytes[..end];

        if let Some((offset, &byte)) = line.iter().enumerate().find(|(_, b)| !b.is_ascii()) {
            return Err(FramingError::NotAscii { byte, offset });
        }

        // ASCII was checked above, so every byte maps to one char
        let text: String = line
            .iter()
            .skip_while(|&&b| b == ASCII_LF_CODE)
            .map(|&b| b as char)
            .collect();
        let text = text.trim();

        let mut response = RawResponse::default();
        let body = match text.as_bytes().first() {
            Some(&ASCII_ACK_CODE) => {
                response.acknowledged = true;
                &text[1..]
            }
            Some(&ASCII_NAK_CODE) => {
                response.rejected = true;
                &text[1..]
            }
            _ => text,
        }
        .trim();

        if let Some(kind) = body.chars().next().and_then(CommandKind::from_prefix) {
            let mut parts = body[1..]
                .split(ARGUMENT_DELIMITER)
                .filter(|part| !part.is_empty());
            response.kind = Some(kind);
            response.mnemonic = parts.next().map(str::to_string);
            response.tokens = parts.map(str::to_string).collect();
        } else if let Some((header, values)) = body.split_once(HEADER_SEPARATOR) {
            response.mnemonic = Some(header.trim().to_string());
            response.tokens = split_fields(values);
        } else {
            response.tokens = split_fields(body);
        }

        Ok(response)
    }
}

fn split_fields(values: &str) -> Vec<String> {
    if values.trim().is_empty() {
        return Vec::new();
    }
    values
        .split(FIELD_DELIMITER)
        .map(|field| field.trim().to_string())
        .collect()
}

fn validate_mnemonic(mnemonic: &str) -> Result<(), EncodingError> {
    let mut chars = mnemonic.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(EncodingError::InvalidMnemonic(mnemonic.to_string()))
    }
}

fn validate_arguments(command: &Command) -> Result<(), EncodingError> {
    let mnemonic = command.mnemonic();
    let args = command.args();
    let limits = argument_limits(command.kind(), mnemonic);

    if let Some(limits) = limits {
        let count_ok = match command.kind() {
            CommandKind::Runtime => args.len() == limits.len(),
            CommandKind::Query => args.len() <= limits.len(),
        };
        if !count_ok {
            return Err(EncodingError::ArgumentCount {
                mnemonic: mnemonic.to_string(),
                expected: limits.len(),
                actual: args.len(),
            });
        }
    }

    for (index, arg) in args.iter().enumerate() {
        match arg {
            Argument::Int(value) => {
                if let Some(&(min, max)) = limits.and_then(|l| l.get(index)) {
                    if !(min..=max).contains(value) {
                        return Err(EncodingError::OutOfRange {
                            mnemonic: mnemonic.to_string(),
                            index,
                            value: *value,
                            min,
                            max,
                        });
                    }
                }
            }
            Argument::Text(text) => {
                // Known commands take numbers only
                let printable = !text.is_empty() && text.bytes().all(|b| b.is_ascii_graphic());
                if limits.is_some() || !printable {
                    return Err(EncodingError::InvalidText {
                        mnemonic: mnemonic.to_string(),
                        index,
                        text: text.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
