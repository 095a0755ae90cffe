//! # Command Encoder
//!
//! Encodes operator commands into checksummed ASCII frames.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::checksum::checksum;
use super::{CHECKSUM_DIGITS, CHECKSUM_SEPARATOR, LINE_TERMINATOR};
use crate::error::{Result, SoilLinkError};

/// Slowest sampling interval the firmware accepts, in seconds
pub const RATE_MAX_SECONDS: u16 = 3600;

/// Fastest sampling interval the firmware accepts, in seconds
pub const RATE_MIN_SECONDS: u16 = 1;

/// Encode a command into a complete wire frame
///
/// Name and arguments are joined with single spaces and trimmed, then
/// `*<CHECKSUM>\r\n` is appended.
///
/// # Arguments
///
/// * `name` - Command word (e.g. `RATE`)
/// * `args` - Command arguments
///
/// # Returns
///
/// * `Option<Bytes>` - Encoded frame, or `None` if the trimmed command is empty
///
/// # Examples
///
/// ```
/// use soil_link::protocol::encoder::encode_command;
///
/// let frame = encode_command("RATE", &["5"]).unwrap();
/// assert!(frame.starts_with(b"RATE 5*"));
/// assert!(frame.ends_with(b"\r\n"));
/// ```
pub fn encode_command(name: &str, args: &[&str]) -> Option<Bytes> {
    let mut joined = String::from(name);
    for arg in args {
        joined.push(' ');
        joined.push_str(arg);
    }

    let payload = joined.trim();
    if payload.is_empty() {
        return None;
    }

    let sum = checksum(payload.as_bytes());
    let mut frame = BytesMut::with_capacity(
        payload.len() + 1 + CHECKSUM_DIGITS + LINE_TERMINATOR.len(),
    );
    frame.put_slice(payload.as_bytes());
    frame.put_u8(CHECKSUM_SEPARATOR as u8);
    frame.put_slice(sum.as_bytes());
    frame.put_slice(LINE_TERMINATOR.as_bytes());

    Some(frame.freeze())
}

/// Command vocabulary understood by the sensor firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start periodic sampling
    Start,
    /// Stop periodic sampling
    Stop,
    /// Set the sampling interval in seconds
    Rate(u16),
    /// Request a single sample
    Get,
    /// Reset the device sequence counter
    Reset,
}

impl Command {
    /// Build a `RATE` command, rejecting intervals outside 1..=3600 seconds
    pub fn rate(seconds: u32) -> Result<Self> {
        if seconds < RATE_MIN_SECONDS as u32 || seconds > RATE_MAX_SECONDS as u32 {
            return Err(SoilLinkError::InvalidCommand(format!(
                "RATE must be between {} and {} seconds, got {}",
                RATE_MIN_SECONDS, RATE_MAX_SECONDS, seconds
            )));
        }
        Ok(Command::Rate(seconds as u16))
    }

    /// Parse operator text (case-insensitive command word)
    pub fn parse(text: &str) -> Result<Self> {
        let mut words = text.split_whitespace();
        let name = words
            .next()
            .ok_or(SoilLinkError::EmptyCommand)?
            .to_ascii_uppercase();
        let arg = words.next();

        if words.next().is_some() {
            return Err(SoilLinkError::InvalidCommand(format!(
                "too many arguments: {}",
                text.trim()
            )));
        }

        match (name.as_str(), arg) {
            ("START", None) => Ok(Command::Start),
            ("STOP", None) => Ok(Command::Stop),
            ("GET", None) => Ok(Command::Get),
            ("RESET", None) => Ok(Command::Reset),
            ("RATE", Some(arg)) => {
                let seconds = arg.parse::<u32>().map_err(|_| {
                    SoilLinkError::InvalidCommand(format!("invalid RATE argument: {}", arg))
                })?;
                Command::rate(seconds)
            }
            _ => Err(SoilLinkError::InvalidCommand(text.trim().to_string())),
        }
    }

    /// Encode the command into a wire frame
    pub fn encode(&self) -> Bytes {
        let frame = match self {
            Command::Rate(seconds) => encode_command("RATE", &[&seconds.to_string()]),
            other => encode_command(other.name(), &[]),
        };
        // Command words are never blank.
        frame.unwrap_or_default()
    }

    fn name(&self) -> &'static str {
        match self {
            Command::Start => "START",
            Command::Stop => "STOP",
            Command::Rate(_) => "RATE",
            Command::Get => "GET",
            Command::Reset => "RESET",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Rate(seconds) => write!(f, "RATE {}", seconds),
            other => f.write_str(other.name()),
        }
    }
}
