//! # Line Protocol Module
//!
//! ASCII line protocol spoken by the soil-moisture sensor.
//!
//! This module handles:
//! - XOR checksum calculation (`*HH` suffix)
//! - Command frame encoding (`<COMMAND> <ARGS>*<CHECKSUM>\r\n`)
//! - Splitting radio notifications into lines
//! - Checksum verification of incoming lines

pub mod checksum;
pub mod encoder;
pub mod decoder;

/// Separator between a line payload and its checksum
pub const CHECKSUM_SEPARATOR: char = '*';

/// Number of hex digits in a checksum suffix
pub const CHECKSUM_DIGITS: usize = 2;

/// Terminator appended to every outbound frame
pub const LINE_TERMINATOR: &str = "\r\n";
