#![cfg_attr(not(feature = "std"), no_std)]
#![deny(warnings)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Minimal streaming compression & decompression library for embedded use.
//! Implements an LZSS codec: input bytes are described as either literals
//! or back-references into a power-of-two sliding window, packed into a
//! bit stream tag-first. Both state machines are driven incrementally
//! through sink/poll/finish calls and never allocate while running, so
//! they are usable with a few kilobytes of RAM and caller-provided
//! buffers.

#[cfg(feature = "alloc")]
extern crate alloc;

/// module to uncompress some compressed data
pub mod decoder;
/// module to compress data
pub mod encoder;

/// Smallest supported window exponent (window of 2^4 bytes).
pub const MIN_WINDOW_BITS: u8 = 4;
/// Largest supported window exponent (window of 2^15 bytes).
pub const MAX_WINDOW_BITS: u8 = 15;
/// Smallest supported lookahead exponent (matches of up to 2^3 bytes).
pub const MIN_LOOKAHEAD_BITS: u8 = 3;

/// Error returned when an instance is created with bad parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Window exponent outside `MIN_WINDOW_BITS..=MAX_WINDOW_BITS`
    WindowBits,
    /// Lookahead exponent below `MIN_LOOKAHEAD_BITS` or above the window
    /// exponent
    LookaheadBits,
    /// Input buffer capacity of zero
    InputBufferSize,
    /// Supplied buffer length does not match the configured sizes
    BufferSize,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::WindowBits => f.write_str("window exponent out of range"),
            ConfigError::LookaheadBits => f.write_str("lookahead exponent out of range"),
            ConfigError::InputBufferSize => f.write_str("input buffer capacity must be non-zero"),
            ConfigError::BufferSize => f.write_str("buffer length does not match configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

/// Error that can be encountered while (un)compressing data with the
/// one-shot helpers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The output buffer was not large enough to hold output data
    OutputFull,
    /// The configuration was rejected
    Config(ConfigError),
    /// Some internal error did occur
    Internal,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutputFull => f.write_str("output buffer is full"),
            Error::Config(e) => write!(f, "{}", e),
            Error::Internal => f.write_str("internal error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Check the window/lookahead exponents shared by both state machines.
pub(crate) fn check_window_config(window_sz2: u8, lookahead_sz2: u8) -> Result<(), ConfigError> {
    if window_sz2 < MIN_WINDOW_BITS || window_sz2 > MAX_WINDOW_BITS {
        return Err(ConfigError::WindowBits);
    }
    if lookahead_sz2 < MIN_LOOKAHEAD_BITS || lookahead_sz2 > window_sz2 {
        return Err(ConfigError::LookaheadBits);
    }
    Ok(())
}

/// Structure to manage the output buffer and keep track of how much it is
/// filled
pub(crate) struct OutputInfo<'a, 'b> {
    output_buffer: &'a mut [u8],
    output_size: &'b mut usize,
}

impl<'a, 'b> OutputInfo<'a, 'b> {
    /// Create a new OutputInfo instance from provided parameters
    fn new(output_buffer: &'a mut [u8], output_size: &'b mut usize) -> Self {
        OutputInfo {
            output_buffer,
            output_size,
        }
    }

    /// Add a byte to the OutputInfo referenced buffer
    fn push_byte(&mut self, byte: u8) {
        self.output_buffer[*self.output_size] = byte;
        *self.output_size += 1;
    }

    /// Check if there is space left in the OutputInfo buffer
    fn can_take_byte(&self) -> bool {
        *self.output_size < self.output_buffer.len()
    }

    /// get the free space in the buffer
    fn remaining_free_size(&self) -> usize {
        self.output_buffer.len() - *self.output_size
    }
}
