//! Safe numeric casting utilities for raster container I/O.
//!
//! The TIFF tag boundary is strict about integer widths: image dimensions
//! and chunk byte counts are written as `u32`, while file offsets are
//! `u64`. This module provides the checked conversions used at that
//! boundary.
//!
//! # Design Decisions
//!
//! ## Image Dimensions (`usize` → `u32`)
//! Dimensions come in as `usize` from the public API and must fit the
//! 32-bit tag fields of the container format. Rasters wider or taller than
//! `u32::MAX` pixels are rejected rather than truncated.
//!
//! ## File Offsets and Byte Counts (`u64` → `usize`)
//! Chunk payloads are buffered in memory before decoding, so their byte
//! counts must be addressable. On 32-bit systems, counts > 4GB will fail.

use std::convert::TryFrom;

/// Convert a `u64` offset or byte count to `usize`, failing on 32-bit overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `usize::MAX` (on 32-bit systems).
#[inline]
pub fn u64_to_usize(value: u64) -> Result<usize, String> {
    usize::try_from(value).map_err(|_| {
        format!("Byte count {value} exceeds maximum addressable size on this platform")
    })
}

/// Convert a `usize` dimension or count to `u32`, failing on 64-bit overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}

/// Convert a `u64` payload length to `u32`, failing on overflow.
///
/// Used for chunk byte-count tags, which are 32-bit even in files whose
/// offsets have outgrown 32 bits.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn u64_to_u32(value: u64) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Chunk of {value} bytes exceeds u32 maximum"))
}
