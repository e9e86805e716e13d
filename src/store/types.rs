//! Pixel types understood by the raster store, and the total mapping
//! between them and buffer element types.
//!
//! Both mapping directions are total and never fail: an element type the
//! store cannot persist maps to [`PixelType::Unknown`] (creation with it
//! is rejected later, at the store boundary), and a sample layout the
//! crate has no element type for maps back to the widest float type so
//! values are never silently truncated.

use crate::buffer::DataType;

/// TIFF sample format codes.
const SAMPLE_FORMAT_UINT: u16 = 1;
const SAMPLE_FORMAT_INT: u16 = 2;
const SAMPLE_FORMAT_FLOAT: u16 = 3;

/// Sample layout of a stored raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
    /// Sentinel for layouts the store cannot persist or decode.
    Unknown,
}

impl PixelType {
    /// Map a buffer element type to a storable pixel type.
    ///
    /// 64-bit integer buffers have no supported sample layout and map to
    /// [`PixelType::Unknown`].
    #[must_use]
    pub const fn from_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::U8 => PixelType::U8,
            DataType::I8 => PixelType::I8,
            DataType::U16 => PixelType::U16,
            DataType::I16 => PixelType::I16,
            DataType::U32 => PixelType::U32,
            DataType::I32 => PixelType::I32,
            DataType::F32 => PixelType::F32,
            DataType::F64 => PixelType::F64,
            DataType::U64 | DataType::I64 => PixelType::Unknown,
        }
    }

    /// Map a pixel type to the buffer element type used for its samples.
    ///
    /// [`PixelType::Unknown`] maps to [`DataType::F64`] so layouts the
    /// store cannot identify still get a lossless-enough buffer type.
    #[must_use]
    pub const fn to_data_type(self) -> DataType {
        match self {
            PixelType::U8 => DataType::U8,
            PixelType::I8 => DataType::I8,
            PixelType::U16 => DataType::U16,
            PixelType::I16 => DataType::I16,
            PixelType::U32 => DataType::U32,
            PixelType::I32 => DataType::I32,
            PixelType::F32 => DataType::F32,
            PixelType::F64 => DataType::F64,
            PixelType::Unknown => DataType::F64,
        }
    }

    /// Resolve a (sample format, bits per sample) pair read from a file.
    ///
    /// Unrecognized combinations resolve to [`PixelType::Unknown`] rather
    /// than failing; the dataset still opens and exposes its metadata.
    #[must_use]
    pub const fn from_sample_layout(sample_format: u16, bits: u16) -> Self {
        match (sample_format, bits) {
            (SAMPLE_FORMAT_UINT, 8) => PixelType::U8,
            (SAMPLE_FORMAT_INT, 8) => PixelType::I8,
            (SAMPLE_FORMAT_UINT, 16) => PixelType::U16,
            (SAMPLE_FORMAT_INT, 16) => PixelType::I16,
            (SAMPLE_FORMAT_UINT, 32) => PixelType::U32,
            (SAMPLE_FORMAT_INT, 32) => PixelType::I32,
            (SAMPLE_FORMAT_FLOAT, 32) => PixelType::F32,
            (SAMPLE_FORMAT_FLOAT, 64) => PixelType::F64,
            _ => PixelType::Unknown,
        }
    }

    /// The (sample format, bits per sample) pair written for this type,
    /// or `None` for [`PixelType::Unknown`].
    #[must_use]
    pub const fn sample_layout(self) -> Option<(u16, u16)> {
        match self {
            PixelType::U8 => Some((SAMPLE_FORMAT_UINT, 8)),
            PixelType::I8 => Some((SAMPLE_FORMAT_INT, 8)),
            PixelType::U16 => Some((SAMPLE_FORMAT_UINT, 16)),
            PixelType::I16 => Some((SAMPLE_FORMAT_INT, 16)),
            PixelType::U32 => Some((SAMPLE_FORMAT_UINT, 32)),
            PixelType::I32 => Some((SAMPLE_FORMAT_INT, 32)),
            PixelType::F32 => Some((SAMPLE_FORMAT_FLOAT, 32)),
            PixelType::F64 => Some((SAMPLE_FORMAT_FLOAT, 64)),
            PixelType::Unknown => None,
        }
    }

    /// True for the floating-point pixel types.
    ///
    /// Drives predictor selection: integer layouts get the horizontal
    /// predictor, float layouts do not.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, PixelType::F32 | PixelType::F64)
    }

    /// Bytes per sample, or `None` for [`PixelType::Unknown`].
    #[must_use]
    pub const fn size_bytes(self) -> Option<usize> {
        match self.sample_layout() {
            Some((_, bits)) => Some((bits / 8) as usize),
            None => None,
        }
    }
}
