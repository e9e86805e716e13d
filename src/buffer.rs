//! Typed pixel buffers shared by the merge core and the raster store.
//!
//! Pixel data moves through the crate as [`PixelData`], an enum of typed
//! vectors mirroring the sample layouts the container format can hold.
//! Keeping the element type in the enum (instead of erasing to bytes)
//! lets band copies, window gathers, and numeric conversions stay typed
//! end to end.
//!
//! [`RasterBuffer`] wraps one 2-D row-major plane of pixel data with
//! explicit dimensions; merges accept borrowed `RasterBuffer`s as band
//! sources alongside bands read from files.

use crate::window::Window;

/// Element type of a pixel buffer.
///
/// The 64-bit integer types are representable in buffers but are not
/// supported by the raster store; see
/// [`PixelType::from_data_type`](crate::store::PixelType::from_data_type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl DataType {
    /// Size of one element in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::U16 | DataType::I16 => 2,
            DataType::U32 | DataType::I32 | DataType::F32 => 4,
            DataType::U64 | DataType::I64 | DataType::F64 => 8,
        }
    }

    /// True for the floating-point element types.
    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Lowercase type name, as used in error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DataType::U8 => "u8",
            DataType::I8 => "i8",
            DataType::U16 => "u16",
            DataType::I16 => "i16",
            DataType::U32 => "u32",
            DataType::I32 => "i32",
            DataType::U64 => "u64",
            DataType::I64 => "i64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
        }
    }
}

/// A vector of pixel samples with its element type carried in the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Copy `count` elements starting at `start` into `dst`.
fn copy_range<T: Copy>(src: &[T], dst: &mut Vec<T>, start: usize, count: usize) {
    dst.extend_from_slice(&src[start..start + count]);
}

/// Copy `count` elements at `start`, `start + stride`, ... into `dst`.
fn copy_strided<T: Copy>(src: &[T], dst: &mut Vec<T>, start: usize, stride: usize, count: usize) {
    let mut idx = start;
    for _ in 0..count {
        dst.push(src[idx]);
        idx += stride;
    }
}

/// Interleave planes of equal length sample by sample.
fn interleave_planes<T: Copy>(planes: &[&[T]]) -> Vec<T> {
    let len = planes.first().map_or(0, |p| p.len());
    let mut out = Vec::with_capacity(len * planes.len());
    for i in 0..len {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

impl PixelData {
    /// Element type of this buffer.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            PixelData::U8(_) => DataType::U8,
            PixelData::I8(_) => DataType::I8,
            PixelData::U16(_) => DataType::U16,
            PixelData::I16(_) => DataType::I16,
            PixelData::U32(_) => DataType::U32,
            PixelData::I32(_) => DataType::I32,
            PixelData::U64(_) => DataType::U64,
            PixelData::I64(_) => DataType::I64,
            PixelData::F32(_) => DataType::F32,
            PixelData::F64(_) => DataType::F64,
        }
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            PixelData::U8(v) => v.len(),
            PixelData::I8(v) => v.len(),
            PixelData::U16(v) => v.len(),
            PixelData::I16(v) => v.len(),
            PixelData::U32(v) => v.len(),
            PixelData::I32(v) => v.len(),
            PixelData::U64(v) => v.len(),
            PixelData::I64(v) => v.len(),
            PixelData::F32(v) => v.len(),
            PixelData::F64(v) => v.len(),
        }
    }

    /// True when no samples are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An empty buffer of the given element type.
    #[must_use]
    pub fn empty(data_type: DataType) -> Self {
        Self::zeroed(data_type, 0)
    }

    /// A zero-filled buffer of `len` samples.
    #[must_use]
    pub fn zeroed(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::U8 => PixelData::U8(vec![0; len]),
            DataType::I8 => PixelData::I8(vec![0; len]),
            DataType::U16 => PixelData::U16(vec![0; len]),
            DataType::I16 => PixelData::I16(vec![0; len]),
            DataType::U32 => PixelData::U32(vec![0; len]),
            DataType::I32 => PixelData::I32(vec![0; len]),
            DataType::U64 => PixelData::U64(vec![0; len]),
            DataType::I64 => PixelData::I64(vec![0; len]),
            DataType::F32 => PixelData::F32(vec![0.0; len]),
            DataType::F64 => PixelData::F64(vec![0.0; len]),
        }
    }

    /// Append the contiguous range `[start, start + count)` of `self` onto
    /// `dst`.
    ///
    /// # Errors
    /// Returns an error string when the element types differ or the range
    /// is out of bounds.
    pub fn extend_range(&self, dst: &mut PixelData, start: usize, count: usize) -> Result<(), String> {
        self.check_range(dst, start, 1, count)?;
        match (self, dst) {
            (PixelData::U8(s), PixelData::U8(d)) => copy_range(s, d, start, count),
            (PixelData::I8(s), PixelData::I8(d)) => copy_range(s, d, start, count),
            (PixelData::U16(s), PixelData::U16(d)) => copy_range(s, d, start, count),
            (PixelData::I16(s), PixelData::I16(d)) => copy_range(s, d, start, count),
            (PixelData::U32(s), PixelData::U32(d)) => copy_range(s, d, start, count),
            (PixelData::I32(s), PixelData::I32(d)) => copy_range(s, d, start, count),
            (PixelData::U64(s), PixelData::U64(d)) => copy_range(s, d, start, count),
            (PixelData::I64(s), PixelData::I64(d)) => copy_range(s, d, start, count),
            (PixelData::F32(s), PixelData::F32(d)) => copy_range(s, d, start, count),
            (PixelData::F64(s), PixelData::F64(d)) => copy_range(s, d, start, count),
            _ => unreachable!("checked by check_range"),
        }
        Ok(())
    }

    /// Append `count` samples taken at stride `stride` from `start` onto
    /// `dst`.
    ///
    /// # Errors
    /// Returns an error string when the element types differ or the last
    /// index is out of bounds.
    pub fn extend_strided(
        &self,
        dst: &mut PixelData,
        start: usize,
        stride: usize,
        count: usize,
    ) -> Result<(), String> {
        self.check_range(dst, start, stride, count)?;
        match (self, dst) {
            (PixelData::U8(s), PixelData::U8(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::I8(s), PixelData::I8(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::U16(s), PixelData::U16(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::I16(s), PixelData::I16(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::U32(s), PixelData::U32(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::I32(s), PixelData::I32(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::U64(s), PixelData::U64(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::I64(s), PixelData::I64(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::F32(s), PixelData::F32(d)) => copy_strided(s, d, start, stride, count),
            (PixelData::F64(s), PixelData::F64(d)) => copy_strided(s, d, start, stride, count),
            _ => unreachable!("checked by check_range"),
        }
        Ok(())
    }

    fn check_range(
        &self,
        dst: &PixelData,
        start: usize,
        stride: usize,
        count: usize,
    ) -> Result<(), String> {
        if self.data_type() != dst.data_type() {
            return Err(format!(
                "Element type mismatch: {} vs {}",
                self.data_type().as_str(),
                dst.data_type().as_str()
            ));
        }
        if count > 0 {
            let last = start + stride * (count - 1);
            if last >= self.len() {
                return Err(format!(
                    "Sample range ends at {last} but buffer holds {} samples",
                    self.len()
                ));
            }
        }
        Ok(())
    }

    /// Interleave equal-length single-band planes into one buffer with the
    /// band index as the fastest-varying axis.
    ///
    /// # Errors
    /// Returns an error string when the planes disagree on element type or
    /// length, or when `planes` is empty.
    pub fn interleave(planes: &[PixelData]) -> Result<PixelData, String> {
        let first = planes
            .first()
            .ok_or_else(|| "Cannot interleave zero planes".to_string())?;
        for plane in planes {
            if plane.data_type() != first.data_type() {
                return Err(format!(
                    "Element type mismatch between planes: {} vs {}",
                    first.data_type().as_str(),
                    plane.data_type().as_str()
                ));
            }
            if plane.len() != first.len() {
                return Err(format!(
                    "Plane length mismatch: {} vs {}",
                    first.len(),
                    plane.len()
                ));
            }
        }
        macro_rules! interleave_as {
            ($variant:ident) => {{
                let refs: Vec<&[_]> = planes
                    .iter()
                    .map(|p| match p {
                        PixelData::$variant(v) => v.as_slice(),
                        _ => unreachable!("checked above"),
                    })
                    .collect();
                PixelData::$variant(interleave_planes(&refs))
            }};
        }
        Ok(match first {
            PixelData::U8(_) => interleave_as!(U8),
            PixelData::I8(_) => interleave_as!(I8),
            PixelData::U16(_) => interleave_as!(U16),
            PixelData::I16(_) => interleave_as!(I16),
            PixelData::U32(_) => interleave_as!(U32),
            PixelData::I32(_) => interleave_as!(I32),
            PixelData::U64(_) => interleave_as!(U64),
            PixelData::I64(_) => interleave_as!(I64),
            PixelData::F32(_) => interleave_as!(F32),
            PixelData::F64(_) => interleave_as!(F64),
        })
    }

    /// Append the little-endian bytes of the range `[start, start + count)`
    /// onto `out`.
    ///
    /// # Errors
    /// Returns an error string when the range is out of bounds.
    pub fn extend_le_bytes(
        &self,
        out: &mut Vec<u8>,
        start: usize,
        count: usize,
    ) -> Result<(), String> {
        if start + count > self.len() {
            return Err(format!(
                "Sample range [{start}, {}) exceeds buffer of {} samples",
                start + count,
                self.len()
            ));
        }
        macro_rules! emit {
            ($v:expr) => {
                for value in &$v[start..start + count] {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            };
        }
        match self {
            PixelData::U8(v) => emit!(v),
            PixelData::I8(v) => emit!(v),
            PixelData::U16(v) => emit!(v),
            PixelData::I16(v) => emit!(v),
            PixelData::U32(v) => emit!(v),
            PixelData::I32(v) => emit!(v),
            PixelData::U64(v) => emit!(v),
            PixelData::I64(v) => emit!(v),
            PixelData::F32(v) => emit!(v),
            PixelData::F64(v) => emit!(v),
        }
        Ok(())
    }

    /// Decode a little-endian byte buffer into typed samples.
    ///
    /// # Errors
    /// Returns an error string when the byte length is not a multiple of
    /// the element size.
    pub fn from_le_bytes(data_type: DataType, bytes: &[u8]) -> Result<PixelData, String> {
        let size = data_type.size_bytes();
        if bytes.len() % size != 0 {
            return Err(format!(
                "Byte buffer of {} is not a multiple of the {size}-byte element size",
                bytes.len()
            ));
        }
        macro_rules! decode {
            ($variant:ident, $ty:ty) => {
                PixelData::$variant(
                    bytes
                        .chunks_exact(std::mem::size_of::<$ty>())
                        .map(|c| {
                            let mut raw = [0u8; std::mem::size_of::<$ty>()];
                            raw.copy_from_slice(c);
                            <$ty>::from_le_bytes(raw)
                        })
                        .collect(),
                )
            };
        }
        Ok(match data_type {
            DataType::U8 => decode!(U8, u8),
            DataType::I8 => decode!(I8, i8),
            DataType::U16 => decode!(U16, u16),
            DataType::I16 => decode!(I16, i16),
            DataType::U32 => decode!(U32, u32),
            DataType::I32 => decode!(I32, i32),
            DataType::U64 => decode!(U64, u64),
            DataType::I64 => decode!(I64, i64),
            DataType::F32 => decode!(F32, f32),
            DataType::F64 => decode!(F64, f64),
        })
    }

    /// Convert to another element type through `f64`, saturating on
    /// integer overflow.
    ///
    /// Conversion precision follows the usual raster-processing tradeoff:
    /// 64-bit integers beyond 2^53 lose precision in the intermediate.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn convert(&self, data_type: DataType) -> PixelData {
        if self.data_type() == data_type {
            return self.clone();
        }
        macro_rules! collect_from_f64 {
            ($variant:ident, $ty:ty) => {
                PixelData::$variant((0..self.len()).map(|i| self.f64_at(i) as $ty).collect())
            };
        }
        // `as` from f64 truncates fractions and saturates integer targets.
        match data_type {
            DataType::U8 => collect_from_f64!(U8, u8),
            DataType::I8 => collect_from_f64!(I8, i8),
            DataType::U16 => collect_from_f64!(U16, u16),
            DataType::I16 => collect_from_f64!(I16, i16),
            DataType::U32 => collect_from_f64!(U32, u32),
            DataType::I32 => collect_from_f64!(I32, i32),
            DataType::U64 => collect_from_f64!(U64, u64),
            DataType::I64 => collect_from_f64!(I64, i64),
            DataType::F32 => collect_from_f64!(F32, f32),
            DataType::F64 => collect_from_f64!(F64, f64),
        }
    }

    /// Sample at `idx` widened to `f64`, or `None` when out of bounds.
    #[must_use]
    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        if idx < self.len() {
            Some(self.f64_at(idx))
        } else {
            None
        }
    }

    // 64-bit integers beyond 2^53 widen lossily.
    #[allow(clippy::cast_precision_loss)]
    fn f64_at(&self, idx: usize) -> f64 {
        match self {
            PixelData::U8(v) => f64::from(v[idx]),
            PixelData::I8(v) => f64::from(v[idx]),
            PixelData::U16(v) => f64::from(v[idx]),
            PixelData::I16(v) => f64::from(v[idx]),
            PixelData::U32(v) => f64::from(v[idx]),
            PixelData::I32(v) => f64::from(v[idx]),
            PixelData::U64(v) => v[idx] as f64,
            PixelData::I64(v) => v[idx] as f64,
            PixelData::F32(v) => f64::from(v[idx]),
            PixelData::F64(v) => v[idx],
        }
    }
}

/// A borrowed-friendly 2-D row-major plane of pixels with explicit
/// dimensions.
///
/// Used as the backing for raw in-memory band sources; merges borrow the
/// buffer rather than copying it.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    width: usize,
    height: usize,
    data: PixelData,
}

impl RasterBuffer {
    /// Wrap a pixel buffer with its dimensions.
    ///
    /// # Errors
    /// Returns an error string when `data.len() != width * height`.
    pub fn new(width: usize, height: usize, data: PixelData) -> Result<Self, String> {
        if data.len() != width * height {
            return Err(format!(
                "Buffer holds {} samples but {width}x{height} requires {}",
                data.len(),
                width * height
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Element type of the backing buffer.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    /// The full backing buffer.
    #[must_use]
    pub const fn data(&self) -> &PixelData {
        &self.data
    }

    /// Copy out the samples covered by `window`.
    ///
    /// # Errors
    /// Returns an error string when the window exceeds the buffer extent.
    pub fn read_window(&self, window: Window) -> Result<PixelData, String> {
        if !Window::full(self.width, self.height).contains(&window) {
            return Err(format!(
                "Window {window:?} exceeds the {}x{} buffer extent",
                self.width, self.height
            ));
        }
        let mut out = PixelData::empty(self.data_type());
        for row in window.y..window.y_end() {
            self.data
                .extend_range(&mut out, row * self.width + window.x, window.width)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_sizes() {
        assert_eq!(DataType::U8.size_bytes(), 1);
        assert_eq!(DataType::I16.size_bytes(), 2);
        assert_eq!(DataType::F32.size_bytes(), 4);
        assert_eq!(DataType::F64.size_bytes(), 8);
        assert!(DataType::F32.is_float());
        assert!(!DataType::U32.is_float());
    }

    #[test]
    fn test_le_bytes_round_trip() {
        let data = PixelData::I16(vec![-5, 0, 1000, 32767]);
        let mut bytes = Vec::new();
        data.extend_le_bytes(&mut bytes, 0, 4).unwrap();
        assert_eq!(bytes.len(), 8);
        let back = PixelData::from_le_bytes(DataType::I16, &bytes).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_from_le_bytes_rejects_ragged_input() {
        assert!(PixelData::from_le_bytes(DataType::U16, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_extend_strided_picks_one_channel() {
        // Two-channel interleaved buffer: (1,10), (2,20), (3,30)
        let interleaved = PixelData::U8(vec![1, 10, 2, 20, 3, 30]);
        let mut out = PixelData::empty(DataType::U8);
        interleaved.extend_strided(&mut out, 1, 2, 3).unwrap();
        assert_eq!(out, PixelData::U8(vec![10, 20, 30]));
    }

    #[test]
    fn test_extend_range_rejects_type_mismatch() {
        let src = PixelData::U8(vec![1, 2, 3]);
        let mut dst = PixelData::empty(DataType::U16);
        assert!(src.extend_range(&mut dst, 0, 3).is_err());
    }

    #[test]
    fn test_interleave() {
        let planes = vec![
            PixelData::U16(vec![1, 2, 3]),
            PixelData::U16(vec![10, 20, 30]),
        ];
        let merged = PixelData::interleave(&planes).unwrap();
        assert_eq!(merged, PixelData::U16(vec![1, 10, 2, 20, 3, 30]));
    }

    #[test]
    fn test_interleave_rejects_mismatched_planes() {
        let planes = vec![PixelData::U16(vec![1, 2]), PixelData::U8(vec![1, 2])];
        assert!(PixelData::interleave(&planes).is_err());
        assert!(PixelData::interleave(&[]).is_err());
    }

    #[test]
    fn test_convert_saturates() {
        let data = PixelData::F64(vec![-10.0, 0.5, 300.0]);
        assert_eq!(data.convert(DataType::U8), PixelData::U8(vec![0, 0, 255]));
        let ints = PixelData::I32(vec![-1, 7]);
        assert_eq!(ints.convert(DataType::F32), PixelData::F32(vec![-1.0, 7.0]));
    }

    #[test]
    fn test_convert_same_type_is_identity() {
        let data = PixelData::U32(vec![1, 2, 3]);
        assert_eq!(data.convert(DataType::U32), data);
    }

    #[test]
    fn test_raster_buffer_validates_length() {
        assert!(RasterBuffer::new(3, 2, PixelData::U8(vec![0; 6])).is_ok());
        assert!(RasterBuffer::new(3, 2, PixelData::U8(vec![0; 5])).is_err());
    }

    #[test]
    fn test_raster_buffer_read_window() {
        let data = PixelData::U8((0..12).collect());
        let buffer = RasterBuffer::new(4, 3, data).unwrap();
        let window = buffer.read_window(Window::new(1, 1, 2, 2)).unwrap();
        assert_eq!(window, PixelData::U8(vec![5, 6, 9, 10]));
        assert!(buffer.read_window(Window::new(3, 0, 2, 1)).is_err());
    }

    #[test]
    fn test_get_f64() {
        let data = PixelData::I8(vec![-3, 4]);
        assert_eq!(data.get_f64(0), Some(-3.0));
        assert_eq!(data.get_f64(2), None);
    }
}
