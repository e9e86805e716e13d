//! Adaptive whole-raster reading with array-style region slicing.
//!
//! [`RasterReader`] opens a raster and tries to materialize the whole
//! thing into one interleaved buffer. Rasters that would exceed the
//! resident limit (or that the allocator refuses) stay on disk and are
//! served window by window instead. Both modes answer [`region`] calls
//! with identical results, so callers never branch on the mode.
//!
//! [`region`]: RasterReader::region
//!
//! # Example
//! ```rust,no_run
//! use mergetiff::{RasterReader, Span};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let reader = RasterReader::open("ortho.tif")?;
//! let region = reader.region(&[Span::from(0..256), Span::from(0..256)])?;
//! println!("{}x{}x{}", region.rows, region.cols, region.channels);
//! # Ok(())
//! # }
//! ```

use std::ops::Range;
use std::path::Path;

use tracing::{debug, warn};

use crate::buffer::{DataType, PixelData};
use crate::store::{Dataset, StoreError};
use crate::window::Window;

/// Largest raster, in bytes, materialized in memory by default.
pub const DEFAULT_RESIDENT_LIMIT: usize = 512 << 20;

/// A contiguous index range along one region axis.
///
/// Out-of-range and inverted spans clamp to the axis extent, yielding
/// empty regions rather than errors, following the conventions of array
/// slicing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// First index covered.
    pub start: usize,
    /// One past the last index covered; clamps to the axis length.
    pub stop: usize,
    /// Index stride. Only a stride of one is supported by
    /// [`RasterReader::region`].
    pub step: usize,
}

impl Span {
    /// The half-open range `start..stop` with a stride of one.
    #[must_use]
    pub const fn new(start: usize, stop: usize) -> Self {
        Self {
            start,
            stop,
            step: 1,
        }
    }

    /// A strided span. Rejected by [`RasterReader::region`] unless the
    /// step is one.
    #[must_use]
    pub const fn with_step(start: usize, stop: usize, step: usize) -> Self {
        Self { start, stop, step }
    }

    /// The whole axis.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            start: 0,
            stop: usize::MAX,
            step: 1,
        }
    }

    /// The indices covered along an axis of length `len`.
    fn clamp(self, len: usize) -> Range<usize> {
        let start = self.start.min(len);
        let stop = self.stop.min(len).max(start);
        start..stop
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl From<std::ops::RangeFrom<usize>> for Span {
    fn from(range: std::ops::RangeFrom<usize>) -> Self {
        Self::new(range.start, usize::MAX)
    }
}

impl From<std::ops::RangeTo<usize>> for Span {
    fn from(range: std::ops::RangeTo<usize>) -> Self {
        Self::new(0, range.end)
    }
}

impl From<std::ops::RangeFull> for Span {
    fn from(_: std::ops::RangeFull) -> Self {
        Self::all()
    }
}

/// Errors raised by [`RasterReader::region`].
#[derive(Debug)]
pub enum RegionError {
    /// A span carried a stride other than one.
    UnsupportedSlice(String),
    /// The span count was outside the supported one to three axes.
    UnsupportedDimensionality(String),
    /// The storage layer failed.
    Store(StoreError),
}

impl std::fmt::Display for RegionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionError::UnsupportedSlice(msg) => write!(f, "Unsupported slice: {msg}"),
            RegionError::UnsupportedDimensionality(msg) => {
                write!(f, "Unsupported dimensionality: {msg}")
            }
            RegionError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for RegionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegionError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for RegionError {
    fn from(e: StoreError) -> Self {
        RegionError::Store(e)
    }
}

/// Terminal access mode of an open [`RasterReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// The full raster is materialized in memory.
    Resident,
    /// Reads go to the container window by window.
    FileBacked,
}

/// A dense region copied out of a raster.
///
/// Samples are laid out row-major with channels interleaved, so the
/// sample at `(row, col, channel)` sits at index
/// `(row * cols + col) * channels + channel`.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionData {
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Number of channels.
    pub channels: usize,
    /// The samples, empty when any axis is empty.
    pub data: PixelData,
}

impl RegionData {
    /// The sample at `(row, col, channel)` widened to f64, or `None`
    /// outside the region.
    #[must_use]
    pub fn sample(&self, row: usize, col: usize, channel: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols || channel >= self.channels {
            return None;
        }
        self.data
            .get_f64((row * self.cols + col) * self.channels + channel)
    }
}

/// Adaptive reader over one raster.
///
/// Opening materializes the raster in memory when it fits under the
/// resident limit; otherwise the reader stays file-backed. The mode is
/// fixed for the life of the reader.
pub struct RasterReader {
    dataset: Dataset,
    width: usize,
    height: usize,
    channels: usize,
    element_type: DataType,
    resident: Option<PixelData>,
}

impl RasterReader {
    /// Open a raster with the default resident limit.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the container cannot be opened or a
    /// resident materialization fails to decode. Memory exhaustion is
    /// not an error; it selects the file-backed mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::with_resident_limit(path, DEFAULT_RESIDENT_LIMIT)
    }

    /// Open a raster, materializing it only when it fits in `limit`
    /// bytes.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the container cannot be opened or a
    /// resident materialization fails to decode.
    pub fn with_resident_limit(
        path: impl AsRef<Path>,
        limit: usize,
    ) -> Result<Self, StoreError> {
        let dataset = Dataset::open(path)?;
        let width = dataset.width();
        let height = dataset.height();
        let channels = dataset.band_count();
        let element_type = dataset.pixel_type().to_data_type();
        let resident = Self::materialize(&dataset, limit)?;
        let reader = Self {
            dataset,
            width,
            height,
            channels,
            element_type,
            resident,
        };
        debug!(
            path = %reader.dataset.path().display(),
            mode = ?reader.mode(),
            "Opened raster reader"
        );
        Ok(reader)
    }

    fn materialize(dataset: &Dataset, limit: usize) -> Result<Option<PixelData>, StoreError> {
        let element_size = dataset.pixel_type().to_data_type().size_bytes();
        let total_bytes = dataset
            .width()
            .checked_mul(dataset.height())
            .and_then(|n| n.checked_mul(dataset.band_count()))
            .and_then(|n| n.checked_mul(element_size));
        let Some(total_bytes) = total_bytes else {
            warn!(
                path = %dataset.path().display(),
                "Raster size overflows; falling back to file-backed reads"
            );
            return Ok(None);
        };
        if total_bytes > limit {
            warn!(
                path = %dataset.path().display(),
                bytes = total_bytes,
                limit,
                "Raster exceeds the resident limit; falling back to file-backed reads"
            );
            return Ok(None);
        }
        let mut probe: Vec<u8> = Vec::new();
        if probe.try_reserve_exact(total_bytes).is_err() {
            warn!(
                path = %dataset.path().display(),
                bytes = total_bytes,
                "Allocation refused; falling back to file-backed reads"
            );
            return Ok(None);
        }
        drop(probe);
        let planes =
            dataset.read_window(Window::full(dataset.width(), dataset.height()))?;
        let interleaved = PixelData::interleave(&planes).map_err(StoreError::Decode)?;
        Ok(Some(interleaved))
    }

    /// The underlying dataset, for metadata access.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Raster width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Raster height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of channels.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Element type of returned regions.
    #[must_use]
    pub fn element_type(&self) -> DataType {
        self.element_type
    }

    /// Which access mode the reader settled into.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        if self.resident.is_some() {
            AccessMode::Resident
        } else {
            AccessMode::FileBacked
        }
    }

    /// Copy out a region of the raster.
    ///
    /// One span selects rows (all columns and channels), two select rows
    /// and columns, three select rows, columns, and channels. The result
    /// axis order is always `(row, col, channel)` whatever the mode.
    ///
    /// # Errors
    /// Returns [`RegionError::UnsupportedDimensionality`] for zero or
    /// more than three spans, [`RegionError::UnsupportedSlice`] for a
    /// strided span, and [`RegionError::Store`] when a file-backed read
    /// fails.
    pub fn region(&self, spans: &[Span]) -> Result<RegionData, RegionError> {
        if spans.is_empty() || spans.len() > 3 {
            return Err(RegionError::UnsupportedDimensionality(format!(
                "Expected between 1 and 3 spans, got {}",
                spans.len()
            )));
        }
        for (axis, span) in spans.iter().enumerate() {
            if span.step != 1 {
                return Err(RegionError::UnsupportedSlice(format!(
                    "Axis {axis} has stride {}; only contiguous slices are supported",
                    span.step
                )));
            }
        }
        let rows = spans[0].clamp(self.height);
        let cols = spans
            .get(1)
            .copied()
            .unwrap_or_else(Span::all)
            .clamp(self.width);
        let channels = spans
            .get(2)
            .copied()
            .unwrap_or_else(Span::all)
            .clamp(self.channels);
        if rows.is_empty() || cols.is_empty() || channels.is_empty() {
            return Ok(RegionData {
                rows: rows.len(),
                cols: cols.len(),
                channels: channels.len(),
                data: PixelData::empty(self.element_type),
            });
        }
        let data = match &self.resident {
            Some(resident) => {
                self.region_resident(resident, rows.clone(), cols.clone(), channels.clone())?
            }
            None => self.region_file_backed(rows.clone(), cols.clone(), channels.clone())?,
        };
        Ok(RegionData {
            rows: rows.len(),
            cols: cols.len(),
            channels: channels.len(),
            data,
        })
    }

    fn region_resident(
        &self,
        resident: &PixelData,
        rows: Range<usize>,
        cols: Range<usize>,
        channels: Range<usize>,
    ) -> Result<PixelData, StoreError> {
        let mut out = PixelData::empty(self.element_type);
        if channels.len() == self.channels {
            // Full channel range keeps each output row contiguous in the
            // resident buffer.
            for row in rows {
                let start = (row * self.width + cols.start) * self.channels;
                resident
                    .extend_range(&mut out, start, cols.len() * self.channels)
                    .map_err(StoreError::Decode)?;
            }
        } else {
            for row in rows {
                for col in cols.clone() {
                    let start = (row * self.width + col) * self.channels + channels.start;
                    resident
                        .extend_range(&mut out, start, channels.len())
                        .map_err(StoreError::Decode)?;
                }
            }
        }
        Ok(out)
    }

    /// One bounded window read covering the row and column spans for
    /// every channel; the channel span is applied after the read.
    fn region_file_backed(
        &self,
        rows: Range<usize>,
        cols: Range<usize>,
        channels: Range<usize>,
    ) -> Result<PixelData, StoreError> {
        let window = Window::new(cols.start, rows.start, cols.len(), rows.len());
        let planes = self.dataset.read_window(window)?;
        PixelData::interleave(&planes[channels]).map_err(StoreError::Decode)
    }
}
