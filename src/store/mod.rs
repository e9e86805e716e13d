//! Raster dataset storage.
//!
//! A [`Dataset`] is either read from an existing GeoTIFF container or
//! created fresh. Created datasets stage their pixel data in a sibling
//! scratch file so that writes of any block order stay cheap, and encode
//! the final container when [`Dataset::close`] is called. Dropping an
//! unclosed created dataset discards the scratch file without producing
//! output.
//!
//! Reads decode on demand, chunk by chunk, behind a small byte-budgeted
//! cache, so pulling one band or one block out of a large container never
//! loads the whole file.
//!
//! # Example
//!
//! ```rust,no_run
//! use mergetiff::{Dataset, Window};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dataset = Dataset::open("orthophoto.tif")?;
//! let block = dataset.read_block(1, Window::new(0, 0, 256, 256))?;
//! println!("Read {} samples from band 1", block.len());
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lru::LruCache;
use tracing::{debug, warn};

use crate::band::{ColorInterpretation, RasterBandRef};
use crate::buffer::PixelData;
use crate::casting::u64_to_usize;
use crate::geo::{Gcp, GeoMetadata, GeoTransform};
use crate::window::Window;

pub(crate) mod geotiff;
mod types;

pub use geotiff::{BigTiff, CodecOptions, Compression, PredictorMode};
pub use types::PixelType;

use geotiff::{BandAttributes, ChunkGrid, EncodeSpec};

/// Suffix appended to the output path to name the staging file of a
/// dataset under construction.
const SCRATCH_SUFFIX: &str = ".scratch";

/// Byte budget of the per-dataset decoded chunk cache.
const CHUNK_CACHE_BYTES: usize = 64 << 20;

/// Errors raised by dataset storage.
#[derive(Debug)]
pub enum StoreError {
    /// The container could not be opened or its structure parsed.
    Open(String),
    /// The container opened but pixel data could not be decoded.
    Decode(String),
    /// A dataset could not be created.
    Create(String),
    /// A write to a dataset was rejected or failed.
    Write(String),
    /// Underlying IO failure.
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Open(msg) => write!(f, "Cannot open dataset: {msg}"),
            StoreError::Decode(msg) => write!(f, "Cannot decode raster data: {msg}"),
            StoreError::Create(msg) => write!(f, "Cannot create dataset: {msg}"),
            StoreError::Write(msg) => write!(f, "Cannot write raster data: {msg}"),
            StoreError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<tiff::TiffError> for StoreError {
    fn from(e: tiff::TiffError) -> Self {
        StoreError::Write(format!("TIFF encoding failed: {e}"))
    }
}

/// Outcome of an encode that may be interrupted by a progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The container was written completely.
    Complete,
    /// The callback requested cancellation; no output remains.
    Cancelled,
}

/// Byte-budgeted LRU cache of decoded chunks.
#[derive(Debug)]
struct ChunkCache {
    entries: LruCache<usize, Arc<Vec<u8>>>,
    bytes: usize,
    budget: usize,
}

impl ChunkCache {
    fn new(budget: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            bytes: 0,
            budget,
        }
    }

    fn get(&mut self, idx: usize) -> Option<Arc<Vec<u8>>> {
        self.entries.get(&idx).map(Arc::clone)
    }

    fn insert(&mut self, idx: usize, chunk: Arc<Vec<u8>>) {
        self.bytes += chunk.len();
        if let Some((_, replaced)) = self.entries.push(idx, chunk) {
            self.bytes -= replaced.len();
        }
        while self.bytes > self.budget {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.bytes -= evicted.len(),
                None => break,
            }
        }
    }
}

#[derive(Debug)]
struct ReadState {
    file: RefCell<File>,
    grid: ChunkGrid,
    compression: u16,
    predictor: u16,
    big_endian: bool,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    cache: RefCell<ChunkCache>,
}

#[derive(Debug)]
struct CreateState {
    scratch_path: PathBuf,
    scratch: RefCell<File>,
    options: CodecOptions,
}

#[derive(Debug)]
enum Mode {
    Read(ReadState),
    Create(CreateState),
    Closed,
}

/// A raster dataset backed by a GeoTIFF container.
///
/// Band indices are 1-based throughout the public API, matching the
/// long-standing raster tooling convention.
#[derive(Debug)]
pub struct Dataset {
    path: PathBuf,
    width: usize,
    height: usize,
    bands: usize,
    pixel_type: PixelType,
    geo: GeoMetadata,
    band_attrs: Vec<BandAttributes>,
    mode: Mode,
}

impl Dataset {
    /// Open an existing container for reading.
    ///
    /// # Errors
    /// Returns [`StoreError::Open`] when the file is missing, not a TIFF,
    /// or uses container features this store does not read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let info = geotiff::read_container(&path)?;
        let file = File::open(&path)
            .map_err(|e| StoreError::Open(format!("Cannot reopen {}: {e}", path.display())))?;
        debug!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            bands = info.bands,
            pixel_type = info.pixel_type.to_data_type().as_str(),
            "Opened dataset"
        );
        Ok(Self {
            path,
            width: info.width,
            height: info.height,
            bands: info.bands,
            pixel_type: info.pixel_type,
            geo: info.geo,
            band_attrs: info.band_attrs,
            mode: Mode::Read(ReadState {
                file: RefCell::new(file),
                grid: info.grid,
                compression: info.compression,
                predictor: info.predictor,
                big_endian: info.big_endian,
                offsets: info.offsets,
                byte_counts: info.byte_counts,
                cache: RefCell::new(ChunkCache::new(CHUNK_CACHE_BYTES)),
            }),
        })
    }

    /// Create a dataset that will be written to `path` on [`close`].
    ///
    /// Pixel data is staged in a sibling `.scratch` file until then, so
    /// bands and blocks may be written in any order.
    ///
    /// # Errors
    /// Returns [`StoreError::Create`] for invalid dimensions or codec
    /// options, for the [`PixelType::Unknown`] type, and when the staging
    /// file cannot be set up.
    ///
    /// [`close`]: Dataset::close
    pub fn create(
        path: impl AsRef<Path>,
        width: usize,
        height: usize,
        bands: usize,
        pixel_type: PixelType,
        options: &CodecOptions,
    ) -> Result<Self, StoreError> {
        options.validate().map_err(StoreError::Create)?;
        let Some(sample) = pixel_type.size_bytes() else {
            return Err(StoreError::Create(
                "Cannot create a dataset with the Unknown pixel type".to_string(),
            ));
        };
        if width == 0 || height == 0 || bands == 0 {
            return Err(StoreError::Create(format!(
                "Dataset dimensions must be positive, got {width}x{height} with {bands} band(s)"
            )));
        }
        let total = width
            .checked_mul(height)
            .and_then(|p| p.checked_mul(bands))
            .and_then(|p| p.checked_mul(sample))
            .ok_or_else(|| StoreError::Create("Dataset dimensions overflow".to_string()))?;
        let path = path.as_ref().to_path_buf();
        let scratch_path = scratch_path_for(&path);
        let scratch = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&scratch_path)
            .map_err(|e| {
                StoreError::Create(format!("Cannot stage {}: {e}", scratch_path.display()))
            })?;
        scratch
            .set_len(total as u64)
            .map_err(|e| StoreError::Create(format!("Cannot size staging file: {e}")))?;
        debug!(
            path = %path.display(),
            width, height, bands,
            pixel_type = pixel_type.to_data_type().as_str(),
            "Created dataset"
        );
        Ok(Self {
            path,
            width,
            height,
            bands,
            pixel_type,
            geo: GeoMetadata::default(),
            band_attrs: vec![BandAttributes::default(); bands],
            mode: Mode::Create(CreateState {
                scratch_path,
                scratch: RefCell::new(scratch),
                options: options.clone(),
            }),
        })
    }

    /// Path of the backing (or future) container file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
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

    /// Number of bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands
    }

    /// Pixel type shared by all bands.
    #[must_use]
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// The affine geotransform, if the dataset is georeferenced.
    #[must_use]
    pub fn geo_transform(&self) -> Option<GeoTransform> {
        self.geo.transform
    }

    /// The spatial reference of the raster, empty when unset.
    #[must_use]
    pub fn projection(&self) -> &str {
        &self.geo.projection
    }

    /// Dataset-level metadata tags.
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.geo.tags
    }

    /// Ground control points, empty for most datasets.
    #[must_use]
    pub fn gcps(&self) -> &[Gcp] {
        &self.geo.gcps
    }

    /// The spatial reference of the control points, empty when unset.
    #[must_use]
    pub fn gcp_projection(&self) -> &str {
        &self.geo.gcp_projection
    }

    /// The no-data marker of a band, if one is declared.
    #[must_use]
    pub fn no_data(&self, band: usize) -> Option<f64> {
        self.band_attrs.get(band.checked_sub(1)?)?.no_data
    }

    /// The color interpretation of a band.
    #[must_use]
    pub fn color_interpretation(&self, band: usize) -> ColorInterpretation {
        band.checked_sub(1)
            .and_then(|idx| self.band_attrs.get(idx))
            .and_then(|attrs| attrs.color_interp)
            .unwrap_or(ColorInterpretation::Undefined)
    }

    /// A handle onto one band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] when the index is out of range.
    pub fn band(&self, index: usize) -> Result<RasterBandRef<'_>, StoreError> {
        self.band_offset(index).map_err(StoreError::Decode)?;
        Ok(RasterBandRef::new(self, index))
    }

    /// Handles onto several bands at once, in the order requested.
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] when any index is out of range.
    pub fn bands(&self, indices: &[usize]) -> Result<Vec<RasterBandRef<'_>>, StoreError> {
        indices.iter().map(|&index| self.band(index)).collect()
    }

    /// Handles onto every band in order.
    #[must_use]
    pub fn all_bands(&self) -> Vec<RasterBandRef<'_>> {
        (1..=self.bands)
            .map(|index| RasterBandRef::new(self, index))
            .collect()
    }

    /// Set the affine geotransform.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets.
    pub fn set_geo_transform(&mut self, transform: GeoTransform) -> Result<(), StoreError> {
        self.writable()?;
        self.geo.transform = Some(transform);
        Ok(())
    }

    /// Set the spatial reference string.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets.
    pub fn set_projection(&mut self, projection: &str) -> Result<(), StoreError> {
        self.writable()?;
        self.geo.projection = projection.to_string();
        Ok(())
    }

    /// Replace the dataset-level metadata tags.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets.
    pub fn set_tags(&mut self, tags: BTreeMap<String, String>) -> Result<(), StoreError> {
        self.writable()?;
        self.geo.tags = tags;
        Ok(())
    }

    /// Set the ground control points and their spatial reference.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets.
    pub fn set_gcps(&mut self, gcps: Vec<Gcp>, projection: &str) -> Result<(), StoreError> {
        self.writable()?;
        self.geo.gcps = gcps;
        self.geo.gcp_projection = projection.to_string();
        Ok(())
    }

    /// Set or clear the no-data marker of a band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets or when the
    /// band index is out of range.
    pub fn set_no_data(&mut self, band: usize, value: Option<f64>) -> Result<(), StoreError> {
        self.writable()?;
        let idx = self.band_offset(band).map_err(StoreError::Write)?;
        self.band_attrs[idx].no_data = value;
        Ok(())
    }

    /// Set the color interpretation of a band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets or when the
    /// band index is out of range.
    pub fn set_color_interpretation(
        &mut self,
        band: usize,
        interp: ColorInterpretation,
    ) -> Result<(), StoreError> {
        self.writable()?;
        let idx = self.band_offset(band).map_err(StoreError::Write)?;
        self.band_attrs[idx].color_interp = Some(interp);
        Ok(())
    }

    /// Read one rectangular block of a band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] for out-of-range bands or windows
    /// and for undecodable chunk payloads.
    pub fn read_block(&self, band: usize, window: Window) -> Result<PixelData, StoreError> {
        let band0 = self.band_offset(band).map_err(StoreError::Decode)?;
        self.check_window(window).map_err(StoreError::Decode)?;
        let data_type = self.pixel_type.to_data_type();
        if window.is_empty() {
            return Ok(PixelData::empty(data_type));
        }
        match &self.mode {
            Mode::Read(state) => self.read_container_block(state, band0, window),
            Mode::Create(state) => self.read_scratch_block(state, band0, window),
            Mode::Closed => Err(StoreError::Decode("Dataset already closed".to_string())),
        }
    }

    /// Read one full band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] for out-of-range bands and for
    /// undecodable chunk payloads.
    pub fn read_band(&self, band: usize) -> Result<PixelData, StoreError> {
        self.read_block(band, Window::full(self.width, self.height))
    }

    /// Read a window of every band as per-band planes.
    ///
    /// Each chunk intersecting the window is decoded once per row of the
    /// window, which keeps multi-band reads cheaper than per-band calls
    /// to [`read_block`](Dataset::read_block).
    ///
    /// # Errors
    /// Returns [`StoreError::Decode`] for out-of-range windows and for
    /// undecodable chunk payloads.
    pub fn read_window(&self, window: Window) -> Result<Vec<PixelData>, StoreError> {
        self.check_window(window).map_err(StoreError::Decode)?;
        let data_type = self.pixel_type.to_data_type();
        if window.is_empty() {
            return Ok((0..self.bands).map(|_| PixelData::empty(data_type)).collect());
        }
        match &self.mode {
            Mode::Read(state) => {
                let sample = self.sample_size().map_err(StoreError::Decode)?;
                let mut planes: Vec<Vec<u8>> = (0..self.bands)
                    .map(|_| Vec::with_capacity(window.area() * sample))
                    .collect();
                for y in window.y..window.y_end() {
                    let row = Window::new(window.x, y, window.width, 1);
                    for idx in state.grid.indices_over(&row) {
                        let (chunk, chunk_window, data_w) = self.fetch_chunk(state, idx)?;
                        let x0 = window.x.max(chunk_window.x);
                        let x1 = window.x_end().min(chunk_window.x_end());
                        let local_y = y - chunk_window.y;
                        for x in x0..x1 {
                            let base =
                                (local_y * data_w + (x - chunk_window.x)) * self.bands * sample;
                            for (b, plane) in planes.iter_mut().enumerate() {
                                let start = base + b * sample;
                                plane.extend_from_slice(&chunk[start..start + sample]);
                            }
                        }
                    }
                }
                planes
                    .into_iter()
                    .map(|plane| {
                        PixelData::from_le_bytes(data_type, &plane).map_err(StoreError::Decode)
                    })
                    .collect()
            }
            Mode::Create(state) => (0..self.bands)
                .map(|band0| self.read_scratch_block(state, band0, window))
                .collect(),
            Mode::Closed => Err(StoreError::Decode("Dataset already closed".to_string())),
        }
    }

    /// Write one rectangular block of a band (1-based).
    ///
    /// Data of a different element type is converted to the dataset type,
    /// saturating on integer overflow.
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets, out-of-range
    /// bands or windows, and length mismatches.
    pub fn write_block(
        &mut self,
        band: usize,
        window: Window,
        data: &PixelData,
    ) -> Result<(), StoreError> {
        let band0 = self.band_offset(band).map_err(StoreError::Write)?;
        self.check_window(window).map_err(StoreError::Write)?;
        if data.len() != window.area() {
            return Err(StoreError::Write(format!(
                "Data length {} does not match the {}x{} window",
                data.len(),
                window.width,
                window.height
            )));
        }
        let Mode::Create(state) = &self.mode else {
            return Err(StoreError::Write("Dataset is read-only".to_string()));
        };
        if window.is_empty() {
            return Ok(());
        }
        let sample = self.sample_size().map_err(StoreError::Write)?;
        let data_type = self.pixel_type.to_data_type();
        let converted;
        let source = if data.data_type() == data_type {
            data
        } else {
            converted = data.convert(data_type);
            &converted
        };
        let mut bytes = Vec::with_capacity(source.len() * sample);
        source
            .extend_le_bytes(&mut bytes, 0, source.len())
            .map_err(StoreError::Write)?;
        let row_bytes = window.width * sample;
        let mut file = state.scratch.borrow_mut();
        for (row, y) in (window.y..window.y_end()).enumerate() {
            let pos = ((band0 * self.height + y) * self.width + window.x) * sample;
            file.seek(SeekFrom::Start(pos as u64))?;
            file.write_all(&bytes[row * row_bytes..(row + 1) * row_bytes])?;
        }
        Ok(())
    }

    /// Write one full band (1-based).
    ///
    /// # Errors
    /// Returns [`StoreError::Write`] on read-only datasets, out-of-range
    /// bands, and length mismatches.
    pub fn write_band(&mut self, band: usize, data: &PixelData) -> Result<(), StoreError> {
        self.write_block(band, Window::full(self.width, self.height), data)
    }

    /// Encode the staged pixels and metadata into the final container.
    ///
    /// Read-mode datasets close without touching the file.
    ///
    /// # Errors
    /// Returns [`StoreError`] when encoding fails; the partial output and
    /// the staging file are removed before returning.
    pub fn close(mut self) -> Result<(), StoreError> {
        match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Create(state) => self.encode_and_finish(&state),
            Mode::Read(_) | Mode::Closed => Ok(()),
        }
    }

    fn encode_and_finish(&self, state: &CreateState) -> Result<(), StoreError> {
        let file = File::create(&self.path)
            .map_err(|e| StoreError::Create(format!("Cannot create {}: {e}", self.path.display())))?;
        let spec = EncodeSpec {
            width: self.width,
            height: self.height,
            bands: self.bands,
            pixel_type: self.pixel_type,
            geo: &self.geo,
            band_attrs: &self.band_attrs,
            options: &state.options,
        };
        let result = geotiff::encode_tiff(
            BufWriter::new(file),
            &spec,
            |window| self.scratch_window_interleaved(state, window),
            None,
        );
        match result {
            Ok(Materialized::Complete) => {
                remove_quietly(&state.scratch_path);
                debug!(path = %self.path.display(), "Finished dataset");
                Ok(())
            }
            Ok(Materialized::Cancelled) => {
                remove_quietly(&self.path);
                remove_quietly(&state.scratch_path);
                Err(StoreError::Write("Encoding was cancelled".to_string()))
            }
            Err(e) => {
                remove_quietly(&self.path);
                remove_quietly(&state.scratch_path);
                Err(e)
            }
        }
    }

    /// Read a window out of the planar staging file as pixel-interleaved
    /// little-endian bytes, the layout the encoder consumes.
    fn scratch_window_interleaved(
        &self,
        state: &CreateState,
        window: Window,
    ) -> Result<Vec<u8>, StoreError> {
        let sample = self.sample_size().map_err(StoreError::Write)?;
        let area = window.area();
        let row_bytes = window.width * sample;
        let mut planes: Vec<Vec<u8>> = Vec::with_capacity(self.bands);
        {
            let mut file = state.scratch.borrow_mut();
            for band0 in 0..self.bands {
                let mut plane = vec![0u8; area * sample];
                for (row, y) in (window.y..window.y_end()).enumerate() {
                    let pos = ((band0 * self.height + y) * self.width + window.x) * sample;
                    file.seek(SeekFrom::Start(pos as u64))?;
                    file.read_exact(&mut plane[row * row_bytes..(row + 1) * row_bytes])
                        .map_err(|e| {
                            StoreError::Write(format!("Staging file readback failed: {e}"))
                        })?;
                }
                planes.push(plane);
            }
        }
        let mut out = vec![0u8; area * self.bands * sample];
        for p in 0..area {
            for (b, plane) in planes.iter().enumerate() {
                out[(p * self.bands + b) * sample..(p * self.bands + b + 1) * sample]
                    .copy_from_slice(&plane[p * sample..(p + 1) * sample]);
            }
        }
        Ok(out)
    }

    fn read_container_block(
        &self,
        state: &ReadState,
        band0: usize,
        window: Window,
    ) -> Result<PixelData, StoreError> {
        let sample = self.sample_size().map_err(StoreError::Decode)?;
        let mut band_bytes: Vec<u8> = Vec::with_capacity(window.area() * sample);
        for y in window.y..window.y_end() {
            let row = Window::new(window.x, y, window.width, 1);
            for idx in state.grid.indices_over(&row) {
                let (chunk, chunk_window, data_w) = self.fetch_chunk(state, idx)?;
                let x0 = window.x.max(chunk_window.x);
                let x1 = window.x_end().min(chunk_window.x_end());
                let local_y = y - chunk_window.y;
                for x in x0..x1 {
                    let start =
                        ((local_y * data_w + (x - chunk_window.x)) * self.bands + band0) * sample;
                    band_bytes.extend_from_slice(&chunk[start..start + sample]);
                }
            }
        }
        PixelData::from_le_bytes(self.pixel_type.to_data_type(), &band_bytes)
            .map_err(StoreError::Decode)
    }

    fn read_scratch_block(
        &self,
        state: &CreateState,
        band0: usize,
        window: Window,
    ) -> Result<PixelData, StoreError> {
        let sample = self.sample_size().map_err(StoreError::Decode)?;
        let row_bytes = window.width * sample;
        let mut bytes = vec![0u8; window.area() * sample];
        let mut file = state.scratch.borrow_mut();
        for (row, y) in (window.y..window.y_end()).enumerate() {
            let pos = ((band0 * self.height + y) * self.width + window.x) * sample;
            file.seek(SeekFrom::Start(pos as u64))?;
            file.read_exact(&mut bytes[row * row_bytes..(row + 1) * row_bytes])
                .map_err(|e| StoreError::Decode(format!("Staging file read failed: {e}")))?;
        }
        drop(file);
        PixelData::from_le_bytes(self.pixel_type.to_data_type(), &bytes)
            .map_err(StoreError::Decode)
    }

    /// Fetch a decoded chunk, via the cache when possible. Returns the
    /// chunk bytes, its raster coverage, and its padded data width.
    fn fetch_chunk(
        &self,
        state: &ReadState,
        idx: usize,
    ) -> Result<(Arc<Vec<u8>>, Window, usize), StoreError> {
        let chunk_window = state
            .grid
            .window(idx)
            .ok_or_else(|| StoreError::Decode(format!("Chunk {idx} is out of range")))?;
        let (data_w, data_h) = state
            .grid
            .data_dims(idx)
            .ok_or_else(|| StoreError::Decode(format!("Chunk {idx} is out of range")))?;
        if let Some(hit) = state.cache.borrow_mut().get(idx) {
            return Ok((hit, chunk_window, data_w));
        }
        let offset = state
            .offsets
            .get(idx)
            .copied()
            .ok_or_else(|| StoreError::Decode(format!("Chunk {idx} has no offset entry")))?;
        let count = state
            .byte_counts
            .get(idx)
            .copied()
            .ok_or_else(|| StoreError::Decode(format!("Chunk {idx} has no byte count entry")))?;
        let mut raw = vec![0u8; u64_to_usize(count).map_err(StoreError::Decode)?];
        {
            let mut file = state.file.borrow_mut();
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut raw)
                .map_err(|e| StoreError::Decode(format!("Chunk {idx} payload read failed: {e}")))?;
        }
        let sample = self.sample_size().map_err(StoreError::Decode)?;
        let expected = data_w * data_h * self.bands * sample;
        let decoded = geotiff::decode_chunk(
            &raw,
            state.compression,
            state.predictor,
            state.big_endian,
            data_w,
            self.bands,
            sample,
            expected,
        )?;
        let chunk = Arc::new(decoded);
        state.cache.borrow_mut().insert(idx, Arc::clone(&chunk));
        Ok((chunk, chunk_window, data_w))
    }

    fn writable(&self) -> Result<(), StoreError> {
        match &self.mode {
            Mode::Create(_) => Ok(()),
            Mode::Read(_) | Mode::Closed => {
                Err(StoreError::Write("Dataset is read-only".to_string()))
            }
        }
    }

    fn band_offset(&self, band: usize) -> Result<usize, String> {
        if (1..=self.bands).contains(&band) {
            Ok(band - 1)
        } else {
            Err(format!("Band {band} is out of range 1..={}", self.bands))
        }
    }

    fn check_window(&self, window: Window) -> Result<(), String> {
        if Window::full(self.width, self.height).contains(&window) {
            Ok(())
        } else {
            Err(format!(
                "Window {}x{}+{}+{} exceeds the {}x{} raster",
                window.width, window.height, window.x, window.y, self.width, self.height
            ))
        }
    }

    fn sample_size(&self) -> Result<usize, String> {
        self.pixel_type
            .size_bytes()
            .ok_or_else(|| "The pixel layout of this dataset is not supported".to_string())
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Mode::Create(state) = &self.mode {
            if let Err(error) = fs::remove_file(&state.scratch_path) {
                warn!(
                    path = %state.scratch_path.display(),
                    %error,
                    "Could not remove staging file"
                );
            }
        }
    }
}

fn scratch_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(SCRATCH_SUFFIX);
    PathBuf::from(name)
}

pub(crate) fn remove_quietly(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        warn!(path = %path.display(), %error, "Could not remove file");
    }
}
