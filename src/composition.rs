//! Virtual band compositions.
//!
//! A [`Composition`] stacks band sources from any mix of open datasets
//! and in-memory planes without copying a pixel. Materializing streams
//! the stack straight into an output container tile by tile, so the
//! composition itself never holds more than one tile row of data.
//!
//! # Example
//!
//! ```rust,no_run
//! use mergetiff::{BandSource, Composition, CodecOptions, Dataset};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rgb = Dataset::open("rgb.tif")?;
//! let mask = Dataset::open("mask.tif")?;
//! let mut composition = Composition::new(rgb.width(), rgb.height(), rgb.pixel_type());
//! for band in rgb.all_bands() {
//!     composition.add_band(BandSource::from(band))?;
//! }
//! composition.add_band(BandSource::from(mask.band(1)?))?;
//! composition.propagate_from(&rgb);
//! composition.materialize("stacked.tif", &CodecOptions::default())?;
//! # Ok(())
//! # }
//! ```

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use tracing::debug;

use crate::band::{BandSource, ColorInterpretation};
use crate::buffer::PixelData;
use crate::geo::GeoMetadata;
use crate::merge::MergeError;
use crate::store::geotiff::{self, BandAttributes, EncodeSpec};
use crate::store::{remove_quietly, CodecOptions, Dataset, Materialized, PixelType, StoreError};
use crate::window::Window;

/// A virtual stack of band sources sharing one raster shape.
pub struct Composition<'a> {
    width: usize,
    height: usize,
    pixel_type: PixelType,
    bands: Vec<BandSource<'a>>,
    metadata: GeoMetadata,
}

impl<'a> Composition<'a> {
    /// Create an empty composition of the given shape and element type.
    ///
    /// Sources of other element types may still be attached; their
    /// pixels are converted while materializing.
    #[must_use]
    pub fn new(width: usize, height: usize, pixel_type: PixelType) -> Self {
        Self {
            width,
            height,
            pixel_type,
            bands: Vec::new(),
            metadata: GeoMetadata::default(),
        }
    }

    /// Composition width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Composition height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Element type of the materialized output.
    #[must_use]
    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    /// Number of attached bands.
    #[must_use]
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// The attached band sources in output order.
    #[must_use]
    pub fn bands(&self) -> &[BandSource<'a>] {
        &self.bands
    }

    /// The georeferencing bundle the output will carry.
    #[must_use]
    pub fn metadata(&self) -> &GeoMetadata {
        &self.metadata
    }

    /// Attach a band source as the next output band.
    ///
    /// # Errors
    /// Returns [`MergeError::SpecMismatch`] when the source shape differs
    /// from the composition shape.
    pub fn add_band(&mut self, source: BandSource<'a>) -> Result<(), MergeError> {
        if source.width() != self.width || source.height() != self.height {
            return Err(MergeError::SpecMismatch(format!(
                "Band {} is {}x{} but the composition is {}x{}",
                self.bands.len() + 1,
                source.width(),
                source.height(),
                self.width,
                self.height
            )));
        }
        self.bands.push(source);
        Ok(())
    }

    /// Replace the georeferencing bundle of the output.
    pub fn set_metadata(&mut self, metadata: GeoMetadata) {
        self.metadata = metadata;
    }

    /// Copy the georeferencing bundle of an open dataset onto the output.
    pub fn propagate_from(&mut self, reference: &Dataset) {
        self.metadata = GeoMetadata::read(reference);
    }

    /// Materialize the composition into a container at `path`.
    ///
    /// # Errors
    /// Returns [`MergeError::EmptySpec`] for a composition without bands
    /// and [`MergeError::Store`] when encoding fails. No partial output
    /// is left behind on failure.
    pub fn materialize(
        &self,
        path: impl AsRef<Path>,
        options: &CodecOptions,
    ) -> Result<(), MergeError> {
        let mut keep_going = |_: f64| true;
        match self.materialize_with(path, options, &mut keep_going)? {
            Materialized::Complete => Ok(()),
            Materialized::Cancelled => Err(MergeError::Store(StoreError::Write(
                "Encoding was cancelled".to_string(),
            ))),
        }
    }

    /// Materialize with a progress callback.
    ///
    /// The callback receives the completed fraction after each tile row;
    /// returning `false` cancels the encode, removes the partial output,
    /// and yields [`Materialized::Cancelled`].
    ///
    /// # Errors
    /// Returns [`MergeError::EmptySpec`] for a composition without bands
    /// and [`MergeError::Store`] when encoding fails. No partial output
    /// is left behind on failure or cancellation.
    pub fn materialize_with(
        &self,
        path: impl AsRef<Path>,
        options: &CodecOptions,
        progress: &mut dyn FnMut(f64) -> bool,
    ) -> Result<Materialized, MergeError> {
        if self.bands.is_empty() {
            return Err(MergeError::EmptySpec);
        }
        let path = path.as_ref();
        let data_type = self.pixel_type.to_data_type();
        let sample = data_type.size_bytes();
        let band_attrs: Vec<BandAttributes> = self
            .bands
            .iter()
            .map(|source| BandAttributes {
                no_data: source.no_data(),
                color_interp: match source.color_interpretation() {
                    ColorInterpretation::Undefined => None,
                    other => Some(other),
                },
            })
            .collect();
        let spec = EncodeSpec {
            width: self.width,
            height: self.height,
            bands: self.bands.len(),
            pixel_type: self.pixel_type,
            geo: &self.metadata,
            band_attrs: &band_attrs,
            options,
        };
        let file = File::create(path).map_err(|e| {
            StoreError::Create(format!("Cannot create {}: {e}", path.display()))
        })?;
        let tile_source = |window: Window| -> Result<Vec<u8>, StoreError> {
            let mut planes = Vec::with_capacity(self.bands.len());
            for band in &self.bands {
                let block = band.read_block(window)?;
                planes.push(if block.data_type() == data_type {
                    block
                } else {
                    block.convert(data_type)
                });
            }
            let interleaved = PixelData::interleave(&planes).map_err(StoreError::Write)?;
            let mut bytes = Vec::with_capacity(interleaved.len() * sample);
            interleaved
                .extend_le_bytes(&mut bytes, 0, interleaved.len())
                .map_err(StoreError::Write)?;
            Ok(bytes)
        };
        let outcome =
            geotiff::encode_tiff(BufWriter::new(file), &spec, tile_source, Some(progress));
        match outcome {
            Ok(Materialized::Complete) => {
                debug!(
                    path = %path.display(),
                    bands = self.bands.len(),
                    "Materialized composition"
                );
                Ok(Materialized::Complete)
            }
            Ok(Materialized::Cancelled) => {
                remove_quietly(path);
                debug!(path = %path.display(), "Materialization cancelled");
                Ok(Materialized::Cancelled)
            }
            Err(e) => {
                remove_quietly(path);
                Err(MergeError::Store(e))
            }
        }
    }
}
