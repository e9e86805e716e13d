//! Band handles and merge input sources.
//!
//! A [`RasterBandRef`] is a cheap borrowed handle onto one band of an
//! open [`Dataset`]. A [`BandSource`] tags where merge input pixels come
//! from: a band of a dataset, or a raw in-memory plane carrying its own
//! band attributes.

use crate::buffer::{PixelData, RasterBuffer};
use crate::store::{Dataset, PixelType, StoreError};
use crate::window::Window;

/// How the samples of a band should be interpreted for display.
///
/// The names follow the usual raster tooling vocabulary; anything this
/// crate does not model reads as [`Other`](ColorInterpretation::Other).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorInterpretation {
    /// No declared interpretation.
    Undefined,
    /// Grayscale intensity.
    Gray,
    /// Red channel.
    Red,
    /// Green channel.
    Green,
    /// Blue channel.
    Blue,
    /// Alpha (opacity) channel.
    Alpha,
    /// An interpretation this crate does not model.
    Other,
}

impl ColorInterpretation {
    /// The canonical display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ColorInterpretation::Undefined => "Undefined",
            ColorInterpretation::Gray => "Gray",
            ColorInterpretation::Red => "Red",
            ColorInterpretation::Green => "Green",
            ColorInterpretation::Blue => "Blue",
            ColorInterpretation::Alpha => "Alpha",
            ColorInterpretation::Other => "Other",
        }
    }

    /// Parse a display name; unrecognized names parse as `Other`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "Undefined" => ColorInterpretation::Undefined,
            "Gray" => ColorInterpretation::Gray,
            "Red" => ColorInterpretation::Red,
            "Green" => ColorInterpretation::Green,
            "Blue" => ColorInterpretation::Blue,
            "Alpha" => ColorInterpretation::Alpha,
            _ => ColorInterpretation::Other,
        }
    }
}

/// A borrowed handle onto one band (1-based) of an open dataset.
#[derive(Clone, Copy)]
pub struct RasterBandRef<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> RasterBandRef<'a> {
    pub(crate) fn new(dataset: &'a Dataset, index: usize) -> Self {
        Self { dataset, index }
    }

    /// The dataset this band belongs to.
    #[must_use]
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    /// The 1-based band index within its dataset.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Band width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        self.dataset.width()
    }

    /// Band height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        self.dataset.height()
    }

    /// Element type of the band.
    #[must_use]
    pub fn pixel_type(&self) -> PixelType {
        self.dataset.pixel_type()
    }

    /// The no-data marker, if one is declared.
    #[must_use]
    pub fn no_data(&self) -> Option<f64> {
        self.dataset.no_data(self.index)
    }

    /// The color interpretation of the band.
    #[must_use]
    pub fn color_interpretation(&self) -> ColorInterpretation {
        self.dataset.color_interpretation(self.index)
    }

    /// Read the full band.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the band cannot be decoded.
    pub fn read(&self) -> Result<PixelData, StoreError> {
        self.dataset.read_band(self.index)
    }

    /// Read one rectangular block of the band.
    ///
    /// # Errors
    /// Returns [`StoreError`] for out-of-range windows and undecodable
    /// chunks.
    pub fn read_block(&self, window: Window) -> Result<PixelData, StoreError> {
        self.dataset.read_block(self.index, window)
    }
}

/// One input band of a merge, tagged by where its pixels come from.
///
/// Dataset-backed sources stream block by block; raw sources sit in
/// memory already and are written in one piece.
#[derive(Clone, Copy)]
pub enum BandSource<'a> {
    /// A band of an open dataset.
    Band(RasterBandRef<'a>),
    /// An in-memory raster plane with its own band attributes.
    Raw {
        /// The pixel plane.
        buffer: &'a RasterBuffer,
        /// No-data marker to stamp onto the output band.
        no_data: Option<f64>,
        /// Color interpretation to stamp onto the output band.
        color_interp: ColorInterpretation,
    },
}

impl<'a> BandSource<'a> {
    /// Wrap an in-memory plane with no no-data marker and the gray
    /// color interpretation given to anonymous buffers.
    #[must_use]
    pub fn raw(buffer: &'a RasterBuffer) -> Self {
        BandSource::Raw {
            buffer,
            no_data: None,
            color_interp: ColorInterpretation::Gray,
        }
    }

    /// Wrap an in-memory plane together with its band attributes.
    #[must_use]
    pub fn raw_with(
        buffer: &'a RasterBuffer,
        no_data: Option<f64>,
        color_interp: ColorInterpretation,
    ) -> Self {
        BandSource::Raw {
            buffer,
            no_data,
            color_interp,
        }
    }

    /// Source width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        match self {
            BandSource::Band(band) => band.width(),
            BandSource::Raw { buffer, .. } => buffer.width(),
        }
    }

    /// Source height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        match self {
            BandSource::Band(band) => band.height(),
            BandSource::Raw { buffer, .. } => buffer.height(),
        }
    }

    /// Element type of the source.
    #[must_use]
    pub fn pixel_type(&self) -> PixelType {
        match self {
            BandSource::Band(band) => band.pixel_type(),
            BandSource::Raw { buffer, .. } => PixelType::from_data_type(buffer.data_type()),
        }
    }

    /// The no-data marker the output band should carry.
    #[must_use]
    pub fn no_data(&self) -> Option<f64> {
        match self {
            BandSource::Band(band) => band.no_data(),
            BandSource::Raw { no_data, .. } => *no_data,
        }
    }

    /// The color interpretation the output band should carry.
    #[must_use]
    pub fn color_interpretation(&self) -> ColorInterpretation {
        match self {
            BandSource::Band(band) => band.color_interpretation(),
            BandSource::Raw { color_interp, .. } => *color_interp,
        }
    }

    /// Whether the source is an in-memory plane.
    #[must_use]
    pub fn is_raw(&self) -> bool {
        matches!(self, BandSource::Raw { .. })
    }

    /// Read the full source plane.
    ///
    /// # Errors
    /// Returns [`StoreError`] when a dataset-backed source cannot be
    /// decoded.
    pub fn read(&self) -> Result<PixelData, StoreError> {
        self.read_block(Window::full(self.width(), self.height()))
    }

    /// Read one rectangular block of the source.
    ///
    /// # Errors
    /// Returns [`StoreError`] for out-of-range windows and undecodable
    /// chunks.
    pub fn read_block(&self, window: Window) -> Result<PixelData, StoreError> {
        match self {
            BandSource::Band(band) => band.read_block(window),
            BandSource::Raw { buffer, .. } => {
                buffer.read_window(window).map_err(StoreError::Decode)
            }
        }
    }
}

impl<'a> From<RasterBandRef<'a>> for BandSource<'a> {
    fn from(band: RasterBandRef<'a>) -> Self {
        BandSource::Band(band)
    }
}

impl<'a> From<&'a RasterBuffer> for BandSource<'a> {
    fn from(buffer: &'a RasterBuffer) -> Self {
        BandSource::raw(buffer)
    }
}
