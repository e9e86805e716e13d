//! Merging bands from several sources into one output dataset.
//!
//! A merge takes an ordered list of [`BandSource`] inputs and writes a
//! dataset holding one band per source, in that order. An optional
//! reference dataset contributes the georeferencing of the output, and
//! per-band no-data markers and color interpretations are carried over
//! from each source. Sources of differing pixel types are converted to
//! the type of the first source.
//!
//! # Example
//! ```rust,no_run
//! use mergetiff::{BandSource, Dataset, Merger};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rgb = Dataset::open("rgb.tif")?;
//! let mask = Dataset::open("mask.tif")?;
//! let sources = [
//!     BandSource::from(rgb.band(1)?),
//!     BandSource::from(rgb.band(2)?),
//!     BandSource::from(rgb.band(3)?),
//!     BandSource::from(mask.band(1)?),
//! ];
//! Merger::new(&sources)
//!     .with_reference(&rgb)
//!     .create("merged.tif")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use tracing::debug;

use crate::band::{BandSource, ColorInterpretation};
use crate::composition::Composition;
use crate::geo;
use crate::progress::{Progress, ProgressCallback};
use crate::store::{CodecOptions, Dataset, Materialized, PixelType, StoreError};
use crate::window::{plan_blocks, Window, DEFAULT_BLOCK_DIM};

/// Errors raised while merging bands.
#[derive(Debug)]
pub enum MergeError {
    /// The inputs disagree on shape.
    SpecMismatch(String),
    /// No input bands were supplied.
    EmptySpec,
    /// The storage layer failed.
    Store(StoreError),
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::SpecMismatch(msg) => write!(f, "Merge inputs mismatch: {msg}"),
            MergeError::EmptySpec => write!(f, "No input bands were supplied"),
            MergeError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MergeError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for MergeError {
    fn from(e: StoreError) -> Self {
        MergeError::Store(e)
    }
}

/// How the output dataset is assembled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Stage each band with one full-band read and write.
    WholeBand,
    /// Stage each band window by window, bounding memory by the given
    /// maximum block edge length in pixels.
    Blocked(usize),
    /// Stream tile rows straight from the sources into the encoder
    /// without a staging file.
    #[default]
    Virtual,
}

impl MergeStrategy {
    /// Blocked staging with the default block edge length.
    #[must_use]
    pub const fn blocked() -> Self {
        MergeStrategy::Blocked(DEFAULT_BLOCK_DIM)
    }
}

/// Result of a merge that carries a progress callback.
pub enum MergeOutcome {
    /// The merged dataset, reopened for reading.
    Complete(Dataset),
    /// The callback requested cancellation; no output remains.
    Cancelled,
}

/// Builder for merging band sources into a new dataset.
pub struct Merger<'a> {
    sources: Vec<BandSource<'a>>,
    reference: Option<&'a Dataset>,
    strategy: MergeStrategy,
    options: CodecOptions,
    progress: Option<ProgressCallback<'a>>,
}

impl<'a> Merger<'a> {
    /// Start a merge over the given sources, kept in order.
    #[must_use]
    pub fn new(sources: &[BandSource<'a>]) -> Self {
        Self {
            sources: sources.to_vec(),
            reference: None,
            strategy: MergeStrategy::default(),
            options: CodecOptions::default(),
            progress: None,
        }
    }

    /// Propagate the georeferencing of `reference` onto the output.
    #[must_use]
    pub fn with_reference(mut self, reference: &'a Dataset) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Select the assembly strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the codec configuration of the output.
    #[must_use]
    pub fn with_options(mut self, options: CodecOptions) -> Self {
        self.options = options;
        self
    }

    /// Install a progress callback.
    ///
    /// The callback is invoked with [`Progress`] snapshots at the
    /// granularity of the selected strategy; returning `false` cancels
    /// the merge and removes any partial output.
    #[must_use]
    pub fn with_progress(mut self, callback: impl FnMut(&Progress) -> bool + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Run the merge, writing the output dataset to `path`.
    ///
    /// The output holds one band per source, in source order, using the
    /// pixel type of the first source. For each band the pixel data is
    /// written first, then the no-data marker, then the color
    /// interpretation.
    ///
    /// # Errors
    /// Returns [`MergeError::EmptySpec`] when no sources were supplied,
    /// [`MergeError::SpecMismatch`] when the sources disagree on shape,
    /// and [`MergeError::Store`] when storage fails. No partial output
    /// is left behind on failure or cancellation.
    pub fn create(self, path: impl AsRef<Path>) -> Result<MergeOutcome, MergeError> {
        let path = path.as_ref();
        let (width, height) = self.validate()?;
        let pixel_type = self.sources[0].pixel_type();
        debug!(
            path = %path.display(),
            bands = self.sources.len(),
            width,
            height,
            strategy = ?self.strategy,
            "Merging bands"
        );
        match self.strategy {
            MergeStrategy::Virtual => self.create_virtual(path, width, height, pixel_type),
            MergeStrategy::WholeBand => self.create_staged(path, width, height, pixel_type, None),
            MergeStrategy::Blocked(dim) => {
                self.create_staged(path, width, height, pixel_type, Some(dim.max(1)))
            }
        }
    }

    fn validate(&self) -> Result<(usize, usize), MergeError> {
        let first = self.sources.first().ok_or(MergeError::EmptySpec)?;
        let (width, height) = (first.width(), first.height());
        if width == 0 || height == 0 {
            return Err(MergeError::SpecMismatch(format!(
                "Band 1 is {width}x{height}; empty rasters cannot be merged"
            )));
        }
        for (idx, source) in self.sources.iter().enumerate().skip(1) {
            if source.width() != width || source.height() != height {
                return Err(MergeError::SpecMismatch(format!(
                    "Band {} is {}x{} but band 1 is {width}x{height}",
                    idx + 1,
                    source.width(),
                    source.height()
                )));
            }
        }
        Ok((width, height))
    }

    /// Stream the merge through a [`Composition`] without staging.
    fn create_virtual(
        mut self,
        path: &Path,
        width: usize,
        height: usize,
        pixel_type: PixelType,
    ) -> Result<MergeOutcome, MergeError> {
        let mut composition = Composition::new(width, height, pixel_type);
        for source in &self.sources {
            composition.add_band(*source)?;
        }
        if let Some(reference) = self.reference {
            composition.propagate_from(reference);
        }
        let bands = self.sources.len();
        let mut progress = self.progress.take();
        let mut forward = |fraction: f64| -> bool {
            match progress.as_mut() {
                Some(report) => report(&Progress {
                    fraction,
                    band: 0,
                    bands,
                    window: 0,
                    windows: 0,
                    block_dim: 0,
                }),
                None => true,
            }
        };
        match composition.materialize_with(path, &self.options, &mut forward)? {
            Materialized::Complete => Ok(MergeOutcome::Complete(Dataset::open(path)?)),
            Materialized::Cancelled => Ok(MergeOutcome::Cancelled),
        }
    }

    /// Stage the merge through a create-mode dataset, whole bands or
    /// window by window.
    fn create_staged(
        mut self,
        path: &Path,
        width: usize,
        height: usize,
        pixel_type: PixelType,
        block_dim: Option<usize>,
    ) -> Result<MergeOutcome, MergeError> {
        let bands = self.sources.len();
        let mut output = Dataset::create(path, width, height, bands, pixel_type, &self.options)?;
        geo::propagate(self.reference, &mut output)?;
        let mut progress = self.progress.take();
        let mut keep_going = |snapshot: &Progress| -> bool {
            match progress.as_mut() {
                Some(report) => report(snapshot),
                None => true,
            }
        };
        match block_dim {
            None => {
                for (idx, source) in self.sources.iter().enumerate() {
                    let band = idx + 1;
                    let data = source.read()?;
                    output.write_band(band, &data)?;
                    copy_band_attributes(&mut output, band, source)?;
                    let cont = keep_going(&Progress {
                        fraction: band as f64 / bands as f64,
                        band,
                        bands,
                        window: 0,
                        windows: 0,
                        block_dim: 0,
                    });
                    if !cont {
                        drop(output);
                        debug!(path = %path.display(), band, "Merge cancelled");
                        return Ok(MergeOutcome::Cancelled);
                    }
                }
            }
            Some(dim) => {
                let windows: Vec<Window> = plan_blocks(width, height, dim).collect();
                let per_band = windows.len();
                let total = bands * per_band;
                for (idx, source) in self.sources.iter().enumerate() {
                    let band = idx + 1;
                    if source.is_raw() {
                        // An in-memory band gains nothing from window
                        // staging; write it in one pass.
                        let data = source.read()?;
                        output.write_band(band, &data)?;
                        copy_band_attributes(&mut output, band, source)?;
                        let cont = keep_going(&Progress {
                            fraction: (band * per_band) as f64 / total as f64,
                            band,
                            bands,
                            window: per_band,
                            windows: per_band,
                            block_dim: dim,
                        });
                        if !cont {
                            drop(output);
                            debug!(path = %path.display(), band, "Merge cancelled");
                            return Ok(MergeOutcome::Cancelled);
                        }
                        continue;
                    }
                    for (done, window) in windows.iter().enumerate() {
                        let data = source.read_block(*window)?;
                        output.write_block(band, *window, &data)?;
                        let cont = keep_going(&Progress {
                            fraction: (idx * per_band + done + 1) as f64 / total as f64,
                            band,
                            bands,
                            window: done + 1,
                            windows: per_band,
                            block_dim: dim,
                        });
                        if !cont {
                            drop(output);
                            debug!(path = %path.display(), band, "Merge cancelled");
                            return Ok(MergeOutcome::Cancelled);
                        }
                    }
                    copy_band_attributes(&mut output, band, source)?;
                }
            }
        }
        output.close()?;
        debug!(path = %path.display(), bands, "Merged dataset written");
        Ok(MergeOutcome::Complete(Dataset::open(path)?))
    }
}

/// Carry the no-data marker and color interpretation of `source` onto
/// band `band` of `output`.
fn copy_band_attributes(
    output: &mut Dataset,
    band: usize,
    source: &BandSource<'_>,
) -> Result<(), StoreError> {
    if let Some(no_data) = source.no_data() {
        output.set_no_data(band, Some(no_data))?;
    }
    match source.color_interpretation() {
        ColorInterpretation::Undefined => {}
        interp => output.set_color_interpretation(band, interp)?,
    }
    Ok(())
}

/// Merge `sources` into a new dataset at `path` in one call.
///
/// Equivalent to building a [`Merger`] with the default strategy and no
/// progress callback. The merged dataset is returned open for reading.
///
/// # Errors
/// Returns [`MergeError`] when validation or storage fails.
pub fn create_merged_dataset<'a>(
    path: impl AsRef<Path>,
    reference: Option<&'a Dataset>,
    sources: &[BandSource<'a>],
    options: &CodecOptions,
) -> Result<Dataset, MergeError> {
    let mut merger = Merger::new(sources).with_options(options.clone());
    if let Some(reference) = reference {
        merger = merger.with_reference(reference);
    }
    match merger.create(path)? {
        MergeOutcome::Complete(dataset) => Ok(dataset),
        MergeOutcome::Cancelled => Err(MergeError::Store(StoreError::Write(
            "Merge was cancelled".to_string(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DataType, PixelData, RasterBuffer};
    use std::collections::BTreeMap;

    fn gradient(width: usize, height: usize, seed: usize) -> PixelData {
        PixelData::F64(
            (0..width * height)
                .map(|i| ((i * 7 + seed * 13) % 251) as f64)
                .collect(),
        )
    }

    fn small_options() -> CodecOptions {
        CodecOptions::default().with_tile_size(16, 16)
    }

    fn build_dataset(
        path: &Path,
        width: usize,
        height: usize,
        bands: usize,
        pixel_type: PixelType,
    ) -> Dataset {
        let mut dataset =
            Dataset::create(path, width, height, bands, pixel_type, &small_options()).unwrap();
        for band in 1..=bands {
            let data = gradient(width, height, band).convert(pixel_type.to_data_type());
            dataset.write_band(band, &data).unwrap();
        }
        dataset.close().unwrap();
        Dataset::open(path).unwrap()
    }

    fn unwrap_complete(outcome: MergeOutcome) -> Dataset {
        match outcome {
            MergeOutcome::Complete(dataset) => dataset,
            MergeOutcome::Cancelled => panic!("merge was cancelled"),
        }
    }

    #[test]
    fn test_merge_preserves_band_order_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let rgb = build_dataset(&dir.path().join("rgb.tif"), 40, 30, 3, PixelType::U8);
        let extra = build_dataset(&dir.path().join("extra.tif"), 40, 30, 1, PixelType::U8);
        let buffer =
            RasterBuffer::new(40, 30, gradient(40, 30, 9).convert(DataType::U8)).unwrap();
        let sources = [
            BandSource::from(rgb.band(3).unwrap()),
            BandSource::from(extra.band(1).unwrap()),
            BandSource::raw(&buffer),
            BandSource::from(rgb.band(1).unwrap()),
        ];
        let out = dir.path().join("merged.tif");
        let merged = unwrap_complete(
            Merger::new(&sources)
                .with_options(small_options())
                .create(&out)
                .unwrap(),
        );
        assert_eq!(merged.band_count(), 4);
        assert_eq!(merged.pixel_type(), PixelType::U8);
        assert_eq!(merged.read_band(1).unwrap(), rgb.read_band(3).unwrap());
        assert_eq!(merged.read_band(2).unwrap(), extra.read_band(1).unwrap());
        assert_eq!(merged.read_band(3).unwrap(), *buffer.data());
        assert_eq!(merged.read_band(4).unwrap(), rgb.read_band(1).unwrap());
    }

    #[test]
    fn test_merge_single_source_without_reference() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 100, 50, 1, PixelType::U8);
        let sources = [BandSource::from(source.band(1).unwrap())];
        let merged = unwrap_complete(
            Merger::new(&sources)
                .with_options(small_options())
                .create(dir.path().join("merged.tif"))
                .unwrap(),
        );
        assert_eq!(merged.width(), 100);
        assert_eq!(merged.height(), 50);
        assert_eq!(merged.band_count(), 1);
        assert_eq!(merged.geo_transform(), None);
        assert_eq!(merged.projection(), "");
        assert_eq!(merged.read_band(1).unwrap(), source.read_band(1).unwrap());
    }

    #[test]
    fn test_merge_propagates_reference_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.tif");
        let mut reference =
            Dataset::create(&path, 24, 18, 1, PixelType::U16, &small_options()).unwrap();
        reference
            .write_band(1, &gradient(24, 18, 1).convert(DataType::U16))
            .unwrap();
        reference
            .set_geo_transform([500000.0, 2.5, 0.0, 4500000.0, 0.0, -2.5])
            .unwrap();
        reference.set_projection("EPSG:32633").unwrap();
        let mut tags = BTreeMap::new();
        tags.insert("AREA_OR_POINT".to_string(), "Area".to_string());
        reference.set_tags(tags).unwrap();
        reference.close().unwrap();
        let reference = Dataset::open(&path).unwrap();

        let sources = [BandSource::from(reference.band(1).unwrap())];
        let out = dir.path().join("merged.tif");
        let merged = unwrap_complete(
            Merger::new(&sources)
                .with_reference(&reference)
                .with_options(small_options())
                .create(&out)
                .unwrap(),
        );
        assert_eq!(
            merged.geo_transform(),
            Some([500000.0, 2.5, 0.0, 4500000.0, 0.0, -2.5])
        );
        assert_eq!(merged.projection(), "EPSG:32633");
        assert_eq!(
            merged.tags().get("AREA_OR_POINT").map(String::as_str),
            Some("Area")
        );
    }

    #[test]
    fn test_merge_copies_band_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attrs.tif");
        let mut source =
            Dataset::create(&path, 16, 16, 1, PixelType::U8, &small_options()).unwrap();
        source
            .write_band(1, &gradient(16, 16, 2).convert(DataType::U8))
            .unwrap();
        source.set_no_data(1, Some(255.0)).unwrap();
        source
            .set_color_interpretation(1, ColorInterpretation::Red)
            .unwrap();
        source.close().unwrap();
        let source = Dataset::open(&path).unwrap();

        let buffer =
            RasterBuffer::new(16, 16, gradient(16, 16, 4).convert(DataType::U8)).unwrap();
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::raw_with(&buffer, Some(-1.0), ColorInterpretation::Alpha),
        ];
        for strategy in [
            MergeStrategy::WholeBand,
            MergeStrategy::Blocked(10),
            MergeStrategy::Virtual,
        ] {
            let out = dir.path().join(format!("merged_{strategy:?}.tif"));
            let merged = unwrap_complete(
                Merger::new(&sources)
                    .with_strategy(strategy)
                    .with_options(small_options())
                    .create(&out)
                    .unwrap(),
            );
            assert_eq!(merged.no_data(1), Some(255.0), "{strategy:?}");
            assert_eq!(
                merged.color_interpretation(1),
                ColorInterpretation::Red,
                "{strategy:?}"
            );
            assert_eq!(merged.no_data(2), Some(-1.0), "{strategy:?}");
            assert_eq!(
                merged.color_interpretation(2),
                ColorInterpretation::Alpha,
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_merge_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let a = build_dataset(&dir.path().join("a.tif"), 16, 16, 1, PixelType::U8);
        let b = build_dataset(&dir.path().join("b.tif"), 8, 16, 1, PixelType::U8);
        let sources = [
            BandSource::from(a.band(1).unwrap()),
            BandSource::from(b.band(1).unwrap()),
        ];
        let result = Merger::new(&sources).create(dir.path().join("merged.tif"));
        assert!(matches!(result, Err(MergeError::SpecMismatch(_))));
    }

    #[test]
    fn test_merge_rejects_empty_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let result = Merger::new(&[]).create(dir.path().join("merged.tif"));
        assert!(matches!(result, Err(MergeError::EmptySpec)));
    }

    #[test]
    fn test_merge_strategies_produce_identical_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 37, 23, 2, PixelType::I16);
        let buffer =
            RasterBuffer::new(37, 23, gradient(37, 23, 6).convert(DataType::I16)).unwrap();
        let sources = [
            BandSource::from(source.band(2).unwrap()),
            BandSource::raw(&buffer),
            BandSource::from(source.band(1).unwrap()),
        ];
        let mut baseline: Option<Vec<PixelData>> = None;
        for (name, strategy) in [
            ("whole", MergeStrategy::WholeBand),
            ("blocked", MergeStrategy::Blocked(10)),
            ("virtual", MergeStrategy::Virtual),
        ] {
            let out = dir.path().join(format!("{name}.tif"));
            let merged = unwrap_complete(
                Merger::new(&sources)
                    .with_strategy(strategy)
                    .with_options(small_options())
                    .create(&out)
                    .unwrap(),
            );
            let planes: Vec<PixelData> = (1..=3)
                .map(|band| merged.read_band(band).unwrap())
                .collect();
            match &baseline {
                None => baseline = Some(planes),
                Some(expected) => assert_eq!(&planes, expected, "{name}"),
            }
            println!("Strategy {name} verified");
        }
    }

    #[test]
    fn test_merge_cancellation_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 32, 32, 2, PixelType::U8);
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::from(source.band(2).unwrap()),
        ];
        for (name, strategy) in [
            ("whole", MergeStrategy::WholeBand),
            ("blocked", MergeStrategy::Blocked(10)),
            ("virtual", MergeStrategy::Virtual),
        ] {
            let out = dir.path().join(format!("{name}.tif"));
            // Cancel partway through rather than on the first snapshot.
            let outcome = Merger::new(&sources)
                .with_strategy(strategy)
                .with_options(small_options())
                .with_progress(|progress: &Progress| progress.fraction < 0.5)
                .create(&out)
                .unwrap();
            assert!(matches!(outcome, MergeOutcome::Cancelled), "{name}");
            assert!(!out.exists(), "{name} left a partial output");
            let mut scratch = out.clone().into_os_string();
            scratch.push(".scratch");
            assert!(
                !Path::new(&scratch).exists(),
                "{name} left a staging file"
            );
        }
    }

    #[test]
    fn test_whole_band_progress_counts_bands() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 20, 20, 3, PixelType::U8);
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::from(source.band(2).unwrap()),
            BandSource::from(source.band(3).unwrap()),
        ];
        let mut snapshots: Vec<Progress> = Vec::new();
        let outcome = Merger::new(&sources)
            .with_strategy(MergeStrategy::WholeBand)
            .with_options(small_options())
            .with_progress(|progress: &Progress| {
                snapshots.push(*progress);
                true
            })
            .create(dir.path().join("merged.tif"))
            .unwrap();
        unwrap_complete(outcome);
        assert_eq!(snapshots.len(), 3);
        for (idx, snapshot) in snapshots.iter().enumerate() {
            assert_eq!(snapshot.band, idx + 1);
            assert_eq!(snapshot.bands, 3);
            assert_eq!(snapshot.window, 0);
            assert!((snapshot.fraction - (idx + 1) as f64 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_blocked_progress_counts_windows_and_stages_raw_whole() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 25, 20, 1, PixelType::U8);
        let buffer =
            RasterBuffer::new(25, 20, gradient(25, 20, 8).convert(DataType::U8)).unwrap();
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::raw(&buffer),
        ];
        let mut snapshots: Vec<Progress> = Vec::new();
        let outcome = Merger::new(&sources)
            .with_strategy(MergeStrategy::Blocked(10))
            .with_options(small_options())
            .with_progress(|progress: &Progress| {
                snapshots.push(*progress);
                true
            })
            .create(dir.path().join("merged.tif"))
            .unwrap();
        unwrap_complete(outcome);
        // 25x20 at block 10 gives 3x2 windows for the dataset band and a
        // single snapshot for the raw band.
        assert_eq!(snapshots.len(), 7);
        for pair in snapshots.windows(2) {
            assert!(pair[0].fraction <= pair[1].fraction);
        }
        let last = snapshots.last().unwrap();
        assert!((last.fraction - 1.0).abs() < f64::EPSILON);
        assert_eq!(last.band, 2);
        assert_eq!(last.window, 6);
        assert_eq!(last.windows, 6);
        assert_eq!(last.block_dim, 10);
        assert_eq!(snapshots[5].band, 1);
        assert_eq!(snapshots[5].window, 6);
    }

    #[test]
    fn test_virtual_progress_is_monotone_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 48, 40, 2, PixelType::U8);
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::from(source.band(2).unwrap()),
        ];
        let mut fractions: Vec<f64> = Vec::new();
        let outcome = Merger::new(&sources)
            .with_options(small_options())
            .with_progress(|progress: &Progress| {
                assert_eq!(progress.band, 0);
                assert_eq!(progress.bands, 2);
                fractions.push(progress.fraction);
                true
            })
            .create(dir.path().join("merged.tif"))
            .unwrap();
        unwrap_complete(outcome);
        assert!(!fractions.is_empty());
        for pair in fractions.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!((fractions.last().unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_converts_to_first_source_type() {
        let dir = tempfile::tempdir().unwrap();
        let source = build_dataset(&dir.path().join("source.tif"), 2, 2, 1, PixelType::U8);
        let floats = RasterBuffer::new(
            2,
            2,
            PixelData::F32(vec![-3.0, 0.5, 300.0, 7.9]),
        )
        .unwrap();
        let sources = [
            BandSource::from(source.band(1).unwrap()),
            BandSource::raw(&floats),
        ];
        for strategy in [MergeStrategy::WholeBand, MergeStrategy::Virtual] {
            let out = dir.path().join(format!("merged_{strategy:?}.tif"));
            let merged = unwrap_complete(
                Merger::new(&sources)
                    .with_strategy(strategy)
                    .with_options(small_options())
                    .create(&out)
                    .unwrap(),
            );
            assert_eq!(merged.pixel_type(), PixelType::U8);
            assert_eq!(
                merged.read_band(2).unwrap(),
                PixelData::U8(vec![0, 0, 255, 7]),
                "{strategy:?}"
            );
        }
    }

    #[test]
    fn test_create_merged_dataset_convenience() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reference.tif");
        let mut reference =
            Dataset::create(&path, 16, 12, 2, PixelType::U8, &small_options()).unwrap();
        reference
            .write_band(1, &gradient(16, 12, 1).convert(DataType::U8))
            .unwrap();
        reference
            .write_band(2, &gradient(16, 12, 2).convert(DataType::U8))
            .unwrap();
        reference.set_projection("EPSG:4326").unwrap();
        reference.close().unwrap();
        let reference = Dataset::open(&path).unwrap();

        let sources = [
            BandSource::from(reference.band(2).unwrap()),
            BandSource::from(reference.band(1).unwrap()),
        ];
        let merged = create_merged_dataset(
            dir.path().join("merged.tif"),
            Some(&reference),
            &sources,
            &small_options(),
        )
        .unwrap();
        assert_eq!(merged.band_count(), 2);
        assert_eq!(merged.projection(), "EPSG:4326");
        assert_eq!(merged.read_band(1).unwrap(), reference.read_band(2).unwrap());
    }
}
