#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`store`]: GeoTIFF container engine behind the [`Dataset`] handle
//! - [`band`]: Band handles and the [`BandSource`] input enum
//! - [`merge`]: Strategy-driven band merging with [`Merger`]
//! - [`composition`]: Virtual zero-copy outputs via [`Composition`]
//! - [`reader`]: Adaptive whole-raster reading with [`RasterReader`]
//! - [`buffer`]: Typed pixel buffers ([`PixelData`], [`RasterBuffer`])
//! - [`window`]: Pixel windows and block planning
//! - [`geo`]: Georeferencing bundle ([`GeoMetadata`], GCPs)
//! - [`progress`]: Unified progress snapshots for merge callbacks

// ============================================================================
// Public modules
// ============================================================================

pub mod band;
pub mod buffer;
pub mod casting;
pub mod composition;
pub mod geo;
pub mod merge;
pub mod progress;
pub mod reader;
pub mod store;
pub mod window;

// ============================================================================
// Datasets & Storage
// ============================================================================

pub use store::{
    Dataset,
    PixelType,
    StoreError,
    Materialized,
    CodecOptions,
    Compression,
    PredictorMode,
    BigTiff,
};

// ============================================================================
// Bands & Buffers
// ============================================================================

pub use band::{
    BandSource,
    RasterBandRef,
    ColorInterpretation,
};

pub use buffer::{
    DataType,
    PixelData,
    RasterBuffer,
};

// ============================================================================
// Merging
// ============================================================================
// Primary API: Merger::new(&sources).with_reference(&ds).create("out.tif")

pub use merge::{
    Merger,
    MergeError,
    MergeOutcome,
    MergeStrategy,
    create_merged_dataset,
};

pub use composition::Composition;

// ============================================================================
// Adaptive Reading
// ============================================================================

pub use reader::{
    RasterReader,
    AccessMode,
    Span,
    RegionData,
    RegionError,
    DEFAULT_RESIDENT_LIMIT,
};

// ============================================================================
// Geometry & Metadata
// ============================================================================

pub use geo::{
    Gcp,
    GeoMetadata,
    GeoTransform,
    propagate,
};

pub use window::{
    Window,
    BlockPlan,
    plan_blocks,
    DEFAULT_BLOCK_DIM,
};

// ============================================================================
// Progress Reporting
// ============================================================================

pub use progress::{
    Progress,
    ProgressCallback,
    console_printer,
    printer,
};
