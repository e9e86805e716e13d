//! GeoTIFF container plumbing for the raster store.
//!
//! Everything that knows about bytes on disk lives here: chunk geometry
//! for tiled and stripped layouts, the deflate chunk codec with the
//! horizontal predictor, the GeoTIFF georeferencing tags, and the GDAL
//! metadata XML used for dataset tags and per-band attributes. The
//! [`Dataset`](super::Dataset) type in the parent module drives these
//! routines; nothing here is part of the public API.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use rayon::prelude::*;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;

use crate::band::ColorInterpretation;
use crate::casting::{u64_to_u32, u64_to_usize, usize_to_u32};
use crate::geo::{Gcp, GeoMetadata, GeoTransform};
use crate::window::Window;

use super::types::PixelType;
use super::{Materialized, StoreError};

// GeoTIFF and GDAL tag IDs (not in the standard tiff crate)
const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
const GEOTIFF_MODELTIEPOINT: u16 = 33922;
const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;
const GDAL_METADATA: u16 = 42112;
const GDAL_NODATA: u16 = 42113;

// GeoKey IDs and values
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// Raw TIFF tag values
const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_DEFLATE_OLD: u16 = 32946;
const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;
const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
const PHOTOMETRIC_RGB: u16 = 2;
const EXTRA_SAMPLE_UNSPECIFIED: u16 = 0;
const EXTRA_SAMPLE_UNASSOC_ALPHA: u16 = 2;

/// Headroom subtracted from the 4 GiB classic-TIFF ceiling when deciding
/// whether a predicted file size is still safe without BigTIFF.
const BIG_TIFF_HEADROOM: u128 = 16 << 20;

/// Compression applied to chunk payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// Deflate (zlib) compression.
    #[default]
    Deflate,
}

/// Predictor selection for compressed chunks.
///
/// The horizontal predictor improves deflate ratios on integer imagery.
/// Floating-point layouts never take it, whatever the mode, because the
/// differencing is defined on integer samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PredictorMode {
    /// Horizontal for integer pixel types, none for floats.
    #[default]
    Auto,
    /// Never apply a predictor.
    None,
    /// Horizontal differencing (integer pixel types only).
    Horizontal,
}

impl PredictorMode {
    /// Whether horizontal differencing applies for the given pixel type.
    #[must_use]
    pub(crate) fn horizontal_for(self, pixel_type: PixelType) -> bool {
        match self {
            PredictorMode::None => false,
            PredictorMode::Auto | PredictorMode::Horizontal => !pixel_type.is_float(),
        }
    }
}

/// When to promote output files to the BigTIFF container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BigTiff {
    /// Always use the classic container.
    Never,
    /// Use BigTIFF when the predicted size approaches the classic 4 GiB
    /// limit.
    #[default]
    IfSafer,
    /// Always use BigTIFF.
    Always,
}

/// Codec configuration for created datasets.
///
/// The defaults are the production settings: tiled layout, deflate
/// compression, type-keyed predictor, all cores for compression, and
/// BigTIFF promotion when size demands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    /// Chunk compression.
    pub compression: Compression,
    /// Predictor selection.
    pub predictor: PredictorMode,
    /// Tile width in pixels; must be a positive multiple of 16.
    pub tile_width: usize,
    /// Tile height in pixels; must be a positive multiple of 16.
    pub tile_height: usize,
    /// Compression worker count: 0 uses all cores, 1 compresses serially.
    /// Values above 1 share the process-wide worker pool.
    pub num_threads: usize,
    /// BigTIFF promotion policy.
    pub big_tiff: BigTiff,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            predictor: PredictorMode::default(),
            tile_width: 256,
            tile_height: 256,
            num_threads: 0,
            big_tiff: BigTiff::default(),
        }
    }
}

impl CodecOptions {
    /// Set the chunk compression.
    #[must_use]
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the predictor selection.
    #[must_use]
    pub fn with_predictor(mut self, predictor: PredictorMode) -> Self {
        self.predictor = predictor;
        self
    }

    /// Set the tile dimensions. Both must be positive multiples of 16.
    #[must_use]
    pub fn with_tile_size(mut self, width: usize, height: usize) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Set the compression worker count (0 = all cores, 1 = serial).
    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the BigTIFF promotion policy.
    #[must_use]
    pub fn with_big_tiff(mut self, big_tiff: BigTiff) -> Self {
        self.big_tiff = big_tiff;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        for (label, dim) in [("width", self.tile_width), ("height", self.tile_height)] {
            if dim == 0 || dim % 16 != 0 {
                return Err(format!(
                    "Tile {label} {dim} is not a positive multiple of 16"
                ));
            }
        }
        Ok(())
    }
}

/// Per-band attributes stamped onto outputs and recovered on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct BandAttributes {
    pub no_data: Option<f64>,
    pub color_interp: Option<ColorInterpretation>,
}

// ============================================================================
// Chunk geometry
// ============================================================================

/// Geometry of the chunks (tiles or strips) in a container.
///
/// Chunk indices are row-major. Tile payloads are padded to the full
/// nominal tile size; the final strip of a stripped file is clipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChunkGrid {
    Tiles {
        raster: (usize, usize),
        tile: (usize, usize),
    },
    Strips {
        raster: (usize, usize),
        rows_per_strip: usize,
    },
}

impl ChunkGrid {
    pub(crate) fn count(&self) -> usize {
        match self {
            ChunkGrid::Tiles { raster, tile } => {
                raster.0.div_ceil(tile.0) * raster.1.div_ceil(tile.1)
            }
            ChunkGrid::Strips {
                raster,
                rows_per_strip,
            } => raster.1.div_ceil((*rows_per_strip).max(1)),
        }
    }

    /// The raster region a chunk actually covers (clipped at the edges).
    pub(crate) fn window(&self, idx: usize) -> Option<Window> {
        match self {
            ChunkGrid::Tiles { raster, tile } => {
                let across = raster.0.div_ceil(tile.0);
                let down = raster.1.div_ceil(tile.1);
                if idx >= across * down {
                    return None;
                }
                let x = (idx % across) * tile.0;
                let y = (idx / across) * tile.1;
                Some(Window::new(
                    x,
                    y,
                    tile.0.min(raster.0 - x),
                    tile.1.min(raster.1 - y),
                ))
            }
            ChunkGrid::Strips {
                raster,
                rows_per_strip,
            } => {
                let rows = (*rows_per_strip).max(1);
                let y = idx * rows;
                if y >= raster.1 {
                    return None;
                }
                Some(Window::new(0, y, raster.0, rows.min(raster.1 - y)))
            }
        }
    }

    /// Dimensions of a chunk's payload, including tile padding.
    pub(crate) fn data_dims(&self, idx: usize) -> Option<(usize, usize)> {
        match self {
            ChunkGrid::Tiles { tile, .. } => {
                self.window(idx).map(|_| *tile)
            }
            ChunkGrid::Strips { .. } => self.window(idx).map(|w| (w.width, w.height)),
        }
    }

    /// Indices of every chunk whose coverage intersects `window`.
    pub(crate) fn indices_over(&self, window: &Window) -> Vec<usize> {
        if window.is_empty() {
            return Vec::new();
        }
        match self {
            ChunkGrid::Tiles { raster, tile } => {
                let across = raster.0.div_ceil(tile.0);
                let tx0 = window.x / tile.0;
                let tx1 = (window.x_end() - 1) / tile.0;
                let ty0 = window.y / tile.1;
                let ty1 = (window.y_end() - 1) / tile.1;
                let mut out = Vec::with_capacity((tx1 - tx0 + 1) * (ty1 - ty0 + 1));
                for ty in ty0..=ty1 {
                    for tx in tx0..=tx1 {
                        out.push(ty * across + tx);
                    }
                }
                out
            }
            ChunkGrid::Strips { rows_per_strip, .. } => {
                let rows = (*rows_per_strip).max(1);
                (window.y / rows..=(window.y_end() - 1) / rows).collect()
            }
        }
    }
}

// ============================================================================
// Chunk codec
// ============================================================================

fn le_sample_read(bytes: &[u8], idx: usize, size: usize) -> u32 {
    let mut value = 0u32;
    for b in 0..size {
        value |= u32::from(bytes[idx * size + b]) << (8 * b);
    }
    value
}

fn le_sample_write(bytes: &mut [u8], idx: usize, size: usize, value: u32) {
    for b in 0..size {
        bytes[idx * size + b] = (value >> (8 * b)) as u8;
    }
}

/// Apply horizontal differencing in place to little-endian sample bytes.
///
/// Differencing runs per channel: each sample has the previous sample of
/// the same channel subtracted, restarting at every row.
fn predictor_encode(
    bytes: &mut [u8],
    row_width: usize,
    spp: usize,
    size: usize,
) -> Result<(), StoreError> {
    if !matches!(size, 1 | 2 | 4) {
        return Err(StoreError::Write(format!(
            "Horizontal predictor is undefined for {size}-byte samples"
        )));
    }
    let row_samples = row_width * spp;
    let rows = bytes.len() / (row_samples * size);
    for row in 0..rows {
        let base = row * row_samples;
        for i in (spp..row_samples).rev() {
            let current = le_sample_read(bytes, base + i, size);
            let previous = le_sample_read(bytes, base + i - spp, size);
            le_sample_write(bytes, base + i, size, current.wrapping_sub(previous));
        }
    }
    Ok(())
}

/// Undo horizontal differencing in place.
fn predictor_decode(
    bytes: &mut [u8],
    row_width: usize,
    spp: usize,
    size: usize,
) -> Result<(), StoreError> {
    if !matches!(size, 1 | 2 | 4) {
        return Err(StoreError::Decode(format!(
            "Horizontal predictor is undefined for {size}-byte samples"
        )));
    }
    let row_samples = row_width * spp;
    let rows = bytes.len() / (row_samples * size);
    for row in 0..rows {
        let base = row * row_samples;
        for i in spp..row_samples {
            let current = le_sample_read(bytes, base + i, size);
            let previous = le_sample_read(bytes, base + i - spp, size);
            le_sample_write(bytes, base + i, size, current.wrapping_add(previous));
        }
    }
    Ok(())
}

fn deflate_compress(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes).map_err(StoreError::Io)?;
    encoder.finish().map_err(StoreError::Io)
}

fn deflate_decompress(bytes: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = flate2::read::ZlibDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(StoreError::Io)?;
    Ok(out)
}

/// Compress one padded chunk payload for writing.
pub(crate) fn encode_chunk(
    mut padded: Vec<u8>,
    row_width: usize,
    spp: usize,
    sample_size: usize,
    horizontal: bool,
    compression: Compression,
) -> Result<Vec<u8>, StoreError> {
    if horizontal {
        predictor_encode(&mut padded, row_width, spp, sample_size)?;
    }
    match compression {
        Compression::None => Ok(padded),
        Compression::Deflate => deflate_compress(&padded),
    }
}

/// Decode one chunk payload into native little-endian sample bytes.
///
/// `expected_len` is the padded payload size; writers that over-pad are
/// tolerated by truncation, shorter payloads are a decode error.
pub(crate) fn decode_chunk(
    raw: &[u8],
    compression: u16,
    predictor: u16,
    big_endian: bool,
    row_width: usize,
    spp: usize,
    sample_size: usize,
    expected_len: usize,
) -> Result<Vec<u8>, StoreError> {
    let mut bytes = match compression {
        COMPRESSION_NONE => raw.to_vec(),
        COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_OLD => deflate_decompress(raw)?,
        other => {
            return Err(StoreError::Decode(format!(
                "Unsupported compression method {other}"
            )))
        }
    };
    if bytes.len() < expected_len {
        return Err(StoreError::Decode(format!(
            "Chunk decoded to {} bytes, expected {expected_len}",
            bytes.len()
        )));
    }
    bytes.truncate(expected_len);
    if big_endian && sample_size > 1 {
        for group in bytes.chunks_exact_mut(sample_size) {
            group.reverse();
        }
    }
    match predictor {
        PREDICTOR_NONE => {}
        PREDICTOR_HORIZONTAL => predictor_decode(&mut bytes, row_width, spp, sample_size)?,
        other => {
            return Err(StoreError::Decode(format!(
                "Unsupported predictor {other}"
            )))
        }
    }
    Ok(bytes)
}

// ============================================================================
// Georeferencing tags
// ============================================================================

/// Tag payloads encoding a geotransform.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransformTags {
    /// Axis-aligned north-up transforms: pixel scale plus one tiepoint.
    ScaleTiepoint([f64; 3], [f64; 6]),
    /// Everything else: the full 4x4 model transformation matrix.
    Matrix([f64; 16]),
}

pub(crate) fn encode_transform(gt: GeoTransform) -> TransformTags {
    if gt[2] == 0.0 && gt[4] == 0.0 && gt[1] > 0.0 && gt[5] < 0.0 {
        TransformTags::ScaleTiepoint(
            [gt[1], -gt[5], 0.0],
            [0.0, 0.0, 0.0, gt[0], gt[3], 0.0],
        )
    } else {
        TransformTags::Matrix([
            gt[1], gt[2], 0.0, gt[0], //
            gt[4], gt[5], 0.0, gt[3], //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ])
    }
}

/// Recover a geotransform and GCP list from the georeferencing tags.
///
/// Priority follows the usual GeoTIFF reading rules: a transformation
/// matrix wins, then a pixel scale with a single tiepoint; any remaining
/// tiepoints are ground control points.
pub(crate) fn decode_transform(
    pixel_scale: Option<&[f64]>,
    tiepoints: Option<&[f64]>,
    transformation: Option<&[f64]>,
) -> (Option<GeoTransform>, Vec<Gcp>) {
    if let Some(m) = transformation {
        if m.len() >= 8 {
            return (Some([m[3], m[0], m[1], m[7], m[4], m[5]]), Vec::new());
        }
    }
    let points = tiepoints.unwrap_or(&[]);
    if points.len() == 6 {
        if let Some(scale) = pixel_scale {
            if scale.len() >= 2 {
                let (i, j, x, y) = (points[0], points[1], points[3], points[4]);
                return (
                    Some([
                        x - i * scale[0],
                        scale[0],
                        0.0,
                        y + j * scale[1],
                        0.0,
                        -scale[1],
                    ]),
                    Vec::new(),
                );
            }
        }
    }
    let gcps = points
        .chunks_exact(6)
        .enumerate()
        .map(|(n, p)| Gcp::new(format!("gcp_{}", n + 1), p[0], p[1], p[3], p[4], p[5]))
        .collect();
    (None, gcps)
}

pub(crate) fn encode_gcp_tiepoints(gcps: &[Gcp]) -> Vec<f64> {
    let mut out = Vec::with_capacity(gcps.len() * 6);
    for gcp in gcps {
        out.extend_from_slice(&[gcp.pixel, gcp.line, 0.0, gcp.x, gcp.y, gcp.z]);
    }
    out
}

/// Build the minimal GeoKey directory: raster-is-area plus a citation key
/// pointing at the SRS string carried in GeoAsciiParams.
fn build_geokey_directory(ascii_len: usize) -> Vec<u16> {
    let mut keys = vec![1, 1, 0, 2];
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    keys.extend_from_slice(&[
        GT_CITATION_GEO_KEY,
        GEOTIFF_GEOASCIIPARAMS,
        ascii_len as u16,
        0,
    ]);
    keys
}

// ============================================================================
// GDAL metadata XML
// ============================================================================

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

/// Render dataset tags and band attributes as GDAL metadata XML.
///
/// Returns `None` when there is nothing to record.
pub(crate) fn encode_gdal_metadata(
    tags: &BTreeMap<String, String>,
    band_attrs: &[BandAttributes],
) -> Option<String> {
    let mut items = String::new();
    for (key, value) in tags {
        items.push_str(&format!(
            "  <Item name=\"{}\">{}</Item>\n",
            escape_xml(key),
            escape_xml(value)
        ));
    }
    for (band, attrs) in band_attrs.iter().enumerate() {
        if let Some(no_data) = attrs.no_data {
            items.push_str(&format!(
                "  <Item name=\"NODATA\" sample=\"{band}\" role=\"nodata\">{no_data}</Item>\n"
            ));
        }
        if let Some(interp) = attrs.color_interp {
            items.push_str(&format!(
                "  <Item name=\"COLORINTERP\" sample=\"{band}\" role=\"colorinterp\">{}</Item>\n",
                interp.as_str()
            ));
        }
    }
    if items.is_empty() {
        None
    } else {
        Some(format!("<GDALMetadata>\n{items}</GDALMetadata>\n"))
    }
}

fn item_attr<'a>(item: &'a str, name: &str) -> Option<&'a str> {
    let marker = format!("{name}=\"");
    let start = item.find(&marker)? + marker.len();
    let end = item[start..].find('"')?;
    Some(&item[start..start + end])
}

/// Parse the subset of GDAL metadata XML this store emits (and GDAL's own
/// flat Item lists). Unrecognized structure is skipped, not an error.
pub(crate) fn parse_gdal_metadata(
    xml: &str,
    bands: usize,
) -> (BTreeMap<String, String>, Vec<BandAttributes>) {
    let mut tags = BTreeMap::new();
    let mut attrs = vec![BandAttributes::default(); bands];
    let mut rest = xml;
    while let Some(open) = rest.find("<Item ") {
        let Some(head_end_rel) = rest[open..].find('>') else {
            break;
        };
        let head_end = open + head_end_rel;
        let Some(close_rel) = rest[head_end..].find("</Item>") else {
            break;
        };
        let head = &rest[open..head_end];
        let body = unescape_xml(&rest[head_end + 1..head_end + close_rel]);
        rest = &rest[head_end + close_rel + "</Item>".len()..];

        let sample = item_attr(head, "sample").and_then(|s| s.parse::<usize>().ok());
        match (item_attr(head, "role"), sample) {
            (Some("nodata"), Some(band)) if band < bands => {
                attrs[band].no_data = body.trim().parse::<f64>().ok();
            }
            (Some("colorinterp"), Some(band)) if band < bands => {
                attrs[band].color_interp = Some(ColorInterpretation::parse(body.trim()));
            }
            (None, None) => {
                if let Some(name) = item_attr(head, "name") {
                    tags.insert(unescape_xml(name), body);
                }
            }
            _ => {}
        }
    }
    (tags, attrs)
}

// ============================================================================
// Container encoding
// ============================================================================

/// Everything the encoder needs to lay down one container.
pub(crate) struct EncodeSpec<'a> {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    pub geo: &'a GeoMetadata,
    pub band_attrs: &'a [BandAttributes],
    pub options: &'a CodecOptions,
}

impl EncodeSpec<'_> {
    fn use_big_tiff(&self, sample_size: usize) -> bool {
        match self.options.big_tiff {
            BigTiff::Never => false,
            BigTiff::Always => true,
            BigTiff::IfSafer => {
                let predicted = self.width as u128
                    * self.height as u128
                    * self.bands as u128
                    * sample_size as u128;
                predicted + predicted / 20 + BIG_TIFF_HEADROOM > u128::from(u32::MAX)
            }
        }
    }
}

/// Encode a complete container, pulling pixel data window by window.
///
/// `tile_source` receives the clipped coverage window of each tile in
/// row-major order and returns its pixel-interleaved little-endian bytes.
/// Progress is reported after each tile row as completed / total tiles; a
/// `false` return cancels the encode. On cancellation the written stream
/// is abandoned mid-file, so the caller must remove the output.
pub(crate) fn encode_tiff<W, F>(
    writer: W,
    spec: &EncodeSpec<'_>,
    tile_source: F,
    progress: Option<&mut dyn FnMut(f64) -> bool>,
) -> Result<Materialized, StoreError>
where
    W: Write + Seek,
    F: FnMut(Window) -> Result<Vec<u8>, StoreError>,
{
    spec.options.validate().map_err(StoreError::Create)?;
    let Some((_, bits)) = spec.pixel_type.sample_layout() else {
        return Err(StoreError::Create(
            "Cannot persist the Unknown pixel type".to_string(),
        ));
    };
    let sample_size = usize::from(bits / 8);
    if spec.use_big_tiff(sample_size) {
        let encoder = TiffEncoder::new_big(writer)?;
        write_ifd(encoder, spec, sample_size, true, tile_source, progress)
    } else {
        let encoder = TiffEncoder::new(writer)?;
        write_ifd(encoder, spec, sample_size, false, tile_source, progress)
    }
}

fn photometric_for(band_attrs: &[BandAttributes]) -> u16 {
    let is_rgb = band_attrs.len() >= 3
        && band_attrs[0].color_interp == Some(ColorInterpretation::Red)
        && band_attrs[1].color_interp == Some(ColorInterpretation::Green)
        && band_attrs[2].color_interp == Some(ColorInterpretation::Blue);
    if is_rgb {
        PHOTOMETRIC_RGB
    } else {
        PHOTOMETRIC_MIN_IS_BLACK
    }
}

#[allow(clippy::too_many_lines)]
// One directory write is one linear sequence of tag emissions; splitting it
// would scatter the container layout across helpers.
fn write_ifd<W, K, F>(
    mut encoder: TiffEncoder<W, K>,
    spec: &EncodeSpec<'_>,
    sample_size: usize,
    big: bool,
    mut tile_source: F,
    mut progress: Option<&mut dyn FnMut(f64) -> bool>,
) -> Result<Materialized, StoreError>
where
    W: Write + Seek,
    K: TiffKind,
    F: FnMut(Window) -> Result<Vec<u8>, StoreError>,
{
    let (sample_format, bits) = spec
        .pixel_type
        .sample_layout()
        .ok_or_else(|| StoreError::Create("Cannot persist the Unknown pixel type".to_string()))?;
    let bands = spec.bands;
    let bands_u16 = u16::try_from(bands)
        .map_err(|_| StoreError::Create(format!("Band count {bands} exceeds u16 maximum")))?;
    let width = usize_to_u32(spec.width).map_err(StoreError::Create)?;
    let height = usize_to_u32(spec.height).map_err(StoreError::Create)?;
    let (tile_w, tile_h) = (spec.options.tile_width, spec.options.tile_height);

    let mut dir = encoder.image_directory()?;
    dir.write_tag(Tag::ImageWidth, width)?;
    dir.write_tag(Tag::ImageLength, height)?;
    dir.write_tag(Tag::BitsPerSample, vec![bits; bands].as_slice())?;
    let compression_tag: u16 = match spec.options.compression {
        Compression::None => COMPRESSION_NONE,
        Compression::Deflate => COMPRESSION_DEFLATE,
    };
    dir.write_tag(Tag::Compression, compression_tag)?;
    let photometric = photometric_for(spec.band_attrs);
    dir.write_tag(Tag::PhotometricInterpretation, photometric)?;
    dir.write_tag(Tag::SamplesPerPixel, bands_u16)?;
    dir.write_tag(Tag::SampleFormat, vec![sample_format; bands].as_slice())?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::TileWidth, usize_to_u32(tile_w).map_err(StoreError::Create)?)?;
    dir.write_tag(Tag::TileLength, usize_to_u32(tile_h).map_err(StoreError::Create)?)?;

    let color_samples: usize = if photometric == PHOTOMETRIC_RGB { 3 } else { 1 };
    if bands > color_samples {
        let extra: Vec<u16> = (color_samples..bands)
            .map(|band| {
                let interp = spec.band_attrs.get(band).and_then(|attrs| attrs.color_interp);
                if interp == Some(ColorInterpretation::Alpha) {
                    EXTRA_SAMPLE_UNASSOC_ALPHA
                } else {
                    EXTRA_SAMPLE_UNSPECIFIED
                }
            })
            .collect();
        dir.write_tag(Tag::ExtraSamples, extra.as_slice())?;
    }

    let horizontal = spec.options.predictor.horizontal_for(spec.pixel_type);
    if horizontal {
        dir.write_tag(Tag::Predictor, PREDICTOR_HORIZONTAL)?;
    }

    write_geo_tags(&mut dir, spec.geo)?;
    if let Some(xml) = encode_gdal_metadata(&spec.geo.tags, spec.band_attrs) {
        dir.write_tag(Tag::Unknown(GDAL_METADATA), xml.as_bytes())?;
    }
    if let Some(no_data) = spec.band_attrs.first().and_then(|attrs| attrs.no_data) {
        let ascii = format!("{no_data}\0");
        dir.write_tag(Tag::Unknown(GDAL_NODATA), ascii.as_bytes())?;
    }

    // Tile payloads, one tile row at a time so memory stays bounded.
    let grid = ChunkGrid::Tiles {
        raster: (spec.width, spec.height),
        tile: (tile_w, tile_h),
    };
    let total = grid.count();
    let across = spec.width.div_ceil(tile_w);
    let down = spec.height.div_ceil(tile_h);
    let mut offsets: Vec<u64> = Vec::with_capacity(total);
    let mut byte_counts: Vec<u32> = Vec::with_capacity(total);
    let mut done = 0usize;

    for tile_row in 0..down {
        let mut raw_tiles: Vec<Vec<u8>> = Vec::with_capacity(across);
        for tile_col in 0..across {
            let idx = tile_row * across + tile_col;
            let window = grid
                .window(idx)
                .ok_or_else(|| StoreError::Write(format!("Tile {idx} out of range")))?;
            let clipped = tile_source(window)?;
            let expected = window.area() * bands * sample_size;
            if clipped.len() != expected {
                return Err(StoreError::Write(format!(
                    "Tile source returned {} bytes for {}x{} window, expected {expected}",
                    clipped.len(),
                    window.width,
                    window.height
                )));
            }
            raw_tiles.push(pad_tile(
                &clipped,
                window,
                tile_w,
                tile_h,
                bands * sample_size,
            ));
        }

        let encode_one = |tile: Vec<u8>| {
            encode_chunk(
                tile,
                tile_w,
                bands,
                sample_size,
                horizontal,
                spec.options.compression,
            )
        };
        let encoded: Vec<Result<Vec<u8>, StoreError>> = if spec.options.num_threads == 1 {
            raw_tiles.into_iter().map(encode_one).collect()
        } else {
            raw_tiles.into_par_iter().map(encode_one).collect()
        };
        for payload in encoded {
            let payload = payload?;
            let offset = dir.write_data(payload.as_slice())?;
            offsets.push(offset);
            byte_counts.push(usize_to_u32(payload.len()).map_err(StoreError::Write)?);
            done += 1;
        }

        if let Some(callback) = progress.as_mut() {
            #[allow(clippy::cast_precision_loss)]
            let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
            if !callback(fraction) {
                return Ok(Materialized::Cancelled);
            }
        }
    }

    if big {
        dir.write_tag(Tag::TileOffsets, offsets.as_slice())?;
    } else {
        let mut small = Vec::with_capacity(offsets.len());
        for offset in &offsets {
            small.push(u64_to_u32(*offset).map_err(StoreError::Write)?);
        }
        dir.write_tag(Tag::TileOffsets, small.as_slice())?;
    }
    dir.write_tag(Tag::TileByteCounts, byte_counts.as_slice())?;
    dir.finish()?;
    Ok(Materialized::Complete)
}

/// Copy a clipped window payload into a zero-padded full-size tile.
fn pad_tile(
    clipped: &[u8],
    window: Window,
    tile_w: usize,
    tile_h: usize,
    pixel_bytes: usize,
) -> Vec<u8> {
    if window.width == tile_w && window.height == tile_h {
        return clipped.to_vec();
    }
    let mut padded = vec![0u8; tile_w * tile_h * pixel_bytes];
    let src_row = window.width * pixel_bytes;
    let dst_row = tile_w * pixel_bytes;
    for row in 0..window.height {
        padded[row * dst_row..row * dst_row + src_row]
            .copy_from_slice(&clipped[row * src_row..(row + 1) * src_row]);
    }
    padded
}

// ============================================================================
// Container reading
// ============================================================================

/// Parsed structure of an existing container.
pub(crate) struct ContainerInfo {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub pixel_type: PixelType,
    pub big_endian: bool,
    pub grid: ChunkGrid,
    pub compression: u16,
    pub predictor: u16,
    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub geo: GeoMetadata,
    pub band_attrs: Vec<BandAttributes>,
}

type TiffDecoder = Decoder<BufReader<File>>;

fn open_err(path: &Path, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Open(format!("{}: {detail}", path.display()))
}

fn tag_u32(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<u32>, StoreError> {
    match decoder.find_tag(tag) {
        Ok(None) => Ok(None),
        Ok(Some(value)) => value
            .into_u32()
            .map(Some)
            .map_err(|e| StoreError::Open(format!("Malformed {tag:?} tag: {e}"))),
        Err(e) => Err(StoreError::Open(format!("Cannot read {tag:?} tag: {e}"))),
    }
}

fn tag_u32_vec(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<Vec<u32>>, StoreError> {
    match decoder.find_tag(tag) {
        Ok(None) => Ok(None),
        Ok(Some(value)) => value
            .into_u32_vec()
            .map(Some)
            .map_err(|e| StoreError::Open(format!("Malformed {tag:?} tag: {e}"))),
        Err(e) => Err(StoreError::Open(format!("Cannot read {tag:?} tag: {e}"))),
    }
}

fn tag_u64_vec(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<Vec<u64>>, StoreError> {
    match decoder.find_tag(tag) {
        Ok(None) => Ok(None),
        Ok(Some(value)) => value
            .into_u64_vec()
            .map(Some)
            .map_err(|e| StoreError::Open(format!("Malformed {tag:?} tag: {e}"))),
        Err(e) => Err(StoreError::Open(format!("Cannot read {tag:?} tag: {e}"))),
    }
}

fn tag_f64_vec(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<Vec<f64>>, StoreError> {
    match decoder.find_tag(tag) {
        Ok(None) => Ok(None),
        Ok(Some(value)) => value
            .into_f64_vec()
            .map(Some)
            .map_err(|e| StoreError::Open(format!("Malformed {tag:?} tag: {e}"))),
        Err(e) => Err(StoreError::Open(format!("Cannot read {tag:?} tag: {e}"))),
    }
}

/// Read a textual tag payload, whether it was written as ASCII or as raw
/// bytes. Values of any other shape read as `None`.
fn tag_string(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<String>, StoreError> {
    match decoder.find_tag(tag) {
        Ok(None) => Ok(None),
        Ok(Some(value)) => Ok(value_into_text(value)),
        Err(e) => Err(StoreError::Open(format!("Cannot read {tag:?} tag: {e}"))),
    }
}

fn value_into_text(value: Value) -> Option<String> {
    match value {
        Value::Ascii(text) => Some(text),
        Value::Byte(byte) => Some(String::from_utf8_lossy(&[byte]).into_owned()),
        Value::List(items) => {
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Byte(byte) => bytes.push(byte),
                    Value::Ascii(text) => bytes.extend_from_slice(text.as_bytes()),
                    _ => return None,
                }
            }
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => None,
    }
}

fn uniform(values: &[u32]) -> Option<u32> {
    let first = *values.first()?;
    values.iter().all(|v| *v == first).then_some(first)
}

fn to_usize(value: u32) -> Result<usize, StoreError> {
    u64_to_usize(u64::from(value)).map_err(StoreError::Open)
}

/// Fill in color interpretations for bands that carry none, from the
/// photometric interpretation and extra-sample tags.
fn apply_default_color_interp(attrs: &mut [BandAttributes], photometric: u16, extra: &[u32]) {
    let color_samples: usize = if photometric == PHOTOMETRIC_RGB { 3 } else { 1 };
    for (idx, attr) in attrs.iter_mut().enumerate() {
        if attr.color_interp.is_some() {
            continue;
        }
        attr.color_interp = Some(if idx < color_samples {
            match (photometric, idx) {
                (PHOTOMETRIC_RGB, 0) => ColorInterpretation::Red,
                (PHOTOMETRIC_RGB, 1) => ColorInterpretation::Green,
                (PHOTOMETRIC_RGB, _) => ColorInterpretation::Blue,
                _ => ColorInterpretation::Gray,
            }
        } else {
            match extra.get(idx - color_samples) {
                Some(1 | 2) => ColorInterpretation::Alpha,
                _ => ColorInterpretation::Undefined,
            }
        });
    }
}

/// Parse the structure of a container without decoding any pixels.
#[allow(clippy::too_many_lines)]
// The parse is one linear walk over the directory tags.
pub(crate) fn read_container(path: &Path) -> Result<ContainerInfo, StoreError> {
    let mut file =
        File::open(path).map_err(|e| open_err(path, format!("cannot open: {e}")))?;
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic)
        .map_err(|e| open_err(path, format!("cannot read header: {e}")))?;
    let big_endian = &magic == b"MM";
    file.seek(SeekFrom::Start(0))?;
    // The decoder only serves tag reads here, so the chunk tables of very
    // large rasters must not trip its default value-size limit.
    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| open_err(path, format!("not a readable TIFF: {e}")))?
        .with_limits(Limits::unlimited());

    let (width_u32, height_u32) = decoder
        .dimensions()
        .map_err(|e| open_err(path, format!("missing dimensions: {e}")))?;
    let width = to_usize(width_u32)?;
    let height = to_usize(height_u32)?;
    if width == 0 || height == 0 {
        return Err(open_err(path, "empty raster dimensions"));
    }
    let bands = to_usize(tag_u32(&mut decoder, Tag::SamplesPerPixel)?.unwrap_or(1))?;
    if bands == 0 {
        return Err(open_err(path, "zero samples per pixel"));
    }
    let planar = tag_u32(&mut decoder, Tag::PlanarConfiguration)?.unwrap_or(1);
    if planar != 1 {
        return Err(open_err(
            path,
            format!("planar configuration {planar} is not supported"),
        ));
    }

    let bits_vec =
        tag_u32_vec(&mut decoder, Tag::BitsPerSample)?.unwrap_or_else(|| vec![1; bands]);
    let formats_vec =
        tag_u32_vec(&mut decoder, Tag::SampleFormat)?.unwrap_or_else(|| vec![1; bands]);
    let bits =
        uniform(&bits_vec).ok_or_else(|| open_err(path, "heterogeneous bits per sample"))?;
    let format =
        uniform(&formats_vec).ok_or_else(|| open_err(path, "heterogeneous sample formats"))?;
    let pixel_type = PixelType::from_sample_layout(
        u16::try_from(format).unwrap_or(0),
        u16::try_from(bits).unwrap_or(0),
    );

    let compression =
        u16::try_from(tag_u32(&mut decoder, Tag::Compression)?.unwrap_or(1)).unwrap_or(0);
    let predictor =
        u16::try_from(tag_u32(&mut decoder, Tag::Predictor)?.unwrap_or(1)).unwrap_or(0);

    let tile_w = tag_u32(&mut decoder, Tag::TileWidth)?;
    let tile_h = tag_u32(&mut decoder, Tag::TileLength)?;
    let (grid, offsets, byte_counts) = if let (Some(tw), Some(th)) = (tile_w, tile_h) {
        if tw == 0 || th == 0 {
            return Err(open_err(path, "zero tile dimensions"));
        }
        let grid = ChunkGrid::Tiles {
            raster: (width, height),
            tile: (to_usize(tw)?, to_usize(th)?),
        };
        let offsets = tag_u64_vec(&mut decoder, Tag::TileOffsets)?
            .ok_or_else(|| open_err(path, "missing tile offsets"))?;
        let counts = tag_u64_vec(&mut decoder, Tag::TileByteCounts)?
            .ok_or_else(|| open_err(path, "missing tile byte counts"))?;
        (grid, offsets, counts)
    } else {
        let rows = tag_u32(&mut decoder, Tag::RowsPerStrip)?
            .map(to_usize)
            .transpose()?
            .filter(|rows| *rows > 0)
            .unwrap_or(height)
            .min(height);
        let grid = ChunkGrid::Strips {
            raster: (width, height),
            rows_per_strip: rows,
        };
        let offsets = tag_u64_vec(&mut decoder, Tag::StripOffsets)?
            .ok_or_else(|| open_err(path, "missing strip offsets"))?;
        let counts = tag_u64_vec(&mut decoder, Tag::StripByteCounts)?
            .ok_or_else(|| open_err(path, "missing strip byte counts"))?;
        (grid, offsets, counts)
    };
    if offsets.len() != grid.count() || byte_counts.len() != grid.count() {
        return Err(open_err(
            path,
            format!(
                "chunk table of {} entries does not match the {}-chunk grid",
                offsets.len(),
                grid.count()
            ),
        ));
    }

    let pixel_scale = tag_f64_vec(&mut decoder, Tag::Unknown(GEOTIFF_MODELPIXELSCALE))?;
    let tiepoints = tag_f64_vec(&mut decoder, Tag::Unknown(GEOTIFF_MODELTIEPOINT))?;
    let transformation = tag_f64_vec(&mut decoder, Tag::Unknown(GEOTIFF_MODELTRANSFORMATION))?;
    let (transform, gcps) = decode_transform(
        pixel_scale.as_deref(),
        tiepoints.as_deref(),
        transformation.as_deref(),
    );
    let srs = tag_string(&mut decoder, Tag::Unknown(GEOTIFF_GEOASCIIPARAMS))?
        .map(|s| s.trim_end_matches('\0').trim_end_matches('|').to_string())
        .unwrap_or_default();
    let (projection, gcp_projection) = if gcps.is_empty() {
        (srs, String::new())
    } else {
        (String::new(), srs)
    };

    let (tags, mut band_attrs) = match tag_string(&mut decoder, Tag::Unknown(GDAL_METADATA))? {
        Some(xml) => parse_gdal_metadata(&xml, bands),
        None => (BTreeMap::new(), vec![BandAttributes::default(); bands]),
    };
    if let Some(text) = tag_string(&mut decoder, Tag::Unknown(GDAL_NODATA))? {
        if let Ok(value) = text.trim_end_matches('\0').trim().parse::<f64>() {
            for attrs in &mut band_attrs {
                if attrs.no_data.is_none() {
                    attrs.no_data = Some(value);
                }
            }
        }
    }
    let photometric = u16::try_from(
        tag_u32(&mut decoder, Tag::PhotometricInterpretation)?
            .unwrap_or(u32::from(PHOTOMETRIC_MIN_IS_BLACK)),
    )
    .unwrap_or(PHOTOMETRIC_MIN_IS_BLACK);
    let extra = tag_u32_vec(&mut decoder, Tag::ExtraSamples)?.unwrap_or_default();
    apply_default_color_interp(&mut band_attrs, photometric, &extra);

    Ok(ContainerInfo {
        width,
        height,
        bands,
        pixel_type,
        big_endian,
        grid,
        compression,
        predictor,
        offsets,
        byte_counts,
        geo: GeoMetadata {
            transform,
            projection,
            tags,
            gcps,
            gcp_projection,
        },
        band_attrs,
    })
}

fn write_geo_tags<W, K>(
    dir: &mut DirectoryEncoder<W, K>,
    geo: &GeoMetadata,
) -> Result<(), StoreError>
where
    W: Write + Seek,
    K: TiffKind,
{
    // GCPs and a geotransform share the tiepoint tag, so control points
    // take precedence when both are staged.
    if geo.gcps.is_empty() {
        if let Some(gt) = geo.transform {
            match encode_transform(gt) {
                TransformTags::ScaleTiepoint(scale, tiepoint) => {
                    dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), scale.as_slice())?;
                    dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;
                }
                TransformTags::Matrix(matrix) => {
                    dir.write_tag(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION), matrix.as_slice())?;
                }
            }
        }
    } else {
        let tiepoints = encode_gcp_tiepoints(&geo.gcps);
        dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoints.as_slice())?;
    }

    let srs = if geo.gcps.is_empty() {
        geo.projection.as_str()
    } else {
        // Single SRS slot; the GCP projection is the file projection.
        if geo.gcp_projection.is_empty() {
            geo.projection.as_str()
        } else {
            geo.gcp_projection.as_str()
        }
    };
    if !srs.is_empty() {
        // GeoAsciiParams entries are pipe-delimited and NUL-terminated.
        let ascii_params = format!("{srs}|\0");
        let geokeys = build_geokey_directory(ascii_params.len());
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOASCIIPARAMS), ascii_params.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predictor_round_trip_single_channel() {
        let original: Vec<u8> = vec![10, 12, 15, 15, 9, 200, 201, 203, 250, 1];
        let mut bytes = original.clone();
        predictor_encode(&mut bytes, 5, 1, 1).unwrap();
        assert_ne!(bytes, original);
        predictor_decode(&mut bytes, 5, 1, 1).unwrap();
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_predictor_round_trip_interleaved_u16() {
        // Two rows of 3 pixels x 2 channels
        let samples: Vec<u16> = vec![5, 1000, 6, 1001, 9, 990, 7, 100, 8, 90, 6, 95];
        let original: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut bytes = original.clone();
        predictor_encode(&mut bytes, 3, 2, 2).unwrap();
        predictor_decode(&mut bytes, 3, 2, 2).unwrap();
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_predictor_differences_per_channel() {
        let mut bytes = vec![10u8, 100, 13, 103];
        predictor_encode(&mut bytes, 2, 2, 1).unwrap();
        // Second pixel differences against the first, per channel
        assert_eq!(bytes, vec![10, 100, 3, 3]);
    }

    #[test]
    fn test_predictor_rejects_eight_byte_samples() {
        let mut bytes = vec![0u8; 16];
        assert!(predictor_encode(&mut bytes, 2, 1, 8).is_err());
    }

    #[test]
    fn test_deflate_round_trip() {
        let payload: Vec<u8> = (0..4096u32).map(|i| (i % 7) as u8).collect();
        let compressed = deflate_compress(&payload).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(deflate_decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn test_decode_chunk_rejects_unknown_compression() {
        let err = decode_chunk(&[0u8; 4], 5, 1, false, 2, 1, 2, 4).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn test_decode_chunk_normalizes_big_endian() {
        let raw = vec![0x01, 0x02, 0x03, 0x04];
        let decoded = decode_chunk(&raw, COMPRESSION_NONE, 1, true, 2, 1, 2, 4).unwrap();
        assert_eq!(decoded, vec![0x02, 0x01, 0x04, 0x03]);
    }

    #[test]
    fn test_transform_round_trip_axis_aligned() {
        let gt: GeoTransform = [300000.0, 10.0, 0.0, 6100000.0, 0.0, -10.0];
        let TransformTags::ScaleTiepoint(scale, tiepoint) = encode_transform(gt) else {
            panic!("Axis-aligned transform should use scale + tiepoint");
        };
        let (decoded, gcps) = decode_transform(Some(&scale), Some(&tiepoint), None);
        assert_eq!(decoded, Some(gt));
        assert!(gcps.is_empty());
    }

    #[test]
    fn test_transform_round_trip_rotated() {
        let gt: GeoTransform = [100.0, 2.0, 0.5, 200.0, 0.3, -2.0];
        let TransformTags::Matrix(matrix) = encode_transform(gt) else {
            panic!("Rotated transform should use the matrix tag");
        };
        let (decoded, _) = decode_transform(None, None, Some(&matrix));
        assert_eq!(decoded, Some(gt));
    }

    #[test]
    fn test_multiple_tiepoints_decode_as_gcps() {
        let tiepoints = [
            0.0, 0.0, 0.0, 100.0, 200.0, 0.0, //
            10.0, 5.0, 0.0, 110.0, 195.0, 1.5,
        ];
        let (transform, gcps) = decode_transform(None, Some(&tiepoints), None);
        assert_eq!(transform, None);
        assert_eq!(gcps.len(), 2);
        assert_eq!(gcps[0].id, "gcp_1");
        assert_eq!(gcps[1].pixel, 10.0);
        assert_eq!(gcps[1].z, 1.5);
    }

    #[test]
    fn test_single_tiepoint_without_scale_is_a_gcp() {
        let tiepoints = [2.0, 3.0, 0.0, 500.0, 600.0, 0.0];
        let (transform, gcps) = decode_transform(None, Some(&tiepoints), None);
        assert_eq!(transform, None);
        assert_eq!(gcps.len(), 1);
    }

    #[test]
    fn test_gdal_metadata_round_trip() {
        let mut tags = BTreeMap::new();
        tags.insert("AREA_OR_POINT".to_string(), "Area".to_string());
        tags.insert("SOURCE".to_string(), "a & b <c>".to_string());
        let attrs = vec![
            BandAttributes {
                no_data: Some(-9999.0),
                color_interp: Some(ColorInterpretation::Gray),
            },
            BandAttributes::default(),
        ];
        let xml = encode_gdal_metadata(&tags, &attrs).unwrap();
        let (parsed_tags, parsed_attrs) = parse_gdal_metadata(&xml, 2);
        assert_eq!(parsed_tags, tags);
        assert_eq!(parsed_attrs, attrs);
    }

    #[test]
    fn test_gdal_metadata_empty_is_none() {
        assert_eq!(
            encode_gdal_metadata(&BTreeMap::new(), &[BandAttributes::default()]),
            None
        );
    }

    #[test]
    fn test_parse_gdal_metadata_skips_out_of_range_samples() {
        let xml = "<GDALMetadata><Item name=\"NODATA\" sample=\"5\" role=\"nodata\">1</Item></GDALMetadata>";
        let (tags, attrs) = parse_gdal_metadata(xml, 2);
        assert!(tags.is_empty());
        assert_eq!(attrs, vec![BandAttributes::default(); 2]);
    }

    #[test]
    fn test_chunk_grid_tiles() {
        let grid = ChunkGrid::Tiles {
            raster: (100, 50),
            tile: (32, 32),
        };
        assert_eq!(grid.count(), 4 * 2);
        assert_eq!(grid.window(0), Some(Window::new(0, 0, 32, 32)));
        // Rightmost tile clipped, payload still padded
        assert_eq!(grid.window(3), Some(Window::new(96, 0, 4, 32)));
        assert_eq!(grid.data_dims(3), Some((32, 32)));
        assert_eq!(grid.window(8), None);
    }

    #[test]
    fn test_chunk_grid_strips() {
        let grid = ChunkGrid::Strips {
            raster: (100, 50),
            rows_per_strip: 16,
        };
        assert_eq!(grid.count(), 4);
        assert_eq!(grid.window(3), Some(Window::new(0, 48, 100, 2)));
        // Final strip payload is clipped, not padded
        assert_eq!(grid.data_dims(3), Some((100, 2)));
    }

    #[test]
    fn test_chunk_grid_indices_over_window() {
        let grid = ChunkGrid::Tiles {
            raster: (100, 100),
            tile: (32, 32),
        };
        assert_eq!(grid.indices_over(&Window::new(0, 0, 32, 32)), vec![0]);
        assert_eq!(
            grid.indices_over(&Window::new(30, 30, 10, 10)),
            vec![0, 1, 4, 5]
        );
        assert!(grid
            .indices_over(&Window::new(0, 0, 0, 0))
            .is_empty());
    }

    #[test]
    fn test_big_tiff_threshold() {
        let geo = GeoMetadata::default();
        let options = CodecOptions::default();
        let small = EncodeSpec {
            width: 512,
            height: 512,
            bands: 3,
            pixel_type: PixelType::U8,
            geo: &geo,
            band_attrs: &[],
            options: &options,
        };
        assert!(!small.use_big_tiff(1));
        let huge = EncodeSpec {
            width: 100_000,
            height: 60_000,
            bands: 1,
            pixel_type: PixelType::U8,
            geo: &geo,
            band_attrs: &[],
            options: &options,
        };
        assert!(huge.use_big_tiff(1));
    }

    #[test]
    fn test_codec_options_validation() {
        assert!(CodecOptions::default().validate().is_ok());
        assert!(CodecOptions::default()
            .with_tile_size(100, 256)
            .validate()
            .is_err());
        assert!(CodecOptions::default()
            .with_tile_size(256, 0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_uniform_values() {
        assert_eq!(uniform(&[8, 8, 8]), Some(8));
        assert_eq!(uniform(&[8, 16]), None);
        assert_eq!(uniform(&[]), None);
    }

    #[test]
    fn test_default_color_interp_rgb_with_alpha() {
        let mut attrs = vec![BandAttributes::default(); 4];
        apply_default_color_interp(&mut attrs, PHOTOMETRIC_RGB, &[2]);
        let interps: Vec<_> = attrs.iter().map(|a| a.color_interp.unwrap()).collect();
        assert_eq!(
            interps,
            vec![
                ColorInterpretation::Red,
                ColorInterpretation::Green,
                ColorInterpretation::Blue,
                ColorInterpretation::Alpha,
            ]
        );
    }

    #[test]
    fn test_default_color_interp_keeps_explicit_values() {
        let mut attrs = vec![
            BandAttributes {
                no_data: None,
                color_interp: Some(ColorInterpretation::Blue),
            },
            BandAttributes::default(),
        ];
        apply_default_color_interp(&mut attrs, PHOTOMETRIC_MIN_IS_BLACK, &[]);
        assert_eq!(attrs[0].color_interp, Some(ColorInterpretation::Blue));
        assert_eq!(attrs[1].color_interp, Some(ColorInterpretation::Undefined));
    }

    #[test]
    fn test_value_into_text_forms() {
        assert_eq!(
            value_into_text(Value::Ascii("EPSG:4326".to_string())),
            Some("EPSG:4326".to_string())
        );
        let bytes = Value::List(vec![Value::Byte(b'h'), Value::Byte(b'i')]);
        assert_eq!(value_into_text(bytes), Some("hi".to_string()));
        assert_eq!(value_into_text(Value::Double(1.0)), None);
    }

    #[test]
    fn test_pad_tile() {
        // 2x2 window of 1-byte pixels into a padded 4x4 tile
        let clipped = vec![1u8, 2, 3, 4];
        let padded = pad_tile(&clipped, Window::new(0, 0, 2, 2), 4, 4, 1);
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[0..2], &[1, 2]);
        assert_eq!(&padded[4..6], &[3, 4]);
        assert!(padded[2] == 0 && padded[6] == 0 && padded[8] == 0);
    }
}
