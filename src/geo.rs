//! Georeferencing metadata: geotransforms, ground control points, and the
//! bundle copied from a reference raster onto merge outputs.
//!
//! The merge core treats all of this as opaque: projection strings are
//! carried verbatim (no CRS parsing or reprojection), tag maps are copied
//! key for key, and affine coefficients are moved as plain numbers.

use std::collections::BTreeMap;

use crate::store::{Dataset, StoreError};

/// Affine pixel-to-georeferenced mapping.
///
/// Coefficients follow the usual raster convention:
/// `geo_x = gt[0] + col * gt[1] + row * gt[2]` and
/// `geo_y = gt[3] + col * gt[4] + row * gt[5]`.
pub type GeoTransform = [f64; 6];

/// A ground control point tying a pixel location to a georeferenced one.
#[derive(Debug, Clone, PartialEq)]
pub struct Gcp {
    /// Point identifier. The container format persists coordinates only,
    /// so identifiers are synthesized (`gcp_1`, `gcp_2`, ...) on read.
    pub id: String,
    /// Column of the point in pixel space.
    pub pixel: f64,
    /// Row of the point in pixel space.
    pub line: f64,
    /// Georeferenced x coordinate.
    pub x: f64,
    /// Georeferenced y coordinate.
    pub y: f64,
    /// Georeferenced z coordinate.
    pub z: f64,
}

impl Gcp {
    /// Create a point from its pixel and georeferenced coordinates.
    #[must_use]
    pub fn new(id: impl Into<String>, pixel: f64, line: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            id: id.into(),
            pixel,
            line,
            x,
            y,
            z,
        }
    }
}

/// The georeferencing bundle copied from a reference raster to an output.
///
/// Every field is optional in the sense that empty values are legal and
/// are copied as-is; a raster with no georeferencing yields a bundle that
/// applies cleanly and leaves the target ungeoreferenced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoMetadata {
    /// Affine transform, absent when the raster is not georeferenced.
    pub transform: Option<GeoTransform>,
    /// Spatial reference string, empty when absent.
    pub projection: String,
    /// Dataset-level key/value tags.
    pub tags: BTreeMap<String, String>,
    /// Ground control points, usually empty.
    pub gcps: Vec<Gcp>,
    /// Spatial reference string for the control points.
    pub gcp_projection: String,
}

impl GeoMetadata {
    /// Snapshot the georeferencing bundle of a dataset.
    #[must_use]
    pub fn read(dataset: &Dataset) -> Self {
        Self {
            transform: dataset.geo_transform(),
            projection: dataset.projection().to_string(),
            tags: dataset.tags().clone(),
            gcps: dataset.gcps().to_vec(),
            gcp_projection: dataset.gcp_projection().to_string(),
        }
    }

    /// Apply this bundle to a writable dataset.
    ///
    /// The order matches the copy order of the merge flow: transform,
    /// projection, tags, then control points. Control points are applied
    /// only when at least one is present.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the target rejects a metadata write,
    /// e.g. because it is read-only.
    pub fn apply(&self, target: &mut Dataset) -> Result<(), StoreError> {
        if let Some(transform) = self.transform {
            target.set_geo_transform(transform)?;
        }
        target.set_projection(&self.projection)?;
        target.set_tags(self.tags.clone())?;
        if !self.gcps.is_empty() {
            target.set_gcps(self.gcps.clone(), &self.gcp_projection)?;
        }
        Ok(())
    }
}

/// Copy the georeferencing bundle of `reference` onto `target`.
///
/// Does nothing when `reference` is `None`. Empty transforms, projections,
/// and tag maps are copied as empty rather than treated as errors.
///
/// # Errors
/// Returns [`StoreError`] when reading succeeds but the target rejects a
/// metadata write.
pub fn propagate(reference: Option<&Dataset>, target: &mut Dataset) -> Result<(), StoreError> {
    match reference {
        Some(dataset) => GeoMetadata::read(dataset).apply(target),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CodecOptions, PixelType};

    fn scratch_dataset(dir: &tempfile::TempDir, name: &str) -> Dataset {
        Dataset::create(
            dir.path().join(name),
            8,
            8,
            1,
            PixelType::U8,
            &CodecOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_propagate_without_reference_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = scratch_dataset(&dir, "out.tif");
        propagate(None, &mut target).unwrap();
        assert_eq!(target.geo_transform(), None);
        assert_eq!(target.projection(), "");
        assert!(target.tags().is_empty());
    }

    #[test]
    fn test_apply_copies_empty_bundle_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = scratch_dataset(&dir, "out.tif");
        GeoMetadata::default().apply(&mut target).unwrap();
        assert_eq!(target.geo_transform(), None);
        assert_eq!(target.projection(), "");
        assert!(target.gcps().is_empty());
    }

    #[test]
    fn test_apply_sets_bundle_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = scratch_dataset(&dir, "out.tif");
        let mut tags = BTreeMap::new();
        tags.insert("AREA_OR_POINT".to_string(), "Area".to_string());
        let bundle = GeoMetadata {
            transform: Some([100.0, 0.5, 0.0, 200.0, 0.0, -0.5]),
            projection: "EPSG:32756".to_string(),
            tags,
            gcps: Vec::new(),
            gcp_projection: String::new(),
        };
        bundle.apply(&mut target).unwrap();
        assert_eq!(target.geo_transform(), bundle.transform);
        assert_eq!(target.projection(), "EPSG:32756");
        assert_eq!(target.tags().get("AREA_OR_POINT").map(String::as_str), Some("Area"));
    }

    #[test]
    fn test_gcps_skipped_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = scratch_dataset(&dir, "out.tif");
        let bundle = GeoMetadata {
            gcp_projection: "EPSG:4326".to_string(),
            ..GeoMetadata::default()
        };
        bundle.apply(&mut target).unwrap();
        // No control points were applied, so the projection slot stays empty.
        assert_eq!(target.gcp_projection(), "");
    }
}
