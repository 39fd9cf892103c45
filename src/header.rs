use crate::entity::{BoundingBox, Location, COORDINATE_PRECISION};
use crate::osmpbf;

// Header bounding boxes are stored in nanodegrees.
const NANODEGREES_PER_UNIT: i64 = 1_000_000_000 / COORDINATE_PRECISION as i64;

/// File-level metadata.
///
/// A default header is empty: no generator, no bounds, no features.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub generator: String,
    pub bounds: Option<BoundingBox>,
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub source: Option<String>,
    /// Seconds since the unix epoch.
    pub replication_timestamp: Option<i64>,
    pub replication_sequence_number: Option<i64>,
    pub replication_base_url: Option<String>,
}

impl Header {
    pub fn new() -> Self {
        Default::default()
    }

    /// Program that generated the file, `""` if unknown.
    pub fn generator(&self) -> &str {
        &self.generator
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        self.bounds
    }

    pub(crate) fn from_pbf(block: osmpbf::HeaderBlock) -> Self {
        let bounds = block.bbox.map(|bbox| {
            BoundingBox::new(
                Location::new(
                    (bbox.left / NANODEGREES_PER_UNIT) as i32,
                    (bbox.bottom / NANODEGREES_PER_UNIT) as i32,
                ),
                Location::new(
                    (bbox.right / NANODEGREES_PER_UNIT) as i32,
                    (bbox.top / NANODEGREES_PER_UNIT) as i32,
                ),
            )
        });
        Self {
            generator: block.writingprogram.unwrap_or_default(),
            bounds,
            required_features: block.required_features,
            optional_features: block.optional_features,
            source: block.source,
            replication_timestamp: block.osmosis_replication_timestamp,
            replication_sequence_number: block.osmosis_replication_sequence_number,
            replication_base_url: block.osmosis_replication_base_url,
        }
    }

    /// Converts the header into a PBF header block. `writingprogram` is used
    /// when the header has no generator.
    pub(crate) fn to_pbf(&self, writingprogram: &str) -> osmpbf::HeaderBlock {
        let bbox = self
            .bounds
            .filter(BoundingBox::is_defined)
            .map(|bounds| osmpbf::HeaderBBox {
                left: i64::from(bounds.bottom_left.x()) * NANODEGREES_PER_UNIT,
                right: i64::from(bounds.top_right.x()) * NANODEGREES_PER_UNIT,
                top: i64::from(bounds.top_right.y()) * NANODEGREES_PER_UNIT,
                bottom: i64::from(bounds.bottom_left.y()) * NANODEGREES_PER_UNIT,
            });
        let generator = if self.generator.is_empty() {
            writingprogram
        } else {
            &self.generator
        };
        osmpbf::HeaderBlock {
            bbox,
            required_features: vec![
                osmpbf::FEATURE_OSM_SCHEMA.to_string(),
                osmpbf::FEATURE_DENSE_NODES.to_string(),
            ],
            optional_features: self.optional_features.clone(),
            writingprogram: Some(generator.to_string()),
            source: self.source.clone(),
            osmosis_replication_timestamp: self.replication_timestamp,
            osmosis_replication_sequence_number: self.replication_sequence_number,
            osmosis_replication_base_url: self.replication_base_url.clone(),
        }
    }
}
