//! # Track Atlas
//!
//! Interactive GPS track rendering, hit-testing and selection for activity
//! map viewers.
//!
//! This library provides:
//! - Polyline decoding and jaggy-removal simplification of recorded tracks
//! - A reference-zoom projection cache with pixel-space bounds
//! - Fast geometric hit-testing of the cursor against visible tracks
//! - A layered, dirty-flag-scheduled density/highlight compositor
//! - Hover/multiselect/selection state kept consistent between a map view
//!   and a sortable, filterable table view
//!
//! ## Features
//!
//! - **`parallel`** - Parallel multi-track hit-testing with rayon
//! - **`http`** - HTTP client for activity syncing and token refresh
//! - **`persistence`** - SQLite-backed local session store
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use track_atlas::{filter_jaggies, GpsPoint};
//!
//! // Decode + simplify happen when a track is built from a summary record.
//! let points = vec![
//!     GpsPoint::new(51.5074, -0.1278),
//!     GpsPoint::new(51.5080, -0.1290),
//!     GpsPoint::new(51.5090, -0.1300),
//! ];
//! let simplified = filter_jaggies(&points);
//! assert_eq!(simplified.first(), points.first());
//! assert_eq!(simplified.last(), points.last());
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{AtlasError, Result};

// Track model (activity records, polyline decode, jaggy filter)
pub mod track;
pub use track::{decode_polyline, filter_jaggies, ActivitySummary, Track};

// Reference-zoom projection cache
pub mod projection;
pub use projection::{ProjectedTrack, Projection, WebMercator};

#[cfg(feature = "parallel")]
pub use hit_test::hits_at_parallel;
pub use hit_test::{hit_test, hits_at, point_segment_distance};

// Layered density/highlight compositor with coalesced redraws
pub mod compositor;
pub use compositor::{Compositor, DirtyFlags, RenderConfig, Rgba, Viewport};

// Hover/multiselect/selection state machine and table contract
pub mod state;
pub use state::{
    derive_visible, ClickOutcome, MapCamera, SelectionState, SortKey, StateChanges, TableQuery,
    TableScroll,
};

// Stateful atlas engine (singleton with all viewer state)
pub mod engine;
pub use engine::{with_atlas, AtlasStats, SyncGeneration, TrackAtlas, ATLAS};

// Local key-value session store
pub mod store;
#[cfg(feature = "persistence")]
pub use store::SqliteStore;
pub use store::{JsonItem, KeyValueStore, MemoryStore, SessionCache, TokenRecord};

// Export of the visible set to standard geospatial formats
pub mod export;
pub use export::{
    geojson_to_string, tracks_to_geojson, tracks_to_gpx, tracks_to_kml, FeatureCollection,
};

// HTTP module for activity syncing and token refresh
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::{ActivityFetcher, AuthApi, ProgressCallback};

// ============================================================================
// Core Types
// ============================================================================

/// Stable identifier of one recorded activity, unchanged across syncs.
pub type TrackId = u64;

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use track_atlas::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Geographic bounding box of a track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }

    /// Extend these bounds to also cover `other`.
    pub fn extend(&mut self, other: &GeoBounds) {
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lat = self.max_lat.max(other.max_lat);
        self.min_lng = self.min_lng.min(other.min_lng);
        self.max_lng = self.max_lng.max(other.max_lng);
    }
}

/// A point in pixel space.
///
/// The coordinate system is the map's world-pixel plane at the projection's
/// reference zoom, with the origin at the top-left of the world. Under a
/// fixed reference zoom these coordinates are invariant to panning.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box in pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl PixelBounds {
    /// Compute bounds over projected points. Empty input yields `None`.
    pub fn from_points(points: &[PixelPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;

        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        Some(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Bounds grown by `padding` on all four sides.
    pub fn pad(&self, padding: f64) -> Self {
        Self {
            min_x: self.min_x - padding,
            min_y: self.min_y - padding,
            max_x: self.max_x + padding,
            max_y: self.max_y + padding,
        }
    }

    /// Whether `point` lies inside (or on the edge of) the bounds.
    pub fn contains(&self, point: &PixelPoint) -> bool {
        point.x >= self.min_x
            && point.x <= self.max_x
            && point.y >= self.min_y
            && point.y <= self.max_y
    }
}

// ============================================================================
// Tests
// ============================================================================
