//! Reference-zoom projection cache.
//!
//! Geographic points are projected once per reference-zoom change into
//! world-pixel coordinates (origin at the top-left of the world). Display
//! zooms are reached by a multiplicative scale factor, so neither ordinary
//! panning nor a display-zoom change reprojects a single point. Only a
//! view reset (a new reference zoom) or a change to the track set
//! invalidates the cache.

use std::f64::consts::PI;

use crate::track::Track;
use crate::{GpsPoint, PixelBounds, PixelPoint};

/// Converts geographic points into reference-zoom pixel space.
///
/// `project` maps a point to world pixels at the reference zoom;
/// `scale` gives the multiplicative factor from reference-zoom pixels to
/// display-zoom pixels. Hit-testing uses `scale` to convert a query point
/// and tolerance into reference space instead of reprojecting per frame.
pub trait Projection {
    fn project(&self, point: &GpsPoint) -> PixelPoint;
    fn unproject(&self, pixel: &PixelPoint) -> GpsPoint;
    fn scale(&self, zoom: f64) -> f64;
    fn reference_zoom(&self) -> f64;
}

/// Spherical Web-Mercator projection at a fixed reference zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebMercator {
    reference_zoom: f64,
    tile_size: f64,
}

impl WebMercator {
    pub fn new(reference_zoom: f64) -> Self {
        Self {
            reference_zoom,
            tile_size: 256.0,
        }
    }

    /// World size in pixels at the reference zoom.
    fn world_size(&self) -> f64 {
        self.tile_size * self.reference_zoom.exp2()
    }
}

impl Default for WebMercator {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Projection for WebMercator {
    fn project(&self, point: &GpsPoint) -> PixelPoint {
        let world = self.world_size();
        // Clamp latitude to the Mercator-safe range
        let lat = point.latitude.clamp(-85.051_128_78, 85.051_128_78);
        let siny = lat.to_radians().sin();

        let x = (point.longitude + 180.0) / 360.0 * world;
        let y = (0.5 - ((1.0 + siny) / (1.0 - siny)).ln() / (4.0 * PI)) * world;
        PixelPoint::new(x, y)
    }

    fn unproject(&self, pixel: &PixelPoint) -> GpsPoint {
        let world = self.world_size();
        let lng = pixel.x / world * 360.0 - 180.0;
        let n = PI * (1.0 - 2.0 * pixel.y / world);
        let lat = n.sinh().atan().to_degrees();
        GpsPoint::new(lat, lng)
    }

    fn scale(&self, zoom: f64) -> f64 {
        (zoom - self.reference_zoom).exp2()
    }

    fn reference_zoom(&self) -> f64 {
        self.reference_zoom
    }
}

/// Pixel-space cache of one track, valid for a single projection.
#[derive(Debug, Clone)]
pub struct ProjectedTrack {
    pub points: Vec<PixelPoint>,
    pub bounds: PixelBounds,
}

impl Track {
    /// Recompute the projected cache in place.
    ///
    /// Tracks without geometry keep an empty cache; hit-testing against
    /// them always fails.
    pub fn apply_projection<P: Projection + ?Sized>(&mut self, projection: &P) {
        self.projected = self.simplified_points.as_ref().and_then(|points| {
            let projected: Vec<PixelPoint> =
                points.iter().map(|p| projection.project(p)).collect();
            let bounds = PixelBounds::from_points(&projected)?;
            Some(ProjectedTrack {
                points: projected,
                bounds,
            })
        });
    }

    /// Drop the projected cache (view reset / track-set change).
    pub fn invalidate_projection(&mut self) {
        self.projected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::ActivitySummary;

    fn track_with_points(points: Vec<GpsPoint>) -> Track {
        let mut track = Track::from_summary(ActivitySummary {
            id: 1,
            name: "test".to_string(),
            sport_type: "Ride".to_string(),
            start_date: 0,
            distance: 0.0,
            moving_time: 0,
            elapsed_time: 0,
            total_elevation_gain: 0.0,
            start_latlng: None,
            end_latlng: None,
            summary_polyline: None,
        });
        track.geo_bounds = crate::GeoBounds::from_points(&points);
        track.raw_points = Some(points.clone());
        track.simplified_points = Some(points);
        track
    }

    #[test]
    fn test_project_origin_and_extremes() {
        let proj = WebMercator::new(0.0);

        let center = proj.project(&GpsPoint::new(0.0, 0.0));
        assert!((center.x - 128.0).abs() < 1e-9);
        assert!((center.y - 128.0).abs() < 1e-9);

        let west = proj.project(&GpsPoint::new(0.0, -180.0));
        assert!((west.x - 0.0).abs() < 1e-9);

        let east = proj.project(&GpsPoint::new(0.0, 180.0));
        assert!((east.x - 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_unproject_roundtrip() {
        let proj = WebMercator::new(10.0);
        let original = GpsPoint::new(51.5074, -0.1278);
        let roundtrip = proj.unproject(&proj.project(&original));
        assert!((roundtrip.latitude - original.latitude).abs() < 1e-9);
        assert!((roundtrip.longitude - original.longitude).abs() < 1e-9);
    }

    #[test]
    fn test_scale_doubles_per_zoom_level() {
        let proj = WebMercator::new(10.0);
        assert!((proj.scale(10.0) - 1.0).abs() < 1e-12);
        assert!((proj.scale(11.0) - 2.0).abs() < 1e-12);
        assert!((proj.scale(9.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_apply_projection_computes_bounds() {
        let mut track = track_with_points(vec![
            GpsPoint::new(51.50, -0.13),
            GpsPoint::new(51.51, -0.12),
            GpsPoint::new(51.52, -0.14),
        ]);
        let proj = WebMercator::new(12.0);
        track.apply_projection(&proj);

        let projected = track.projected.as_ref().unwrap();
        assert_eq!(projected.points.len(), 3);

        let bounds = projected.bounds;
        for p in &projected.points {
            assert!(bounds.contains(p));
        }
        // Northern latitudes sit in the upper (smaller-y) half of the world
        assert!(bounds.max_y < proj.world_size() / 2.0);
    }

    #[test]
    fn test_track_without_geometry_has_no_cache() {
        let mut track = track_with_points(vec![]);
        track.raw_points = None;
        track.simplified_points = None;
        track.apply_projection(&WebMercator::new(5.0));
        assert!(track.projected.is_none());
    }
}
