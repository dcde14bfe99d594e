//! Track model: activity records, polyline decoding and jaggy removal.
//!
//! One [`Track`] is built per activity when the full activity set is loaded
//! or synced. Geometry is decoded and simplified once at construction; only
//! the projected cache ([`crate::ProjectedTrack`]) is recomputed afterwards.

use geo::{Distance, Haversine, Point};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::projection::ProjectedTrack;
use crate::{GeoBounds, GpsPoint, TrackId};

/// Polyline precision of the activity source (5 decimal digits).
const POLYLINE_PRECISION: u32 = 5;

/// Jaggy-filter threshold: a point is removed when the chord between its
/// neighbours is shorter than 0.3 of the excursion through it.
const JAGGY_THRESHOLD: f64 = 0.3;

/// One activity as the activity source returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub id: TrackId,
    pub name: String,
    /// Sport type, e.g. "Ride" or "Run"
    pub sport_type: String,
    /// Unix timestamp (seconds since epoch)
    pub start_date: i64,
    /// Distance in meters
    pub distance: f64,
    /// Moving time in seconds
    pub moving_time: u32,
    /// Elapsed time in seconds
    pub elapsed_time: u32,
    /// Total elevation gain in meters
    pub total_elevation_gain: f64,
    /// Recorded start point, if any
    pub start_latlng: Option<[f64; 2]>,
    /// Recorded end point, if any
    pub end_latlng: Option<[f64; 2]>,
    /// Encoded summary polyline; absent for activities without a path
    pub summary_polyline: Option<String>,
}

/// One recorded activity's geometry and metadata.
///
/// `raw_points` and `simplified_points` are immutable after construction.
/// The projected cache is recomputed lazily whenever the projection's
/// reference zoom changes or the track set is replaced; it is owned by the
/// view that triggered the projection, never written concurrently.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub data: ActivitySummary,
    /// Decoded (lat, lng) path; `None` when the activity has no recorded
    /// path or its polyline failed to decode
    pub raw_points: Option<Vec<GpsPoint>>,
    /// `raw_points` after jaggy removal; endpoints always preserved
    pub simplified_points: Option<Vec<GpsPoint>>,
    /// Geographic bounds of the simplified path
    pub geo_bounds: Option<GeoBounds>,
    /// Pixel-space cache, valid only for the projection used to compute it
    pub projected: Option<ProjectedTrack>,
}

impl Track {
    /// Build a track from an activity record.
    ///
    /// A malformed polyline is a local, non-fatal degradation: the track is
    /// kept without geometry (it still appears in the table, flagged as
    /// having no map) and contributes nothing to the map pipeline.
    pub fn from_summary(data: ActivitySummary) -> Self {
        let id = data.id;
        let (raw_points, simplified_points, geo_bounds) = match &data.summary_polyline {
            Some(encoded) if !encoded.is_empty() => match decode_polyline(id, encoded) {
                Ok(raw) => {
                    let simplified = filter_jaggies(&raw);
                    let bounds = GeoBounds::from_points(&simplified);
                    (Some(raw), Some(simplified), bounds)
                }
                Err(e) => {
                    warn!("[Track] {}", e);
                    (None, None, None)
                }
            },
            _ => (None, None, None),
        };

        Self {
            id,
            data,
            raw_points,
            simplified_points,
            geo_bounds,
            projected: None,
        }
    }

    /// Whether the track carries any geometry.
    pub fn has_map(&self) -> bool {
        self.simplified_points
            .as_ref()
            .map(|p| p.len() >= 2)
            .unwrap_or(false)
    }

    /// Path length in meters computed from the simplified geometry.
    ///
    /// This is the length of the drawn path, which can differ from the
    /// recorded `data.distance` (the source measures the full-resolution
    /// track).
    pub fn path_length_m(&self) -> Option<f64> {
        let points = self.simplified_points.as_ref()?;
        if points.len() < 2 {
            return None;
        }
        let total = points
            .windows(2)
            .map(|w| {
                Haversine::distance(
                    Point::new(w[0].longitude, w[0].latitude),
                    Point::new(w[1].longitude, w[1].latitude),
                )
            })
            .sum();
        Some(total)
    }
}

/// Decode an encoded polyline into (lat, lng) points.
///
/// Uses the standard signed-delta encoding at 5-digit precision.
pub fn decode_polyline(track_id: TrackId, encoded: &str) -> Result<Vec<GpsPoint>> {
    let line = polyline::decode_polyline(encoded, POLYLINE_PRECISION).map_err(|e| {
        AtlasError::DecodeError {
            track_id,
            message: e.to_string(),
        }
    })?;

    // Decoded coordinates are x = longitude, y = latitude
    let points: Vec<GpsPoint> = line
        .coords()
        .map(|c| GpsPoint::new(c.y, c.x))
        .filter(|p| p.is_valid())
        .collect();

    Ok(points)
}

/// Remove jaggies: points that lie close to the chord between their
/// neighbours.
///
/// Scans backward from the second-to-last point to the second point. For
/// index `i`, with `AB`/`BC` the distances to the previous/next point and
/// `AC` the chord across, the point is removed when
/// `AC < 0.3 * (AB + BC / 2)`.
///
/// Distances are planar Euclidean on raw (lat, lng) pairs and are computed
/// from the original point list up front; a splice does not re-derive them.
/// The scan index keeps decreasing regardless of removals, so this is one
/// backward pass, not a fixed-point iteration. Endpoints are never removed.
pub fn filter_jaggies(points: &[GpsPoint]) -> Vec<GpsPoint> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }

    // dist1[i] = |p[i] p[i+1]|, dist2[i] = |p[i] p[i+2]|, over the original list
    let dist1: Vec<f64> = (0..n - 1)
        .map(|i| planar_distance(&points[i], &points[i + 1]))
        .collect();
    let dist2: Vec<f64> = (0..n - 2)
        .map(|i| planar_distance(&points[i], &points[i + 2]))
        .collect();

    let mut out = points.to_vec();
    for i in (1..=n - 2).rev() {
        let ab = dist1[i - 1];
        let bc = dist1[i];
        let ac = dist2[i - 1];
        let excursion = ab + bc / 2.0;
        if ac < JAGGY_THRESHOLD * excursion {
            out.remove(i);
        }
    }
    out
}

fn planar_distance(a: &GpsPoint, b: &GpsPoint) -> f64 {
    (a.latitude - b.latitude).hypot(a.longitude - b.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: TrackId, polyline: Option<&str>) -> ActivitySummary {
        ActivitySummary {
            id,
            name: format!("Activity {}", id),
            sport_type: "Ride".to_string(),
            start_date: 1_600_000_000,
            distance: 10_000.0,
            moving_time: 1800,
            elapsed_time: 2000,
            total_elevation_gain: 120.0,
            start_latlng: None,
            end_latlng: None,
            summary_polyline: polyline.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_decode_known_polyline() {
        // Example from the polyline format documentation
        let points = decode_polyline(1, "_p~iF~ps|U_ulLnnqC_mqNvxq`@").unwrap();
        assert_eq!(points.len(), 3);
        assert!((points[0].latitude - 38.5).abs() < 1e-9);
        assert!((points[0].longitude - -120.2).abs() < 1e-9);
        assert!((points[2].latitude - 43.252).abs() < 1e-9);
        assert!((points[2].longitude - -126.453).abs() < 1e-9);
    }

    #[test]
    fn test_decode_failure_degrades_to_no_map() {
        // Truncated escape sequence: decoder must reject it
        let track = Track::from_summary(summary(7, Some("_p~iF~ps|U_ulLnnqC_")));
        assert!(!track.has_map());
        assert!(track.raw_points.is_none());
        assert!(track.simplified_points.is_none());
        assert!(track.geo_bounds.is_none());
    }

    #[test]
    fn test_track_without_polyline() {
        let track = Track::from_summary(summary(3, None));
        assert!(!track.has_map());
        assert!(track.path_length_m().is_none());
    }

    #[test]
    fn test_endpoints_never_removed() {
        // A tight zigzag that the filter would love to collapse entirely
        let points = vec![
            GpsPoint::new(0.0, 0.0),
            GpsPoint::new(0.001, 0.0001),
            GpsPoint::new(0.0, 0.0002),
            GpsPoint::new(0.001, 0.0003),
            GpsPoint::new(0.0, 0.0004),
        ];
        let simplified = filter_jaggies(&points);
        assert!(simplified.len() >= 2);
        assert_eq!(simplified.first(), points.first());
        assert_eq!(simplified.last(), points.last());
        assert!(simplified.len() <= points.len());
    }

    #[test]
    fn test_single_jiggle_removed() {
        // Near-straight path of 5 points with one perpendicular jiggle at
        // index 2. By hand, for i = 2:
        //   AB = |p1 p2| = hypot(0.004, 0.0005) ~= 0.0040311
        //   BC = |p2 p3| = hypot(0.004, 0.0005) ~= 0.0040311
        //   AC = |p1 p3| = 0.001
        //   excursion = AB + BC/2 ~= 0.0060467, 0.3 * excursion ~= 0.0018140
        //   AC < 0.3 * excursion -> removed.
        // The flat interior points have AC well above their thresholds and
        // survive.
        let points = vec![
            GpsPoint::new(0.0, 0.000),
            GpsPoint::new(0.0, 0.001),
            GpsPoint::new(0.004, 0.0015),
            GpsPoint::new(0.0, 0.002),
            GpsPoint::new(0.0, 0.003),
        ];
        let simplified = filter_jaggies(&points);
        assert_eq!(simplified.len(), 4);
        assert!(!simplified.contains(&GpsPoint::new(0.004, 0.0015)));
        assert!(simplified.contains(&GpsPoint::new(0.0, 0.001)));
        assert!(simplified.contains(&GpsPoint::new(0.0, 0.002)));
    }

    #[test]
    fn test_backward_splice_walk_is_single_pass() {
        // Pinned behaviour: distances come from the original list, so after
        // p3 is spliced out the verdict on p2 still uses p2's original
        // neighbours (p1, p3), NOT the post-splice neighbours (p1, p4).
        //
        //   i=3 (p3): AB=|p2 p3|=0.008, BC=|p3 p4|~=0.0120104,
        //             AC=|p2 p4|~=0.0040311, excursion~=0.0140052,
        //             0.3*e~=0.0042016 -> removed.
        //   i=2 (p2): AB=|p1 p2|~=0.0040311, BC=|p2 p3|=0.008 (original),
        //             AC=|p1 p3|~=0.0120104, excursion~=0.0080311,
        //             0.3*e~=0.0024093 -> kept.
        //
        // A variant that re-derived distances after the splice would see
        // AC' = |p1 p4| = 0.001 < 0.3 * (0.0040311 + 0.0040311/2) and
        // remove p2 as well. The single backward pass keeps it.
        let points = vec![
            GpsPoint::new(0.0, 0.000),
            GpsPoint::new(0.0, 0.001),
            GpsPoint::new(0.004, 0.0015),
            GpsPoint::new(0.012, 0.0015),
            GpsPoint::new(0.0, 0.002),
            GpsPoint::new(0.0, 0.003),
        ];
        let simplified = filter_jaggies(&points);
        assert_eq!(simplified.len(), 5);
        assert!(!simplified.contains(&GpsPoint::new(0.012, 0.0015)));
        assert!(simplified.contains(&GpsPoint::new(0.004, 0.0015)));
        assert_eq!(simplified.first(), points.first());
        assert_eq!(simplified.last(), points.last());
    }

    #[test]
    fn test_path_length() {
        let track = Track::from_summary(summary(1, Some("_p~iF~ps|U_ulLnnqC_mqNvxq`@")));
        assert!(track.has_map());
        let len = track.path_length_m().unwrap();
        // ~800 km across the western US for the documentation polyline
        assert!(len > 500_000.0);
    }
}
