//! Export of the visible track set to standard geospatial formats.
//!
//! GeoJSON is the pivot format; GPX and KML are rendered from the same
//! feature list. Tracks without geometry are skipped in all three. The
//! caller supplies the visible track list and receives bytes to hand to a
//! save-as-file action.

use serde::Serialize;

use crate::error::{AtlasError, Result};
use crate::track::Track;

/// GeoJSON FeatureCollection of LineString features.
#[derive(Debug, Serialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub features: Vec<Feature>,
}

#[derive(Debug, Serialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub geometry: Geometry,
    pub properties: FeatureProperties,
}

#[derive(Debug, Serialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// GeoJSON coordinate order: [longitude, latitude]
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureProperties {
    pub id: u64,
    pub name: String,
    pub sport_type: String,
    /// Unix timestamp (seconds)
    pub start_date: i64,
    /// Meters
    pub distance: f64,
    /// Seconds
    pub moving_time: u32,
    /// Meters
    pub total_elevation_gain: f64,
}

/// Build a FeatureCollection from the visible tracks.
pub fn tracks_to_geojson(tracks: &[&Track]) -> FeatureCollection {
    let features = tracks
        .iter()
        .filter_map(|track| {
            let points = track.simplified_points.as_ref()?;
            if points.len() < 2 {
                return None;
            }
            Some(Feature {
                kind: "Feature",
                geometry: Geometry {
                    kind: "LineString",
                    coordinates: points.iter().map(|p| [p.longitude, p.latitude]).collect(),
                },
                properties: FeatureProperties {
                    id: track.id,
                    name: track.data.name.clone(),
                    sport_type: track.data.sport_type.clone(),
                    start_date: track.data.start_date,
                    distance: track.data.distance,
                    moving_time: track.data.moving_time,
                    total_elevation_gain: track.data.total_elevation_gain,
                },
            })
        })
        .collect();

    FeatureCollection {
        kind: "FeatureCollection",
        features,
    }
}

/// Serialize the FeatureCollection to GeoJSON text.
pub fn geojson_to_string(collection: &FeatureCollection) -> Result<String> {
    serde_json::to_string(collection).map_err(|e| AtlasError::ExportError {
        message: e.to_string(),
    })
}

/// Render the visible tracks as a GPX 1.1 document.
pub fn tracks_to_gpx(tracks: &[&Track]) -> String {
    let collection = tracks_to_geojson(tracks);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<gpx version=\"1.1\" creator=\"track-atlas\" xmlns=\"http://www.topografix.com/GPX/1/1\">\n");
    for feature in &collection.features {
        out.push_str("  <trk>\n");
        out.push_str(&format!(
            "    <name>{}</name>\n",
            xml_escape(&feature.properties.name)
        ));
        out.push_str(&format!(
            "    <type>{}</type>\n",
            xml_escape(&feature.properties.sport_type)
        ));
        out.push_str("    <trkseg>\n");
        for [lng, lat] in &feature.geometry.coordinates {
            out.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\"/>\n",
                lat, lng
            ));
        }
        out.push_str("    </trkseg>\n");
        out.push_str("  </trk>\n");
    }
    out.push_str("</gpx>\n");
    out
}

/// Render the visible tracks as a KML document.
pub fn tracks_to_kml(tracks: &[&Track]) -> String {
    let collection = tracks_to_geojson(tracks);
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    out.push_str("  <Document>\n");
    for feature in &collection.features {
        out.push_str("    <Placemark>\n");
        out.push_str(&format!(
            "      <name>{}</name>\n",
            xml_escape(&feature.properties.name)
        ));
        out.push_str("      <LineString>\n        <coordinates>");
        let coords: Vec<String> = feature
            .geometry
            .coordinates
            .iter()
            .map(|[lng, lat]| format!("{},{}", lng, lat))
            .collect();
        out.push_str(&coords.join(" "));
        out.push_str("</coordinates>\n      </LineString>\n");
        out.push_str("    </Placemark>\n");
    }
    out.push_str("  </Document>\n");
    out.push_str("</kml>\n");
    out
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::ActivitySummary;
    use crate::GpsPoint;

    fn track(id: u64, name: &str, points: Option<Vec<GpsPoint>>) -> Track {
        let mut track = Track::from_summary(ActivitySummary {
            id,
            name: name.to_string(),
            sport_type: "Ride".to_string(),
            start_date: 1_600_000_000,
            distance: 5_000.0,
            moving_time: 900,
            elapsed_time: 1000,
            total_elevation_gain: 50.0,
            start_latlng: None,
            end_latlng: None,
            summary_polyline: None,
        });
        track.simplified_points = points;
        track
    }

    #[test]
    fn test_geojson_skips_tracks_without_geometry() {
        let with_map = track(
            1,
            "Mapped",
            Some(vec![GpsPoint::new(51.5, -0.13), GpsPoint::new(51.6, -0.12)]),
        );
        let without_map = track(2, "Trainer session", None);

        let collection = tracks_to_geojson(&[&with_map, &without_map]);
        assert_eq!(collection.features.len(), 1);
        assert_eq!(collection.features[0].properties.id, 1);
    }

    #[test]
    fn test_geojson_coordinate_order_is_lng_lat() {
        let t = track(
            1,
            "Order check",
            Some(vec![GpsPoint::new(51.5, -0.13), GpsPoint::new(51.6, -0.12)]),
        );
        let collection = tracks_to_geojson(&[&t]);
        assert_eq!(collection.features[0].geometry.coordinates[0], [-0.13, 51.5]);

        let json = geojson_to_string(&collection).unwrap();
        assert!(json.contains("\"FeatureCollection\""));
        assert!(json.contains("\"LineString\""));
        assert!(json.contains("\"sportType\":\"Ride\""));
    }

    #[test]
    fn test_gpx_structure_and_escaping() {
        let t = track(
            1,
            "Hill repeats <5x>",
            Some(vec![GpsPoint::new(51.5, -0.13), GpsPoint::new(51.6, -0.12)]),
        );
        let gpx = tracks_to_gpx(&[&t]);
        assert!(gpx.starts_with("<?xml"));
        assert!(gpx.contains("<gpx version=\"1.1\""));
        assert!(gpx.contains("<name>Hill repeats &lt;5x&gt;</name>"));
        assert!(gpx.contains("<trkpt lat=\"51.5\" lon=\"-0.13\"/>"));
    }

    #[test]
    fn test_kml_coordinates() {
        let t = track(
            1,
            "KML",
            Some(vec![GpsPoint::new(51.5, -0.13), GpsPoint::new(51.6, -0.12)]),
        );
        let kml = tracks_to_kml(&[&t]);
        assert!(kml.contains("<kml xmlns"));
        assert!(kml.contains("<coordinates>-0.13,51.5 -0.12,51.6</coordinates>"));
    }

    #[test]
    fn test_empty_export() {
        let collection = tracks_to_geojson(&[]);
        assert!(collection.features.is_empty());
        let gpx = tracks_to_gpx(&[]);
        assert!(gpx.contains("</gpx>"));
    }
}
