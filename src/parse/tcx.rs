//! TCX (Garmin Training Center) adapter.
//!
//! Elements are matched by local name, so files using either the default
//! TrainingCenterDatabase namespace or a prefixed one are accepted alike.

use std::path::Path;

use roxmltree::{Document, Node};

use super::{activity_types, child, child_f64, child_text, decode_utf8, parse_xml_time, FormatAdapter};
use crate::error::Result;
use crate::records::{BackfillBuffer, ParsedActivity, PartialMetadata, RawLap, RawPoint};
use crate::{ActivityError, SourceFormat};

/// Garmin ActivityExtension namespace carrying `Speed` and `RunCadence`.
const ACTIVITY_EXTENSION_NS: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";

#[derive(Debug, Clone, Copy, Default)]
pub struct TcxAdapter;

impl FormatAdapter for TcxAdapter {
    fn name(&self) -> &str {
        "tcx"
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Tcx
    }

    fn parse(&self, path: &Path, data: &[u8]) -> Result<ParsedActivity> {
        let fail = |message: String| ActivityError::parse(path, self.name(), message);

        let text = decode_utf8(path, self.name(), data)?;
        let doc = Document::parse(text).map_err(|e| fail(e.to_string()))?;

        let activity = child(doc.root_element(), "Activities")
            .and_then(|a| child(a, "Activity"))
            .ok_or_else(|| fail("file contains no <Activities>/<Activity> element".into()))?;

        let mut buffer = BackfillBuffer::new();
        let mut laps = Vec::new();

        for (i, lap) in activity
            .children()
            .filter(|n| n.has_tag_name("Lap"))
            .enumerate()
        {
            let lap_no = i as u32 + 1;
            laps.push(parse_lap(lap, lap_no).map_err(fail)?);

            for track in lap.children().filter(|n| n.has_tag_name("Track")) {
                for trackpoint in track.children().filter(|n| n.has_tag_name("Trackpoint")) {
                    let mut point = parse_trackpoint(trackpoint).map_err(fail)?;
                    point.lap = Some(lap_no);
                    buffer.push(point);
                }
            }
        }

        let metadata = PartialMetadata {
            activity_type: activity
                .attribute("Sport")
                .and_then(activity_types::from_device),
            date_time: child_text(activity, "Id").and_then(parse_xml_time),
            name: None,
            description: child_text(activity, "Notes").map(str::to_string),
            creator: child(activity, "Creator")
                .and_then(|c| child_text(c, "Name"))
                .map(str::to_string),
        };

        Ok(ParsedActivity {
            points: buffer.finish(),
            laps: Some(laps),
            metadata,
            source_format: SourceFormat::Tcx,
            adapter: self.name().to_string(),
            source_file: None,
            source_hash: String::new(),
        })
    }
}

fn parse_lap(lap: Node<'_, '_>, lap_no: u32) -> std::result::Result<RawLap, String> {
    let start_time = match lap.attribute("StartTime") {
        Some(t) => Some(parse_xml_time(t).ok_or_else(|| format!("invalid lap StartTime '{}'", t))?),
        None => None,
    };

    Ok(RawLap {
        lap_no,
        start_time,
        distance: child_f64(lap, "DistanceMeters"),
        duration: child_f64(lap, "TotalTimeSeconds"),
        calories: child_f64(lap, "Calories"),
        mean_hr: child(lap, "AverageHeartRateBpm").and_then(|n| child_f64(n, "Value")),
        mean_cadence: child_f64(lap, "Cadence"),
        mean_kmph: extension_value(lap, "AvgSpeed").map(|mps| mps * 3.6),
    })
}

fn parse_trackpoint(trackpoint: Node<'_, '_>) -> std::result::Result<RawPoint, String> {
    let position = child(trackpoint, "Position");
    let time = match child_text(trackpoint, "Time") {
        Some(t) => Some(parse_xml_time(t).ok_or_else(|| format!("invalid Time '{}'", t))?),
        None => None,
    };

    // Cadence is either a direct child or an extension element
    let cadence = child_f64(trackpoint, "Cadence")
        .or_else(|| extension_value(trackpoint, "RunCadence"));

    Ok(RawPoint {
        latitude: position.and_then(|p| child_f64(p, "LatitudeDegrees")),
        longitude: position.and_then(|p| child_f64(p, "LongitudeDegrees")),
        elevation: child_f64(trackpoint, "AltitudeMeters"),
        time,
        heart_rate: child(trackpoint, "HeartRateBpm").and_then(|n| child_f64(n, "Value")),
        cadence,
        lap: None,
        kmph: extension_value(trackpoint, "Speed").map(|mps| mps * 3.6),
    })
}

/// Numeric ActivityExtension element anywhere under `node`'s `<Extensions>`.
fn extension_value(node: Node<'_, '_>, name: &str) -> Option<f64> {
    child(node, "Extensions")?
        .descendants()
        .find(|n| n.is_element() && n.has_tag_name((ACTIVITY_EXTENSION_NS, name)))
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse().ok())
}
