//! GPX adapter.
//!
//! GPX files are sub-dispatched on their `creator` attribute: each exporter
//! encodes the activity type differently, so the creator decides which
//! vocabulary applies.

use std::path::Path;

use roxmltree::{Document, Node};

use super::{activity_types, child, child_f64, child_text, decode_utf8, parse_xml_time, FormatAdapter};
use crate::error::Result;
use crate::records::{BackfillBuffer, ParsedActivity, PartialMetadata, RawPoint};
use crate::{ActivityError, ActivityType, SourceFormat};

/// Garmin TrackPointExtension namespaces carrying `hr` and `cad`.
const TPX_NAMESPACES: [&str; 2] = [
    "http://www.garmin.com/xmlschemas/TrackPointExtension/v1",
    "http://www.garmin.com/xmlschemas/TrackPointExtension/v2",
];

/// Exporter-specific GPX dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpxFlavor {
    Strava,
    Garmin,
    Runkeeper,
    Generic,
}

impl GpxFlavor {
    pub fn adapter_name(&self) -> &'static str {
        match self {
            GpxFlavor::Strava => "gpx:strava",
            GpxFlavor::Garmin => "gpx:garmin",
            GpxFlavor::Runkeeper => "gpx:runkeeper",
            GpxFlavor::Generic => "gpx:generic",
        }
    }

    /// Map the first track's `<type>`/`<name>` onto a canonical type.
    pub fn activity_type(
        &self,
        track_type: Option<&str>,
        track_name: Option<&str>,
    ) -> Option<ActivityType> {
        if let Some(t) = track_type.and_then(activity_types::canonical) {
            return Some(t);
        }
        match self {
            GpxFlavor::Strava => track_type.and_then(activity_types::from_strava),
            GpxFlavor::Garmin | GpxFlavor::Generic => {
                track_type.and_then(activity_types::from_device)
            }
            GpxFlavor::Runkeeper => track_name.and_then(activity_types::from_runkeeper_name),
        }
    }
}

// ============================================================================
// Creator registry
// ============================================================================

/// Ordered `(creator prefix, flavor)` list.
///
/// When several prefixes match, the one registered last wins. A creator that
/// matches nothing falls back to the catch-all, if any.
#[derive(Debug, Clone)]
pub struct CreatorRegistry {
    patterns: Vec<(String, GpxFlavor)>,
    catch_all: Option<GpxFlavor>,
}

impl CreatorRegistry {
    /// A registry with no patterns and no catch-all.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            catch_all: None,
        }
    }

    pub fn with_pattern(mut self, prefix: impl Into<String>, flavor: GpxFlavor) -> Self {
        self.patterns.push((prefix.into(), flavor));
        self
    }

    pub fn with_catch_all(mut self, flavor: GpxFlavor) -> Self {
        self.catch_all = Some(flavor);
        self
    }

    pub fn resolve(&self, creator: &str) -> Option<GpxFlavor> {
        self.patterns
            .iter()
            .rev()
            .find(|(prefix, _)| creator.starts_with(prefix.as_str()))
            .map(|(_, flavor)| *flavor)
            .or(self.catch_all)
    }
}

impl Default for CreatorRegistry {
    fn default() -> Self {
        Self::empty()
            .with_pattern("StravaGPX", GpxFlavor::Strava)
            .with_pattern("Garmin Connect", GpxFlavor::Garmin)
            .with_pattern("Runkeeper", GpxFlavor::Runkeeper)
            .with_catch_all(GpxFlavor::Generic)
    }
}

// ============================================================================
// Adapter
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct GpxAdapter {
    creators: CreatorRegistry,
}

impl GpxAdapter {
    pub fn with_creators(creators: CreatorRegistry) -> Self {
        Self { creators }
    }
}

impl FormatAdapter for GpxAdapter {
    fn name(&self) -> &str {
        "gpx"
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Gpx
    }

    fn parse(&self, path: &Path, data: &[u8]) -> Result<ParsedActivity> {
        let text = decode_utf8(path, self.name(), data)?;
        let doc = Document::parse(text)
            .map_err(|e| ActivityError::parse(path, self.name(), e.to_string()))?;

        let root = doc.root_element();
        if root.tag_name().name() != "gpx" {
            return Err(ActivityError::parse(
                path,
                self.name(),
                format!("unexpected root element <{}>", root.tag_name().name()),
            ));
        }

        let creator = root.attribute("creator").unwrap_or_default();
        let flavor = self.creators.resolve(creator).ok_or_else(|| {
            ActivityError::parse(
                path,
                self.name(),
                format!("no GPX adapter registered for creator '{}'", creator),
            )
        })?;
        let adapter = flavor.adapter_name();

        let first_track = child(root, "trk").ok_or_else(|| {
            ActivityError::parse(path, adapter, "file contains no <trk> element")
        })?;

        let mut buffer = BackfillBuffer::new();
        for track in root.children().filter(|n| n.has_tag_name("trk")) {
            for segment in track.children().filter(|n| n.has_tag_name("trkseg")) {
                for trkpt in segment.children().filter(|n| n.has_tag_name("trkpt")) {
                    let point = parse_trackpoint(trkpt)
                        .map_err(|message| ActivityError::parse(path, adapter, message))?;
                    buffer.push(point);
                }
            }
        }
        let points = buffer.finish();

        let gpx_metadata = child(root, "metadata");
        let meta_text = |name: &str| gpx_metadata.and_then(|m| child_text(m, name));

        let track_type = child_text(first_track, "type");
        let track_name = child_text(first_track, "name");

        let metadata = PartialMetadata {
            activity_type: flavor.activity_type(track_type, track_name),
            date_time: meta_text("time")
                .and_then(parse_xml_time)
                .or_else(|| points.first().and_then(|p| p.time)),
            name: meta_text("name").or(track_name).map(str::to_string),
            description: meta_text("desc")
                .or_else(|| child_text(first_track, "desc"))
                .map(str::to_string),
            creator: Some(creator.to_string()).filter(|c| !c.is_empty()),
        };

        Ok(ParsedActivity {
            points,
            laps: None,
            metadata,
            source_format: SourceFormat::Gpx,
            adapter: adapter.to_string(),
            source_file: None,
            source_hash: String::new(),
        })
    }
}

fn parse_trackpoint(trkpt: Node<'_, '_>) -> std::result::Result<RawPoint, String> {
    let coord = |name: &str| -> std::result::Result<Option<f64>, String> {
        trkpt
            .attribute(name)
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .map_err(|_| format!("invalid {} '{}'", name, v))
            })
            .transpose()
    };

    let time = match child_text(trkpt, "time") {
        Some(t) => Some(parse_xml_time(t).ok_or_else(|| format!("invalid time '{}'", t))?),
        None => None,
    };

    let (heart_rate, cadence) = child(trkpt, "extensions")
        .map(|ext| (tpx_value(ext, "hr"), tpx_value(ext, "cad")))
        .unwrap_or((None, None));

    Ok(RawPoint {
        latitude: coord("lat")?,
        longitude: coord("lon")?,
        elevation: child_f64(trkpt, "ele"),
        time,
        heart_rate,
        cadence,
        lap: None,
        kmph: None,
    })
}

/// Find a TrackPointExtension element anywhere under `<extensions>`.
fn tpx_value(extensions: Node<'_, '_>, name: &str) -> Option<f64> {
    extensions
        .descendants()
        .find(|n| {
            n.is_element()
                && n.tag_name().name() == name
                && n
                    .tag_name()
                    .namespace()
                    .is_some_and(|ns| TPX_NAMESPACES.contains(&ns))
        })
        .and_then(|n| n.text())
        .and_then(|t| t.trim().parse().ok())
}
