//! Synthetic activity files for integration tests.
//!
//! Tracks are generated as closed loops in local meters around a fixed origin
//! and written out as GPX, TCX or binary FIT.

#![allow(dead_code)]

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

pub const METERS_PER_DEG_LAT: f64 = 111_319.49;
pub const ORIGIN: (f64, f64) = (51.5, -0.12);

/// One recorded sample. `None` fields are left out of the file.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub ele: Option<f64>,
    pub time: DateTime<Utc>,
    pub hr: Option<u8>,
    pub cad: Option<u8>,
    /// m/s
    pub speed: Option<f64>,
}

pub fn start_time(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 4, day, 7, 0, 0).unwrap()
}

/// Closed loop of `n` samples, 5 s apart. `f` maps angle to (north, east) meters.
pub fn loop_track(n: usize, start: DateTime<Utc>, f: impl Fn(f64) -> (f64, f64)) -> Vec<Sample> {
    let (lat0, lon0) = ORIGIN;
    let m_per_deg_lon = METERS_PER_DEG_LAT * lat0.to_radians().cos();
    (0..n)
        .map(|i| {
            let t = 2.0 * PI * i as f64 / (n - 1) as f64;
            let (north, east) = f(t);
            Sample {
                lat: Some(lat0 + north / METERS_PER_DEG_LAT),
                lon: Some(lon0 + east / m_per_deg_lon),
                ele: Some(20.0 + 5.0 * t.sin()),
                time: start + chrono::Duration::seconds(5 * i as i64),
                hr: Some(140 + (i % 20) as u8),
                cad: Some(85),
                speed: None,
            }
        })
        .collect()
}

pub fn circle(radius: f64, n: usize, start: DateTime<Utc>) -> Vec<Sample> {
    loop_track(n, start, |t| (radius * t.sin(), radius * (1.0 - t.cos())))
}

pub fn figure_eight(amp: f64, n: usize, start: DateTime<Utc>) -> Vec<Sample> {
    loop_track(n, start, |t| (amp * t.sin(), amp * (2.0 * t).sin() / 2.0))
}

fn iso(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Great-circle distance on the same sphere the library uses.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = p2 - p1;
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    6_378_137.0 * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

pub fn track_length(samples: &[Sample]) -> f64 {
    samples
        .windows(2)
        .filter_map(|w| {
            Some(haversine(w[0].lat?, w[0].lon?, w[1].lat?, w[1].lon?))
        })
        .sum()
}

pub fn write_file(dir: &Path, name: &str, contents: impl AsRef<[u8]>) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write fixture");
    path
}

// ============================================================================
// GPX
// ============================================================================

pub fn gpx(creator: &str, name: Option<&str>, track_type: Option<&str>, samples: &[Sample]) -> String {
    let mut out = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx creator="{}" version="1.1" xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <trk>
"#,
        creator
    );
    if let Some(name) = name {
        out.push_str(&format!("    <name>{}</name>\n", name));
    }
    if let Some(t) = track_type {
        out.push_str(&format!("    <type>{}</type>\n", t));
    }
    out.push_str("    <trkseg>\n");
    for s in samples {
        match (s.lat, s.lon) {
            (Some(lat), Some(lon)) => {
                out.push_str(&format!("      <trkpt lat=\"{:.7}\" lon=\"{:.7}\">\n", lat, lon))
            }
            _ => out.push_str("      <trkpt>\n"),
        }
        if let Some(ele) = s.ele {
            out.push_str(&format!("        <ele>{:.1}</ele>\n", ele));
        }
        out.push_str(&format!("        <time>{}</time>\n", iso(s.time)));
        if s.hr.is_some() || s.cad.is_some() {
            out.push_str("        <extensions><gpxtpx:TrackPointExtension>");
            if let Some(hr) = s.hr {
                out.push_str(&format!("<gpxtpx:hr>{}</gpxtpx:hr>", hr));
            }
            if let Some(cad) = s.cad {
                out.push_str(&format!("<gpxtpx:cad>{}</gpxtpx:cad>", cad));
            }
            out.push_str("</gpxtpx:TrackPointExtension></extensions>\n");
        }
        out.push_str("      </trkpt>\n");
    }
    out.push_str("    </trkseg>\n  </trk>\n</gpx>\n");
    out
}

// ============================================================================
// TCX
// ============================================================================

/// One `<Lap>` per `lap_size` samples. Laps carry only a start time and calories.
pub fn tcx(sport: &str, samples: &[Sample], lap_size: usize) -> String {
    let mut out = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"
    xmlns:ns3="http://www.garmin.com/xmlschemas/ActivityExtension/v2">
  <Activities>
    <Activity Sport="{}">
      <Id>{}</Id>
"#,
        sport,
        iso(samples[0].time)
    );
    for lap in samples.chunks(lap_size) {
        out.push_str(&format!(
            "      <Lap StartTime=\"{}\">\n        <Calories>50</Calories>\n        <Track>\n",
            iso(lap[0].time)
        ));
        for s in lap {
            out.push_str("          <Trackpoint>\n");
            out.push_str(&format!("            <Time>{}</Time>\n", iso(s.time)));
            if let (Some(lat), Some(lon)) = (s.lat, s.lon) {
                out.push_str(&format!(
                    "            <Position><LatitudeDegrees>{:.7}</LatitudeDegrees><LongitudeDegrees>{:.7}</LongitudeDegrees></Position>\n",
                    lat, lon
                ));
            }
            if let Some(ele) = s.ele {
                out.push_str(&format!("            <AltitudeMeters>{:.1}</AltitudeMeters>\n", ele));
            }
            if let Some(hr) = s.hr {
                out.push_str(&format!(
                    "            <HeartRateBpm><Value>{}</Value></HeartRateBpm>\n",
                    hr
                ));
            }
            if let Some(cad) = s.cad {
                out.push_str(&format!("            <Cadence>{}</Cadence>\n", cad));
            }
            if let Some(speed) = s.speed {
                out.push_str(&format!(
                    "            <Extensions><ns3:TPX><ns3:Speed>{}</ns3:Speed></ns3:TPX></Extensions>\n",
                    speed
                ));
            }
            out.push_str("          </Trackpoint>\n");
        }
        out.push_str("        </Track>\n      </Lap>\n");
    }
    out.push_str("    </Activity>\n  </Activities>\n</TrainingCenterDatabase>\n");
    out
}

// ============================================================================
// FIT
// ============================================================================

const FIT_EPOCH: i64 = 631_065_600;
const FIT_SPORT_RUNNING: u8 = 1;

const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// CRC-16 used for FIT header and file checksums.
pub fn fit_crc(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[(byte & 0xF) as usize];
        let tmp = CRC_TABLE[(crc & 0xF) as usize];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize];
    }
    crc
}

fn fit_time(t: DateTime<Utc>) -> u32 {
    (t.timestamp() - FIT_EPOCH) as u32
}

fn semicircles(degrees: f64) -> i32 {
    (degrees * (2f64.powi(31) / 180.0)).round() as i32
}

/// Definition message: `(field number, size, base type)` per field.
fn define(out: &mut Vec<u8>, local: u8, global: u16, fields: &[(u8, u8, u8)]) {
    out.push(0x40 | local);
    out.push(0); // reserved
    out.push(0); // little endian
    out.extend_from_slice(&global.to_le_bytes());
    out.push(fields.len() as u8);
    for &(num, size, base) in fields {
        out.extend_from_slice(&[num, size, base]);
    }
}

/// Activity file: file_id, records with a lap message every `lap_size`
/// samples, then one running session.
pub fn fit(samples: &[Sample], lap_size: usize) -> Vec<u8> {
    let mut data = Vec::new();

    // file_id: type (enum), manufacturer (uint16)
    define(&mut data, 0, 0, &[(0, 1, 0x00), (1, 2, 0x84)]);
    data.push(0);
    data.push(4); // activity
    data.extend_from_slice(&1u16.to_le_bytes()); // garmin

    // record
    define(
        &mut data,
        1,
        20,
        &[
            (253, 4, 0x86),
            (0, 4, 0x85),
            (1, 4, 0x85),
            (2, 2, 0x84),
            (3, 1, 0x02),
            (4, 1, 0x02),
            (6, 2, 0x84),
        ],
    );
    // lap: timestamp, start_time, total_elapsed_time, total_distance
    define(
        &mut data,
        2,
        19,
        &[(253, 4, 0x86), (2, 4, 0x86), (7, 4, 0x86), (9, 4, 0x86)],
    );
    // session: timestamp, start_time, sport, total_elapsed_time, total_distance
    define(
        &mut data,
        3,
        18,
        &[
            (253, 4, 0x86),
            (2, 4, 0x86),
            (5, 1, 0x00),
            (7, 4, 0x86),
            (9, 4, 0x86),
        ],
    );

    for lap in samples.chunks(lap_size) {
        for s in lap {
            data.push(1);
            data.extend_from_slice(&fit_time(s.time).to_le_bytes());
            let lat = s.lat.map_or(i32::MAX, semicircles);
            let lon = s.lon.map_or(i32::MAX, semicircles);
            data.extend_from_slice(&lat.to_le_bytes());
            data.extend_from_slice(&lon.to_le_bytes());
            let alt = s.ele.map_or(u16::MAX, |e| ((e + 500.0) * 5.0).round() as u16);
            data.extend_from_slice(&alt.to_le_bytes());
            data.push(s.hr.unwrap_or(u8::MAX));
            data.push(s.cad.unwrap_or(u8::MAX));
            let speed = s.speed.map_or(u16::MAX, |v| (v * 1000.0).round() as u16);
            data.extend_from_slice(&speed.to_le_bytes());
        }
        lap_message(&mut data, 2, lap);
    }

    let first = &samples[0];
    let last = &samples[samples.len() - 1];
    data.push(3);
    data.extend_from_slice(&fit_time(last.time).to_le_bytes());
    data.extend_from_slice(&fit_time(first.time).to_le_bytes());
    data.push(FIT_SPORT_RUNNING);
    data.extend_from_slice(&elapsed_ms(first, last).to_le_bytes());
    data.extend_from_slice(&((track_length(samples) * 100.0).round() as u32).to_le_bytes());

    let mut file = Vec::with_capacity(data.len() + 16);
    file.push(14);
    file.push(0x10);
    file.extend_from_slice(&2132u16.to_le_bytes());
    file.extend_from_slice(&(data.len() as u32).to_le_bytes());
    file.extend_from_slice(b".FIT");
    let header_crc = fit_crc(&file);
    file.extend_from_slice(&header_crc.to_le_bytes());
    file.extend_from_slice(&data);
    let file_crc = fit_crc(&file);
    file.extend_from_slice(&file_crc.to_le_bytes());
    file
}

fn elapsed_ms(first: &Sample, last: &Sample) -> u32 {
    ((last.time - first.time).num_milliseconds()) as u32
}

fn lap_message(data: &mut Vec<u8>, local: u8, lap: &[Sample]) {
    let first = &lap[0];
    let last = &lap[lap.len() - 1];
    data.push(local);
    data.extend_from_slice(&fit_time(last.time).to_le_bytes());
    data.extend_from_slice(&fit_time(first.time).to_le_bytes());
    data.extend_from_slice(&elapsed_ms(first, last).to_le_bytes());
    data.extend_from_slice(&((track_length(lap) * 100.0).round() as u32).to_le_bytes());
}
