//! FIT adapter, built on `fitparser`.
//!
//! Reads `record`, `lap` and `session` messages. Records take the current lap
//! counter, which starts at 1 and advances after every `lap` message.

use std::path::Path;

use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use fitparser::{FitDataRecord, Value};

use super::{activity_types, FormatAdapter};
use crate::error::Result;
use crate::records::{BackfillBuffer, ParsedActivity, PartialMetadata, RawLap, RawPoint};
use crate::{ActivityError, SourceFormat};

/// Semicircles per degree: 2^32 / 360.
const SEMICIRCLES_PER_DEGREE: f64 = 4_294_967_296.0 / 360.0;

/// Convert a FIT semicircle coordinate to degrees.
#[inline]
pub fn semicircles_to_degrees(semicircles: f64) -> f64 {
    semicircles / SEMICIRCLES_PER_DEGREE
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FitAdapter;

impl FormatAdapter for FitAdapter {
    fn name(&self) -> &str {
        "fit"
    }

    fn format(&self) -> SourceFormat {
        SourceFormat::Fit
    }

    fn parse(&self, path: &Path, data: &[u8]) -> Result<ParsedActivity> {
        let records = fitparser::from_bytes(data)
            .map_err(|e| ActivityError::parse(path, self.name(), e.to_string()))?;

        let mut buffer = BackfillBuffer::new();
        let mut laps = Vec::new();
        let mut metadata = PartialMetadata::default();
        let mut current_lap: u32 = 1;

        for record in &records {
            match record.kind() {
                MesgNum::Record => {
                    if let Some(mut point) = parse_record(record) {
                        point.lap = Some(current_lap);
                        buffer.push(point);
                    }
                }
                MesgNum::Lap => {
                    laps.push(parse_lap(record, current_lap));
                    current_lap += 1;
                }
                MesgNum::Session => {
                    for field in record.fields() {
                        match field.name() {
                            "start_time" => metadata.date_time = fit_timestamp(field.value()),
                            "sport" => {
                                metadata.activity_type = match field.value() {
                                    Value::String(s) => activity_types::from_device(s),
                                    _ => None,
                                }
                            }
                            _ => {}
                        }
                    }
                }
                MesgNum::FileId => {
                    for field in record.fields() {
                        if field.name() == "manufacturer" {
                            if let Value::String(s) = field.value() {
                                metadata.creator = Some(s.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let points = buffer.finish();
        if metadata.date_time.is_none() {
            metadata.date_time = points.first().and_then(|p| p.time);
        }

        Ok(ParsedActivity {
            points,
            laps: if laps.is_empty() { None } else { Some(laps) },
            metadata,
            source_format: SourceFormat::Fit,
            adapter: self.name().to_string(),
            source_file: None,
            source_hash: String::new(),
        })
    }
}

/// A `record` message as a raw point. Records without a timestamp are skipped.
fn parse_record(record: &FitDataRecord) -> Option<RawPoint> {
    let mut point = RawPoint::default();
    let mut enhanced_altitude = None;
    let mut enhanced_speed = None;

    for field in record.fields() {
        let value = field.value();
        match field.name() {
            "timestamp" => point.time = fit_timestamp(value),
            "position_lat" => point.latitude = fit_value_to_f64(value).map(semicircles_to_degrees),
            "position_long" => {
                point.longitude = fit_value_to_f64(value).map(semicircles_to_degrees)
            }
            "altitude" => point.elevation = fit_value_to_f64(value),
            "enhanced_altitude" => enhanced_altitude = fit_value_to_f64(value),
            "heart_rate" => point.heart_rate = fit_value_to_f64(value),
            "cadence" => point.cadence = fit_value_to_f64(value),
            "speed" => point.kmph = fit_value_to_f64(value).map(|mps| mps * 3.6),
            "enhanced_speed" => enhanced_speed = fit_value_to_f64(value).map(|mps| mps * 3.6),
            _ => {}
        }
    }

    point.elevation = enhanced_altitude.or(point.elevation);
    point.kmph = enhanced_speed.or(point.kmph);
    point.time.is_some().then_some(point)
}

fn parse_lap(record: &FitDataRecord, lap_no: u32) -> RawLap {
    let mut lap = RawLap {
        lap_no,
        ..Default::default()
    };
    let mut avg_cadence = None;
    let mut avg_running_cadence = None;

    for field in record.fields() {
        let value = field.value();
        match field.name() {
            "start_time" => lap.start_time = fit_timestamp(value),
            "total_distance" => lap.distance = fit_value_to_f64(value),
            "total_elapsed_time" => lap.duration = fit_value_to_f64(value),
            "total_calories" => lap.calories = fit_value_to_f64(value),
            "avg_heart_rate" => lap.mean_hr = fit_value_to_f64(value),
            "avg_cadence" => avg_cadence = fit_value_to_f64(value),
            "avg_running_cadence" => avg_running_cadence = fit_value_to_f64(value),
            "avg_speed" | "enhanced_avg_speed" => {
                if let Some(mps) = fit_value_to_f64(value) {
                    lap.mean_kmph = Some(mps * 3.6);
                }
            }
            _ => {}
        }
    }

    lap.mean_cadence = avg_running_cadence.or(avg_cadence);
    lap
}

fn fit_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(ts.with_timezone(&Utc)),
        _ => None,
    }
}

fn fit_value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(*v as f64),
        Value::UInt8(v) => Some(*v as f64),
        Value::UInt8z(v) => Some(*v as f64),
        Value::Byte(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::UInt16(v) => Some(*v as f64),
        Value::UInt16z(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::UInt32(v) => Some(*v as f64),
        Value::UInt32z(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt64(v) => Some(*v as f64),
        Value::UInt64z(v) => Some(*v as f64),
        Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicircles_to_degrees() {
        assert_eq!(semicircles_to_degrees(0.0), 0.0);
        assert!((semicircles_to_degrees(2_147_483_648.0) - 180.0).abs() < 1e-12);
        let lat = semicircles_to_degrees(614_429_384.0);
        assert!((lat - 51.5).abs() < 1e-6, "got {}", lat);
    }

    #[test]
    fn test_fit_value_to_f64() {
        assert_eq!(fit_value_to_f64(&Value::UInt8(140)), Some(140.0));
        assert_eq!(fit_value_to_f64(&Value::SInt32(-5)), Some(-5.0));
        assert_eq!(fit_value_to_f64(&Value::Float64(2.5)), Some(2.5));
        assert_eq!(fit_value_to_f64(&Value::String("x".into())), None);
        assert_eq!(
            fit_value_to_f64(&Value::Array(vec![Value::String("x".into()), Value::UInt16(7)])),
            Some(7.0)
        );
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = FitAdapter
            .parse(Path::new("a.fit"), b"definitely not a fit file")
            .unwrap_err();
        assert!(matches!(err, ActivityError::Parse { ref adapter, .. } if adapter == "fit"));
    }
}
