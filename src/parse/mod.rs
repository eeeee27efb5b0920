//! # Format Adapters
//!
//! Turn a raw GPX, TCX or FIT file into a canonical point stream, optional
//! lap stream and partial metadata.
//!
//! Dispatch is two-level: the file extension selects a [`FormatAdapter`] from
//! an [`AdapterRegistry`], and the GPX adapter further selects a flavor from
//! the file's `creator` attribute (see [`gpx::CreatorRegistry`]).

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::records::{ParsedActivity, RawPoint};
use crate::{ActivityError, GpsPoint, SourceFormat};

pub mod activity_types;
pub mod fit;
pub mod gpx;
pub mod tcx;

pub use fit::FitAdapter;
pub use gpx::{CreatorRegistry, GpxAdapter, GpxFlavor};
pub use tcx::TcxAdapter;

/// A parser for one file format.
pub trait FormatAdapter: Send + Sync {
    /// Name reported in parse errors, e.g. `tcx`.
    fn name(&self) -> &str;

    fn format(&self) -> SourceFormat;

    /// Decode `data` (the contents of `path`).
    ///
    /// Implementations leave `source_file` and `source_hash` empty; the
    /// registry fills them in.
    fn parse(&self, path: &Path, data: &[u8]) -> Result<ParsedActivity>;
}

// ============================================================================
// Registry
// ============================================================================

/// Extension-keyed set of adapters.
pub struct AdapterRegistry {
    adapters: HashMap<SourceFormat, Box<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    /// A registry with no adapters.
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register an adapter, replacing any previous one for the same format.
    pub fn register(&mut self, adapter: Box<dyn FormatAdapter>) {
        self.adapters.insert(adapter.format(), adapter);
    }

    /// Select the adapter for a path by its extension.
    pub fn dispatch(&self, path: &Path) -> Result<&dyn FormatAdapter> {
        SourceFormat::from_path(path)
            .and_then(|format| self.adapters.get(&format))
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| ActivityError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }

    /// Parse in-memory file contents. `path` is used for dispatch and reporting.
    pub fn parse_bytes(&self, path: &Path, data: &[u8]) -> Result<ParsedActivity> {
        let adapter = self.dispatch(path)?;
        let mut parsed = adapter.parse(path, data)?;

        if parsed.points.is_empty() {
            return Err(ActivityError::parse(
                path,
                &parsed.adapter,
                "file contains no points with coordinates",
            ));
        }
        check_points(&parsed.points)
            .map_err(|message| ActivityError::parse(path, &parsed.adapter, message))?;

        parsed.source_file = Some(path.to_path_buf());
        parsed.source_hash = source_hash(data);

        log::debug!(
            "[Parse] {} -> {} points, {} laps via {}",
            path.display(),
            parsed.points.len(),
            parsed.laps.as_ref().map_or(0, |l| l.len()),
            parsed.adapter
        );
        Ok(parsed)
    }

    /// Read and parse a file from disk.
    pub fn parse_file(&self, path: &Path) -> Result<ParsedActivity> {
        // Dispatch first so unsupported files are rejected without reading them
        self.dispatch(path)?;
        let data = fs::read(path).map_err(|source| ActivityError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_bytes(path, &data)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(GpxAdapter::default()));
        registry.register(Box::new(TcxAdapter));
        registry.register(Box::new(FitAdapter));
        registry
    }
}

static DEFAULT_REGISTRY: Lazy<AdapterRegistry> = Lazy::new(AdapterRegistry::default);

/// Parse a file with the default adapters.
pub fn parse_file(path: impl AsRef<Path>) -> Result<ParsedActivity> {
    DEFAULT_REGISTRY.parse_file(path.as_ref())
}

/// Parse in-memory contents with the default adapters.
pub fn parse_bytes(path: impl AsRef<Path>, data: &[u8]) -> Result<ParsedActivity> {
    DEFAULT_REGISTRY.parse_bytes(path.as_ref(), data)
}

/// Every emitted point needs a timestamp and an in-range position.
fn check_points(points: &[RawPoint]) -> std::result::Result<(), String> {
    for (i, p) in points.iter().enumerate() {
        if p.time.is_none() {
            return Err(format!("point {} has no timestamp", i));
        }
        if let (Some(lat), Some(lon)) = (p.latitude, p.longitude) {
            if !GpsPoint::new(lat, lon).is_valid() {
                return Err(format!("point {} has invalid coordinates ({}, {})", i, lat, lon));
            }
        }
    }
    Ok(())
}

/// Hex SHA-256 of raw file bytes.
pub fn source_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Shared XML helpers
// ============================================================================

/// ISO-8601 timestamp as found in GPX/TCX.
pub(crate) fn parse_xml_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Text of the first child element with the given local name.
pub(crate) fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

/// First child element with the given local name.
pub(crate) fn child<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

/// Numeric text of the first child element with the given local name.
pub(crate) fn child_f64(node: roxmltree::Node<'_, '_>, name: &str) -> Option<f64> {
    child_text(node, name).and_then(|t| t.parse().ok())
}

pub(crate) fn decode_utf8<'a>(path: &Path, adapter: &str, data: &'a [u8]) -> Result<&'a str> {
    std::str::from_utf8(data)
        .map_err(|e| ActivityError::parse(path, adapter, format!("not valid UTF-8: {}", e)))
}
