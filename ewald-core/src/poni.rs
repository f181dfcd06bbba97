//! Point-of-normal-incidence geometry descriptor.
//!
//! The flat key/value form uses pyFAI key names (`Distance`, `Poni1`,
//! `Rot1`, ..., `Detector`, `Detector_config`) so `.poni` files and stored
//! geometry groups share one vocabulary.

use crate::detector::{Detector, DetectorConfig, DetectorRegistry};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::path::Path;

pub const KEY_DISTANCE: &str = "Distance";
pub const KEY_PONI1: &str = "Poni1";
pub const KEY_PONI2: &str = "Poni2";
pub const KEY_ROT1: &str = "Rot1";
pub const KEY_ROT2: &str = "Rot2";
pub const KEY_ROT3: &str = "Rot3";
pub const KEY_WAVELENGTH: &str = "Wavelength";
pub const KEY_DETECTOR: &str = "Detector";
pub const KEY_DETECTOR_CONFIG: &str = "Detector_config";
const KEY_PIXEL1: &str = "PixelSize1";
const KEY_PIXEL2: &str = "PixelSize2";

/// Detector geometry: distance and offsets in metres, rotations in radians.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Poni {
    pub dist: f64,
    pub poni1: f64,
    pub poni2: f64,
    pub rot1: f64,
    pub rot2: f64,
    pub rot3: f64,
    /// Beam wavelength in metres.
    pub wavelength: f64,
    pub detector: Detector,
}

impl Default for Poni {
    fn default() -> Self {
        Self {
            dist: 0.0,
            poni1: 0.0,
            poni2: 0.0,
            rot1: 0.0,
            rot2: 0.0,
            rot3: 0.0,
            wavelength: 1e-10,
            detector: Detector::default(),
        }
    }
}

impl Poni {
    #[must_use]
    pub fn with_dist(mut self, dist: f64) -> Self {
        self.dist = dist;
        self
    }

    /// Sets both point-of-normal-incidence offsets.
    #[must_use]
    pub fn with_poni(mut self, poni1: f64, poni2: f64) -> Self {
        self.poni1 = poni1;
        self.poni2 = poni2;
        self
    }

    #[must_use]
    pub fn with_rotations(mut self, rot1: f64, rot2: f64, rot3: f64) -> Self {
        self.rot1 = rot1;
        self.rot2 = rot2;
        self.rot3 = rot3;
        self
    }

    #[must_use]
    pub fn with_wavelength(mut self, wavelength: f64) -> Self {
        self.wavelength = wavelength;
        self
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    /// Builds a geometry from a flat key/value mapping using the built-in
    /// detector registry. Unknown keys are ignored.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for non-numeric geometry values,
    /// [`Error::InvalidWavelength`] for an unparsable wavelength and
    /// [`Error::UnknownDetector`] for unregistered detector names.
    pub fn from_config(config: &Map<String, Value>) -> Result<Self> {
        Self::from_config_with(config, DetectorRegistry::builtin())
    }

    /// Like [`Poni::from_config`], resolving detectors through `registry`.
    ///
    /// # Errors
    /// See [`Poni::from_config`].
    pub fn from_config_with(
        config: &Map<String, Value>,
        registry: &DetectorRegistry,
    ) -> Result<Self> {
        let mut poni = Self::default();
        for (key, value) in config {
            match key.as_str() {
                KEY_DISTANCE => poni.dist = number(key, value)?,
                KEY_PONI1 => poni.poni1 = number(key, value)?,
                KEY_PONI2 => poni.poni2 = number(key, value)?,
                KEY_ROT1 => poni.rot1 = number(key, value)?,
                KEY_ROT2 => poni.rot2 = number(key, value)?,
                KEY_ROT3 => poni.rot3 = number(key, value)?,
                KEY_WAVELENGTH => {
                    poni.wavelength = number(key, value)
                        .map_err(|_| Error::InvalidWavelength(value.to_string()))?;
                }
                _ => {}
            }
        }

        if let Some(name) = config.get(KEY_DETECTOR) {
            let name = name
                .as_str()
                .ok_or_else(|| Error::Config(format!("{KEY_DETECTOR} must be a string")))?;
            let detector_config = match config.get(KEY_DETECTOR_CONFIG) {
                Some(value) => DetectorConfig::from_value(value)?,
                None => DetectorConfig::default(),
            };
            poni.detector = registry.create(name, &detector_config)?;
        } else if config.contains_key(KEY_PIXEL1) || config.contains_key(KEY_PIXEL2) {
            let detector_config = DetectorConfig {
                pixel1: config.get(KEY_PIXEL1).map(|v| number(KEY_PIXEL1, v)).transpose()?,
                pixel2: config.get(KEY_PIXEL2).map(|v| number(KEY_PIXEL2, v)).transpose()?,
                max_shape: None,
            };
            poni.detector = registry.create(crate::detector::GENERIC_DETECTOR, &detector_config)?;
        }
        Ok(poni)
    }

    /// Flat key/value form, the inverse of [`Poni::from_config`].
    #[must_use]
    pub fn to_config(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(KEY_DISTANCE.into(), self.dist.into());
        map.insert(KEY_PONI1.into(), self.poni1.into());
        map.insert(KEY_PONI2.into(), self.poni2.into());
        map.insert(KEY_ROT1.into(), self.rot1.into());
        map.insert(KEY_ROT2.into(), self.rot2.into());
        map.insert(KEY_ROT3.into(), self.rot3.into());
        map.insert(KEY_WAVELENGTH.into(), self.wavelength.into());
        map.insert(KEY_DETECTOR.into(), self.detector.name.clone().into());
        map.insert(KEY_DETECTOR_CONFIG.into(), self.detector.config().to_value());
        map
    }

    /// Parses pyFAI `.poni` text: `Key: value` lines with `#` comments.
    ///
    /// # Errors
    /// Returns the same errors as [`Poni::from_config`].
    pub fn from_poni_str(text: &str) -> Result<Self> {
        let mut config = Map::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, raw)) = line.split_once(':') else {
                continue;
            };
            let raw = raw.trim();
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            config.insert(key.trim().to_string(), value);
        }
        Self::from_config(&config)
    }

    /// Reads a `.poni` file.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the file cannot be read, otherwise the
    /// errors of [`Poni::from_poni_str`].
    pub fn from_poni_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_poni_str(&text)
    }

    /// Renders the geometry as `.poni` text.
    #[must_use]
    pub fn to_poni_string(&self) -> String {
        let mut out = String::from("# Detector geometry\nponi_version: 2\n");
        for (key, value) in self.to_config() {
            let _ = writeln!(out, "{key}: {value}");
        }
        out
    }
}

/// Accepts JSON numbers and strings that parse strictly as `f64`.
fn number(key: &str, value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Config(format!("{key}: {n} is not representable as f64"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}: {s:?} is not a number"))),
        other => Err(Error::Config(format!("{key}: expected a number, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_default() {
        let poni = Poni::default();
        assert_eq!(poni.wavelength, 1e-10);
        assert_eq!(poni.detector.pixel1, 100e-6);
        assert_eq!(poni.dist, 0.0);
    }

    #[test]
    fn test_config_round_trip() {
        let poni = Poni::default()
            .with_dist(0.2)
            .with_poni(0.01, 0.02)
            .with_rotations(0.1, -0.2, 0.3)
            .with_wavelength(0.7e-10)
            .with_detector(DetectorRegistry::builtin().create("Pilatus1M", &DetectorConfig::default()).unwrap());
        let back = Poni::from_config(&poni.to_config()).unwrap();
        assert_eq!(back, poni);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let poni = Poni::from_config(&map(json!({"Distance": 0.5, "Comment": "x"}))).unwrap();
        assert_eq!(poni.dist, 0.5);
    }

    #[test]
    fn test_wavelength_string_parsed_strictly() {
        let poni = Poni::from_config(&map(json!({"Wavelength": "1e-10"}))).unwrap();
        assert_eq!(poni.wavelength, 1e-10);
        let err = Poni::from_config(&map(json!({"Wavelength": "1e-10 * 2"}))).unwrap_err();
        assert!(matches!(err, Error::InvalidWavelength(_)));
    }

    #[test]
    fn test_legacy_pixel_sizes() {
        let poni =
            Poni::from_config(&map(json!({"PixelSize1": 75e-6, "PixelSize2": 80e-6}))).unwrap();
        assert_eq!(poni.detector.pixel1, 75e-6);
        assert_eq!(poni.detector.pixel2, 80e-6);
    }

    #[test]
    fn test_poni_text() {
        let text = r#"# Nota: C-Order, 1 refers to the Y axis, 2 to the X axis
poni_version: 2
Detector: Detector
Detector_config: {"pixel1": 0.0001, "pixel2": 0.0001, "max_shape": [100, 200]}
Distance: 0.15
Poni1: 0.005
Poni2: 0.01
Rot1: 0
Rot2: 0
Rot3: 0
Wavelength: 1.0332e-10
"#;
        let poni = Poni::from_poni_str(text).unwrap();
        assert_eq!(poni.dist, 0.15);
        assert_eq!(poni.detector.max_shape, Some([100, 200]));
        assert_eq!(poni.wavelength, 1.0332e-10);
        assert_eq!(Poni::from_poni_str(&poni.to_poni_string()).unwrap(), poni);
    }

    #[test]
    fn test_non_numeric_distance() {
        let err = Poni::from_config(&map(json!({"Distance": [1.0]}))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
