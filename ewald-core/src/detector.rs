//! Area detector descriptors and the name → factory registry.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Name of the generic flat detector.
pub const GENERIC_DETECTOR: &str = "Detector";

/// Pixel pitch and size of an area detector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detector {
    /// Registry name of the detector type.
    pub name: String,
    /// Pixel size along the slow (row) axis, metres.
    pub pixel1: f64,
    /// Pixel size along the fast (column) axis, metres.
    pub pixel2: f64,
    /// Full frame shape `(rows, cols)`, if the type fixes one.
    pub max_shape: Option<[usize; 2]>,
}

impl Default for Detector {
    fn default() -> Self {
        Self::generic(100e-6, 100e-6)
    }
}

impl Detector {
    /// A generic flat detector with the given pixel pitch.
    #[must_use]
    pub fn generic(pixel1: f64, pixel2: f64) -> Self {
        Self {
            name: GENERIC_DETECTOR.to_string(),
            pixel1,
            pixel2,
            max_shape: None,
        }
    }

    /// Sets the full frame shape.
    #[must_use]
    pub fn with_max_shape(mut self, rows: usize, cols: usize) -> Self {
        self.max_shape = Some([rows, cols]);
        self
    }

    /// Configuration that rebuilds this detector through the registry.
    #[must_use]
    pub fn config(&self) -> DetectorConfig {
        DetectorConfig {
            pixel1: Some(self.pixel1),
            pixel2: Some(self.pixel2),
            max_shape: self.max_shape,
        }
    }
}

/// Optional overrides passed to a detector factory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub pixel1: Option<f64>,
    pub pixel2: Option<f64>,
    pub max_shape: Option<[usize; 2]>,
}

impl DetectorConfig {
    /// Parses a configuration given either as a JSON object or as a string
    /// holding one (the `.poni` file form).
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the value is not a valid configuration.
    pub fn from_value(value: &Value) -> Result<Self> {
        let parsed = match value {
            Value::String(text) => serde_json::from_str(text),
            Value::Null => return Ok(Self::default()),
            other => serde_json::from_value(other.clone()),
        };
        parsed.map_err(|e| Error::Config(format!("invalid Detector_config: {e}")))
    }

    /// JSON object form used by `Poni::to_config`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "pixel1": self.pixel1,
            "pixel2": self.pixel2,
            "max_shape": self.max_shape,
        })
    }
}

/// Builds a detector from optional overrides.
pub type DetectorFactory = fn(&DetectorConfig) -> Result<Detector>;

/// Explicit name → factory table for detector types.
///
/// Lookups ignore case, spaces, `_` and `-`, so `"Pilatus 1M"` and
/// `"pilatus1m"` resolve to the same entry.
#[derive(Clone, Debug, Default)]
pub struct DetectorRegistry {
    factories: BTreeMap<String, DetectorFactory>,
}

impl DetectorRegistry {
    /// A registry with no entries.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry holding the generic detector and common area detectors.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(GENERIC_DETECTOR, generic_factory);
        registry.register("Pilatus100k", |_| Ok(fixed("Pilatus100k", 172e-6, [195, 487])));
        registry.register("Pilatus300k", |_| Ok(fixed("Pilatus300k", 172e-6, [619, 487])));
        registry.register("Pilatus1M", |_| Ok(fixed("Pilatus1M", 172e-6, [1043, 981])));
        registry.register("Eiger1M", |_| Ok(fixed("Eiger1M", 75e-6, [1065, 1030])));
        registry.register("Perkin", |_| Ok(fixed("Perkin", 200e-6, [2048, 2048])));
        registry.register("RayonixMx225", |_| {
            Ok(fixed("RayonixMx225", 73.242e-6, [3072, 3072]))
        });
        registry
    }

    /// Shared registry with the built-in detectors.
    pub fn builtin() -> &'static Self {
        static BUILTIN: OnceLock<DetectorRegistry> = OnceLock::new();
        BUILTIN.get_or_init(Self::with_builtins)
    }

    /// Adds or replaces a factory.
    pub fn register(&mut self, name: &str, factory: DetectorFactory) {
        self.factories.insert(normalize(name), factory);
    }

    /// Returns true if `name` resolves to a factory.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize(name))
    }

    /// Builds the named detector.
    ///
    /// # Errors
    /// Returns [`Error::UnknownDetector`] for unregistered names and
    /// whatever the factory reports for invalid overrides.
    pub fn create(&self, name: &str, config: &DetectorConfig) -> Result<Detector> {
        let factory = self
            .factories
            .get(&normalize(name))
            .ok_or_else(|| Error::UnknownDetector(name.to_string()))?;
        factory(config)
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn generic_factory(config: &DetectorConfig) -> Result<Detector> {
    let (Some(pixel1), Some(pixel2)) = (config.pixel1, config.pixel2) else {
        return Err(Error::Config(
            "generic detector needs pixel1 and pixel2".to_string(),
        ));
    };
    if !(pixel1 > 0.0 && pixel2 > 0.0) {
        return Err(Error::Config(format!(
            "pixel sizes must be positive, got ({pixel1}, {pixel2})"
        )));
    }
    Ok(Detector {
        name: GENERIC_DETECTOR.to_string(),
        pixel1,
        pixel2,
        max_shape: config.max_shape,
    })
}

/// Fixed-geometry detectors ignore pixel and shape overrides.
fn fixed(name: &str, pixel: f64, max_shape: [usize; 2]) -> Detector {
    Detector {
        name: name.to_string(),
        pixel1: pixel,
        pixel2: pixel,
        max_shape: Some(max_shape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_detector_from_config() {
        let config = DetectorConfig {
            pixel1: Some(50e-6),
            pixel2: Some(60e-6),
            max_shape: Some([10, 20]),
        };
        let detector = DetectorRegistry::builtin()
            .create("Detector", &config)
            .unwrap();
        assert_eq!(detector.name, GENERIC_DETECTOR);
        assert_eq!(detector.max_shape, Some([10, 20]));
        assert_eq!(detector.config(), config);
    }

    #[test]
    fn test_generic_detector_needs_pixels() {
        let err = DetectorRegistry::builtin()
            .create("Detector", &DetectorConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_name_normalization() {
        let registry = DetectorRegistry::builtin();
        let detector = registry
            .create("pilatus_1m", &DetectorConfig::default())
            .unwrap();
        assert_eq!(detector.name, "Pilatus1M");
        assert_eq!(detector.max_shape, Some([1043, 981]));
        assert!(registry.contains("Rayonix MX-225"));
    }

    #[test]
    fn test_unknown_detector() {
        let err = DetectorRegistry::builtin()
            .create("Mythen", &DetectorConfig::default())
            .unwrap_err();
        assert_eq!(err, Error::UnknownDetector("Mythen".to_string()));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = DetectorRegistry::empty();
        registry.register("Tiny", |_| Ok(Detector::generic(1e-3, 1e-3).with_max_shape(4, 4)));
        let detector = registry.create("TINY", &DetectorConfig::default()).unwrap();
        assert_eq!(detector.max_shape, Some([4, 4]));
        assert!(!registry.contains("Detector"));
    }

    #[test]
    fn test_config_from_string_value() {
        let value = Value::String(
            r#"{"pixel1": 0.000172, "pixel2": 0.000172, "max_shape": [195, 487]}"#.to_string(),
        );
        let config = DetectorConfig::from_value(&value).unwrap();
        assert_eq!(config.max_shape, Some([195, 487]));
        assert!(DetectorConfig::from_value(&Value::String("nope".into())).is_err());
        assert_eq!(
            DetectorConfig::from_value(&config.to_value()).unwrap(),
            config
        );
    }
}
