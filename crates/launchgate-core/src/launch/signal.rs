//! Attribution and navigation payloads, and the fusion rule that combines them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Status key whose sentinel value marks an organic install.
pub const STATUS_KEY: &str = "af_status";
pub const ORGANIC_SENTINEL: &str = "Organic";
/// Prefix applied to navigation keys when they are folded into attribution.
pub const DEEP_LINK_PREFIX: &str = "deep_";

/// Attribution data describing how this install was acquired.
///
/// Immutable once built; a newer payload replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributionSignal(Map<String, Value>);

/// Deep-link data describing a requested in-app destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NavigationSignal(Map<String, Value>);

impl AttributionSignal {
    pub fn new(data: Map<String, Value>) -> Self {
        Self(data)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_organic(&self) -> bool {
        self.0.get(STATUS_KEY).and_then(Value::as_str) == Some(ORGANIC_SENTINEL)
    }

    /// New signal with `extra` keys added where this one has none.
    pub fn merged_with(&self, extra: &Map<String, Value>) -> Self {
        let mut data = self.0.clone();
        for (key, value) in extra {
            if !data.contains_key(key) {
                data.insert(key.clone(), value.clone());
            }
        }
        Self(data)
    }
}

impl NavigationSignal {
    pub fn new(data: Map<String, Value>) -> Self {
        Self(data)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for AttributionSignal {
    fn from(data: Map<String, Value>) -> Self {
        Self(data)
    }
}

impl From<Map<String, Value>> for NavigationSignal {
    fn from(data: Map<String, Value>) -> Self {
        Self(data)
    }
}

/// Fold navigation data into attribution data.
///
/// Each navigation key absent from attribution is re-inserted as
/// `deep_<key>`. Attribution always wins: a navigation key is dropped when
/// attribution defines either the raw or the prefixed name.
pub fn fuse(attribution: &AttributionSignal, navigation: &NavigationSignal) -> AttributionSignal {
    let mut data = attribution.0.clone();
    for (key, value) in &navigation.0 {
        if attribution.0.contains_key(key) {
            continue;
        }
        let prefixed = format!("{DEEP_LINK_PREFIX}{key}");
        if !data.contains_key(&prefixed) {
            data.insert(prefixed, value.clone());
        }
    }
    AttributionSignal(data)
}
