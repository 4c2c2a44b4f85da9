//! Conversion option trees and their flattening to bridge property lists.

use serde::{Deserialize, Serialize};

/// A single option value; maps nest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Map(OptionMap),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        OptionValue::Int(value.into())
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Str(value)
    }
}

impl From<OptionMap> for OptionValue {
    fn from(value: OptionMap) -> Self {
        OptionValue::Map(value)
    }
}

/// Insertion-ordered map of option name to value.
///
/// Inserting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Map<String, serde_json::Value>")]
#[serde(into = "serde_json::Map<String, serde_json::Value>")]
pub struct OptionMap {
    entries: Vec<(String, OptionValue)>,
}

impl OptionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Flatten into the wire representation, nested maps becoming nested
    /// property lists
    pub fn to_properties(&self) -> Vec<PropertyValue> {
        self.entries
            .iter()
            .map(|(name, value)| PropertyValue {
                name: name.clone(),
                value: PropertyData::from(value),
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for OptionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OptionMap::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for OptionMap {
    fn from(json: serde_json::Map<String, serde_json::Value>) -> Self {
        json.into_iter()
            .filter_map(|(key, value)| json_to_option(value).map(|value| (key, value)))
            .collect()
    }
}

impl From<OptionMap> for serde_json::Map<String, serde_json::Value> {
    fn from(map: OptionMap) -> Self {
        map.entries
            .into_iter()
            .map(|(key, value)| (key, option_to_json(value)))
            .collect()
    }
}

fn json_to_option(value: serde_json::Value) -> Option<OptionValue> {
    match value {
        serde_json::Value::Bool(flag) => Some(OptionValue::Bool(flag)),
        serde_json::Value::Number(number) => number.as_i64().map(OptionValue::Int),
        serde_json::Value::String(text) => Some(OptionValue::Str(text)),
        serde_json::Value::Object(object) => Some(OptionValue::Map(object.into())),
        serde_json::Value::Null | serde_json::Value::Array(_) => None,
    }
}

fn option_to_json(value: OptionValue) -> serde_json::Value {
    match value {
        OptionValue::Bool(flag) => flag.into(),
        OptionValue::Int(number) => number.into(),
        OptionValue::Str(text) => text.into(),
        OptionValue::Map(map) => serde_json::Value::Object(map.into()),
    }
}

/// Value of a wire property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyData {
    Bool(bool),
    Int(i64),
    Str(String),
    Properties(Vec<PropertyValue>),
}

impl From<&OptionValue> for PropertyData {
    fn from(value: &OptionValue) -> Self {
        match value {
            OptionValue::Bool(flag) => PropertyData::Bool(*flag),
            OptionValue::Int(number) => PropertyData::Int(*number),
            OptionValue::Str(text) => PropertyData::Str(text.clone()),
            OptionValue::Map(map) => PropertyData::Properties(map.to_properties()),
        }
    }
}

/// A named property as passed to the engine's load, store and dispatch calls
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub name: String,
    pub value: PropertyData,
}

impl PropertyValue {
    pub fn new(name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        Self {
            name: name.into(),
            value: PropertyData::from(&value.into()),
        }
    }
}

/// The option set of one conversion task
pub type ConversionOptions = OptionMap;
