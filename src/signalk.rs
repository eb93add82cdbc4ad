//! SignalK delta documents exchanged over the websocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CONTEXT_SELF: &str = "vessels.self";

pub const PATH_HEADING_MAGNETIC: &str = "navigation.headingMagnetic";
pub const PATH_HEADING_TRUE: &str = "navigation.headingTrue";
pub const PATH_PITCH: &str = "navigation.attitude.pitch";
pub const PATH_ROLL: &str = "navigation.attitude.roll";
pub const PATH_PITCH_MIN: &str = "navigation.attitude.pitch.min";
pub const PATH_PITCH_MAX: &str = "navigation.attitude.pitch.max";
pub const PATH_ROLL_MIN: &str = "navigation.attitude.roll.min";
pub const PATH_ROLL_MAX: &str = "navigation.attitude.roll.max";
pub const PATH_MAGNETIC_VARIATION: &str = "navigation.magneticVariation";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathValue<'a> {
    pub path: &'a str,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update<'a> {
    #[serde(rename = "$source")]
    pub source: &'a str,
    pub values: Vec<PathValue<'a>>,
}

/// Outgoing delta: `{"context":..,"updates":[{"$source":..,"values":[..]}]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delta<'a> {
    pub context: &'a str,
    pub updates: Vec<Update<'a>>,
}

impl<'a> Delta<'a> {
    /// A delta with a single update from `source`.
    pub fn from_source(source: &'a str, values: Vec<PathValue<'a>>) -> Self {
        Self {
            context: CONTEXT_SELF,
            updates: vec![Update { source, values }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscription<'a> {
    pub path: &'a str,
    pub format: &'a str,
    pub policy: &'a str,
    pub period: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subscribe<'a> {
    pub context: &'a str,
    pub subscribe: Vec<Subscription<'a>>,
}

impl<'a> Subscribe<'a> {
    /// Ask for `path` as deltas at the given period.
    pub fn delta(path: &'a str, period_ms: u32) -> Self {
        Self {
            context: CONTEXT_SELF,
            subscribe: vec![Subscription {
                path,
                format: "delta",
                policy: "ideal",
                period: period_ms,
            }],
        }
    }
}

// Incoming documents are parsed leniently: anything missing or of the wrong
// type becomes a default and is skipped by the reader.

#[derive(Debug, Default, Deserialize)]
pub struct InboundDelta {
    #[serde(default)]
    pub updates: Vec<InboundUpdate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundUpdate {
    #[serde(default)]
    pub values: Vec<InboundValue>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundValue {
    #[serde(default)]
    pub path: Value,
    #[serde(default)]
    pub value: Value,
}

impl InboundDelta {
    /// Parse a text frame. Anything that is not a delta yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    /// Values published on `path` that are numbers.
    pub fn numbers_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.updates
            .iter()
            .flat_map(|u| u.values.iter())
            .filter(move |v| v.path.as_str() == Some(path))
            .filter_map(|v| v.value.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_envelope() {
        let delta = Delta::from_source(
            "esp32.cmps14-a1b2c3",
            vec![PathValue {
                path: PATH_HEADING_MAGNETIC,
                value: 1.5,
            }],
        );
        let json: Value = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["context"], "vessels.self");
        assert_eq!(json["updates"][0]["$source"], "esp32.cmps14-a1b2c3");
        assert_eq!(json["updates"][0]["values"][0]["path"], "navigation.headingMagnetic");
        assert_eq!(json["updates"][0]["values"][0]["value"], 1.5);
    }

    #[test]
    fn test_subscribe_envelope() {
        let text = serde_json::to_string(&Subscribe::delta(PATH_MAGNETIC_VARIATION, 1000)).unwrap();
        assert_eq!(
            text,
            r#"{"context":"vessels.self","subscribe":[{"path":"navigation.magneticVariation","format":"delta","policy":"ideal","period":1000}]}"#
        );
    }

    #[test]
    fn test_inbound_picks_numeric_values() {
        let text = r#"{"context":"vessels.self","updates":[
            {"source":{"label":"gps"},"values":[
                {"path":"navigation.magneticVariation","value":0.1},
                {"path":"navigation.speedOverGround","value":3.2}
            ]},
            {"values":[
                {"path":"navigation.magneticVariation","value":"n/a"},
                {"value":0.5},
                {"path":"navigation.magneticVariation","value":-0.05}
            ]}
        ]}"#;
        let delta = InboundDelta::parse(text).unwrap();
        let values: Vec<f64> = delta.numbers_for(PATH_MAGNETIC_VARIATION).collect();
        assert_eq!(values, vec![0.1, -0.05]);
    }

    #[test]
    fn test_inbound_tolerates_other_messages() {
        // server hello carries no updates
        let hello = InboundDelta::parse(r#"{"name":"signalk-server","version":"2.0.0","self":"vessels.urn"}"#).unwrap();
        assert_eq!(hello.numbers_for(PATH_MAGNETIC_VARIATION).count(), 0);
        assert!(InboundDelta::parse("not json").is_none());
        assert!(InboundDelta::parse(r#"{"updates":"oops"}"#).is_none());
    }
}
