//! Events emitted by processed calls and the partial-match patterns used to
//! assert on them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured fact emitted by the chain while processing a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub module_id: String,
    pub event_id: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Event {
    pub fn new(module_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            event_id: event_id.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Looks up a top-level field the way patterns address it.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "module_id" => Some(Value::String(self.module_id.clone())),
            "event_id" => Some(Value::String(self.event_id.clone())),
            "attributes" => Some(Value::Object(self.attributes.clone())),
            _ => None,
        }
    }

    pub fn is(&self, module_id: &str, event_id: &str) -> bool {
        self.module_id == module_id && self.event_id == event_id
    }
}

/// A subset of `field: value` pairs an emitted event must contain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedEvent(Map<String, Value>);

impl ExpectedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(module_id: &str, event_id: &str) -> Self {
        Self::new()
            .field("module_id", module_id)
            .field("event_id", event_id)
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// True when every field of the pattern is present on `event` with an
    /// equal value. An empty pattern matches anything.
    pub fn matches(&self, event: &Event) -> bool {
        self.0
            .iter()
            .all(|(name, expected)| event.field(name).as_ref() == Some(expected))
    }
}

impl From<Map<String, Value>> for ExpectedEvent {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for ExpectedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// Returns the first pattern that no event in `events` satisfies. Patterns are
/// checked independently and may be satisfied by the same event.
pub fn first_unmatched<'a>(
    events: &[Event],
    expected: &'a [ExpectedEvent],
) -> Option<&'a ExpectedEvent> {
    expected
        .iter()
        .find(|pattern| !events.iter().any(|event| pattern.matches(event)))
}
