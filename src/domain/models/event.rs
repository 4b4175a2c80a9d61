//! Inbound event model.
//!
//! An event associates an event name with a deployed stack and is the
//! input of the whole pipeline. Events are immutable once parsed.

use serde::Serialize;
use serde_json::Value;

use crate::domain::error::EventError;

/// Hard ceiling on inbound message size.
pub const MAX_MESSAGE_BYTES: usize = 8 * 1024 * 1024;

/// A parsed broker event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub user_id: String,
    pub tenant_id: String,
    pub stack_id: String,
    pub source: String,
    pub instance_id: String,
    pub context: Value,
    /// Ordered machine descriptors. Expected non-empty, but tolerated
    /// empty by the passthrough path.
    pub machines: Vec<Value>,
    pub data_center: Option<String>,
    pub severity: Option<Value>,
    pub name: String,
    pub value: Value,
    pub data: Value,
}

fn required_str(id: &Value, field: &'static str) -> Result<String, EventError> {
    id.get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(EventError::MissingField(field))
}

impl Event {
    /// Parse a raw broker payload, enforcing the size ceiling and the
    /// mandatory field set.
    pub fn parse(raw: &[u8]) -> Result<Self, EventError> {
        if raw.len() > MAX_MESSAGE_BYTES {
            return Err(EventError::TooLarge(raw.len()));
        }

        let message: Value =
            serde_json::from_slice(raw).map_err(|e| EventError::Malformed(e.to_string()))?;

        let id = message
            .get("id")
            .filter(|v| v.is_object())
            .ok_or(EventError::MissingField("id"))?;

        let machines = id
            .get("machines")
            .and_then(Value::as_array)
            .cloned()
            .ok_or(EventError::MissingField("machines"))?;

        let event = message.get("event").ok_or(EventError::MissingField("event"))?;
        let name = event
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(EventError::MissingField("event.name"))?;
        let value = event
            .get("value")
            .cloned()
            .ok_or(EventError::MissingField("event.value"))?;
        let data = message
            .get("data")
            .cloned()
            .ok_or(EventError::MissingField("data"))?;

        Ok(Self {
            user_id: required_str(id, "user_id")?,
            tenant_id: required_str(id, "tenant")?,
            stack_id: required_str(id, "stack_id")?,
            source: required_str(id, "source")?,
            instance_id: required_str(id, "instance")?,
            context: id
                .get("context")
                .cloned()
                .ok_or(EventError::MissingField("context"))?,
            machines,
            data_center: id
                .get("data_center")
                .and_then(Value::as_str)
                .map(str::to_owned),
            severity: id.get("severity").filter(|v| !v.is_null()).cloned(),
            name,
            value,
            data,
        })
    }

    /// The id of the first machine in the event, if any.
    pub fn first_machine_id(&self) -> Option<String> {
        self.machines
            .first()
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
impl Event {
    /// A well-formed event for unit tests.
    pub fn sample() -> Self {
        Self::parse(
            serde_json::json!({
                "id": {
                    "user_id": "user-1",
                    "tenant": "tenant-1",
                    "stack_id": "stack-1",
                    "source": "monitor",
                    "instance": "inst-1",
                    "context": "test",
                    "machines": [{"id": "vm-1"}, {"id": "vm-2"}],
                },
                "timestamp": 1_458_208_754.0,
                "event": {"name": "cpu_high", "value": 97.5},
                "data": [],
            })
            .to_string()
            .as_bytes(),
        )
        .expect("sample event must parse")
    }
}
