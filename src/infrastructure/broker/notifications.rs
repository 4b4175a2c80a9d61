//! Outbound notification payloads.
//!
//! Two wire formats: the synthetic orchestration notification (a JSON
//! document binary-serialized and zlib-compressed, the shape the
//! external dashboard consumes) and the plain-JSON application feedback
//! event.

use std::io::Write;

use chrono::Utc;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use uuid::Uuid;

const ISO8601_SECONDS: &str = "%Y-%m-%dT%H:%M:%SZ";

fn timestamp() -> String {
    Utc::now().format(ISO8601_SECONDS).to_string()
}

/// The synthetic orchestration notification for an adaptation phase
/// (`start` or `complete`), compressed for the `openstack_event`
/// exchange.
pub fn openstack_event(phase: &str, stack_id: &str, event_name: &str) -> Vec<u8> {
    let payload = json!({
        "priority": "INFO",
        "_unique_id": Uuid::new_v4().simple().to_string(),
        "event_type": format!("cw.{stack_id}.adaptation-{phase}"),
        "_context_some": "context",
        "publisher_id": "adaptation-engine",
        "payload": {
            "cw_payload": json!({
                "metrics": ["ACTIVE_CONN", "VIDEO", "vlan.bandwidth"],
            })
            .to_string(),
            "cw_event_name": event_name,
            "cw_event_type": format!("adaptation-{phase}"),
            "timestamp": timestamp(),
            "stack_id": stack_id,
        },
        "message_id": Uuid::new_v4().to_string(),
    });

    let serialized =
        bincode::serialize(&payload.to_string()).expect("strings always bincode-serialize");

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&serialized)
        .and_then(|()| encoder.finish())
        .expect("writing to an in-memory encoder cannot fail")
}

/// Decode an orchestration notification back into its JSON document.
/// Used by the healthcheck loopback and tests.
pub fn decode_openstack_event(raw: &[u8]) -> Option<Value> {
    use std::io::Read;

    let mut decoder = flate2::read::ZlibDecoder::new(raw);
    let mut serialized = Vec::new();
    decoder.read_to_end(&mut serialized).ok()?;
    let document: String = bincode::deserialize(&serialized).ok()?;
    serde_json::from_str(&document).ok()
}

/// The application feedback notification for an adaptation phase
/// (`start`, `complete`, or `failed`).
pub fn app_feedback_event(
    phase: &str,
    stack_id: &str,
    event_name: &str,
    details: &Value,
) -> Vec<u8> {
    json!({
        "adaptation_event": {
            "event_type": format!("{stack_id}.adaptation-{phase}"),
            "event_name": event_name,
            "timestamp": timestamp(),
            "stack_id": stack_id,
            "id": Uuid::new_v4().to_string(),
            "event_details": details,
        }
    })
    .to_string()
    .into_bytes()
}
