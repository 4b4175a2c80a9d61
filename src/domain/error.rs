//! Error taxonomy for the adaptation engine.
//!
//! One enum per concern. Classes that the pipeline swallows by design
//! (journal writes, broker publishes, SLA calls) are still typed here so
//! call sites log something structured before walking on.

use thiserror::Error;

/// Errors constructing or interpreting adaptation actions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The supplied ordinal or name does not match any action kind.
    #[error("invalid adaptation kind [{0}]")]
    InvalidKind(String),
}

/// Errors parsing an inbound event message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Payload exceeds the 8 MiB ceiling.
    #[error("message too large: {0} bytes")]
    TooLarge(usize),

    /// Payload is not parseable JSON.
    #[error("message is not valid JSON: {0}")]
    Malformed(String),

    /// A mandatory field is absent or has the wrong shape.
    #[error("unsupported message: missing or invalid field [{0}]")]
    MissingField(&'static str),
}

/// Errors raised by plugin execution.
///
/// An individual plugin failure never aborts a round; the distributor
/// logs it and leaves that plugin's results slot empty.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The plugin process could not be started.
    #[error("failed to spawn plugin process: {0}")]
    Spawn(#[from] std::io::Error),

    /// The plugin exited non-zero or produced no usable output.
    #[error("plugin run failed: {0}")]
    Failed(String),

    /// The plugin's stdout was not a JSON action list.
    #[error("plugin output not understood: {0}")]
    Protocol(String),
}

/// Errors talking to the message broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection, channel, or publish failure at the AMQP layer.
    #[error("AMQP transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// The healthcheck loopback message never arrived.
    #[error("healthcheck timed out waiting for loopback message")]
    HealthcheckTimeout,

    /// The consume stream ended unexpectedly.
    #[error("broker delivery stream closed")]
    StreamClosed,
}

/// Errors from the identity / compute / orchestration / metrics APIs.
#[derive(Error, Debug)]
pub enum OpenStackError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("API returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// The service catalog has no endpoint for the requested service.
    #[error("no endpoint for service [{0}]")]
    MissingEndpoint(String),

    #[error("unexpected API response shape: {0}")]
    Malformed(String),
}

/// Errors from the SLA enforcement API. Always non-fatal to the pipeline.
#[derive(Error, Debug)]
pub enum SlaError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("SLA API returned status {0}")]
    UnexpectedStatus(u16),
}

/// Errors from the journal / config document store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}
