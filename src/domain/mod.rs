//! Domain layer for the adaptation engine.
//!
//! Core models, error taxonomy, and the ports implemented by the
//! infrastructure layer.

pub mod error;
pub mod models;
pub mod ports;

pub use error::{
    ActionError, BrokerError, EventError, OpenStackError, PluginError, SlaError, StoreError,
};
