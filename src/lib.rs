//! Adaptation Engine - message-driven adaptation of deployed cloud stacks
//!
//! A control loop that listens on a message broker for events about
//! deployed stacks, fans each event out to an ordered pipeline of
//! decision plugins, consolidates their ranked candidate actions with a
//! single-transferable-vote tally, and enacts the winning action against
//! the infrastructure APIs while journalling every lifecycle transition.

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::models::config::Config;
pub use domain::models::{Action, ActionKind, Event};
