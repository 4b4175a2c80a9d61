//! Application services: the adaptation pipeline.

pub mod consolidator;
pub mod distributor;
pub mod enactor;
pub mod plugin_manager;
pub mod registry;
pub mod router;
pub mod stv;

pub use distributor::{Distributor, DistributorOutcome};
pub use enactor::{Enactor, PollSettings};
pub use plugin_manager::PluginManager;
pub use registry::ResourceRegistry;
pub use router::EventRouter;
