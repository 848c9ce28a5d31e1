//! Model catalog and task routing.

pub mod catalog;
pub mod router;

pub use catalog::{CatalogError, ModelCatalog, ModelCategory, ModelDescriptor, SpeedClass};
pub use router::{
    default_routes, detect_task_type, ModelRouter, Priority, RoutingConstraints, TaskRoutingEntry,
    TaskType, DEFAULT_MODEL_ID,
};
