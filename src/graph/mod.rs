//! The property-graph data model: nodes, relationships, property chains,
//! adjacency traversal, and secondary indices.

pub mod index;
pub mod model;
pub mod store;
pub mod traversal;

pub use model::{NodeRecord, PropValue, RshipRecord};
pub use store::GraphStore;
