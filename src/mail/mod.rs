pub mod graph;
pub mod provider;
pub mod types;

pub use graph::GraphClient;
