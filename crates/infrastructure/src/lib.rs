pub mod database;
pub mod node_client;
pub mod observability;

pub use database::*;
pub use node_client::{HttpNodeClient, HttpNodeClientConfig};
pub use observability::*;
