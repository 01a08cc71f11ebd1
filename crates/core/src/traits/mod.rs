pub mod node_client;

pub use node_client::NodeClient;
