pub mod clock;
pub mod config;
pub mod errors;
pub mod rpc;
pub mod traits;
pub mod transfer;

pub use clock::{Clock, SystemClock};
pub use config::*;
pub use errors::*;
pub use traits::NodeClient;
