pub mod entities;
pub mod layout;
pub mod repositories;
pub mod services;

pub use entities::*;
pub use layout::ArtifactLayout;
pub use logman_core::{SchedulerError, SchedulerResult};
pub use repositories::*;
pub use services::*;
