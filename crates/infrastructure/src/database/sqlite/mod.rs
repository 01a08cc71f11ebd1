pub mod sqlite_group_repository;
pub mod sqlite_node_repository;
pub mod sqlite_task_repository;

pub use sqlite_group_repository::SqliteNodeGroupRepository;
pub use sqlite_node_repository::SqliteNodeRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
