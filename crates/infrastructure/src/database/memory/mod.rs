pub mod memory_node_repository;
pub mod memory_task_repository;

pub use memory_node_repository::InMemoryNodeRepository;
pub use memory_task_repository::InMemoryTaskRepository;
