pub mod coordinator;
pub mod repository;
pub mod scan_worker;

pub use coordinator::*;
pub use repository::*;
pub use scan_worker::*;
