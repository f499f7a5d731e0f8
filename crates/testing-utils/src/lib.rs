//! # Recon Testing Utils
//!
//! Shared testing utilities for the recon scheduling workspace.
//!
//! - **Test Data Builders**: `TaskBuilder` / `NodeBuilder` with sensible defaults
//! - **Mock Node Client**: records dispatched and aborted tasks, can simulate delivery failure
//! - **Integration Test Helpers**: logging setup and condition polling
//!
//! ```toml
//! [dev-dependencies]
//! recon-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
