pub mod api;
pub mod backend;
pub mod cleanup;
pub mod config;
pub mod core;
pub mod error;
pub mod git;
pub mod git_refs;
pub mod log;
pub mod orchestration;
pub mod state;
pub mod util;
pub mod workflow;
pub mod workspace;

pub use error::{Error, ErrorCode, Result};
