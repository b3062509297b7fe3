pub mod approval;
pub mod checklist;
pub mod config;
pub mod controller;
pub mod error;
pub mod git;
pub mod guard;
pub mod io;
pub mod lock;
pub mod paths;
pub mod progress;
pub mod prompts;
pub mod requirements;
pub mod session;

pub use error::{HarnessError, Result};
