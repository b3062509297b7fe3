pub mod approve;
pub mod config;
pub mod guard;
pub mod hook;
pub mod run;
pub mod status;
