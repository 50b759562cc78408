//! API request handlers

pub mod health;
pub mod process;
pub mod providers;
pub mod status;
pub mod sync;
