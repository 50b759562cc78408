//! Status API
//!
//! Local JSON endpoints for inspecting the agent and triggering syncs or a
//! proxy restart.

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::ApiServer;
