//! RuleSync - Proxy Rule Synchronization Agent
//!
//! A single-host agent that keeps a Clash-family proxy's rule files and
//! bypass list up to date.
//!
//! ## Features
//!
//! - Mirror-aware rule downloads with retries
//! - Concurrent sync passes with a bounded outcome history
//! - Bypass-list merging into the proxy's settings file
//! - Process presence monitoring with start/stop callbacks
//! - Kill-and-relaunch recovery with post-restart verification
//! - Local JSON API for status, sync triggers, and provider management

pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod models;
pub mod rules;
pub mod services;
pub mod watchdog;

pub use config::{Config, ConfigStore};
pub use error::{Result, RuleSyncError};
