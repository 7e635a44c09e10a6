//! Telecare client core.
//!
//! - [`session`]: token recovery, login, logout, onboarding redirects
//! - [`live`]: room-scoped real-time channels with serialized dispatch
//! - [`views`]: screen state fed by REST fetches and live events
//! - [`api`]: bearer-authenticated REST client and its endpoints

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod live;
pub mod models;
pub mod session;
pub mod token_store;
pub mod views;

#[cfg(test)]
pub(crate) mod test_helpers;
