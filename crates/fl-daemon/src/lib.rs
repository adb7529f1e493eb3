//! HTTP frontend for faultline.
//!
//! `routes::build_router` is the single entry point; `main.rs` attaches
//! middleware layers and drives the process lifecycle. Handlers are
//! `pub(crate)` so the scenario tests in `tests/` can compose the router
//! directly.

pub mod api_types;
pub mod auth;
pub mod error;
pub mod routes;
pub mod search;
pub mod state;
