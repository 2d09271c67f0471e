//! Per-entity route tables. Each module contributes a `Router` fragment that
//! `create_router` merges under the single gate layer; no fragment carries
//! its own auth wiring.

pub mod answers;
pub mod comments;
pub mod questions;
pub mod users;
