//! # Storeboard Client
//!
//! Client-side state reconciliation and resilient persistence for the
//! in-store signage board:
//! - Tiered persistence store with degrading backends (`store`)
//! - Remote data service adapter: initial reads and change stream (`feed`)
//! - Reconciliation engine owning the in-memory collections (`engine`)
//! - Periodic device presence reporting (`heartbeat`)

pub mod engine;
pub mod feed;
pub mod heartbeat;
pub mod store;
