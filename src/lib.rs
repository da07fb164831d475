//! Fraud Triage Engine
//!
//! Real-time fraud triage pipeline: a durable stream of transaction events
//! is evaluated by a two-phase rule engine, persisted as `Case` records in
//! a transactional store, fanned out to live dashboards over a push bus,
//! and escalated to an external AI investigator when ambiguous.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod push;
pub mod rules;
pub mod store;
pub mod stream;
