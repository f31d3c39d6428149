//! Postroom storage - Postgres persistence layer
//!
//! Row models and repositories for the email queue, usage counters,
//! provider message tracking, delivery/engagement events, webhook logs,
//! bounces and the runtime settings store.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
