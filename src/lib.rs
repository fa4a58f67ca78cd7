//! Image classification service.
//!
//! An API process accepts image uploads, stores them content-addressed on a
//! shared filesystem and hands classification jobs to long-running worker
//! processes over a Redis queue. Workers publish outcomes to a TTL-bounded
//! result store keyed by job id, which the API polls to answer the caller.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
pub mod worker;
