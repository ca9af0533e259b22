//! A FHIR R4 server persisting resources as JSON documents.
//!
//! The core is a search compiler that turns validated request
//! parameters into typed query fragments, assembled into a
//! backend-neutral `StoreQuery` and lowered by each storage backend.
//! Writes flow through a single path that orchestrates versioning,
//! meta stamping and audit tags, shared by the REST endpoints, bundle
//! processing and bulk import.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod request_context;
pub mod services;
pub mod state;

pub use error::{Error, Result};
