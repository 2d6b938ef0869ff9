//! HTTP request handlers.
//!
//! - [`images`]: image upload and gallery listing
//! - [`health`]: liveness probe
//! - [`index`]: landing page
//!
//! Handlers return [`crate::errors::Error`], which converts to a status code and an
//! `{"ok": false, "error": ...}` body.

pub mod health;
pub mod images;
pub mod index;
