//! Vendor-specific chunk sources.
//!
//! Each vendor module implements [`crate::source::ChatBackend`] and keeps its
//! wire format private.
pub mod openai_compat;
