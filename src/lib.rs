//! # The polyhls compiler
//!
//! This crate plumbs together the polyhls compiler crates and provides a
//! command-line interface for the compiler. Depend on
//! [`polyhls_frontend`], [`polyhls_ir`], [`polyhls_opt`] and
//! [`polyhls_backend`] directly to embed the compiler.
pub mod cmdline;
pub mod driver;
