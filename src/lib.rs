//! A context-scoped knowledge base.
//!
//! Concepts (types with inherited property constraints) and instances live in
//! contexts. Every object gets a persistent identifier
//! `<site>:<context>:<marker>:<name>`; bare names are resolved from a
//! context breadth-first along its search path.
//!
//! The [`engine::Session`] is the entry point for all operations. It can be
//! driven directly, served over HTTP by [`api`], reached remotely with
//! [`client::KbClient`], or exposed to agents through [`mcp`].

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod mcp;
pub mod models;
