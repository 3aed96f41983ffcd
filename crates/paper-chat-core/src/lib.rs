//! # paper-chat core
//!
//! Runtime-free logic shared by the paper-chat engine: data models,
//! recursive character chunking, the in-memory cosine index, and prompt
//! assembly for query reformulation and grounded answering.
//!
//! This crate has no tokio, HTTP, or PDF dependencies. Everything here is
//! synchronous and deterministic.

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod prompt;
