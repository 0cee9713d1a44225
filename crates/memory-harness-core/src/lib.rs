//! # Memory Harness Core
//!
//! Shared, I/O-free logic for Memory Harness: data models, markdown
//! chunking, content hashing, the embedding-provider and embedding-cache
//! traits, store abstraction, and the hybrid retrieval algorithm.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Storage and embedding backends are supplied
//! by the application through the [`store::Store`] and
//! [`embedding::EmbeddingProvider`] traits.

pub mod cache;
pub mod chunk;
pub mod embedding;
pub mod hash;
pub mod models;
pub mod search;
pub mod store;
