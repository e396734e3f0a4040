#![warn(missing_docs)]
//! Umbra client protocol layer.
//!
//! Schema-driven binary protocol for an embedded/networked database:
//! compiles a declarative schema into per-type byte layouts, encodes
//! structured mutations as a cursor-deduplicated opcode stream, compiles
//! structured queries into self-contained byte-code, and decodes the
//! engine's result buffers back into structured values. The storage
//! engine itself is an external collaborator behind
//! [`engine::EngineBoundary`].

pub mod client;
pub mod config;
pub mod decode;
pub mod drain;
pub mod encode;
pub mod engine;
pub mod error;
pub mod primitives;
pub mod query;
pub mod schema;
pub mod testkit;
pub mod types;

pub use client::Umbra;
pub use config::ClientConfig;
pub use decode::{DecodedValue, Item};
pub use drain::{OpHandle, Settlement};
pub use error::{Result, UmbraError};
pub use query::QueryBuilder;
pub use schema::{PropDecl, PropKind, Schema, SchemaDecl, TypeDecl};
pub use types::{payload, NodeId, Payload, RefEntry, Value};
