//! Message envelope: the wire contract for requests and responses.
//!
//! # Modules
//!
//! - [`types`]: `RequestEnvelope`, `ResponseEnvelope`, `Envelope`, `AgentRef`, `ErrorBody`
//! - [`codec`]: `build_request`, `build_response`, `serialize`, `parse`
//! - [`schema`]: optional per-intent payload schemas

pub mod codec;
pub mod schema;
pub mod types;

pub use codec::{
    build_request, build_response, error_response, parse, parse_request, parse_response,
    serialize, success_response,
};
pub use schema::{FieldSchema, FieldType, IntentSchema, SchemaRegistry};
pub use types::*;
