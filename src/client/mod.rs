//! Outbound side: the resilient A2A client and its transport seam.

pub mod a2a;
pub mod options;
pub mod transport;

pub use a2a::A2AClient;
pub use options::{SendOptions, Target};
pub use transport::{EnvelopeTransport, HttpEnvelopeTransport, TransportError};
