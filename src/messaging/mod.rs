//! Messaging primitives: the wire-independent message envelope and the
//! pluggable codecs that move it across transports.

pub mod codec;
pub mod envelope;

pub use codec::{BinaryCodec, EnvelopeCodec, JsonCodec};
pub use envelope::MessageEnvelope;
