//! Message channel between the UI surface and the host process.
//!
//! - **protocol**: envelope, correlation ids, typed command/notification schemas
//! - **codec**: length-delimited JSON framing for AsyncRead/AsyncWrite
//! - **transport**: envelope endpoints (in-memory duplex, framed byte streams)

pub mod codec;
pub mod protocol;
pub mod transport;
