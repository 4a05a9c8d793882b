//! Leaky byte-relay pipeline library
//!
//! Copies a byte stream from a source to a sink through a single
//! fixed-capacity buffer. Reads never wait behind slow writes; when incoming
//! data would overflow the buffer, the new chunk is dropped and logged
//! instead of growing memory or blocking the producer.

pub mod endpoint;
pub mod leaky_pipe;

// Re-export main types for convenience
pub use endpoint::{ByteSink, ByteSource, EndpointError, StdinSource, StdoutSink};
pub use leaky_pipe::{
    LeakyPipe, PipeConfig, PipeError, PipeMetrics, DEFAULT_CAPACITY, DEFAULT_READ_CHUNK,
    EXIT_CLEAN, EXIT_READ_ERROR, EXIT_WRITE_ERROR,
};
