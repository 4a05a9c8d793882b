// endpoint.rs

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stdin, Stdout};

/// Error type for endpoint operations
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait defining the input side of the pipeline
///
/// This trait abstracts the byte source, allowing both the real standard
/// input and mock implementations for testing.
#[async_trait]
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes into `buf`
    ///
    /// # Arguments
    ///
    /// * `buf` - Scratch region to fill
    ///
    /// # Returns
    ///
    /// * `Result<usize, EndpointError>` - Number of bytes read; `Ok(0)`
    ///   means the stream has ended
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, EndpointError>;
}

/// Trait defining the output side of the pipeline
///
/// The sink's contract is to fully drain the slice or fail; callers do not
/// retry partial writes.
#[async_trait]
pub trait ByteSink: Send {
    /// Write the whole of `bytes` to the output
    ///
    /// # Arguments
    ///
    /// * `bytes` - The bytes to write
    ///
    /// # Returns
    ///
    /// * `Result<(), EndpointError>` - Ok(()) once every byte is accepted
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), EndpointError>;
}

/// Byte source backed by the process's standard input
pub struct StdinSource {
    stdin: Stdin,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteSource for StdinSource {
    async fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, EndpointError> {
        Ok(self.stdin.read(buf).await?)
    }
}

/// Byte sink backed by the process's standard output
pub struct StdoutSink {
    stdout: Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ByteSink for StdoutSink {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), EndpointError> {
        self.stdout.write_all(bytes).await?;
        // Stdout on tokio goes through an internal buffer; flush so each
        // drained chunk is visible downstream before the next read lands.
        self.stdout.flush().await?;
        Ok(())
    }
}
