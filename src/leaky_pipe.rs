// leaky_pipe.rs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, error, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::endpoint::{ByteSink, ByteSource};

/// Default accumulation buffer capacity in bytes (2 MiB).
pub const DEFAULT_CAPACITY: usize = 1 << 21;

/// Default size in bytes of the scratch region handed to each input read (64 KiB).
pub const DEFAULT_READ_CHUNK: usize = 1 << 16;

/// Exit code for a clean run.
pub const EXIT_CLEAN: i32 = 0;

/// Exit code for a fatal output error.
pub const EXIT_WRITE_ERROR: i32 = 1;

/// Exit code for a fatal input error.
pub const EXIT_READ_ERROR: i32 = 2;

// Two slots so the writer can return storage while the seeded spare is
// still unclaimed; a single slot could wedge the return path.
const RECYCLE_SLOTS: usize = 2;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("buffer capacity must be greater than zero")]
    InvalidCapacity,
    #[error("read chunk size must be greater than zero")]
    InvalidReadChunk,
}

/// Configuration for the pipeline
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Accumulation buffer capacity in bytes.
    pub capacity: usize,
    /// Size of the bounded scratch region handed to each input read.
    pub read_chunk: usize,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

/// Observational counters for a pipeline run
#[derive(Debug, Default)]
pub struct PipeMetrics {
    /// Bytes pulled from the source, dropped ones included.
    pub bytes_in: AtomicU64,
    /// Bytes drained to the sink.
    pub bytes_out: AtomicU64,
    /// Bytes discarded because they would not fit the buffer.
    pub bytes_dropped: AtomicU64,
    /// Number of reads whose bytes were discarded.
    pub drop_events: AtomicU64,
}

/// One-shot broadcast that unwinds all three stages. Held by the writer,
/// which is the only stage allowed to set it.
struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    fn watch(&self) -> ShutdownWatch {
        ShutdownWatch {
            rx: self.tx.subscribe(),
        }
    }

    fn signal(&self) {
        self.tx.send_replace(true);
    }

    fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Read side of the shutdown broadcast. Cheap to poll at loop heads and
/// awaitable as one arm of a race.
#[derive(Clone)]
struct ShutdownWatch {
    rx: watch::Receiver<bool>,
}

impl ShutdownWatch {
    fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn signaled(&mut self) {
        // A dropped sender means the writer is gone; treat it as signaled.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Process outcome code, written at most once. First failure wins.
#[derive(Clone, Default)]
struct ExitStatus {
    code: Arc<OnceLock<i32>>,
}

impl ExitStatus {
    fn record(&self, code: i32) {
        let _ = self.code.set(code);
    }

    fn code(&self) -> i32 {
        *self.code.get().unwrap_or(&EXIT_CLEAN)
    }
}

/// Lossy fixed-capacity relay between a byte source and a byte sink.
///
/// Bytes flow through a single reusable accumulation buffer whose ownership
/// migrates between three concurrent stages. When a read would overflow the
/// buffer's remaining capacity, the newly read bytes are dropped and logged;
/// accumulated data is never evicted. Memory stays bounded and the read path
/// never waits behind a slow write path.
pub struct LeakyPipe<S: ByteSource, W: ByteSink> {
    source: S,
    sink: W,
    config: PipeConfig,
    metrics: Arc<PipeMetrics>,
}

impl<S, W> LeakyPipe<S, W>
where
    S: ByteSource + 'static,
    W: ByteSink + 'static,
{
    /// Create a new pipeline over the given endpoints
    ///
    /// # Arguments
    ///
    /// * `source` - Input collaborator, read until end of stream or error
    /// * `sink` - Output collaborator, receives full-buffer writes
    /// * `config` - Buffer capacity and scratch read size
    pub fn new(source: S, sink: W, config: PipeConfig) -> Result<Self, PipeError> {
        if config.capacity == 0 {
            return Err(PipeError::InvalidCapacity);
        }
        if config.read_chunk == 0 {
            return Err(PipeError::InvalidReadChunk);
        }
        Ok(Self {
            source,
            sink,
            config,
            metrics: Arc::new(PipeMetrics::default()),
        })
    }

    /// Counters updated live for the lifetime of the run
    pub fn metrics(&self) -> Arc<PipeMetrics> {
        self.metrics.clone()
    }

    /// Drive the pipeline until end of input or a fatal endpoint error
    ///
    /// # Returns
    ///
    /// * The process exit code: [`EXIT_CLEAN`], [`EXIT_READ_ERROR`] or
    ///   [`EXIT_WRITE_ERROR`]
    pub async fn run(self) -> i32 {
        let (submit_tx, submit_rx) = mpsc::channel(1);
        let (unsubmit_tx, unsubmit_rx) = mpsc::channel(1);
        let (write_tx, write_rx) = mpsc::channel(1);
        let (recycle_tx, recycle_rx) = mpsc::channel(RECYCLE_SLOTS);

        // The pool starts with one spare so an exchange can fire before the
        // writer has recycled anything.
        let _ = recycle_tx.try_send(Vec::with_capacity(self.config.capacity));

        let shutdown = ShutdownSignal::new();
        let mut done = shutdown.watch();
        let status = ExitStatus::default();

        tokio::spawn(read_stage(
            self.source,
            self.config.clone(),
            submit_tx,
            unsubmit_rx,
            write_tx.clone(),
            shutdown.watch(),
            status.clone(),
            self.metrics.clone(),
        ));
        tokio::spawn(relay_stage(
            submit_rx,
            unsubmit_tx,
            write_tx,
            recycle_rx,
            shutdown.watch(),
        ));
        tokio::spawn(write_stage(
            self.sink,
            write_rx,
            recycle_tx,
            shutdown,
            status.clone(),
            self.metrics.clone(),
        ));

        done.signaled().await;
        status.code()
    }
}

/// Read stage: pulls bytes from the source into a bounded scratch region and
/// accumulates them losslessly up to capacity.
///
/// The accumulation buffer is only ever mutated while this stage holds it.
/// Whenever it is nonempty it is offered to the relay before the next read
/// and reclaimed afterwards, so the read itself is the only time the buffer
/// is away. An empty buffer is never offered; there is nothing to drain.
async fn read_stage<S: ByteSource>(
    mut source: S,
    config: PipeConfig,
    submit_tx: mpsc::Sender<Vec<u8>>,
    mut unsubmit_rx: mpsc::Receiver<Vec<u8>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    shutdown: ShutdownWatch,
    status: ExitStatus,
    metrics: Arc<PipeMetrics>,
) {
    let mut scratch = vec![0u8; config.read_chunk];
    let mut buf: Vec<u8> = Vec::with_capacity(config.capacity);

    loop {
        if shutdown.is_signaled() {
            return;
        }

        let outcome = if buf.is_empty() {
            source.read_into(&mut scratch).await
        } else {
            if submit_tx.send(buf).await.is_err() {
                // Relay is gone; shutdown is already under way.
                return;
            }
            let outcome = source.read_into(&mut scratch).await;
            buf = match unsubmit_rx.recv().await {
                Some(returned) => returned,
                None => return,
            };
            outcome
        };

        match outcome {
            Ok(0) => {
                debug!("input ended, flushing {} buffered bytes", buf.len());
                let _ = write_tx.send(buf).await;
                return;
            }
            Ok(bytes) => {
                metrics.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
                if config.capacity - buf.len() >= bytes {
                    buf.extend_from_slice(&scratch[..bytes]);
                } else {
                    // The whole chunk is lost; accumulated data stays intact.
                    metrics.bytes_dropped.fetch_add(bytes as u64, Ordering::Relaxed);
                    metrics.drop_events.fetch_add(1, Ordering::Relaxed);
                    warn!("dropped {} bytes", bytes);
                }
            }
            Err(e) => {
                error!("reading: {}", e);
                status.record(EXIT_READ_ERROR);
                // Best-effort flush of what made it in before the error.
                let _ = write_tx.send(buf).await;
                return;
            }
        }
    }
}

/// Relay stage: arbitrates each offered buffer between two completions,
/// whichever is ready first.
///
/// Returning the buffer unchanged is always possible, so the reader never
/// waits behind a slow writer. The exchange arm routes the buffer to the
/// writer and hands the reader recycled storage in the same step; it is only
/// armed while a spare is in hand.
async fn relay_stage(
    mut submit_rx: mpsc::Receiver<Vec<u8>>,
    unsubmit_tx: mpsc::Sender<Vec<u8>>,
    write_tx: mpsc::Sender<Vec<u8>>,
    mut recycle_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown: ShutdownWatch,
) {
    let mut spare: Option<Vec<u8>> = None;

    loop {
        let buf = tokio::select! {
            _ = shutdown.signaled() => return,
            offered = submit_rx.recv() => match offered {
                Some(buf) => buf,
                // Offer channel closed: the reader has terminated.
                None => return,
            },
        };

        if spare.is_none() {
            spare = recycle_rx.try_recv().ok();
        }

        tokio::select! {
            _ = shutdown.signaled() => {
                // Ownership goes back to the reader before quitting.
                let _ = unsubmit_tx.send(buf).await;
                return;
            }
            permit = unsubmit_tx.reserve() => match permit {
                Ok(permit) => permit.send(buf),
                Err(_) => return,
            },
            permit = write_tx.reserve(), if spare.is_some() => match permit {
                Ok(permit) => {
                    permit.send(buf);
                    if let Some(fresh) = spare.take() {
                        if unsubmit_tx.send(fresh).await.is_err() {
                            return;
                        }
                    }
                }
                Err(_) => {
                    let _ = unsubmit_tx.send(buf).await;
                    return;
                }
            },
        }
    }
}

/// Write stage: drains each received buffer to the sink in one call, then
/// returns the truncated storage to the recycle pool.
///
/// Sole broadcaster of the shutdown signal: fires it on a fatal write error
/// or when the delivery channel closes with nothing pending.
async fn write_stage<W: ByteSink>(
    mut sink: W,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    recycle_tx: mpsc::Sender<Vec<u8>>,
    shutdown: ShutdownSignal,
    status: ExitStatus,
    metrics: Arc<PipeMetrics>,
) {
    loop {
        if shutdown.is_signaled() {
            return;
        }

        let mut buf = match write_rx.recv().await {
            Some(buf) => buf,
            None => {
                debug!("output drained, shutting down");
                shutdown.signal();
                return;
            }
        };

        let result = sink.write_all(&buf).await;
        let drained = buf.len();
        buf.clear();
        let _ = recycle_tx.try_send(buf);

        match result {
            Ok(()) => {
                metrics.bytes_out.fetch_add(drained as u64, Ordering::Relaxed);
            }
            Err(e) => {
                error!("writing: {}", e);
                status.record(EXIT_WRITE_ERROR);
                shutdown.signal();
                return;
            }
        }
    }
}
