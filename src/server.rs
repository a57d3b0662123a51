//! TCP server for the tally protocol.
//!
//! The calling thread runs the acceptor loop: it blocks in `accept` and
//! hands every connection to the worker pool as a [`Job`], doing no
//! protocol work itself. Workers read one message, log it, reply and close.

use crate::config::Config;
use crate::log_writer::LogWriter;
use crate::pool::{PoolError, WorkerPool};
use crate::processor;
use crate::queue::JobQueue;
use crate::shutdown::ShutdownHandle;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// One accepted connection awaiting a worker.
///
/// The stream is closed when the job is dropped.
#[derive(Debug)]
pub struct Job {
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

/// Per-connection settings shared by all workers.
#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    max_message_len: usize,
    io_timeout: Option<Duration>,
}

/// Server startup errors
#[derive(Debug)]
pub enum ServerError {
    Pool(PoolError),
    Listen(SocketAddr, io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Pool(e) => write!(f, "{}", e),
            ServerError::Listen(addr, e) => write!(f, "Failed to listen on {}: {}", addr, e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<PoolError> for ServerError {
    fn from(e: PoolError) -> Self {
        ServerError::Pool(e)
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    pool: WorkerPool<Job>,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Start the worker pool and bind the listening socket.
    ///
    /// The pool is built first so an invalid worker count fails before any
    /// socket is opened.
    pub fn bind(config: &Config) -> Result<Self, ServerError> {
        let log = Arc::new(LogWriter::new(&config.log_file));
        let settings = ConnectionSettings {
            max_message_len: config.max_message_len(),
            io_timeout: config.io_timeout,
        };

        let queue = Arc::new(JobQueue::<Job>::with_capacity(config.queue_capacity));
        let pool = WorkerPool::new(config.workers, queue, move |worker_id, job: Job| {
            handle_connection(worker_id, job, &log, settings)
        })?;

        let listener = create_listener(config.listen, config.backlog)
            .map_err(|e| ServerError::Listen(config.listen, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Listen(config.listen, e))?;

        info!(
            address = %local_addr,
            workers = config.workers,
            backlog = config.backlog,
            queue_capacity = ?config.queue_capacity,
            log_file = %config.log_file.display(),
            "Server listening"
        );

        Ok(Server {
            listener,
            local_addr,
            pool,
            shutdown: ShutdownHandle::new(local_addr),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that stops [`Server::run`] from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown is triggered, then drain the queue
    /// and join the workers.
    pub fn run(mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if self.shutdown.is_triggered() {
                        debug!(peer = %peer, "Dropping connection accepted during shutdown");
                        break;
                    }
                    debug!(peer = %peer, "New connection");

                    if let Err(rejected) = self.pool.submit(Job { stream, peer }) {
                        let job = rejected.into_inner();
                        warn!(peer = %job.peer, "Job queue closed, dropping connection");
                        break;
                    }
                }
                Err(e) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    warn!(error = %e, "Failed to accept connection");
                    // Back off so a persistent failure (e.g. EMFILE) does not spin.
                    thread::sleep(ACCEPT_RETRY_DELAY);
                }
            }
        }

        info!(workers = self.pool.size(), "Acceptor stopped");
        drop(self.listener);
        self.pool.shutdown();
        Ok(())
    }
}

/// Create a blocking listener with SO_REUSEADDR and the given backlog.
fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Read a single message of at most `max_len` bytes.
///
/// One read only: anything the client sends beyond it is ignored.
fn read_message<R: Read>(reader: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; max_len];
    let n = reader.read(&mut buffer)?;
    buffer.truncate(n);
    Ok(buffer)
}

/// Serve one connection: read, process, log, reply, close.
fn handle_connection(worker_id: usize, job: Job, log: &LogWriter, settings: ConnectionSettings) {
    let Job { mut stream, peer } = job;

    if let Some(timeout) = settings.io_timeout {
        if let Err(e) = stream
            .set_read_timeout(Some(timeout))
            .and_then(|_| stream.set_write_timeout(Some(timeout)))
        {
            debug!(peer = %peer, error = %e, "Failed to set socket timeout");
        }
    }

    let input = match read_message(&mut stream, settings.max_message_len) {
        Ok(input) => input,
        Err(e) => {
            debug!(peer = %peer, error = %e, "Connection read error");
            return;
        }
    };

    let Some(outcome) = processor::process(&input) else {
        debug!(peer = %peer, "Connection closed without data");
        return;
    };

    let record = &outcome.record;
    info!(
        worker = worker_id,
        peer = %peer,
        message = %record.message,
        last_char = ?record.last_char.map(char::from),
        count = record.count,
        parity = %record.parity,
        "Message processed"
    );

    if let Err(e) = log.append(record) {
        error!(path = %log.path().display(), error = %e, "Failed to write request log");
    }

    if let Err(e) = stream.write_all(outcome.reply.as_bytes()) {
        debug!(peer = %peer, error = %e, "Failed to send reply");
    }
}
