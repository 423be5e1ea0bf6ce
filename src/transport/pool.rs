//! # Connection Pool
//!
//! ```text
//!                  ┌──────────────┐  bounded queue  ┌──────────┐
//! TcpListener ───> │ accept thread│ ──────────────> │ worker 0 │ ─┐
//!  (non-blocking)  └──────────────┘        │        ├──────────┤  │ one connection
//!                                          └──────> │ worker N │ ─┘ at a time each
//!                                                   └──────────┘
//! ```
//!
//! The accept thread polls the listener and hands each connection to the
//! queue; when the queue is full it holds the connection and retries.
//! Workers run the handshake and then serve calls until the client
//! disconnects, passing every method to the [`MethodHandler`].
//!
//! Shutdown clears the running flag and closes every live connection, which
//! unblocks workers waiting on their client. Dropping the [`ServerHandle`]
//! shuts down and joins all threads.
//!
//! ## Failed Calls
//!
//! | Handler result            | Action                                   |
//! |---------------------------|------------------------------------------|
//! | `Ok`                      | `done_with_method`                       |
//! | `ClientSide` failure      | logged, `done_with_method`               |
//! | `Disconnected`            | connection closed                        |
//! | anything else             | failure sent to client, `done_with_method` |
//!
//! A handler that panics loses its connection, which is closed; the worker
//! logs the panic and takes the next connection.

use std::any::Any;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::{RemoteFailure, TransportError};
use super::server::TransportServer;
use crate::config::ServerConfig;

/// Serves one method call. The call's input is read from and the reply
/// written to `call`; returning an error fails the call on the client.
pub trait MethodHandler: Send + Sync + 'static {
    fn handle(&self, method: &str, call: &mut TransportServer) -> Result<()>;
}

impl<F> MethodHandler for F
where
    F: Fn(&str, &mut TransportServer) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, method: &str, call: &mut TransportServer) -> Result<()> {
        self(method, call)
    }
}

/// Live connections, kept so shutdown can close them.
#[derive(Default)]
struct Connections {
    next_id: AtomicU64,
    streams: Mutex<HashMap<u64, TcpStream>>,
}

impl Connections {
    fn register(&self, stream: &TcpStream) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        match stream.try_clone() {
            Ok(clone) => {
                self.streams.lock().insert(id, clone);
            }
            Err(e) => warn!(error = %e, "failed to track connection"),
        }
        id
    }

    fn release(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    fn close_all(&self) {
        for (_, stream) in self.streams.lock().drain() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn len(&self) -> usize {
        self.streams.lock().len()
    }
}

struct Shared {
    config: ServerConfig,
    running: AtomicBool,
    connections: Connections,
}

pub struct Server;

impl Server {
    /// Binds `addr` and starts the accept thread and `config.workers`
    /// workers.
    pub fn start<A, H>(addr: A, config: ServerConfig, handler: H) -> Result<ServerHandle>
    where
        A: ToSocketAddrs,
        H: MethodHandler,
    {
        ensure!(config.workers > 0, "server needs at least one worker");
        ensure!(config.queue_depth > 0, "accept queue depth must be positive");

        let listener = TcpListener::bind(addr).wrap_err("failed to bind server socket")?;
        listener
            .set_nonblocking(true)
            .wrap_err("failed to make listener non-blocking")?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            config,
            running: AtomicBool::new(true),
            connections: Connections::default(),
        });
        let handler: Arc<dyn MethodHandler> = Arc::new(handler);
        let (tx, rx) = mpsc::sync_channel::<TcpStream>(config.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        let mut threads = Vec::with_capacity(config.workers + 1);
        for n in 0..config.workers {
            let shared = Arc::clone(&shared);
            let handler = Arc::clone(&handler);
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("seriesfs-worker-{}", n))
                .spawn(move || worker_loop(&shared, handler.as_ref(), &rx))
                .wrap_err("failed to spawn worker thread")?;
            threads.push(handle);
        }

        let accept_shared = Arc::clone(&shared);
        let accept = thread::Builder::new()
            .name(format!("seriesfs-accept-{}", local_addr.port()))
            .spawn(move || accept_loop(listener, &accept_shared, tx))
            .wrap_err("failed to spawn accept thread")?;
        threads.push(accept);

        info!(
            addr = %local_addr,
            workers = config.workers,
            max_version = %config.max_version,
            "server listening"
        );
        Ok(ServerHandle {
            local_addr,
            shared,
            threads,
        })
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn active_connections(&self) -> usize {
        self.shared.connections.len()
    }

    /// Stops accepting and closes every live connection. Threads are joined
    /// when the handle is dropped.
    pub fn shutdown(&self) {
        if self.shared.running.swap(false, Ordering::SeqCst) {
            info!(addr = %self.local_addr, "server shutting down");
        }
        self.shared.connections.close_all();
    }

    /// Blocks until the server is shut down from elsewhere.
    pub fn wait(mut self) {
        self.join_all();
    }

    fn join_all(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("server thread panicked");
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        self.join_all();
    }
}

fn accept_loop(listener: TcpListener, shared: &Shared, tx: SyncSender<TcpStream>) {
    let poll = shared.config.poll_interval;
    let mut pending: Option<TcpStream> = None;

    while shared.running.load(Ordering::Relaxed) {
        if let Some(stream) = pending.take() {
            match tx.try_send(stream) {
                Ok(()) => {}
                Err(TrySendError::Full(stream)) => {
                    pending = Some(stream);
                    thread::sleep(poll);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
            continue;
        }

        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = prepare_stream(&stream, &shared.config) {
                    warn!(%addr, error = %format!("{:#}", e), "dropping connection");
                    continue;
                }
                debug!(%addr, "connection queued");
                pending = Some(stream);
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(poll);
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                thread::sleep(poll * 4);
            }
        }
    }
    debug!("accept loop stopped");
}

fn prepare_stream(stream: &TcpStream, config: &ServerConfig) -> Result<()> {
    // Accepted sockets inherit non-blocking mode on some platforms.
    stream.set_nonblocking(false)?;
    if config.nodelay {
        stream.set_nodelay(true)?;
    }
    Ok(())
}

fn worker_loop(shared: &Shared, handler: &dyn MethodHandler, rx: &Mutex<Receiver<TcpStream>>) {
    loop {
        let next = rx.lock().recv_timeout(shared.config.poll_interval);
        let stream = match next {
            Ok(stream) => stream,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if shared.running.load(Ordering::Relaxed) {
                    continue;
                }
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        };
        if !shared.running.load(Ordering::Relaxed) {
            continue;
        }

        let id = shared.connections.register(&stream);
        // Shutdown may have closed the registry before this connection got in.
        if shared.running.load(Ordering::SeqCst) {
            let served = panic::catch_unwind(AssertUnwindSafe(|| {
                serve_connection(stream, shared, handler)
            }));
            if let Err(cause) = served {
                error!(cause = panic_message(&*cause), "worker recovered from a panicking call");
            }
        }
        // Dropping the tracked clone closes the socket if the call panicked.
        shared.connections.release(id);
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> &str {
    if let Some(message) = cause.downcast_ref::<&str>() {
        message
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

fn serve_connection(stream: TcpStream, shared: &Shared, handler: &dyn MethodHandler) {
    let mut server = match TransportServer::accept(stream, shared.config.max_version) {
        Ok(server) => server,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "handshake failed");
            return;
        }
    };
    let peer = server.peer_addr();

    loop {
        let result = match server.next_method() {
            Ok(Some(method)) => {
                debug!(%peer, %method, "call");
                handler
                    .handle(&method, &mut server)
                    .map_err(|e| e.wrap_err(format!("method {} failed", method)))
            }
            Ok(None) => break,
            Err(e) => Err(e),
        };

        let keep_going = match result {
            Ok(()) => finish_call(&mut server),
            Err(e) => fail_call(&mut server, e),
        };
        if !keep_going {
            break;
        }
    }

    debug!(%peer, "connection closed");
    server.close();
}

fn finish_call(server: &mut TransportServer) -> bool {
    match server.done_with_method() {
        Ok(()) => true,
        Err(e) => {
            if !TransportError::is_disconnect(&e) {
                warn!(peer = %server.peer_addr(), error = %format!("{:#}", e), "failed to complete call");
            }
            false
        }
    }
}

/// Reports a failed call to the client. Returns false when the connection
/// is gone.
fn fail_call(server: &mut TransportServer, err: eyre::Report) -> bool {
    let peer = server.peer_addr();
    match TransportError::of(&err) {
        Some(TransportError::Disconnected) => return false,
        Some(TransportError::ClientSide(failure)) => {
            debug!(%peer, kind = %failure.kind, message = %failure.message, "client aborted call");
        }
        _ => {
            warn!(%peer, error = %format!("{:#}", err), "call failed");
            let failure = RemoteFailure::from_report(&err);
            if let Err(e) = server.send_failure(&failure) {
                if TransportError::is_disconnect(&e) {
                    return false;
                }
                warn!(%peer, error = %format!("{:#}", e), "failed to report failure");
                return false;
            }
        }
    }
    finish_call(server)
}
