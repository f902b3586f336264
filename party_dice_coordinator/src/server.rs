// TCP server and main event loop for the coordinator.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `recv_frame()` in a loop and
//   send `InternalEvent::MessageFrom` to the main thread. On EOF, a read
//   error, a malformed frame, or `Goodbye`, send `InternalEvent::Disconnected`
//   and exit.
// - **Main thread**: owns the `Coordinator` and handles one event at a time,
//   so every request runs to completion (reply plus fan-out) before the next
//   one is looked at. `recv_timeout` doubles as the sweep timer: at least
//   every `sweep_interval` the loop calls `Coordinator::tick` to auto-roll
//   expired turns and reap idle lobbies. A burst of queued events is cut
//   short when a sweep falls due, and the rest wait for the next pass.
//
// The main thread is the only writer to client sockets (through the
// coordinator's `Broadcaster`). Reader threads only read.
//
// Shutdown: `CoordinatorHandle::stop` clears `keep_running`; the main loop and
// the listener notice within one poll interval.

use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use party_dice_prng::DiceRng;
use party_dice_protocol::{ClientMessage, recv_frame};

use crate::broadcast::ConnectionId;
use crate::coordinator::Coordinator;

/// Events sent from listener/reader threads to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
        peer: SocketAddr,
    },
    MessageFrom {
        connection: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        connection: ConnectionId,
    },
}

/// Handle returned by `start_coordinator` to control the running server.
pub struct CoordinatorHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Signal the coordinator to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        self.join();
    }

    /// Block until the main loop exits on its own.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.join().is_err() {
            tracing::error!("coordinator main loop panicked");
        }
    }
}

/// Configuration for starting a coordinator server.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub bind_addr: String,
    /// 0 lets the OS pick a free port.
    pub port: u16,
    /// Fixed PRNG seed for reproducible sessions. `None` seeds from OS
    /// entropy.
    pub seed: Option<u64>,
    /// Auto-roll for a player who holds the turn longer than this.
    pub turn_timeout: Option<Duration>,
    /// Reap lobbies idle this long with no member online.
    pub lobby_ttl: Option<Duration>,
    /// Upper bound between two sweeps of the main loop.
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 7979,
            seed: None,
            turn_timeout: None,
            lobby_ttl: Some(Duration::from_secs(30 * 60)),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

/// Start the coordinator on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_coordinator(
    config: CoordinatorConfig,
) -> io::Result<(CoordinatorHandle, SocketAddr)> {
    let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept thread can check keep_running periodically.
    listener.set_nonblocking(true)?;

    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();
    let thread = thread::spawn(move || {
        run_coordinator(listener, config, keep_running_clone);
    });

    tracing::info!(%addr, "coordinator listening");
    Ok((
        CoordinatorHandle {
            keep_running,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main loop. Runs until `keep_running` is set to false.
fn run_coordinator(
    listener: TcpListener,
    config: CoordinatorConfig,
    keep_running: Arc<AtomicBool>,
) {
    let rng = match config.seed {
        Some(seed) => {
            tracing::info!(seed, "using fixed PRNG seed");
            DiceRng::new(seed)
        }
        None => DiceRng::from_entropy(),
    };
    let coordinator = Coordinator::new(rng, config.turn_timeout, config.lobby_ttl);

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        accept_loop(listener, tx_listener, keep_running_listener);
    });

    let sweep_interval = config.sweep_interval;
    let mut event_loop = EventLoop::new(coordinator, tx, keep_running.clone(), sweep_interval);

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(event_loop.until_sweep(Instant::now())) {
            Ok(event) => {
                event_loop.handle_event(event);
                event_loop.drain(&rx);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        event_loop.sweep_if_due(Instant::now());
    }
    tracing::info!("coordinator stopped");
}

fn accept_loop(listener: TcpListener, tx: Sender<InternalEvent>, keep_running: Arc<AtomicBool>) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer, error = %e, "could not make stream blocking");
                    continue;
                }
                let event = InternalEvent::NewConnection { stream, peer };
                if tx.send(event).is_err() {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed, listener exiting");
                break;
            }
        }
    }
}

/// Main-thread state: the coordinator plus what it needs to accept new
/// connections and to schedule sweeps.
///
/// Events are handled in batches that end once the next sweep is due, so a
/// steady stream of requests cannot postpone `Coordinator::tick`.
struct EventLoop {
    coordinator: Coordinator,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
    next_id: u64,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl EventLoop {
    fn new(
        coordinator: Coordinator,
        tx: Sender<InternalEvent>,
        keep_running: Arc<AtomicBool>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            tx,
            keep_running,
            next_id: 0,
            sweep_interval,
            last_sweep: Instant::now(),
        }
    }

    /// Time left before the next sweep is due.
    fn until_sweep(&self, now: Instant) -> Duration {
        let elapsed = now.duration_since(self.last_sweep);
        self.sweep_interval.saturating_sub(elapsed)
    }

    fn sweep_due(&self, now: Instant) -> bool {
        self.until_sweep(now).is_zero()
    }

    /// Handle events that are already queued, stopping early when a sweep
    /// falls due. Returns how many were handled.
    fn drain(&mut self, rx: &Receiver<InternalEvent>) -> usize {
        let mut handled = 0;
        while !self.sweep_due(Instant::now()) {
            let Ok(event) = rx.try_recv() else {
                break;
            };
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn sweep_if_due(&mut self, now: Instant) {
        if !self.sweep_due(now) {
            return;
        }
        self.coordinator.tick(now);
        self.last_sweep = now;
        tracing::trace!(
            accounts = self.coordinator.identities().len(),
            lobbies = self.coordinator.lobbies().len(),
            connections = self.coordinator.connection_count(),
            "sweep finished"
        );
    }

    /// Dispatch a single event to the coordinator.
    fn handle_event(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::NewConnection { stream, peer } => {
                let connection = ConnectionId(self.next_id);
                self.next_id += 1;
                self.handle_new_connection(connection, peer, stream);
            }
            InternalEvent::MessageFrom {
                connection,
                message,
            } => match message {
                ClientMessage::Request { id, request } => {
                    self.coordinator.handle(connection, id, request);
                }
                // The reader loop turns Goodbye into Disconnected.
                ClientMessage::Goodbye => {}
            },
            InternalEvent::Disconnected { connection } => {
                self.coordinator.disconnect(connection);
                let live = self.coordinator.connection_count();
                tracing::info!(%connection, live, "connection closed");
            }
        }
    }

    /// Attach the write half to the coordinator and spawn a reader thread
    /// for the read half. No handshake: the client's first request is
    /// usually `Login`, and anything else gets "not logged in".
    fn handle_new_connection(
        &mut self,
        connection: ConnectionId,
        peer: SocketAddr,
        stream: TcpStream,
    ) {
        let read_half = match stream.try_clone() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "could not clone stream, dropping connection");
                return;
            }
        };
        stream.set_nodelay(true).ok();
        self.coordinator.attach_connection(connection, stream);
        tracing::info!(%connection, %peer, "client connected");

        let reader = BufReader::new(read_half);
        let tx_reader = self.tx.clone();
        let keep_running_reader = self.keep_running.clone();
        thread::spawn(move || {
            reader_loop(reader, connection, tx_reader, keep_running_reader);
        });
    }
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    connection: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match recv_frame::<_, ClientMessage>(&mut reader) {
            Ok(ClientMessage::Goodbye) => {
                tracing::debug!(%connection, "client said goodbye");
                break;
            }
            Ok(message) => {
                let event = InternalEvent::MessageFrom {
                    connection,
                    message,
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "dropping connection after bad read");
                break;
            }
        }
    }
    let _ = tx.send(InternalEvent::Disconnected { connection });
}
