//! Tick-driven UDP I/O server.
//!
//! One background worker owns every channel socket: it polls them with zero
//! timeout on a fixed tick, delivers inbound datagrams to per-channel
//! callbacks, and drains each channel's outbound SPMC queue to its
//! configured peer. Channel state is mutated only on the worker; foreign
//! threads talk to it through the command queue, synchronously when they
//! need a result (one shared waiter, serialized by a busy flag).
//!
//! The worker never blocks on I/O. Its only suspension points are condvar
//! waits: untimed while no channels exist, bounded by the next tick
//! otherwise.

mod socket;

pub use socket::BindFamily;

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use rtplane_infra_common::{deadline_instant, monotonic_ns, CommandQueue, SpmcQueue, Waiter};

use crate::error::{Error, Result};
use crate::server::socket::{bind_udp_socket, resolve_udp_addr};

/// Default worker tick rate
pub const DEFAULT_TICK_HZ: u32 = 200;
/// Default per-channel outbound queue capacity
pub const DEFAULT_OUTQ_CAPACITY: usize = 32;
/// Largest datagram the receive path accepts
pub const MAX_UDP_PACKET: usize = 65535;

/// Inbound packet callback: `(datagram, peer, monotonic_ns)`.
pub type PacketCallback = Box<dyn FnMut(&[u8], SocketAddr, u64) + Send>;

/// One queued outbound datagram; the payload handle is released after the
/// send attempt.
struct SendItem {
    data: Bytes,
}

enum ServerCommand {
    AddChannel {
        id: u64,
        socket: UdpSocket,
        pkt_in: PacketCallback,
        out_q: Arc<SpmcQueue<SendItem>>,
        notify: bool,
    },
    RemoveChannel {
        id: u64,
    },
    SetTarget {
        id: u64,
        addr: SocketAddr,
        notify: bool,
    },
    Shutdown,
}

struct ServerShared {
    tick_ns: u64,
    cmds: CommandQueue<ServerCommand>,
    waiter: Waiter,
}

impl ServerShared {
    /// Run one synchronous command through the shared waiter.
    fn run_sync(&self, cmd: ServerCommand) -> Result<i32> {
        if !self.cmds.try_acquire_sync() {
            return Err(Error::SyncBusy);
        }
        self.waiter.reset();
        if self.cmds.push(cmd).is_err() {
            self.cmds.release_sync();
            return Err(Error::ShuttingDown);
        }
        let status = self.waiter.wait();
        self.cmds.release_sync();
        Ok(status)
    }
}

/// Configuration for [`RtpServer::create_channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bind host; defaults to the family's wildcard address
    pub bind_host: Option<String>,
    /// Bind port; 0 takes an ephemeral port
    pub bind_port: u16,
    /// Outbound queue capacity; must be a nonzero power of two
    pub queue_capacity: usize,
    pub bind_family: BindFamily,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            bind_host: None,
            bind_port: 0,
            queue_capacity: DEFAULT_OUTQ_CAPACITY,
            bind_family: BindFamily::Auto,
        }
    }
}

/// The I/O server handle. Dropping it shuts the worker down.
pub struct RtpServer {
    shared: Arc<ServerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    next_channel_id: AtomicU64,
}

impl RtpServer {
    /// Start a server whose worker runs at `tick_hz` ticks per second.
    pub fn new(tick_hz: u32) -> Result<RtpServer> {
        if tick_hz == 0 {
            return Err(Error::InvalidTickRate);
        }
        let shared = Arc::new(ServerShared {
            tick_ns: (1_000_000_000u64 / tick_hz as u64).max(1),
            cmds: CommandQueue::new(),
            waiter: Waiter::new(),
        });
        let worker_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("rtp-io-server".into())
            .spawn(move || io_worker(worker_shared))?;
        Ok(RtpServer {
            shared,
            worker: Mutex::new(Some(handle)),
            next_channel_id: AtomicU64::new(1),
        })
    }

    /// Start a server at the default 200 Hz tick.
    pub fn with_default_tick() -> Result<RtpServer> {
        Self::new(DEFAULT_TICK_HZ)
    }

    pub fn tick_ns(&self) -> u64 {
        self.shared.tick_ns
    }

    /// Create a channel with its own UDP socket.
    ///
    /// The socket is created and bound on the caller before anything is
    /// enqueued, so bind errors surface here directly. The add itself is
    /// synchronous: the call returns once the worker owns the channel.
    pub fn create_channel<F>(&self, pkt_in: F, config: ChannelConfig) -> Result<RtpChannel>
    where
        F: FnMut(&[u8], SocketAddr, u64) + Send + 'static,
    {
        if config.queue_capacity == 0 || !config.queue_capacity.is_power_of_two() {
            return Err(Error::InvalidQueueCapacity(config.queue_capacity));
        }
        let host = config
            .bind_host
            .as_deref()
            .unwrap_or_else(|| config.bind_family.default_bind_host());
        let bind_addr = resolve_udp_addr(host, config.bind_port, config.bind_family)?;
        let (socket, local_addr) = bind_udp_socket(bind_addr)?;
        let out_q = Arc::new(SpmcQueue::new(config.queue_capacity));
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);

        let status = self.shared.run_sync(ServerCommand::AddChannel {
            id,
            socket,
            pkt_in: Box::new(pkt_in),
            out_q: out_q.clone(),
            notify: true,
        })?;
        if status != 0 {
            return Err(Error::CommandFailed(status));
        }

        Ok(RtpChannel {
            shared: self.shared.clone(),
            id,
            out_q,
            local_addr,
            closed: AtomicBool::new(false),
            has_target: AtomicBool::new(false),
        })
    }

    /// Stop accepting commands, drain the worker, and join it.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn shutdown(&self) {
        let _ = self.shared.cmds.push_closing(ServerCommand::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RtpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A server channel handle.
///
/// The worker owns the socket and callback; the handle owns the producer
/// side of the outbound queue and the channel's identity. One producer at a
/// time may call [`RtpChannel::send_pkt`].
pub struct RtpChannel {
    shared: Arc<ServerShared>,
    id: u64,
    out_q: Arc<SpmcQueue<SendItem>>,
    local_addr: SocketAddr,
    closed: AtomicBool,
    has_target: AtomicBool,
}

impl RtpChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The socket's bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve `host:port` and install it as the channel's send target.
    ///
    /// Returns once the worker has applied the change.
    pub fn set_target(&self, host: &str, port: u16) -> Result<()> {
        if self.closed() {
            return Err(Error::ChannelClosed);
        }
        let family = if self.local_addr.is_ipv4() {
            BindFamily::V4
        } else {
            BindFamily::V6
        };
        let addr = resolve_udp_addr(host, port, family)?;
        let status = self.shared.run_sync(ServerCommand::SetTarget {
            id: self.id,
            addr,
            notify: true,
        })?;
        match status {
            0 => {
                self.has_target.store(true, Ordering::Release);
                Ok(())
            }
            s if s == libc::ENOENT => Err(Error::ChannelGone),
            s => Err(Error::CommandFailed(s)),
        }
    }

    /// Queue one datagram for transmission to the configured target.
    ///
    /// Never blocks. A full queue is reported as [`Error::QueueFull`] and the
    /// datagram is not retained. On success the worker is woken so a pending
    /// tick-wait drains promptly.
    pub fn send_pkt(&self, data: Bytes) -> Result<()> {
        if self.closed() {
            return Err(Error::ChannelClosed);
        }
        if !self.has_target.load(Ordering::Acquire) {
            return Err(Error::TargetNotSet);
        }
        if !self.shared.cmds.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        match self.out_q.try_push(SendItem { data }) {
            Ok(()) => {
                self.shared.cmds.poke();
                Ok(())
            }
            Err(_) => Err(Error::QueueFull),
        }
    }

    /// Detach the channel from the worker.
    ///
    /// Socket, queue and callback are released on the worker thread. Closing
    /// twice is a lifecycle error; closing after server shutdown is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::ChannelClosed);
        }
        // Best effort: after shutdown the worker tears everything down
        // itself.
        let _ = self
            .shared
            .cmds
            .push(ServerCommand::RemoveChannel { id: self.id });
        Ok(())
    }
}

impl Drop for RtpChannel {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self
                .shared
                .cmds
                .push(ServerCommand::RemoveChannel { id: self.id });
        }
    }
}

/// Worker-owned channel state.
struct IoChannelState {
    id: u64,
    socket: UdpSocket,
    target: Option<SocketAddr>,
    pkt_in: PacketCallback,
    out_q: Arc<SpmcQueue<SendItem>>,
}

struct IoWorker {
    channels: HashMap<u64, IoChannelState>,
    poll_fds: Vec<libc::pollfd>,
    poll_ids: Vec<u64>,
    poll_dirty: bool,
    recv_buf: Vec<u8>,
}

impl IoWorker {
    fn new() -> Self {
        IoWorker {
            channels: HashMap::new(),
            poll_fds: Vec::new(),
            poll_ids: Vec::new(),
            poll_dirty: true,
            recv_buf: vec![0u8; MAX_UDP_PACKET],
        }
    }

    fn refresh_poll_cache(&mut self) {
        if !self.poll_dirty {
            return;
        }
        self.poll_fds.clear();
        self.poll_ids.clear();
        for ch in self.channels.values() {
            self.poll_fds.push(libc::pollfd {
                fd: ch.socket.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            self.poll_ids.push(ch.id);
        }
        self.poll_dirty = false;
    }

    /// Zero-timeout poll over every channel socket; deliver whatever is
    /// readable.
    fn poll_inputs(&mut self) {
        if self.poll_fds.is_empty() {
            return;
        }
        let rc = unsafe {
            libc::poll(
                self.poll_fds.as_mut_ptr(),
                self.poll_fds.len() as libc::nfds_t,
                0,
            )
        };
        if rc <= 0 {
            return;
        }
        let rtime = monotonic_ns();
        let Self {
            channels,
            poll_fds,
            poll_ids,
            recv_buf,
            ..
        } = self;
        for (pfd, id) in poll_fds.iter_mut().zip(poll_ids.iter()) {
            if pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) == 0 {
                continue;
            }
            pfd.revents = 0;
            if let Some(ch) = channels.get_mut(id) {
                receive_for_channel(ch, recv_buf, rtime);
            }
        }
    }

    /// Drain every channel's outbound queue to its target.
    fn drain_outputs(&mut self) {
        for ch in self.channels.values_mut() {
            while let Some(item) = ch.out_q.try_pop() {
                if let Some(target) = ch.target {
                    // Best-effort UDP: send errors are dropped.
                    let _ = ch.socket.send_to(&item.data, target);
                }
            }
        }
    }
}

/// Read the socket dry, handing each datagram to the channel callback.
fn receive_for_channel(ch: &mut IoChannelState, buf: &mut [u8], rtime: u64) {
    loop {
        match ch.socket.recv_from(buf) {
            Ok((len, peer)) => {
                let payload = &buf[..len];
                let result = catch_unwind(AssertUnwindSafe(|| (ch.pkt_in)(payload, peer, rtime)));
                if result.is_err() {
                    warn!(id = ch.id, "inbound packet callback panicked");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                debug!(id = ch.id, error = %e, "recv_from failed");
                break;
            }
        }
    }
}

fn process_commands(state: &mut IoWorker, shared: &ServerShared, shutdown_seen: &mut bool) {
    for cmd in shared.cmds.detach_all() {
        let mut status = 0i32;
        let mut notify = false;
        match cmd {
            ServerCommand::AddChannel {
                id,
                socket,
                pkt_in,
                out_q,
                notify: n,
            } => {
                notify = n;
                state.channels.insert(
                    id,
                    IoChannelState {
                        id,
                        socket,
                        target: None,
                        pkt_in,
                        out_q,
                    },
                );
                state.poll_dirty = true;
                debug!(id, "channel added");
            }
            ServerCommand::RemoveChannel { id } => {
                if state.channels.remove(&id).is_some() {
                    state.poll_dirty = true;
                    debug!(id, "channel removed");
                }
            }
            ServerCommand::SetTarget { id, addr, notify: n } => {
                notify = n;
                match state.channels.get_mut(&id) {
                    Some(ch) => ch.target = Some(addr),
                    None => status = libc::ENOENT,
                }
            }
            ServerCommand::Shutdown => {
                *shutdown_seen = true;
            }
        }
        if notify {
            shared.waiter.complete(status);
        }
    }
}

fn io_worker(shared: Arc<ServerShared>) {
    let mut state = IoWorker::new();
    let mut next_tick_ns: Option<u64> = None;

    loop {
        let mut shutdown_seen = false;
        process_commands(&mut state, &shared, &mut shutdown_seen);
        if shutdown_seen {
            break;
        }

        state.refresh_poll_cache();
        if state.poll_fds.is_empty() {
            next_tick_ns = None;
            shared.cmds.wait_for_commands();
            continue;
        }

        let now_ns = monotonic_ns();
        let tick = *next_tick_ns.get_or_insert(now_ns);
        if now_ns < tick {
            shared.cmds.wait_until(deadline_instant(tick));
            // A send may have poked us awake mid-tick: drain promptly
            // instead of holding the packet to the tick boundary.
            state.drain_outputs();
            continue;
        }

        state.poll_inputs();
        state.drain_outputs();

        // Advance by whole ticks, catching up monotonically if late.
        let mut next = tick + shared.tick_ns;
        while next <= now_ns {
            next += shared.tick_ns;
        }
        next_tick_ns = Some(next);
    }

    debug!("I/O server worker exiting");
    // Channel sockets and queues drop here. Stranded synchronous commands
    // are completed so no caller stays blocked.
    for cmd in shared.cmds.detach_all() {
        match cmd {
            ServerCommand::AddChannel { notify: true, .. }
            | ServerCommand::SetTarget { notify: true, .. } => {
                shared.waiter.complete(libc::ECANCELED);
            }
            _ => {}
        }
    }
}
