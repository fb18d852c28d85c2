// ── TSL listener ──
//
// Receives tally datagrams on a dedicated OS thread so that control
// plane work on the async runtime can never delay protocol decoding.
// The socket read timeout bounds how long a stop request goes unseen.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use serde::Serialize;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tally_api::tsl;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::ListenerConfig;
use crate::error::CoreError;
use crate::indicator::Renderer;
use crate::state::DeviceState;

/// Largest datagram read; anything past the 17-byte frame is ignored.
const RECV_BUFFER_LEN: usize = 1500;

// ── Counters ─────────────────────────────────────────────────────────

/// Datagram counters, updated by the listener thread.
#[derive(Debug, Default)]
pub struct ListenerStats {
    received: AtomicU64,
    applied: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerCounters {
    pub received: u64,
    pub applied: u64,
    pub ignored: u64,
    pub malformed: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> ListenerCounters {
        ListenerCounters {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Valid, but addressed to another receiver.
    Ignored,
    Malformed,
}

// ── Listener ─────────────────────────────────────────────────────────

pub struct TallyListener {
    config: ListenerConfig,
    state: Arc<DeviceState>,
    renderer: Renderer,
    stats: Arc<ListenerStats>,
}

impl TallyListener {
    pub fn new(config: ListenerConfig, state: Arc<DeviceState>, renderer: Renderer) -> Self {
        Self::with_stats(config, state, renderer, Arc::default())
    }

    /// Count into `stats`, so totals survive listener restarts.
    pub fn with_stats(
        config: ListenerConfig,
        state: Arc<DeviceState>,
        renderer: Renderer,
        stats: Arc<ListenerStats>,
    ) -> Self {
        Self {
            config,
            state,
            renderer,
            stats,
        }
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Decode and apply one datagram. Never fails: malformed input is
    /// counted and dropped.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Outcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let cmd = match tsl::decode(datagram) {
            Ok(cmd) => cmd,
            Err(e) => {
                trace!(error = %e, "dropping datagram");
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                return Outcome::Malformed;
            }
        };

        if !self
            .state
            .apply(&cmd, self.config.address, self.config.max_brightness)
        {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            return Outcome::Ignored;
        }

        debug!(
            state = %cmd.state,
            text = %cmd.text,
            level = cmd.brightness_level,
            "tally update"
        );
        self.renderer.render_tally();
        self.stats.applied.fetch_add(1, Ordering::Relaxed);
        Outcome::Applied
    }

    /// Bind the socket and start the receive thread.
    ///
    /// Binding happens on the caller's thread so that errors surface here.
    pub fn start(self) -> Result<ListenerHandle, CoreError> {
        let socket = bind_socket(&self.config).map_err(|e| CoreError::Listener {
            message: format!(
                "cannot listen on {}:{}: {e}",
                self.config.group, self.config.port
            ),
        })?;
        let local_addr = socket.local_addr().map_err(|e| CoreError::Listener {
            message: e.to_string(),
        })?;

        info!(
            group = %self.config.group,
            port = local_addr.port(),
            address = self.config.address,
            multicast = self.config.group.is_multicast(),
            "TSL listener started"
        );

        let cancel = CancellationToken::new();
        let stats = self.stats();
        let thread = std::thread::Builder::new()
            .name("tsl-listener".into())
            .spawn({
                let cancel = cancel.clone();
                move || self.receive_loop(&socket, &cancel)
            })
            .map_err(|e| CoreError::Listener {
                message: format!("cannot spawn listener thread: {e}"),
            })?;

        Ok(ListenerHandle {
            cancel,
            thread: Some(thread),
            local_addr,
            stats,
        })
    }

    fn receive_loop(&self, socket: &UdpSocket, cancel: &CancellationToken) {
        let mut buf = [0u8; RECV_BUFFER_LEN];

        while !cancel.is_cancelled() {
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    trace!(%from, len, "datagram");
                    self.handle_datagram(buf.get(..len).unwrap_or_default());
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    std::thread::sleep(self.config.poll_interval);
                }
            }
        }

        if self.config.group.is_multicast() {
            if let Err(e) = socket.leave_multicast_v4(&self.config.group, &self.config.interface) {
                debug!(error = %e, "leaving multicast group failed");
            }
        }
        info!("TSL listener stopped");
    }
}

fn bind_socket(config: &ListenerConfig) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let bind_ip = if config.group.is_multicast() {
        Ipv4Addr::UNSPECIFIED
    } else {
        config.group
    };
    socket.bind(&SockAddr::from(SocketAddrV4::new(bind_ip, config.port)))?;

    if config.group.is_multicast() {
        socket.join_multicast_v4(&config.group, &config.interface)?;
    }
    socket.set_read_timeout(Some(config.poll_interval))?;

    Ok(socket.into())
}

// ── Handle ───────────────────────────────────────────────────────────

/// Owns the running listener thread. Dropping it requests a stop.
pub struct ListenerHandle {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    stats: Arc<ListenerStats>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ListenerCounters {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Request a stop without waiting. Safe to call from any thread.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop and wait for the thread, at most about one poll interval.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("listener thread panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Palette;
    use crate::indicator::testing::RecordingIndicator;
    use crate::model::{Rgb, TallyCommand, TallyState};

    fn listener(address: u8) -> (TallyListener, Arc<DeviceState>, Arc<RecordingIndicator>) {
        let indicator = Arc::new(RecordingIndicator::default());
        let state = Arc::new(DeviceState::new());
        let renderer = Renderer::new(indicator.clone(), state.clone(), Palette::default(), 90);
        let config = ListenerConfig {
            address,
            group: Ipv4Addr::LOCALHOST,
            port: 0,
            max_brightness: 90,
            ..ListenerConfig::default()
        };
        (TallyListener::new(config, state.clone(), renderer), state, indicator)
    }

    #[test]
    fn reference_packet_is_applied_and_rendered() {
        let (listener, state, indicator) = listener(5);
        let packet = TallyCommand::new(5, TallyState::Program, 2, "CAM 1").encode();
        assert_eq!(packet[0], 133);

        assert_eq!(listener.handle_datagram(&packet), Outcome::Applied);
        let snap = state.tally();
        assert_eq!(snap.state, TallyState::Program);
        assert_eq!(snap.text.as_str(), "CAM 1");
        assert_eq!(snap.brightness, 60);
        assert_eq!(indicator.last(), Some((Rgb::GREEN, 60)));
    }

    #[test]
    fn other_addresses_leave_state_unchanged() {
        let (listener, state, indicator) = listener(5);
        listener.handle_datagram(&TallyCommand::new(5, TallyState::Preview, 3, "A").encode());
        let before = state.tally();
        let frames = indicator.frames().len();

        for address in [0, 4, 6, 126] {
            let packet = TallyCommand::new(address, TallyState::Program, 1, "B").encode();
            assert_eq!(listener.handle_datagram(&packet), Outcome::Ignored);
        }
        assert_eq!(state.tally(), before);
        assert_eq!(indicator.frames().len(), frames);
    }

    #[test]
    fn malformed_input_is_counted_and_dropped() {
        let (listener, state, _) = listener(0);
        assert_eq!(listener.handle_datagram(&[0x80, 0x01]), Outcome::Malformed);

        let mut low_address = TallyCommand::new(0, TallyState::Program, 3, "").encode();
        low_address[0] = 0x05;
        assert_eq!(listener.handle_datagram(&low_address), Outcome::Malformed);

        assert_eq!(state.tally().state, TallyState::Off);
        assert_eq!(
            listener.stats().snapshot(),
            ListenerCounters {
                received: 2,
                applied: 0,
                ignored: 0,
                malformed: 2,
            }
        );
    }

    #[test]
    fn receives_over_udp_and_stops_promptly() {
        let (listener, state, _) = listener(9);
        let handle = listener.start().unwrap();
        assert!(handle.is_running());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"junk", handle.local_addr()).unwrap();
        let packet = TallyCommand::new(9, TallyState::Unselected, 3, "REPLAY").encode();
        sender.send_to(&packet, handle.local_addr()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.stats().applied < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(state.tally().state, TallyState::Unselected);
        assert_eq!(state.tally().text.as_str(), "REPLAY");
        let counters = handle.stats();
        assert_eq!(counters.applied, 1);
        assert_eq!(counters.malformed, 1);

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
