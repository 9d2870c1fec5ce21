//! ICMP liveness probing.
//!
//! Two modes share one primitive, an [`EchoSocket`]:
//!
//! - [`check_online`] sends echo requests until the first reply or the timeout.
//! - [`observe`] runs an unbounded echo loop on a blocking thread and, on a
//!   fixed tick, reports `now < last_reply + staleness` to a callback.
//!
//! The online flag is re-evaluated only on ticks, never on reply arrival, so a
//! single late reply cannot flap the reported state.

use std::io;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::{IcmpCodes, MutableEchoRequestPacket};
use pnet::packet::icmp::{self, IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::Packet;
use pnet::transport::{
    self, icmp_packet_iter, TransportChannelType, TransportProtocol, TransportReceiver,
    TransportSender,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::address::validate_host;
use crate::config::ProbeConfig;
use crate::error::ActionError;

/// Upper bound on how long the echo loop goes without checking its stop flag.
const STOP_POLL: Duration = Duration::from_millis(100);

const TRANSPORT_BUFFER_SIZE: usize = 4096;
const ICMP_CHANNEL: TransportChannelType =
    TransportChannelType::Layer4(TransportProtocol::Ipv4(IpNextHeaderProtocols::Icmp));
/// 8-byte ICMP header plus 8 bytes of payload.
const ECHO_REQUEST_LEN: usize = 16;

/// A blocking, per-host echo channel.
pub trait EchoSocket: Send {
    /// Send one echo request.
    fn send_request(&mut self, sequence: u16) -> io::Result<()>;
    /// Wait up to `timeout` for a reply from the probed host. `Ok(false)` on timeout.
    fn wait_reply(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// Opens [`EchoSocket`]s. Opening may block on name resolution.
pub trait Pinger: Send + Sync {
    fn open(&self, host: &str) -> Result<Box<dyn EchoSocket>, ActionError>;
}

/// [`Pinger`] using raw ICMPv4 sockets. Needs `CAP_NET_RAW` or root.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpPinger;

impl Pinger for IcmpPinger {
    fn open(&self, host: &str) -> Result<Box<dyn EchoSocket>, ActionError> {
        let construction = |reason: String| ActionError::ProbeConstruction {
            host: host.to_string(),
            reason,
        };
        let target = resolve_ipv4(host).map_err(construction)?;
        let (tx, rx) = transport::transport_channel(TRANSPORT_BUFFER_SIZE, ICMP_CHANNEL)
            .map_err(|e| construction(format!("cannot open raw ICMP socket: {e}")))?;
        debug!("Probing {host} at {target}");
        Ok(Box::new(IcmpSocket {
            tx,
            rx,
            target,
            identifier: rand::random(),
        }))
    }
}

fn resolve_ipv4(host: &str) -> Result<Ipv4Addr, String> {
    (host, 0)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve: {e}"))?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| "no IPv4 address".to_string())
}

struct IcmpSocket {
    tx: TransportSender,
    rx: TransportReceiver,
    target: Ipv4Addr,
    identifier: u16,
}

impl EchoSocket for IcmpSocket {
    fn send_request(&mut self, sequence: u16) -> io::Result<()> {
        let mut buf = [0u8; ECHO_REQUEST_LEN];
        let mut packet = MutableEchoRequestPacket::new(&mut buf)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "echo buffer too small"))?;
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_icmp_code(IcmpCodes::NoCode);
        packet.set_identifier(self.identifier);
        packet.set_sequence_number(sequence);
        packet.set_checksum(0);
        let checksum = IcmpPacket::new(packet.packet())
            .map(|p| icmp::checksum(&p))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "echo buffer too small"))?;
        packet.set_checksum(checksum);
        self.tx.send_to(packet, IpAddr::V4(self.target))?;
        Ok(())
    }

    fn wait_reply(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut replies = icmp_packet_iter(&mut self.rx);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let Some((packet, source)) = replies.next_with_timeout(remaining)? else {
                return Ok(false);
            };
            // Raw sockets see every ICMP packet on the host.
            if source != IpAddr::V4(self.target) || packet.get_icmp_type() != IcmpTypes::EchoReply {
                continue;
            }
            if EchoReplyPacket::new(packet.packet())
                .is_some_and(|reply| reply.get_identifier() == self.identifier)
            {
                return Ok(true);
            }
        }
    }
}

/// Most recent reply time for one observer session.
///
/// Written by the echo loop, read by the ticker. Stored as nanoseconds since
/// `origin` plus one so that zero means "never".
#[derive(Debug)]
pub struct LivenessState {
    origin: Instant,
    last_reply: AtomicU64,
}

impl LivenessState {
    pub fn new(origin: Instant) -> Self {
        Self {
            origin,
            last_reply: AtomicU64::new(0),
        }
    }

    pub fn record_reply_at(&self, at: Instant) {
        let nanos = u64::try_from(at.saturating_duration_since(self.origin).as_nanos())
            .unwrap_or(u64::MAX - 1);
        self.last_reply.fetch_max(nanos + 1, Ordering::AcqRel);
    }

    /// `now < last_reply + staleness`. A state with no replies is never online.
    pub fn is_online_at(&self, now: Instant, staleness: Duration) -> bool {
        match self.last_reply.load(Ordering::Acquire) {
            0 => false,
            stored => now < self.origin + Duration::from_nanos(stored - 1) + staleness,
        }
    }
}

/// Timing for [`observe`].
#[derive(Debug, Clone, Copy)]
pub struct ObserveOptions {
    pub tick: Duration,
    pub staleness: Duration,
    pub echo_interval: Duration,
}

impl ObserveOptions {
    fn check(&self) -> Result<(), ActionError> {
        if self.tick.is_zero() || self.echo_interval.is_zero() {
            return Err(ActionError::validation(
                "probe tick and echo interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Raises the echo loop's stop flag when dropped, so the blocking loop ends
/// even if the observing future is aborted or unwinds.
struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl From<&ProbeConfig> for ObserveOptions {
    fn from(config: &ProbeConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_ms),
            staleness: Duration::from_millis(config.staleness_ms),
            echo_interval: Duration::from_millis(config.echo_interval_ms),
        }
    }
}

/// One-shot check: `true` if `host` answered within `timeout`.
///
/// Silence and send failures (e.g. no route) are `Ok(false)`. Only failing to
/// set up the probe is an error.
pub async fn check_online(
    pinger: Arc<dyn Pinger>,
    host: &str,
    timeout: Duration,
    echo_interval: Duration,
) -> Result<bool, ActionError> {
    validate_host(host)?;
    if echo_interval.is_zero() {
        return Err(ActionError::validation("probe echo interval must be greater than zero"));
    }
    let host = host.to_string();
    let task_host = host.clone();
    tokio::task::spawn_blocking(move || {
        let mut socket = pinger.open(&task_host)?;
        Ok(echo_until_reply(socket.as_mut(), &task_host, timeout, echo_interval))
    })
    .await
    .map_err(|e| ActionError::ProbeConstruction {
        host,
        reason: format!("probe task failed: {e}"),
    })?
}

fn echo_until_reply(
    socket: &mut dyn EchoSocket,
    host: &str,
    timeout: Duration,
    echo_interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    let mut sequence: u16 = 0;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        if let Err(e) = socket.send_request(sequence) {
            debug!("Echo request to {host} failed: {e}");
        }
        sequence = sequence.wrapping_add(1);
        let wait = echo_interval.min(deadline - now);
        match socket.wait_reply(wait) {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => {
                debug!("Echo receive for {host} failed: {e}");
                return false;
            }
        }
    }
}

/// Continuously probe `host`, calling `on_update` once per tick.
///
/// Returns when `cancel` fires or `on_update` breaks. Before returning, the
/// echo loop is stopped and joined; no reply is recorded and no update is
/// delivered after that point.
pub async fn observe<F>(
    pinger: Arc<dyn Pinger>,
    host: &str,
    options: ObserveOptions,
    mut on_update: F,
    cancel: CancellationToken,
) -> Result<(), ActionError>
where
    F: FnMut(bool) -> ControlFlow<()> + Send,
{
    validate_host(host)?;
    options.check()?;
    let task_err = |e: tokio::task::JoinError| ActionError::ProbeConstruction {
        host: host.to_string(),
        reason: format!("probe task failed: {e}"),
    };

    let open_host = host.to_string();
    let socket = tokio::task::spawn_blocking(move || pinger.open(&open_host))
        .await
        .map_err(task_err)??;

    let state = Arc::new(LivenessState::new(Instant::now()));
    let stop = Arc::new(AtomicBool::new(false));
    let stop_guard = StopOnDrop(Arc::clone(&stop));
    let echo = {
        let state = Arc::clone(&state);
        let stop = Arc::clone(&stop);
        let host = host.to_string();
        tokio::task::spawn_blocking(move || {
            echo_loop(socket, &host, &state, &stop, options.echo_interval);
        })
    };

    let start = tokio::time::Instant::now() + options.tick;
    let mut ticker = tokio::time::interval_at(start, options.tick);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let online = state.is_online_at(Instant::now(), options.staleness);
                if on_update(online).is_break() {
                    break;
                }
            }
        }
    }

    drop(stop_guard);
    if let Err(e) = echo.await {
        warn!("Echo loop for {host} ended abnormally: {e}");
    }
    debug!("Stopped observing {host}");
    Ok(())
}

fn echo_loop(
    mut socket: Box<dyn EchoSocket>,
    host: &str,
    state: &LivenessState,
    stop: &AtomicBool,
    echo_interval: Duration,
) {
    let mut sequence: u16 = 0;
    let mut next_send = Instant::now();
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= next_send {
            if let Err(e) = socket.send_request(sequence) {
                debug!("Echo request to {host} failed: {e}");
            }
            sequence = sequence.wrapping_add(1);
            next_send = now + echo_interval;
        }
        let wait = next_send.saturating_duration_since(now).min(STOP_POLL);
        match socket.wait_reply(wait) {
            Ok(true) if !stop.load(Ordering::Acquire) => state.record_reply_at(Instant::now()),
            Ok(_) => {}
            Err(e) => {
                debug!("Echo receive for {host} failed: {e}");
                std::thread::sleep(wait);
            }
        }
    }
}
