//! Wake-on-LAN magic packets.
//!
//! A magic packet is 6 bytes of `0xFF` followed by the target MAC repeated 16
//! times. There is no acknowledgment in the protocol, so sending is best-effort:
//! a failed write to one destination is logged and the remaining destinations
//! are still tried.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::address::{BroadcastTarget, HardwareAddress};
use crate::config::WakeConfig;

/// Total length of a magic packet payload.
pub const MAGIC_PACKET_LEN: usize = 6 + 16 * 6;

/// A validated wake request: which MAC to wake and where to send the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeRequest {
    pub mac: HardwareAddress,
    /// Empty means "use the configured default broadcast destinations".
    pub targets: Vec<BroadcastTarget>,
}

/// Build the magic packet payload for `mac`.
pub fn magic_packet(mac: &HardwareAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFF; MAGIC_PACKET_LEN];
    let octets = mac.octets();
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&octets);
    }
    packet
}

/// Transmits one datagram. Abstracted so tests can count and inspect sends.
#[async_trait]
pub trait PacketSender: Send + Sync {
    async fn send_to(&self, payload: &[u8], target: BroadcastTarget) -> std::io::Result<()>;
}

/// [`PacketSender`] backed by a fresh broadcast-enabled UDP socket per send.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpPacketSender;

#[async_trait]
impl PacketSender for UdpPacketSender {
    async fn send_to(&self, payload: &[u8], target: BroadcastTarget) -> std::io::Result<()> {
        let bind: SocketAddr = match target.ip {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.set_broadcast(true)?;
        socket
            .send_to(payload, SocketAddr::new(target.ip, target.port))
            .await?;
        Ok(())
    }
}

/// Resolve the destinations for a request: the listed targets in order, or
/// the configured broadcast address on each default port.
pub fn destinations(request: &WakeRequest, defaults: &WakeConfig) -> Vec<BroadcastTarget> {
    if request.targets.is_empty() {
        defaults
            .ports
            .iter()
            .map(|&port| BroadcastTarget::new(defaults.broadcast, port))
            .collect()
    } else {
        request.targets.clone()
    }
}

/// Send the magic packet for `request` to every destination.
///
/// Returns the number of destinations the packet was handed to successfully.
pub async fn send(request: &WakeRequest, defaults: &WakeConfig, sender: &dyn PacketSender) -> usize {
    let packet = magic_packet(&request.mac);
    let mut delivered = 0;
    for target in destinations(request, defaults) {
        match sender.send_to(&packet, target).await {
            Ok(()) => {
                debug!("Magic packet for {} sent to {target}", request.mac);
                delivered += 1;
            }
            Err(e) => warn!("Magic packet for {} to {target} failed: {e}", request.mac),
        }
    }
    delivered
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every send; optionally fails sends to one port.
    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub sent: Mutex<Vec<(Vec<u8>, BroadcastTarget)>>,
        pub fail_port: Option<u16>,
    }

    #[async_trait]
    impl PacketSender for RecordingSender {
        async fn send_to(&self, payload: &[u8], target: BroadcastTarget) -> std::io::Result<()> {
            self.sent.lock().unwrap().push((payload.to_vec(), target));
            if self.fail_port == Some(target.port) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "broadcast not permitted",
                ));
            }
            Ok(())
        }
    }

    fn mac() -> HardwareAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_magic_packet_layout() {
        let packet = magic_packet(&mac());
        assert_eq!(packet.len(), 102);
        assert!(packet[..6].iter().all(|&b| b == 0xFF));
        for rep in packet[6..].chunks(6) {
            assert_eq!(rep, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }
    }

    #[tokio::test]
    async fn test_default_destinations_cover_both_ports() {
        let sender = RecordingSender::default();
        let req = WakeRequest {
            mac: mac(),
            targets: vec![],
        };
        let delivered = send(&req, &WakeConfig::default(), &sender).await;
        assert_eq!(delivered, 2);

        let sent = sender.sent.lock().unwrap();
        let dests: Vec<String> = sent.iter().map(|(_, t)| t.to_string()).collect();
        assert_eq!(dests, ["255.255.255.255:7", "255.255.255.255:9"]);
        assert!(sent.iter().all(|(p, _)| p.len() == MAGIC_PACKET_LEN));
    }

    #[tokio::test]
    async fn test_every_listed_target_receives_packet() {
        let sender = RecordingSender::default();
        let targets = vec![
            BroadcastTarget::parse("192.168.1.255", 9).unwrap(),
            BroadcastTarget::parse("10.0.0.255", 7).unwrap(),
            BroadcastTarget::parse("10.0.1.255", 4000).unwrap(),
        ];
        let req = WakeRequest {
            mac: mac(),
            targets: targets.clone(),
        };
        send(&req, &WakeConfig::default(), &sender).await;

        let sent: Vec<BroadcastTarget> = sender.sent.lock().unwrap().iter().map(|(_, t)| *t).collect();
        assert_eq!(sent, targets);
    }

    #[tokio::test]
    async fn test_failed_send_does_not_abort_fan_out() {
        let sender = RecordingSender {
            fail_port: Some(7),
            ..Default::default()
        };
        let req = WakeRequest {
            mac: mac(),
            targets: vec![],
        };
        let delivered = send(&req, &WakeConfig::default(), &sender).await;
        assert_eq!(delivered, 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
    }
}
