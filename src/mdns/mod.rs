//! mDNS local discovery (§4.16, boundary collaborator): advertises
//! `_p2p._udp.local` over multicast DNS and listens for the same service
//! from peers on the LAN, feeding discovered addresses into the
//! [`crate::discovery::DiscoveryCache`].
//!
//! Grounded in [`crate::nat::stun`]'s hand-rolled wire-protocol-over-UDP
//! shape and in [`crate::identify`]'s `/p2p/<id>` tail extraction and
//! self-discovery suppression.

mod wire;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::discovery::AddrInfo;
use crate::error::Error;
use crate::host::Host;
use crate::multiaddr::{Multiaddr, Protocol};
use crate::transport::Transport;

use wire::Message;

const LOG_TARGET: &str = "junction::mdns";
const SERVICE_NAME: &str = "_p2p._udp.local";
const MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
const MULTICAST_PORT: u16 = 5353;
const TXT_PREFIX: &str = "dnsaddr=";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MdnsConfig {
    pub query_interval: Duration,
    pub record_ttl: u32,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        MdnsConfig { query_interval: Duration::from_secs(120), record_ttl: 120 }
    }
}

/// Emitted (non-stateful) each time a fresh peer is discovered via mDNS.
#[derive(Debug, Clone)]
pub struct MdnsPeerDiscovered {
    pub info: AddrInfo,
}

/// Advertises this host's listen addresses and discovers others via
/// `_p2p._udp.local` (§4.16). One socket serves both roles, matching the
/// single-process query/respond loop real mDNS responders use.
pub struct MdnsService<T: Transport> {
    host: Arc<Host<T>>,
    config: MdnsConfig,
}

impl<T: Transport + 'static> MdnsService<T> {
    pub fn new(host: Arc<Host<T>>, config: MdnsConfig) -> Self {
        MdnsService { host, config }
    }

    /// Join the mDNS multicast group and spawn the advertise/listen loop.
    pub async fn spawn(self: Arc<Self>, cancel: CancellationToken) -> Result<(), Error> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT)).await?;
        socket.join_multicast_v4(MULTICAST_ADDR, Ipv4Addr::UNSPECIFIED)?;
        let socket = Arc::new(socket);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.query_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.send_query(&socket).await {
                            warn!(target: LOG_TARGET, error = %e, "failed to send mdns query");
                        }
                        if let Err(e) = self.send_announcement(&socket).await {
                            warn!(target: LOG_TARGET, error = %e, "failed to send mdns announcement");
                        }
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src)) => self.handle_packet(&socket, &buf[..len], src).await,
                            Err(e) => warn!(target: LOG_TARGET, error = %e, "mdns socket read failed"),
                        }
                    }
                }
            }
        });
        Ok(())
    }

    fn instance_name(&self) -> String {
        format!("{}.{SERVICE_NAME}", self.host.id())
    }

    /// Local addresses advertised under our own instance name, with the
    /// local peer id appended when an address doesn't already carry one.
    fn local_addrs(&self) -> Vec<Multiaddr> {
        self.host
            .addrs()
            .into_iter()
            .map(|addr| {
                if addr.peer_id().is_some() {
                    addr
                } else {
                    addr.with(Protocol::P2p(self.host.id().clone()))
                }
            })
            .collect()
    }

    async fn send_query(&self, socket: &UdpSocket) -> Result<(), Error> {
        let message = Message::query(SERVICE_NAME);
        send(socket, &message.encode()).await
    }

    async fn send_announcement(&self, socket: &UdpSocket) -> Result<(), Error> {
        let addrs = self.local_addrs();
        if addrs.is_empty() {
            return Ok(());
        }
        let txt: Vec<String> = addrs.iter().map(|a| format!("{TXT_PREFIX}{a}")).collect();
        let message = Message::announcement(SERVICE_NAME, &self.instance_name(), &txt, self.config.record_ttl);
        send(socket, &message.encode()).await
    }

    async fn handle_packet(&self, socket: &UdpSocket, buf: &[u8], src: SocketAddr) {
        let message = match Message::decode(buf) {
            Ok(m) => m,
            Err(e) => {
                trace!(target: LOG_TARGET, error = %e, src = %src, "dropping malformed mdns packet");
                return;
            }
        };

        if !message.is_response() && message.questions.iter().any(|q| q.name == SERVICE_NAME) {
            if let Err(e) = self.send_announcement(socket).await {
                warn!(target: LOG_TARGET, error = %e, "failed to answer mdns query");
            }
        }

        if message.is_response() {
            for record in message.txt_records() {
                self.handle_txt_record(&record.name, &record.strings);
            }
        }
    }

    fn handle_txt_record(&self, owner: &str, strings: &[String]) {
        if !owner.ends_with(SERVICE_NAME) {
            return;
        }

        let mut addrs = Vec::new();
        for s in strings {
            let Some(raw) = s.strip_prefix(TXT_PREFIX) else { continue };
            match Multiaddr::parse(raw) {
                Ok(addr) => addrs.push(addr),
                Err(e) => trace!(target: LOG_TARGET, error = %e, raw = raw, "unparseable dnsaddr entry"),
            }
        }
        if addrs.is_empty() {
            return;
        }

        let peer = match addrs.iter().find_map(|a| a.peer_id().cloned()) {
            Some(p) => p,
            None => {
                trace!(target: LOG_TARGET, owner = owner, "dnsaddr entries carry no /p2p/ tail, ignoring");
                return;
            }
        };

        if &peer == self.host.id() {
            return;
        }

        debug!(target: LOG_TARGET, peer = %peer, count = addrs.len(), "discovered peer via mdns");
        let info = AddrInfo { peer: peer.clone(), addrs };
        self.host.network().discovery().insert(info.clone());
        self.host.event_bus().emitter::<MdnsPeerDiscovered>(false).emit(MdnsPeerDiscovered { info });
    }
}

async fn send(socket: &UdpSocket, bytes: &[u8]) -> Result<(), Error> {
    socket.send_to(bytes, SocketAddrV4::new(MULTICAST_ADDR, MULTICAST_PORT)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::wire::Message;

    #[test]
    fn query_round_trips() {
        let message = Message::query("_p2p._udp.local");
        let encoded = message.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.questions.len(), 1);
        assert_eq!(decoded.questions[0].name, "_p2p._udp.local");
    }

    #[test]
    fn announcement_round_trips_txt_strings() {
        let strings = vec!["dnsaddr=/ip4/1.2.3.4/tcp/4001".to_string(), "dnsaddr=/ip4/1.2.3.4/tcp/4002".to_string()];
        let message = Message::announcement("_p2p._udp.local", "abc.local", &strings, 120);
        let encoded = message.encode();
        let decoded = Message::decode(&encoded).unwrap();
        let txt = decoded.txt_records();
        assert_eq!(txt.len(), 1);
        assert_eq!(txt[0].strings, strings);
    }
}
