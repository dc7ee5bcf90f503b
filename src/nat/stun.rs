//! Minimal STUN (RFC 5389) binding-request client plus the RFC 3489 §9.3
//! `CHANGE-REQUEST` attribute used to probe NAT filtering behavior.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use rand::RngCore;
use thiserror::Error;
use tokio::net::UdpSocket;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_CHANGE_REQUEST: u16 = 0x0003;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const CHANGE_IP_FLAG: u32 = 0x0000_0004;
const CHANGE_PORT_FLAG: u32 = 0x0000_0002;
const HEALTH_MAX: i32 = 100;
const HEALTH_MIN: i32 = 0;
const HEALTH_SUCCESS_DELTA: i32 = 10;
const HEALTH_FAILURE_DELTA: i32 = 20;

#[derive(Debug, Error)]
pub enum StunError {
    #[error("stun io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("stun request timed out")]
    Timeout,
    #[error("malformed stun response: {0}")]
    Malformed(String),
}

/// One configured STUN server plus its running health score (§4.15: "health
/// scores per STUN server (0-100, +10 on success, -20 on failure, sort by
/// score)").
#[derive(Debug)]
pub struct StunServer {
    addr: SocketAddr,
    score: AtomicI32,
}

impl Clone for StunServer {
    fn clone(&self) -> Self {
        StunServer { addr: self.addr, score: AtomicI32::new(self.score.load(Ordering::Relaxed)) }
    }
}

impl StunServer {
    pub fn new(addr: SocketAddr) -> Self {
        StunServer { addr, score: AtomicI32::new(HEALTH_MAX) }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn score(&self) -> i32 {
        self.score.load(Ordering::Relaxed)
    }

    pub fn record_success(&self) {
        self.score.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some((s + HEALTH_SUCCESS_DELTA).min(HEALTH_MAX))).ok();
    }

    pub fn record_failure(&self) {
        self.score.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |s| Some((s - HEALTH_FAILURE_DELTA).max(HEALTH_MIN))).ok();
    }

    /// Send one binding request, optionally asking the server to answer from
    /// a different IP and/or port, and return the externally mapped address
    /// this host was seen at.
    pub async fn probe(
        &self,
        bind_addr: SocketAddr,
        timeout: Duration,
        change_ip: bool,
        change_port: bool,
    ) -> Result<SocketAddr, StunError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let mut transaction_id = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut transaction_id);

        let request = encode_request(&transaction_id, change_ip, change_port);
        socket.send_to(&request, self.addr).await?;

        let mut buf = [0u8; 512];
        let len = tokio::time::timeout(timeout, socket.recv(&mut buf)).await.map_err(|_| StunError::Timeout)??;
        decode_response(&buf[..len], &transaction_id)
    }
}

fn encode_request(transaction_id: &[u8; 12], change_ip: bool, change_port: bool) -> Vec<u8> {
    let mut attrs = Vec::new();
    if change_ip || change_port {
        let mut flags = 0u32;
        if change_ip {
            flags |= CHANGE_IP_FLAG;
        }
        if change_port {
            flags |= CHANGE_PORT_FLAG;
        }
        write_attr(&mut attrs, ATTR_CHANGE_REQUEST, &flags.to_be_bytes());
    }

    let mut out = Vec::with_capacity(20 + attrs.len());
    out.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    out.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
    out.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    out.extend_from_slice(transaction_id);
    out.extend_from_slice(&attrs);
    out
}

fn write_attr(out: &mut Vec<u8>, attr_type: u16, value: &[u8]) {
    out.extend_from_slice(&attr_type.to_be_bytes());
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value);
    let padding = (4 - value.len() % 4) % 4;
    out.extend(std::iter::repeat(0u8).take(padding));
}

fn decode_response(buf: &[u8], transaction_id: &[u8; 12]) -> Result<SocketAddr, StunError> {
    if buf.len() < 20 {
        return Err(StunError::Malformed("response shorter than stun header".into()));
    }
    let msg_type = u16::from_be_bytes([buf[0], buf[1]]);
    if msg_type != BINDING_SUCCESS {
        return Err(StunError::Malformed(format!("unexpected stun message type {msg_type:#06x}")));
    }
    let msg_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if cookie != MAGIC_COOKIE {
        return Err(StunError::Malformed("bad magic cookie".into()));
    }
    if &buf[8..20] != transaction_id {
        return Err(StunError::Malformed("transaction id mismatch".into()));
    }
    if buf.len() < 20 + msg_len {
        return Err(StunError::Malformed("truncated stun attributes".into()));
    }

    let mut cursor = &buf[20..20 + msg_len];
    let mut fallback: Option<SocketAddr> = None;
    while cursor.len() >= 4 {
        let attr_type = u16::from_be_bytes([cursor[0], cursor[1]]);
        let attr_len = u16::from_be_bytes([cursor[2], cursor[3]]) as usize;
        let padded_len = attr_len + (4 - attr_len % 4) % 4;
        if cursor.len() < 4 + padded_len {
            break;
        }
        let value = &cursor[4..4 + attr_len];
        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_xor_mapped_address(value, transaction_id),
            ATTR_MAPPED_ADDRESS => fallback = decode_mapped_address(value).ok(),
            _ => {}
        }
        cursor = &cursor[4 + padded_len..];
    }

    fallback.ok_or_else(|| StunError::Malformed("no mapped address attribute in response".into()))
}

fn decode_mapped_address(value: &[u8]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::Malformed("mapped address attribute too short".into()));
    }
    let family = value[1];
    let port = u16::from_be_bytes([value[2], value[3]]);
    let ip = match family {
        0x01 if value.len() >= 8 => IpAddr::V4(Ipv4Addr::new(value[4], value[5], value[6], value[7])),
        0x02 if value.len() >= 20 => IpAddr::V6(Ipv6Addr::from(<[u8; 16]>::try_from(&value[4..20]).unwrap())),
        _ => return Err(StunError::Malformed("unsupported mapped address family".into())),
    };
    Ok(SocketAddr::new(ip, port))
}

fn decode_xor_mapped_address(value: &[u8], transaction_id: &[u8; 12]) -> Result<SocketAddr, StunError> {
    if value.len() < 4 {
        return Err(StunError::Malformed("xor mapped address attribute too short".into()));
    }
    let family = value[1];
    let xport = u16::from_be_bytes([value[2], value[3]]);
    let port = xport ^ (MAGIC_COOKIE >> 16) as u16;
    let ip = match family {
        0x01 if value.len() >= 8 => {
            let xaddr = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
            let addr = xaddr ^ MAGIC_COOKIE;
            IpAddr::V4(Ipv4Addr::from(addr))
        }
        0x02 if value.len() >= 20 => {
            let mut key = [0u8; 16];
            key[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
            key[4..16].copy_from_slice(transaction_id);
            let mut octets = [0u8; 16];
            for i in 0..16 {
                octets[i] = value[4 + i] ^ key[i];
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(StunError::Malformed("unsupported xor mapped address family".into())),
    };
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_mapped_address_round_trips_ipv4() {
        let transaction_id = [7u8; 12];
        let real_addr = SocketAddr::from(([203, 0, 113, 5], 54321));
        let port_bits = 54321u16 ^ (MAGIC_COOKIE >> 16) as u16;
        let ip_bits = u32::from(Ipv4Addr::new(203, 0, 113, 5)) ^ MAGIC_COOKIE;

        let mut value = vec![0u8, 0x01];
        value.extend_from_slice(&port_bits.to_be_bytes());
        value.extend_from_slice(&ip_bits.to_be_bytes());

        let decoded = decode_xor_mapped_address(&value, &transaction_id).unwrap();
        assert_eq!(decoded, real_addr);
    }

    #[test]
    fn health_score_clamps_at_bounds() {
        let server = StunServer::new(SocketAddr::from(([127, 0, 0, 1], 3478)));
        for _ in 0..20 {
            server.record_success();
        }
        assert_eq!(server.score(), HEALTH_MAX);
        for _ in 0..20 {
            server.record_failure();
        }
        assert_eq!(server.score(), HEALTH_MIN);
    }

    #[test]
    fn rejects_wrong_transaction_id() {
        let mut buf = vec![0u8; 20];
        buf[0..2].copy_from_slice(&BINDING_SUCCESS.to_be_bytes());
        buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        let result = decode_response(&buf, &[9u8; 12]);
        assert!(result.is_err());
    }
}
