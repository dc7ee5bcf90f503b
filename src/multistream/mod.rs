//! Multistream-select negotiator (§4.11): wire-level protocol selection on a stream.

mod router;

pub use router::Router;

use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

const HEADER: &str = "/multistream/1.0.0";
const NA: &str = "na";
/// Generous enough for any real protocol id while still bounding a malicious peer.
const MAX_LINE_LEN: usize = 64 * 1024;

async fn write_line<W: AsyncWrite + Unpin>(io: &mut W, line: &str) -> Result<(), Error> {
    let mut payload = line.as_bytes().to_vec();
    payload.push(b'\n');
    let mut len_buf = unsigned_varint::encode::usize_buffer();
    let len_bytes = unsigned_varint::encode::usize(payload.len(), &mut len_buf);
    io.write_all(len_bytes).await?;
    io.write_all(&payload).await?;
    io.flush().await?;
    Ok(())
}

async fn read_line<R: AsyncRead + Unpin>(io: &mut R) -> Result<String, Error> {
    let len = read_varint_len(io).await?;
    if len == 0 || len > MAX_LINE_LEN {
        return Err(Error::InvalidFormat("multistream line too long".into()));
    }
    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;
    if buf.last() != Some(&b'\n') {
        return Err(Error::InvalidFormat("multistream line missing newline".into()));
    }
    buf.pop();
    String::from_utf8(buf).map_err(|e| Error::InvalidFormat(e.to_string()))
}

async fn read_varint_len<R: AsyncRead + Unpin>(io: &mut R) -> Result<usize, Error> {
    let mut buf = [0u8; 1];
    let mut encoded = Vec::with_capacity(10);
    loop {
        io.read_exact(&mut buf).await?;
        encoded.push(buf[0]);
        if buf[0] & 0x80 == 0 {
            break;
        }
        if encoded.len() > 10 {
            return Err(Error::InvalidFormat("varint too long".into()));
        }
    }
    let (len, _) = unsigned_varint::decode::usize(&encoded)
        .map_err(|e| Error::InvalidFormat(e.to_string()))?;
    Ok(len)
}

/// Initiator side (§4.11): propose candidates in order until one is echoed
/// back or the list is exhausted.
pub async fn negotiate_outbound<IO: AsyncRead + AsyncWrite + Unpin>(
    io: &mut IO,
    candidates: &[String],
) -> Result<String, Error> {
    write_line(io, HEADER).await?;
    let got_header = read_line(io).await?;
    if got_header != HEADER {
        return Err(Error::InvalidFormat(format!("unexpected multistream header: {got_header}")));
    }

    for candidate in candidates {
        write_line(io, candidate).await?;
        let reply = read_line(io).await?;
        if &reply == candidate {
            return Ok(candidate.clone());
        }
        if reply != NA {
            return Err(Error::InvalidFormat(format!("unexpected multistream reply: {reply}")));
        }
    }
    Err(Error::NoMutualProtocol)
}

/// Responder side (§4.11): echo the header, then read candidates until the
/// router picks a handler or the remote gives up.
pub async fn negotiate_inbound<IO: AsyncRead + AsyncWrite + Unpin>(
    io: &mut IO,
    router: &Router,
) -> Result<String, Error> {
    let got_header = read_line(io).await?;
    if got_header != HEADER {
        return Err(Error::InvalidFormat(format!("unexpected multistream header: {got_header}")));
    }
    write_line(io, HEADER).await?;

    loop {
        let candidate = read_line(io).await?;
        if router.matches(&candidate) {
            write_line(io, &candidate).await?;
            return Ok(candidate);
        }
        write_line(io, NA).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use crate::transport::Transport;

    #[tokio::test]
    async fn negotiates_matching_protocol() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/1").unwrap();
        let server_transport = net.transport();
        let mut listener = {
            use crate::transport::Listener;
            server_transport.listen(&addr).await.unwrap()
        };

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client = tokio::spawn(async move {
            let mut conn = client_transport.dial(&addr2, None).await.unwrap();
            negotiate_outbound(&mut conn, &["/foo/1.0.0".to_string(), "/echo/1.0.0".to_string()]).await
        });

        let mut server_conn = {
            use crate::transport::Listener;
            listener.accept().await.unwrap()
        };
        let mut router = Router::new();
        router.add_handler("/echo/1.0.0");
        let picked = negotiate_inbound(&mut server_conn, &router).await.unwrap();
        assert_eq!(picked, "/echo/1.0.0");
        assert_eq!(client.await.unwrap().unwrap(), "/echo/1.0.0");
    }

    #[tokio::test]
    async fn no_mutual_protocol() {
        let net = MemoryNetwork::new();
        let addr = crate::multiaddr::Multiaddr::parse("/ip4/127.0.0.1/tcp/2").unwrap();
        let server_transport = net.transport();
        let mut listener = {
            use crate::transport::Listener;
            server_transport.listen(&addr).await.unwrap()
        };

        let client_transport = net.transport();
        let addr2 = addr.clone();
        let client = tokio::spawn(async move {
            let mut conn = client_transport.dial(&addr2, None).await.unwrap();
            negotiate_outbound(&mut conn, &["/bar/1.0.0".to_string()]).await
        });

        let mut server_conn = {
            use crate::transport::Listener;
            listener.accept().await.unwrap()
        };
        let mut router = Router::new();
        router.add_handler("/foo/1.0.0");
        let result = negotiate_inbound(&mut server_conn, &router).await;
        // responder keeps reading candidates; the client only offers one and
        // then the connection is dropped, which surfaces as an IO/EOF error.
        assert!(result.is_err());
        assert!(matches!(client.await.unwrap(), Err(Error::NoMutualProtocol)));
    }
}
