//! PROXY protocol v1/v2 support for the listening sockets.
//!
//! When a load balancer fronts the proxy it can prepend a PROXY protocol
//! header carrying the real client address. [`accept`] consumes the header,
//! reports the rewritten peer address, and replays any non-header bytes to
//! the TLS/HTTP machinery behind it. Connections without a header pass
//! through untouched.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// PROXY protocol v2 signature.
const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// PROXY protocol v1 prefix.
const V1_PREFIX: &[u8] = b"PROXY ";

/// Longest permitted v1 header line, per the protocol spec.
const V1_MAX_LEN: usize = 107;

/// Read an optional PROXY protocol header from the stream.
///
/// Returns the stream (with any sniffed non-header bytes replayed) and the
/// effective peer address. The first 12 bytes are sniffed unconditionally;
/// both TLS ClientHellos and HTTP requests are longer than that, so a
/// client that never speaks is the only one that can stall here.
pub async fn accept<S>(mut stream: S, peer: SocketAddr) -> io::Result<(ProxiedStream<S>, SocketAddr)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut sniff = [0u8; 12];
    stream.read_exact(&mut sniff).await?;

    if sniff == V2_SIGNATURE {
        let addr = read_v2(&mut stream).await?;
        return Ok((ProxiedStream::new(stream, Vec::new()), addr.unwrap_or(peer)));
    }

    if sniff.starts_with(V1_PREFIX) {
        let addr = read_v1(&mut stream, &sniff).await?;
        return Ok((ProxiedStream::new(stream, Vec::new()), addr.unwrap_or(peer)));
    }

    // Not a PROXY header: hand the sniffed bytes back.
    Ok((ProxiedStream::new(stream, sniff.to_vec()), peer))
}

/// Parse the remainder of a v2 header. The 12-byte signature has been
/// consumed.
async fn read_v2<S: AsyncRead + Unpin>(stream: &mut S) -> io::Result<Option<SocketAddr>> {
    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;

    let version_command = head[0];
    let family_protocol = head[1];
    let length = u16::from_be_bytes([head[2], head[3]]) as usize;

    let mut payload = vec![0u8; length];
    stream.read_exact(&mut payload).await?;

    if version_command >> 4 != 2 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported PROXY protocol version",
        ));
    }

    // LOCAL command: health checks and the like, keep the socket address.
    if version_command & 0x0F != 0x01 {
        return Ok(None);
    }

    match family_protocol {
        // AF_INET / STREAM
        0x11 => {
            if payload.len() < 12 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "short PROXY v2 IPv4 address block",
                ));
            }
            let source = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
            let port = u16::from_be_bytes([payload[8], payload[9]]);
            Ok(Some(SocketAddr::new(IpAddr::V4(source), port)))
        }
        // AF_INET6 / STREAM
        0x21 => {
            if payload.len() < 36 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "short PROXY v2 IPv6 address block",
                ));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&payload[0..16]);
            let port = u16::from_be_bytes([payload[32], payload[33]]);
            Ok(Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)))
        }
        // AF_UNSPEC or non-TCP: ignore the addresses.
        _ => Ok(None),
    }
}

/// Parse a v1 header. `sniffed` holds the first 12 bytes already read.
async fn read_v1<S: AsyncRead + Unpin>(
    stream: &mut S,
    sniffed: &[u8],
) -> io::Result<Option<SocketAddr>> {
    let mut line = sniffed.to_vec();
    let mut byte = [0u8; 1];

    while !line.ends_with(b"\r\n") {
        if line.len() >= V1_MAX_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "PROXY v1 header too long",
            ));
        }
        stream.read_exact(&mut byte).await?;
        line.push(byte[0]);
    }

    let line = String::from_utf8(line)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed PROXY v1 header"))?;
    let mut fields = line.trim_end().split(' ');

    let _proxy = fields.next();
    match fields.next() {
        Some("TCP4") | Some("TCP6") => {}
        Some("UNKNOWN") => return Ok(None),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed PROXY v1 header",
            ))
        }
    }

    let source_ip = fields.next();
    let _dest_ip = fields.next();
    let source_port = fields.next();

    let (Some(ip), Some(port)) = (source_ip, source_port) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "malformed PROXY v1 header",
        ));
    };

    let ip: IpAddr = ip
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed PROXY v1 address"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "malformed PROXY v1 port"))?;

    Ok(Some(SocketAddr::new(ip, port)))
}

/// A stream with a replayed prefix: bytes sniffed while looking for a PROXY
/// header are served before the underlying stream.
pub struct ProxiedStream<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> ProxiedStream<S> {
    fn new(inner: S, prefix: Vec<u8>) -> Self {
        ProxiedStream {
            prefix,
            offset: 0,
            inner,
        }
    }

    /// Wrap a stream without consuming anything.
    pub fn passthrough(inner: S) -> Self {
        ProxiedStream::new(inner, Vec::new())
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ProxiedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.offset < this.prefix.len() {
            let available = &this.prefix[this.offset..];
            let take = available.len().min(buf.remaining());
            buf.put_slice(&available[..take]);
            this.offset += take;
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ProxiedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4321".parse().unwrap()
    }

    async fn run(input: &[u8]) -> (Vec<u8>, SocketAddr) {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();

        let (mut stream, addr) = accept(server, peer()).await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        (rest, addr)
    }

    #[tokio::test]
    async fn v1_headers_rewrite_the_peer() {
        let (rest, addr) = run(b"PROXY TCP4 203.0.113.9 10.0.0.1 56324 443\r\npayload").await;
        assert_eq!(addr, "203.0.113.9:56324".parse().unwrap());
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn v1_unknown_keeps_the_socket_peer() {
        let (rest, addr) = run(b"PROXY UNKNOWN\r\npayload").await;
        assert_eq!(addr, peer());
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn v2_ipv4_headers_rewrite_the_peer() {
        let mut input = Vec::new();
        input.extend_from_slice(&V2_SIGNATURE);
        input.push(0x21); // version 2, PROXY command
        input.push(0x11); // AF_INET, STREAM
        input.extend_from_slice(&12u16.to_be_bytes());
        input.extend_from_slice(&[203, 0, 113, 9]); // source
        input.extend_from_slice(&[10, 0, 0, 1]); // destination
        input.extend_from_slice(&56324u16.to_be_bytes());
        input.extend_from_slice(&443u16.to_be_bytes());
        input.extend_from_slice(b"payload");

        let (rest, addr) = run(&input).await;
        assert_eq!(addr, "203.0.113.9:56324".parse().unwrap());
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn v2_local_keeps_the_socket_peer() {
        let mut input = Vec::new();
        input.extend_from_slice(&V2_SIGNATURE);
        input.push(0x20); // version 2, LOCAL command
        input.push(0x00); // AF_UNSPEC
        input.extend_from_slice(&0u16.to_be_bytes());
        input.extend_from_slice(b"payload");

        let (rest, addr) = run(&input).await;
        assert_eq!(addr, peer());
        assert_eq!(rest, b"payload");
    }

    #[tokio::test]
    async fn plain_connections_pass_through() {
        let (rest, addr) = run(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert_eq!(addr, peer());
        assert_eq!(rest, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
    }
}
