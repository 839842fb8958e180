//! Tracker announces over HTTP(S) and UDP
//!
//! Trackers are only used for peer discovery; the client never uploads or
//! downloads payload, so every announce reports zero transfer.

use async_trait::async_trait;
use rand::Rng;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::time::Duration;
use tokio::net::UdpSocket;
use url::Url;

use crate::bencode::{self, Value};
use crate::error::TrackerError;
use crate::types::InfoHash;

/// Magic constant opening every BEP 15 connect request
const UDP_PROTOCOL_ID: i64 = 0x0417_2710_1980;

const UDP_ACTION_CONNECT: u32 = 0;
const UDP_ACTION_ANNOUNCE: u32 = 1;
const UDP_ACTION_ERROR: u32 = 3;

/// Amount reported as `left`; trackers hide seeders from clients claiming zero
const REPORTED_LEFT: u64 = 16 * 1024;

/// Peers requested per announce
const NUM_WANT: u32 = 50;

/// Parameters of a single announce
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Torrent being looked up
    pub info_hash: InfoHash,
    /// Our peer id
    pub peer_id: [u8; 20],
    /// Port advertised to other peers
    pub port: u16,
}

/// A tracker that can be asked for peers
#[async_trait]
pub trait Announce: Send + Sync {
    /// Announce and return the peers the tracker knows about
    async fn announce(&self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError>;

    /// Tracker URL as configured
    fn url(&self) -> &str;
}

/// Build the announcer matching a tracker URL's scheme
pub fn tracker_for_url(
    url: &str,
    http: &reqwest::Client,
    timeout: Duration,
) -> Result<Box<dyn Announce>, TrackerError> {
    let parsed = Url::parse(url).map_err(|e| TrackerError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(Box::new(HttpTracker {
            url: url.to_string(),
            http: http.clone(),
            timeout,
        })),
        "udp" => {
            let host = parsed.host_str().ok_or_else(|| TrackerError::InvalidUrl {
                url: url.to_string(),
                reason: "missing host".to_string(),
            })?;
            let port = parsed.port().ok_or_else(|| TrackerError::InvalidUrl {
                url: url.to_string(),
                reason: "missing port".to_string(),
            })?;
            Ok(Box::new(UdpTracker {
                url: url.to_string(),
                host: host.trim_matches(['[', ']']).to_string(),
                port,
                timeout,
            }))
        }
        other => Err(TrackerError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}

/// HTTP(S) tracker (BEP 3, compact responses per BEP 23)
pub struct HttpTracker {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpTracker {
    fn announce_url(&self, request: &AnnounceRequest) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1&numwant={}&event=started",
            self.url,
            separator,
            urlencoding::encode_binary(request.info_hash.as_bytes()),
            urlencoding::encode_binary(&request.peer_id),
            request.port,
            REPORTED_LEFT,
            NUM_WANT,
        )
    }
}

#[async_trait]
impl Announce for HttpTracker {
    async fn announce(&self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        let body = self
            .http
            .get(self.announce_url(request))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        parse_http_response(&body)
    }

    fn url(&self) -> &str {
        &self.url
    }
}

/// Extract peers from a bencoded HTTP announce response
pub fn parse_http_response(body: &[u8]) -> Result<Vec<SocketAddr>, TrackerError> {
    let response = bencode::decode(body)?;
    if response.as_dict().is_none() {
        return Err(TrackerError::Malformed(
            "response is not a dictionary".to_string(),
        ));
    }

    if let Some(reason) = response.get("failure reason") {
        let reason = reason
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        return Err(TrackerError::Failure(reason));
    }

    let mut peers = match response.get("peers") {
        Some(Value::Bytes(compact)) => parse_compact_v4(compact),
        Some(Value::List(entries)) => entries.iter().filter_map(parse_peer_dict).collect(),
        Some(_) => {
            return Err(TrackerError::Malformed(
                "peers is neither a string nor a list".to_string(),
            ));
        }
        None => Vec::new(),
    };

    if let Some(Value::Bytes(compact)) = response.get("peers6") {
        peers.extend(parse_compact_v6(compact));
    }

    Ok(peers)
}

fn parse_peer_dict(entry: &Value) -> Option<SocketAddr> {
    let ip = entry.get("ip")?.as_str()?.parse().ok()?;
    let port = u16::try_from(entry.get("port")?.as_int()?).ok()?;
    (port != 0).then_some(SocketAddr::new(ip, port))
}

/// Decode 6-byte IPv4 peer entries, skipping port 0
pub fn parse_compact_v4(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(6)
        .filter_map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            (port != 0).then_some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        })
        .collect()
}

/// Decode 18-byte IPv6 peer entries, skipping port 0
pub fn parse_compact_v6(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(18)
        .filter_map(|chunk| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&chunk[..16]);
            let port = u16::from_be_bytes([chunk[16], chunk[17]]);
            (port != 0).then_some(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(octets),
                port,
                0,
                0,
            )))
        })
        .collect()
}

/// UDP tracker (BEP 15)
pub struct UdpTracker {
    url: String,
    host: String,
    port: u16,
    timeout: Duration,
}

impl UdpTracker {
    async fn exchange(&self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        let target = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| TrackerError::Malformed(format!("{} did not resolve", self.host)))?;

        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;

        let mut buf = vec![0u8; 2048];

        // Connect
        let transaction_id: u32 = rand::thread_rng().r#gen();
        let mut packet = Vec::with_capacity(16);
        packet.extend_from_slice(&UDP_PROTOCOL_ID.to_be_bytes());
        packet.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
        packet.extend_from_slice(&transaction_id.to_be_bytes());
        socket.send(&packet).await?;

        let len = socket.recv(&mut buf).await?;
        let payload = check_udp_reply(&buf[..len], UDP_ACTION_CONNECT, transaction_id)?;
        let connection_id: [u8; 8] = payload
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| TrackerError::Malformed("short connect response".to_string()))?;

        // Announce
        let transaction_id: u32 = rand::thread_rng().r#gen();
        let key: u32 = rand::thread_rng().r#gen();
        let mut packet = Vec::with_capacity(98);
        packet.extend_from_slice(&connection_id);
        packet.extend_from_slice(&UDP_ACTION_ANNOUNCE.to_be_bytes());
        packet.extend_from_slice(&transaction_id.to_be_bytes());
        packet.extend_from_slice(request.info_hash.as_bytes());
        packet.extend_from_slice(&request.peer_id);
        packet.extend_from_slice(&0u64.to_be_bytes()); // downloaded
        packet.extend_from_slice(&REPORTED_LEFT.to_be_bytes());
        packet.extend_from_slice(&0u64.to_be_bytes()); // uploaded
        packet.extend_from_slice(&2u32.to_be_bytes()); // event: started
        packet.extend_from_slice(&0u32.to_be_bytes()); // ip: sender's
        packet.extend_from_slice(&key.to_be_bytes());
        packet.extend_from_slice(&NUM_WANT.to_be_bytes());
        packet.extend_from_slice(&request.port.to_be_bytes());
        socket.send(&packet).await?;

        let len = socket.recv(&mut buf).await?;
        let payload = check_udp_reply(&buf[..len], UDP_ACTION_ANNOUNCE, transaction_id)?;
        // interval, leechers, seeders
        let peers = payload
            .get(12..)
            .ok_or_else(|| TrackerError::Malformed("short announce response".to_string()))?;

        Ok(if target.is_ipv4() {
            parse_compact_v4(peers)
        } else {
            parse_compact_v6(peers)
        })
    }
}

/// Validate a UDP reply header and return the bytes after it
fn check_udp_reply(
    reply: &[u8],
    expected_action: u32,
    transaction_id: u32,
) -> Result<&[u8], TrackerError> {
    if reply.len() < 8 {
        return Err(TrackerError::Malformed(format!(
            "reply of {} bytes is too short",
            reply.len()
        )));
    }
    let action = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    let received_id = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);

    if received_id != transaction_id {
        return Err(TrackerError::Malformed("transaction id mismatch".to_string()));
    }
    if action == UDP_ACTION_ERROR {
        return Err(TrackerError::Failure(
            String::from_utf8_lossy(&reply[8..]).into_owned(),
        ));
    }
    if action != expected_action {
        return Err(TrackerError::Malformed(format!(
            "expected action {expected_action}, got {action}"
        )));
    }
    Ok(&reply[8..])
}

#[async_trait]
impl Announce for UdpTracker {
    async fn announce(&self, request: &AnnounceRequest) -> Result<Vec<SocketAddr>, TrackerError> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| TrackerError::Timeout(self.timeout))?
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AnnounceRequest {
        AnnounceRequest {
            info_hash: InfoHash::new([0xAA; 20]),
            peer_id: *b"-IF0100-abcdefghijkl",
            port: 42069,
        }
    }

    #[test]
    fn compact_peers_skip_port_zero() {
        let bytes = [127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0, 0, 1];
        let peers = parse_compact_v4(&bytes);
        assert_eq!(peers, vec!["127.0.0.1:6881".parse().unwrap()]);
    }

    #[test]
    fn dictionary_peers_and_peers6() {
        let mut peers6 = vec![0u8; 15];
        peers6.push(1);
        peers6.extend_from_slice(&6881u16.to_be_bytes());
        let body = bencode::encode(&Value::dict([
            ("interval", Value::Int(1800)),
            (
                "peers",
                Value::List(vec![Value::dict([
                    ("ip", Value::bytes("10.1.2.3")),
                    ("port", Value::Int(51413)),
                ])]),
            ),
            ("peers6", Value::Bytes(peers6)),
        ]));

        let peers = parse_http_response(&body).unwrap();
        assert_eq!(
            peers,
            vec![
                "10.1.2.3:51413".parse().unwrap(),
                "[::1]:6881".parse().unwrap()
            ]
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        let http = reqwest::Client::new();
        let result = tracker_for_url("wss://tracker.example/announce", &http, Duration::from_secs(1));
        assert!(matches!(result, Err(TrackerError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn http_announce_returns_compact_peers() {
        let server = MockServer::start().await;
        let body = bencode::encode(&Value::dict([
            ("interval", Value::Int(900)),
            ("peers", Value::bytes([192, 168, 1, 7, 0x1A, 0xE1])),
        ]));
        Mock::given(method("GET"))
            .and(path("/announce"))
            .and(query_param("compact", "1"))
            .and(query_param("port", "42069"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .expect(1)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let tracker = tracker_for_url(
            &format!("{}/announce", server.uri()),
            &http,
            Duration::from_secs(5),
        )
        .unwrap();

        let peers = tracker.announce(&request()).await.unwrap();
        assert_eq!(peers, vec!["192.168.1.7:6881".parse().unwrap()]);
    }

    #[tokio::test]
    async fn http_failure_reason_is_an_error() {
        let server = MockServer::start().await;
        let body = bencode::encode(&Value::dict([(
            "failure reason",
            Value::bytes("unregistered torrent"),
        )]));
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let tracker = tracker_for_url(&server.uri(), &http, Duration::from_secs(5)).unwrap();

        match tracker.announce(&request()).await {
            Err(TrackerError::Failure(reason)) => assert_eq!(reason, "unregistered torrent"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Serve one connect and one announce, answering the announce with `reply_action`
    async fn fake_udp_tracker(reply_action: u32, tail: Vec<u8>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];

            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 16);
            assert_eq!(&buf[..8], &UDP_PROTOCOL_ID.to_be_bytes());
            let mut reply = Vec::new();
            reply.extend_from_slice(&UDP_ACTION_CONNECT.to_be_bytes());
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&0x1122_3344_5566_7788u64.to_be_bytes());
            socket.send_to(&reply, from).await.unwrap();

            let (len, from) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(len, 98);
            assert_eq!(&buf[..8], &0x1122_3344_5566_7788u64.to_be_bytes());
            assert_eq!(&buf[16..36], &[0xAA; 20]);
            let mut reply = Vec::new();
            reply.extend_from_slice(&reply_action.to_be_bytes());
            reply.extend_from_slice(&buf[12..16]);
            reply.extend_from_slice(&tail);
            socket.send_to(&reply, from).await.unwrap();
        });

        addr
    }

    #[tokio::test]
    async fn udp_announce_returns_peers() {
        let mut tail = Vec::new();
        tail.extend_from_slice(&1800u32.to_be_bytes());
        tail.extend_from_slice(&0u32.to_be_bytes());
        tail.extend_from_slice(&1u32.to_be_bytes());
        tail.extend_from_slice(&[10, 0, 0, 9, 0xC8, 0xD5]);
        let addr = fake_udp_tracker(UDP_ACTION_ANNOUNCE, tail).await;

        let http = reqwest::Client::new();
        let tracker = tracker_for_url(
            &format!("udp://127.0.0.1:{}/announce", addr.port()),
            &http,
            Duration::from_secs(5),
        )
        .unwrap();

        let peers = tracker.announce(&request()).await.unwrap();
        assert_eq!(peers, vec!["10.0.0.9:51413".parse().unwrap()]);
    }

    #[tokio::test]
    async fn udp_error_action_is_surfaced() {
        let addr = fake_udp_tracker(UDP_ACTION_ERROR, b"torrent not allowed".to_vec()).await;

        let http = reqwest::Client::new();
        let tracker = tracker_for_url(
            &format!("udp://127.0.0.1:{}", addr.port()),
            &http,
            Duration::from_secs(5),
        )
        .unwrap();

        match tracker.announce(&request()).await {
            Err(TrackerError::Failure(reason)) => assert_eq!(reason, "torrent not allowed"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn udp_silence_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();

        let http = reqwest::Client::new();
        let tracker = tracker_for_url(
            &format!("udp://127.0.0.1:{port}"),
            &http,
            Duration::from_millis(100),
        )
        .unwrap();

        assert!(matches!(
            tracker.announce(&request()).await,
            Err(TrackerError::Timeout(_))
        ));
    }
}
