use super::{TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{BittorrentError, Result};
use reqwest::Client;
use tracing::{debug, info};
use url::Url;

/// Announce over HTTP(S) with a single GET.
pub async fn announce(client: &Client, url: &Url, request: &TrackerRequest) -> Result<TrackerResponse> {
    info!("Announcing to tracker: {}", url);

    let separator = if url.query().is_some() { '&' } else { '?' };
    let url = Url::parse(&format!("{}{}{}", url, separator, query_string(request)))?;
    debug!("Tracker request URL: {}", url);

    let response = client.get(url).send().await?;
    let status = response.status();
    let body = response.bytes().await?;

    debug!("Tracker response status: {}, body length: {}", status, body.len());

    if !status.is_success() {
        return Err(BittorrentError::TrackerProtocol(format!("HTTP error: {}", status)));
    }

    let decoded = decode(&body).map_err(|e| BittorrentError::TrackerProtocol(e.to_string()))?;
    let tracker_response = TrackerResponse::from_bencode(&decoded)?;

    info!("Received {} peers from tracker", tracker_response.peers.len());
    Ok(tracker_response)
}

/// Announce parameters. The binary fields are already escaped, so the string
/// is appended to the URL as is.
fn query_string(request: &TrackerRequest) -> String {
    format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&event=started",
        percent_encode(&request.info_hash),
        percent_encode(&request.peer_id),
        request.port,
        request.stats.uploaded,
        request.stats.downloaded,
        request.stats.left
    )
}

/// Escape every byte except ASCII alphanumerics and `-_.~` as `%XX`.
pub fn percent_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &b in bytes {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TransferStats;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    #[test]
    fn test_percent_encode() {
        assert_eq!(percent_encode(&[0x2d]), "-");
        assert_eq!(percent_encode(&[0x00]), "%00");
        assert_eq!(percent_encode(b"aZ9._~"), "aZ9._~");
        assert_eq!(percent_encode(&[0xab, b' ', b'%']), "%AB%20%25");
    }

    #[test]
    fn test_query_string() {
        let request = TrackerRequest::new(
            [0x2d; 20],
            *b"-LC0001-abcdefghijkl",
            6881,
            TransferStats {
                uploaded: 5,
                downloaded: 10,
                left: 300,
            },
        );
        assert_eq!(
            query_string(&request),
            format!(
                "info_hash={}&peer_id=-LC0001-abcdefghijkl&port=6881&uploaded=5&downloaded=10&left=300&compact=1&event=started",
                "-".repeat(20)
            )
        );
    }

    /// One-shot HTTP server answering with `body`. Yields the request line.
    async fn serve_once(body: Vec<u8>) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/announce", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                assert!(n > 0);
                request.extend_from_slice(&buf[..n]);
            }

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.unwrap();

            let text = String::from_utf8_lossy(&request).into_owned();
            text.lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    fn client() -> Client {
        Client::builder().no_proxy().build().unwrap()
    }

    #[tokio::test]
    async fn test_announce_over_http() {
        let mut body = b"d8:intervali900e5:peers6:".to_vec();
        body.extend_from_slice(&[192, 168, 1, 9, 0x1a, 0xe1]);
        body.push(b'e');
        let (url, server) = serve_once(body).await;

        let request = TrackerRequest::new([0u8; 20], [b'x'; 20], 6881, TransferStats::fresh(1000));
        let response = announce(&client(), &Url::parse(&url).unwrap(), &request)
            .await
            .unwrap();

        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].addr, "192.168.1.9:6881".parse().unwrap());

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash=%00%00"));
        assert!(request_line.contains("&left=1000&compact=1&event=started"));
    }

    #[tokio::test]
    async fn test_failure_reason_over_http() {
        let (url, _server) = serve_once(b"d14:failure reason6:bannede".to_vec()).await;

        let request = TrackerRequest::new([0u8; 20], [b'x'; 20], 6881, TransferStats::fresh(1));
        let result = announce(&client(), &Url::parse(&url).unwrap(), &request).await;
        assert!(matches!(result, Err(BittorrentError::TrackerProtocol(ref m)) if m == "banned"));
    }
}
