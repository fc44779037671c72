use anyhow::Result;
use domintel::http::{ContentFetcher, HttpClient, MAX_BODY_BYTES};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Accepts one connection and answers it with `head` followed by `body`.
/// With `stall` set the connection is held open afterwards instead of closed.
async fn serve_once(head: String, body: Vec<u8>, stall: bool) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else { return };
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        if stall {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    });

    Ok(addr)
}

#[tokio::test]
async fn test_oversized_body_is_cut_at_limit() -> Result<()> {
    // announces 100 MB, sends 2 MiB and then stops sending without closing
    let head = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nServer: nginx\r\nContent-Length: 100000000\r\n\r\n";
    let addr = serve_once(head.to_string(), vec![b'a'; 2 * 1024 * 1024], true).await?;

    let client = HttpClient::new(Duration::from_secs(3))?;
    let page = client.fetch(&format!("http://{}/", addr)).await?;

    assert_eq!(page.status, 200);
    assert_eq!(page.body.len(), MAX_BODY_BYTES);
    assert_eq!(page.headers.get("server").map(String::as_str), Some("nginx"));

    Ok(())
}

#[tokio::test]
async fn test_small_body_is_read_whole() -> Result<()> {
    let body = r#"<html><script src="/wp-includes/js/jquery.js"></script></html>"#;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let addr = serve_once(head, body.as_bytes().to_vec(), false).await?;

    let client = HttpClient::new(Duration::from_secs(3))?;
    let url = format!("http://{}/", addr);
    let page = client.fetch(&url).await?;

    assert_eq!(page.body, body);
    assert_eq!(page.requested_url, url);
    assert!(!page.is_secure());

    Ok(())
}
