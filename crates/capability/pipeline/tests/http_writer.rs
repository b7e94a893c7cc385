use mfx_pipeline::{DeliveryError, HttpLineWriter, InfluxConfig, LineWriter};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// 接受一个连接，读完整个请求后回复指定状态行，返回原始请求文本。
async fn serve_once(listener: TcpListener, status_line: &'static str) -> String {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.expect("read");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let length = text[..head_end]
                .lines()
                .find_map(|line| {
                    line.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|value| value.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= head_end + 4 + length {
                break;
            }
        }
    }
    let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
    stream
        .write_all(response.as_bytes())
        .await
        .expect("write response");
    String::from_utf8_lossy(&buf).to_string()
}

async fn bind() -> (TcpListener, InfluxConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let config = InfluxConfig {
        host: "127.0.0.1".to_string(),
        port,
        ..InfluxConfig::default()
    };
    (listener, config)
}

#[tokio::test]
async fn posts_line_to_write_endpoint() {
    let (listener, mut config) = bind().await;
    config.username = Some("user".to_string());
    config.password = Some("pass".to_string());
    let server = tokio::spawn(serve_once(listener, "HTTP/1.1 204 No Content"));

    let writer = HttpLineWriter::new(&config).expect("client");
    assert_eq!(writer.url(), format!("http://127.0.0.1:{}/write", config.port));
    writer
        .write("sensors", "temp value=1.5 1000\n".to_string())
        .await
        .expect("write");

    let request = server.await.expect("server");
    let lower = request.to_ascii_lowercase();
    assert!(request.starts_with("POST /write?db=sensors HTTP/1.1"));
    assert!(lower.contains("authorization: basic dxnlcjpwyxnz"));
    assert!(request.ends_with("temp value=1.5 1000\n"));
}

#[tokio::test]
async fn omits_auth_without_username() {
    let (listener, config) = bind().await;
    let server = tokio::spawn(serve_once(listener, "HTTP/1.1 200 OK"));

    let writer = HttpLineWriter::new(&config).expect("client");
    writer
        .write("default", "m value=1 1\n".to_string())
        .await
        .expect("write");

    let request = server.await.expect("server");
    assert!(!request.to_ascii_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let (listener, config) = bind().await;
    let server = tokio::spawn(serve_once(listener, "HTTP/1.1 400 Bad Request"));

    let writer = HttpLineWriter::new(&config).expect("client");
    let err = writer
        .write("default", "m value=1 1\n".to_string())
        .await
        .expect_err("status");
    server.await.expect("server");

    match err {
        DeliveryError::Status {
            status,
            database,
            line,
        } => {
            assert_eq!(status, 400);
            assert_eq!(database, "default");
            assert_eq!(line, "m value=1 1");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_http_error() {
    let (listener, config) = bind().await;
    drop(listener);

    let writer = HttpLineWriter::new(&config).expect("client");
    let err = writer
        .write("default", "m value=1 1\n".to_string())
        .await
        .expect_err("connect");
    assert!(matches!(err, DeliveryError::Http(_)));
}
