use serde::Serialize;
use std::net::IpAddr;
use std::time::Duration;

/// Result of one HTTP GET against a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "health", rename_all = "snake_case")]
pub enum Health {
    Ok { status: u16 },
    Failed { status: Option<u16>, detail: String },
}

impl Health {
    pub fn is_ok(&self) -> bool {
        matches!(self, Health::Ok { .. })
    }
}

/// `true` for addresses that accept connections on every interface.
pub fn is_wildcard(bind: &str) -> bool {
    bind.is_empty()
        || bind
            .parse::<IpAddr>()
            .map(|ip| ip.is_unspecified())
            .unwrap_or(false)
}

/// URL used to check an instance bound to `bind:port`. Wildcard binds are
/// checked over loopback.
pub fn probe_url(bind: &str, port: u16) -> String {
    let host = match bind.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) if ip.is_unspecified() => "127.0.0.1".to_string(),
        Ok(IpAddr::V6(ip)) if ip.is_unspecified() => "[::1]".to_string(),
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        Ok(IpAddr::V4(ip)) => ip.to_string(),
        Err(_) if bind.is_empty() => "127.0.0.1".to_string(),
        Err(_) => bind.to_string(),
    };
    format!("http://{host}:{port}/")
}

pub async fn check_http(url: &str, timeout: Duration) -> Health {
    let client = match reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return Health::Failed {
                status: None,
                detail: format!("failed to build HTTP client: {e}"),
            };
        }
    };

    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => Health::Ok {
            status: resp.status().as_u16(),
        },
        Ok(resp) => Health::Failed {
            status: Some(resp.status().as_u16()),
            detail: format!("HTTP {}", resp.status()),
        },
        Err(e) => Health::Failed {
            status: None,
            detail: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_wildcard_addresses() {
        assert!(is_wildcard("0.0.0.0"));
        assert!(is_wildcard("::"));
        assert!(is_wildcard(""));
        assert!(!is_wildcard("127.0.0.1"));
        assert!(!is_wildcard("::1"));
        assert!(!is_wildcard("localhost"));
    }

    #[test]
    fn test_probe_url() {
        assert_eq!(probe_url("0.0.0.0", 8000), "http://127.0.0.1:8000/");
        assert_eq!(probe_url("::", 8000), "http://[::1]:8000/");
        assert_eq!(probe_url("192.168.1.5", 80), "http://192.168.1.5:80/");
        assert_eq!(probe_url("fe80::1", 9000), "http://[fe80::1]:9000/");
        assert_eq!(probe_url("localhost", 9000), "http://localhost:9000/");
        assert_eq!(probe_url("", 9000), "http://127.0.0.1:9000/");
    }

    async fn one_shot_server(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
        });
        port
    }

    #[tokio::test]
    async fn test_check_http_ok() {
        let port =
            one_shot_server("HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
        let health = check_http(&probe_url("127.0.0.1", port), Duration::from_secs(5)).await;
        assert_eq!(health, Health::Ok { status: 200 });
    }

    #[tokio::test]
    async fn test_check_http_error_status() {
        let port = one_shot_server(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let health = check_http(&probe_url("127.0.0.1", port), Duration::from_secs(5)).await;
        assert!(matches!(health, Health::Failed { status: Some(404), .. }));
    }

    #[tokio::test]
    async fn test_check_http_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let health = check_http(&probe_url("127.0.0.1", port), Duration::from_secs(2)).await;
        assert!(matches!(health, Health::Failed { status: None, .. }));
        assert!(!health.is_ok());
    }
}
