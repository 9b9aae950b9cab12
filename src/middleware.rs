use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{error, info, warn};

const CONSUME_PREFIX: &str = "/api/users/consumeQuota/";

/// Logs every request with its latency. Quota calls carry the user id, and the
/// completion level follows the outcome: warn for 429, error for 5xx.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = get_client_ip(&request);
    let quota_user = quota_user_from_path(&path).unwrap_or("-").to_string();

    info!(
        target: "quota_service::middleware",
        method = %method,
        path = %path,
        client_ip = %client_ip,
        quota_user = %quota_user,
        "Incoming request"
    );

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        error!(
            target: "quota_service::middleware",
            method = %method, path = %path, status = %status, elapsed_ms,
            "Request failed"
        );
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(
            target: "quota_service::middleware",
            method = %method, path = %path, quota_user = %quota_user, elapsed_ms,
            "Request rejected by quota"
        );
    } else {
        info!(
            target: "quota_service::middleware",
            method = %method, path = %path, status = %status, elapsed_ms,
            "Request completed"
        );
    }

    response
}

/// User id of a consume call, still percent-encoded as it appears on the wire.
fn quota_user_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(CONSUME_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

fn get_client_ip(request: &Request) -> String {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                return first_ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_client_ip_with_forwarded_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(get_client_ip(&request), "192.168.1.1");
    }

    #[test]
    fn test_get_client_ip_from_connect_info() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 1], 4242))));

        assert_eq!(get_client_ip(&request), "203.0.113.1");
    }

    #[test]
    fn test_get_client_ip_with_real_ip_header() {
        let mut request = Request::new(axum::body::Body::empty());
        request
            .headers_mut()
            .insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));

        assert_eq!(get_client_ip(&request), "198.51.100.7");
    }

    #[test]
    fn test_quota_user_from_path() {
        assert_eq!(quota_user_from_path("/api/users/consumeQuota/u1"), Some("u1"));
        assert_eq!(quota_user_from_path("/api/users/consumeQuota/"), None);
        assert_eq!(quota_user_from_path("/api/users/consumeQuota/a/b"), None);
        assert_eq!(quota_user_from_path("/api/users/usersQuota"), None);
    }

    #[test]
    fn test_get_client_ip_fallback() {
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(get_client_ip(&request), "unknown");
    }
}
