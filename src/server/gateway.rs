//! Reverse proxy for services deployed on their own
//!
//! `/gateway/{service}/{*rest}` is forwarded to the configured upstream with
//! the method, path, query and body unchanged. Only `Authorization` and
//! `Content-Type` are passed through; the upstream's `X-API-Key` is added.

use crate::auth::API_KEY_HEADER;
use crate::config::{GatewayConfig, UpstreamConfig};
use crate::core::error::{ApiResult, EntityError, RequestError, WebranaError};
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use std::collections::HashMap;
use std::time::Duration;

const FORWARDED_HEADERS: [header::HeaderName; 2] = [header::AUTHORIZATION, header::CONTENT_TYPE];

pub struct GatewayProxy {
    client: reqwest::Client,
    upstreams: HashMap<String, UpstreamConfig>,
}

impl GatewayProxy {
    pub fn new(config: &GatewayConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            upstreams: config.upstreams.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.upstreams.is_empty()
    }

    /// Target URL for `rest` (without leading slash) and an optional query
    fn target(upstream: &UpstreamConfig, rest: &str, query: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}",
            upstream.base_url.trim_end_matches('/'),
            rest.trim_start_matches('/')
        );
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        url
    }

    pub async fn forward(
        &self,
        service: &str,
        rest: &str,
        query: Option<&str>,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> ApiResult<Response> {
        let upstream = self
            .upstreams
            .get(service)
            .ok_or_else(|| EntityError::not_found("service", service))?;
        let url = Self::target(upstream, rest, query);

        let mut outbound = HeaderMap::new();
        for name in FORWARDED_HEADERS {
            if let Some(value) = headers.get(&name) {
                outbound.insert(name, value.clone());
            }
        }
        if let Some(key) = &upstream.api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| WebranaError::Internal("invalid upstream API key".into()))?;
            outbound.insert(API_KEY_HEADER, value);
        }

        let idempotent = method == Method::GET || method == Method::HEAD;
        let attempts = if idempotent { 2 } else { 1 };
        let mut last_error = None;
        for attempt in 1..=attempts {
            let request = self
                .client
                .request(method.clone(), &url)
                .headers(outbound.clone())
                .body(body.clone());
            match request.send().await {
                Ok(response) => return Self::relay(response).await,
                Err(e) if e.is_connect() && attempt < attempts => {
                    tracing::warn!(service, attempt, error = %e, "upstream connect failed, retrying");
                    last_error = Some(e);
                }
                Err(e) => {
                    last_error = Some(e);
                    break;
                }
            }
        }

        let message = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::warn!(service, %url, error = %message, "upstream unavailable");
        Err(RequestError::BadGateway {
            service: service.to_string(),
            message,
        }
        .into())
    }

    async fn relay(response: reqwest::Response) -> ApiResult<Response> {
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let bytes = response.bytes().await.map_err(|e| RequestError::BadGateway {
            service: "upstream".to_string(),
            message: e.to_string(),
        })?;

        let mut relayed = Response::new(Body::from(bytes));
        *relayed.status_mut() = status;
        if let Some(content_type) = content_type {
            relayed.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        Ok(relayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_is, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proxy(base_url: &str) -> GatewayProxy {
        let mut upstreams = HashMap::new();
        upstreams.insert(
            "billing".to_string(),
            UpstreamConfig {
                base_url: base_url.to_string(),
                api_key: Some("billing-key".to_string()),
            },
        );
        GatewayProxy::new(&GatewayConfig {
            upstreams,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_target_url() {
        let upstream = UpstreamConfig {
            base_url: "http://billing:8080/".into(),
            api_key: None,
        };
        assert_eq!(
            GatewayProxy::target(&upstream, "/invoices", Some("page=2")),
            "http://billing:8080/invoices?page=2"
        );
        assert_eq!(
            GatewayProxy::target(&upstream, "invoices/1", None),
            "http://billing:8080/invoices/1"
        );
    }

    #[tokio::test]
    async fn test_forwards_request_and_adds_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/invoices"))
            .and(query_param("page", "2"))
            .and(header_is("x-api-key", "billing-key"))
            .and(header_is("authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert("cookie", HeaderValue::from_static("session=1"));

        let response = proxy(&server.uri())
            .forward("billing", "invoices", Some("page=2"), Method::GET, &headers, Bytes::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upstream_status_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/coupons"))
            .respond_with(ResponseTemplate::new(409).set_body_string("conflict"))
            .mount(&server)
            .await;

        let response = proxy(&server.uri())
            .forward("billing", "coupons", None, Method::POST, &HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_unknown_service_and_unreachable_upstream() {
        let gateway = proxy("http://127.0.0.1:9");
        let err = gateway
            .forward("catalog", "plans", None, Method::GET, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = gateway
            .forward("billing", "invoices", None, Method::GET, &HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");
    }
}
