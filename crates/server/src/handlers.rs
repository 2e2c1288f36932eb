//! HTTP surface
//!
//! - `GET /cert/{domain}` returns the certificate, issuing it on a miss
//! - `GET /renewals` lists tracked domains and their deadlines as JSON
//! - `GET /` returns usage text

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use http::header::{self, HeaderValue};
use http::{Method, Response, StatusCode};
use pingora::apps::http_app::ServeHttp;
use pingora::protocols::http::ServerSession;
use tracing::{debug, error};

use crate::acme::{CertificateManager, RENEWAL_FILE_NAME};

const CERT_PREFIX: &str = "/cert/";

/// Pingora HTTP application serving the certificate cache
#[derive(Debug, Clone)]
pub struct CertHttpApp {
    manager: Arc<CertificateManager>,
    /// Address shown in the usage text when the request has no Host header
    public_address: String,
}

impl CertHttpApp {
    pub fn new(manager: Arc<CertificateManager>, public_address: impl Into<String>) -> Self {
        Self {
            manager,
            public_address: public_address.into(),
        }
    }

    /// Route one request
    pub async fn handle(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
    ) -> Response<Vec<u8>> {
        if *method != Method::GET {
            return text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        if let Some(domain) = path.strip_prefix(CERT_PREFIX) {
            return self.serve_certificate(domain).await;
        }

        match path {
            "/" => {
                let address = host.unwrap_or(&self.public_address);
                text_response(
                    StatusCode::OK,
                    &format!("To get certificate http://{}/cert/{{domainname}}", address),
                )
            }
            "/renewals" => {
                let status = self.manager.renewal_status(Utc::now());
                match serde_json::to_vec(&status) {
                    Ok(body) => response(StatusCode::OK, "application/json", body),
                    Err(e) => {
                        error!(error = %e, "Failed to encode renewal status");
                        text_response(StatusCode::INTERNAL_SERVER_ERROR, "Unknown error")
                    }
                }
            }
            _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    async fn serve_certificate(&self, domain: &str) -> Response<Vec<u8>> {
        if !is_domain_segment(domain) {
            debug!(domain = %domain, "Rejected certificate request");
            return text_response(StatusCode::NOT_FOUND, "Not Found");
        }

        match self.manager.fetch_or_issue(domain).await {
            Ok(cert) => response(StatusCode::OK, "application/octet-stream", cert),
            Err(e) => {
                error!(domain = %domain, error = %e, "Failed to serve certificate");
                text_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("Error while getting certificate from cache store: {}", e),
                )
            }
        }
    }
}

/// A domain must be a single non-empty path segment naming a store directory
///
/// The renewal record's file name is refused too: its certificate would share
/// a path with its record.
fn is_domain_segment(domain: &str) -> bool {
    !domain.is_empty()
        && domain != "."
        && domain != ".."
        && domain != RENEWAL_FILE_NAME
        && !domain.contains(['/', '\\'])
}

fn text_response(status: StatusCode, body: &str) -> Response<Vec<u8>> {
    response(status, "text/plain; charset=utf-8", body.as_bytes().to_vec())
}

fn response(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response<Vec<u8>> {
    let len = body.len();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

#[async_trait]
impl ServeHttp for CertHttpApp {
    async fn response(&self, http_session: &mut ServerSession) -> Response<Vec<u8>> {
        let req = http_session.req_header();
        let method = req.method.clone();
        let path = req.uri.path().to_string();
        let host = req
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!(method = %method, path = %path, "Handling request");
        self.handle(&method, &path, host.as_deref()).await
    }
}
