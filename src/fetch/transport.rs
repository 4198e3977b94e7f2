//! HTTP transport seam.
//!
//! The resolver and the offline proxy talk to the network only through
//! [`HttpTransport`], so tests can script responses without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use crate::{Result, ShelfLifeError};

/// An outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    /// A bodiless GET
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header (builder style)
    pub fn header(mut self, name: HeaderName, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }
}

/// A fully-read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with a status and body and no headers
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Content-Type header, if readable
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Something that can perform HTTP requests
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request` and read the whole response body.
    ///
    /// Fails only when no response was obtained; non-success statuses are
    /// returned as responses.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with the crate's user agent
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shelf-life/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ShelfLifeError::internal)?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.to_string();
        debug!(method = %request.method, url = %url, "Sending request");

        let to_transport = |e: reqwest::Error| ShelfLifeError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(to_transport)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(to_transport)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Scripted transport for tests
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// What the transport does for a URL
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Respond {
            status: u16,
            content_type: Option<&'static str>,
            body: String,
        },
        /// Answer with a JSON body after a delay
        Slow(std::time::Duration, String),
        Fail,
        Hang,
    }

    impl Scripted {
        pub fn json(body: impl Into<String>) -> Self {
            Self::Respond {
                status: 200,
                content_type: Some("application/json"),
                body: body.into(),
            }
        }

        pub fn status(status: u16) -> Self {
            Self::Respond {
                status,
                content_type: None,
                body: String::new(),
            }
        }
    }

    /// Answers by URL; unknown URLs fail like an unreachable host
    #[derive(Default)]
    pub struct ScriptedTransport {
        routes: Mutex<HashMap<String, Scripted>>,
        calls: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, url: &str, scripted: Scripted) -> Self {
            self.set(url, scripted);
            self
        }

        pub fn set(&self, url: &str, scripted: Scripted) {
            self.routes.lock().unwrap().insert(url.to_string(), scripted);
        }

        pub fn calls(&self) -> Vec<HttpRequest> {
            self.calls.lock().unwrap().clone()
        }

        pub fn called_urls(&self) -> Vec<String> {
            self.calls().iter().map(|r| r.url.to_string()).collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            let url = request.url.to_string();
            self.calls.lock().unwrap().push(request);
            let scripted = self.routes.lock().unwrap().get(&url).cloned();

            match scripted {
                Some(Scripted::Respond {
                    status,
                    content_type,
                    body,
                }) => {
                    let mut response =
                        HttpResponse::new(StatusCode::from_u16(status).unwrap(), body);
                    if let Some(ct) = content_type {
                        response.headers.insert(
                            reqwest::header::CONTENT_TYPE,
                            HeaderValue::from_static(ct),
                        );
                    }
                    Ok(response)
                }
                Some(Scripted::Slow(delay, body)) => {
                    tokio::time::sleep(delay).await;
                    let mut response = HttpResponse::new(StatusCode::OK, body);
                    response.headers.insert(
                        reqwest::header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    );
                    Ok(response)
                }
                Some(Scripted::Hang) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                Some(Scripted::Fail) | None => Err(ShelfLifeError::Transport {
                    url,
                    message: "connection refused".into(),
                }),
            }
        }
    }
}
