//! [`SearchService`] over HTTP, speaking the Elasticsearch REST dialect.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde_json::Value;

use crate::{
    error::{Error, Result},
    service::{Refresh, SearchService, WireResponse},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A remote search cluster reached through one base URL.
#[derive(Debug, Clone)]
pub struct HttpService {
    client: Client,
    base: Url,
}

impl HttpService {
    pub fn new(base: Url) -> Result<Self> {
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https")
        {
            return Err(Error::Config(format!(
                "search URL must be an http(s) base URL: {base}"
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;

        Ok(Self { client, base })
    }

    pub fn parse(url: &str) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid search URL {url}: {e}")))?;
        Self::new(base)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Append `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::Config(format!("search URL cannot be a base: {}", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<WireResponse> {
        let request = request
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;
        let method = request.method().clone();
        let url = request.url().clone();

        let resp = self
            .client
            .execute(request)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        tracing::trace!(%method, %url, status, bytes = body.len(), "service call");
        Ok(WireResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl SearchService for HttpService {
    async fn info(&self) -> Result<WireResponse> {
        let url = self.endpoint(&[])?;
        self.send(self.request(Method::GET, url)).await
    }

    async fn create_index(
        &self,
        index: &str,
        body: &Value,
    ) -> Result<WireResponse> {
        let url = self.endpoint(&[index])?;
        self.send(self.request(Method::PUT, url).json(body)).await
    }

    async fn index_document(
        &self,
        index: &str,
        id: &str,
        body: &Value,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        let mut url = self.endpoint(&[index, "_doc", id])?;
        url.query_pairs_mut()
            .append_pair("refresh", refresh.as_param());
        self.send(self.request(Method::PUT, url).json(body)).await
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: Refresh,
    ) -> Result<WireResponse> {
        let mut url = self.endpoint(&[index, "_doc", id])?;
        url.query_pairs_mut()
            .append_pair("refresh", refresh.as_param());
        self.send(self.request(Method::DELETE, url)).await
    }

    async fn search(
        &self,
        index: &str,
        body: &Value,
        track_total_hits: bool,
    ) -> Result<WireResponse> {
        let mut url = self.endpoint(&[index, "_search"])?;
        url.query_pairs_mut().append_pair(
            "track_total_hits",
            if track_total_hits { "true" } else { "false" },
        );
        self.send(self.request(Method::POST, url).json(body)).await
    }
}
