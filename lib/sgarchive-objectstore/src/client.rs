use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{truncate_body, ObjectStoreError, TransportSnafu, UnexpectedStatusSnafu};
use crate::listing::parse_list_page;
use crate::sigv4::{self, RequestToSign};
use crate::{ObjectStore, ObjectStoreConfig};

const SERVICE: &str = "s3";
/// Response bodies are truncated to this many bytes before they are logged
/// or embedded in an error (spec.md §4.1, §7).
const MAX_LOGGED_BODY: usize = 2048;

/// Live [`ObjectStore`] backed by an S3-compatible REST API, reached over
/// `reqwest` with hand-rolled SigV4 signing (see [`crate::sigv4`]).
pub struct S3ObjectStore {
    config: ObjectStoreConfig,
    http: Client,
    path_style: bool,
}

impl S3ObjectStore {
    /// Path-style addressing is used automatically when the endpoint host
    /// is a loopback address (spec.md §6); virtual-host style otherwise.
    pub fn new(config: ObjectStoreConfig) -> Self {
        let path_style = config
            .endpoint
            .host_str()
            .map(is_loopback_host)
            .unwrap_or(false);
        Self {
            config,
            http: Client::new(),
            path_style,
        }
    }

    fn object_url(&self, key: &str) -> reqwest::Url {
        let mut url = self.config.endpoint.clone();
        if self.path_style {
            url.set_path(&format!("/{}/{}", self.config.bucket, key));
        } else {
            let host = self.config.endpoint.host_str().unwrap_or_default();
            let _ = url.set_host(Some(&format!("{}.{host}", self.config.bucket)));
            url.set_path(&format!("/{key}"));
        }
        url
    }

    fn bucket_url(&self) -> reqwest::Url {
        let mut url = self.config.endpoint.clone();
        if self.path_style {
            url.set_path(&format!("/{}", self.config.bucket));
        } else {
            let host = self.config.endpoint.host_str().unwrap_or_default();
            let _ = url.set_host(Some(&format!("{}.{host}", self.config.bucket)));
            url.set_path("/");
        }
        url
    }

    fn host_header(url: &reqwest::Url) -> String {
        match url.port() {
            Some(port) if !is_default_port(url.scheme(), port) => {
                format!("{}:{port}", url.host_str().unwrap_or_default())
            }
            _ => url.host_str().unwrap_or_default().to_string(),
        }
    }

    async fn send(
        &self,
        method: Method,
        url: reqwest::Url,
        body: Bytes,
        extra_headers: Vec<(String, String)>,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        let host = Self::host_header(&url);
        let now = Utc::now();
        let to_sign = RequestToSign {
            method: method.as_str(),
            canonical_uri: url.path(),
            raw_query: url.query().unwrap_or(""),
            extra_headers: &extra_headers,
            host: &host,
            body: &body,
        };
        let signature = sigv4::sign(
            &to_sign,
            &self.config.region,
            SERVICE,
            &self.config.access_key,
            &self.config.secret_key,
            now,
        )?;

        let mut request = self
            .http
            .request(method, url.clone())
            .header("x-amz-date", signature.amz_date)
            .header("x-amz-content-sha256", signature.amz_content_sha256)
            .header("authorization", signature.authorization);

        for (name, value) in extra_headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        request.send().await.with_context(|_| TransportSnafu {
            uri: url.to_string(),
        })
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<crate::listing::ListPage, ObjectStoreError> {
        let mut url = self.bucket_url();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("prefix", prefix);
            if let Some(delim) = delimiter {
                query.append_pair("delimiter", delim);
            }
            if let Some(token) = continuation_token {
                query.append_pair("continuation-token", token);
            }
        }

        let response = self.send(Method::GET, url.clone(), Bytes::new(), vec![]).await?;
        let status = response.status();
        let uri = url.to_string();
        let text = response.text().await.with_context(|_| TransportSnafu { uri: uri.clone() })?;
        if status != StatusCode::OK {
            return UnexpectedStatusSnafu {
                operation: "ListObjectsV2",
                uri,
                status: status.as_u16(),
                body: truncate_body(&text, MAX_LOGGED_BODY),
            }
            .fail();
        }
        parse_list_page(&text, &uri)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key);
        let response = self.send(Method::PUT, url.clone(), body, vec![]).await?;
        ensure_success("PUT", &url, response, &[StatusCode::OK, StatusCode::CREATED]).await
    }

    async fn put_if_match(
        &self,
        key: &str,
        body: Bytes,
        expected_etag: Option<&str>,
    ) -> Result<bool, ObjectStoreError> {
        let url = self.object_url(key);
        let header = match expected_etag {
            Some(etag) => ("if-match".to_string(), etag.to_string()),
            None => ("if-none-match".to_string(), "*".to_string()),
        };
        let response = self
            .send(Method::PUT, url.clone(), body, vec![header])
            .await?;
        let status = response.status();
        if status == StatusCode::PRECONDITION_FAILED {
            debug!(uri = %url, "conditional PUT precondition mismatch");
            return Ok(false);
        }
        ensure_success("PUT", &url, response, &[StatusCode::OK, StatusCode::CREATED])
            .await
            .map(|()| true)
    }

    async fn get(&self, key: &str) -> Result<Option<(Bytes, String)>, ObjectStoreError> {
        let url = self.object_url(key);
        let response = self.send(Method::GET, url.clone(), Bytes::new(), vec![]).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let etag = etag_of(&response);
        if status != StatusCode::OK {
            let text = response.text().await.unwrap_or_default();
            return UnexpectedStatusSnafu {
                operation: "GET",
                uri: url.to_string(),
                status: status.as_u16(),
                body: truncate_body(&text, MAX_LOGGED_BODY),
            }
            .fail();
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|_| TransportSnafu { uri: url.to_string() })?;
        Ok(Some((bytes, etag.unwrap_or_default())))
    }

    async fn head(&self, key: &str) -> Result<Option<String>, ObjectStoreError> {
        let url = self.object_url(key);
        let response = self.send(Method::HEAD, url.clone(), Bytes::new(), vec![]).await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status != StatusCode::OK {
            return UnexpectedStatusSnafu {
                operation: "HEAD",
                uri: url.to_string(),
                status: status.as_u16(),
                body: String::new(),
            }
            .fail();
        }
        Ok(etag_of(&response))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.object_url(key);
        let response = self.send(Method::DELETE, url.clone(), Bytes::new(), vec![]).await?;
        let status = response.status();
        if matches!(
            status,
            StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::NOT_FOUND
        ) {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        UnexpectedStatusSnafu {
            operation: "DELETE",
            uri: url.to_string(),
            status: status.as_u16(),
            body: truncate_body(&text, MAX_LOGGED_BODY),
        }
        .fail()
    }

    async fn list_direct(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let mut results = Vec::new();
        let mut token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                warn!(prefix, "list_direct cancelled");
                break;
            }
            let page = self.list_page(prefix, Some("/"), token.as_deref()).await?;
            results.extend(page.common_prefixes);
            if !page.is_truncated {
                break;
            }
            token = page.next_continuation_token;
            if token.is_none() {
                break;
            }
        }
        Ok(results)
    }

    async fn list_files(
        &self,
        prefix: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let mut results = Vec::new();
        let mut token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                warn!(prefix, "list_files cancelled");
                break;
            }
            let page = self.list_page(prefix, None, token.as_deref()).await?;
            results.extend(page.keys);
            if !page.is_truncated {
                break;
            }
            token = page.next_continuation_token;
            if token.is_none() {
                break;
            }
        }
        Ok(results)
    }
}

async fn ensure_success(
    operation: &'static str,
    url: &reqwest::Url,
    response: reqwest::Response,
    ok: &[StatusCode],
) -> Result<(), ObjectStoreError> {
    let status = response.status();
    if ok.contains(&status) {
        return Ok(());
    }
    let text = response.text().await.unwrap_or_default();
    UnexpectedStatusSnafu {
        operation,
        uri: url.to_string(),
        status: status.as_u16(),
        body: truncate_body(&text, MAX_LOGGED_BODY),
    }
    .fail()
}

fn etag_of(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1"
}

fn is_default_port(scheme: &str, port: u16) -> bool {
    matches!((scheme, port), ("http", 80) | ("https", 443))
}
