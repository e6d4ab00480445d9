//! S3-compatible object store client
//!
//! Talks to any endpoint implementing the S3 REST API (AWS, MinIO, Ceph RGW,
//! ...). Requests are signed with AWS Signature Version 4 when credentials
//! are configured and sent anonymously otherwise.

use super::{ObjectStore, ObjectStoreError};
use crate::config::schema::RemoteConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// SHA-256 of an empty payload, used for bodiless requests
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Headers covered by the request signature, sorted and `;`-joined
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Backoff between retries of retryable failures
const RETRY_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

type HmacSha256 = Hmac<Sha256>;

struct Credentials {
    access_key: String,
    secret_key: String,
}

/// Object store client for S3-compatible endpoints
pub struct HttpObjectStore {
    http_client: Client,
    endpoint: Url,
    region: String,
    bucket: String,
    credentials: Option<Credentials>,
    /// `https://host/bucket/key` when true, `https://bucket.host/key` otherwise
    path_style: bool,
    max_retries: u32,
}

/// ListObjectsV2 response body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
}

impl HttpObjectStore {
    /// Build a client from the `[remote]` configuration section
    pub fn new(config: &RemoteConfig) -> Result<Self, ObjectStoreError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ObjectStoreError::Request(format!("invalid endpoint {:?}: {}", config.endpoint, e))
        })?;
        if endpoint.host_str().is_none() {
            return Err(ObjectStoreError::Request(format!(
                "endpoint {:?} has no host",
                config.endpoint
            )));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => Some(Credentials {
                access_key: access_key.clone(),
                secret_key: secret_key.clone(),
            }),
            _ => None,
        };

        info!(
            endpoint = %endpoint,
            bucket = %config.bucket,
            path_style = config.path_style,
            signed = credentials.is_some(),
            "Object store client ready"
        );

        Ok(Self {
            http_client,
            endpoint,
            region: config.region.clone(),
            bucket: config.bucket.clone(),
            credentials,
            path_style: config.path_style,
            max_retries: config.max_retries,
        })
    }

    /// Build the request URL and the `Host` header value that gets signed
    fn request_url(
        &self,
        key: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<(Url, String), ObjectStoreError> {
        let mut url = self.endpoint.clone();
        let endpoint_host = self.endpoint.host_str().unwrap_or_default();

        let host = if self.path_style {
            endpoint_host.to_string()
        } else {
            let host = format!("{}.{}", self.bucket, endpoint_host);
            url.set_host(Some(&host))
                .map_err(|e| ObjectStoreError::Request(format!("invalid host {}: {}", host, e)))?;
            host
        };

        let mut path = self.endpoint.path().trim_end_matches('/').to_string();
        if self.path_style {
            path.push('/');
            path.push_str(&uri_encode(&self.bucket, true));
        }
        if let Some(key) = key {
            path.push('/');
            path.push_str(&uri_encode(key, false));
        }
        if path.is_empty() {
            path.push('/');
        }
        url.set_path(&path);

        let query = canonical_query(query);
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host,
        };
        Ok((url, host_header))
    }

    /// Compute the `x-amz-*` and `authorization` headers for a request
    fn signed_headers(
        &self,
        method: &Method,
        url: &Url,
        host: &str,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let mut headers = vec![
            ("x-amz-content-sha256", payload_hash.to_string()),
            ("x-amz-date", amz_date.clone()),
        ];

        let Some(credentials) = &self.credentials else {
            return headers;
        };

        let date = now.format("%Y%m%d").to_string();
        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            method,
            url.path(),
            url.query().unwrap_or_default(),
            host,
            payload_hash,
            amz_date,
            SIGNED_HEADERS,
            payload_hash
        );
        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", credentials.secret_key).as_bytes(),
            date.as_bytes(),
        );
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, b"s3");
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

        headers.push((
            "authorization",
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
                credentials.access_key, scope, SIGNED_HEADERS, signature
            ),
        ));
        headers
    }

    /// Send one signed request, mapping non-2xx statuses to errors
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response, ObjectStoreError> {
        let (url, host) = self.request_url(key, query)?;
        let payload_hash = match &body {
            Some(body) => hex::encode(Sha256::digest(body)),
            None => EMPTY_PAYLOAD_SHA256.to_string(),
        };

        let mut request = self.http_client.request(method.clone(), url.clone());
        for (name, value) in self.signed_headers(&method, &url, &host, &payload_hash, Utc::now()) {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::from_status(status, &body));
        }
        Ok(response)
    }

    /// Execute an operation, retrying retryable failures with backoff
    async fn with_retry<F, Fut, T>(
        &self,
        operation: &str,
        key: &str,
        f: F,
    ) -> Result<T, ObjectStoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ObjectStoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = RETRY_BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(2000);
                    warn!(
                        operation = operation,
                        key = key,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay,
                        error = %e,
                        "Retrying object store operation"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
            if let Some(token) = &continuation {
                query.push(("continuation-token", token.clone()));
            }

            debug!(prefix = prefix, continuation = ?continuation, "Listing objects");
            let body = self
                .with_retry("list", prefix, || async {
                    let response = self.send(Method::GET, None, &query, None).await?;
                    Ok::<_, ObjectStoreError>(response.text().await?)
                })
                .await?;

            let page: ListBucketResult = quick_xml::de::from_str(&body)
                .map_err(|e| ObjectStoreError::InvalidResponse(e.to_string()))?;
            keys.extend(page.contents.into_iter().map(|object| object.key));

            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }

        debug!(prefix = prefix, count = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, ObjectStoreError> {
        let bytes = self
            .with_retry("get", key, || async {
                let response = self.send(Method::GET, Some(key), &[], None).await?;
                Ok::<_, ObjectStoreError>(response.bytes().await?)
            })
            .await?;

        debug!(key = key, size = bytes.len(), "Downloaded object");
        Ok(bytes.to_vec())
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), ObjectStoreError> {
        let size = body.len();
        self.with_retry("put", key, || async {
            self.send(Method::PUT, Some(key), &[], Some(body.clone()))
                .await
                .map(|_| ())
        })
        .await?;

        debug!(key = key, size = size, "Uploaded object");
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encode everything except RFC 3986 unreserved characters
/// (and `/` when `encode_slash` is false), as SigV4 canonicalization requires
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Encode and sort query parameters by key
fn canonical_query(params: &[(&str, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (uri_encode(name, true), uri_encode(value, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}
