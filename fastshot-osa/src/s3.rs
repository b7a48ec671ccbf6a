use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use log::warn;

use crate::{Error, GetResult, ListPage, ObjectStore, ObjectSummary};

/// `object_store.*` options from §6, narrowed to what building one
/// `aws_sdk_s3::Client` needs. Held separately from `fastshot-core`'s full
/// `Config` so this crate doesn't depend on the top crate.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub proxy_url: Option<String>,
    pub tls_verify: bool,
    /// Deadline applied to each individual call (§5, default 30s). Not
    /// the SDK's own connect/retry timeouts -- this bounds how long one
    /// `ObjectStore` method may keep a caller waiting regardless of what
    /// the SDK is doing underneath.
    pub op_timeout: Duration,
}

/// S3-backed `ObjectStore`. Builds exactly one `aws_sdk_s3::Client` up
/// front and reuses it for every call -- the same "one long-lived client,
/// never reconstruct per call" discipline `peoci::ocidist::Client::new`
/// applies to its `reqwest::Client`.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    op_timeout: Duration,
}

/// Runs `fut`, mapping a blown deadline to the same `Transient` bucket as
/// any other retryable OSA failure (§5, §7).
async fn with_timeout<F, T>(timeout: Duration, fut: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or_else(|_| Err(Error::Transient(format!("object store call exceeded {timeout:?}"))))
}

impl S3ObjectStore {
    pub async fn connect(cfg: S3Config) -> Self {
        if !cfg.tls_verify {
            warn!(
                "tls_verify=false for bucket {}: only use this against a trusted proxied endpoint",
                cfg.bucket
            );
        }
        if cfg.proxy_url.is_some() {
            // aws-sdk-s3's default HTTP client is configured process-wide;
            // routing through an HTTP proxy requires swapping in a custom
            // `aws_smithy_runtime_api::client::http::HttpClient` built on
            // a proxy-aware connector. Tracked as a follow-up; the common
            // case (direct connection, optionally with a custom endpoint
            // for S3-compatible stores) works today.
            warn!("object_store.proxy_url is configured but not yet wired into the S3 client");
        }

        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            "fastshot-config",
        );

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &cfg.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            // S3-compatible endpoints almost always need path-style
            // addressing rather than virtual-hosted buckets.
            .force_path_style(cfg.endpoint.is_some())
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: cfg.bucket,
            op_timeout: cfg.op_timeout,
        }
    }
}

fn classify_sdk_error<E>(err: SdkError<E>) -> Error
where
    E: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            Error::Transient(format!("{err:?}"))
        }
        SdkError::ResponseError(_) => Error::Transient(format!("{err:?}")),
        SdkError::ServiceError(service_err) => {
            let status = service_err.raw().status().as_u16();
            match status {
                401 | 403 => Error::AuthDenied(format!("{err:?}")),
                412 => Error::PreconditionFailed,
                500..=599 => Error::Transient(format!("{err:?}")),
                _ => Error::Transient(format!("{err:?}")),
            }
        }
        _ => Error::Transient(format!("{err:?}")),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_page(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, Error> {
        with_timeout(self.op_timeout, async {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket).prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }
            let output = request.send().await.map_err(classify_sdk_error)?;

            let items = output
                .contents()
                .iter()
                .map(|obj| ObjectSummary {
                    key: obj.key().unwrap_or_default().to_string(),
                    size: obj.size().unwrap_or(0) as u64,
                    etag: obj.e_tag().map(|s| s.trim_matches('"').to_string()),
                })
                .collect();

            Ok(ListPage {
                items,
                continuation_token: output.next_continuation_token().map(str::to_string),
            })
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<GetResult>, Error> {
        with_timeout(self.op_timeout, async {
            let result = self.client.get_object().bucket(&self.bucket).key(key).send().await;
            match result {
                Ok(output) => {
                    let etag = output.e_tag().map(|s| s.trim_matches('"').to_string());
                    let bytes = output
                        .body
                        .collect()
                        .await
                        .map_err(|e| Error::Transient(e.to_string()))?
                        .into_bytes();
                    Ok(Some(GetResult { bytes, etag }))
                }
                Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 404 => Ok(None),
                Err(e) => Err(classify_sdk_error(e)),
            }
        })
        .await
    }

    async fn put(&self, key: &str, body: Bytes, if_match: Option<&str>) -> Result<String, Error> {
        with_timeout(self.op_timeout, async {
            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(body));
            request = match if_match {
                // an empty precondition means "only if the key doesn't exist
                // yet", mirrored from S3's `If-None-Match: *` semantics used
                // by the rebuild path (§4.3 step 1) when no manifest exists.
                Some(etag) if etag.is_empty() => request.if_none_match("*"),
                Some(etag) => request.if_match(etag),
                None => request,
            };
            let output = request.send().await.map_err(classify_sdk_error)?;
            Ok(output
                .e_tag()
                .map(|s| s.trim_matches('"').to_string())
                .unwrap_or_default())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        with_timeout(self.op_timeout, async {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(classify_sdk_error)?;
            Ok(())
        })
        .await
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectSummary>, Error> {
        with_timeout(self.op_timeout, async {
            let result = self.client.head_object().bucket(&self.bucket).key(key).send().await;
            match result {
                Ok(output) => Ok(Some(ObjectSummary {
                    key: key.to_string(),
                    size: output.content_length().unwrap_or(0) as u64,
                    etag: output.e_tag().map(|s| s.trim_matches('"').to_string()),
                })),
                Err(SdkError::ServiceError(e)) if e.raw().status().as_u16() == 404 => Ok(None),
                Err(e) => Err(classify_sdk_error(e)),
            }
        })
        .await
    }
}
