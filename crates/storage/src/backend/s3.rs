//! S3-compatible object store.
//!
//! Works against AWS S3, Backblaze B2, Tigris, MinIO and other S3-compatible
//! services. Containers are key prefixes inside a single bucket: an object
//! lives at `<prefix>/<container>/<id>`. Tags are stored as S3 object tags
//! and metadata as user metadata, next to a private creation-time entry so
//! that overwrites keep the original creation time.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the configuration file.

use crate::ObjectStore;
use crate::backend::ObjectIdStream;
use crate::error::{ErrorKind, Result};
use crate::models::{ObjectId, ObjectMetadata, ObjectProperties, ObjectTags, format_timestamp, parse_timestamp};
use crate::path::{validate as validate_path, validate_object_id};
use crate::search::TagQuery;
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::types::{MetadataDirective, Tag, Tagging, TaggingDirective};
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// User metadata key holding the store-assigned creation time.
const CREATED_AT_KEY: &str = "kept-created-at";

/// S3-compatible object store.
///
/// # Examples
///
/// ```no_run
/// use kept_storage::backend::S3Store;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = S3Store::new(
///     "offsite",
///     "my-bucket",
///     Some("kept".to_string()),
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com".to_string()),
///     "access_key_id",
///     "secret_access_key",
/// ).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Store {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    rate_limiter: Arc<Semaphore>,
}

impl S3Store {
    /// Create a new S3 object store.
    ///
    /// # Arguments
    /// * `name` - A name for this store (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix every container lives under
    /// * `region` - AWS region or provider-specific region
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub async fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = prefix
            .map(validate_path)
            .transpose()?
            .map(|p| p.to_str().map(|s| s.to_string()).ok_or_raise(|| ErrorKind::InvalidPath(p)))
            .transpose()?;
        let credentials = Credentials::new(key_id, key_secret, None, None, "kept-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // 1 initial attempt + 3 retries with exponential backoff
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Path-style addressing for S3-compatible services
            .force_path_style(true);
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        Ok(Self {
            name: name.into(),
            client: Client::from_conf(config_builder.build()),
            bucket: bucket.into(),
            prefix,
            rate_limiter: Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS)),
        })
    }

    /// Key prefix (with trailing slash) under which a container's objects live.
    fn container_prefix(&self, container: &str) -> Result<String> {
        let container = validate_path(container)?;
        let container = container.to_string_lossy();
        Ok(match &self.prefix {
            Some(prefix) => format!("{}/{}/", prefix.trim_end_matches('/'), container),
            None => format!("{container}/"),
        })
    }

    fn full_key(&self, container: &str, id: &ObjectId) -> Result<String> {
        let id = validate_object_id(id.as_str())?;
        Ok(format!("{}{}", self.container_prefix(container)?, id))
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.rate_limiter
            .clone()
            .acquire_owned()
            .await
            .or_raise(|| ErrorKind::BackendError("S3 rate limiter closed".to_string()))
    }

    fn map_sdk_error<E, R>(err: SdkError<E, R>) -> ErrorKind
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        match err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                ErrorKind::Network(DisplayErrorContext(&err).to_string())
            },
            _ => ErrorKind::BackendError(DisplayErrorContext(&err).to_string()),
        }
    }

    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    fn tagging(tags: &ObjectTags) -> Result<Tagging> {
        let tag_set = tags
            .to_pairs()
            .into_iter()
            .map(|(key, value)| {
                Tag::builder()
                    .key(key)
                    .value(value)
                    .build()
                    .or_raise(|| ErrorKind::BackendError(format!("invalid tag `{key}`")))
            })
            .collect::<Result<Vec<_>>>()?;
        Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .or_raise(|| ErrorKind::BackendError("invalid tag set".to_string()))
    }

    fn user_metadata(metadata: &ObjectMetadata, created_at: OffsetDateTime) -> HashMap<String, String> {
        let mut map: HashMap<String, String> =
            metadata.to_pairs().into_iter().map(|(key, value)| (key.to_string(), value)).collect();
        map.insert(CREATED_AT_KEY.to_string(), format_timestamp(created_at));
        map
    }

    /// Creation time and metadata from a HEAD request. `Ok(None)` if the
    /// object doesn't exist.
    async fn head(&self, key: &str) -> Result<Option<(OffsetDateTime, ObjectMetadata)>> {
        let _permit = self.acquire_permit().await?;
        let output = match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => return Ok(None),
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        };
        let user = output.metadata().cloned().unwrap_or_default();
        let created_at = match user.get(CREATED_AT_KEY).and_then(|v| parse_timestamp(v)) {
            Some(created_at) => created_at,
            // Written by something else: fall back to the last write.
            None => match output.last_modified() {
                Some(dt) => Self::parse_datetime(dt)?,
                None => OffsetDateTime::now_utc(),
            },
        };
        let metadata = ObjectMetadata::from_pairs(user.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        Ok(Some((created_at, metadata)))
    }

    async fn tags(&self, key: &str) -> Result<ObjectTags> {
        let _permit = self.acquire_permit().await?;
        let output = self
            .client
            .get_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(ObjectTags::from_pairs(output.tag_set().iter().map(|tag| (tag.key(), tag.value()))))
    }

    async fn put_tags(&self, key: &str, tags: &ObjectTags) -> Result<()> {
        let _permit = self.acquire_permit().await?;
        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(Self::tagging(tags)?)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn require(&self, container: &str, id: &ObjectId) -> Result<(String, OffsetDateTime, ObjectMetadata)> {
        let key = self.full_key(container, id)?;
        let (created_at, metadata) = self.head(&key).await?.ok_or_raise(|| ErrorKind::not_found(container, id))?;
        Ok((key, created_at, metadata))
    }
}

/// Object id for a listed key, or `None` if the key belongs to a nested
/// container (or is the container "directory" itself).
fn id_from_key(container_prefix: &str, key: &str) -> Option<ObjectId> {
    key.strip_prefix(container_prefix)
        .filter(|rest| validate_object_id(rest).is_ok())
        .map(ObjectId::from)
}

#[async_trait]
impl ObjectStore for S3Store {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self, container: &'a str, filter: Option<&'a TagQuery>) -> ObjectIdStream<'a> {
        let prefix = match self.container_prefix(container) {
            Ok(prefix) => prefix,
            Err(e) => return Box::pin(futures::stream::once(async { Result::Err(e) })),
        };
        Box::pin(stream! {
            let mut pages = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .into_paginator()
                .send();
            loop {
                let page = {
                    let _permit = match self.acquire_permit().await {
                        Ok(permit) => permit,
                        Err(e) => { yield Err(e); break; },
                    };
                    pages.next().await
                };
                let output = match page {
                    Some(Ok(output)) => output,
                    Some(Err(err)) => { yield Err(exn::Exn::from(Self::map_sdk_error(err))); break; },
                    None => break,
                };
                for object in output.contents() {
                    let Some(key) = object.key() else { continue };
                    let Some(id) = id_from_key(&prefix, key) else { continue };
                    match filter {
                        None => yield Ok(id),
                        Some(query) => match self.tags(key).await {
                            Ok(tags) if query.matches(&tags) => yield Ok(id),
                            Ok(_) => {},
                            Err(e) => yield Err(e),
                        },
                    }
                }
            }
        })
    }

    async fn get(&self, container: &str, id: &ObjectId) -> Result<Vec<u8>> {
        let key = self.full_key(container, id)?;
        let _permit = self.acquire_permit().await?;
        let output = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(output) => output,
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                exn::bail!(ErrorKind::not_found(container, id))
            },
            Err(err) => exn::bail!(Self::map_sdk_error(err)),
        };
        let body = output
            .body
            .collect()
            .await
            .or_raise(|| ErrorKind::Network(format!("failed reading body of `{key}`")))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn put(
        &self,
        container: &str,
        id: Option<&ObjectId>,
        data: &[u8],
        tags: &ObjectTags,
        metadata: &ObjectMetadata,
    ) -> Result<ObjectId> {
        let id = id.cloned().unwrap_or_else(ObjectId::generate);
        let key = self.full_key(container, &id)?;
        let created_at = match self.head(&key).await? {
            Some((created_at, _)) => created_at,
            None => OffsetDateTime::now_utc(),
        };
        {
            let _permit = self.acquire_permit().await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(ByteStream::from(data.to_vec()))
                .set_metadata(Some(Self::user_metadata(metadata, created_at)))
                .send()
                .await
                .map_err(Self::map_sdk_error)?;
        }
        self.put_tags(&key, tags).await?;
        tracing::debug!(store = %self.name, container, id = %id, bytes = data.len(), "Wrote object");
        Ok(id)
    }

    async fn set_tags(&self, container: &str, id: &ObjectId, tags: &ObjectTags) -> Result<()> {
        let (key, _, _) = self.require(container, id).await?;
        self.put_tags(&key, tags).await
    }

    async fn set_metadata(&self, container: &str, id: &ObjectId, metadata: &ObjectMetadata) -> Result<()> {
        let (key, created_at, _) = self.require(container, id).await?;
        let _permit = self.acquire_permit().await?;
        // Metadata is immutable in S3; copying the object onto itself with a
        // replacement directive is the only way to change it.
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&key)
            .copy_source(format!("{}/{}", self.bucket, key))
            .metadata_directive(MetadataDirective::Replace)
            .tagging_directive(TaggingDirective::Copy)
            .set_metadata(Some(Self::user_metadata(metadata, created_at)))
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn delete(&self, container: &str, id: &ObjectId) -> Result<()> {
        // S3 deletes are idempotent; check first to report missing objects.
        let (key, _, _) = self.require(container, id).await?;
        let _permit = self.acquire_permit().await?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(Self::map_sdk_error)?;
        Ok(())
    }

    async fn properties(&self, container: &str, id: &ObjectId) -> Result<ObjectProperties> {
        let (key, created_at, metadata) = self.require(container, id).await?;
        Ok(ObjectProperties {
            tags: self.tags(&key).await?,
            metadata,
            created_at,
        })
    }
}
