use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as ObjectBody;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;
use serde::Deserialize;

use super::{ByteStream, ReadOptions, ReadResult, ReadStreamOptions, StorageEngine};
use crate::StorageError;
use crate::stream::{ByteSink, ChunkWriter};

/// Key prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "resources";
/// Size of the parts of a multipart upload. Also the smallest part S3 accepts.
pub const PART_SIZE: usize = 5 * 1024 * 1024;
/// Lifetime of presigned links.
pub const DEFAULT_PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

const WRITE_HIGH_WATER_MARK: usize = 16 * 1024;

/// Connection settings for an [`S3StorageEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Prefix prepended to every key. Defaults to [`DEFAULT_PREFIX`].
    #[serde(default)]
    pub prefix: Option<String>,
}

impl S3Config {
    /// Reads the configuration from `S3_ENDPOINT`, `S3_REGION`, `S3_ACCESS_KEY`,
    /// `S3_SECRET_ACCESS_KEY`, `S3_BUCKET` and the optional `S3_PREFIX`.
    pub fn from_env() -> Result<Self, StorageError> {
        fn var(name: &str) -> Result<String, StorageError> {
            std::env::var(name)
                .map_err(|_| StorageError::Config(format!("environment variable {name} is not set")))
        }

        Ok(Self {
            endpoint: var("S3_ENDPOINT")?,
            region: var("S3_REGION")?,
            access_key_id: var("S3_ACCESS_KEY")?,
            secret_access_key: var("S3_SECRET_ACCESS_KEY")?,
            bucket: var("S3_BUCKET")?,
            prefix: std::env::var("S3_PREFIX").ok(),
        })
    }
}

/// Options for [`S3StorageEngine::download_link`].
#[derive(Debug, Clone, Default)]
pub struct PresignOptions {
    /// Defaults to [`DEFAULT_PRESIGN_EXPIRY`].
    pub expires_in: Option<Duration>,
    pub response_content_disposition: Option<String>,
    pub response_content_type: Option<String>,
}

/// Stores files as objects in an S3 compatible bucket.
///
/// Object keys are the normalised join of the configured prefix and the storage path. Ranged
/// reads use `Range` requests; write streams upload parts of [`PART_SIZE`] bytes and fall back to
/// a single `PutObject` for smaller files.
#[derive(Clone)]
pub struct S3StorageEngine {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3StorageEngine {
    /// Creates an engine with a path-style client for `config`.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "tabula",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(config.endpoint)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self::with_client(
            Client::from_conf(sdk_config),
            config.bucket,
            config.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
        )
    }

    /// Creates an engine on top of an existing client.
    pub fn with_client(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Returns the object key for a storage path.
    pub fn key(&self, path: &str) -> String {
        normalize_key(&format!("{}/{}", self.prefix, path))
    }

    /// Returns a presigned URL that downloads `path`.
    pub async fn download_link(
        &self,
        path: &str,
        options: PresignOptions,
    ) -> Result<String, StorageError> {
        let config = PresigningConfig::expires_in(options.expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY))
            .map_err(StorageError::backend)?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .set_response_content_disposition(options.response_content_disposition)
            .set_response_content_type(options.response_content_type)
            .presigned(config)
            .await
            .map_err(StorageError::backend)?;
        Ok(request.uri().to_string())
    }

    /// Returns a presigned URL that accepts a `PUT` of `path`.
    pub async fn upload_link(&self, path: &str) -> Result<String, StorageError> {
        let config =
            PresigningConfig::expires_in(DEFAULT_PRESIGN_EXPIRY).map_err(StorageError::backend)?;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .presigned(config)
            .await
            .map_err(StorageError::backend)?;
        Ok(request.uri().to_string())
    }
}

#[async_trait]
impl StorageEngine for S3StorageEngine {
    async fn write(&self, path: &str, contents: Bytes) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .acl(ObjectCannedAcl::Private)
            .body(ObjectBody::from(contents))
            .send()
            .await
            .map_err(StorageError::backend)?;
        Ok(())
    }

    async fn read(&self, path: &str, options: ReadOptions) -> Result<ReadResult, StorageError> {
        let position = options.position;
        let (mut buffer, length) = options.into_buffer();
        if length == 0 {
            return Ok(ReadResult {
                buffer,
                bytes_read: 0,
            });
        }

        let mut stream = self.create_read_stream(
            path,
            ReadStreamOptions {
                start: Some(position),
                end: Some(position + length as u64 - 1),
                high_water_mark: None,
            },
        );
        let mut bytes_read = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let take = chunk.len().min(length - bytes_read);
            buffer[bytes_read..bytes_read + take].copy_from_slice(&chunk[..take]);
            bytes_read += take;
            if bytes_read == length {
                break;
            }
        }
        Ok(ReadResult { buffer, bytes_read })
    }

    fn create_read_stream(&self, path: &str, options: ReadStreamOptions) -> ByteStream {
        if let Err(e) = options.validate() {
            return stream::once(async move { Err(e) }).boxed();
        }

        let start = options.start.unwrap_or(0);
        let range = match options.end {
            Some(end) => format!("bytes={start}-{end}"),
            None => format!("bytes={start}-"),
        };
        let request = ObjectRequest {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.key(path),
            path: path.to_string(),
            range,
        };

        stream::unfold(ObjectReadState::Pending(request), |state| async move {
            match state {
                ObjectReadState::Pending(request) => request.send().await,
                ObjectReadState::Body { body, path } => next_chunk(body, path).await,
                ObjectReadState::Done => None,
            }
        })
        .boxed()
    }

    fn create_write_stream(&self, path: &str) -> ByteSink {
        ByteSink::spawn(
            MultipartWriter {
                client: self.client.clone(),
                bucket: self.bucket.clone(),
                key: self.key(path),
                buffer: Vec::new(),
                upload_id: None,
                parts: Vec::new(),
            },
            WRITE_HIGH_WATER_MARK,
        )
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| classify(e, path))?;
        head.content_length()
            .and_then(|len| u64::try_from(len).ok())
            .ok_or_else(|| StorageError::Config(format!("no content length for '{path}'")))
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if status_code(&e) == Some(404) => Ok(false),
            Err(e) => Err(StorageError::backend(e)),
        }
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| classify(e, path))?;
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(format!("{}/{}", self.bucket, self.key(old_path)))
            .key(self.key(new_path))
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(|e| classify(e, old_path))?;
        self.remove(old_path).await
    }
}

fn status_code<E>(err: &SdkError<E>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn classify<E>(err: SdkError<E>, path: &str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    if status_code(&err) == Some(404) {
        StorageError::FileNotFound(path.to_string())
    } else {
        StorageError::backend(err)
    }
}

/// Collapses empty, `.` and `..` segments of a slash separated key.
fn normalize_key(raw: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

struct ObjectRequest {
    client: Client,
    bucket: String,
    key: String,
    path: String,
    range: String,
}

enum ObjectReadState {
    Pending(ObjectRequest),
    Body { body: ObjectBody, path: String },
    Done,
}

type ReadStep = Option<(Result<Bytes, StorageError>, ObjectReadState)>;

impl ObjectRequest {
    async fn send(self) -> ReadStep {
        let response = self
            .client
            .get_object()
            .bucket(self.bucket)
            .key(self.key)
            .range(self.range)
            .send()
            .await;

        match response {
            Ok(output) => next_chunk(output.body, self.path).await,
            // The requested range starts past the end of the object
            Err(e) if status_code(&e) == Some(416) => None,
            Err(e) => Some((Err(classify(e, &self.path)), ObjectReadState::Done)),
        }
    }
}

async fn next_chunk(mut body: ObjectBody, path: String) -> ReadStep {
    match body.next().await {
        Some(Ok(chunk)) => Some((Ok(chunk), ObjectReadState::Body { body, path })),
        Some(Err(e)) => Some((Err(StorageError::backend(e)), ObjectReadState::Done)),
        None => None,
    }
}

/// Uploads a write stream, switching to a multipart upload once a full part has been buffered.
struct MultipartWriter {
    client: Client,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl MultipartWriter {
    async fn upload_id(&mut self) -> Result<String, StorageError> {
        if let Some(id) = &self.upload_id {
            return Ok(id.clone());
        }
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(StorageError::backend)?;
        let id = created
            .upload_id()
            .ok_or_else(|| StorageError::Config("multipart upload returned no id".into()))?
            .to_string();
        self.upload_id = Some(id.clone());
        Ok(id)
    }

    async fn upload_part(&mut self, data: Vec<u8>) -> Result<(), StorageError> {
        let upload_id = self.upload_id().await?;
        let part_number = self.parts.len() as i32 + 1;
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ObjectBody::from(data))
            .send()
            .await
            .map_err(StorageError::backend)?;
        self.parts.push(
            CompletedPart::builder()
                .set_e_tag(uploaded.e_tag().map(str::to_string))
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }
}

#[async_trait]
impl ChunkWriter for MultipartWriter {
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= PART_SIZE {
            let rest = self.buffer.split_off(PART_SIZE);
            let part = std::mem::replace(&mut self.buffer, rest);
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        let data = std::mem::take(&mut self.buffer);
        if self.upload_id.is_none() {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .acl(ObjectCannedAcl::Private)
                .body(ObjectBody::from(data))
                .send()
                .await
                .map_err(StorageError::backend)?;
            return Ok(());
        }

        if !data.is_empty() {
            self.upload_part(data).await?;
        }
        let upload_id = self.upload_id().await?;
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(std::mem::take(&mut self.parts)))
                    .build(),
            )
            .send()
            .await
            .map_err(StorageError::backend)?;
        Ok(())
    }

    async fn abort(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await;
        #[cfg(feature = "logging")]
        if let Err(e) = aborted {
            log::warn!("failed to abort multipart upload of '{}': {e}", self.key);
        }
        #[cfg(not(feature = "logging"))]
        let _ = aborted;
    }
}
