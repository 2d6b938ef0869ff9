//! S3 (and S3-compatible) backend built on the AWS SDK.
//!
//! The configured container is used as the bucket name. When `endpoint_url` is set the client
//! switches to path-style addressing so that MinIO and friends work.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use bytes::Bytes;
use tracing::{debug, instrument};

use super::{BlobStore, Result, StorageError};
use crate::config::S3Config;

pub struct S3BlobStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint: String,
}

impl S3BlobStore {
    pub async fn new(config: &S3Config, bucket: impl Into<String>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(key_id, secret, None, None, "picstash-config"));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::Config(
                    "access_key_id and secret_access_key must be set together".to_string(),
                ));
            }
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        let endpoint = match &config.endpoint_url {
            Some(url) => {
                let endpoint = url.as_str().trim_end_matches('/').to_string();
                builder = builder.endpoint_url(&endpoint).force_path_style(true);
                endpoint
            }
            None => format!("https://s3.{}.amazonaws.com", config.region),
        };

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
            region: config.region.clone(),
            endpoint,
        })
    }
}

fn sdk_error(operation: &str, err: impl std::error::Error) -> StorageError {
    StorageError::Sdk {
        operation: operation.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(bucket = %self.bucket, size = data.len()), err)]
    async fn put(&self, key: &str, content_type: &str, data: Bytes) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_error("upload object", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket), err)]
    async fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut pages = self.client.list_objects_v2().bucket(&self.bucket).into_paginator().send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_error("list objects", e))?;
            let before = keys.len();
            keys.extend(page.contents().iter().filter_map(|object| object.key().map(str::to_string)));
            debug!(count = keys.len() - before, "Listed object page");
        }

        Ok(keys)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket), err)]
    async fn ensure_container(&self) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 rejects an explicit location constraint
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you() || e.is_bucket_already_exists()) =>
            {
                debug!("Bucket already exists");
                Ok(())
            }
            Err(err) => Err(sdk_error("create bucket", err)),
        }
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.endpoint.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> S3Config {
        S3Config {
            region: "us-east-1".to_string(),
            endpoint_url: Some(Url::parse(&server.uri()).unwrap()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
        }
    }

    #[tokio::test]
    async fn test_default_endpoint_is_regional() {
        let config = S3Config {
            region: "eu-west-2".to_string(),
            access_key_id: Some("id".to_string()),
            secret_access_key: Some("secret".to_string()),
            ..Default::default()
        };
        let store = S3BlobStore::new(&config, "images").await.unwrap();
        assert_eq!(store.endpoint().as_deref(), Some("https://s3.eu-west-2.amazonaws.com"));
    }

    #[tokio::test]
    async fn test_custom_endpoint_is_used_as_base() {
        let server = MockServer::start().await;
        let store = S3BlobStore::new(&config_for(&server), "images").await.unwrap();
        assert_eq!(store.endpoint(), Some(server.uri()));
    }

    #[tokio::test]
    async fn test_partial_credentials_rejected() {
        let config = S3Config {
            access_key_id: Some("id".to_string()),
            ..Default::default()
        };
        let result = S3BlobStore::new(&config, "images").await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }

    #[tokio::test]
    async fn test_put_uses_path_style() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/images/a.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = S3BlobStore::new(&config_for(&server), "images").await.unwrap();
        store.put("a.png", "image/png", Bytes::from_static(b"png")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_reads_keys() {
        let server = MockServer::start().await;
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Name>images</Name><Prefix></Prefix><KeyCount>2</KeyCount><MaxKeys>1000</MaxKeys><IsTruncated>false</IsTruncated><Contents><Key>a.png</Key><Size>3</Size></Contents><Contents><Key>b.png</Key><Size>3</Size></Contents></ListBucketResult>"#;
        Mock::given(method("GET"))
            .and(path("/images"))
            .and(query_param("list-type", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let store = S3BlobStore::new(&config_for(&server), "images").await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a.png", "b.png"]);
    }
}
