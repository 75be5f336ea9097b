//! Object storage collaborator
//!
//! Lists and downloads decom log files from an S3-compatible bucket.
//! Listing is scoped to `{scope}/decom_logs/{tlm|cmd}/{target}/` and
//! returned newest-first; download transparently decompresses `.gz`
//! objects before handing bytes to the decoder.

use crate::model::{listing_prefix, LogCategory, LogFile};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    Client,
};
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::{debug, info};

pub mod config;

/// Listing/download seam the orchestrator depends on
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Decom log files for one (category, target), newest first
    async fn list(&self, category: LogCategory, target: &str) -> Result<Vec<LogFile>>;

    /// Download a file and return its decompressed bytes
    async fn fetch(&self, file: &LogFile) -> Result<Vec<u8>>;
}

/// S3-backed log store
#[derive(Clone)]
pub struct S3LogStore {
    client: Client,
    bucket: String,
    scope: String,
}

impl S3LogStore {
    pub async fn new(config: config::StorageConfig, scope: &str) -> Result<Self> {
        debug!("Initializing storage with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "tsm-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
            scope: scope.to_string(),
        })
    }
}

#[async_trait]
impl LogStore for S3LogStore {
    async fn list(&self, category: LogCategory, target: &str) -> Result<Vec<LogFile>> {
        let prefix = listing_prefix(&self.scope, category, target);
        debug!("Listing objects in s3://{}/{}", self.bucket, prefix);

        let mut files = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.context("Failed to list S3 objects")?;

            for object in response.contents() {
                if let Some(file) = object.key().and_then(LogFile::from_key) {
                    files.push(file);
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        // Newest first; start timestamps are zero-padded digit strings
        files.sort_by(|a, b| b.start.cmp(&a.start));

        debug!(
            prefix = %prefix,
            count = files.len(),
            "Found decom log files"
        );
        Ok(files)
    }

    async fn fetch(&self, file: &LogFile) -> Result<Vec<u8>> {
        debug!("Downloading s3://{}/{}", self.bucket, file.path);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&file.path)
            .send()
            .await
            .context(format!("Failed to download from S3: {}", file.path))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!(
            "Downloaded {} bytes from s3://{}/{}",
            data.len(),
            self.bucket,
            file.path
        );

        if file.compressed {
            let mut decompressed = Vec::new();
            GzDecoder::new(data.as_slice())
                .read_to_end(&mut decompressed)
                .context(format!("Failed to decompress {}", file.path))?;
            Ok(decompressed)
        } else {
            Ok(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_gzip_round_trip_matches_fetch_decompression() {
        let original = b"decom log payload bytes";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(original).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressed = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, original);
    }
}
