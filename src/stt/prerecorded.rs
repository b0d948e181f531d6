//! Pre-recorded ASR client
//!
//! Streams a persistent MP4 to the provider's batch endpoint and returns
//! the parsed reply. The provider decodes the container itself; nothing
//! is transcoded locally.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use tokio_util::io::ReaderStream;
use tracing::info;
use url::Url;

use crate::config::AsrConfig;
use crate::errors::AsrError;
use crate::stt::messages::PrerecordedResponse;

const PROVIDER_API_URL: &str = "https://api.deepgram.com/v1/listen";

/// Upload chunk size. Large enough to keep multi-hour uploads cheap.
const UPLOAD_CHUNK_BYTES: usize = 1024 * 1024;

/// Connect quickly or not at all; the overall deadline covers a
/// multi-hour upload plus provider-side processing.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub type ProgressFn = Arc<dyn Fn(u64) + Send + Sync>;

pub struct PrerecordedClient {
    client: reqwest::Client,
    config: AsrConfig,
}

impl PrerecordedClient {
    pub fn new(config: AsrConfig) -> Result<Self, AsrError> {
        if config.api_key.is_empty() {
            return Err(AsrError::MissingCredential);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    /// Uploads the MP4 at `path` as a streamed body and returns the
    /// provider reply. `on_progress` receives cumulative bytes sent.
    pub async fn transcribe_mp4(
        &self,
        path: &Path,
        on_progress: ProgressFn,
    ) -> Result<PrerecordedResponse, AsrError> {
        let url = self.build_url()?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| AsrError::Api {
                status: 0,
                message: format!("cannot open upload file: {e}"),
            })?;
        let file_size = file
            .metadata()
            .await
            .map(|m| m.len())
            .unwrap_or_default();

        let mut sent: u64 = 0;
        let stream = ReaderStream::with_capacity(file, UPLOAD_CHUNK_BYTES).inspect_ok(move |chunk| {
            sent += chunk.len() as u64;
            on_progress(sent);
        });

        info!("Uploading {} bytes to ASR pre-recorded endpoint", file_size);
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", "video/mp4")
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AsrError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<PrerecordedResponse>().await?)
    }

    fn build_url(&self) -> Result<Url, AsrError> {
        let mut url = Url::parse(PROVIDER_API_URL).map_err(|e| AsrError::Api {
            status: 0,
            message: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("smart_format", "true")
            .append_pair("punctuate", "true")
            .append_pair("diarize", "true")
            .append_pair("utterances", "true");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credential_is_rejected() {
        let config = crate::config::Config::default().asr;
        assert!(matches!(
            PrerecordedClient::new(config),
            Err(AsrError::MissingCredential)
        ));
    }

    #[test]
    fn url_carries_transcription_flags() {
        let mut config = crate::config::Config::default().asr;
        config.api_key = "test-key".to_string();
        let client = PrerecordedClient::new(config).unwrap();
        let url = client.build_url().unwrap();
        let query = url.query().unwrap();
        for flag in [
            "model=nova-3",
            "language=ko",
            "smart_format=true",
            "punctuate=true",
            "diarize=true",
            "utterances=true",
        ] {
            assert!(query.contains(flag), "missing {flag} in {query}");
        }
    }
}
