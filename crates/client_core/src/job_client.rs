use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::JobId,
    error::ErrorBody,
    protocol::{CodeResponse, GenerateRequest, GenerateResponse, SolutionResponse, StatusResponse},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{ClientConfig, ConfigError};

/// Used when the executor rejects a prompt without saying why.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Failed to generate visualization";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("job executor unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("job executor rejected the prompt (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ArtifactFetchError {
    #[error("failed to fetch solution: {0}")]
    Solution(#[source] TransportError),
    #[error("failed to fetch code: {0}")]
    Code(#[source] TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub stage: String,
    pub error: Option<String>,
}

impl From<StatusResponse> for StatusReport {
    fn from(value: StatusResponse) -> Self {
        Self {
            stage: value.status,
            error: value.error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    pub solution_text: String,
    pub code_text: String,
}

/// Remote contract of the job executor. Implementations never retry.
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn create_job(&self, prompt: &str) -> Result<JobId, SubmissionError>;
    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, TransportError>;
    async fn fetch_artifacts(&self, job_id: &JobId) -> Result<Artifacts, ArtifactFetchError>;
    /// Address of the rendered video. Derived locally, no request is made.
    fn video_ref(&self, job_id: &JobId) -> Url;
}

/// Appends path segments to `base`, percent-encoding each one.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

pub struct HttpJobClient {
    http: Client,
    base: Url,
}

impl HttpJobClient {
    pub fn new(base: Url) -> Result<Self, ConfigError> {
        Self::new_with_http(base, Client::new())
    }

    pub fn new_with_http(base: Url, http: Client) -> Result<Self, ConfigError> {
        if base.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedBaseUrl(base.to_string()));
        }
        Ok(Self { http, base })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Self::new_with_http(config.base_url()?, http)
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        decode(&url, response).await
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, TransportError> {
    response
        .json::<T>()
        .await
        .map_err(|source| TransportError::Decode {
            url: url.to_string(),
            source,
        })
}

#[async_trait]
impl JobClient for HttpJobClient {
    async fn create_job(&self, prompt: &str) -> Result<JobId, SubmissionError> {
        let url = endpoint(&self.base, &["generate"]);
        debug!(%url, "POST");
        let response = self
            .http
            .post(url.clone())
            .json(&GenerateRequest {
                prompt: prompt.to_string(),
            })
            .send()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .map(|body| body.error)
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string());
            return Err(SubmissionError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = decode(&url, response).await?;
        Ok(body.job_id)
    }

    async fn fetch_status(&self, job_id: &JobId) -> Result<StatusReport, TransportError> {
        let body: StatusResponse = self
            .get_json(endpoint(&self.base, &["status", job_id.as_str()]))
            .await?;
        Ok(body.into())
    }

    async fn fetch_artifacts(&self, job_id: &JobId) -> Result<Artifacts, ArtifactFetchError> {
        let solution = async {
            self.get_json::<SolutionResponse>(endpoint(&self.base, &["solution", job_id.as_str()]))
                .await
                .map_err(ArtifactFetchError::Solution)
        };
        let code = async {
            self.get_json::<CodeResponse>(endpoint(&self.base, &["code", job_id.as_str()]))
                .await
                .map_err(ArtifactFetchError::Code)
        };
        let (solution, code) = futures::try_join!(solution, code)?;
        Ok(Artifacts {
            solution_text: solution.solution,
            code_text: code.manim_code,
        })
    }

    fn video_ref(&self, job_id: &JobId) -> Url {
        endpoint(&self.base, &["video", job_id.as_str()])
    }
}

#[cfg(test)]
#[path = "tests/job_client_tests.rs"]
mod tests;
