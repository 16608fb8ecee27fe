//! Job artifact platform
//!
//! The post phase hands the exported build record bundle to the CI platform
//! as a retained artifact and publishes the build summary. [`JobPlatform`] is
//! the seam; [`GithubPlatform`] talks to the GitHub Actions artifact service
//! (twirp JSON API + signed blob upload) and the step summary file.

use crate::env::GithubContext;
use crate::errors::{ArtifactError, Result};
use base64::Engine as _;
use chrono::{Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, instrument};

/// Content type of exported build record bundles
pub const BUILD_RECORD_MIME_TYPE: &str = "application/gzip";

const ARTIFACT_SERVICE: &str = "twirp/github.actions.results.api.v1.ArtifactService";
const ARTIFACT_VERSION: u32 = 4;
const RESULTS_SCOPE_PREFIX: &str = "Actions.Results:";

/// A file to upload as a job artifact
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub mime_type: String,
    pub retention_days: u32,
}

/// Reference to an uploaded artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub id: String,
    pub filename: String,
    pub digest: String,
    pub size: u64,
    pub url: String,
}

/// Artifact upload and summary publishing
#[async_trait::async_trait]
pub trait JobPlatform: Send + Sync {
    /// Upload a single file as a retained job artifact
    async fn upload_artifact(&self, request: &UploadRequest) -> Result<UploadResult>;

    /// Publish a Markdown summary for the current job step
    async fn publish_summary(&self, markdown: &str) -> Result<()>;
}

/// GitHub Actions implementation of [`JobPlatform`]
#[derive(Debug, Clone)]
pub struct GithubPlatform {
    client: reqwest::Client,
    context: GithubContext,
}

#[derive(Serialize)]
struct CreateArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    version: u32,
    expires_at: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct CreateArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    signed_upload_url: String,
}

#[derive(Serialize)]
struct FinalizeArtifactRequest<'a> {
    workflow_run_backend_id: &'a str,
    workflow_job_run_backend_id: &'a str,
    name: &'a str,
    size: String,
    hash: String,
}

#[derive(Deserialize)]
struct FinalizeArtifactResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    artifact_id: serde_json::Value,
}

/// Workflow run and job ids the artifact service keys artifacts by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendIds {
    pub workflow_run: String,
    pub workflow_job_run: String,
}

impl GithubPlatform {
    pub fn new(context: GithubContext) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bakeflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ArtifactError::from)?;
        Ok(Self { client, context })
    }

    fn results_url(&self) -> Result<&str> {
        self.context
            .results_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .ok_or_else(|| {
                ArtifactError::NotAvailable {
                    reason: "ACTIONS_RESULTS_URL is not set".to_string(),
                }
                .into()
            })
    }

    fn runtime_token(&self) -> Result<&str> {
        self.context
            .runtime_token
            .as_ref()
            .map(|t| t.expose())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ArtifactError::NotAvailable {
                    reason: "ACTIONS_RUNTIME_TOKEN is not set".to_string(),
                }
                .into()
            })
    }

    async fn twirp<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}/{}", self.results_url()?, ARTIFACT_SERVICE, method);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.runtime_token()?)
            .json(body)
            .send()
            .await
            .map_err(ArtifactError::from)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Service {
                message: format!("{} returned {}: {}", method, status, text.trim()),
            }
            .into());
        }
        let parsed = response.json::<Resp>().await.map_err(ArtifactError::from)?;
        Ok(parsed)
    }

    fn artifact_url(&self, id: &str) -> String {
        format!(
            "{}/{}/actions/runs/{}/artifacts/{}",
            self.context.server_url,
            self.context.repository.as_deref().unwrap_or_default(),
            self.context.run_id.as_deref().unwrap_or_default(),
            id
        )
    }
}

#[async_trait::async_trait]
impl JobPlatform for GithubPlatform {
    #[instrument(skip_all, fields(path = %request.path.display()))]
    async fn upload_artifact(&self, request: &UploadRequest) -> Result<UploadResult> {
        let ids = backend_ids(self.runtime_token()?)?;
        let filename = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ArtifactError::Service {
                message: format!("{} has no file name", request.path.display()),
            })?;

        let content = tokio::fs::read(&request.path)
            .await
            .map_err(ArtifactError::from)?;
        let size = content.len() as u64;
        let digest = format!("{:x}", Sha256::digest(&content));

        let expires_at = (Utc::now() + Duration::days(i64::from(request.retention_days)))
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let created: CreateArtifactResponse = self
            .twirp(
                "CreateArtifact",
                &CreateArtifactRequest {
                    workflow_run_backend_id: &ids.workflow_run,
                    workflow_job_run_backend_id: &ids.workflow_job_run,
                    name: &filename,
                    version: ARTIFACT_VERSION,
                    expires_at,
                    mime_type: &request.mime_type,
                },
            )
            .await?;
        if !created.ok || created.signed_upload_url.is_empty() {
            return Err(ArtifactError::Service {
                message: "CreateArtifact did not return an upload URL".to_string(),
            }
            .into());
        }

        debug!("Uploading {} bytes to blob storage", size);
        let response = self
            .client
            .put(&created.signed_upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, request.mime_type.as_str())
            .body(content)
            .send()
            .await
            .map_err(ArtifactError::from)?;
        if !response.status().is_success() {
            return Err(ArtifactError::Service {
                message: format!("blob upload returned {}", response.status()),
            }
            .into());
        }

        let finalized: FinalizeArtifactResponse = self
            .twirp(
                "FinalizeArtifact",
                &FinalizeArtifactRequest {
                    workflow_run_backend_id: &ids.workflow_run,
                    workflow_job_run_backend_id: &ids.workflow_job_run,
                    name: &filename,
                    size: size.to_string(),
                    hash: format!("sha256:{}", digest),
                },
            )
            .await?;
        let id = match &finalized.artifact_id {
            serde_json::Value::String(id) => id.clone(),
            serde_json::Value::Number(id) => id.to_string(),
            _ => String::new(),
        };
        if !finalized.ok || id.is_empty() {
            return Err(ArtifactError::Service {
                message: "FinalizeArtifact did not return an artifact id".to_string(),
            }
            .into());
        }

        let url = self.artifact_url(&id);
        info!("Uploaded build record {} as artifact {}", filename, id);
        Ok(UploadResult {
            id,
            filename,
            digest,
            size,
            url,
        })
    }

    async fn publish_summary(&self, markdown: &str) -> Result<()> {
        let path = self
            .context
            .step_summary
            .as_ref()
            .ok_or_else(|| ArtifactError::NotAvailable {
                reason: "GITHUB_STEP_SUMMARY is not set".to_string(),
            })?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(ArtifactError::from)?;
        file.write_all(markdown.as_bytes())
            .map_err(ArtifactError::from)?;
        debug!("Wrote build summary to {}", path.display());
        Ok(())
    }
}

/// Extract the workflow run/job backend ids from the runtime token's `scp` claim
pub fn backend_ids(token: &str) -> Result<BackendIds> {
    let invalid = |reason: &str| -> crate::errors::BakeflowError {
        ArtifactError::NotAvailable {
            reason: format!("invalid runtime token: {}", reason),
        }
        .into()
    };

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| invalid("not a JWT"))?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid("payload is not base64"))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).map_err(|_| invalid("payload is not JSON"))?;
    let scopes = claims
        .get("scp")
        .and_then(|s| s.as_str())
        .ok_or_else(|| invalid("missing scp claim"))?;

    scopes
        .split_whitespace()
        .find_map(|scope| {
            let ids = scope.strip_prefix(RESULTS_SCOPE_PREFIX)?;
            let (run, job) = ids.split_once(':')?;
            Some(BackendIds {
                workflow_run: run.to_string(),
                workflow_job_run: job.to_string(),
            })
        })
        .ok_or_else(|| invalid("no Actions.Results scope"))
}
