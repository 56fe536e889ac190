// HTTP implementation of the job protocol (reqwest)
//
//   POST /upload                 -> 202 {"process_id": "..."}
//   GET  /status/{process_id}    -> 200 {"status": "COMPLETED" | "ERROR" | ...}
//   GET  /download/{process_id}  -> 200 <raw bytes>

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use crate::config::ServerConfig;
use crate::descriptor::JobDescriptor;
use crate::transport::JobTransport;
use crate::types::{JobError, JobHandle, JobResult, JobStatus, ResultArtifact};

const XML_CONTENT_TYPE: &str = "application/xml";

pub struct HttpTransport {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadAccepted {
    process_id: Option<String>,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

impl HttpTransport {
    pub fn new(config: &ServerConfig) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // `{base}/{route}/{handle}`, the handle percent-encoded as a single segment
    fn job_url(&self, route: &str, handle: &JobHandle) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| format!("invalid server url {}: {}", self.base_url, e))?;
        url.path_segments_mut()
            .map_err(|_| format!("server url {} cannot carry a path", self.base_url))?
            .pop_if_empty()
            .push(route)
            .push(handle.as_str());
        Ok(url)
    }

    fn upload_form(xml: String, fits: Vec<u8>) -> JobResult<Form> {
        let xml_part = Part::text(xml)
            .file_name("data.xml")
            .mime_str(XML_CONTENT_TYPE)
            .map_err(|e| JobError::SubmitFailed(format!("invalid xml part: {}", e)))?;
        let fits_part = Part::bytes(fits)
            .file_name("image.fits")
            .mime_str(mime::APPLICATION_OCTET_STREAM.as_ref())
            .map_err(|e| JobError::SubmitFailed(format!("invalid fits part: {}", e)))?;

        Ok(Form::new().part("xml", xml_part).part("fits", fits_part))
    }
}

// Body text of a failed response, for diagnostics
async fn error_text(status: StatusCode, response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, body)
    }
}

#[async_trait]
impl JobTransport for HttpTransport {
    async fn submit(
        &self,
        descriptor: &JobDescriptor,
        payload: Option<&Path>,
    ) -> JobResult<JobHandle> {
        let xml = descriptor.to_xml()?;
        let url = self.url("/upload");

        let request = match payload {
            Some(path) => {
                let fits = tokio::fs::read(path)
                    .await
                    .map_err(|e| JobError::PayloadUnavailable {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?;
                debug!("Uploading descriptor with {} byte payload from {}", fits.len(), path.display());
                self.client.post(&url).multipart(Self::upload_form(xml, fits)?)
            }
            None => {
                debug!("Uploading descriptor without payload");
                self.client
                    .post(&url)
                    .header(CONTENT_TYPE, XML_CONTENT_TYPE)
                    .body(xml)
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| JobError::SubmitFailed(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            return Err(JobError::SubmitFailed(error_text(status, response).await));
        }

        let accepted: UploadAccepted = response
            .json()
            .await
            .map_err(|e| JobError::SubmitFailed(format!("unreadable upload response: {}", e)))?;

        let process_id = accepted
            .process_id
            .ok_or_else(|| JobError::SubmitFailed("upload response has no process_id".to_string()))?;

        JobHandle::parse(process_id)
    }

    async fn get_status(&self, handle: &JobHandle) -> JobResult<JobStatus> {
        let failed = |message: String| JobError::StatusQueryFailed {
            handle: handle.clone(),
            message,
        };

        let url = self.job_url("status", handle).map_err(&failed)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(error_text(status, response).await));
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable status response: {}", e)))?;

        debug!("Job {} status: {}", handle, body.status);
        Ok(JobStatus::from(body.status.as_str()))
    }

    async fn fetch_result(&self, handle: &JobHandle) -> JobResult<ResultArtifact> {
        let failed = |message: String| JobError::ResultFetchFailed {
            handle: handle.clone(),
            message,
        };

        let url = self.job_url("download", handle).map_err(&failed)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(error_text(status, response).await));
        }

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        debug!("Job {} result: {} bytes", handle, bytes.len());
        Ok(ResultArtifact::new(bytes))
    }
}
