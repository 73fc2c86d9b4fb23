//! Fetching documents for file sends

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::Duration;

use super::SessionError;

/// File name used when neither the caller nor the URL provides one
pub const DEFAULT_FILE_NAME: &str = "documento.pdf";

/// A fetched resource
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Bytes,
    /// Media type reported by the origin, without parameters
    pub content_type: Option<String>,
}

/// Source of document bytes for file sends
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, SessionError>;
}

/// HTTP(S) fetcher with a size cap and timeout
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, SessionError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| SessionError::FetchFailed(format!("invalid URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::FetchFailed(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| SessionError::FetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::FetchFailed(format!("HTTP {}", status)));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                return Err(too_large(self.max_bytes));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(media_type);

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SessionError::FetchFailed(e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large(self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedDocument {
            bytes: body.freeze(),
            content_type,
        })
    }
}

fn too_large(max_bytes: usize) -> SessionError {
    SessionError::FetchFailed(format!("document exceeds {} bytes", max_bytes))
}

/// `text/csv; charset=utf-8` -> `text/csv`
fn media_type(header: &str) -> Option<String> {
    let media = header.split(';').next()?.trim();
    if media.is_empty() {
        None
    } else {
        Some(media.to_ascii_lowercase())
    }
}

/// Last path segment of `url`, percent-decoded
pub fn file_name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            let segment = parsed.path_segments()?.last()?;
            let decoded = urlencoding::decode(segment).ok()?;
            let name = decoded.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

/// Guess a media type from a file name's extension
pub fn guess_content_type(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("csv") => "text/csv",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}
