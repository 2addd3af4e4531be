//! Request descriptions and their translation into transport requests.
//!
//! A [`RequestKind`] is what callers submit. It is built into a
//! [`TransportRequest`] on the session's request queue, where validation
//! failures become [`SessionError::RequestDescriptionInvalid`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, IF_RANGE, RANGE};
use tracing::{debug, instrument};
use url::Url;

use crate::error::SessionError;

/// Declarative description of one HTTP exchange.
///
/// Header values are parsed lazily: an invalid header is reported when the
/// request is built, not when the descriptor is assembled.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    headers: HeaderMap,
    invalid_headers: Vec<String>,
    body: Option<Vec<u8>>,
    timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Creates a descriptor for `method` and `url`.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            invalid_headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    /// Creates a `GET` descriptor.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Creates a `POST` descriptor.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Creates a `PUT` descriptor.
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Adds a header, replacing any previous value for the same name.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.invalid_headers.push(name.to_string()),
        }
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets a per-request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the target URL as given.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the headers set so far.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn to_transport_request(&self) -> Result<TransportRequest, SessionError> {
        if let Some(name) = self.invalid_headers.first() {
            return Err(SessionError::invalid_description(format!(
                "invalid header `{name}`"
            )));
        }
        let url = parse_url(&self.url)?;
        Ok(TransportRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self
                .body
                .clone()
                .map_or(TransportBody::Empty, TransportBody::Bytes),
            timeout: self.timeout,
            destination: None,
            resume_offset: None,
        })
    }
}

/// Body of an upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// In-memory buffer.
    Bytes(Vec<u8>),
    /// File on disk, read by the transport.
    File(PathBuf),
}

/// State needed to continue an interrupted download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeData {
    /// URL of the resource.
    pub url: String,
    /// Number of bytes already on disk.
    pub offset: u64,
    /// `ETag` or `Last-Modified` value the partial content came from.
    pub validator: Option<String>,
}

impl ResumeData {
    /// Creates resume data for `url` starting at `offset`.
    pub fn new(url: impl Into<String>, offset: u64) -> Self {
        Self {
            url: url.into(),
            offset,
            validator: None,
        }
    }

    /// Sets the validator sent as `If-Range`.
    #[must_use]
    pub fn with_validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = Some(validator.into());
        self
    }

    /// Derives resume data from the size of a partially written file.
    ///
    /// # Errors
    ///
    /// Returns the IO error if the file metadata cannot be read.
    pub fn from_partial_file(url: impl Into<String>, path: &Path) -> std::io::Result<Self> {
        let offset = std::fs::metadata(path)?.len();
        Ok(Self::new(url, offset))
    }
}

/// Where a download starts from.
#[derive(Debug, Clone)]
pub enum DownloadSource {
    /// A fresh request.
    Request(RequestDescriptor),
    /// Continue from previously downloaded bytes.
    Resume(ResumeData),
}

/// The kinds of work a session can perform.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// Plain request; the response body is collected in memory.
    Data(RequestDescriptor),
    /// Request whose body comes from a buffer or file.
    Upload {
        /// Method, URL and headers.
        descriptor: RequestDescriptor,
        /// Body source.
        source: UploadSource,
    },
    /// Request whose response body is streamed to `destination`.
    Download {
        /// Fresh request or resume data.
        source: DownloadSource,
        /// File the body is written to.
        destination: PathBuf,
    },
}

impl From<RequestDescriptor> for RequestKind {
    fn from(descriptor: RequestDescriptor) -> Self {
        Self::Data(descriptor)
    }
}

impl RequestKind {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Upload { .. } => "upload",
            Self::Download {
                source: DownloadSource::Request(_),
                ..
            } => "download",
            Self::Download {
                source: DownloadSource::Resume(_),
                ..
            } => "download-resume",
        }
    }

    /// Builds and validates the transport request for this kind.
    ///
    /// May touch the file system (upload sources are checked), so the session
    /// runs it off the root queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RequestDescriptionInvalid`] when the description
    /// cannot produce a valid request.
    #[instrument(level = "debug", skip(self), fields(kind = self.name()))]
    pub fn build_transport_request(&self) -> Result<TransportRequest, SessionError> {
        let request = match self {
            Self::Data(descriptor) => descriptor.to_transport_request()?,
            Self::Upload { descriptor, source } => {
                let mut request = descriptor.to_transport_request()?;
                request.body = match source {
                    UploadSource::Bytes(bytes) => TransportBody::Bytes(bytes.clone()),
                    UploadSource::File(path) => {
                        check_upload_file(path)?;
                        TransportBody::File(path.clone())
                    }
                };
                request
            }
            Self::Download {
                source,
                destination,
            } => {
                let mut request = match source {
                    DownloadSource::Request(descriptor) => descriptor.to_transport_request()?,
                    DownloadSource::Resume(resume) => resume_request(resume)?,
                };
                request.destination = Some(destination.clone());
                request
            }
        };
        request.validate()?;
        debug!(method = %request.method, url = %request.url, "built transport request");
        Ok(request)
    }
}

/// Body of a [`TransportRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportBody {
    /// No body.
    Empty,
    /// In-memory body.
    Bytes(Vec<u8>),
    /// Body read from a file.
    File(PathBuf),
}

impl TransportBody {
    /// Returns true for [`TransportBody::Empty`] and empty buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(bytes) => bytes.is_empty(),
            Self::File(_) => false,
        }
    }
}

/// Fully built, validated request handed to adapters and the transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Parsed target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: TransportBody,
    /// Per-request timeout.
    pub timeout: Option<Duration>,
    /// File the response body should be written to.
    pub destination: Option<PathBuf>,
    /// Byte offset already present in `destination`.
    pub resume_offset: Option<u64>,
}

impl TransportRequest {
    /// Checks the invariants every transport may rely on.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RequestDescriptionInvalid`] for non-HTTP URLs,
    /// URLs without a host, and `GET`/`HEAD` requests carrying a body.
    pub fn validate(&self) -> Result<(), SessionError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(SessionError::invalid_description(format!(
                "unsupported URL scheme `{}`",
                self.url.scheme()
            )));
        }
        if self.url.host_str().is_none_or(str::is_empty) {
            return Err(SessionError::invalid_description(format!(
                "URL has no host: {}",
                self.url
            )));
        }
        if (self.method == Method::GET || self.method == Method::HEAD) && !self.body.is_empty() {
            return Err(SessionError::invalid_description(format!(
                "{} request must not carry a body",
                self.method
            )));
        }
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url, SessionError> {
    Url::parse(raw.trim())
        .map_err(|e| SessionError::invalid_description(format!("invalid URL `{raw}`: {e}")))
}

fn check_upload_file(path: &Path) -> Result<(), SessionError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(SessionError::invalid_description(format!(
            "upload source is not a regular file: {}",
            path.display()
        ))),
        Err(e) => Err(SessionError::invalid_description(format!(
            "upload source unreadable: {}: {e}",
            path.display()
        ))),
    }
}

fn resume_request(resume: &ResumeData) -> Result<TransportRequest, SessionError> {
    let url = parse_url(&resume.url)?;
    let mut headers = HeaderMap::new();
    let range = HeaderValue::from_str(&format!("bytes={}-", resume.offset))
        .map_err(|e| SessionError::invalid_description(format!("invalid range: {e}")))?;
    headers.insert(RANGE, range);
    if let Some(validator) = &resume.validator {
        let value = HeaderValue::from_str(validator).map_err(|e| {
            SessionError::invalid_description(format!("invalid resume validator: {e}"))
        })?;
        headers.insert(IF_RANGE, value);
    }
    Ok(TransportRequest {
        method: Method::GET,
        url,
        headers,
        body: TransportBody::Empty,
        timeout: None,
        destination: None,
        resume_offset: Some(resume.offset),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    fn reason(error: SessionError) -> String {
        match error {
            SessionError::RequestDescriptionInvalid { reason } => reason,
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_data_request_builds() {
        let kind = RequestKind::from(
            RequestDescriptor::get("https://example.com/paper.pdf").header("Accept", "*/*"),
        );
        let request = kind.build_transport_request().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.as_str(), "https://example.com/paper.pdf");
        assert_eq!(request.headers.get("accept").unwrap(), "*/*");
        assert_eq!(request.body, TransportBody::Empty);
        assert!(request.destination.is_none());
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let kind = RequestKind::from(RequestDescriptor::get("not a url"));
        let msg = reason(kind.build_transport_request().unwrap_err());
        assert!(msg.contains("invalid URL"), "{msg}");
    }

    #[test]
    fn test_non_http_scheme_is_rejected() {
        let kind = RequestKind::from(RequestDescriptor::get("ftp://example.com/file"));
        let msg = reason(kind.build_transport_request().unwrap_err());
        assert!(msg.contains("scheme"), "{msg}");
    }

    #[test]
    fn test_get_with_body_is_rejected() {
        let kind = RequestKind::from(RequestDescriptor::get("https://example.com").body("x"));
        let msg = reason(kind.build_transport_request().unwrap_err());
        assert!(msg.contains("must not carry a body"), "{msg}");
    }

    #[test]
    fn test_invalid_header_reported_at_build() {
        let descriptor = RequestDescriptor::get("https://example.com").header("bad header", "v");
        let msg = reason(RequestKind::from(descriptor).build_transport_request().unwrap_err());
        assert!(msg.contains("bad header"), "{msg}");
    }

    #[test]
    fn test_upload_bytes_sets_body() {
        let kind = RequestKind::Upload {
            descriptor: RequestDescriptor::post("https://example.com/upload"),
            source: UploadSource::Bytes(b"payload".to_vec()),
        };
        let request = kind.build_transport_request().unwrap();
        assert_eq!(request.body, TransportBody::Bytes(b"payload".to_vec()));
    }

    #[test]
    fn test_upload_file_must_exist() {
        let kind = RequestKind::Upload {
            descriptor: RequestDescriptor::put("https://example.com/upload"),
            source: UploadSource::File(PathBuf::from("/definitely/not/here.bin")),
        };
        let msg = reason(kind.build_transport_request().unwrap_err());
        assert!(msg.contains("unreadable"), "{msg}");
    }

    #[test]
    fn test_upload_file_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        let kind = RequestKind::Upload {
            descriptor: RequestDescriptor::put("https://example.com/upload"),
            source: UploadSource::File(file.path().to_path_buf()),
        };
        let request = kind.build_transport_request().unwrap();
        assert_eq!(request.body, TransportBody::File(file.path().to_path_buf()));
    }

    #[test]
    fn test_upload_with_get_is_rejected() {
        let kind = RequestKind::Upload {
            descriptor: RequestDescriptor::get("https://example.com/upload"),
            source: UploadSource::Bytes(b"payload".to_vec()),
        };
        assert!(kind.build_transport_request().is_err());
    }

    #[test]
    fn test_download_sets_destination() {
        let kind = RequestKind::Download {
            source: DownloadSource::Request(RequestDescriptor::get("https://example.com/a.pdf")),
            destination: PathBuf::from("/tmp/a.pdf"),
        };
        let request = kind.build_transport_request().unwrap();
        assert_eq!(request.destination, Some(PathBuf::from("/tmp/a.pdf")));
        assert_eq!(request.resume_offset, None);
        assert_eq!(kind.name(), "download");
    }

    #[test]
    fn test_resume_download_sets_range_headers() {
        let resume = ResumeData::new("https://example.com/a.pdf", 1024).with_validator("\"abc\"");
        let kind = RequestKind::Download {
            source: DownloadSource::Resume(resume),
            destination: PathBuf::from("/tmp/a.pdf"),
        };
        let request = kind.build_transport_request().unwrap();
        assert_eq!(request.headers.get(RANGE).unwrap(), "bytes=1024-");
        assert_eq!(request.headers.get(IF_RANGE).unwrap(), "\"abc\"");
        assert_eq!(request.resume_offset, Some(1024));
        assert_eq!(kind.name(), "download-resume");
    }

    #[test]
    fn test_resume_data_from_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 300]).unwrap();
        let resume = ResumeData::from_partial_file("https://example.com/a", file.path()).unwrap();
        assert_eq!(resume.offset, 300);
    }
}
