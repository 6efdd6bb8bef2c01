//! Remote document download and PDF text extraction.

use lopdf::Document;
use reqwest::{Client, Url};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::FetchConfig;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Remote endpoint unreachable, non-success, or body too large.
    #[error("failed to fetch document: {0}")]
    FetchFailed(String),

    /// Bytes are not a readable document, or contain no text.
    #[error("failed to extract text: {0}")]
    ExtractionFailed(String),
}

/// Retrieves a document's bytes by URL.
#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpDocumentFetcher {
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpDocumentFetcher {
    pub fn new(client: Client, config: &FetchConfig) -> Self {
        Self {
            client,
            timeout: config.timeout,
            max_bytes: config.max_bytes,
        }
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for HttpDocumentFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        info!("Downloading document from {}", url);

        let mut resp = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| FetchError::FetchFailed(format!("{}: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::FetchFailed(format!(
                "{} returned {}",
                url, status
            )));
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(FetchError::FetchFailed(format!(
                    "document is {} bytes, limit is {}",
                    len, self.max_bytes
                )));
            }
        }

        // Content-Length may be absent or wrong, so the limit is also enforced
        // while streaming.
        let mut data = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| FetchError::FetchFailed(format!("{}: {}", url, e)))?
        {
            if data.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::FetchFailed(format!(
                    "document exceeds {} bytes",
                    self.max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        debug!("Downloaded {} bytes from {}", data.len(), url);
        Ok(data)
    }
}

/// True when the bytes start with the PDF magic header.
pub fn is_pdf(head: &[u8]) -> bool {
    head.starts_with(b"%PDF-")
}

/// Shared flag telling blocking work that its result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancels the flag when dropped, e.g. when the owning future is dropped
    /// on a deadline.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Extract plain text from a PDF, pages in order.
pub fn extract_text(data: &[u8]) -> Result<String, FetchError> {
    extract_text_cancellable(data, &CancelFlag::default())
}

/// Like [`extract_text`], but stops before the next page once `cancel` is
/// set. Loading the document itself is not interruptible.
pub fn extract_text_cancellable(data: &[u8], cancel: &CancelFlag) -> Result<String, FetchError> {
    if !is_pdf(data) {
        return Err(FetchError::ExtractionFailed(
            "missing %PDF- header".to_string(),
        ));
    }

    let doc = Document::load_from(Cursor::new(data))
        .map_err(|e| FetchError::ExtractionFailed(format!("failed to load PDF: {}", e)))?;

    let mut text = String::new();
    let pages = doc.get_pages();
    let total_pages = pages.len();

    for (page_num, _) in pages {
        if cancel.is_cancelled() {
            return Err(FetchError::ExtractionFailed(format!(
                "cancelled before page {} of {}",
                page_num, total_pages
            )));
        }
        match doc.extract_text(&[page_num]) {
            Ok(content) => {
                text.push_str(&content);
                text.push('\n');
            }
            Err(e) => debug!("Skipping page {}: {}", page_num, e),
        }
    }

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(FetchError::ExtractionFailed(format!(
            "no extractable text in {} page(s)",
            total_pages
        )));
    }

    info!(
        "Extracted {} chars from {} page(s)",
        text.chars().count(),
        total_pages
    );
    Ok(text)
}

/// Build a small single-page PDF containing `text`.
#[cfg(test)]
pub(crate) fn build_test_pdf(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(max_bytes: usize) -> HttpDocumentFetcher {
        HttpDocumentFetcher::new(
            Client::new(),
            &FetchConfig {
                timeout: Duration::from_secs(5),
                max_bytes,
            },
        )
    }

    #[test]
    fn test_extract_text_from_pdf() {
        let pdf = build_test_pdf("Photosynthesis converts light into chemical energy.");
        let text = extract_text(&pdf).unwrap();
        assert!(text.contains("Photosynthesis converts light into chemical energy."));
    }

    #[test]
    fn test_cancelled_extraction_stops_before_page_work() {
        let pdf = build_test_pdf("Photosynthesis converts light into chemical energy.");
        let cancel = CancelFlag::default();
        cancel.cancel();

        let err = extract_text_cancellable(&pdf, &cancel).unwrap_err();
        assert!(matches!(err, FetchError::ExtractionFailed(ref m) if m.contains("cancelled")));
    }

    #[test]
    fn test_dropping_guard_cancels() {
        let cancel = CancelFlag::default();
        let guard = cancel.cancel_on_drop();
        assert!(!cancel.is_cancelled());
        drop(guard);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_non_pdf_bytes_fail_extraction() {
        let err = extract_text(b"<html>not a pdf</html>").unwrap_err();
        assert!(matches!(err, FetchError::ExtractionFailed(_)));
    }

    #[test]
    fn test_corrupt_pdf_fails_extraction() {
        let err = extract_text(b"%PDF-1.5\n garbage without objects").unwrap_err();
        assert!(matches!(err, FetchError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let server = MockServer::start().await;
        let pdf = build_test_pdf("Hello");
        Mock::given(method("GET"))
            .and(path("/notes/cells.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/notes/cells.pdf", server.uri())).unwrap();
        let data = fetcher(1024 * 1024).fetch(&url).await.unwrap();
        assert_eq!(data, pdf);
    }

    #[tokio::test]
    async fn test_non_success_status_fails_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.pdf", server.uri())).unwrap();
        let err = fetcher(1024).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::FetchFailed(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_oversized_body_fails_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 4096]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/big.pdf", server.uri())).unwrap();
        let err = fetcher(1024).fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::FetchFailed(_)));
    }
}
