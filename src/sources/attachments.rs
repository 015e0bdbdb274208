// =============================================================================
// sources/attachments.rs — READING THE FINE PRINT
// =============================================================================
//
// The order value is often only in the attached PDF ("...aggregating to
// Rs 1,240 crore (excluding GST)..."). This module downloads the attachment
// and pulls its text out.
//
// Filers attach all sorts of things (PDF, XML, ZIP, scanned images). Only
// real PDFs are parsed; anything else yields empty text, which simply means
// the scanner falls back to the shorter announcement texts.
//
// pdf-extract panics on some malformed files, so extraction runs under
// `catch_unwind` and a panic counts as "no text".
// =============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{cache_key, CacheMode, FetchCache};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::FetchError;

const PDF_MAGIC: &[u8] = b"%PDF";

pub struct AttachmentClient {
    client: reqwest::Client,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl AttachmentClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            timeout: config.pdf_timeout,
            breaker: CircuitBreaker::new(
                "attachments",
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_reset_timeout,
            ),
        }
    }

    pub fn breakers(&self) -> Vec<&CircuitBreaker> {
        vec![&self.breaker]
    }

    /// Text of the PDF at `url`, or an empty string when it is not a PDF.
    pub async fn fetch_pdf_text(&self, cache: &FetchCache, mode: CacheMode, url: &str) -> Result<String, FetchError> {
        if !looks_like_pdf_url(url) {
            debug!(url = url, "attachment is not a PDF, skipping");
            return Ok(String::new());
        }

        let key = cache_key("pdf_text", &[url]);
        if let Some(cached) = cache.pdf_text.lookup(&key, mode) {
            return Ok(cached);
        }

        self.breaker.check()?;
        let result = self.download(url).await;
        let bytes = self.breaker.observe(result)?;

        let text = extract_pdf_text(url, &bytes)?;
        debug!(url = url, chars = text.len(), "attachment text extracted");
        // A bot wall served under a .pdf name is not cached, so the next run retries it.
        if is_pdf(&bytes) {
            cache.pdf_text.insert(key, text.clone());
        }
        Ok(text)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/pdf,*/*")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        Ok(bytes.to_vec())
    }
}

/// True when the URL path ends in `.pdf` (case-insensitive, query ignored).
pub fn looks_like_pdf_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|u| u.path().to_ascii_lowercase().ends_with(".pdf"))
        .unwrap_or(false)
}

fn is_pdf(bytes: &[u8]) -> bool {
    bytes.starts_with(PDF_MAGIC)
}

/// Extract text from PDF bytes. Bytes that are not a PDF give empty text;
/// a PDF the extractor chokes on is an error.
pub fn extract_pdf_text(url: &str, bytes: &[u8]) -> Result<String, FetchError> {
    if !is_pdf(bytes) {
        warn!(url = url, "attachment named .pdf is not a PDF");
        return Ok(String::new());
    }

    match catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(FetchError::Pdf {
            url: url.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(FetchError::Pdf {
            url: url.to_string(),
            reason: "extractor panicked on a malformed file".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_url_detection() {
        assert!(looks_like_pdf_url(
            "https://nsearchives.nseindia.com/corporate/LT_10052024183012_Order.pdf"
        ));
        assert!(looks_like_pdf_url("https://example.com/files/ORDER.PDF?download=1"));
        assert!(!looks_like_pdf_url("https://nsearchives.nseindia.com/corporate/xbrl/LT_1.xml"));
        assert!(!looks_like_pdf_url("https://example.com/archive.zip"));
        assert!(!looks_like_pdf_url("not a url"));
    }

    #[test]
    fn test_non_pdf_bytes_yield_empty_text() {
        let text = extract_pdf_text("https://example.com/x.pdf", b"<html>Access Denied</html>").unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_garbage_pdf_is_an_error_not_a_panic() {
        let result = extract_pdf_text("https://example.com/x.pdf", b"%PDF-1.7\n garbage without xref");
        assert!(matches!(result, Err(FetchError::Pdf { .. })));
    }

    #[tokio::test]
    async fn test_non_pdf_url_skips_download() {
        let config = Config::from_env();
        let client = reqwest::Client::new();
        let attachments = AttachmentClient::new(client, &config);
        let cache = FetchCache::from_config(&config);
        let text = attachments
            .fetch_pdf_text(&cache, CacheMode::Use, "https://nsearchives.nseindia.com/corporate/LT_1.zip")
            .await
            .unwrap();
        assert!(text.is_empty());
        assert_eq!(cache.pdf_text.len(), 0);
    }

    #[tokio::test]
    async fn test_bot_wall_under_pdf_name_is_not_cached() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/corporate/LT_1.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>Access Denied</html>"))
            .expect(2)
            .mount(&server)
            .await;

        let config = Config::from_env();
        let attachments = AttachmentClient::new(reqwest::Client::new(), &config);
        let cache = FetchCache::from_config(&config);
        let url = format!("{}/corporate/LT_1.pdf", server.uri());
        for _ in 0..2 {
            let text = attachments.fetch_pdf_text(&cache, CacheMode::Use, &url).await.unwrap();
            assert!(text.is_empty());
        }
        assert_eq!(cache.pdf_text.len(), 0);
    }
}
