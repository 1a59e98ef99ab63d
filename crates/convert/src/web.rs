//! URL ingestion: direct-file download and page scraping.
//!
//! A URL artifact is probed with a HEAD request. When the target is a
//! file the backend can ingest (by Content-Type or a known extension),
//! it is downloaded as-is. Anything else is treated as a web page:
//! fetched, stripped of markup, and ingested as plain text with a
//! `URL: <url>` header line so the model can cite the source.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use docshelf_core::error::ConvertError;

use crate::detect::MIME_TEXT;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "Mozilla/5.0";

/// Maximum bytes accepted from a download or scrape.
const MAX_FETCH_BYTES: usize = 100 * 1024 * 1024;

/// Content-Type prefixes treated as directly ingestible files.
const FILE_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/",
    "video/",
    "audio/",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats",
    "application/vnd.oasis.opendocument",
    "application/msword",
    "text/plain",
    "text/csv",
];

/// URL suffixes treated as directly ingestible files.
const FILE_EXTENSIONS: &[&str] = &[
    ".pdf", ".jpg", ".jpeg", ".png", ".gif", ".webp", ".mp4", ".mov", ".avi", ".mp3", ".wav",
    ".xlsx", ".docx", ".pptx", ".csv", ".txt",
];

/// What a URL fetch produced.
#[derive(Debug, Clone)]
pub enum Fetched {
    /// A direct file download, ingested like a local file.
    File {
        bytes: Vec<u8>,
        file_name: String,
        mime_type: String,
    },
    /// A scraped web page, ingested as plain text.
    Page { bytes: Vec<u8>, mime_type: String },
}

/// Fetches URL artifacts over HTTP.
#[derive(Debug, Clone)]
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    pub fn new() -> std::result::Result<Self, ConvertError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ConvertError::Download(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetch a URL, deciding between direct download and page scrape.
    pub async fn fetch(&self, url: &str) -> std::result::Result<Fetched, ConvertError> {
        if self.is_direct_file_url(url).await {
            self.download(url).await
        } else {
            self.scrape(url).await
        }
    }

    /// Probe with HEAD; a failed probe means "treat as a page".
    async fn is_direct_file_url(&self, url: &str) -> bool {
        let content_type = match self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_lowercase(),
            Err(_) => String::new(),
        };

        if FILE_CONTENT_TYPES.iter().any(|t| content_type.contains(t)) {
            return true;
        }
        let url_lower = url.to_lowercase();
        FILE_EXTENSIONS.iter().any(|ext| url_lower.ends_with(ext))
    }

    async fn download(&self, url: &str) -> std::result::Result<Fetched, ConvertError> {
        let resp = self
            .client
            .get(url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| ConvertError::Download(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConvertError::Download(e.to_string()))?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_string())
            .unwrap_or_default();

        let file_name = file_name_from_url(url);
        let bytes = read_capped(resp).await.map_err(ConvertError::Download)?;

        // The server's Content-Type wins; the extension is a fallback.
        let mime_type = if content_type.is_empty() || content_type == "application/octet-stream" {
            crate::detect::detect(&file_name).mime_type
        } else {
            content_type
        };

        Ok(Fetched::File {
            bytes,
            file_name,
            mime_type,
        })
    }

    async fn scrape(&self, url: &str) -> std::result::Result<Fetched, ConvertError> {
        let resp = self
            .client
            .get(url)
            .timeout(SCRAPE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ConvertError::Scrape(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConvertError::Scrape(e.to_string()))?;

        let bytes = read_capped(resp).await.map_err(ConvertError::Scrape)?;
        let html = String::from_utf8_lossy(&bytes);

        let text = html_to_text(&html);
        if text.is_empty() {
            return Err(ConvertError::Scrape("page contained no text".into()));
        }

        let content = format!("URL: {url}\n\n{text}");
        Ok(Fetched::Page {
            bytes: content.into_bytes(),
            mime_type: MIME_TEXT.to_string(),
        })
    }
}

/// Read a response body, enforcing the fetch cap as bytes stream in so
/// an oversized response never gets fully buffered. A declared
/// `Content-Length` over the cap is rejected before reading anything.
async fn read_capped(mut resp: reqwest::Response) -> std::result::Result<Vec<u8>, String> {
    if resp
        .content_length()
        .is_some_and(|len| len > MAX_FETCH_BYTES as u64)
    {
        return Err(format!("response exceeds {MAX_FETCH_BYTES} byte limit"));
    }
    let mut bytes = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(|e| e.to_string())? {
        if bytes.len() + chunk.len() > MAX_FETCH_BYTES {
            return Err(format!("response exceeds {MAX_FETCH_BYTES} byte limit"));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Last path segment of the URL, or a placeholder name.
pub fn file_name_from_url(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .trim_end_matches('/');
    let name = path.rsplit('/').next().unwrap_or("");
    if name.is_empty() || name.contains("://") || !name.contains('.') {
        "downloaded_file".to_string()
    } else {
        name.to_string()
    }
}

static RE_SCRIPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap());
static RE_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap());
static RE_TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_BLANK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip markup from an HTML document, keeping readable line structure.
pub fn html_to_text(html: &str) -> String {
    let text = RE_SCRIPT.replace_all(html, "");
    let text = RE_STYLE.replace_all(&text, "");
    let text = RE_TAGS.replace_all(&text, "\n");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let text = RE_BLANK.replace_all(&text, " ");
    let joined: String = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    RE_NEWLINES.replace_all(&joined, "\n\n").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_style_and_tags() {
        let html = r#"<html><head><style>body { color: red; }</style>
            <script>alert("x");</script></head>
            <body><h1>Title</h1><p>Some &amp; more text</p></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Some & more text"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn empty_page_yields_empty_text() {
        assert_eq!(html_to_text("<html><body></body></html>"), "");
    }

    #[tokio::test]
    async fn oversized_download_rejected_before_buffering() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Minimal server that answers every request with an absurd
        // declared length and no body.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                let _ = sock
                                    .write_all(
                                        b"HTTP/1.1 200 OK\r\n\
                                          Content-Type: application/pdf\r\n\
                                          Content-Length: 999999999999\r\n\r\n",
                                    )
                                    .await;
                            }
                        }
                    }
                });
            }
        });

        let fetcher = UrlFetcher::new().unwrap();
        let err = fetcher
            .fetch(&format!("http://{addr}/report.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::Download(_)));
        assert!(err.to_string().contains("byte limit"));
    }

    #[test]
    fn file_name_extraction() {
        assert_eq!(
            file_name_from_url("https://example.com/docs/report.pdf"),
            "report.pdf"
        );
        assert_eq!(
            file_name_from_url("https://example.com/docs/report.pdf?version=2"),
            "report.pdf"
        );
        assert_eq!(file_name_from_url("https://example.com/"), "downloaded_file");
        assert_eq!(
            file_name_from_url("https://example.com/page"),
            "downloaded_file"
        );
    }
}
