use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::DocumentError;
use crate::models::PageText;
use crate::utils::{looks_like_text, sha256_hex};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// Produces the ordered page texts of one document.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn pages(&self, document: &str) -> Result<Vec<PageText>, DocumentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
}

impl DocumentFormat {
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        const IMAGE_MAGIC: &[&[u8]] = &[
            b"\x89PNG\r\n\x1a\n",
            b"\xff\xd8\xff",
            b"II*\x00",
            b"MM\x00*",
            b"BM",
            b"GIF8",
        ];
        if bytes.starts_with(b"%PDF") {
            return Some(DocumentFormat::Pdf);
        }
        if IMAGE_MAGIC.iter().any(|magic| bytes.starts_with(magic))
            || (bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
        {
            return Some(DocumentFormat::Image);
        }
        None
    }
}

/// Downloads (or reads) a document and turns it into page text: embedded
/// text for PDFs, Tesseract OCR for images.
pub struct DocumentLoader {
    http: reqwest::Client,
    ocr_language: String,
}

impl DocumentLoader {
    pub fn new(ocr_language: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        DocumentLoader {
            http,
            ocr_language: ocr_language.to_string(),
        }
    }

    pub async fn fetch(&self, document: &str) -> Result<Vec<u8>, DocumentError> {
        if document.starts_with("http://") || document.starts_with("https://") {
            info!(url = document, "downloading document");
            let response = self.http.get(document).send().await?;
            if !response.status().is_success() {
                return Err(DocumentError::Status(response.status().as_u16()));
            }
            Ok(response.bytes().await?.to_vec())
        } else {
            Ok(tokio::fs::read(document).await?)
        }
    }
}

#[async_trait]
impl PageSource for DocumentLoader {
    async fn pages(&self, document: &str) -> Result<Vec<PageText>, DocumentError> {
        let bytes = self.fetch(document).await?;
        info!(
            document,
            bytes = bytes.len(),
            sha256 = %sha256_hex(&bytes),
            "document fetched"
        );

        let language = self.ocr_language.clone();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes, &language))
            .await
            .map_err(|e| DocumentError::Pdf(format!("extraction task failed: {}", e)))??;

        info!(pages = pages.len(), "document converted to page text");
        Ok(pages)
    }
}

/// Sniffs the bytes and produces page text, numbered from 1. A document
/// with no readable text at all is an error, never a run of blank pages.
pub fn extract_pages(bytes: &[u8], ocr_language: &str) -> Result<Vec<PageText>, DocumentError> {
    let pages = match DocumentFormat::sniff(bytes) {
        Some(DocumentFormat::Pdf) => extract_pdf_pages(bytes, ocr_language)?,
        Some(DocumentFormat::Image) => {
            ocr_whole_document(bytes, ocr_language, DocumentError::OcrUnavailable)?
        }
        None => return Err(DocumentError::UnsupportedFormat),
    };
    if pages.is_empty() {
        return Err(DocumentError::NoPages);
    }
    Ok(pages)
}

fn extract_pdf_pages(bytes: &[u8], ocr_language: &str) -> Result<Vec<PageText>, DocumentError> {
    match pdf_extract::extract_text_from_mem_by_pages(bytes) {
        Ok(texts) => pages_from_pdf_text(texts, bytes, ocr_language),
        Err(e) => {
            warn!(error = %e, "PDF text extraction failed; falling back to OCR");
            ocr_whole_document(bytes, ocr_language, DocumentError::Pdf(e.to_string()))
        }
    }
}

fn pages_from_pdf_text(
    texts: Vec<String>,
    bytes: &[u8],
    ocr_language: &str,
) -> Result<Vec<PageText>, DocumentError> {
    if texts.iter().all(|text| text.trim().is_empty()) {
        warn!(pages = texts.len(), "PDF has no embedded text; falling back to OCR");
        return ocr_whole_document(bytes, ocr_language, DocumentError::OcrUnavailable);
    }
    Ok(texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let page_no = index as u32 + 1;
            if !looks_like_text(&text) {
                warn!(page_no, "PDF page has little embedded text");
            }
            PageText::new(page_no, text)
        })
        .collect())
}

/// Runs Tesseract over the raw document bytes as one page. Without the `ocr`
/// feature the caller's `unavailable` error is returned instead.
fn ocr_whole_document(
    bytes: &[u8],
    ocr_language: &str,
    unavailable: DocumentError,
) -> Result<Vec<PageText>, DocumentError> {
    if !cfg!(feature = "ocr") {
        return Err(unavailable);
    }
    let text = ocr_image(bytes, ocr_language)?;
    if text.trim().is_empty() {
        return Err(DocumentError::NoPages);
    }
    Ok(vec![PageText::new(1, text)])
}

#[cfg(feature = "ocr")]
fn ocr_image(bytes: &[u8], language: &str) -> Result<String, DocumentError> {
    tesseract::Tesseract::new(None, Some(language))
        .map_err(|e| DocumentError::Ocr(format!("Tesseract init: {}", e)))?
        .set_image_from_mem(bytes)
        .map_err(|e| DocumentError::Ocr(format!("Tesseract image: {}", e)))?
        .recognize()
        .map_err(|e| DocumentError::Ocr(format!("Tesseract recognize: {}", e)))?
        .get_text()
        .map_err(|e| DocumentError::Ocr(format!("OCR text: {}", e)))
}

#[cfg(not(feature = "ocr"))]
fn ocr_image(_bytes: &[u8], _language: &str) -> Result<String, DocumentError> {
    Err(DocumentError::OcrUnavailable)
}

pub fn is_supported_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ext.eq_ignore_ascii_case("pdf")
                || IMAGE_EXTENSIONS.iter().any(|image| ext.eq_ignore_ascii_case(image))
        })
        .unwrap_or(false)
}

/// Bill documents directly inside `folder`, sorted by path.
pub fn collect_documents(folder: &Path) -> Vec<PathBuf> {
    let mut documents = walkdir::WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| is_supported_document(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<_>>();
    documents.sort();
    documents
}
