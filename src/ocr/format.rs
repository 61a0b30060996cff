use std::path::Path;

use serde::Serialize;

const OCTET_STREAM: &str = "application/octet-stream";

/// Document types accepted for OCR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Tiff,
}

impl DocumentFormat {
    /// Resolves the format a client claims for an upload.
    ///
    /// The MIME type wins when it is specific; a missing or generic one falls
    /// back to the file extension.
    pub fn from_declared(file_name: &str, content_type: Option<&str>) -> Option<Self> {
        let mime = content_type
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty() && ct != OCTET_STREAM);

        match mime.as_deref() {
            Some(mime) => Self::from_mime(mime),
            None => Self::from_extension(file_name),
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "image/tiff" | "image/tif" | "image/x-tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn from_extension(file_name: &str) -> Option<Self> {
        let ext = Path::new(file_name)
            .extension()?
            .to_str()?
            .to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }

    /// Whether the leading bytes carry this format's signature.
    pub fn matches_content(&self, bytes: &[u8]) -> bool {
        infer::get(bytes)
            .and_then(|kind| Self::from_mime(kind.mime_type()))
            .is_some_and(|detected| detected == *self)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Tiff => "tiff",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Tiff => "image/tiff",
        }
    }
}
