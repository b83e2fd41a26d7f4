use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("unsupported file type '{0}', expected .txt or .pdf")]
    UnsupportedFileType(String),
    #[error("no text could be extracted from the file")]
    NoText,
    #[error("failed to read PDF: {0}")]
    Pdf(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Pdf,
}

impl FileKind {
    pub fn from_file_name(file_name: &str) -> Result<Self, UploadError> {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "txt" => Ok(FileKind::Text),
            "pdf" => Ok(FileKind::Pdf),
            _ => Err(UploadError::UnsupportedFileType(extension)),
        }
    }
}

/// Extracts the email body from an uploaded `.txt` or `.pdf` file.
pub fn extract_text(file_name: &str, bytes: &[u8]) -> Result<String, UploadError> {
    let text = match FileKind::from_file_name(file_name)? {
        FileKind::Text => decode_text(bytes),
        FileKind::Pdf => {
            tracing::debug!(bytes = bytes.len(), "Extracting text from PDF");
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| UploadError::Pdf(e.to_string()))?
        }
    };

    if text.trim().is_empty() {
        return Err(UploadError::NoText);
    }
    Ok(text)
}

/// UTF-8 first, Latin-1 otherwise. Latin-1 maps every byte so this never fails.
fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_text_file() {
        let text = extract_text("email.txt", "Preciso do relatório.".as_bytes()).unwrap();
        assert_eq!(text, "Preciso do relatório.");
    }

    #[test]
    fn latin1_text_file_falls_back() {
        // "relatório" in ISO-8859-1
        let bytes = b"Preciso do relat\xF3rio.";
        assert_eq!(extract_text("EMAIL.TXT", bytes).unwrap(), "Preciso do relatório.");
    }

    #[test]
    fn bom_is_stripped() {
        let bytes = b"\xEF\xBB\xBFOl\xC3\xA1";
        assert_eq!(extract_text("a.txt", bytes).unwrap(), "Olá");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert_eq!(
            extract_text("planilha.xlsx", b"data"),
            Err(UploadError::UnsupportedFileType("xlsx".to_string()))
        );
        assert!(matches!(
            extract_text("sem_extensao", b"data"),
            Err(UploadError::UnsupportedFileType(_))
        ));
    }

    #[test]
    fn blank_file_has_no_text() {
        assert_eq!(extract_text("vazio.txt", b"  \n\t"), Err(UploadError::NoText));
    }

    #[test]
    fn garbage_pdf_is_an_error() {
        assert!(matches!(
            extract_text("quebrado.pdf", b"not a pdf at all"),
            Err(UploadError::Pdf(_))
        ));
    }
}
