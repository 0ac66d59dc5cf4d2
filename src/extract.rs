//! Best-effort text extraction from document attachments.
//!
//! Mirrored documents append the text of their attachments to the indexed
//! content. Supported formats:
//!
//! | Format | Detection | Method |
//! |--------|-----------|--------|
//! | Plain text, Markdown, CSV, HTML, JSON, XML | `text/*` or known extension | UTF-8 (lossy) |
//! | PDF | `application/pdf` or `.pdf` | `pdf-extract` |
//! | DOCX | OOXML wordprocessing or `.docx` | `w:t` runs, one line per paragraph |
//! | PPTX | OOXML presentation or `.pptx` | `a:t` runs, slides in order |
//!
//! Failures are returned as [`ExtractError`]; callers log and skip them.

use std::io::Read;

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported attachment type: {0}")]
    Unsupported(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Text,
    Pdf,
    Docx,
    Pptx,
}

fn detect(filename: &str, mimetype: &str) -> Option<Format> {
    let mime = mimetype.split(';').next().unwrap_or("").trim();
    match mime {
        MIME_PDF => return Some(Format::Pdf),
        MIME_DOCX => return Some(Format::Docx),
        MIME_PPTX => return Some(Format::Pptx),
        "application/json" | "application/xml" => return Some(Format::Text),
        m if m.starts_with("text/") => return Some(Format::Text),
        _ => {}
    }
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(Format::Pdf),
        "docx" => Some(Format::Docx),
        "pptx" => Some(Format::Pptx),
        "txt" | "md" | "markdown" | "csv" | "html" | "htm" | "json" | "xml" => Some(Format::Text),
        _ => None,
    }
}

/// Guesses a MIME type from a file name.
pub fn mimetype_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).as_deref() {
        Some("pdf") => MIME_PDF,
        Some("docx") => MIME_DOCX,
        Some("pptx") => MIME_PPTX,
        Some("md") | Some("markdown") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Extracts plain text from an attachment.
pub fn extract_text(filename: &str, mimetype: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let format = detect(filename, mimetype)
        .ok_or_else(|| ExtractError::Unsupported(format!("{} ({})", filename, mimetype)))?;
    let text = match format {
        Format::Text => String::from_utf8_lossy(bytes).into_owned(),
        Format::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?
        }
        Format::Docx => extract_docx(bytes)?,
        Format::Pptx => extract_pptx(bytes)?,
    };
    Ok(text.trim().to_string())
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    collect_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut parts = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry(&mut archive, &name)?;
        let text = collect_runs(&xml)?;
        if !text.is_empty() {
            parts.push(text);
        }
    }
    Ok(parts.join("\n\n"))
}

/// Concatenates `<*:t>` text runs, one line per `<*:p>` paragraph.
fn collect_runs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" if !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_plain_text_by_mimetype_and_extension() {
        assert_eq!(extract_text("a.bin", "text/plain; charset=utf-8", b" hi \n").unwrap(), "hi");
        assert_eq!(extract_text("notes.md", "", b"# Notes").unwrap(), "# Notes");
    }

    #[test]
    fn test_unsupported_type() {
        let err = extract_text("image.png", "image/png", &[0x89, 0x50]).unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn test_docx_paragraphs() {
        let xml = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First</w:t></w:r><w:r><w:t xml:space="preserve"> paragraph</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
  </w:body>
</w:document>"#;
        let bytes = zip_with(&[("word/document.xml", xml)]);
        let text = extract_text("report.docx", MIME_DOCX, &bytes).unwrap();
        assert_eq!(text, "First paragraph\nSecond & last");
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let slide = |t: &str| {
            format!(
                r#"<p:sld xmlns:p="p" xmlns:a="a"><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:sld>"#,
                t
            )
        };
        let s2 = slide("two");
        let s10 = slide("ten");
        let s1 = slide("one");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", s10.as_str()),
            ("ppt/slides/slide2.xml", s2.as_str()),
            ("ppt/slides/slide1.xml", s1.as_str()),
        ]);
        let text = extract_text("deck.pptx", "", &bytes).unwrap();
        assert_eq!(text, "one\n\ntwo\n\nten");
    }

    #[test]
    fn test_broken_archive_is_an_error() {
        assert!(extract_text("bad.docx", MIME_DOCX, b"not a zip").is_err());
        assert!(extract_text("empty.pptx", "", &zip_with(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_mimetype_for() {
        assert_eq!(mimetype_for("A.PDF"), MIME_PDF);
        assert_eq!(mimetype_for("x.md"), "text/markdown");
        assert_eq!(mimetype_for("noext"), "application/octet-stream");
    }
}
