use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PageExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PageExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(PageText {
                    number: page_no,
                    text,
                });
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf had no readable page text: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

/// Plain text file; form feeds separate pages.
#[derive(Default)]
pub struct PlainTextExtractor;

impl PageExtractor for PlainTextExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(split_form_feed_pages(&raw))
    }
}

pub fn split_form_feed_pages(raw: &str) -> Vec<PageText> {
    raw.split('\u{000c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(index, page)| PageText {
            number: (index + 1) as u32,
            text: page.to_string(),
        })
        .collect()
}

/// Picks an extractor from the file extension: `.pdf` goes through lopdf,
/// anything else is read as text.
pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        LopdfExtractor.extract_pages(path)
    } else {
        PlainTextExtractor.extract_pages(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn form_feed_splits_pages_and_keeps_numbering() {
        let pages = split_form_feed_pages("First\u{000C}  \u{000C}Third\n");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].number, 1);
        assert_eq!(pages[0].text, "First");
        assert_eq!(pages[1].number, 3);
        assert_eq!(pages[1].text, "Third\n");
    }

    #[test]
    fn text_files_are_read_as_pages() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "line one\nline two")?;

        let pages = extract_page_texts(&path)?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "line one\nline two");
        Ok(())
    }

    #[test]
    fn unreadable_pdf_is_a_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.PDF");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        assert!(matches!(
            extract_page_texts(&path),
            Err(IngestError::PdfParse(_))
        ));
        Ok(())
    }
}
