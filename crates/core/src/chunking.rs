use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{Fragment, RetrievalOptions};
use regex::Regex;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub preserve_unicode: bool,
}

impl From<&RetrievalOptions> for ChunkingConfig {
    fn from(value: &RetrievalOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            preserve_unicode: value.preserve_unicode,
        }
    }
}

/// Splits extracted page text into bounded, whitespace-respecting fragments.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    noise: Regex,
    ellipsis: Regex,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, IngestError> {
        if config.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be at least 1".to_string(),
            ));
        }

        // Printable ASCII only, unless the caller opted into keeping non-Latin text.
        let noise = if config.preserve_unicode {
            Regex::new(r"\p{Cc}")?
        } else {
            Regex::new(r"[^\x20-\x7E]")?
        };

        Ok(Self {
            config,
            noise,
            ellipsis: Regex::new(r"\.{2,}")?,
        })
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    pub fn clean_line(&self, line: &str) -> String {
        self.noise.replace_all(line, "").into_owned()
    }

    /// Splits one cleaned line into pieces of at most `max_chars` characters.
    ///
    /// A piece ends at the last space inside the window; the space itself is
    /// consumed. A window without any space is cut hard at its boundary.
    pub fn split_line(&self, line: &str) -> Vec<String> {
        let max = self.config.max_chars;
        let chars: Vec<char> = line.chars().collect();
        let mut pieces = Vec::new();
        let mut cursor = 0usize;

        while cursor < chars.len() {
            let boundary = cursor + max;
            if boundary >= chars.len() {
                self.push_piece(&mut pieces, &chars[cursor..]);
                break;
            }

            let soft_break = (cursor + 1..=boundary).rev().find(|&index| chars[index] == ' ');
            let (end, next) = match soft_break {
                Some(index) => (index, index + 1),
                None => (boundary, boundary),
            };

            self.push_piece(&mut pieces, &chars[cursor..end]);
            cursor = next;
        }

        pieces
    }

    fn push_piece(&self, pieces: &mut Vec<String>, window: &[char]) {
        let raw: String = window.iter().collect();
        let piece = self.ellipsis.replace_all(raw.trim(), ".");
        if !piece.trim().is_empty() {
            pieces.push(piece.into_owned());
        }
    }

    /// Chunks one page, numbering fragments from `start_position`.
    ///
    /// Returns the fragments and the next free position.
    pub fn chunk_page(
        &self,
        page_text: &str,
        page: u32,
        start_position: u64,
    ) -> (Vec<Fragment>, u64) {
        let mut cursor = start_position;

        let fragments = page_text
            .split(|ch: char| ch == '\r' || ch == '\n')
            .map(|line| self.clean_line(line))
            .filter(|line| !line.trim().is_empty())
            .flat_map(|line| self.split_line(&line))
            .map(|text| {
                let fragment = Fragment::new(cursor, page, text);
                cursor = cursor.saturating_add(1);
                fragment
            })
            .collect::<Vec<_>>();

        (fragments, cursor)
    }

    pub fn chunk_pages(&self, pages: &[PageText]) -> Vec<Fragment> {
        let mut cursor = 0u64;
        let mut fragments = Vec::new();

        for page in pages {
            let (page_fragments, next_cursor) = self.chunk_page(&page.text, page.number, cursor);
            cursor = next_cursor;
            fragments.extend(page_fragments);
        }

        fragments
    }
}

pub fn chunk(page_text: &str, page: u32, max_chars: usize) -> Result<Vec<Fragment>, IngestError> {
    let chunker = Chunker::new(ChunkingConfig {
        max_chars,
        preserve_unicode: false,
    })?;
    Ok(chunker.chunk_page(page_text, page, 0).0)
}
