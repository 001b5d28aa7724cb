use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// Granularity of a produced chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLevel {
    Paragraph,
    Sentence,
}

impl ChunkLevel {
    fn as_str(self) -> &'static str {
        match self {
            ChunkLevel::Paragraph => "paragraph",
            ChunkLevel::Sentence => "sentence",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub level: ChunkLevel,
    pub text: String,
}

fn sentence_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:[.!?])\s+").expect("sentence split regex"))
}

/// `doc_id:sha256(doc_id | level | text)` — stable across re-ingestion so
/// indexing the same document twice produces identical IDs.
fn chunk_id(doc_id: &str, level: ChunkLevel, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"|");
    hasher.update(level.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    format!("{doc_id}:{:x}", hasher.finalize())
}

/// Split a document into paragraph-level chunks (double newline) and
/// sentence-level chunks within each paragraph.
pub fn chunk_hierarchical(text: &str, doc_id: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if text.is_empty() {
        return chunks;
    }

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        chunks.push(Chunk {
            chunk_id: chunk_id(doc_id, ChunkLevel::Paragraph, paragraph),
            doc_id: doc_id.to_string(),
            level: ChunkLevel::Paragraph,
            text: paragraph.to_string(),
        });

        for sentence in sentence_split_re().split(paragraph) {
            let sentence = sentence.trim();
            if sentence.is_empty() {
                continue;
            }
            chunks.push(Chunk {
                chunk_id: chunk_id(doc_id, ChunkLevel::Sentence, sentence),
                doc_id: doc_id.to_string(),
                level: ChunkLevel::Sentence,
                text: sentence.to_string(),
            });
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "First sentence. Second sentence!\n\nSecond paragraph here.";

    #[test]
    fn paragraphs_and_sentences_are_chunked() {
        let chunks = chunk_hierarchical(DOC, "doc-1");

        let paragraphs: Vec<_> = chunks
            .iter()
            .filter(|c| c.level == ChunkLevel::Paragraph)
            .collect();
        let sentences: Vec<_> = chunks
            .iter()
            .filter(|c| c.level == ChunkLevel::Sentence)
            .collect();

        assert_eq!(paragraphs.len(), 2);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0].text, "First sentence");
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let first = chunk_hierarchical(DOC, "doc-1");
        let second = chunk_hierarchical(DOC, "doc-1");
        let first_ids: Vec<_> = first.iter().map(|c| &c.chunk_id).collect();
        let second_ids: Vec<_> = second.iter().map(|c| &c.chunk_id).collect();
        assert_eq!(first_ids, second_ids);
    }

    #[test]
    fn chunk_ids_depend_on_doc_and_level() {
        let a = chunk_hierarchical("Same text.", "doc-a");
        let b = chunk_hierarchical("Same text.", "doc-b");
        assert_ne!(a[0].chunk_id, b[0].chunk_id);

        // A one-sentence paragraph yields both levels with distinct ids.
        let levels = chunk_hierarchical("Only one sentence here", "doc-c");
        assert_eq!(levels.len(), 2);
        assert_ne!(levels[0].chunk_id, levels[1].chunk_id);
    }

    #[test]
    fn empty_input_produces_no_chunks() {
        assert!(chunk_hierarchical("", "doc-1").is_empty());
        assert!(chunk_hierarchical("\n\n\n\n", "doc-1").is_empty());
    }
}
