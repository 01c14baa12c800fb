//! Sentence-aware text chunking for the vector index.
//!
//! Splitting is a pure function of the input: sentences are detected at
//! terminal punctuation (CJK and Latin enders) and greedily packed into
//! segments bounded by a character count. No semantic merging; length is
//! the only packing criterion, so re-chunking identical text always
//! produces identical segments.

/// Default segment bound, in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 500;

/// Sentence terminators recognized by the splitter.
const SENTENCE_ENDERS: &[char] = &['。', '！', '？', '.', '!', '?'];

/// Splits chapter text into bounded-length segments.
#[derive(Debug, Clone)]
pub struct TextChunker {
    max_chars: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl TextChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    /// Split `text` into segments of at most `max_chars` characters.
    ///
    /// A sentence that alone exceeds the bound becomes its own oversized
    /// segment; sentences are never cut in half. Empty or whitespace-only
    /// input yields no segments.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut sentences = split_sentences(text);
        if sentences.is_empty() {
            sentences = split_by_length(text, self.max_chars);
        }
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut segments: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let sentence_len = sentence.chars().count();
            if current_len + sentence_len > self.max_chars {
                if !current.is_empty() {
                    segments.push(current.join(" "));
                }
                current = vec![sentence];
                current_len = sentence_len;
            } else {
                current.push(sentence);
                current_len += sentence_len;
            }
        }
        if !current.is_empty() {
            segments.push(current.join(" "));
        }

        segments.retain(|s| !s.trim().is_empty());
        segments
    }
}

/// Split at whitespace runs that immediately follow a sentence ender.
///
/// Text without any such boundary comes back as a single sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut after_ender = false;

    for ch in text.chars() {
        if after_ender && ch.is_whitespace() {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
            after_ender = false;
            continue;
        }
        current.push(ch);
        if !ch.is_whitespace() {
            after_ender = SENTENCE_ENDERS.contains(&ch);
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

/// Fixed-length fallback when no sentence boundary is usable.
fn split_by_length(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|window| window.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_nothing() {
        let chunker = TextChunker::default();
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\t ").is_empty());
    }

    #[test]
    fn packs_two_sentences_per_bound() {
        let chunker = TextChunker::new(20);
        let segments = chunker.split("Alpha beta. Gamma delta epsilon.");
        assert_eq!(segments, vec!["Alpha beta.", "Gamma delta epsilon."]);
    }

    #[test]
    fn short_sentences_share_a_segment() {
        let chunker = TextChunker::new(50);
        let segments = chunker.split("One. Two. Three.");
        assert_eq!(segments, vec!["One. Two. Three."]);
    }

    #[test]
    fn oversized_sentence_stands_alone() {
        let long = "This single sentence is far longer than the bound allows.";
        let chunker = TextChunker::new(10);
        let segments = chunker.split(&format!("Tiny. {long}"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], "Tiny.");
        assert_eq!(segments[1], long);
    }

    #[test]
    fn segments_respect_bound_unless_unsplittable() {
        let text = "First part here. Second bit follows. Third one now. \
                    Fourth keeps going. Fifth wraps it up.";
        let chunker = TextChunker::new(40);
        for segment in chunker.split(text) {
            let sentence_count = segment.matches('.').count();
            assert!(
                segment.chars().count() <= 40 || sentence_count == 1,
                "segment over bound: {segment:?}"
            );
        }
    }

    #[test]
    fn cjk_enders_are_boundaries() {
        let chunker = TextChunker::new(6);
        let segments = chunker.split("第一句。 第二句更长一些。");
        assert_eq!(segments, vec!["第一句。", "第二句更长一些。"]);
    }

    #[test]
    fn no_boundary_text_is_one_sentence() {
        let chunker = TextChunker::new(5);
        let segments = chunker.split("no terminal punctuation anywhere");
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn splitting_is_deterministic() {
        let chunker = TextChunker::new(30);
        let text = "Alpha. Beta gamma. Delta epsilon zeta. Eta theta.";
        assert_eq!(chunker.split(text), chunker.split(text));
    }
}
