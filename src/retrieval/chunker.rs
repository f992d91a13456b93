use crate::config::ChunkerConfig;
use regex::Regex;
use tracing::debug;

/// Boundary-preferring text chunker
///
/// Splits on paragraph boundaries first, then sentences for oversized
/// paragraphs, and falls back to fixed-size character windows (with the
/// configured overlap) for material with no usable boundaries. Sizes are
/// measured in characters.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    sentence_boundary: Regex,
}

impl TextChunker {
    pub fn new(config: &ChunkerConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            chunk_overlap: config.chunk_overlap.min(config.chunk_size.saturating_sub(1)),
            // Terminator run followed by whitespace marks a sentence end.
            sentence_boundary: Regex::new(r"[.!?]+\s+").expect("static sentence regex"),
        }
    }

    /// Split `text` into ordered chunks of at most `chunk_size` characters.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        let mut units: Vec<String> = Vec::new();
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            if char_len(paragraph) <= self.chunk_size {
                units.push(paragraph.to_string());
                continue;
            }
            for sentence in self.split_sentences(paragraph) {
                if char_len(&sentence) <= self.chunk_size {
                    units.push(sentence);
                } else {
                    units.extend(self.fixed_windows(&sentence));
                }
            }
        }

        let chunks = self.pack(units);
        if chunks.is_empty() {
            // Boundary detection found nothing usable; window the raw text.
            debug!("chunker falling back to fixed-size windowing");
            return self.fixed_windows(text);
        }
        chunks
    }

    fn split_sentences(&self, text: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        let mut start = 0;
        for boundary in self.sentence_boundary.find_iter(text) {
            let sentence = text[start..boundary.end()].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = boundary.end();
        }
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
        sentences
    }

    /// Greedy packing of boundary units, seeding each new chunk with the
    /// trailing units of the previous one up to the configured overlap.
    fn pack(&self, units: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for unit in units {
            let unit_len = char_len(&unit);
            let sep = usize::from(!current.is_empty());
            if !current.is_empty() && current_len + sep + unit_len > self.chunk_size {
                chunks.push(current.join("\n"));

                let mut carried: Vec<String> = Vec::new();
                let mut carried_len = 0usize;
                for prev in current.iter().rev() {
                    let prev_len = char_len(prev);
                    if carried_len + prev_len > self.chunk_overlap
                        || carried_len + prev_len + unit_len > self.chunk_size
                    {
                        break;
                    }
                    carried_len += prev_len + 1;
                    carried.push(prev.clone());
                }
                carried.reverse();
                current = carried;
                current_len = carried_len.saturating_sub(1);
            }
            current_len += usize::from(!current.is_empty()) + unit_len;
            current.push(unit);
        }
        if !current.is_empty() {
            chunks.push(current.join("\n"));
        }
        chunks
    }

    fn fixed_windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = (self.chunk_size - self.chunk_overlap).max(1);
        let mut windows = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            windows.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        windows
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
