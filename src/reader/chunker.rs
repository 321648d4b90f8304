//! Article text → ordered synthesis chunks.
//!
//! The intro (title + summary) is packed with a small budget so the first
//! request comes back quickly; the body uses a large budget to keep the
//! number of synthesis calls low.

/// Markdown punctuation removed from the body before chunking.
const MARKDOWN_CHARS: [char; 5] = ['#', '*', '`', '_', '~'];

const PARAGRAPH_SEP: &str = "\n\n";
const SENTENCE_SEP: &str = " ";

/// An article to read aloud.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Article {
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
}

impl Article {
    pub fn new(title: impl Into<String>, summary: Option<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            summary,
            content: content.into(),
        }
    }

    /// Spoken introduction: `Title: ... . Summary: ... .`
    pub fn intro(&self) -> String {
        let mut intro = format!("Title: {}.", self.title.trim());
        if let Some(summary) = self.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            intro.push_str(" Summary: ");
            intro.push_str(summary);
            intro.push('.');
        }
        intro
    }
}

/// Character budgets for the two chunking passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    pub intro_max_chars: usize,
    pub body_max_chars: usize,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            intro_max_chars: 200,
            body_max_chars: 4000,
        }
    }
}

/// Intro chunks followed by body chunks, in text order.
pub fn build_chunks(article: &Article, budget: &ChunkBudget) -> Vec<String> {
    let body = strip_markdown(&article.content);
    let mut chunks = split_into_chunks(&article.intro(), budget.intro_max_chars);
    chunks.extend(split_into_chunks(&body, budget.body_max_chars));
    chunks
}

pub fn strip_markdown(text: &str) -> String {
    text.chars().filter(|c| !MARKDOWN_CHARS.contains(c)).collect()
}

/// Split on blank lines. Paragraphs are trimmed; empty ones are dropped.
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut start: Option<usize> = None;
    let mut end = 0;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                paragraphs.push(&text[s..end]);
            }
        } else {
            start.get_or_insert(offset);
            end = offset + line.len();
        }
        offset += line.len();
    }
    if let Some(s) = start {
        paragraphs.push(&text[s..end]);
    }

    paragraphs
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Split a paragraph at sentence ends: a run of `.`, `!` or `?` followed by
/// whitespace or the end of the text. Text after the last terminator is its
/// own sentence.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminator(c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, d)) = chars.peek() {
            if !is_terminator(d) {
                break;
            }
            end = j + d.len_utf8();
            chars.next();
        }
        let at_boundary = chars.peek().map_or(true, |&(_, d)| d.is_whitespace());
        if at_boundary {
            let sentence = paragraph[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Greedy packer tracking lengths in characters.
struct Packer {
    max_chars: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    /// Append `piece` if it fits (counting the separator), else return false.
    fn try_append(&mut self, piece: &str, piece_len: usize, sep: &str) -> bool {
        let sep_len = sep.len();
        if self.current_len + piece_len + sep_len > self.max_chars {
            return false;
        }
        if !self.current.is_empty() {
            self.current.push_str(sep);
            self.current_len += sep_len;
        }
        self.current.push_str(piece);
        self.current_len += piece_len;
        true
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
        }
        self.current_len = 0;
    }

    fn restart_with(&mut self, piece: &str, piece_len: usize) {
        self.flush();
        self.current.push_str(piece);
        self.current_len = piece_len;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Pack paragraphs into chunks of at most `max_chars` characters.
///
/// Paragraphs longer than the budget are split into sentences. A single
/// sentence longer than the budget becomes a chunk on its own, verbatim.
pub fn split_into_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let mut packer = Packer::new(max_chars);

    for paragraph in split_paragraphs(text) {
        let len = paragraph.chars().count();
        if packer.try_append(paragraph, len, PARAGRAPH_SEP) {
            continue;
        }
        packer.flush();

        if len <= max_chars {
            packer.restart_with(paragraph, len);
            continue;
        }

        for sentence in split_sentences(paragraph) {
            let sentence_len = sentence.chars().count();
            if !packer.try_append(sentence, sentence_len, SENTENCE_SEP) {
                packer.restart_with(sentence, sentence_len);
            }
        }
    }

    packer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn non_whitespace(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    fn long_paragraph(target: usize) -> String {
        let mut text = String::new();
        let mut i = 0;
        while text.len() < target {
            if !text.is_empty() {
                text.push(' ');
            }
            match i % 3 {
                0 => text.push_str(&format!("Sentence number {i} talks about systems.")),
                1 => text.push_str(&format!("Is question {i} answered here?")),
                _ => text.push_str(&format!("Exclamation {i} follows, loudly!")),
            }
            i += 1;
        }
        text
    }

    #[test]
    fn test_two_short_paragraphs_share_a_chunk() {
        let chunks = split_into_chunks("Para one.\n\nPara two.", 100);
        assert_eq!(chunks, vec!["Para one.\n\nPara two.".to_string()]);
    }

    #[test]
    fn test_paragraphs_split_when_budget_exceeded() {
        let chunks = split_into_chunks("Para one.\n\nPara two.", 15);
        assert_eq!(chunks, vec!["Para one.", "Para two."]);
    }

    #[test]
    fn test_blank_lines_with_whitespace_separate_paragraphs() {
        let paragraphs = split_paragraphs("  first\nstill first \n \t \n\n\nsecond\n");
        assert_eq!(paragraphs, vec!["first\nstill first", "second"]);
        assert!(split_paragraphs(" \n\n ").is_empty());
    }

    #[test]
    fn test_sentence_split() {
        assert_eq!(
            split_sentences("One. Two! Three?! four"),
            vec!["One.", "Two!", "Three?!", "four"]
        );
        // Terminators inside a token do not end the sentence.
        assert_eq!(
            split_sentences("See e.g. version 1.2 now. Done"),
            vec!["See e.g.", "version 1.2 now.", "Done"]
        );
        assert_eq!(split_sentences("No terminator"), vec!["No terminator"]);
    }

    #[test]
    fn test_long_paragraph_split_at_sentences() {
        let paragraph = long_paragraph(5000);
        let chunks = split_into_chunks(&paragraph, 300);

        assert!(chunks.len() > 10);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 300, "chunk too long: {}", chunk.len());
            assert!(matches!(chunk.chars().last(), Some('.' | '!' | '?')));
        }
        assert_eq!(non_whitespace(&chunks.concat()), non_whitespace(&paragraph));
    }

    #[test]
    fn test_oversized_sentence_kept_verbatim() {
        let giant = format!("{} end.", "word ".repeat(100).trim_end());
        let text = format!("Short one. {giant} Tail sentence.");
        let chunks = split_into_chunks(&text, 60);

        assert_eq!(chunks, vec!["Short one.".to_string(), giant, "Tail sentence.".to_string()]);
    }

    #[test]
    fn test_chunks_cover_text() {
        let text = format!(
            "# Heading\n\nIntro paragraph with *emphasis*.\n\n{}\n\nClosing `code` line.",
            long_paragraph(1200)
        );
        let cleaned = strip_markdown(&text);
        let chunks = split_into_chunks(&cleaned, 250);

        for chunk in &chunks {
            assert!(chunk.chars().count() <= 250);
        }
        assert_eq!(non_whitespace(&chunks.concat()), non_whitespace(&cleaned));
    }

    #[test]
    fn test_chunking_counts_characters_not_bytes() {
        let text = "Ünïcödé wörds hère. Ärger über Öl.";
        let chunks = split_into_chunks(text, 20);
        assert_eq!(chunks, vec!["Ünïcödé wörds hère.", "Ärger über Öl."]);
    }

    #[test]
    fn test_strip_markdown() {
        assert_eq!(strip_markdown("## *Bold* `x` _y_ ~~z~~"), " Bold x y z");
    }

    #[test]
    fn test_build_chunks_intro_then_body() {
        let article = Article::new("Hello", Some("A short post".into()), "Just one paragraph.");
        let chunks = build_chunks(&article, &ChunkBudget::default());
        assert_eq!(
            chunks,
            vec![
                "Title: Hello. Summary: A short post.".to_string(),
                "Just one paragraph.".to_string()
            ]
        );
    }

    #[test]
    fn test_build_chunks_without_summary() {
        let article = Article::new("Hello", Some("   ".into()), "**Body**");
        let chunks = build_chunks(&article, &ChunkBudget::default());
        assert_eq!(chunks, vec!["Title: Hello.".to_string(), "Body".to_string()]);
    }

    #[test]
    fn test_intro_uses_smaller_budget() {
        let summary = long_paragraph(450);
        let article = Article::new("Budgets", Some(summary), long_paragraph(3000));
        let budget = ChunkBudget {
            intro_max_chars: 200,
            body_max_chars: 4000,
        };
        let chunks = build_chunks(&article, &budget);
        let intro_count = split_into_chunks(&article.intro(), 200).len();

        assert!(intro_count >= 3);
        assert_eq!(chunks.len(), intro_count + 1);
        assert!(chunks[..intro_count].iter().all(|c| c.chars().count() <= 200));
    }
}
