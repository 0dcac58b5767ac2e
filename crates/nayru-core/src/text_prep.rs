//! Text preparation for TTS — markdown cleaning, sentence splitting, merging.
//!
//! Pure functions, no I/O. The pipeline is `clean_text_for_tts` →
//! `prepare_chunks`; `split_sentences` is exposed separately so callers can
//! preview the server-side segmentation.

use regex::Regex;
use std::sync::LazyLock;

/// Preferred upper bound for a merged chunk.
pub const MERGE_TARGET: usize = 280;
/// Hard cap; sentences beyond this are sub-split at word boundaries.
pub const MERGE_MAX: usize = 500;

// Compiled regexes — allocated once, reused across calls.
static RE_FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").unwrap());
static RE_FENCE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```.*$").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]*)`").unwrap());
static RE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap());
static RE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static RE_BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_BOLD_U: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([^_]+)__").unwrap());
static RE_ITALIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*\n]+)\*").unwrap());
static RE_ITALIC_U: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[\s(])_([^_\n]+)_($|[\s).,:;!?])").unwrap());
static RE_HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>\n]*>").unwrap());
static RE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*#{1,6}\s+(.*)$").unwrap());
static RE_SETEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*=+\s*$").unwrap());
static RE_HR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:-{3,}|\*{3,}|_{3,})\s*$").unwrap());
static RE_BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*+]\s+(.*)$").unwrap());
static RE_NUMBERED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.*)$").unwrap());
static RE_TABLE_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\|?[\s|:-]*-[\s|:-]*\|?\s*$").unwrap());
static RE_INDENTED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?: {4,}|\t)").unwrap());
static RE_MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static RE_SPACE_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+\n").unwrap());
static RE_NEWLINE_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]+").unwrap());
static RE_MULTI_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Strip markdown formatting so text reads naturally when spoken.
///
/// Code blocks (fenced and indented) are removed entirely; inline code keeps
/// its text; headings, emphasis, links, images, lists, tables, and HTML tags
/// are reduced to their readable content. Paragraph breaks (blank lines)
/// survive; other whitespace runs collapse.
pub fn clean_text_for_tts(text: &str) -> String {
    let c = RE_FENCED_CODE.replace_all(text, "").into_owned();
    // An unterminated fence would otherwise leak its marker line.
    let c = RE_FENCE_LINE.replace_all(&c, "").into_owned();

    let mut lines: Vec<String> = Vec::new();
    for line in c.lines() {
        if let Some(cleaned) = clean_line(line) {
            lines.push(cleaned);
        }
    }
    let c = lines.join("\n");

    let c = RE_INLINE_CODE.replace_all(&c, "$1").into_owned();
    let c = RE_IMAGE.replace_all(&c, "$1").into_owned();
    let c = RE_LINK.replace_all(&c, "$1").into_owned();
    let c = RE_BOLD.replace_all(&c, "$1").into_owned();
    let c = RE_BOLD_U.replace_all(&c, "$1").into_owned();
    let c = RE_ITALIC.replace_all(&c, "$1").into_owned();
    // Boundary-anchored, so adjacent spans need a second pass.
    let c = RE_ITALIC_U.replace_all(&c, "$1$2$3").into_owned();
    let c = RE_ITALIC_U.replace_all(&c, "$1$2$3").into_owned();
    let c = RE_HTML_TAG.replace_all(&c, "").into_owned();

    let c = RE_MULTI_SPACE.replace_all(&c, " ").into_owned();
    let c = RE_SPACE_NEWLINE.replace_all(&c, "\n").into_owned();
    let c = RE_NEWLINE_SPACE.replace_all(&c, "\n").into_owned();
    let c = RE_MULTI_NEWLINE.replace_all(&c, "\n\n").into_owned();

    c.trim().to_string()
}

/// Block-level cleanup for one line. `None` drops the line.
fn clean_line(line: &str) -> Option<String> {
    if RE_HR.is_match(line) || RE_SETEXT.is_match(line) {
        return None;
    }
    if is_table_row(line) {
        if RE_TABLE_SEP.is_match(line) {
            return None;
        }
        let cells: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .collect();
        return Some(cells.join(", "));
    }
    if let Some(caps) = RE_HEADING.captures(line) {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = RE_BULLET.captures(line).or_else(|| RE_NUMBERED.captures(line)) {
        return Some(terminate_sentence(caps[1].trim()));
    }
    if RE_INDENTED_CODE.is_match(line) && !line.trim().is_empty() {
        return None;
    }
    Some(line.to_string())
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.len() > 1
}

/// Append a period to list items that lack terminal punctuation.
fn terminate_sentence(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let last = text.chars().last().unwrap();
    if matches!(last, '.' | '!' | '?' | ':' | ';' | '。' | '！' | '？') {
        text.to_string()
    } else {
        format!("{text}.")
    }
}

// ─── Sentence splitting ────────────────────────────────────────────────────

/// Title abbreviations that keep a following capitalized word joined.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "fig", "dept", "inc", "ltd",
];

/// Split text into sentences.
///
/// A cut happens at `.`/`!`/`?` followed by whitespace where the next
/// non-space character is an uppercase letter, digit, or quote — so
/// `e.g. foo` and `3.14` stay joined. Title abbreviations (`Mr.`) and
/// single-letter initials (`J.`) never cut. Full-width terminators
/// (`。！？`) cut unconditionally. Paragraph breaks (blank lines) always
/// cut. Segments are trimmed; empties are discarded.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for para in split_paragraphs(text) {
        split_sentences_into(para, &mut out);
    }
    out
}

/// Paragraphs are runs of text between blank lines.
fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn split_sentences_into(text: &str, out: &mut Vec<String>) {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let end = pos + c.len_utf8();
        match c {
            '。' | '！' | '？' => {
                push_trimmed(&text[start..end], out);
                start = end;
            }
            '.' | '!' | '?' => {
                if cuts_here(text, &chars, i, start, pos, c) {
                    push_trimmed(&text[start..end], out);
                    start = end;
                }
            }
            _ => {}
        }
        i += 1;
    }

    if start < text.len() {
        push_trimmed(&text[start..], out);
    }
}

fn cuts_here(
    text: &str,
    chars: &[(usize, char)],
    i: usize,
    start: usize,
    pos: usize,
    c: char,
) -> bool {
    let followed_by_ws = chars.get(i + 1).is_some_and(|&(_, n)| n.is_whitespace());
    if !followed_by_ws {
        return false;
    }
    let mut j = i + 1;
    while j < chars.len() && chars[j].1.is_whitespace() {
        j += 1;
    }
    let starts_sentence = match chars.get(j).map(|&(_, n)| n) {
        None => true,
        Some(n) => {
            n.is_uppercase() || n.is_ascii_digit() || matches!(n, '"' | '\'' | '\u{201c}' | '\u{2018}')
        }
    };
    starts_sentence && !(c == '.' && is_abbreviation(&text[start..pos]))
}

/// True if the word ending at the candidate period is a known abbreviation
/// or a single-letter initial.
fn is_abbreviation(before: &str) -> bool {
    let word: Vec<char> = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic())
        .collect();
    if word.is_empty() {
        return false;
    }
    if word.len() == 1 && word[0].is_uppercase() {
        return true;
    }
    let word: String = word.into_iter().rev().flat_map(char::to_lowercase).collect();
    ABBREVIATIONS.contains(&word.as_str())
}

fn push_trimmed(segment: &str, out: &mut Vec<String>) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

// ─── Chunking ──────────────────────────────────────────────────────────────

/// Turn cleaned text into synthesis chunks: split into sentences, sub-split
/// anything over [`MERGE_MAX`], then greedily merge neighbors up to
/// [`MERGE_TARGET`]. Merging never crosses a paragraph break.
pub fn prepare_chunks(cleaned: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    for para in split_paragraphs(cleaned) {
        let mut sentences = Vec::new();
        split_sentences_into(para, &mut sentences);

        let mut units = Vec::new();
        for s in sentences {
            if s.len() > MERGE_MAX {
                units.extend(split_text(&s, MERGE_MAX));
            } else {
                units.push(s);
            }
        }

        let mut merged: Vec<String> = Vec::new();
        for unit in units {
            if let Some(last) = merged.last_mut() {
                if last.len() + 1 + unit.len() <= MERGE_TARGET {
                    last.push(' ');
                    last.push_str(&unit);
                    continue;
                }
            }
            merged.push(unit);
        }
        chunks.extend(merged);
    }
    chunks
}

/// Split text into pieces of at most `max_len` bytes.
///
/// Prefers sentence boundaries (`. `), then word boundaries, then
/// hard-splits at the nearest char boundary. Pieces shorter than 2 bytes are
/// discarded.
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut result = Vec::new();
    let mut remaining = text;

    while remaining.len() > max_len {
        let window_end = floor_char_boundary(remaining, max_len);
        let window = &remaining[..window_end];

        let split_at = match window.rfind(". ") {
            Some(pos) if pos >= max_len / 2 => pos + 1,
            _ => word_boundary_or_hard(window, window_end),
        };

        let piece = remaining[..split_at].trim_end();
        if piece.len() >= 2 {
            result.push(piece.to_string());
        }
        remaining = remaining[split_at..].trim_start();
    }

    if remaining.len() >= 2 {
        result.push(remaining.to_string());
    }

    result
}

/// Find a word boundary, or fall back to a hard split.
fn word_boundary_or_hard(window: &str, fallback: usize) -> usize {
    match window.rfind(' ') {
        Some(pos) if pos >= window.len() / 3 => pos,
        _ => fallback,
    }
}

/// Largest char boundary ≤ `index`.
fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── clean_text_for_tts ──────────────────────────────────────────

    #[test]
    fn removes_fenced_code_blocks() {
        let input = "before\n\n```rust\nfn main() {}\n```\n\nafter";
        assert_eq!(clean_text_for_tts(input), "before\n\nafter");
    }

    #[test]
    fn removes_unterminated_fence_line() {
        let result = clean_text_for_tts("text\n```rust\nleft open");
        assert!(!result.contains("```"));
        assert!(result.contains("text"));
    }

    #[test]
    fn removes_indented_code() {
        let input = "intro\n\n    let x = 1;\n    let y = 2;\n\noutro";
        assert_eq!(clean_text_for_tts(input), "intro\n\noutro");
    }

    #[test]
    fn keeps_inline_code_text() {
        assert_eq!(clean_text_for_tts("use `println!` here"), "use println! here");
    }

    #[test]
    fn strips_heading_markers() {
        assert_eq!(clean_text_for_tts("## Hello World"), "Hello World");
        assert_eq!(clean_text_for_tts("# H1\n## H2"), "H1\nH2");
    }

    #[test]
    fn strips_setext_heading_underline() {
        assert_eq!(clean_text_for_tts("Title\n=====\n\nBody."), "Title\n\nBody.");
    }

    #[test]
    fn strips_emphasis() {
        assert_eq!(clean_text_for_tts("this is **bold** text"), "this is bold text");
        assert_eq!(clean_text_for_tts("this is *italic* text"), "this is italic text");
        assert_eq!(clean_text_for_tts("this is __bold__ too"), "this is bold too");
        assert_eq!(clean_text_for_tts("an _emphasized_ word"), "an emphasized word");
    }

    #[test]
    fn underscore_identifiers_survive() {
        assert_eq!(clean_text_for_tts("call snake_case_name here"), "call snake_case_name here");
    }

    #[test]
    fn links_keep_text_images_keep_alt() {
        assert_eq!(
            clean_text_for_tts("click [here](https://example.com) now"),
            "click here now"
        );
        assert_eq!(clean_text_for_tts("see ![a chart](img.png) above"), "see a chart above");
    }

    #[test]
    fn list_items_become_sentences() {
        let result = clean_text_for_tts("items:\n- first\n- second!\n* third");
        assert_eq!(result, "items:\nfirst.\nsecond!\nthird.");
    }

    #[test]
    fn numbered_lists_same_treatment() {
        let result = clean_text_for_tts("steps:\n1. compile\n2) run");
        assert_eq!(result, "steps:\ncompile.\nrun.");
    }

    #[test]
    fn table_rows_join_cells_separator_dropped() {
        let input = "| name | age |\n|------|-----|\n| Ada | 36 |";
        assert_eq!(clean_text_for_tts(input), "name, age\nAda, 36");
    }

    #[test]
    fn html_tags_stripped() {
        assert_eq!(clean_text_for_tts("a <b>bold</b> claim<br/>"), "a bold claim");
    }

    #[test]
    fn horizontal_rules_removed() {
        let result = clean_text_for_tts("above\n\n---\n\nbelow");
        assert_eq!(result, "above\n\nbelow");
    }

    #[test]
    fn collapses_spaces_preserves_paragraphs() {
        assert_eq!(clean_text_for_tts("hello    world"), "hello world");
        assert_eq!(clean_text_for_tts("one\n\n\n\ntwo"), "one\n\ntwo");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(
            clean_text_for_tts("Hello, how are you today?"),
            "Hello, how are you today?"
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(clean_text_for_tts(""), "");
    }

    // ── split_sentences ─────────────────────────────────────────────

    #[test]
    fn splits_basic_punctuation() {
        let s = split_sentences("Hello world. How are you? I am fine!");
        assert_eq!(s, vec!["Hello world.", "How are you?", "I am fine!"]);
    }

    #[test]
    fn splits_at_paragraph_break() {
        let s = split_sentences("First paragraph\n\nSecond paragraph.");
        assert_eq!(s, vec!["First paragraph", "Second paragraph."]);
    }

    #[test]
    fn lowercase_continuation_stays_joined() {
        let s = split_sentences("See e.g. the manual. Then stop.");
        assert_eq!(s, vec!["See e.g. the manual.", "Then stop."]);
    }

    #[test]
    fn abbreviations_stay_joined() {
        let s = split_sentences("Mr. Smith arrived. Dr. Jones left.");
        assert_eq!(s, vec!["Mr. Smith arrived.", "Dr. Jones left."]);
    }

    #[test]
    fn initials_stay_joined() {
        let s = split_sentences("J. Smith wrote it. True story.");
        assert_eq!(s, vec!["J. Smith wrote it.", "True story."]);
    }

    #[test]
    fn decimals_stay_joined() {
        let s = split_sentences("Pi is 3.14 roughly. Indeed.");
        assert_eq!(s, vec!["Pi is 3.14 roughly.", "Indeed."]);
    }

    #[test]
    fn digit_starts_sentence() {
        let s = split_sentences("It works. 42 tests pass.");
        assert_eq!(s, vec!["It works.", "42 tests pass."]);
    }

    #[test]
    fn quote_starts_sentence() {
        let s = split_sentences("She spoke. \"Quoted words.\"");
        assert_eq!(s, vec!["She spoke.", "\"Quoted words.\""]);
    }

    #[test]
    fn full_width_terminators_cut() {
        let s = split_sentences("これはテストです。次の文！最後？");
        assert_eq!(s, vec!["これはテストです。", "次の文！", "最後？"]);
    }

    #[test]
    fn single_sentence_passthrough() {
        assert_eq!(split_sentences("Just one sentence"), vec!["Just one sentence"]);
    }

    #[test]
    fn empty_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \n\n  ").is_empty());
    }

    #[test]
    fn trims_whitespace() {
        let s = split_sentences("  Hello.   World.  ");
        assert_eq!(s, vec!["Hello.", "World."]);
    }

    // ── prepare_chunks ──────────────────────────────────────────────

    #[test]
    fn short_sentences_merge_into_one_chunk() {
        let chunks = prepare_chunks("Hello. World.");
        assert_eq!(chunks, vec!["Hello. World."]);
    }

    #[test]
    fn merge_respects_target() {
        let a = format!("{}.", "A".repeat(150));
        let b = format!("{}.", "B".repeat(150));
        let chunks = prepare_chunks(&format!("{a} {b}"));
        // 151 + 1 + 151 > 280, so they stay separate
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn merge_never_crosses_paragraphs() {
        let chunks = prepare_chunks("One.\n\nTwo.");
        assert_eq!(chunks, vec!["One.", "Two."]);
    }

    #[test]
    fn oversized_sentence_is_subsplit() {
        let long = "word ".repeat(200); // ~1000 bytes, no terminators
        let chunks = prepare_chunks(long.trim());
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= MERGE_MAX, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn heading_body_code_example() {
        let cleaned = clean_text_for_tts("# Heading\n\nBody text.\n\n`code`");
        assert_eq!(prepare_chunks(&cleaned), vec!["Heading", "Body text.", "code"]);
    }

    #[test]
    fn rejoined_chunks_preserve_content() {
        let text = "The quick brown fox jumps. Pack my box.\n\nHow vexingly quick daft zebras jump!";
        let cleaned = clean_text_for_tts(text);
        let joined = prepare_chunks(&cleaned).join(" ");
        let collapse = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(collapse(&joined), collapse(&cleaned));
    }

    // ── split_text ──────────────────────────────────────────────────

    #[test]
    fn short_text_not_split() {
        assert_eq!(split_text("Hello world.", 200), vec!["Hello world."]);
    }

    #[test]
    fn splits_at_sentence_boundary() {
        let text = "First sentence. Second sentence. Third sentence that is long enough to push past the limit.";
        let chunks = split_text(text, 40);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn splits_at_word_boundary() {
        let text = "word ".repeat(50);
        let chunks = split_text(text.trim(), 30);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 30, "chunk too long: {}", chunk.len());
        }
    }

    #[test]
    fn hard_splits_long_word() {
        let text = "a".repeat(300);
        let chunks = split_text(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() == 100));
    }

    #[test]
    fn multibyte_text_splits_on_char_boundaries() {
        let text = "é".repeat(300); // 2 bytes per char
        let chunks = split_text(&text, 101);
        for chunk in &chunks {
            assert!(chunk.len() <= 101);
            assert!(chunk.chars().all(|c| c == 'é'));
        }
    }
}
