//! Markdown span extraction shared by the validators and the migration analysis.

use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;
use std::sync::OnceLock;

/// CJK unified ideographs, including extension A and compatibility ideographs.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

pub fn count_cjk(text: &str) -> usize {
    text.chars().filter(|c| is_cjk(*c)).count()
}

/// CJK ideographs over ideographs plus ASCII alphanumerics, code excluded.
pub fn chinese_ratio(text: &str) -> f64 {
    let prose = strip_code(text);
    let cjk = count_cjk(&prose);
    let latin = prose.chars().filter(|c| c.is_ascii_alphanumeric()).count();
    if cjk + latin == 0 {
        return 0.0;
    }
    cjk as f64 / (cjk + latin) as f64
}

fn bare_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // ASCII only, so full-width punctuation after a URL is not swallowed.
        Regex::new(r"https?://[A-Za-z0-9\-._~:/?#@!$&*+,;=%]+").expect("static regex")
    })
}

fn html_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("static regex"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

fn fence_opening(line: &str) -> Option<Fence> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let marker = trimmed.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = trimmed.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    // Backtick fences may not carry backticks in their info string.
    if marker == '`' && trimmed[len..].contains('`') {
        return None;
    }
    Some(Fence { marker, len })
}

fn closes(open: &Fence, line: &str) -> bool {
    let trimmed = line.trim();
    let len = trimmed.chars().take_while(|&c| c == open.marker).count();
    len >= open.len && trimmed.chars().all(|c| c == open.marker)
}

/// Fenced code blocks, each returned verbatim from opening to closing fence.
/// An unterminated block at end of input is returned up to the end.
pub fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<(Fence, Vec<&str>)> = None;

    for line in text.lines() {
        match current.as_mut() {
            None => {
                if let Some(fence) = fence_opening(line) {
                    current = Some((fence, vec![line]));
                }
            }
            Some((fence, lines)) => {
                lines.push(line);
                if closes(fence, line) {
                    blocks.push(lines.join("\n"));
                    current = None;
                }
            }
        }
    }
    if let Some((_, lines)) = current {
        blocks.push(lines.join("\n"));
    }
    blocks
}

/// True when every opened fence is closed.
pub fn fences_balanced(text: &str) -> bool {
    let mut open: Option<Fence> = None;
    for line in text.lines() {
        match &open {
            None => open = fence_opening(line),
            Some(fence) => {
                if closes(fence, line) {
                    open = None;
                }
            }
        }
    }
    open.is_none()
}

/// Lines that are not inside a fenced code block.
pub fn prose_lines(text: &str) -> Vec<&str> {
    numbered_prose_lines(text)
        .into_iter()
        .map(|(_, line)| line)
        .collect()
}

/// Like [`prose_lines`], paired with 1-based line numbers in `text`.
pub fn numbered_prose_lines(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut open: Option<Fence> = None;
    for (index, line) in text.lines().enumerate() {
        match &open {
            None => match fence_opening(line) {
                Some(f) => open = Some(f),
                None => out.push((index + 1, line)),
            },
            Some(fence) => {
                if closes(fence, line) {
                    open = None;
                }
            }
        }
    }
    out
}

fn parser(text: &str) -> Parser<'_> {
    Parser::new_ext(text, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH)
}

/// Inline code spans, verbatim including their backticks.
pub fn inline_code_spans(text: &str) -> Vec<String> {
    parser(text)
        .into_offset_iter()
        .filter_map(|(event, range)| match event {
            Event::Code(_) => Some(text[range].to_string()),
            _ => None,
        })
        .collect()
}

/// Link and image destinations, plus bare URLs appearing in prose.
pub fn link_targets(text: &str) -> Vec<String> {
    let mut targets: Vec<String> = parser(text)
        .filter_map(|event| match event {
            Event::Start(Tag::Link { dest_url, .. }) | Event::Start(Tag::Image { dest_url, .. }) => {
                Some(dest_url.to_string())
            }
            _ => None,
        })
        .filter(|d| !d.is_empty())
        .collect();

    for line in prose_lines(text) {
        let without_code = strip_inline_code(line);
        for m in bare_url_regex().find_iter(&without_code) {
            let url = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']);
            if !targets.iter().any(|t| t == url) {
                targets.push(url.to_string());
            }
        }
    }
    targets
}

/// Heading levels in document order.
pub fn heading_levels(text: &str) -> Vec<u8> {
    parser(text)
        .filter_map(|event| match event {
            Event::Start(Tag::Heading { level, .. }) => Some(level as u8),
            _ => None,
        })
        .collect()
}

/// Heading transitions that deepen by more than one level, as `(from, to)`.
pub fn heading_skips(levels: &[u8]) -> Vec<(u8, u8)> {
    levels
        .windows(2)
        .filter(|w| w[1] > w[0] + 1)
        .map(|w| (w[0], w[1]))
        .collect()
}

fn table_cells(line: &str) -> usize {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    let mut count = 1;
    let mut escaped = false;
    for c in inner.chars() {
        match c {
            '\\' => escaped = !escaped,
            '|' if !escaped => count += 1,
            _ => escaped = false,
        }
    }
    count
}

fn is_separator_row(line: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\|?\s*:?-{3,}:?\s*(\|\s*:?-{3,}:?\s*)*\|?\s*$").expect("static regex")
    })
    .is_match(line)
}

/// A table row whose cell count disagrees with the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefect {
    pub line: usize,
    pub expected: usize,
    pub found: usize,
}

/// Rows of pipe tables whose column count differs from their header row.
/// `line` is the 1-based line number in `text`.
pub fn table_defects(text: &str) -> Vec<TableDefect> {
    let lines = numbered_prose_lines(text);
    let adjacent = |a: usize, b: usize| lines[b].0 == lines[a].0 + 1;
    let mut defects = Vec::new();
    let mut i = 0;

    while i + 1 < lines.len() {
        let header = lines[i].1;
        if header.contains('|') && adjacent(i, i + 1) && is_separator_row(lines[i + 1].1) {
            let expected = table_cells(header);
            let separator_cells = table_cells(lines[i + 1].1);
            if separator_cells != expected {
                defects.push(TableDefect {
                    line: lines[i + 1].0,
                    expected,
                    found: separator_cells,
                });
            }
            let mut j = i + 2;
            while j < lines.len()
                && adjacent(j - 1, j)
                && lines[j].1.contains('|')
                && !lines[j].1.trim().is_empty()
            {
                let found = table_cells(lines[j].1);
                if found != expected {
                    defects.push(TableDefect {
                        line: lines[j].0,
                        expected,
                        found,
                    });
                }
                j += 1;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    defects
}

fn strip_inline_code(line: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`+[^`]*`+").expect("static regex"))
        .replace_all(line, " ")
        .into_owned()
}

/// Prose only: fenced blocks and inline code removed.
pub fn strip_code(text: &str) -> String {
    prose_lines(text)
        .into_iter()
        .map(strip_inline_code)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prose with code, URLs, link destinations and HTML tags removed.
pub fn translatable_text(text: &str) -> String {
    static LINK_DEST: OnceLock<Regex> = OnceLock::new();
    let link_dest = LINK_DEST.get_or_init(|| Regex::new(r"\]\([^)]*\)").expect("static regex"));

    let prose = strip_code(text);
    let prose = link_dest.replace_all(&prose, "]");
    let prose = bare_url_regex().replace_all(&prose, " ");
    html_tag_regex().replace_all(&prose, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Title\n\nUse `cargo build` to compile.\n\n```rust\nfn main() {}\n```\n\nSee [docs](https://example.com/docs) and ./guide.md or https://rust-lang.org.\n";

    #[test]
    fn test_is_cjk() {
        assert!(is_cjk('中'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('。'));
    }

    #[test]
    fn test_chinese_ratio() {
        assert_eq!(chinese_ratio("hello"), 0.0);
        assert_eq!(chinese_ratio("中文"), 1.0);
        let mixed = chinese_ratio("中文ab");
        assert!((mixed - 0.5).abs() < f64::EPSILON);
        // Code does not count.
        assert_eq!(chinese_ratio("中文\n```\nabcdefgh\n```\n"), 1.0);
    }

    #[test]
    fn test_fenced_blocks() {
        let blocks = fenced_blocks(SAMPLE);
        assert_eq!(blocks, vec!["```rust\nfn main() {}\n```".to_string()]);
    }

    #[test]
    fn test_fence_balance() {
        assert!(fences_balanced(SAMPLE));
        assert!(!fences_balanced("```\nopen forever\n"));
        assert!(fences_balanced("````\n```\nnested\n```\n````\n"));
    }

    #[test]
    fn test_inline_code_spans() {
        assert_eq!(inline_code_spans(SAMPLE), vec!["`cargo build`".to_string()]);
    }

    #[test]
    fn test_link_targets() {
        let links = link_targets(SAMPLE);
        assert!(links.contains(&"https://example.com/docs".to_string()));
        assert!(links.contains(&"https://rust-lang.org".to_string()));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_heading_levels_and_skips() {
        let levels = heading_levels("# A\n\n### C\n\n## B\n");
        assert_eq!(levels, vec![1, 3, 2]);
        assert_eq!(heading_skips(&levels), vec![(1, 3)]);
        // Headings inside code are ignored.
        assert!(heading_levels("```\n# not a heading\n```\n").is_empty());
    }

    #[test]
    fn test_table_defects() {
        let good = "| a | b |\n|---|---|\n| 1 | 2 |\n";
        assert!(table_defects(good).is_empty());
        let bad = "| a | b |\n|---|---|\n| 1 | 2 | 3 |\n";
        let defects = table_defects(bad);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].expected, 2);
        assert_eq!(defects[0].found, 3);
        assert_eq!(defects[0].line, 3);
    }

    #[test]
    fn test_table_defect_lines_count_fenced_code() {
        let text = "# Setup\n\n```sh\nmake\nmake install\n```\n\n| a | b |\n|---|---|\n| 1 |\n";
        let defects = table_defects(text);
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].line, 10);
        assert_eq!(text.lines().nth(defects[0].line - 1), Some("| 1 |"));
    }

    #[test]
    fn test_table_split_by_fence_is_not_joined() {
        let text = "| a | b |\n|---|---|\n```\ncode\n```\n| 1 | 2 | 3 |\n";
        assert!(table_defects(text).is_empty());
    }

    #[test]
    fn test_translatable_text_drops_code_and_urls() {
        let prose = translatable_text(SAMPLE);
        assert!(!prose.contains("cargo build"));
        assert!(!prose.contains("fn main"));
        assert!(!prose.contains("https://"));
        assert!(prose.contains("Title"));
    }
}
