use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use super::{count_words, ensure_positive, hard_cut, ChunkPiece, Chunker, DEFAULT_MAX_CHUNK_SIZE};
use crate::ports::PortResult;

static NEWLINE_BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*\n\s*<").expect("newline between tags pattern"));
static SPACES_BETWEEN_TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s{2,}<").expect("spaces between tags pattern"));
static EXTRA_BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n\s*\n+").expect("blank line pattern"));
static EMPTY_PARAGRAPHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<p(?:\s[^>]*)?>\s*</p>").expect("empty paragraph pattern"));
static NBSP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)&(?:nbsp|#160|#xa0);").expect("nbsp pattern"));

/// Elements with no content and no end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Inline elements kept whole: a chunk boundary never falls inside one.
const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "del", "dfn", "em", "font", "i", "ins",
    "kbd", "label", "mark", "q", "rp", "rt", "ruby", "s", "samp", "small", "span", "strike",
    "strong", "sub", "sup", "time", "u", "var",
];

/// Elements whose content is not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

/// Closing one of these is the preferred place to end a chunk.
const BLOCK_BREAK_ELEMENTS: &[&str] = &[
    "p", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "ul", "ol",
    "section", "article", "table", "figure",
];

/// Chunker for rich-text (HTML) bodies. Every chunk is well-formed on its own:
/// block elements open at a split are closed before it and re-opened, with the
/// same attributes, at the start of the next chunk.
#[derive(Debug, Clone)]
pub struct HtmlChunker {
    max_chunk_size: usize,
}

impl HtmlChunker {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// Collapses whitespace between tags and blank-line runs, drops empty
    /// paragraphs, then trims the body.
    pub fn normalize(body: &str) -> String {
        let body = NEWLINE_BETWEEN_TAGS.replace_all(body, "> <");
        let body = SPACES_BETWEEN_TAGS.replace_all(&body, "> <");
        let body = EXTRA_BLANK_LINES.replace_all(&body, "\n\n");
        let body = EMPTY_PARAGRAPHS.replace_all(&body, "");
        body.trim().to_string()
    }

    fn split_normalized(&self, html: &str) -> Vec<String> {
        let max = self.max_chunk_size;
        if html.chars().count() <= max {
            return vec![html.to_string()];
        }

        let units = build_units(html);
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut open_at_start: Vec<OpenTag> = Vec::new();

        while start < units.len() {
            while start < units.len() && units[start].kind == UnitKind::Space {
                start += 1;
            }
            if start >= units.len() {
                break;
            }

            let prefix: usize = open_at_start.iter().map(|t| t.raw_chars).sum();
            let mut stack = open_at_start.clone();
            let mut used = prefix;
            let mut seen_content = false;
            let mut overflow = None;
            let mut cut = BreakCandidates::default();

            for (i, unit) in units.iter().enumerate().skip(start) {
                used += unit.chars;
                apply(&mut stack, unit, html);
                if used + closers_len(&stack) > max {
                    overflow = Some(i);
                    break;
                }
                seen_content |= unit.is_content();
                if seen_content {
                    cut.note(i, &unit.kind);
                }
            }

            let Some(overflow) = overflow else {
                if seen_content {
                    chunks.push(render(html, &units, start, units.len() - 1, &open_at_start));
                }
                break;
            };

            match cut.best() {
                Some((last, resume)) => {
                    chunks.push(render(html, &units, start, last, &open_at_start));
                    open_at_start = replay(&open_at_start, &units[start..=last], html);
                    start = resume;
                }
                None => {
                    let text = render(html, &units, start, overflow, &open_at_start);
                    warn!(
                        max_chunk_size = max,
                        element_chars = units[overflow].chars,
                        "unbreakable html element exceeds the chunk size; hard-cutting"
                    );
                    chunks.extend(fold_markup_only(hard_cut(&text, max), max));
                    open_at_start = replay(&open_at_start, &units[start..=overflow], html);
                    start = overflow + 1;
                }
            }
        }

        chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

impl Default for HtmlChunker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_SIZE)
    }
}

impl Chunker for HtmlChunker {
    fn split(&self, body: &str) -> PortResult<Vec<ChunkPiece>> {
        ensure_positive(self.max_chunk_size)?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let normalized = Self::normalize(body);
        Ok(self
            .split_normalized(&normalized)
            .into_iter()
            .map(|content| ChunkPiece {
                word_count: count_words(&visible_text(&content)),
                content,
            })
            .collect())
    }

    fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

/// Hard-cut pieces with no visible text are merged into a neighbouring piece
/// when the result still fits, and dropped otherwise.
fn fold_markup_only(pieces: Vec<String>, max: usize) -> Vec<String> {
    let mut folded: Vec<String> = Vec::new();
    let mut pending = String::new();
    for piece in pieces {
        let piece_len = piece.chars().count();
        if visible_text(&piece).trim().is_empty() {
            match folded.last_mut() {
                Some(last) => {
                    if last.chars().count() + piece_len <= max {
                        last.push_str(&piece);
                    }
                }
                None => {
                    if pending.chars().count() + piece_len <= max {
                        pending.push_str(&piece);
                    }
                }
            }
        } else if !pending.is_empty() && pending.chars().count() + piece_len <= max {
            folded.push(std::mem::take(&mut pending) + &piece);
        } else {
            pending.clear();
            folded.push(piece);
        }
    }
    folded
}

/// The text a reader sees: tags dropped (block-level ones act as word
/// separators) and non-breaking spaces turned into spaces.
pub fn visible_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    for token in tokenize(html) {
        match &token.kind {
            TokenKind::Text => text.push_str(&NBSP.replace_all(&html[token.span.clone()], " ")),
            TokenKind::Start { name, .. } | TokenKind::End { name }
                if INLINE_ELEMENTS.contains(&name.as_str()) => {}
            _ => text.push(' '),
        }
    }
    text
}

//=========================================================================================
// Tokens: a flat lexical view of the markup
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Text,
    Start { name: String, self_closing: bool },
    End { name: String },
    /// Comments, doctypes and processing instructions.
    Opaque,
}

#[derive(Debug, Clone)]
struct Token {
    span: Range<usize>,
    kind: TokenKind,
}

fn tokenize(html: &str) -> Vec<Token> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] == b'<' {
            if let Some((kind, end)) = parse_markup(html, pos) {
                if text_start < pos {
                    tokens.push(Token {
                        span: text_start..pos,
                        kind: TokenKind::Text,
                    });
                }
                tokens.push(Token {
                    span: pos..end,
                    kind,
                });
                pos = end;
                text_start = end;
                continue;
            }
        }
        pos += 1;
    }
    if text_start < bytes.len() {
        tokens.push(Token {
            span: text_start..bytes.len(),
            kind: TokenKind::Text,
        });
    }
    tokens
}

/// Parses the markup starting at `html[pos] == '<'`. Returns `None` when the
/// `<` is literal text.
fn parse_markup(html: &str, pos: usize) -> Option<(TokenKind, usize)> {
    let rest = &html[pos..];
    let bytes = rest.as_bytes();

    if rest.starts_with("<!--") {
        let end = rest[4..]
            .find("-->")
            .map_or(html.len(), |i| pos + 4 + i + 3);
        return Some((TokenKind::Opaque, end));
    }

    match *bytes.get(1)? {
        b'!' | b'?' => {
            let close = rest.find('>')?;
            Some((TokenKind::Opaque, pos + close + 1))
        }
        b'/' => {
            let name = tag_name(&rest[2..])?;
            let close = rest[2 + name.len()..].find('>')?;
            Some((
                TokenKind::End {
                    name: name.to_ascii_lowercase(),
                },
                pos + 2 + name.len() + close + 1,
            ))
        }
        b if b.is_ascii_alphabetic() => {
            let name = tag_name(&rest[1..])?;
            let close = 1 + name.len() + find_tag_end(&rest[1 + name.len()..])?;
            let self_closing = rest[..close].trim_end().ends_with('/');
            Some((
                TokenKind::Start {
                    name: name.to_ascii_lowercase(),
                    self_closing,
                },
                pos + close + 1,
            ))
        }
        _ => None,
    }
}

fn tag_name(s: &str) -> Option<&str> {
    let len = s
        .bytes()
        .take_while(|b| b.is_ascii_alphanumeric() || *b == b'-' || *b == b':')
        .count();
    (len > 0 && s.as_bytes()[0].is_ascii_alphabetic()).then(|| &s[..len])
}

/// Offset of the `>` ending a start tag, skipping quoted attribute values.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote = None;
    for (i, b) in s.bytes().enumerate() {
        match (quote, b) {
            (None, b'"' | b'\'') => quote = Some(b),
            (Some(q), _) if q == b => quote = None,
            (None, b'>') => return Some(i),
            _ => {}
        }
    }
    None
}

//=========================================================================================
// Units: the pieces a chunk boundary may fall between
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum UnitKind {
    Open { name: String },
    Close { name: String, block: bool },
    /// A whole inline element, a void element, or opaque markup.
    Atomic,
    Word,
    Space,
}

#[derive(Debug, Clone)]
struct Unit {
    span: Range<usize>,
    chars: usize,
    kind: UnitKind,
}

impl Unit {
    fn new(html: &str, span: Range<usize>, kind: UnitKind) -> Self {
        let chars = html[span.clone()].chars().count();
        Self { span, chars, kind }
    }

    fn is_content(&self) -> bool {
        matches!(self.kind, UnitKind::Word | UnitKind::Atomic)
    }
}

fn build_units(html: &str) -> Vec<Unit> {
    let tokens = tokenize(html);
    let mut units = Vec::with_capacity(tokens.len());
    let mut k = 0;

    while k < tokens.len() {
        let token = &tokens[k];
        match &token.kind {
            TokenKind::Text => split_text(html, token.span.clone(), &mut units),
            TokenKind::Opaque => units.push(Unit::new(html, token.span.clone(), UnitKind::Atomic)),
            TokenKind::Start { name, self_closing } => {
                let name = name.as_str();
                if *self_closing || VOID_ELEMENTS.contains(&name) {
                    units.push(Unit::new(html, token.span.clone(), UnitKind::Atomic));
                } else if INLINE_ELEMENTS.contains(&name) || RAW_TEXT_ELEMENTS.contains(&name) {
                    let end = matching_end(&tokens, k, name).unwrap_or(k);
                    let span = token.span.start..tokens[end].span.end;
                    units.push(Unit::new(html, span, UnitKind::Atomic));
                    k = end;
                } else {
                    units.push(Unit::new(
                        html,
                        token.span.clone(),
                        UnitKind::Open {
                            name: name.to_string(),
                        },
                    ));
                }
            }
            TokenKind::End { name } => units.push(Unit::new(
                html,
                token.span.clone(),
                UnitKind::Close {
                    name: name.clone(),
                    block: BLOCK_BREAK_ELEMENTS.contains(&name.as_str()),
                },
            )),
        }
        k += 1;
    }
    units
}

/// Index of the end tag closing the start tag at `tokens[open]`.
fn matching_end(tokens: &[Token], open: usize, name: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open + 1) {
        match &token.kind {
            TokenKind::Start {
                name: n,
                self_closing: false,
            } if n == name => depth += 1,
            TokenKind::End { name: n } if n == name => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

fn split_text(html: &str, span: Range<usize>, units: &mut Vec<Unit>) {
    let text = &html[span.clone()];
    let mut run_start = 0;
    let mut run_is_space = None;
    for (i, c) in text.char_indices() {
        let is_space = c.is_whitespace();
        match run_is_space {
            Some(prev) if prev != is_space => {
                push_run(html, span.start + run_start..span.start + i, prev, units);
                run_start = i;
            }
            _ => {}
        }
        run_is_space = Some(is_space);
    }
    if let Some(prev) = run_is_space {
        push_run(html, span.start + run_start..span.end, prev, units);
    }
}

fn push_run(html: &str, span: Range<usize>, is_space: bool, units: &mut Vec<Unit>) {
    let kind = if is_space {
        UnitKind::Space
    } else {
        UnitKind::Word
    };
    units.push(Unit::new(html, span, kind));
}

//=========================================================================================
// Open-element bookkeeping
//=========================================================================================

#[derive(Debug, Clone)]
struct OpenTag {
    name: String,
    /// The start tag exactly as written, attributes included.
    raw: String,
    raw_chars: usize,
}

fn apply(stack: &mut Vec<OpenTag>, unit: &Unit, html: &str) {
    match &unit.kind {
        UnitKind::Open { name } => {
            // A new <p> or <li> implicitly closes an unterminated sibling.
            let implicit = matches!(name.as_str(), "p" | "li")
                && stack.last().is_some_and(|top| top.name == *name);
            if implicit {
                stack.pop();
            }
            let raw = html[unit.span.clone()].to_string();
            stack.push(OpenTag {
                name: name.clone(),
                raw,
                raw_chars: unit.chars,
            });
        }
        UnitKind::Close { name, .. } => {
            if let Some(idx) = stack.iter().rposition(|t| t.name == *name) {
                stack.truncate(idx);
            }
        }
        _ => {}
    }
}

fn replay(open: &[OpenTag], units: &[Unit], html: &str) -> Vec<OpenTag> {
    let mut stack = open.to_vec();
    for unit in units {
        apply(&mut stack, unit, html);
    }
    stack
}

fn closers_len(stack: &[OpenTag]) -> usize {
    stack.iter().map(|t| t.name.len() + 3).sum()
}

/// Re-opens `open`, copies `units[first..=last]` verbatim, then closes
/// whatever is still open.
fn render(html: &str, units: &[Unit], first: usize, last: usize, open: &[OpenTag]) -> String {
    let mut out = String::new();
    for tag in open {
        out.push_str(&tag.raw);
    }
    out.push_str(&html[units[first].span.start..units[last].span.end]);
    for tag in replay(open, &units[first..=last], html).iter().rev() {
        out.push_str("</");
        out.push_str(&tag.name);
        out.push('>');
    }
    out
}

/// The last acceptable split points seen while filling a chunk.
#[derive(Debug, Default)]
struct BreakCandidates {
    block: Option<usize>,
    space: Option<usize>,
    any: Option<usize>,
}

impl BreakCandidates {
    fn note(&mut self, i: usize, kind: &UnitKind) {
        match kind {
            UnitKind::Close { block: true, .. } => self.block = Some(i),
            UnitKind::Space => self.space = Some(i),
            _ => {}
        }
        self.any = Some(i);
    }

    /// `(last unit kept in the chunk, first unit of the next one)`, preferring
    /// a closing block tag, then whitespace, then any unit boundary.
    fn best(&self) -> Option<(usize, usize)> {
        if let Some(i) = self.block {
            return Some((i, i + 1));
        }
        if let Some(i) = self.space {
            // The whitespace itself belongs to neither chunk.
            return Some((i - 1, i + 1));
        }
        self.any.map(|i| (i, i + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(max: usize, body: &str) -> Vec<ChunkPiece> {
        HtmlChunker::new(max).split(body).unwrap()
    }

    fn contents(pieces: &[ChunkPiece]) -> Vec<&str> {
        pieces.iter().map(|p| p.content.as_str()).collect()
    }

    #[test]
    fn small_body_is_one_chunk() {
        let pieces = split(1000, "<p>Hello <strong>bold</strong> world.</p>");
        assert_eq!(contents(&pieces), ["<p>Hello <strong>bold</strong> world.</p>"]);
        assert_eq!(pieces[0].word_count, 3);
    }

    #[test]
    fn prefers_closing_block_tags() {
        let body = "<p>one two three</p>\n<p>four five six</p>";
        let pieces = split(30, body);
        assert_eq!(
            contents(&pieces),
            ["<p>one two three</p>", "<p>four five six</p>"]
        );
        assert_eq!(pieces[0].word_count + pieces[1].word_count, 6);
    }

    #[test]
    fn straddling_paragraph_is_closed_and_reopened() {
        let body = r#"<p class="intro">one two three four five six</p>"#;
        let pieces = split(30, body);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(piece.char_len() <= 30, "{}", piece.content);
            assert!(piece.content.starts_with(r#"<p class="intro">"#), "{}", piece.content);
            assert!(piece.content.ends_with("</p>"), "{}", piece.content);
        }
        let total: i32 = pieces.iter().map(|p| p.word_count).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn never_splits_inside_inline_elements() {
        let body = "<p>aa <em>bb cc dd</em> ee ff</p>";
        for max in 20..body.len() {
            for piece in split(max, body) {
                let opens = piece.content.matches("<em>").count();
                let closes = piece.content.matches("</em>").count();
                assert_eq!(opens, closes, "max {max}: {}", piece.content);
            }
        }
    }

    #[test]
    fn never_splits_character_references() {
        let body = "<div>fish &amp; chips &amp; peas &amp; gravy</div>";
        for piece in split(24, body) {
            let text = piece.content.replace("&amp;", "");
            assert!(!text.contains('&'), "{}", piece.content);
        }
    }

    #[test]
    fn nested_blocks_reopen_the_whole_stack() {
        let body = "<blockquote><p>alpha beta gamma delta</p></blockquote>";
        let pieces = split(45, body);
        assert!(pieces.len() >= 2);
        for piece in &pieces {
            assert!(piece.content.starts_with("<blockquote><p>"), "{}", piece.content);
            assert!(piece.content.ends_with("</p></blockquote>"), "{}", piece.content);
        }
    }

    #[test]
    fn oversized_inline_element_is_hard_cut() {
        let body = format!("<p><strong>{}</strong></p>", "word ".repeat(20));
        let pieces = split(40, &body);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|p| p.char_len() <= 40));
    }

    #[test]
    fn hard_cut_never_emits_a_markup_only_chunk() {
        let body = r#"<blockquote><p><a href="/x?a=1&amp;b=2">a</a></p></blockquote>"#;
        let pieces = split(60, body);
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert!(piece.char_len() <= 60, "{}", piece.content);
            assert!(piece.word_count > 0, "markup-only chunk {:?}", piece.content);
        }
        assert_eq!(pieces.iter().map(|p| p.word_count).sum::<i32>(), 1);
    }

    #[test]
    fn markup_only_pieces_fold_into_a_neighbour() {
        let pieces = vec!["<p>a".to_string(), "</p>".to_string()];
        assert_eq!(fold_markup_only(pieces, 10), ["<p>a</p>"]);

        let pieces = vec!["<p>".to_string(), "abc</p>".to_string()];
        assert_eq!(fold_markup_only(pieces, 10), ["<p>abc</p>"]);

        let pieces = vec!["<p>abcdef".to_string(), "</p></div>".to_string()];
        assert_eq!(fold_markup_only(pieces, 10), ["<p>abcdef"]);
    }

    #[test]
    fn drops_empty_paragraphs_and_blank_bodies() {
        assert!(split(100, "   ").is_empty());
        assert_eq!(
            HtmlChunker::normalize("<p>a</p>\n\n<p> </p>\n<p>b</p>"),
            "<p>a</p>  <p>b</p>"
        );
    }

    #[test]
    fn visible_text_separates_blocks_but_not_inline() {
        assert_eq!(count_words(&visible_text("<p>a</p><p>b</p>")), 2);
        assert_eq!(count_words(&visible_text("un<em>believ</em>able")), 1);
        assert_eq!(count_words(&visible_text("one&nbsp;two<br>three")), 3);
    }

    #[test]
    fn literal_angle_brackets_are_text() {
        let tokens = tokenize("a < b and c<d");
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Text));
    }

    #[test]
    fn quoted_gt_does_not_end_a_tag() {
        let tokens = tokenize(r#"<a title="x > y">link</a>"#);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].span, 0..17);
    }
}
