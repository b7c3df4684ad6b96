//! Lexical helpers over raw SPARQL text.
//!
//! Nothing here parses SPARQL. The scanner only knows enough to blank out
//! string literals, comments and (optionally) IRI bodies, so that regex rules
//! never fire on quoted text. Masked text always has the same byte length as
//! the input, so offsets found in the mask apply to the original.

use std::ops::Range;

/// Which lexical regions to blank out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskMode {
    /// Strings and comments.
    Literals,
    /// Strings, comments and IRI bodies between `<` and `>`.
    LiteralsAndIris,
}

fn is_iri_byte(b: u8) -> bool {
    b > 0x20 && !matches!(b, b'<' | b'>' | b'"' | b'{' | b'}' | b'|' | b'^' | b'`' | b'\\')
}

/// End (exclusive, pointing past `>`) of an IRIREF starting at `start`, if any.
fn iri_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'>' => return Some(i + 1),
            b if is_iri_byte(b) => i += 1,
            _ => return None,
        }
    }
    None
}

/// End (exclusive) of a string literal whose opening quote is at `start`.
fn string_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let long = bytes.len() >= start + 3 && bytes[start + 1] == quote && bytes[start + 2] == quote;
    let mut i = if long { start + 3 } else { start + 1 };
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => {
                if !long {
                    return i + 1;
                }
                if bytes.len() >= i + 3 && bytes[i + 1] == quote && bytes[i + 2] == quote {
                    return i + 3;
                }
                i += 1;
            }
            b'\n' if !long => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Blank out literal/comment (and optionally IRI) interiors with spaces.
///
/// Delimiters are kept, so `"a*b"` becomes `"   "` and `<http://x>` becomes
/// `<        >`.
pub fn mask(query: &str, mode: MaskMode) -> String {
    let bytes = query.as_bytes();
    let mut hidden = vec![false; bytes.len()];
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                let end = string_end(bytes, i);
                let quote_len = if end >= i + 6 && bytes[i + 1] == bytes[i] && bytes[i + 2] == bytes[i] {
                    3
                } else {
                    1
                };
                let inner_end = end.saturating_sub(quote_len).max(i + quote_len).min(end);
                for flag in &mut hidden[(i + quote_len).min(end)..inner_end] {
                    *flag = true;
                }
                i = end;
            }
            b'#' => {
                let end = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |p| i + p);
                for flag in &mut hidden[i..end] {
                    *flag = true;
                }
                i = end;
            }
            b'<' => match iri_end(bytes, i) {
                Some(end) => {
                    if mode == MaskMode::LiteralsAndIris {
                        for flag in &mut hidden[i + 1..end - 1] {
                            *flag = true;
                        }
                    }
                    i = end;
                }
                None => i += 1,
            },
            _ => i += 1,
        }
    }

    let mut out = String::with_capacity(query.len());
    for (idx, ch) in query.char_indices() {
        if hidden[idx] {
            out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
        } else {
            out.push(ch);
        }
    }
    out
}

/// Brace depth before each byte of `masked`.
pub fn brace_depths(masked: &str) -> Vec<i32> {
    let mut depth = 0i32;
    masked
        .bytes()
        .map(|b| {
            let before = depth;
            match b {
                b'{' => depth += 1,
                b'}' => depth -= 1,
                _ => {}
            }
            before
        })
        .collect()
}

/// Index of the `}` matching the `{` at `open`.
pub fn matching_brace(masked: &str, open: usize) -> Option<usize> {
    let bytes = masked.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Case-insensitive occurrences of `keyword` that are real keywords, not
/// parts of a variable (`?limit`), a prefixed name (`ex:graph`) or a prefix
/// (`from:`).
pub fn keyword_spans(masked: &str, keyword: &str) -> Vec<Range<usize>> {
    let bytes = masked.as_bytes();
    let kw = keyword.as_bytes();
    let mut spans = Vec::new();
    if kw.is_empty() || bytes.len() < kw.len() {
        return spans;
    }
    for start in 0..=bytes.len() - kw.len() {
        let end = start + kw.len();
        if !bytes[start..end].eq_ignore_ascii_case(kw) {
            continue;
        }
        let before = start.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(end).copied();
        let bounded_before = !before.is_some_and(|b| is_word_byte(b) || matches!(b, b':' | b'?' | b'$' | b'-'));
        let bounded_after = !after.is_some_and(|b| is_word_byte(b) || matches!(b, b':' | b'-'));
        if bounded_before && bounded_after {
            spans.push(start..end);
        }
    }
    spans
}

/// The WHERE group: the first `{` at depth zero and its matching `}`.
pub fn where_block(masked: &str) -> Option<(usize, usize)> {
    let depths = brace_depths(masked);
    let open = masked
        .bytes()
        .enumerate()
        .find(|&(i, b)| b == b'{' && depths[i] == 0)
        .map(|(i, _)| i)?;
    let close = matching_brace(masked, open)?;
    Some((open, close))
}

/// First non-whitespace byte index at or after `from`.
pub fn skip_ws(text: &str, from: usize) -> usize {
    text.as_bytes()[from.min(text.len())..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(text.len(), |p| from + p)
}

/// The whitespace-delimited token at `from` (stops at `{` as well).
pub fn token_at(text: &str, from: usize) -> Range<usize> {
    let start = skip_ws(text, from);
    let len = text.as_bytes()[start..]
        .iter()
        .position(|&b| b.is_ascii_whitespace() || b == b'{')
        .unwrap_or(text.len() - start);
    start..start + len
}
