use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use unicode_segmentation::UnicodeSegmentation;

use crate::dom::char_slice;

/// Characters of context kept on each side of a match.
pub const CONTEXT_LENGTH: usize = 50;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static FORMAT_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\p{Cf}*$").expect("valid format regex"));

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Grapheme,
    Word,
}

/// Collation strength: which differences make two strings unequal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Neither case nor diacritics matter.
    #[default]
    Base,
    /// Diacritics matter, case does not.
    Accent,
    /// Case matters, diacritics do not.
    Case,
    Variant,
}

impl Sensitivity {
    pub fn from_flags(match_case: bool, match_diacritics: bool) -> Self {
        match (match_diacritics, match_case) {
            (true, true) => Self::Variant,
            (true, false) => Self::Accent,
            (false, true) => Self::Case,
            (false, false) => Self::Base,
        }
    }

    fn ignores_case(self) -> bool {
        matches!(self, Self::Base | Self::Accent)
    }

    fn ignores_diacritics(self) -> bool {
        matches!(self, Self::Base | Self::Case)
    }
}

/// Positions of a match inside a flat list of strings; offsets count chars.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start_index: usize,
    pub start_offset: usize,
    pub end_index: usize,
    pub end_offset: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Excerpt {
    pub pre: String,
    #[serde(rename = "match")]
    pub matched: String,
    pub post: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextMatch {
    pub range: TextRange,
    pub excerpt: Excerpt,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn normalize_whitespace(s: &str) -> String {
    WHITESPACE_RUN.replace_all(s, " ").into_owned()
}

pub fn make_excerpt(strs: &[String], range: &TextRange) -> Excerpt {
    let start = strs[range.start_index].as_str();
    let end = strs[range.end_index].as_str();
    let matched = if range.start_index == range.end_index {
        char_slice(start, range.start_offset, range.end_offset).to_string()
    } else {
        let mut matched = char_slice(start, range.start_offset, usize::MAX).to_string();
        for s in &strs[range.start_index + 1..range.end_index] {
            matched.push_str(s);
        }
        matched.push_str(char_slice(end, 0, range.end_offset));
        matched
    };

    let before = normalize_whitespace(char_slice(start, 0, range.start_offset));
    let before = before.trim_start();
    let after = normalize_whitespace(char_slice(end, range.end_offset, usize::MAX));
    let after = after.trim_end();

    let before_len = char_len(before);
    let mut pre = String::new();
    if before_len >= CONTEXT_LENGTH {
        pre.push('…');
    }
    pre.push_str(char_slice(before, before_len.saturating_sub(CONTEXT_LENGTH), before_len));

    let mut post = char_slice(after, 0, CONTEXT_LENGTH).to_string();
    if char_len(after) >= CONTEXT_LENGTH {
        post.push('…');
    }
    Excerpt { pre, matched, post }
}

/// Lowercases one char to one char so positions stay aligned. Turkic
/// locales get their dotted and dotless `i`.
fn lower_char(c: char, turkic: bool) -> char {
    match c {
        'I' if turkic => 'ı',
        'İ' if turkic => 'i',
        _ => c.to_lowercase().next().unwrap_or(c),
    }
}

fn is_turkic(locale: &str) -> bool {
    let language = locale.split(['-', '_']).next().unwrap_or_default();
    language.eq_ignore_ascii_case("tr") || language.eq_ignore_ascii_case("az")
}

/// Collation key for equality under `sensitivity`.
fn fold(s: &str, sensitivity: Sensitivity, turkic: bool) -> String {
    s.nfd()
        .filter(|&c| !(sensitivity.ignores_diacritics() && is_combining_mark(c)))
        .map(|c| {
            if sensitivity.ignores_case() {
                lower_char(c, turkic)
            } else {
                c
            }
        })
        .collect::<String>()
        .nfc()
        .collect()
}

/// Substring scan over the concatenated strings. Case is folded unless
/// `sensitivity` is [`Sensitivity::Variant`]; diacritics always count.
pub fn simple_search(strs: &[String], query: &str, locale: &str, sensitivity: Sensitivity) -> Vec<TextMatch> {
    let match_case = sensitivity == Sensitivity::Variant;
    let turkic = is_turkic(locale);
    let lower = |c: char| if match_case { c } else { lower_char(c, turkic) };
    let haystack: Vec<char> = strs.iter().flat_map(|s| s.chars()).map(lower).collect();
    let needle: Vec<char> = query.chars().map(lower).collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    let lengths: Vec<usize> = strs.iter().map(|s| char_len(s)).collect();

    let mut results = Vec::new();
    let mut str_index = 0;
    // chars in strs[..str_index]
    let mut before = 0;
    for index in 0..=haystack.len() - needle.len() {
        if haystack[index..index + needle.len()] != needle[..] {
            continue;
        }
        while before + lengths[str_index] <= index {
            before += lengths[str_index];
            str_index += 1;
        }
        let start_index = str_index;
        let start_offset = index - before;

        let end = index + needle.len();
        let (mut end_index, mut end_before) = (str_index, before);
        while end_before + lengths[end_index] < end {
            end_before += lengths[end_index];
            end_index += 1;
        }
        let range = TextRange {
            start_index,
            start_offset,
            end_index,
            end_offset: end - end_before,
        };
        results.push(TextMatch {
            excerpt: make_excerpt(strs, &range),
            range,
        });
    }
    results
}

/// Segments with their char offsets.
fn segments(s: &str, granularity: Granularity) -> Vec<(usize, &str)> {
    let pieces: Vec<(usize, &str)> = match granularity {
        Granularity::Grapheme => s.grapheme_indices(true).collect(),
        Granularity::Word => s.split_word_bound_indices().collect(),
    };
    let mut chars_before = 0;
    let mut bytes_before = 0;
    pieces
        .into_iter()
        .map(|(byte, piece)| {
            chars_before += char_len(&s[bytes_before..byte]);
            bytes_before = byte;
            (chars_before, piece)
        })
        .collect()
}

struct Segment<'a> {
    str_index: usize,
    index: usize,
    text: &'a str,
}

/// Sliding window of query-length segments compared under collation.
/// Whitespace runs collapse to one space and invisible format characters
/// are ignored.
pub fn segmenter_search(
    strs: &[String],
    query: &str,
    locale: &str,
    granularity: Granularity,
    sensitivity: Sensitivity,
) -> Vec<TextMatch> {
    let query_length = segments(query, granularity).len();
    if query_length == 0 {
        return Vec::new();
    }
    let turkic = is_turkic(locale);
    let query_key = fold(query, sensitivity, turkic);

    let mut results = Vec::new();
    let mut window: VecDeque<Segment<'_>> = VecDeque::with_capacity(query_length);
    let mut stream = strs
        .iter()
        .enumerate()
        .flat_map(|(str_index, s)| {
            segments(s, granularity)
                .into_iter()
                .map(move |(index, text)| (str_index, index, text))
        });

    'main: loop {
        while window.len() < query_length {
            let Some((str_index, index, text)) = stream.next() else {
                break 'main;
            };
            if FORMAT_ONLY.is_match(text) {
                continue;
            }
            if text.chars().any(char::is_whitespace) {
                let after_space = window.back().is_some_and(|s| s.text == " ");
                if !after_space {
                    window.push_back(Segment {
                        str_index,
                        index,
                        text: " ",
                    });
                }
                continue;
            }
            window.push_back(Segment {
                str_index,
                index,
                text,
            });
        }

        let substr: String = window.iter().map(|s| s.text).collect();
        if fold(&substr, sensitivity, turkic) == query_key {
            if let (Some(first), Some(last)) = (window.front(), window.back()) {
                let range = TextRange {
                    start_index: first.str_index,
                    start_offset: first.index,
                    end_index: last.str_index,
                    end_offset: last.index + char_len(last.text),
                };
                results.push(TextMatch {
                    excerpt: make_excerpt(strs, &range),
                    range,
                });
            }
        }
        window.pop_front();
    }
    results
}

/// Picks the plain scan for exact grapheme matching that has to respect
/// diacritics, and the segment matcher for everything else.
pub fn search(
    strs: &[String],
    query: &str,
    locale: &str,
    granularity: Granularity,
    sensitivity: Sensitivity,
) -> Vec<TextMatch> {
    if granularity == Granularity::Grapheme
        && matches!(sensitivity, Sensitivity::Variant | Sensitivity::Accent)
    {
        simple_search(strs, query, locale, sensitivity)
    } else {
        segmenter_search(strs, query, locale, granularity, sensitivity)
    }
}
