//! Scanner for the inline tag language emitted by DeepSeek-OCR.
//!
//! In grounding mode the model interleaves its Markdown with three kinds of
//! tokens:
//!
//! ```text
//! <|ref|>image<|/ref|><|det|>[[120, 88, 912, 430]]<|/det|>   reference + box
//! <|det|>[[0, 0, 1000, 52]]<|/det|>                          lone box
//! <|grounding|>  <|/ref|>                                    bare tokens
//! ```
//!
//! The language is flat: a reference value never contains another tag, so one
//! compiled alternation scanned left to right is the whole parser. Matches are
//! leftmost-first and never overlap, and every match carries its exact byte
//! span so later stages can splice the source text without scanning it again.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use thiserror::Error;

/// Reference value that marks a figure region to crop and embed.
pub const IMAGE_REFERENCE: &str = "image";

/// Side length of the model's normalised coordinate canvas.
pub const NORMALIZED_CANVAS: i64 = 1000;

// Alternation order matters: a reference (with its optional box) must win
// over the bare `<|ref|>` token that starts it, and a lone box over the bare
// `<|det|>` token. Box payloads may hold a stray `<` but never `<|`, so an
// unterminated box cannot run on into the next tag.
static RE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?s)<\|ref\|>(?P<value>.*?)<\|/ref\|>",
        r"(?:\s*<\|det\|>\s*\[\[(?P<coords>(?:[^<]|<[^|])*?)\]\]\s*<\|/det\|>)?",
        r"|<\|det\|>\s*\[\[(?P<lone>(?:[^<]|<[^|])*?)\]\]\s*<\|/det\|>",
        r"|<\|(?P<close>/)?(?P<name>[A-Za-z0-9_+-]+)\|>",
    ))
    .unwrap()
});

/// Which production of the grammar a match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Reference,
    Detection,
    Bare,
}

/// One recognised span of tag syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagMatch<'t> {
    /// `<|ref|>VALUE<|/ref|>`, optionally followed by its detection box.
    Reference {
        value: &'t str,
        detection: Option<&'t str>,
        span: Range<usize>,
    },
    /// `<|det|>[[…]]<|/det|>` with no reference in front of it.
    Detection { coords: &'t str, span: Range<usize> },
    /// A stray `<|name|>` or `<|/name|>` token.
    Bare {
        name: &'t str,
        closing: bool,
        span: Range<usize>,
    },
}

impl<'t> TagMatch<'t> {
    pub fn kind(&self) -> TagKind {
        match self {
            TagMatch::Reference { .. } => TagKind::Reference,
            TagMatch::Detection { .. } => TagKind::Detection,
            TagMatch::Bare { .. } => TagKind::Bare,
        }
    }

    /// Byte range of the whole match in the scanned text.
    pub fn span(&self) -> Range<usize> {
        match self {
            TagMatch::Reference { span, .. }
            | TagMatch::Detection { span, .. }
            | TagMatch::Bare { span, .. } => span.clone(),
        }
    }

    /// The reference value, coordinate text or token name.
    pub fn payload(&self) -> &'t str {
        match self {
            TagMatch::Reference { value, .. } => *value,
            TagMatch::Detection { coords, .. } => *coords,
            TagMatch::Bare { name, .. } => *name,
        }
    }

    /// True for a reference pair whose value is exactly `image`.
    pub fn is_image_reference(&self) -> bool {
        matches!(self, TagMatch::Reference { value, .. } if value.trim() == IMAGE_REFERENCE)
    }
}

/// Lazily scan `text` for tags, in document order.
pub fn scan(text: &str) -> impl Iterator<Item = TagMatch<'_>> {
    RE_TAG.captures_iter(text).filter_map(classify)
}

/// True if `text` contains any tag syntax at all.
pub fn contains_tags(text: &str) -> bool {
    RE_TAG.is_match(text)
}

fn classify<'t>(caps: Captures<'t>) -> Option<TagMatch<'t>> {
    let whole = caps.get(0)?;
    let span = whole.range();

    if let Some(value) = caps.name("value") {
        return Some(TagMatch::Reference {
            value: value.as_str(),
            detection: caps.name("coords").map(|m| m.as_str()),
            span,
        });
    }
    if let Some(coords) = caps.name("lone") {
        return Some(TagMatch::Detection {
            coords: coords.as_str(),
            span,
        });
    }
    caps.name("name").map(|name| TagMatch::Bare {
        name: name.as_str(),
        closing: caps.name("close").is_some(),
        span,
    })
}

// ── Detection boxes ──────────────────────────────────────────────────────────

/// Why a coordinate list was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoxParseError {
    #[error("expected 4 coordinates, got {found}")]
    WrongArity { found: usize },

    #[error("coordinate '{value}' is not an integer")]
    NotAnInteger { value: String },
}

/// A bounding box on the 1000×1000 normalised canvas, as written by the model.
///
/// Values are kept exactly as parsed: corners may be reversed and values may
/// fall outside `[0, 1000]`. Resolving against a real image is the job of
/// [`crate::pipeline::embed::resolve_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl FromStr for NormalizedBox {
    type Err = BoxParseError;

    fn from_str(coords: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = coords.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BoxParseError::WrongArity { found: parts.len() });
        }
        let mut values = [0i64; 4];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| BoxParseError::NotAnInteger {
                value: (*part).to_string(),
            })?;
        }
        let [x1, y1, x2, y2] = values;
        Ok(NormalizedBox { x1, y1, x2, y2 })
    }
}

impl fmt::Display for NormalizedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[[{},{},{},{}]]", self.x1, self.y1, self.x2, self.y2)
    }
}
