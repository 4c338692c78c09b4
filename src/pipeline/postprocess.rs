//! Post-processing: strip leftover tag syntax and normalise the Markdown.
//!
//! Runs after figure embedding (or on its own when embedding is off). By
//! then every `image` reference that could be resolved has become an inline
//! PNG; whatever tag syntax remains is layout scaffolding the reader should
//! never see.
//!
//! ## Rule Order
//!
//! 1. Remove reference pairs and detection boxes, content included
//! 2. Remove stray bare tokens (`<|grounding|>`, an orphan `<|/ref|>`, …)
//! 3. Rewrite `\( … \)` → `$ … $` and `\[ … \]` → `$$ … $$`
//! 4. Collapse runs of blank lines
//!
//! Rules 1 and 2 share one scan of the tag grammar. Blank-line collapsing
//! runs last because removing a tag that sat alone on its line leaves an
//! empty line behind. Every rule is idempotent, so the whole pass is too.

use crate::pipeline::tags;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Apply all cleanup rules to the model output of one page.
pub fn clean_text(input: &str) -> String {
    let s = strip_tags(input);
    let s = rewrite_math_delimiters(&s);
    collapse_blank_lines(&s)
}

// ── Rules 1 + 2: Remove tags ─────────────────────────────────────────────────

fn strip_tags(input: &str) -> String {
    // Removing one token can splice two fragments into a new one
    // (`<|<|x|>ref|>`), so repeat until the text is stable.
    let mut current = strip_tags_once(input);
    loop {
        let next = strip_tags_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_tags_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for tag in tags::scan(input) {
        let span = tag.span();
        out.push_str(&input[cursor..span.start]);
        cursor = span.end;
    }
    out.push_str(&input[cursor..]);
    out
}

// ── Rule 3: Math delimiters ──────────────────────────────────────────────────

static RE_INLINE_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\((.*?)\\\)").unwrap());
static RE_DISPLAY_MATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\\\[(.*?)\\\]").unwrap());

fn rewrite_math_delimiters(input: &str) -> String {
    let s = RE_INLINE_MATH.replace_all(input, |caps: &Captures<'_>| format!("${}$", &caps[1]));
    RE_DISPLAY_MATH
        .replace_all(&s, |caps: &Captures<'_>| format!("$${}$$", &caps[1]))
        .into_owned()
}

// ── Rule 4: Collapse blank lines ─────────────────────────────────────────────

// Two or more blank (or whitespace-only) lines, starting at a line start.
static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(?:[ \t]*\n){2,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n").into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        let input = "# Title\n\nSome *text* with | pipes | and <b>html</b>.\n- item\n";
        assert_eq!(clean_text(input), input);
    }

    #[test]
    fn plain_text_only_loses_extra_blank_lines() {
        assert_eq!(clean_text("a\n\n\n\nb\n\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn removes_reference_pairs_with_content() {
        let input = "<|ref|>title<|/ref|><|det|>[[10,10,990,60]]<|/det|>\n# Annual Report";
        assert_eq!(clean_text(input), "\n# Annual Report");
    }

    #[test]
    fn removes_non_image_reference_without_cropping() {
        let input = "before <|ref|>table<|/ref|><|det|>[[1,2,3,4]]<|/det|> after";
        assert_eq!(clean_text(input), "before  after");
    }

    #[test]
    fn removes_malformed_leftovers() {
        let input = "x<|ref|>image<|/ref|><|det|>[[1,2,3]]<|/det|>y";
        assert_eq!(clean_text(input), "xy");
    }

    #[test]
    fn removes_lone_boxes_and_bare_tokens() {
        let input = "<|grounding|>Text<|det|>[[0,0,5,5]]<|/det|> more<|/ref|><|sn|>";
        assert_eq!(clean_text(input), "Text more");
    }

    #[test]
    fn strip_reaches_a_fixed_point() {
        assert_eq!(clean_text("a<|<|x|>ref|>b"), "ab");
    }

    #[test]
    fn keeps_embedded_images() {
        let input = "![image](data:image/png;base64,iVBORw0KGgo+/=)";
        assert_eq!(clean_text(input), input);
    }

    #[test]
    fn rewrites_inline_math() {
        assert_eq!(clean_text(r"where \(x+1\) holds"), "where $x+1$ holds");
    }

    #[test]
    fn rewrites_display_math() {
        assert_eq!(clean_text(r"\[x=1\]"), "$$x=1$$");
    }

    #[test]
    fn math_rewrite_spans_newlines() {
        let input = "\\[\n\\sum_{i=1}^{n} i\n\\]\nand \\(a\n+b\\)";
        assert_eq!(clean_text(input), "$$\n\\sum_{i=1}^{n} i\n$$\nand $a\n+b$");
    }

    #[test]
    fn dollar_signs_in_content_survive() {
        assert_eq!(clean_text(r"\(\$5\)"), r"$\$5$");
    }

    #[test]
    fn blank_lines_from_removed_tags_collapse() {
        let input = "Para one\n\n<|ref|>image<|/ref|><|det|>[[1,2,3]]<|/det|>\n\n\nPara two";
        assert_eq!(clean_text(input), "Para one\n\nPara two");
    }

    #[test]
    fn whitespace_only_lines_count_as_blank() {
        assert_eq!(collapse_blank_lines("a\n  \n\t\n \nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn leading_whitespace_only_run_collapses() {
        assert_eq!(clean_text(" \n\n\nbody"), "\nbody");
        assert_eq!(collapse_blank_lines("\t\n  \nbody\n"), "\nbody\n");
    }

    #[test]
    fn box_with_stray_angle_bracket_is_removed_whole() {
        assert_eq!(clean_text("a<|det|>[[1,2<3,4]]<|/det|>b"), "ab");
    }

    #[test]
    fn cleaning_is_idempotent() {
        let input = "<|grounding|>\n# T\n\n\n<|ref|>x<|/ref|>\n\\(a\\)\n\n\n\\[b\\]<|det|>[[1,1,2,2]]<|/det|>";
        let once = clean_text(input);
        assert_eq!(clean_text(&once), once);
    }
}
