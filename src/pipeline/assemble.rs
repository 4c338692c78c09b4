//! Document assembly: join cleaned pages into one Markdown file.
//!
//! Layout:
//!
//! ```text
//! <!-- Generated from report.pdf -->
//!
//! <!-- Page 1 -->
//!
//! …page 1…
//!
//! <!-- Page 2 -->
//!
//! …page 2…
//! ```
//!
//! Page markers appear only when there is more than one page. Blocks are
//! separated by exactly one blank line and the file ends with one newline.
//! Page text is otherwise copied verbatim: no dedup, no reflow.

use crate::output::Document;

/// Serialise `document` to Markdown.
pub fn assemble_document(document: &Document) -> String {
    let mut pages: Vec<_> = document.pages.iter().collect();
    pages.sort_by_key(|p| p.index);

    let mut blocks = Vec::with_capacity(pages.len() * 2 + 1);
    blocks.push(provenance_comment(&document.source_name));

    let numbered = pages.len() > 1;
    for page in pages {
        if numbered {
            blocks.push(format!("<!-- Page {} -->", page.index));
        }
        let body = trim_blank_edges(&page.markdown);
        if !body.is_empty() {
            blocks.push(body.to_string());
        }
    }

    let mut out = blocks.join("\n\n");
    out.push('\n');
    out
}

/// Drop leading blank lines and trailing whitespace. Indentation of the
/// first non-blank line is kept.
fn trim_blank_edges(text: &str) -> &str {
    let text = text.trim_end();
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            break;
        }
        start += line.len();
    }
    &text[start..]
}

fn provenance_comment(source_name: &str) -> String {
    // `--` would end the HTML comment early.
    format!("<!-- Generated from {} -->", source_name.replace("--", "- -"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::PageResult;

    fn page(index: usize, markdown: &str) -> PageResult {
        PageResult {
            index,
            markdown: markdown.to_string(),
            embedded_images: 0,
            diagnostics: vec![],
            duration_ms: 0,
            retries: 0,
        }
    }

    #[test]
    fn single_page_has_no_marker() {
        let doc = Document::new("scan.png", vec![page(1, "# Hello\n\nWorld\n")]);
        assert_eq!(
            assemble_document(&doc),
            "<!-- Generated from scan.png -->\n\n# Hello\n\nWorld\n"
        );
    }

    #[test]
    fn pages_are_marked_in_ascending_order() {
        let mut doc = Document::new("r.pdf", vec![]);
        doc.pages = vec![page(3, "three"), page(1, "one"), page(2, "two")];
        assert_eq!(
            assemble_document(&doc),
            "<!-- Generated from r.pdf -->\n\n\
             <!-- Page 1 -->\n\none\n\n\
             <!-- Page 2 -->\n\ntwo\n\n\
             <!-- Page 3 -->\n\nthree\n"
        );
    }

    #[test]
    fn empty_page_keeps_its_marker() {
        let doc = Document::new("r.pdf", vec![page(1, "one"), page(2, "\n\n")]);
        assert_eq!(
            assemble_document(&doc),
            "<!-- Generated from r.pdf -->\n\n<!-- Page 1 -->\n\none\n\n<!-- Page 2 -->\n"
        );
    }

    #[test]
    fn whitespace_only_edge_lines_do_not_widen_the_gap() {
        let doc = Document::new("r.pdf", vec![page(1, "one\n \n"), page(2, " \n\t\n    code")]);
        let md = assemble_document(&doc);
        assert_eq!(
            md,
            "<!-- Generated from r.pdf -->\n\n\
             <!-- Page 1 -->\n\none\n\n\
             <!-- Page 2 -->\n\n    code\n"
        );
        assert!(!md.contains("\n \n\n"));
    }

    #[test]
    fn cleaned_page_ending_in_a_removed_tag_joins_cleanly() {
        let cleaned =
            crate::pipeline::postprocess::clean_text("one\n \n<|ref|>table<|/ref|><|det|>[[1,2,3,4]]<|/det|>");
        let doc = Document::new("r.pdf", vec![page(1, &cleaned), page(2, "two")]);
        assert_eq!(
            assemble_document(&doc),
            "<!-- Generated from r.pdf -->\n\n\
             <!-- Page 1 -->\n\none\n\n\
             <!-- Page 2 -->\n\ntwo\n"
        );
    }

    #[test]
    fn empty_document_is_just_the_header() {
        let doc = Document::new("blank.pdf", vec![]);
        assert_eq!(assemble_document(&doc), "<!-- Generated from blank.pdf -->\n");
    }

    #[test]
    fn source_name_cannot_close_the_comment() {
        let doc = Document::new("a-->b.pdf", vec![]);
        assert_eq!(assemble_document(&doc), "<!-- Generated from a- ->b.pdf -->\n");
    }
}
