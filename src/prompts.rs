//! Prompts understood by DeepSeek-OCR.
//!
//! The model switches behaviour on a leading control token rather than on a
//! long instruction. `<|grounding|>` asks it to emit `<|ref|>`/`<|det|>` tags
//! around every layout element, which is what makes figure extraction
//! possible; without it the output is plain Markdown with no boxes.
//!
//! Callers can override the prompt via
//! [`crate::config::ConversionConfig::prompt`]; these constants are the
//! documented presets.

use std::path::Path;

/// Default prompt: Markdown with grounding boxes.
pub const DEFAULT_PROMPT: &str = "<|grounding|>Convert the document to markdown.";

/// Grounded OCR for images that are not documents (photos, signs, slides).
pub const GROUNDED_OCR_PROMPT: &str = "<|grounding|>OCR this image.";

/// Plain text, no layout tags. Figures cannot be embedded in this mode.
pub const FREE_OCR_PROMPT: &str = "Free OCR.";

/// Build the single positional argument `ollama run` expects.
///
/// The ollama CLI attaches any image path it finds in the prompt, so the
/// page path goes on the first line and the instruction on the second.
pub fn ollama_cli_input(image_path: &Path, prompt: &str) -> String {
    format!("{}\n{}", image_path.display(), prompt)
}

/// True if the prompt asks the model for grounding tags.
pub fn is_grounded(prompt: &str) -> bool {
    prompt.contains("<|grounding|>")
}
