//! Display-safe rendering of a converted document.
//!
//! A single figure inlined as base64 can be hundreds of kilobytes. Terminals
//! and preview panes choke on that, so [`redact_embedded_images`] swaps each
//! inline image for [`EMBEDDED_IMAGE_PLACEHOLDER`]. Everything outside the
//! matched image spans is copied byte for byte.

use once_cell::sync::Lazy;
use regex::Regex;

/// Replaces each `![alt](data:image/…;base64,…)` span.
pub const EMBEDDED_IMAGE_PLACEHOLDER: &str = "<embedded image>";

static RE_EMBEDDED_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"!\[[^\]\n]*\]\(data:image/[A-Za-z0-9.+-]+;base64,[A-Za-z0-9+/=\s]*\)").unwrap()
});

/// Replace every inline base64 image with a fixed placeholder.
pub fn redact_embedded_images(markdown: &str) -> String {
    RE_EMBEDDED_IMAGE
        .replace_all(markdown, EMBEDDED_IMAGE_PLACEHOLDER)
        .into_owned()
}
