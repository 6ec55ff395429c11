//! Manifest template rendering
//!
//! Addon templates are plain text manifests with Jinja-style placeholders,
//! rendered with the resolved parameter map as context. The filter set
//! mirrors the string helpers the templates rely on: case conversion,
//! defaults, quoting and base64.

mod engine;
mod filters;

pub use engine::TemplateEngine;
