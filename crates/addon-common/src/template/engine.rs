//! Template engine for addon manifests

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};

use super::filters;
use crate::error::Error;
use crate::Result;

/// Renders addon manifest templates with the resolved parameter map.
///
/// Undefined variables are lenient: a parameter the template references but
/// the Addon does not set renders as empty, which is how the original
/// templates express optional blocks guarded by `default`.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with the manifest filter set registered
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);

        env.add_filter("default", filters::default_filter);
        env.add_filter("b64enc", filters::b64enc);
        env.add_filter("b64dec", filters::b64dec);
        env.add_filter("quote", filters::quote);
        env.add_filter("squote", filters::squote);
        env.add_filter("upper", filters::upper);
        env.add_filter("lower", filters::lower);
        env.add_filter("title", filters::title);

        Self { env }
    }

    /// Render a template string with the given parameters
    pub fn render_str(&self, source: &str, params: &BTreeMap<String, String>) -> Result<String> {
        self.env
            .render_str(source, params)
            .map_err(|e| Error::template("<inline>", e.to_string()))
    }

    /// Render a template file to an output file, creating parent
    /// directories as needed
    pub fn render_file(
        &self,
        input: &Path,
        output: &Path,
        params: &BTreeMap<String, String>,
    ) -> Result<()> {
        let source = std::fs::read_to_string(input)
            .map_err(|e| Error::template(input.display().to_string(), e.to_string()))?;
        let rendered = self
            .env
            .render_str(&source, params)
            .map_err(|e| Error::template(input.display().to_string(), e.to_string()))?;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("creating {}: {e}", parent.display())))?;
        }
        std::fs::write(output, rendered)
            .map_err(|e| Error::internal(format!("writing {}: {e}", output.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn renders_simple_substitution() {
        let engine = TemplateEngine::new();
        let out = engine
            .render_str("clusterIP: {{ dnsServer }}", &params(&[("dnsServer", "10.21.0.1")]))
            .unwrap();
        assert_eq!(out, "clusterIP: 10.21.0.1");
    }

    #[test]
    fn undefined_variable_renders_empty() {
        let engine = TemplateEngine::new();
        let out = engine.render_str("image: {{ DockerRegistry }}nginx", &params(&[])).unwrap();
        assert_eq!(out, "image: nginx");
    }

    #[test]
    fn filters_compose() {
        let engine = TemplateEngine::new();
        let out = engine
            .render_str(
                "domain: {{ dnsDomain | default(\"cluster.local\") | quote }}",
                &params(&[]),
            )
            .unwrap();
        assert_eq!(out, "domain: \"cluster.local\"");
    }

    #[test]
    fn render_file_writes_output_tree() {
        let engine = TemplateEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.yaml");
        std::fs::write(&input, "memory: {{ dnsMemoryLimit }}\n").unwrap();
        let output = dir.path().join("create/out.yaml");
        engine.render_file(&input, &output, &params(&[("dnsMemoryLimit", "170Mi")])).unwrap();
        assert_eq!(std::fs::read_to_string(output).unwrap(), "memory: 170Mi\n");
    }

    #[test]
    fn render_file_missing_input_is_template_error() {
        let engine = TemplateEngine::new();
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .render_file(&dir.path().join("nope.yaml"), &dir.path().join("o.yaml"), &params(&[]))
            .unwrap_err();
        assert!(matches!(err, Error::Template { .. }));
    }
}
