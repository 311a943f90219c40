use serde::Serialize;
use serde_yaml::Value;

use crate::artifact::{ArtifactId, StoreLocation, sha256_hex};
use crate::error::{PipelineError, PipelineResult};

/// A synthesized deployment template: raw text plus the placeholder names
/// its `Parameters` section declares. Placeholders are referenced in the
/// body as `{{name}}` tokens and stay unresolved until binding.
#[derive(Debug, Clone)]
pub struct TemplateDocument {
    raw: String,
    placeholders: Vec<String>,
}

impl TemplateDocument {
    /// Parse template text, collecting declared placeholder names from the
    /// `Parameters` mapping. A template without parameters is valid; it
    /// simply binds to nothing.
    pub fn parse(raw: impl Into<String>) -> PipelineResult<Self> {
        let raw = raw.into();
        let value: Value =
            serde_yaml::from_str(&raw).map_err(|err| PipelineError::TemplateValidation {
                target: String::new(),
                reason: format!("not a YAML document: {err}"),
            })?;
        let mut placeholders = Vec::new();
        if let Some(params) = value.get("Parameters")
            && let Some(mapping) = params.as_mapping()
        {
            for key in mapping.keys() {
                if let Some(name) = key.as_str() {
                    placeholders.push(name.to_string());
                }
            }
        }
        Ok(Self { raw, placeholders })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }
}

/// Transient association of one placeholder with the store location of the
/// artifact that fills it. Exists only while binding runs.
#[derive(Debug, Clone)]
pub struct ParameterBinding {
    pub placeholder_name: String,
    pub resolved_from: ArtifactId,
    pub value: StoreLocation,
}

/// A template with every placeholder replaced by a concrete value, ready
/// for the deployment executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTemplate {
    pub body: String,
    pub content_hash: String,
}

/// Resolve every declared placeholder against the bindings. Pure and
/// idempotent: the same template and bindings always yield byte-identical
/// output, and neither input is mutated.
pub fn bind(
    template: &TemplateDocument,
    bindings: &[ParameterBinding],
) -> PipelineResult<ResolvedTemplate> {
    let mut body = template.raw().to_string();
    for placeholder in template.placeholders() {
        let matching: Vec<&ParameterBinding> = bindings
            .iter()
            .filter(|b| &b.placeholder_name == placeholder)
            .collect();
        match matching.as_slice() {
            [] => {
                return Err(PipelineError::UnboundParameter {
                    placeholder: placeholder.clone(),
                });
            }
            [binding] => {
                let token = format!("{{{{{placeholder}}}}}");
                body = body.replace(&token, &binding.value.to_string());
            }
            _ => {
                return Err(PipelineError::AmbiguousBinding {
                    placeholder: placeholder.clone(),
                });
            }
        }
    }
    let content_hash = sha256_hex(body.as_bytes());
    Ok(ResolvedTemplate { body, content_hash })
}
