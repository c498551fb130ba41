//! Prompt Template Store.
//!
//! Decouples prompt strings from code: every LLM call site renders a named
//! template against a variable map rather than `format!`-ing a string
//! in-line. This is the fix for the brace-escaping bugs that ad-hoc prompt
//! string-formatting produces once a prompt needs to embed JSON examples —
//! the template syntax (`{{var}}`) is distinct from the literal braces a
//! prompt asks the model to produce.
//!
//! Templates are loaded once at process start and are read-only thereafter;
//! `TemplateStore::load` fails fast if any `*.txt` file under the templates
//! directory fails to parse.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{ResearchError, Result};

mod render;

pub use render::Vars;

/// Every template a pipeline stage renders by name. `TemplateStore::load`
/// refuses to return a store missing any of these — a source integration
/// or orchestrator stage discovering a missing template mid-run is a
/// configuration error, not a per-task failure, so it must surface at
/// startup instead.
const REQUIRED_TEMPLATES: &[&str] = &[
    "decompose_task",
    "generate_query",
    "reformulate_query",
    "relevance_filter",
    "generate_hypotheses",
    "extract_entities_claims",
    "synthesize_report",
];

/// A template name is its filename without the `.txt` extension, e.g.
/// `decompose_task` for `templates/decompose_task.txt`.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: HashMap<String, render::ParsedTemplate>,
}

impl TemplateStore {
    /// Load and parse every `*.txt` file directly under `dir`. Returns
    /// `TemplateNotFound` if `dir` does not exist, or if any name in
    /// [`REQUIRED_TEMPLATES`] has no corresponding file — a missing
    /// templates directory or a missing required template are both
    /// configuration errors, not an empty-but-valid store.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ResearchError::TemplateNotFound(format!(
                "templates directory not found: {}",
                dir.display()
            )));
        }

        let mut templates = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let name = template_name(&path)?;
            let source = std::fs::read_to_string(&path)?;
            let parsed = render::parse(&source).map_err(|detail| {
                ResearchError::Configuration(format!(
                    "failed to parse template '{name}': {detail}"
                ))
            })?;
            templates.insert(name, parsed);
        }

        for required in REQUIRED_TEMPLATES {
            if !templates.contains_key(*required) {
                return Err(ResearchError::TemplateNotFound(required.to_string()));
            }
        }

        Ok(Self { templates })
    }

    /// Render `name` against `vars`. Fails with `UndefinedVariable` if the
    /// template references a variable not present in `vars` — there is no
    /// silent empty-string fallback, since a silently-dropped variable in
    /// a prompt is exactly the class of bug this module exists to prevent.
    pub fn render(&self, name: &str, vars: &Vars) -> Result<String> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| ResearchError::TemplateNotFound(name.to_string()))?;
        render::render(template, vars).map_err(|variable| ResearchError::UndefinedVariable {
            template: name.to_string(),
            variable,
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(|s| s.as_str())
    }

    #[cfg(test)]
    pub fn from_inline(name: &str, source: &str) -> Self {
        let mut templates = HashMap::new();
        templates.insert(name.to_string(), render::parse(source).unwrap());
        Self { templates }
    }
}

fn template_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ResearchError::Configuration(format!("invalid template filename: {}", path.display())))
}

/// Helper used throughout the pipeline to build a [`Vars`] map from
/// arbitrary serializable values without each call site hand-rolling
/// `serde_json::Value` construction.
pub fn vars() -> Vars {
    Vars::new()
}

pub fn json_vars(pairs: &[(&str, Value)]) -> Vars {
    let mut v = Vars::new();
    for (key, value) in pairs {
        v.insert_json(*key, value.clone());
    }
    v
}

/// Resolve a templates directory relative to the crate's working directory,
/// falling back to the packaged default shipped alongside the binary.
pub fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_all_required(dir: &Path, skip: Option<&str>) {
        for name in REQUIRED_TEMPLATES {
            if Some(*name) == skip {
                continue;
            }
            std::fs::write(dir.join(format!("{name}.txt")), "hello {{question}}").unwrap();
        }
    }

    /// Property 8 (template completeness): a directory missing any required
    /// template must fail fast at load time rather than surfacing as a
    /// per-task `TemplateNotFound` deep inside a pipeline stage.
    #[test]
    fn load_fails_fast_when_a_required_template_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        write_all_required(dir.path(), Some("relevance_filter"));
        let err = TemplateStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, ResearchError::TemplateNotFound(ref name) if name == "relevance_filter"));
    }

    #[test]
    fn load_succeeds_when_every_required_template_is_present() {
        let dir = tempfile::tempdir().unwrap();
        write_all_required(dir.path(), None);
        let store = TemplateStore::load(dir.path()).unwrap();
        for name in REQUIRED_TEMPLATES {
            assert!(store.names().any(|n| n == *name));
        }
    }

    #[test]
    fn load_rejects_a_missing_templates_directory() {
        let missing = std::env::temp_dir().join("definitely-does-not-exist-templates-dir");
        assert!(matches!(
            TemplateStore::load(&missing),
            Err(ResearchError::TemplateNotFound(_))
        ));
    }
}
