//! Sandbox templates and the embedded default configuration.
//!
//! A template names an execution environment image and how to check that
//! it is ready. The built-in catalog can be extended or overridden from
//! `[[templates]]` entries in `sandpool.toml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default `sandpool.toml` configuration written by `sandpool init`.
pub const SANDPOOL_TOML: &str = include_str!("sandpool.toml");

/// Language runtime a template is built around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Python with pip-installed packages.
    Python,
    /// Node.js with npm-installed packages.
    Node,
    /// Anything else; no warm-up check.
    #[default]
    Plain,
}

impl Runtime {
    /// Image used when a template does not name one.
    pub fn default_image(self) -> &'static str {
        match self {
            Self::Python => "python:3.12-slim",
            Self::Node => "node:20-slim",
            Self::Plain => "debian:bookworm-slim",
        }
    }
}

impl std::fmt::Display for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::Node => write!(f, "node"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

/// An execution environment that sandboxes are created from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Template identifier used as the pool key.
    pub id: String,
    /// Runtime kind, selects the warm-up check.
    #[serde(default)]
    pub runtime: Runtime,
    /// Container image; defaults to the runtime's image.
    #[serde(default)]
    pub image: Option<String>,
    /// Smoke command run once after creation.
    #[serde(default)]
    pub warmup_command: Option<String>,
}

impl Template {
    /// A template with no image override and no warm-up command.
    pub fn new(id: impl Into<String>, runtime: Runtime) -> Self {
        Self {
            id: id.into(),
            runtime,
            image: None,
            warmup_command: None,
        }
    }

    /// Sets the container image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the warm-up command.
    #[must_use]
    pub fn with_warmup(mut self, command: impl Into<String>) -> Self {
        self.warmup_command = Some(command.into());
        self
    }

    /// Container image for this template.
    pub fn image(&self) -> &str {
        self.image
            .as_deref()
            .unwrap_or_else(|| self.runtime.default_image())
    }

    /// Warm-up command to run, if the runtime calls for one.
    ///
    /// Package-based runtimes fall back to a version probe when no explicit
    /// command is configured.
    pub fn warmup(&self) -> Option<&str> {
        match (&self.warmup_command, self.runtime) {
            (Some(cmd), _) => Some(cmd.as_str()),
            (None, Runtime::Python) => Some("python3 --version"),
            (None, Runtime::Node) => Some("node --version"),
            (None, Runtime::Plain) => None,
        }
    }
}

/// Lookup table of known templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Template>,
}

impl TemplateCatalog {
    /// Catalog with the built-in templates.
    pub fn builtin() -> Self {
        let templates = [
            Template::new("code-interpreter-v1", Runtime::Python)
                .with_warmup("python3 -c 'import json, sqlite3'"),
            Template::new("nextjs-developer", Runtime::Node)
                .with_warmup("cd /home/user && npm ls --depth=0"),
            Template::new("vue-developer", Runtime::Node)
                .with_warmup("cd /home/user && npm ls --depth=0"),
            Template::new("streamlit-developer", Runtime::Python)
                .with_warmup("python3 -c 'import streamlit'"),
            Template::new("gradio-developer", Runtime::Python)
                .with_warmup("python3 -c 'import gradio'"),
        ];
        Self::default().with_overrides(templates)
    }

    /// Adds templates, replacing any with the same id.
    #[must_use]
    pub fn with_overrides(mut self, templates: impl IntoIterator<Item = Template>) -> Self {
        for template in templates {
            self.templates.insert(template.id.clone(), template);
        }
        self
    }

    /// Looks up a template by id.
    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    /// Looks up a template, falling back to a plain template whose image is the id.
    pub fn resolve(&self, id: &str) -> Template {
        self.get(id)
            .cloned()
            .unwrap_or_else(|| Template::new(id, Runtime::Plain).with_image(id))
    }

    /// Iterates over templates in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    /// Number of known templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
