use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const CLASSIFICATION: &str = "classification";
pub const SENTIMENT: &str = "sentiment";

const BUILTIN: &[(&str, &str)] = &[
    (CLASSIFICATION, include_str!("../prompts/classification.txt")),
    (SENTIMENT, include_str!("../prompts/sentiment.txt")),
];

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("prompt template not found: {0}")]
    NotFound(String),

    #[error("template {template} has no value for placeholder {{{variable}}}")]
    MissingVariable { template: String, variable: String },

    #[error("malformed template {template}: {reason}")]
    Malformed { template: String, reason: String },

    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Placeholder(String),
}

#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, TemplateError> {
        let name = name.into();
        let malformed = |reason: String| TemplateError::Malformed {
            template: name.clone(),
            reason,
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((offset, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|(_, next)| *next) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|(_, next)| *next) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut variable = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        variable.push(c);
                    }
                    if !closed {
                        return Err(malformed(format!("unclosed '{{' at byte {offset}")));
                    }
                    let variable = variable.trim();
                    if variable.is_empty()
                        || !variable.chars().all(|c| c.is_alphanumeric() || c == '_')
                    {
                        return Err(malformed(format!(
                            "invalid placeholder {{{variable}}} at byte {offset}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(variable.to_string()));
                }
                '}' => return Err(malformed(format!("unmatched '}}' at byte {offset}"))),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Text(literal));
        }

        Ok(Self { name, segments })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn render(&self, variables: &HashMap<&str, &str>) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = variables.get(name.as_str()).ok_or_else(|| {
                        TemplateError::MissingVariable {
                            template: self.name.clone(),
                            variable: name.clone(),
                        }
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    dir: Option<PathBuf>,
}

impl TemplateStore {
    /// Store backed by the templates compiled into the binary.
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: Some(dir.as_ref().to_path_buf()),
        }
    }

    #[tracing::instrument(skip(self), fields(dir = ?self.dir))]
    pub fn load(&self, name: &str) -> Result<Template, TemplateError> {
        let text = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("{name}.txt"));
                if !path.is_file() {
                    return Err(TemplateError::NotFound(path.display().to_string()));
                }
                std::fs::read_to_string(&path)
                    .map_err(|source| TemplateError::Io { path, source })?
            }
            None => BUILTIN
                .iter()
                .find(|(builtin, _)| *builtin == name)
                .map(|(_, text)| text.to_string())
                .ok_or_else(|| TemplateError::NotFound(name.to_string()))?,
        };

        let template = Template::parse(name, text.trim())?;
        tracing::debug!(placeholders = ?template.placeholders(), "Loaded prompt template");
        Ok(template)
    }
}
