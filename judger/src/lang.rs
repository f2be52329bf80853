//! Language definitions and the compile/execute command template resolver.
//!
//! A language is described by a YAML record in the language directory:
//! filename templates for the source and the produced executable, a list of
//! variables (fixed strings or regex captures over the submitted source
//! text), and argument-vector templates for the compile and execute steps.
//! Templates use `{name}` placeholders; unresolved placeholders pass through
//! unchanged, and every occurrence of a known placeholder is substituted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use err_derive::Error;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::config::JudgerConfig;
use crate::problem::SourceSpec;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LanguageMeta {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableKind {
    /// A fixed value.
    String,
    /// A value captured by applying a regex to the submitted source text.
    Regexp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariableRule {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
    pub value: String,
    /// Capture group index for `regexp` variables.
    #[serde(rename = "match", default)]
    pub group: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompileRule {
    pub args: Vec<String>,
    /// Compile CPU budget in seconds.
    #[serde(rename = "timelimit")]
    pub time_limit: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRule {
    pub cmd: Vec<String>,
    /// Multiplier applied to the problem's time limit for this language.
    #[serde(rename = "timeratio", default = "default_time_ratio")]
    pub time_ratio: f64,
}

fn default_time_ratio() -> f64 {
    1.0
}

/// One language definition record (`<id>.yaml` in the language directory).
#[derive(Debug, Clone, Deserialize)]
pub struct Language {
    #[serde(default)]
    pub meta: LanguageMeta,
    #[serde(default)]
    pub variable: Vec<VariableRule>,
    pub source: String,
    pub executable: String,
    pub compile: CompileRule,
    pub execute: ExecuteRule,
}

/// Concrete command vectors and paths resolved for one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCommand {
    pub source: PathBuf,
    pub executable: PathBuf,
    pub compile: Vec<String>,
    pub execute: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(display = "cannot read source file {:?}: {}", _0, _1)]
    SourceUnreadable(PathBuf, #[error(source, no_from)] std::io::Error),

    #[error(display = "cannot read language definition {:?}: {}", _0, _1)]
    LanguageUnreadable(PathBuf, #[error(source, no_from)] std::io::Error),

    #[error(display = "malformed language definition: {}", _0)]
    LanguageMalformed(#[error(source)] serde_yaml::Error),
}

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_<]+)\}").unwrap());

/// Substitute `{name}` placeholders in a single pass. Unknown names are left
/// as-is, so partially resolved templates stay inspectable instead of
/// collapsing to empty strings.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            vars.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}

fn render_argv(argv: &[String], vars: &HashMap<String, String>) -> Vec<String> {
    argv.iter().map(|arg| render(arg, vars)).collect()
}

fn strip_extension(path: &str) -> &str {
    match path.rfind('.') {
        Some(dot) => &path[..dot],
        None => path,
    }
}

pub fn load_language(conf: &JudgerConfig, id: &str) -> Result<Language, ResolveError> {
    let path = conf.language_dir.join(format!("{}.yaml", id));
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ResolveError::LanguageUnreadable(path, e))?;
    Ok(serde_yaml::from_str(&text)?)
}

/// Resolve the concrete compile/execute commands for a submission.
///
/// Reads the submitted source text (for regex variable extraction) and the
/// language record, then renders the templates. With `canonical_source` set,
/// the resolved source path is the language's canonical filename (joined
/// onto `workdir` when given) and the compile/execute vectors refer to it;
/// the caller is expected to stage the submitted file there. Otherwise the
/// submission's literal path is used throughout.
pub fn resolve(
    code: &SourceSpec,
    conf: &JudgerConfig,
    workdir: Option<&Path>,
    canonical_source: bool,
) -> Result<(ResolvedCommand, Language), ResolveError> {
    let source_path = PathBuf::from(&code.source);
    let source_text = std::fs::read_to_string(&source_path)
        .map_err(|e| ResolveError::SourceUnreadable(source_path.clone(), e))?;
    let language = load_language(conf, &code.language)?;

    let mut vars: HashMap<String, String> = HashMap::new();
    let literal = source_path.display().to_string();
    vars.insert("source".to_owned(), literal.clone());
    vars.insert("source<".to_owned(), strip_extension(&literal).to_owned());

    for rule in &language.variable {
        match rule.kind {
            VariableKind::String => {
                vars.insert(rule.name.clone(), rule.value.clone());
            }
            VariableKind::Regexp => {
                let pattern = match Regex::new(&rule.value) {
                    Ok(p) => p,
                    Err(err) => {
                        tracing::warn!(pattern = %rule.value, %err, "unable to compile variable pattern");
                        continue;
                    }
                };
                // An unmatched pattern or out-of-range group leaves the
                // variable unset; the placeholder then passes through.
                if let Some(caps) = pattern.captures(&source_text) {
                    if let Some(m) = caps.get(rule.group) {
                        tracing::debug!(name = %rule.name, value = %m.as_str(), "extracted variable");
                        vars.insert(rule.name.clone(), m.as_str().to_owned());
                    }
                }
            }
        }
    }

    let source = if canonical_source {
        let rendered = render(&language.source, &vars);
        let staged = match workdir {
            Some(dir) => dir.join(rendered),
            None => PathBuf::from(rendered),
        };
        let staged_str = staged.display().to_string();
        vars.insert("source".to_owned(), staged_str.clone());
        vars.insert(
            "source<".to_owned(),
            strip_extension(&staged_str).to_owned(),
        );
        staged
    } else {
        source_path
    };

    let executable = {
        let rendered = render(&language.executable, &vars);
        let path = match workdir {
            Some(dir) if !rendered.starts_with('/') => dir.join(&rendered),
            _ => PathBuf::from(&rendered),
        };
        vars.insert("executable".to_owned(), path.display().to_string());
        path
    };

    let resolved = ResolvedCommand {
        compile: render_argv(&language.compile.args, &vars),
        execute: render_argv(&language.execute.cmd, &vars),
        source,
        executable,
    };
    Ok((resolved, language))
}
