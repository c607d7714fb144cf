//! Static table of per-language compile/run pipelines.
//!
//! A pipeline is an optional compile stage followed by a mandatory run stage,
//! each expressed as a [`CommandTemplate`]. Templates may reference:
//!
//! - `{source}`: absolute path of the generated source file
//! - `{dir}`: the scratch directory the stage runs in
//! - `{binary}`: compiler output path (`{dir}/main`)
//!
//! Adding a language means adding one entry to [`LanguageTable::builtin`].

use crate::error::{Result, RuntimeError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: String,
    /// Tried once when `program` is not installed.
    pub fallback_program: Option<String>,
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            fallback_program: None,
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_fallback(mut self, program: impl Into<String>) -> Self {
        self.fallback_program = Some(program.into());
        self
    }

    pub fn render(&self, paths: &StagePaths) -> RenderedCommand {
        RenderedCommand {
            program: paths.substitute(&self.program),
            fallback_program: self.fallback_program.as_deref().map(|p| paths.substitute(p)),
            args: self.args.iter().map(|a| paths.substitute(a)).collect(),
        }
    }
}

/// A command template with every placeholder filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub fallback_program: Option<String>,
    pub args: Vec<String>,
}

impl RenderedCommand {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct StagePaths {
    pub dir: PathBuf,
    pub source: PathBuf,
    pub binary: PathBuf,
}

impl StagePaths {
    pub fn new(dir: &Path, source_filename: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            source: dir.join(source_filename),
            binary: dir.join("main"),
        }
    }

    fn substitute(&self, template: &str) -> String {
        template
            .replace("{source}", &self.source.to_string_lossy())
            .replace("{binary}", &self.binary.to_string_lossy())
            .replace("{dir}", &self.dir.to_string_lossy())
    }
}

#[derive(Debug, Clone)]
pub struct LanguageSpec {
    pub id: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub source_filename: String,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    pub env: Vec<(String, String)>,
}

impl LanguageSpec {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        source_filename: impl Into<String>,
        run: CommandTemplate,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            aliases: Vec::new(),
            source_filename: source_filename.into(),
            compile: None,
            run,
            env: Vec::new(),
        }
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_compile(mut self, compile: CommandTemplate) -> Self {
        self.compile = Some(compile);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    fn answers_to(&self, normalized: &str) -> bool {
        self.id == normalized || self.aliases.iter().any(|a| a == normalized)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LanguageInfo {
    pub id: String,
    pub display_name: String,
    pub aliases: Vec<String>,
    pub compiled: bool,
}

impl From<&LanguageSpec> for LanguageInfo {
    fn from(spec: &LanguageSpec) -> Self {
        Self {
            id: spec.id.clone(),
            display_name: spec.display_name.clone(),
            aliases: spec.aliases.clone(),
            compiled: spec.is_compiled(),
        }
    }
}

/// Immutable lookup table, built once and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct LanguageTable {
    specs: Vec<Arc<LanguageSpec>>,
}

impl LanguageTable {
    pub fn from_specs(specs: Vec<LanguageSpec>) -> Self {
        Self {
            specs: specs.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::from_specs(vec![
            LanguageSpec::new(
                "python",
                "Python 3",
                "main.py",
                CommandTemplate::new("python")
                    .with_fallback("python3")
                    .arg("{source}"),
            )
            .with_aliases(["py", "python3"])
            .with_env("PYTHONUNBUFFERED", "1"),
            LanguageSpec::new("c", "C (gcc, C11)", "main.c", CommandTemplate::new("{binary}"))
                .with_compile(
                    CommandTemplate::new("gcc")
                        .args(["{source}", "-O2", "-std=c11", "-o", "{binary}"]),
                ),
            LanguageSpec::new(
                "cpp",
                "C++ (g++, C++17)",
                "main.cpp",
                CommandTemplate::new("{binary}"),
            )
            .with_aliases(["c++", "cxx"])
            .with_compile(
                CommandTemplate::new("g++")
                    .args(["{source}", "-O2", "-std=c++17", "-o", "{binary}"]),
            ),
            LanguageSpec::new(
                "javascript",
                "JavaScript (Node.js)",
                "main.js",
                CommandTemplate::new("node").arg("{source}"),
            )
            .with_aliases(["js", "node"]),
            LanguageSpec::new(
                "java",
                "Java",
                "Main.java",
                CommandTemplate::new("java").args(["-cp", "{dir}", "Main"]),
            )
            .with_compile(CommandTemplate::new("javac").arg("{source}")),
        ])
    }

    /// Case-insensitive lookup by id or alias.
    pub fn lookup(&self, language: &str) -> Result<Arc<LanguageSpec>> {
        let normalized = language.trim().to_lowercase();

        self.specs
            .iter()
            .find(|spec| spec.answers_to(&normalized))
            .cloned()
            .ok_or_else(|| RuntimeError::UnsupportedLanguage {
                requested: language.to_string(),
                supported: self.supported_description(),
            })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<LanguageSpec>> {
        self.specs.iter()
    }

    pub fn describe(&self) -> Vec<LanguageInfo> {
        self.specs.iter().map(|s| LanguageInfo::from(s.as_ref())).collect()
    }

    /// e.g. "python, c, cpp, javascript, or java (aliases: py, c++, js, node)"
    pub fn supported_description(&self) -> String {
        let ids = self.ids();
        let listed = match ids.split_last() {
            Some((last, rest)) if !rest.is_empty() => format!("{}, or {}", rest.join(", "), last),
            Some((last, _)) => last.to_string(),
            None => String::new(),
        };

        let aliases: Vec<&str> = self
            .specs
            .iter()
            .flat_map(|s| s.aliases.iter().map(String::as_str))
            .collect();

        if aliases.is_empty() {
            listed
        } else {
            format!("{} (aliases: {})", listed, aliases.join(", "))
        }
    }
}

impl Default for LanguageTable {
    fn default() -> Self {
        Self::builtin()
    }
}
