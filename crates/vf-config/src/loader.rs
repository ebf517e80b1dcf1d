//! Tag-expanding YAML loader
//!
//! Tags are expanded depth-first while the document is read, so the result
//! is plain YAML. Paths in `!include*` tags resolve against the directory of
//! the file that contains the tag.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;

/// Tags understood by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Include,
    IncludeDirMergeList,
    Secret,
    EnvVar,
}

impl Tag {
    fn parse(tag: &str) -> Option<Tag> {
        match tag.trim_start_matches('!') {
            "include" => Some(Tag::Include),
            "include_dir_merge_list" => Some(Tag::IncludeDirMergeList),
            "secret" => Some(Tag::Secret),
            "env_var" => Some(Tag::EnvVar),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Tag::Include => "!include",
            Tag::IncludeDirMergeList => "!include_dir_merge_list",
            Tag::Secret => "!secret",
            Tag::EnvVar => "!env_var",
        }
    }
}

/// Loads YAML files from a config directory, expanding custom tags
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being expanded, outermost first
    stack: Vec<PathBuf>,
}

impl YamlLoader {
    /// Loader for `config_dir`, reading `secrets.yaml` from it
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            stack: Vec::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Read and expand one file; relative paths resolve against the config dir
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = absolutize(&self.config_dir, path.as_ref());
        if self.stack.contains(&path) {
            return Err(ConfigError::IncludeCycle { path });
        }
        debug!(path = %path.display(), depth = self.stack.len(), "Loading YAML");

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        self.stack.push(path.clone());
        let result = self.load_str(&content, &path);
        self.stack.pop();
        result
    }

    /// Parse and expand YAML text as if it were read from `origin`
    pub fn load_str(&mut self, content: &str, origin: &Path) -> ConfigResult<Value> {
        // An empty file is an empty document, not an error
        if content.trim().is_empty() {
            return Ok(Value::Null);
        }
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
            path: origin.to_path_buf(),
            source,
        })?;
        let base = origin
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config_dir.clone());
        self.expand(value, &base)
    }

    fn expand(&mut self, value: Value, base: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.expand_tagged(*tagged, base),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.expand(item, base))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            Value::Mapping(map) => {
                let mut expanded = Mapping::with_capacity(map.len());
                for (key, value) in map {
                    expanded.insert(key, self.expand(value, base)?);
                }
                Ok(Value::Mapping(expanded))
            }
            scalar => Ok(scalar),
        }
    }

    fn expand_tagged(&mut self, tagged: TaggedValue, base: &Path) -> ConfigResult<Value> {
        let Some(tag) = Tag::parse(&tagged.tag.to_string()) else {
            warn!(tag = %tagged.tag, "Unknown YAML tag, keeping untagged value");
            return self.expand(tagged.value, base);
        };
        let Value::String(argument) = tagged.value else {
            return Err(ConfigError::TagArgument {
                tag: tag.name().to_string(),
            });
        };
        trace!(tag = tag.name(), argument = %argument, "Expanding tag");

        match tag {
            Tag::Include => self.load_file(absolutize(base, Path::new(&argument))),
            Tag::IncludeDirMergeList => {
                self.merge_list_dir(&absolutize(base, Path::new(&argument)))
            }
            Tag::Secret => Ok(Value::String(self.secrets.get(&argument)?.to_string())),
            Tag::EnvVar => std::env::var(&argument)
                .map(Value::String)
                .map_err(|_| ConfigError::MissingEnvVar { name: argument }),
        }
    }

    /// Concatenate every YAML file in `dir`, in file name order
    ///
    /// A file holding a single mapping contributes that mapping as one item.
    fn merge_list_dir(&mut self, dir: &Path) -> ConfigResult<Value> {
        if !dir.is_dir() {
            return Err(ConfigError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }
        let entries = fs::read_dir(dir).map_err(|source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml")
                    )
            })
            .collect();
        files.sort();

        let mut merged = Vec::new();
        for file in files {
            match self.load_file(&file)? {
                Value::Sequence(items) => merged.extend(items),
                Value::Null => {}
                other => merged.push(other),
            }
        }
        debug!(dir = %dir.display(), items = merged.len(), "Merged YAML directory");
        Ok(Value::Sequence(merged))
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load `file` from `config_dir` with tag expansion
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
