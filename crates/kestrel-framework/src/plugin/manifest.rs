//! Plugin manifests.
//!
//! A file-backed plugin is a TOML document describing the command and naming
//! the compiled-in handler kind that serves it:
//!
//! ```toml
//! name = "ping"
//! aliases = ["p"]
//! category = "utility"
//! handler = "reply"
//! reply = "pong, {push_name}!"
//!
//! [dependencies]
//! kestrel = "^0.1"
//!
//! [config]
//! anything = "handed to the handler"
//! ```
//!
//! Every field is optional. Missing values fall back to the file stem for the
//! name, `1.0.0` for the version and the name itself for the handler kind.

use std::collections::BTreeMap;
use std::path::Path;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PluginError, PluginResult};

/// Declarative description of one plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: Version,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub owner_only: bool,
    #[serde(default)]
    pub premium_only: bool,
    /// Handler kind looked up in the [`HandlerCatalog`](crate::HandlerCatalog).
    #[serde(default)]
    pub handler: String,
    /// Template text for the `reply` handler kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, VersionReq>,
    #[serde(default = "empty_object")]
    pub config: Value,
}

fn default_version() -> Version {
    Version::new(1, 0, 0)
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl PluginManifest {
    /// A manifest for a code-defined plugin, with defaults applied.
    pub fn new(name: impl Into<String>) -> Self {
        let mut manifest = Self {
            name: name.into(),
            version: default_version(),
            description: String::new(),
            author: String::new(),
            aliases: Vec::new(),
            category: String::new(),
            owner_only: false,
            premium_only: false,
            handler: String::new(),
            reply: None,
            dependencies: BTreeMap::new(),
            config: empty_object(),
        };
        manifest.apply_defaults("");
        manifest
    }

    /// Parses manifest text read from `path`.
    ///
    /// Applies defaults (the file stem becomes the name when none is given)
    /// and validates the result.
    pub fn from_toml_str(text: &str, path: &Path) -> PluginResult<Self> {
        let mut manifest: Self = toml::from_str(text).map_err(|source| PluginError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        manifest.apply_defaults(stem);
        manifest.validate(path)?;
        Ok(manifest)
    }

    /// Fills in missing optional metadata and normalises aliases.
    pub fn apply_defaults(&mut self, stem: &str) {
        self.name = self.name.trim().to_lowercase();
        if self.name.is_empty() {
            self.name = stem.trim().to_lowercase();
        }
        if self.description.trim().is_empty() {
            self.description = format!("{} plugin", self.name);
        }
        if self.author.trim().is_empty() {
            self.author = "Unknown".to_string();
        }
        if self.category.trim().is_empty() {
            self.category = "general".to_string();
        }
        if self.handler.trim().is_empty() {
            self.handler = self.name.clone();
        }
        if !self.config.is_object() {
            self.config = empty_object();
        }

        let mut aliases: Vec<String> = Vec::with_capacity(self.aliases.len());
        for alias in self.aliases.drain(..) {
            let alias = alias.trim().to_lowercase();
            if !alias.is_empty() && alias != self.name && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        self.aliases = aliases;
    }

    /// Checks the name against `[a-z0-9_-]+`.
    pub fn validate(&self, path: &Path) -> PluginResult<()> {
        if self.name.is_empty() {
            return Err(PluginError::invalid_manifest(path, "missing plugin name"));
        }
        if !is_valid_name(&self.name) {
            return Err(PluginError::InvalidName(self.name.clone()));
        }
        if let Some(bad) = self.aliases.iter().find(|a| a.chars().any(char::is_whitespace)) {
            return Err(PluginError::invalid_manifest(
                path,
                format!("alias '{bad}' contains whitespace"),
            ));
        }
        Ok(())
    }

    /// Renders the manifest back to TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    // ─── Builder helpers for code-defined plugins ────────────────────────────

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self.apply_defaults("");
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, req: VersionReq) -> Self {
        self.dependencies.insert(name.into(), req);
        self
    }

    pub fn owner_only(mut self) -> Self {
        self.owner_only = true;
        self
    }

    pub fn premium_only(mut self) -> Self {
        self.premium_only = true;
        self
    }
}

/// Whether `name` is a legal plugin name: lowercase `[a-z0-9_-]+`.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("plugins/{name}.toml"))
    }

    #[test]
    fn empty_manifest_takes_defaults_from_stem() {
        let m = PluginManifest::from_toml_str("", &path("Ping")).unwrap();
        assert_eq!(m.name, "ping");
        assert_eq!(m.version, Version::new(1, 0, 0));
        assert_eq!(m.description, "ping plugin");
        assert_eq!(m.author, "Unknown");
        assert_eq!(m.category, "general");
        assert_eq!(m.handler, "ping");
        assert!(m.config.as_object().unwrap().is_empty());
    }

    #[test]
    fn full_manifest_parses() {
        let text = r#"
            name = "addprem"
            version = "2.1.0"
            aliases = ["AP", "ap", "addprem", " "]
            owner_only = true
            handler = "reply"
            reply = "done"

            [dependencies]
            kestrel = "^0.1"

            [config]
            days = 30
        "#;
        let m = PluginManifest::from_toml_str(text, &path("whatever")).unwrap();
        assert_eq!(m.name, "addprem");
        assert_eq!(m.aliases, vec!["ap"]);
        assert!(m.owner_only);
        assert_eq!(m.handler, "reply");
        assert!(m.dependencies["kestrel"].matches(&Version::new(0, 1, 5)));
        assert_eq!(m.config["days"], 30);
    }

    #[test]
    fn rejects_bad_names() {
        let err = PluginManifest::from_toml_str(r#"name = "hello world""#, &path("x")).unwrap_err();
        assert!(matches!(err, PluginError::InvalidName(_)));
        assert!(!is_valid_name("Ping"));
        assert!(is_valid_name("add-prem_2"));
    }

    #[test]
    fn reports_parse_errors() {
        let err = PluginManifest::from_toml_str("name = [", &path("x")).unwrap_err();
        assert!(matches!(err, PluginError::Parse { .. }));
    }

    #[test]
    fn renders_back_to_toml() {
        let mut m = PluginManifest::new("greet");
        m.handler = "reply".into();
        m.reply = Some("hello {push_name}".into());
        let text = m.to_toml_string().unwrap();
        let parsed = PluginManifest::from_toml_str(&text, &path("greet")).unwrap();
        assert_eq!(parsed, m);
    }
}
