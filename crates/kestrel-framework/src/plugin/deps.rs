//! Dependency resolution for plugin manifests.
//!
//! A declared dependency is satisfied by a loaded plugin of that name whose
//! version matches the range, or else by a host capability.

use std::collections::BTreeMap;

use semver::Version;

use super::manifest::PluginManifest;
use crate::error::{PluginError, PluginResult};

/// Named versions the host provides to plugins.
///
/// Always contains `kestrel` at the framework's own version.
#[derive(Debug, Clone)]
pub struct Capabilities {
    provided: BTreeMap<String, Version>,
}

impl Default for Capabilities {
    fn default() -> Self {
        let own = Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(Version::new(0, 1, 0));
        let mut provided = BTreeMap::new();
        provided.insert("kestrel".to_string(), own);
        Self { provided }
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn provide(mut self, name: impl Into<String>, version: Version) -> Self {
        self.provided.insert(name.into(), version);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Version> {
        self.provided.get(name)
    }
}

/// Checks every dependency of `manifest`.
///
/// `loaded` looks up the version of a currently loaded plugin.
pub fn check_dependencies<F>(
    manifest: &PluginManifest,
    capabilities: &Capabilities,
    loaded: F,
) -> PluginResult<()>
where
    F: Fn(&str) -> Option<Version>,
{
    for (dependency, requirement) in &manifest.dependencies {
        let found = loaded(dependency).or_else(|| capabilities.get(dependency).cloned());
        match found {
            Some(version) if requirement.matches(&version) => {}
            other => {
                return Err(PluginError::UnsatisfiedDependency {
                    plugin: manifest.name.clone(),
                    dependency: dependency.clone(),
                    requirement: requirement.to_string(),
                    found: other.map(|v| v.to_string()),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use semver::VersionReq;

    use super::*;

    fn manifest_with(dep: &str, req: &str) -> PluginManifest {
        PluginManifest::new("child").with_dependency(dep, VersionReq::parse(req).unwrap())
    }

    #[test]
    fn satisfied_by_loaded_plugin() {
        let m = manifest_with("base", "^1.2");
        let result = check_dependencies(&m, &Capabilities::new(), |name| {
            (name == "base").then(|| Version::new(1, 4, 0))
        });
        assert!(result.is_ok());
    }

    #[test]
    fn satisfied_by_capability() {
        let m = manifest_with("storage", ">=2");
        let caps = Capabilities::new().provide("storage", Version::new(2, 0, 1));
        assert!(check_dependencies(&m, &caps, |_| None).is_ok());

        let host = manifest_with("kestrel", "*");
        assert!(check_dependencies(&host, &Capabilities::new(), |_| None).is_ok());
    }

    #[test]
    fn reports_missing_and_mismatched() {
        let m = manifest_with("base", "^2");
        let err = check_dependencies(&m, &Capabilities::new(), |_| None).unwrap_err();
        assert!(matches!(err, PluginError::UnsatisfiedDependency { found: None, .. }));

        let err = check_dependencies(&m, &Capabilities::new(), |_| Some(Version::new(1, 0, 0)))
            .unwrap_err();
        assert!(err.is_dependency_error());
        assert!(err.to_string().contains("found 1.0.0"));
    }
}
