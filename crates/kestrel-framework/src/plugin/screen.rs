//! Static safety screen applied to plugin source text before loading.

use std::path::Path;

use regex::Regex;

use crate::error::{PluginError, PluginResult};

/// Patterns rejected by default: process spawning, dynamic evaluation,
/// process exit and file deletion.
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r#"require\s*\(\s*['"]child_process['"]\s*\)"#,
    r"\bchild_process\b",
    r"\beval\s*\(",
    r"\bnew\s+Function\s*\(",
    r"\bprocess\.exit\s*\(",
    r"\bfs\.(unlink|rm|rmdir)(Sync)?\s*\(",
    r"\bstd::process::(Command|exit)\b",
    r"\brm\s+-rf\b",
];

#[derive(Debug, Clone)]
pub struct SafetyScreen {
    enabled: bool,
    patterns: Vec<Regex>,
}

impl Default for SafetyScreen {
    fn default() -> Self {
        Self {
            enabled: true,
            patterns: DEFAULT_DENY_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect(),
        }
    }
}

impl SafetyScreen {
    /// A screen that accepts everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            patterns: Vec::new(),
        }
    }

    /// The default patterns plus `extra`.
    pub fn with_patterns<I, S>(extra: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut screen = Self::default();
        for pattern in extra {
            screen.patterns.push(Regex::new(pattern.as_ref())?);
        }
        Ok(screen)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rejects `source` if any deny pattern matches.
    pub fn check(&self, path: &Path, source: &str) -> PluginResult<()> {
        if !self.enabled {
            return Ok(());
        }
        match self.patterns.iter().find(|re| re.is_match(source)) {
            Some(re) => Err(PluginError::SecurityViolation {
                path: path.to_path_buf(),
                pattern: re.as_str().to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_patterns_compile() {
        assert_eq!(
            SafetyScreen::default().patterns.len(),
            DEFAULT_DENY_PATTERNS.len()
        );
    }

    #[test]
    fn flags_process_control() {
        let screen = SafetyScreen::default();
        let path = Path::new("evil.toml");
        assert!(screen.check(path, r#"reply = "x" # require('child_process')"#).is_err());
        assert!(screen.check(path, "reply = \"eval(1)\"").is_err());
        assert!(screen.check(path, "reply = \"process.exit(0)\"").is_err());
        assert!(screen.check(path, "reply = \"evaluate this\"").is_ok());
    }

    #[test]
    fn disabled_screen_accepts_anything() {
        let screen = SafetyScreen::disabled();
        assert!(screen.check(Path::new("x"), "eval(1)").is_ok());
    }

    #[test]
    fn extra_patterns_are_applied() {
        let screen = SafetyScreen::with_patterns(["forbidden"]).unwrap();
        let err = screen.check(Path::new("x"), "a forbidden word").unwrap_err();
        assert!(matches!(err, PluginError::SecurityViolation { pattern, .. } if pattern == "forbidden"));
        assert!(SafetyScreen::with_patterns(["("]).is_err());
    }
}
