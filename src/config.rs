use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::model::Side;

/// Absolute and relative acceptance thresholds for one entity kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub absolute: f64,
    pub relative: f64,
}

impl Thresholds {
    pub const fn new(absolute: f64, relative: f64) -> Self {
        Self { absolute, relative }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    pub classes: Thresholds,
    pub methods: Thresholds,
    pub fields: Thresholds,
    pub args: Thresholds,
    pub vars: Thresholds,
    /// Worker threads for auto-match passes; 0 means available parallelism.
    pub threads: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            classes: Thresholds::new(0.8, 0.08),
            methods: Thresholds::new(0.8, 0.08),
            fields: Thresholds::new(0.8, 0.08),
            args: Thresholds::new(0.85, 0.085),
            vars: Thresholds::new(0.85, 0.085),
            threads: 0,
        }
    }
}

/// A regex that must match a whole name, keeping its source for the
/// persisted match file header.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    regex: Regex,
}

impl NamePattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{source})$"))
            .with_context(|| format!("Invalid name pattern: {source}"))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

impl PartialEq for NamePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// Patterns of names known to be stable on one side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamePatterns {
    pub class: Option<NamePattern>,
    pub member: Option<NamePattern>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOptions {
    pub a: NamePatterns,
    pub b: NamePatterns,
    /// Treat an obfuscated name on one side as incompatible with a clear
    /// name on the other.
    pub assume_both_or_none_obfuscated: bool,
}

impl EnvOptions {
    pub fn patterns(&self, side: Side) -> &NamePatterns {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }
}

pub fn resolve_uid_store_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }

    Ok(class_matcher_home()?.join("uids.lmdb"))
}

fn class_matcher_home() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::cache_dir)
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve data directory"))?;
    Ok(base.join("class-matcher"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pattern_requires_full_match() {
        let pattern = NamePattern::new("net/minecraft/.*|[a-z]{3,}").unwrap();
        assert!(pattern.matches("net/minecraft/Foo"));
        assert!(pattern.matches("tick"));
        assert!(!pattern.matches("ab"));
        assert!(!pattern.matches("com/net/minecraft/Foo"));
        assert_eq!(pattern.source(), "net/minecraft/.*|[a-z]{3,}");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = NamePattern::new("(").unwrap_err();
        assert!(err.to_string().contains("Invalid name pattern"));
    }

    #[test]
    fn explicit_uid_store_path_wins() {
        let p = resolve_uid_store_path(Some(Path::new("/tmp/u.lmdb"))).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/u.lmdb"));
    }

    #[test]
    fn default_thresholds() {
        let cfg = MatcherConfig::default();
        assert_eq!(cfg.classes, Thresholds::new(0.8, 0.08));
        assert_eq!(cfg.vars, Thresholds::new(0.85, 0.085));
    }
}
