//! Engine configuration.
//!
//! # Responsibility
//! - Hold the policy knobs and limits read by services and the bulk
//!   coordinator.
//! - Load them from TOML, with every field optional.
//!
//! # Invariants
//! - Defaults are safe: conflicting restores fail, detached subtrees keep
//!   their mover as admin, batches and copies are bounded.

use crate::db::RetryPolicy;
use crate::model::membership::PermissionLevel;
use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// What restore does when the original parent is missing or recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreFallback {
    /// Reject with `ParentUnavailable`.
    #[default]
    Fail,
    /// Restore the subtree as a new root.
    Root,
}

/// What move does when the subtree would have no reachable admin at its
/// new location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachedAdminPolicy {
    /// Grant the acting account admin on the moved root.
    #[default]
    GrantActor,
    /// Reject with `CannotRemoveLastAdmin`.
    Reject,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Public chains grant implicit read to every actor.
    pub public_read: bool,
    /// Report "no access" as `NotFound` instead of `Forbidden`.
    pub hide_existence: bool,
    /// Level required on the destination parent of a move.
    pub move_parent_level: PermissionLevel,
    /// Level required on the destination parent of a copy.
    pub copy_parent_level: PermissionLevel,
    pub restore_fallback: RestoreFallback,
    pub detached_admin: DetachedAdminPolicy,
    /// Maximum number of segments in any item path.
    pub max_tree_depth: usize,
    /// Maximum number of descendants a copy may duplicate.
    pub max_descendants_for_copy: usize,
    /// Maximum number of targets in one bulk submission.
    pub max_batch_size: usize,
    /// Per-item transaction retry policy.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            public_read: true,
            hide_existence: false,
            move_parent_level: PermissionLevel::Admin,
            copy_parent_level: PermissionLevel::Write,
            restore_fallback: RestoreFallback::Fail,
            detached_admin: DetachedAdminPolicy::GrantActor,
            max_tree_depth: 15,
            max_descendants_for_copy: 10_000,
            max_batch_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Errors from configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// TOML syntax or type mismatch.
    Parse(toml::de::Error),
    /// Well-formed but unusable value.
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid engine config: {err}"),
            Self::Invalid(message) => write!(f, "invalid engine config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value)
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects limits that would make every operation fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tree_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_tree_depth must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
