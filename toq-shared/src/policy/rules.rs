/// Transition rules and their sources
///
/// Rules are read from YAML:
///
/// ```yaml
/// rules:
///   - { role: realtor, from: 4, action: 3, to: 7, notification: 5, priority: 10 }
/// ```
///
/// Every row must reference a valid role slug, status, action and
/// notification kind; a single invalid row aborts the whole load.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::kinds::{ActionFinished, NotificationKind};
use super::PolicyError;
use crate::models::{RoleSlug, RoleStatus};

/// Rules shipped with the crate
pub const DEFAULT_RULES_YAML: &str = include_str!("../../config/transition_rules.yaml");

/// One `(role, from, action) -> (to, notification)` rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRule {
    pub role: RoleSlug,
    pub from: RoleStatus,
    pub action: ActionFinished,
    pub to: RoleStatus,
    pub notification: NotificationKind,
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    role: String,
    from: i64,
    action: i64,
    to: i64,
    #[serde(default)]
    notification: i64,
    #[serde(default)]
    priority: i32,
}

impl RawRule {
    fn into_rule(self, index: usize) -> Result<TransitionRule, PolicyError> {
        let invalid = |reason: String| PolicyError::InvalidRule { index, reason };

        let role: RoleSlug = self.role.parse().map_err(|e| invalid(format!("{}", e)))?;
        let from = RoleStatus::try_from(self.from).map_err(|e| invalid(format!("from: {}", e)))?;
        let to = RoleStatus::try_from(self.to).map_err(|e| invalid(format!("to: {}", e)))?;
        let action = ActionFinished::from_i64(self.action)
            .ok_or_else(|| invalid(format!("unknown action: {}", self.action)))?;
        let notification = NotificationKind::from_i64(self.notification)
            .ok_or_else(|| invalid(format!("unknown notification: {}", self.notification)))?;

        Ok(TransitionRule {
            role,
            from,
            action,
            to,
            notification,
            priority: self.priority,
        })
    }
}

/// Parses a YAML rules document
///
/// # Errors
///
/// - `PolicyError::Parse` for malformed YAML
/// - `PolicyError::InvalidRule` for the first row that fails validation
pub fn parse_rules_yaml(yaml: &str) -> Result<Vec<TransitionRule>, PolicyError> {
    let file: RulesFile =
        serde_yaml::from_str(yaml).map_err(|e| PolicyError::Parse(e.to_string()))?;

    file.rules
        .into_iter()
        .enumerate()
        .map(|(index, raw)| raw.into_rule(index))
        .collect()
}

/// Where rules come from
pub trait RuleSource: Send + Sync {
    /// Reads the full rule set
    fn load(&self) -> Result<Vec<TransitionRule>, PolicyError>;

    /// Human-readable origin for logs
    fn describe(&self) -> String;
}

/// Rules read from a YAML file on every load
#[derive(Debug, Clone)]
pub struct YamlFileSource {
    path: PathBuf,
}

impl YamlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RuleSource for YamlFileSource {
    fn load(&self) -> Result<Vec<TransitionRule>, PolicyError> {
        let yaml = std::fs::read_to_string(&self.path)
            .map_err(|e| PolicyError::Source(format!("{}: {}", self.path.display(), e)))?;
        parse_rules_yaml(&yaml)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Rules held in memory as YAML text
#[derive(Debug, Clone)]
pub struct YamlStrSource {
    yaml: String,
}

impl YamlStrSource {
    pub fn new(yaml: impl Into<String>) -> Self {
        Self { yaml: yaml.into() }
    }

    /// The compiled-in default rules
    pub fn builtin() -> Self {
        Self::new(DEFAULT_RULES_YAML)
    }
}

impl RuleSource for YamlStrSource {
    fn load(&self) -> Result<Vec<TransitionRule>, PolicyError> {
        parse_rules_yaml(&self.yaml)
    }

    fn describe(&self) -> String {
        "inline yaml".to_string()
    }
}
