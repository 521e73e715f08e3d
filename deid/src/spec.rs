//! Parameter files declaring what to do with each field.
//!
//! The text format has one rule per line:
//!
//! ```text
//! # comments and lines without `>` are ignored
//! 0x80005          > delete
//! 0x82112/0x81150  > hash, archive
//! 0x180022         > hash:qrklejwrlke, archive
//! 0x100010         > archive, replace:anonymous
//! ```
//!
//! Parameter files with a `.json` extension are read as a JSON object
//! mapping each key to an action or a list of actions.
//!
//! Regardless of the order in which they are written,
//! the actions of a rule are applied in a fixed order:
//! archive, hash, replace, delete.
use crate::error::{Error, InvalidJsonRuleSnafu, ParseJsonSpecSnafu, ReadSpecSnafu, Result};
use crate::tree::TagPath;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::warn;

/// An action to apply to a field.
///
/// The variant order is the order of application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Action {
    /// Record the current value in the archive log
    Archive,
    /// Replace the value with its salted hash
    Hash,
    /// Replace the value with a fixed string
    Replace,
    /// Remove the field
    Delete,
}

impl Action {
    fn from_name(name: &str) -> Option<Action> {
        match name {
            "archive" => Some(Action::Archive),
            "hash" => Some(Action::Hash),
            "replace" => Some(Action::Replace),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Archive => "archive",
            Action::Hash => "hash",
            Action::Replace => "replace",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The salt of a hash action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashSalt {
    /// The run's default salt
    Default,
    /// A salt given in the parameter file
    Explicit(String),
}

impl HashSalt {
    /// Interpret the parameter of a hash action.
    /// An empty parameter or `random` selects the default salt.
    pub fn from_param(param: &str) -> Self {
        match param {
            "" | "random" => HashSalt::Default,
            salt => HashSalt::Explicit(salt.to_string()),
        }
    }

    /// The salt to hash with, given the run's default salt.
    pub fn resolve<'a>(&'a self, default: &'a str) -> &'a str {
        match self {
            HashSalt::Default => default,
            HashSalt::Explicit(salt) => salt,
        }
    }
}

/// The actions declared for one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    key: String,
    path: TagPath,
    actions: Vec<Action>,
}

impl Rule {
    /// The key as written in the parameter file.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &TagPath {
        &self.path
    }

    /// The actions in order of application.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }
}

/// A parsed parameter file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformSpec {
    rules: Vec<Rule>,
    replace_map: HashMap<String, String>,
    hasher_map: HashMap<String, HashSalt>,
}

impl TransformSpec {
    /// Parse a parameter file in the line-based text format.
    pub fn parse_str(text: &str) -> Result<Self> {
        let mut spec = TransformSpec::default();
        for (i, line) in text.lines().enumerate() {
            let line_number = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, actions)) = line.split_once('>') else {
                continue;
            };
            let key = key.trim();
            let index = spec.rule_index(key, line_number)?;

            for token in actions.split(',').map(str::trim) {
                if token.is_empty() {
                    continue;
                }
                // only the action name decides, parameters may contain anything
                let (name, param) = match token.split_once(':') {
                    Some((name, param)) => (name.trim(), Some(param.trim())),
                    None => (token, None),
                };
                let action = match (Action::from_name(name), param) {
                    (Some(Action::Hash), param) => {
                        let salt = match param {
                            Some(salt) if !salt.contains(':') => HashSalt::from_param(salt),
                            Some(_) => {
                                warn!(
                                    "Too many salt parameters for {}, using the default salt [line {}: {}]",
                                    key, line_number, token
                                );
                                HashSalt::Default
                            }
                            None => HashSalt::Default,
                        };
                        spec.hasher_map.insert(key.to_string(), salt);
                        Action::Hash
                    }
                    (Some(Action::Replace), Some(replacement)) if !replacement.contains(':') => {
                        spec.replace_map
                            .insert(key.to_string(), replacement.to_string());
                        Action::Replace
                    }
                    (Some(Action::Replace), _) => {
                        warn!(
                            "No replacement specified, skipping replacement [line {}: {}]",
                            line_number, token
                        );
                        continue;
                    }
                    (Some(action), None) => action,
                    _ => {
                        warn!(
                            "Unrecognized action `{}` for {}, skipping [line {}]",
                            token, key, line_number
                        );
                        continue;
                    }
                };
                spec.rules[index].actions.push(action);
            }
        }
        Ok(spec.canonicalize())
    }

    /// Build a spec from a JSON document,
    /// an object mapping each key to an action or a list of actions.
    pub fn from_json(document: &Value) -> Result<Self> {
        let Some(entries) = document.as_object() else {
            return InvalidJsonRuleSnafu {
                key: "<document>",
                message: "expected an object of tag paths to actions",
            }
            .fail();
        };

        let mut spec = TransformSpec::default();
        for (key, value) in entries {
            let tokens: Vec<&str> = match value {
                Value::String(token) => vec![token.as_str()],
                Value::Array(items) => items
                    .iter()
                    .map(|item| {
                        item.as_str().context(InvalidJsonRuleSnafu {
                            key,
                            message: "actions must be strings",
                        })
                    })
                    .collect::<Result<_>>()?,
                _ => {
                    return InvalidJsonRuleSnafu {
                        key,
                        message: "expected an action or a list of actions",
                    }
                    .fail()
                }
            };

            let path = key
                .parse::<TagPath>()
                .map_err(|_| Error::InvalidJsonRule {
                    key: key.clone(),
                    message: "invalid tag path".to_string(),
                })?;
            let mut actions = Vec::with_capacity(tokens.len());
            for token in tokens {
                let action = spec.resolve_json_action(key, token.trim())?;
                actions.push(action);
            }
            spec.rules.push(Rule {
                key: key.clone(),
                path,
                actions,
            });
        }
        Ok(spec.canonicalize())
    }

    fn resolve_json_action(&mut self, key: &str, token: &str) -> Result<Action> {
        let (name, param) = match token.split_once(':') {
            Some((name, param)) => (name, Some(param)),
            None => (token, None),
        };
        match (name, param) {
            ("archive", None) => Ok(Action::Archive),
            ("delete", None) => Ok(Action::Delete),
            ("hash", salt) => {
                self.hasher_map.insert(
                    key.to_string(),
                    HashSalt::from_param(salt.unwrap_or_default()),
                );
                Ok(Action::Hash)
            }
            ("replace", Some(replacement)) => {
                self.replace_map
                    .insert(key.to_string(), replacement.to_string());
                Ok(Action::Replace)
            }
            _ => InvalidJsonRuleSnafu {
                key,
                message: format!("`{}` is not a valid action", token),
            }
            .fail(),
        }
    }

    /// Find or create the rule for a key.
    fn rule_index(&mut self, key: &str, line: usize) -> Result<usize> {
        if let Some(index) = self.rules.iter().position(|rule| rule.key == key) {
            warn!(
                "Actions for tag {} specified more than once [line: {}]",
                key, line
            );
            return Ok(index);
        }
        let path = key.parse::<TagPath>().map_err(|_| Error::InvalidRule {
            line,
            message: format!("invalid tag path `{}`", key),
        })?;
        self.rules.push(Rule {
            key: key.to_string(),
            path,
            actions: Vec::new(),
        });
        Ok(self.rules.len() - 1)
    }

    /// Put every rule's actions in the order of application,
    /// without duplicates.
    fn canonicalize(mut self) -> Self {
        for rule in &mut self.rules {
            rule.actions.sort();
            rule.actions.dedup();
        }
        self
    }

    /// The rules in the order in which they were declared.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The actions declared for a key, in order of application.
    pub fn actions(&self, key: &str) -> Option<&[Action]> {
        self.rules
            .iter()
            .find(|rule| rule.key == key)
            .map(Rule::actions)
    }

    /// The replacement value declared for a key.
    pub fn replacement(&self, key: &str) -> Option<&str> {
        self.replace_map.get(key).map(String::as_str)
    }

    /// The hash salt declared for a key.
    pub fn salt(&self, key: &str) -> &HashSalt {
        self.hasher_map.get(key).unwrap_or(&HashSalt::Default)
    }
}

/// Read a parameter file in the line-based text format.
pub fn parse_spec(path: &Path) -> Result<TransformSpec> {
    let text = std::fs::read_to_string(path).context(ReadSpecSnafu { path })?;
    TransformSpec::parse_str(&text)
}

/// Read a parameter file in the JSON format.
pub fn parse_json_spec(path: &Path) -> Result<TransformSpec> {
    let text = std::fs::read_to_string(path).context(ReadSpecSnafu { path })?;
    let document: Value = serde_json::from_str(&text).context(ParseJsonSpecSnafu { path })?;
    TransformSpec::from_json(&document)
}

/// Read a parameter file,
/// in the JSON format if its name ends with `.json`,
/// in the text format otherwise.
pub fn load_spec(path: &Path) -> Result<TransformSpec> {
    let is_json = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json_spec(path)
    } else {
        parse_spec(path)
    }
}
