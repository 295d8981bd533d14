use crate::transaction::Transaction;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// Sentinel returned when two transactions are equivalent.
pub const NO_CHANGES: &str = "No changes";

/// Rendered value for an integration key that was dropped from an app.
const UNSET: &str = "(unset)";

/// Human-readable difference between the applied and the proposed
/// [`Transaction`].
///
/// `NoChanges` is a distinct outcome, not an empty `Changes` list; it renders
/// and serializes as the literal [`NO_CHANGES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigDiff {
    NoChanges,
    Changes(Vec<String>),
}

impl ConfigDiff {
    pub fn has_changes(&self) -> bool {
        matches!(self, ConfigDiff::Changes(_))
    }

    /// The individual change lines; empty for `NoChanges`.
    pub fn changes(&self) -> &[String] {
        match self {
            ConfigDiff::NoChanges => &[],
            ConfigDiff::Changes(lines) => lines,
        }
    }

    /// Lines as shown to an operator: either the change lines or the single
    /// sentinel line.
    pub fn lines(&self) -> Vec<String> {
        match self {
            ConfigDiff::NoChanges => vec![NO_CHANGES.to_owned()],
            ConfigDiff::Changes(lines) => lines.clone(),
        }
    }
}

impl fmt::Display for ConfigDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigDiff::NoChanges => f.write_str(NO_CHANGES),
            ConfigDiff::Changes(lines) => f.write_str(&lines.join("\n")),
        }
    }
}

impl Serialize for ConfigDiff {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigDiff::NoChanges => serializer.serialize_str(NO_CHANGES),
            ConfigDiff::Changes(lines) => lines.serialize(serializer),
        }
    }
}

/// Compare the last-applied transaction with a proposed one.
///
/// Every app in the union of both sides is visited in name order:
/// - enabled only in `proposed` → `Install <name>`
/// - enabled only in `current` → `Remove <name>` (disabling reads as removal)
/// - enabled in both → one `Configure <name>.<key> = <value>` per changed
///   integration key
pub fn diff_transactions(current: &Transaction, proposed: &Transaction) -> ConfigDiff {
    let names: BTreeSet<&str> = current.names().chain(proposed.names()).collect();
    let mut lines = Vec::new();

    for name in names {
        let was_on = current.is_enabled(name);
        let is_on = proposed.is_enabled(name);

        match (was_on, is_on) {
            (false, true) => lines.push(format!("Install {name}")),
            (true, false) => lines.push(format!("Remove {name}")),
            (true, true) => {
                let (Some(before), Some(after)) = (current.get(name), proposed.get(name)) else {
                    continue;
                };
                let keys: BTreeSet<&String> = before
                    .integrations
                    .keys()
                    .chain(after.integrations.keys())
                    .collect();
                for key in keys {
                    let old = before.integrations.get(key);
                    let new = after.integrations.get(key);
                    if old != new {
                        let value = new.map_or(UNSET, String::as_str);
                        lines.push(format!("Configure {name}.{key} = {value}"));
                    }
                }
            }
            (false, false) => {}
        }
    }

    if lines.is_empty() {
        ConfigDiff::NoChanges
    } else {
        ConfigDiff::Changes(lines)
    }
}
