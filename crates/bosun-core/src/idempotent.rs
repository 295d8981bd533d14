//! Read-then-conditionally-write planning for third-party resources.
//!
//! Configurators list what an upstream API already has, then ask
//! [`plan_resource`] what to do with the resource they want. Matching is by a
//! stable natural key (a name, a URL), never by position or generated id.

use crate::hooks::HookError;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Bring a differing resource in line with the desired one.
    Update,
    /// Report a differing resource as a conflict for the operator.
    FailOnConflict,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResourceAction<'a, T> {
    Create,
    /// Already present and equivalent.
    Skip(&'a T),
    /// Present with different settings; carries the existing resource.
    Update(&'a T),
}

pub fn plan_resource<'a, T, K>(
    app: &str,
    kind: &str,
    existing: &'a [T],
    desired: &T,
    key: impl Fn(&T) -> K,
    same: impl Fn(&T, &T) -> bool,
    policy: ConflictPolicy,
) -> Result<ResourceAction<'a, T>, HookError>
where
    K: PartialEq + Display,
{
    let wanted = key(desired);
    let Some(found) = existing.iter().find(|e| key(e) == wanted) else {
        return Ok(ResourceAction::Create);
    };
    if same(found, desired) {
        return Ok(ResourceAction::Skip(found));
    }
    match policy {
        ConflictPolicy::Update => Ok(ResourceAction::Update(found)),
        ConflictPolicy::FailOnConflict => Err(HookError::Conflict {
            app: app.to_owned(),
            kind: kind.to_owned(),
            key: wanted.to_string(),
            detail: "existing settings differ from the desired ones".to_owned(),
        }),
    }
}
