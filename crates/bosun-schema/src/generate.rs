//! Declarative configuration text generation.
//!
//! The output is a Nix module consumed by the OS configuration layer. It is
//! diffed and version-controlled downstream, so the same [`Transaction`]
//! must always render to the same bytes.

use crate::transaction::Transaction;
use std::fmt::Write;

/// First line of every generated file.
pub const GENERATED_MARKER: &str =
    "# @generated by bosun. Do not edit; changes are overwritten on the next apply.";

const ATTR_ROOT: &str = "bosun.apps";

/// Render the configuration enabling exactly the enabled apps of `tx`.
///
/// Disabled and absent apps produce no output at all. An empty transaction
/// renders a module with an empty attribute set.
pub fn generate_config(tx: &Transaction) -> String {
    let mut out = String::new();
    out.push_str(GENERATED_MARKER);
    out.push('\n');
    out.push_str("{ ... }:\n\n{\n");

    for (name, intent) in tx.enabled_apps() {
        let app_attr = nix_attr(name);
        let _ = writeln!(out, "  {ATTR_ROOT}.{app_attr}.enable = true;");
        for (key, provider) in &intent.integrations {
            let _ = writeln!(
                out,
                "  {ATTR_ROOT}.{app_attr}.integrations.{} = {};",
                nix_attr(key),
                nix_string(provider)
            );
        }
    }

    out.push_str("}\n");
    out
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '\''))
}

fn nix_attr(s: &str) -> String {
    if is_plain_identifier(s) {
        s.to_owned()
    } else {
        nix_string(s)
    }
}

fn nix_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}
