//! RFC 6902 patches against a user's profile or configuration files.
//!
//! Patches are validated in full (shape, then whitelist) before any operation runs,
//! then applied to a working copy. The caller only ever sees the new mapping or an
//! error; the input mapping is never modified.

use std::collections::BTreeMap;

use json_patch::{Patch, PatchOperation};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Parse(String),
    #[error("configuration key not allowed: {0}")]
    DisallowedKey(String),
    #[error("patch could not be applied: {0}")]
    Apply(String),
    #[error("patch must leave a JSON object at the document root")]
    NotAMapping,
    #[error("configuration {0} must be a string")]
    NonStringValue(String),
    #[error("configuration {file} exceeds {limit} bytes")]
    TooLarge { file: String, limit: usize },
}

/// Parse a fully buffered request body as a JSON Patch document.
pub fn parse_patch(body: &[u8]) -> Result<Patch, PatchError> {
    serde_json::from_slice::<Patch>(body).map_err(|e| PatchError::Parse(e.to_string()))
}

fn op_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(o) => o.path.as_str(),
        PatchOperation::Remove(o) => o.path.as_str(),
        PatchOperation::Replace(o) => o.path.as_str(),
        PatchOperation::Move(o) => o.path.as_str(),
        PatchOperation::Copy(o) => o.path.as_str(),
        PatchOperation::Test(o) => o.path.as_str(),
    }
}

/// First reference token of a JSON pointer, unescaped. The root pointer yields "".
pub fn top_level_key(pointer: &str) -> String {
    let rest = pointer.strip_prefix('/').unwrap_or("");
    let token = rest.split('/').next().unwrap_or("");
    token.replace("~1", "/").replace("~0", "~")
}

/// First operation whose top-level key is outside `whitelist`.
fn first_disallowed(patch: &Patch, whitelist: &[&str]) -> Option<String> {
    patch
        .0
        .iter()
        .map(|op| top_level_key(op_path(op)))
        .find(|key| !whitelist.contains(&key.as_str()))
}

/// Apply `patch` to a copy of `target`. With a whitelist, every operation's top-level
/// key must be listed or the whole batch is rejected naming the first offender.
pub fn apply_patch(
    target: &Map<String, Value>,
    whitelist: Option<&[&str]>,
    patch: &Patch,
) -> Result<Map<String, Value>, PatchError> {
    if let Some(allowed) = whitelist {
        if let Some(key) = first_disallowed(patch, allowed) {
            return Err(PatchError::DisallowedKey(key));
        }
    }
    let mut working = Value::Object(target.clone());
    json_patch::patch(&mut working, &patch.0).map_err(|e| PatchError::Apply(e.to_string()))?;
    match working {
        Value::Object(map) => Ok(map),
        _ => Err(PatchError::NotAMapping),
    }
}

/// Patch a configuration-file set. Keys are checked against `whitelist` and every
/// resulting value must be a string (file content) of at most `max_bytes`.
pub fn apply_to_configurations(
    configurations: &BTreeMap<String, String>,
    whitelist: &[&str],
    max_bytes: usize,
    patch: &Patch,
) -> Result<BTreeMap<String, String>, PatchError> {
    let as_map: Map<String, Value> = configurations
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let patched = apply_patch(&as_map, Some(whitelist), patch)?;
    patched
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) if s.len() > max_bytes => Err(PatchError::TooLarge { file: k, limit: max_bytes }),
            Value::String(s) => Ok((k, s)),
            _ => Err(PatchError::NonStringValue(k)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const WHITELIST: &[&str] = &[".bashrc", ".vimrc", ".gitconfig"];
    const MAX: usize = 1024;

    fn patch(v: Value) -> Patch {
        parse_patch(v.to_string().as_bytes()).unwrap()
    }

    fn configs() -> BTreeMap<String, String> {
        BTreeMap::from([
            (".bashrc".to_string(), "alias ll='ls -l'\n".to_string()),
            (".vimrc".to_string(), "set nu\n".to_string()),
        ])
    }

    #[test]
    fn parse_errors_are_classified() {
        assert!(matches!(parse_patch(b"{not json"), Err(PatchError::Parse(_))));
        assert!(matches!(parse_patch(br#"{"op":"add"}"#), Err(PatchError::Parse(_))));
        assert!(matches!(parse_patch(br#"[{"op":"frobnicate","path":"/a"}]"#), Err(PatchError::Parse(_))));
        assert!(parse_patch(b"[]").is_ok());
    }

    #[test]
    fn top_level_key_unescapes() {
        assert_eq!(top_level_key("/.bashrc"), ".bashrc");
        assert_eq!(top_level_key("/a~1b/c"), "a/b");
        assert_eq!(top_level_key("/a~0b"), "a~b");
        assert_eq!(top_level_key(""), "");
    }

    #[test]
    fn profile_patch_without_whitelist() {
        let mut profile = Map::new();
        profile.insert("name".into(), json!("Ada"));
        let out = apply_patch(
            &profile,
            None,
            &patch(json!([
                {"op": "replace", "path": "/name", "value": "Ada L."},
                {"op": "add", "path": "/editor", "value": {"theme": "dark"}}
            ])),
        )
        .unwrap();
        assert_eq!(Value::Object(out), json!({"name": "Ada L.", "editor": {"theme": "dark"}}));
        // input untouched
        assert_eq!(profile.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn disallowed_key_rejects_whole_batch() {
        let before = configs();
        let err = apply_to_configurations(
            &before,
            WHITELIST,
            MAX,
            &patch(json!([
                {"op": "replace", "path": "/.bashrc", "value": "echo hi\n"},
                {"op": "add", "path": "/.ssh~1authorized_keys", "value": "ssh-rsa AAAA"},
                {"op": "add", "path": "/.profile", "value": "x"}
            ])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::DisallowedKey(".ssh/authorized_keys".into()));
        assert_eq!(before, configs());
    }

    #[test]
    fn failing_operation_has_no_partial_effect() {
        let err = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([
                {"op": "replace", "path": "/.bashrc", "value": "changed"},
                {"op": "remove", "path": "/.gitconfig"}
            ])),
        )
        .unwrap_err();
        assert!(matches!(err, PatchError::Apply(_)));
    }

    #[test]
    fn configuration_values_must_be_strings() {
        let err = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([{"op": "replace", "path": "/.vimrc", "value": 42}])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::NonStringValue(".vimrc".into()));
    }

    #[test]
    fn oversized_content_is_rejected() {
        let err = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([{"op": "replace", "path": "/.vimrc", "value": "x".repeat(MAX + 1)}])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::TooLarge { file: ".vimrc".into(), limit: MAX });
        let ok = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([{"op": "replace", "path": "/.vimrc", "value": "x".repeat(MAX)}])),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn root_replacement_is_outside_whitelist() {
        let err = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([{"op": "replace", "path": "", "value": {}}])),
        )
        .unwrap_err();
        assert_eq!(err, PatchError::DisallowedKey(String::new()));
    }

    #[test]
    fn profile_root_must_stay_an_object() {
        let err = apply_patch(&Map::new(), None, &patch(json!([{"op": "replace", "path": "", "value": [1, 2]}])))
            .unwrap_err();
        assert_eq!(err, PatchError::NotAMapping);
    }

    #[test]
    fn whitelisted_edit_succeeds() {
        let out = apply_to_configurations(
            &configs(),
            WHITELIST,
            MAX,
            &patch(json!([
                {"op": "add", "path": "/.gitconfig", "value": "[user]\n\tname = Ada\n"},
                {"op": "remove", "path": "/.vimrc"}
            ])),
        )
        .unwrap();
        assert_eq!(out.get(".gitconfig").map(String::as_str), Some("[user]\n\tname = Ada\n"));
        assert!(!out.contains_key(".vimrc"));
        assert!(out.contains_key(".bashrc"));
    }
}
