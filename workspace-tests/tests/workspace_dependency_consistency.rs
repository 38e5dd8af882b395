//! Manifest hygiene: shared dependencies come from `[workspace.dependencies]`
//! and every listed member actually exists.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const MEMBERS: [&str; 6] = [
    "proxy-common",
    "flag-services",
    "proxy-core",
    "proxy-agent",
    "attack-engine",
    "workspace-tests",
];

const DEPENDENCY_TABLES: [&str; 3] = ["dependencies", "dev-dependencies", "build-dependencies"];

fn load_manifest(path: &str) -> toml::Value {
    let source = fs::read_to_string(path).unwrap_or_else(|e| panic!("reading {}: {}", path, e));
    toml::from_str(&source).unwrap_or_else(|e| panic!("parsing {}: {}", path, e))
}

fn root_manifest() -> toml::Value {
    load_manifest("../Cargo.toml")
}

fn shared_dependencies(root: &toml::Value) -> Vec<String> {
    root.get("workspace")
        .and_then(|w| w.get("dependencies"))
        .and_then(|d| d.as_table())
        .map(|deps| deps.keys().cloned().collect())
        .unwrap_or_default()
}

/// Dependency name -> whether it inherits from the workspace, over every
/// dependency table of `manifest`. Handles both `dep = { workspace = true }`
/// and the dotted `dep.workspace = true` spelling.
fn inherited_dependencies(manifest: &toml::Value) -> BTreeMap<String, bool> {
    let mut deps = BTreeMap::new();
    for table in DEPENDENCY_TABLES {
        let Some(entries) = manifest.get(table).and_then(|t| t.as_table()) else {
            continue;
        };
        for (name, spec) in entries {
            let inherits = spec
                .get("workspace")
                .and_then(|w| w.as_bool())
                .unwrap_or(false);
            deps.insert(name.clone(), inherits);
        }
    }
    deps
}

fn check_member(crate_name: &str, shared: &[String]) -> Result<(), String> {
    let manifest = load_manifest(&format!("../{}/Cargo.toml", crate_name));
    let deps = inherited_dependencies(&manifest);
    for name in shared {
        if deps.get(name) == Some(&false) {
            return Err(format!(
                "crate '{}' pins '{}' instead of inheriting it with `workspace = true`",
                crate_name, name
            ));
        }
    }
    Ok(())
}

#[test]
fn test_members_match_root_manifest() {
    let root = root_manifest();
    let listed: Vec<&str> = root
        .get("workspace")
        .and_then(|w| w.get("members"))
        .and_then(|m| m.as_array())
        .map(|members| members.iter().filter_map(|m| m.as_str()).collect())
        .unwrap_or_default();

    assert_eq!(listed, MEMBERS);
    for member in listed {
        assert!(
            Path::new(&format!("../{}/Cargo.toml", member)).exists(),
            "member {} has no manifest",
            member
        );
    }
}

#[test]
fn test_shared_stack_is_declared_once() {
    let shared = shared_dependencies(&root_manifest());
    for name in ["tokio", "axum", "reqwest", "rmp-serde", "flate2", "tracing"] {
        assert!(shared.iter().any(|s| s == name), "{} missing from workspace", name);
    }
}

#[test]
fn test_pinned_dependency_is_detected() {
    let manifest: toml::Value = toml::from_str(
        r#"
[package]
name = "sample"

[dependencies]
tokio = "1.0"
serde = { workspace = true }
flate2.workspace = true

[dev-dependencies]
proptest = { workspace = true }
"#,
    )
    .unwrap();

    let deps = inherited_dependencies(&manifest);
    assert_eq!(deps.get("tokio"), Some(&false));
    assert_eq!(deps.get("serde"), Some(&true));
    assert_eq!(deps.get("flate2"), Some(&true));
    assert_eq!(deps.get("proptest"), Some(&true));
    assert_eq!(deps.get("axum"), None);
}

proptest! {
    #[test]
    fn test_members_inherit_shared_dependencies(crate_name in prop::sample::select(MEMBERS.to_vec())) {
        let shared = shared_dependencies(&root_manifest());
        if let Err(reason) = check_member(crate_name, &shared) {
            prop_assert!(false, "{}", reason);
        }
    }
}
