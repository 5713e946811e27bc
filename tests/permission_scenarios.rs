//! End-to-end permission scenarios driven through the public engine API.

use serde_json::json;
use tempfile::TempDir;

use starling::config::{Settings, StoragePaths};
use starling::permission::pattern::glob_match;
use starling::permission::{AskBehavior, Decision, PermissionEngine};

struct Project {
    _config: TempDir,
    project: TempDir,
    paths: StoragePaths,
}

impl Project {
    fn new() -> Self {
        let config = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        let paths = StoragePaths::new(config.path());
        Self {
            _config: config,
            project,
            paths,
        }
    }

    fn allow(&self, patterns: &[&str]) {
        let mut settings = Settings::default();
        settings.permissions.allow = patterns.iter().map(|p| p.to_string()).collect();
        settings.save(&self.paths, self.project.path()).unwrap();
    }

    fn deny(&self, allow: &[&str], deny: &[&str]) {
        let mut settings = Settings::default();
        settings.permissions.allow = allow.iter().map(|p| p.to_string()).collect();
        settings.permissions.deny = deny.iter().map(|p| p.to_string()).collect();
        settings.save(&self.paths, self.project.path()).unwrap();
    }

    fn engine(&self) -> PermissionEngine {
        PermissionEngine::new(self.paths.clone(), self.project.path(), AskBehavior::Ask)
            .with_internal_servers(["agent", "memory"])
    }
}

#[test]
fn safe_filter_auto_approval() {
    let project = Project::new();
    project.allow(&["Bash(find:*)"]);
    let engine = project.engine();

    let decision = engine.evaluate(
        "Bash",
        &json!({"command": "find /path -name \"*.dart\" | head -5"}),
    );
    assert!(
        matches!(decision, Decision::Allow { .. }),
        "expected allow, got {:?}",
        decision
    );
}

#[test]
fn cd_within_cwd_with_allow_pattern() {
    let project = Project::new();
    project.allow(&["Bash(dart pub:*)"]);
    let engine = project.engine();

    let command = format!("cd {}/sub && dart pub get", project.project.path().display());
    let decision = engine.evaluate("Bash", &json!({"command": command}));
    assert!(
        matches!(decision, Decision::Allow { .. }),
        "expected allow, got {:?}",
        decision
    );
}

#[test]
fn inference_for_compound_command() {
    let project = Project::new();
    let engine = project.engine();

    let decision = engine.evaluate(
        "Bash",
        &json!({"command": "cd packages/server && serverpod generate"}),
    );
    match decision {
        Decision::AskUser { pattern } => assert_eq!(pattern, "Bash(serverpod generate:*)"),
        other => panic!("expected ask with inferred pattern, got {:?}", other),
    }
}

#[test]
fn path_traversal_denied_regardless_of_settings() {
    let project = Project::new();
    project.allow(&["Write(**)", "Bash(*)"]);
    let engine = project.engine();

    let decision = engine.evaluate(
        "Write",
        &json!({"filePath": "../../etc/passwd", "content": "x"}),
    );
    assert!(
        matches!(decision, Decision::Deny { .. }),
        "expected deny, got {:?}",
        decision
    );
}

#[test]
fn deny_is_strictly_stronger_than_allow() {
    let project = Project::new();
    let engine = project.engine();
    let input = json!({"command": "cargo publish"});

    // Baseline: allowed by pattern.
    project.deny(&["Bash(cargo:*)"], &[]);
    assert!(matches!(
        engine.evaluate("Bash", &input),
        Decision::Allow { .. }
    ));

    // Adding a deny can only flip decisions toward deny, never the other
    // way around.
    project.deny(&["Bash(cargo:*)"], &["Bash(cargo publish:*)"]);
    assert!(matches!(
        engine.evaluate("Bash", &input),
        Decision::Deny { .. }
    ));

    // Unrelated allows remain allowed.
    assert!(matches!(
        engine.evaluate("Bash", &json!({"command": "cargo check"})),
        Decision::Allow { .. }
    ));
}

#[test]
fn glob_equivalence_laws() {
    for path in ["a", "a/b", "a/b/c", "deep/nested/path.rs", ""] {
        assert!(glob_match("**", path), "glob(**) must match {:?}", path);
    }
    assert!(glob_match("a/**", "a/b"));
    assert!(glob_match("a/**", "a/b/c"));
    assert!(!glob_match("a/**", "ab/c"));
    assert!(!glob_match("a/*", "a/b/c"));
}

#[test]
fn decisions_are_total_and_never_panic() {
    let project = Project::new();
    let engine = project.engine();

    // A grab-bag of odd inputs: every one must produce exactly one decision.
    let cases = vec![
        ("Bash", json!({})),
        ("Bash", json!({"command": ""})),
        ("Write", json!({"content": "no path at all"})),
        ("Unheard0fTool", json!({"anything": [1, 2, 3]})),
        ("WebFetch", json!({"url": "not a url"})),
    ];
    for (tool, input) in cases {
        let _ = engine.evaluate(tool, &input);
    }
}
