//! Pick a goal from the files present in a project directory.

use std::path::Path;

use crate::config::PROJECT_CONFIG_FILE;

/// Best matching goal name for `cwd`, first match wins:
/// `.retrai.yml`, pytest, pyright, Cargo, Go, bun, npm test runners, Makefile.
pub fn detect_goal(cwd: &Path) -> Option<&'static str> {
    if cwd.join(PROJECT_CONFIG_FILE).exists() {
        return Some("shell-goal");
    }
    if has_pytest(cwd) {
        return Some("pytest");
    }
    if has_pyright(cwd) {
        return Some("pyright");
    }
    if cwd.join("Cargo.toml").exists() {
        return Some("cargo-test");
    }
    if cwd.join("go.mod").exists() {
        return Some("go-test");
    }
    let package_json = cwd.join("package.json");
    if package_json.exists() {
        if cwd.join("bun.lock").exists() || cwd.join("bun.lockb").exists() {
            return Some("bun-test");
        }
        if uses_js_test_runner(&package_json) {
            return Some("npm-test");
        }
    }
    if has_make_test_target(cwd) {
        return Some("make-test");
    }
    None
}

fn read_lossy(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn has_pytest(root: &Path) -> bool {
    if root.join("pytest.ini").exists() || root.join("conftest.py").exists() {
        return true;
    }
    if let Some(content) = read_lossy(&root.join("pyproject.toml"))
        && content.to_lowercase().contains("pytest")
    {
        return true;
    }
    if let Some(content) = read_lossy(&root.join("setup.cfg"))
        && content.contains("[tool:pytest]")
    {
        return true;
    }
    let is_python = root.join("pyproject.toml").exists()
        || root.join("setup.py").exists()
        || root.join("setup.cfg").exists();
    is_python && (root.join("tests").is_dir() || root.join("test").is_dir())
}

fn has_pyright(root: &Path) -> bool {
    root.join("pyrightconfig.json").exists()
        || read_lossy(&root.join("pyproject.toml"))
            .is_some_and(|content| content.contains("[tool.pyright]"))
}

fn uses_js_test_runner(package_json: &Path) -> bool {
    let Some(pkg) = read_lossy(package_json)
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
    else {
        return false;
    };

    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| pkg.get(section).and_then(|deps| deps.get(name)).is_some())
    };
    if has_dep("jest") || has_dep("vitest") {
        return true;
    }

    pkg.get("scripts")
        .and_then(|scripts| scripts.get("test"))
        .and_then(|test| test.as_str())
        .map(str::to_lowercase)
        .is_some_and(|script| ["jest", "vitest", "mocha"].iter().any(|r| script.contains(r)))
}

fn has_make_test_target(root: &Path) -> bool {
    read_lossy(&root.join("Makefile")).is_some_and(|content| {
        content.lines().any(|line| {
            let line = line.trim_start();
            line.starts_with("test:") || line.starts_with("test ")
        })
    })
}
