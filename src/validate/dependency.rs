//! Dependency gate.
//!
//! Every import a JavaScript/TypeScript patch adds must resolve:
//! relative specifiers to a file on disk (or one the same patch creates),
//! bare specifiers to a Node built-in or a package declared in a
//! `package.json` between the importing file and the project root.
//!
//! Package names are the first path segment, or the first two when the
//! first starts with `@` (`@org/pkg/deep/path` resolves as `@org/pkg`).

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{AddedCode, GateOutcome, finding};

/// Tried in order when resolving a relative import.
pub const RESOLVE_EXTENSIONS: &[&str] = &[
    "", ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".json", "/index.ts", "/index.tsx", "/index.js",
];

const DEPENDENCY_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

const NODE_BUILTINS: &[&str] = &[
    "assert", "async_hooks", "buffer", "child_process", "cluster", "console", "constants", "crypto",
    "dgram", "diagnostics_channel", "dns", "domain", "events", "fs", "http", "http2", "https",
    "inspector", "module", "net", "os", "path", "perf_hooks", "process", "punycode", "querystring",
    "readline", "repl", "stream", "string_decoder", "sys", "timers", "tls", "trace_events", "tty",
    "url", "util", "v8", "vm", "wasi", "worker_threads", "zlib",
];

static IMPORT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // import x from '…', export { y } from '…', and the closing line of a
        // multi-line import: } from '…'
        r#"^\s*(?:(?:import|export)\b[^'"]*?\b|\}\s*)from\s*['"]([^'"]+)['"]"#,
        // side-effect import '…'
        r#"^\s*import\s*['"]([^'"]+)['"]"#,
        r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        r#"\bimport\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Module specifiers imported by one line.
pub fn imports_in_line(line: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for re in IMPORT_PATTERNS.iter() {
        for caps in re.captures_iter(line) {
            if let Some(m) = caps.get(1) {
                let spec = m.as_str().to_string();
                if !found.contains(&spec) {
                    found.push(spec);
                }
            }
        }
    }
    found
}

/// Package name for a bare specifier.
pub fn package_name(specifier: &str) -> &str {
    let mut parts = specifier.splitn(3, '/');
    let first = parts.next().unwrap_or(specifier);
    if first.starts_with('@') {
        match parts.next() {
            Some(second) => &specifier[..first.len() + 1 + second.len()],
            None => first,
        }
    } else {
        first
    }
}

fn is_builtin(specifier: &str) -> bool {
    if specifier.starts_with("node:") {
        return true;
    }
    NODE_BUILTINS.contains(&package_name(specifier))
}

/// Lexically join `spec` onto `base_dir`. `None` if it climbs above the root.
fn normalize(base_dir: &Path, spec: &str) -> Option<PathBuf> {
    let joined = if let Some(stripped) = spec.strip_prefix('/') {
        PathBuf::from(stripped)
    } else {
        base_dir.join(spec)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

pub struct DependencyGate {
    work_dir: PathBuf,
}

impl DependencyGate {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    /// `created` lists paths the same patch creates; they count as present.
    pub fn check(&self, units: &[AddedCode], created: &[&str]) -> GateOutcome {
        let created: HashSet<PathBuf> = created.iter().map(PathBuf::from).collect();
        let mut manifests: HashMap<PathBuf, Option<HashSet<String>>> = HashMap::new();
        let mut errors = Vec::new();

        for unit in units.iter().filter(|u| u.language.is_js_family()) {
            let file_dir = Path::new(&unit.path)
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default();

            for line in &unit.lines {
                for spec in imports_in_line(&line.text) {
                    let problem = if spec.starts_with('.') || spec.starts_with('/') {
                        self.resolve_relative(&file_dir, &spec, &created)
                    } else if is_builtin(&spec) {
                        None
                    } else {
                        self.resolve_package(&file_dir, &spec, &mut manifests)
                    };
                    if let Some(msg) = problem {
                        errors.push(finding(&unit.path, line.number, &msg));
                    }
                }
            }
        }

        GateOutcome::from_findings(errors, Vec::new())
    }

    fn resolve_relative(&self, file_dir: &Path, spec: &str, created: &HashSet<PathBuf>) -> Option<String> {
        // Bundler suffixes such as `?raw` are not part of the path.
        let clean = spec.split(['?', '#']).next().unwrap_or(spec);
        let Some(target) = normalize(file_dir, clean) else {
            return Some(format!("import '{}' escapes the project root", spec));
        };
        let base = target.to_string_lossy();
        let found = RESOLVE_EXTENSIONS.iter().any(|ext| {
            let candidate = PathBuf::from(format!("{}{}", base, ext));
            created.contains(&candidate) || self.work_dir.join(&candidate).is_file()
        });
        if found {
            None
        } else {
            debug!(spec, "Relative import did not resolve");
            Some(format!("cannot resolve relative import '{}'", spec))
        }
    }

    fn resolve_package(
        &self,
        file_dir: &Path,
        spec: &str,
        manifests: &mut HashMap<PathBuf, Option<HashSet<String>>>,
    ) -> Option<String> {
        let name = package_name(spec);
        let mut dir = Some(file_dir);
        let mut saw_manifest = false;
        while let Some(d) = dir {
            let deps = manifests
                .entry(d.to_path_buf())
                .or_insert_with(|| read_manifest(&self.work_dir.join(d).join("package.json")));
            if let Some(deps) = deps {
                saw_manifest = true;
                if deps.contains(name) {
                    return None;
                }
            }
            dir = d.parent();
        }
        if saw_manifest {
            Some(format!("package '{}' is not declared in package.json", name))
        } else {
            Some(format!("package '{}' imported but no package.json was found", name))
        }
    }
}

/// Declared package names, or `None` when there is no readable manifest.
fn read_manifest(path: &Path) -> Option<HashSet<String>> {
    let text = std::fs::read_to_string(path).ok()?;
    let json: serde_json::Value = serde_json::from_str(&text).ok()?;
    let mut names = HashSet::new();
    for section in DEPENDENCY_SECTIONS {
        if let Some(obj) = json.get(section).and_then(|v| v.as_object()) {
            names.extend(obj.keys().cloned());
        }
    }
    Some(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::AddedLine;
    use crate::validate::rules::Language;
    use std::fs;
    use tempfile::TempDir;

    fn unit(path: &str, lines: &[&str]) -> AddedCode {
        AddedCode {
            path: path.to_string(),
            language: Language::from_path(path),
            lines: lines
                .iter()
                .enumerate()
                .map(|(i, t)| AddedLine {
                    number: i + 1,
                    text: t.to_string(),
                })
                .collect(),
            is_new_file: false,
        }
    }

    #[test]
    fn test_imports_in_line_forms() {
        assert_eq!(imports_in_line("import x from './x';"), vec!["./x"]);
        assert_eq!(imports_in_line("import type { T } from \"@org/types\";"), vec!["@org/types"]);
        assert_eq!(imports_in_line("import './styles.css';"), vec!["./styles.css"]);
        assert_eq!(imports_in_line("export * from '../lib';"), vec!["../lib"]);
        assert_eq!(imports_in_line("} from 'react';"), vec!["react"]);
        assert_eq!(imports_in_line("const fs = require('fs');"), vec!["fs"]);
        assert_eq!(imports_in_line("const m = await import('./lazy');"), vec!["./lazy"]);
        assert!(imports_in_line("const from = 'nowhere';").is_empty());
    }

    #[test]
    fn test_package_name() {
        assert_eq!(package_name("react"), "react");
        assert_eq!(package_name("lodash/fp/map"), "lodash");
        assert_eq!(package_name("@org/pkg"), "@org/pkg");
        assert_eq!(package_name("@org/pkg/deep/path"), "@org/pkg");
        assert_eq!(package_name("@org"), "@org");
    }

    #[test]
    fn test_no_imports_passes() {
        let dir = TempDir::new().unwrap();
        let gate = DependencyGate::new(dir.path());
        let outcome = gate.check(&[unit("foo.ts", &["export const x = 1;"])], &[]);
        assert!(outcome.passed);
    }

    #[test]
    fn test_relative_imports_resolve_with_extensions() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/util")).unwrap();
        fs::write(dir.path().join("src/helper.ts"), "").unwrap();
        fs::write(dir.path().join("src/util/index.ts"), "").unwrap();
        let gate = DependencyGate::new(dir.path());

        let outcome = gate.check(
            &[unit(
                "src/main.ts",
                &[
                    "import { h } from './helper';",
                    "import u from './util';",
                    "import n from './created';",
                ],
            )],
            &["src/created.ts"],
        );
        assert!(outcome.passed, "{:?}", outcome.errors);

        let outcome = gate.check(&[unit("src/main.ts", &["import m from './missing';"])], &[]);
        assert!(!outcome.passed);
        assert!(outcome.errors[0].starts_with("src/main.ts:1:"));
    }

    #[test]
    fn test_relative_import_escaping_root_fails() {
        let dir = TempDir::new().unwrap();
        let gate = DependencyGate::new(dir.path());
        let outcome = gate.check(&[unit("a.ts", &["import x from '../../outside';"])], &[]);
        assert!(outcome.errors[0].contains("escapes"));
    }

    #[test]
    fn test_packages_and_builtins() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies":{"react":"^18"},"devDependencies":{"@org/pkg":"1.0.0"}}"#,
        )
        .unwrap();
        let gate = DependencyGate::new(dir.path());

        let ok = gate.check(
            &[unit(
                "src/a.ts",
                &[
                    "import React from 'react';",
                    "import { x } from '@org/pkg/sub';",
                    "import fs from 'node:fs';",
                    "const path = require('path');",
                ],
            )],
            &[],
        );
        assert!(ok.passed, "{:?}", ok.errors);

        let bad = gate.check(&[unit("src/a.ts", &["import _ from 'lodash';"])], &[]);
        assert!(bad.errors[0].contains("'lodash' is not declared"));
    }

    #[test]
    fn test_nested_package_json_is_consulted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("packages/web")).unwrap();
        fs::write(dir.path().join("package.json"), r#"{"devDependencies":{"typescript":"5"}}"#).unwrap();
        fs::write(
            dir.path().join("packages/web/package.json"),
            r#"{"dependencies":{"vue":"3"}}"#,
        )
        .unwrap();
        let gate = DependencyGate::new(dir.path());
        let outcome = gate.check(
            &[unit(
                "packages/web/main.ts",
                &["import { createApp } from 'vue';", "import ts from 'typescript';"],
            )],
            &[],
        );
        assert!(outcome.passed, "{:?}", outcome.errors);
    }

    #[test]
    fn test_missing_manifest_is_reported() {
        let dir = TempDir::new().unwrap();
        let gate = DependencyGate::new(dir.path());
        let outcome = gate.check(&[unit("a.js", &["const x = require('express');"])], &[]);
        assert!(outcome.errors[0].contains("no package.json"));
    }

    #[test]
    fn test_non_js_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        let gate = DependencyGate::new(dir.path());
        let outcome = gate.check(&[unit("a.py", &["import requests"])], &[]);
        assert!(outcome.passed);
    }
}
