//! AST-based pre-check for submitted Python code
//!
//! Fast-fail layer in front of the container: syntax errors and a small
//! set of modules that enable resource exhaustion are rejected before any
//! container exists. Suspicious calls only produce warnings; the
//! container is the actual security boundary.

use crate::models::SecurityCheckResult;
use std::collections::HashSet;
use tracing::info;
use tree_sitter::{Language, Node, Parser};

/// Modules that can exhaust resources or escape even inside the container.
const BLOCKED_MODULES: &[&str] = &["ctypes", "multiprocessing", "signal", "_thread"];

/// Dotted call patterns worth flagging. Logged, never blocked.
const WARN_CALL_PATTERNS: &[&str] = &[
    "os.system",
    "os.popen",
    "os.exec",
    "os.execv",
    "os.execve",
    "os.fork",
    "subprocess.call",
    "subprocess.run",
    "subprocess.Popen",
    "shutil.rmtree",
    "__import__",
    "eval",
    "exec",
    "compile",
];

pub struct SecurityChecker {
    blocked_modules: HashSet<String>,
    language: Language,
}

impl Default for SecurityChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityChecker {
    pub fn new() -> Self {
        Self::with_blocked_modules(BLOCKED_MODULES.iter().map(|m| m.to_string()).collect())
    }

    pub fn with_blocked_modules(blocked_modules: HashSet<String>) -> Self {
        Self {
            blocked_modules,
            language: tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Validate code before execution: syntax check, blocked-import scan,
    /// dangerous-call warnings.
    pub fn validate(&self, code: &str) -> SecurityCheckResult {
        let mut parser = Parser::new();
        if parser.set_language(&self.language).is_err() {
            return SecurityCheckResult::blocked("Python grammar unavailable");
        }
        let Some(tree) = parser.parse(code, None) else {
            return SecurityCheckResult::blocked("Failed to parse code");
        };

        let root = tree.root_node();
        if root.has_error() {
            let line = first_error_line(root).unwrap_or(1);
            return SecurityCheckResult::blocked(format!(
                "Syntax error at line {line}: invalid syntax"
            ));
        }

        let source = code.as_bytes();
        let mut blocked: Option<String> = None;
        let mut warnings: Vec<String> = Vec::new();

        walk(root, &mut |node| {
            if blocked.is_some() {
                return;
            }

            for module in imported_modules(node, source) {
                let top = module.split('.').next().unwrap_or(&module).to_string();
                if self.blocked_modules.contains(&top) {
                    blocked = Some(format!("Blocked module: {module}"));
                    return;
                }
            }

            if node.kind() == "call" {
                if let Some(function) = node.child_by_field_name("function") {
                    if let Some(name) = dotted_call_name(function, source) {
                        if WARN_CALL_PATTERNS.contains(&name.as_str()) {
                            warnings.push(format!("Potentially dangerous call: {name}"));
                        }
                    }
                }
            }
        });

        if let Some(reason) = blocked {
            return SecurityCheckResult::blocked(reason);
        }

        if !warnings.is_empty() {
            info!(?warnings, "security warnings for submitted code");
        }
        SecurityCheckResult::pass(warnings)
    }
}

fn walk<'a>(node: Node<'a>, visit: &mut impl FnMut(Node<'a>)) {
    visit(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, visit);
    }
}

fn first_error_line(node: Node<'_>) -> Option<usize> {
    if node.is_error() || node.is_missing() {
        return Some(node.start_position().row + 1);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if let Some(line) = first_error_line(child) {
            return Some(line);
        }
    }
    None
}

fn node_text(node: Node<'_>, source: &[u8]) -> String {
    node.utf8_text(source).unwrap_or("").to_string()
}

/// Module names imported by this node, if it is an import statement.
fn imported_modules(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut modules = Vec::new();
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "dotted_name" => modules.push(node_text(child, source)),
                    "aliased_import" => {
                        if let Some(name) = child.child_by_field_name("name") {
                            modules.push(node_text(name, source));
                        }
                    }
                    _ => {}
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                let raw = node_text(module, source);
                let stripped = raw.trim_start_matches('.');
                if !stripped.is_empty() {
                    modules.push(stripped.to_string());
                }
            }
        }
        _ => {}
    }
    modules
}

/// Best-effort dotted name of a call target (`os.system`, `eval`, ...).
fn dotted_call_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source)),
        "attribute" => {
            let object = node.child_by_field_name("object")?;
            let attribute = node.child_by_field_name("attribute")?;
            let base = dotted_call_name(object, source)?;
            Some(format!("{}.{}", base, node_text(attribute, source)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(code: &str) -> SecurityCheckResult {
        SecurityChecker::new().validate(code)
    }

    #[test]
    fn clean_code_passes() {
        let result = check("import math\nprint(math.sqrt(16))\n");
        assert!(result.passed);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn syntax_error_reports_line() {
        let result = check("x = 1\ndef broken(:\n    pass\n");
        assert!(!result.passed);
        let reason = result.blocked_reason.unwrap();
        assert!(reason.starts_with("Syntax error at line"), "got: {reason}");
    }

    #[test]
    fn blocked_import_is_rejected() {
        let result = check("import ctypes\n");
        assert!(!result.passed);
        assert_eq!(result.blocked_reason.as_deref(), Some("Blocked module: ctypes"));
    }

    #[test]
    fn blocked_from_import_is_rejected() {
        let result = check("from multiprocessing import Pool\n");
        assert!(!result.passed);
        assert_eq!(
            result.blocked_reason.as_deref(),
            Some("Blocked module: multiprocessing")
        );
    }

    #[test]
    fn blocked_submodule_import_is_rejected() {
        let result = check("import multiprocessing.pool\n");
        assert!(!result.passed);
        assert_eq!(
            result.blocked_reason.as_deref(),
            Some("Blocked module: multiprocessing.pool")
        );
    }

    #[test]
    fn aliased_blocked_import_is_rejected() {
        let result = check("import ctypes as c\n");
        assert!(!result.passed);
        assert_eq!(result.blocked_reason.as_deref(), Some("Blocked module: ctypes"));
    }

    #[test]
    fn dangerous_calls_warn_but_pass() {
        let result = check("import os\nos.system('ls')\neval('1 + 1')\n");
        assert!(result.passed, "warnings must not block: {:?}", result.blocked_reason);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].contains("os.system"));
        assert!(result.warnings[1].contains("eval"));
    }

    #[test]
    fn subprocess_run_warns() {
        let result = check("import subprocess\nsubprocess.run(['ls'])\n");
        assert!(result.passed);
        assert!(result.warnings.iter().any(|w| w.contains("subprocess.run")));
    }

    #[test]
    fn allowed_imports_pass() {
        for module in ["os", "sys", "json", "numpy", "pandas"] {
            let result = check(&format!("import {module}\n"));
            assert!(result.passed, "{module} should not be blocked");
        }
    }
}
