//! Dead Code Enforcement
//!
//! Production code in the mixsim crates must not carry `#[allow(dead_code)]`.
//! Unused code is either removed or wired into a caller. Test code is exempt.

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct DeadCodeViolation {
    file_path: String,
    line_number: usize,
    context: String,
}

struct DeadCodeChecker {
    violations: Vec<DeadCodeViolation>,
    files_checked: usize,
}

impl DeadCodeChecker {
    fn new() -> Self {
        Self {
            violations: Vec::new(),
            files_checked: 0,
        }
    }

    fn find_rust_files(&self) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
        let mut files = Vec::new();
        Self::find_rust_files_recursive(Path::new(".."), &mut files, 0)?;
        Ok(files)
    }

    fn find_rust_files_recursive(
        dir: &Path,
        files: &mut Vec<PathBuf>,
        depth: usize,
    ) -> Result<(), Box<dyn std::error::Error>> {
        if depth > 10 || !dir.is_dir() {
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if name.starts_with('.') || name == "target" {
                continue;
            }

            if path.is_dir() {
                // Only workspace crates; reference material elsewhere is not ours
                if depth == 0 && !name.starts_with("mixsim") {
                    continue;
                }
                Self::find_rust_files_recursive(&path, files, depth + 1)?;
            } else if path.extension().is_some_and(|s| s == "rs") {
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_test_file(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy().to_lowercase();

        path_str.contains("/tests/")
            || path_str.contains("\\tests\\")
            || path_str.contains("test_")
            || path_str.contains("_test")
            || path_str.ends_with("tests.rs")
            || path_str.ends_with("testing.rs")
            || path_str.contains("integration")
            || path_str.contains("/benches/")
            // Examples of the violation live here
            || path_str.contains("dead_code_enforcement.rs")
            || path_str.ends_with("style.rs")
    }

    fn scan(&mut self, path: &Path, content: &str) {
        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains("#[allow(") && trimmed.contains("dead_code") {
                self.violations.push(DeadCodeViolation {
                    file_path: path.to_string_lossy().into_owned(),
                    line_number: index + 1,
                    context: line.trim().to_string(),
                });
            }
        }
    }

    fn check_file(&mut self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if self.is_test_file(path) {
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        self.files_checked += 1;
        self.scan(path, &content);
        Ok(())
    }

    fn check_workspace(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for file in self.find_rust_files()? {
            self.check_file(&file)?;
        }
        Ok(())
    }

    /// Prints every violation. Returns true when there are none.
    fn report_violations(&self) -> bool {
        if self.violations.is_empty() {
            println!(
                "Dead code enforcement: {} files checked, no violations found",
                self.files_checked
            );
            return true;
        }

        println!("Dead code enforcement violations found:");
        println!();
        for violation in &self.violations {
            println!("{}:{}", violation.file_path, violation.line_number);
            println!("  {}", violation.context);
            println!();
        }
        println!(
            "Found {} violation(s) in {} file(s) checked",
            self.violations.len(),
            self.files_checked
        );
        println!("Remove the unused code, call it, or move it behind #[cfg(test)].");

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_test_file() {
        let checker = DeadCodeChecker::new();

        assert!(checker.is_test_file(Path::new("src/tests/example.rs")));
        assert!(checker.is_test_file(Path::new("src/deterministic/tests.rs")));
        assert!(checker.is_test_file(Path::new("src/strategy/testing.rs")));
        assert!(checker.is_test_file(Path::new("integration/live_cascade.rs")));
        assert!(checker.is_test_file(Path::new("mixsim-sim/benches/scheduler.rs")));

        assert!(!checker.is_test_file(Path::new("src/lib.rs")));
        assert!(!checker.is_test_file(Path::new("src/run.rs")));
        assert!(!checker.is_test_file(Path::new("src/strategy/mod.rs")));
    }

    #[test]
    fn test_dead_code_detection() {
        let mut checker = DeadCodeChecker::new();
        let source = r#"
use std::collections::BTreeMap;

#[allow(dead_code)]
struct UnusedQueue {
    depth: u32,
}

#[allow(clippy::too_many_arguments, dead_code)]
fn unused_schedule() {}

#[allow(clippy::too_many_arguments)]
fn used_schedule() {}
"#;

        checker.scan(Path::new("scheduler.rs"), source);

        assert_eq!(checker.violations.len(), 2);
        assert_eq!(checker.violations[0].line_number, 4);
        assert_eq!(checker.violations[1].line_number, 9);
    }

    #[test]
    fn dead_code_enforcement() {
        let mut checker = DeadCodeChecker::new();
        checker
            .check_workspace()
            .expect("Failed to check workspace");

        assert!(
            checker.report_violations(),
            "Dead code allowance violations found in production code - see output above"
        );
    }
}
