//! Naming Convention Checker
//!
//! Scans every mixsim crate for banned function prefixes, vague type
//! suffixes, generic module names and malformed `# Errors` sections.

use std::fs;
use std::path::{Path, PathBuf};

/// Directories scanned below the workspace root must carry this marker.
const CRATE_MARKER: &str = "mixsim";

/// A naming violation found in the code
#[derive(Debug)]
struct NamingViolation {
    file_path: String,
    line_number: usize,
    violation_type: &'static str,
    message: String,
}

impl NamingViolation {
    fn new(file_path: &Path, line_number: usize, violation_type: &'static str, message: &str) -> Self {
        Self {
            file_path: file_path.display().to_string(),
            line_number,
            violation_type,
            message: message.to_string(),
        }
    }
}

/// Line-based checker; no parsing, so it errs towards false negatives.
struct NamingChecker {
    violations: Vec<NamingViolation>,
    files_checked: usize,
}

fn is_fn_definition(trimmed: &str) -> bool {
    trimmed.starts_with("pub fn ")
        || trimmed.starts_with("pub async fn ")
        || trimmed.starts_with("fn ")
        || trimmed.starts_with("async fn ")
}

impl NamingChecker {
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
        if depth > 8 || files.len() > 300 {
            return Ok(());
        }

        if let Some(name) = dir.file_name() {
            let name = name.to_string_lossy();
            if name == "target" || name.starts_with('.') {
                return Ok(());
            }
        }

        if depth > 0 && !dir.to_string_lossy().contains(CRATE_MARKER) {
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::find_rust_files_recursive(&path, files, depth + 1)?;
            } else if path.extension().is_some_and(|extension| extension == "rs") {
                files.push(path);
            }
        }

        Ok(())
    }

    /// Accessor and dispatcher prefixes hide what a function does.
    fn check_function_prefixes(&mut self, file_path: &Path, content: &str) {
        let banned_patterns = [
            (
                "get_",
                "Use the noun directly: report.statistics() not report.get_statistics()",
            ),
            (
                "set_",
                "Use descriptive verbs: config.apply() not config.set_threshold()",
            ),
            (
                "handle_",
                "Name the event: on_timer_fired() not handle_timer()",
            ),
        ];

        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if !is_fn_definition(trimmed) {
                continue;
            }

            for &(prefix, correction) in &banned_patterns {
                if trimmed.contains(&format!("fn {prefix}")) {
                    self.violations.push(NamingViolation::new(
                        file_path,
                        line_num + 1,
                        "BANNED_FUNCTION_PREFIX",
                        &format!("Function uses banned prefix '{prefix}'. {correction}"),
                    ));
                }
            }
        }
    }

    fn check_type_naming(&mut self, file_path: &Path, content: &str) {
        let banned_suffixes = [
            ("Factory", "Use a plain new() or from_config() constructor"),
            ("Service", "Adds no meaning; name the thing itself"),
        ];

        // Traits may keep these when the role is the point
        let struct_verbose_suffixes = [
            ("Manager", "Name what the type IS, not that it manages"),
            ("Handler", "Name the event or input being processed"),
            ("Processor", "Name the transformation"),
            ("Controller", "Name what is being controlled"),
        ];

        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            let words: Vec<&str> = trimmed.split_whitespace().collect();
            let (keyword, name_part) = match words.as_slice() {
                ["pub", keyword, name, ..] | [keyword, name, ..] => (*keyword, *name),
                _ => continue,
            };
            if !matches!(keyword, "struct" | "enum" | "trait") {
                continue;
            }

            let type_name = name_part
                .split(['<', '{', '(', ';'])
                .next()
                .unwrap_or("")
                .trim();

            for &(suffix, message) in &banned_suffixes {
                if type_name.ends_with(suffix) {
                    self.violations.push(NamingViolation::new(
                        file_path,
                        line_num + 1,
                        "BANNED_TYPE_SUFFIX",
                        &format!("Type '{type_name}' uses banned '{suffix}' suffix. {message}"),
                    ));
                }
            }

            if keyword == "trait" {
                continue;
            }
            for &(suffix, message) in &struct_verbose_suffixes {
                if type_name.ends_with(suffix) {
                    self.violations.push(NamingViolation::new(
                        file_path,
                        line_num + 1,
                        "VERBOSE_TYPE_SUFFIX",
                        &format!("Type '{type_name}' uses verbose '{suffix}' suffix. {message}"),
                    ));
                }
            }
        }
    }

    fn check_module_names(&mut self, file_path: &Path) {
        let Some(file_name) = file_path.file_name() else {
            return;
        };
        let name = file_name.to_string_lossy();
        let banned_patterns = [
            ("utils", "Use a specific name like 'scheduler' or 'traffic'"),
            ("common", "Use a specific name like 'message' or 'config'"),
            ("helpers", "Use a specific name like 'testing'"),
            ("misc", "Name the module after its purpose"),
            ("stuff", "Name the module after its purpose"),
        ];

        for &(pattern, message) in &banned_patterns {
            if name == format!("{pattern}.rs") || name == pattern {
                self.violations.push(NamingViolation::new(
                    file_path,
                    1,
                    "BANNED_MODULE_NAME",
                    &format!("Module name '{pattern}' is too generic. {message}"),
                ));
            }
        }
    }

    /// Finds doc blocks directly above a function and checks their sections.
    fn check_documentation_format(&mut self, file_path: &Path, content: &str) {
        let lines: Vec<&str> = content.lines().collect();
        let mut i = 0;

        while i < lines.len() {
            if !lines[i].trim().starts_with("///") {
                i += 1;
                continue;
            }

            let doc_start = i;
            let mut doc_end = i;
            while doc_end < lines.len() && lines[doc_end].trim().starts_with("///") {
                doc_end += 1;
            }

            let mut next = doc_end;
            while next < lines.len() && lines[next].trim().is_empty() {
                next += 1;
            }

            if next < lines.len() && is_fn_definition(lines[next].trim()) {
                self.check_doc_block(file_path, &lines[doc_start..doc_end], doc_start);
            }
            i = doc_end;
        }
    }

    fn check_doc_block(&mut self, file_path: &Path, doc_lines: &[&str], start_line: usize) {
        let mut sections_found = Vec::new();
        let mut i = 0;

        while i < doc_lines.len() {
            let line = doc_lines[i].trim();
            let section_type = match line {
                "/// # Errors" => "Errors",
                "/// # Panics" => "Panics",
                _ => {
                    i += 1;
                    continue;
                }
            };

            let absolute_line = start_line + i + 1;
            sections_found.push((section_type, absolute_line));

            if doc_lines.get(i + 1).map(|next| next.trim()) != Some("///") {
                self.violations.push(NamingViolation::new(
                    file_path,
                    absolute_line,
                    "INVALID_DOC_FORMAT",
                    &format!("# {section_type} section must be followed by blank line: `///`"),
                ));
                i += 1;
                continue;
            }

            let mut j = i + 2;
            let mut found_content = false;

            while j < doc_lines.len() {
                let doc_content = doc_lines[j]
                    .trim()
                    .strip_prefix("///")
                    .unwrap_or("")
                    .trim();
                if doc_content.starts_with("# ") {
                    break;
                }

                if !doc_content.is_empty() && section_type == "Errors" {
                    found_content = true;
                    let message = match doc_content.strip_prefix("- ") {
                        None => Some("# Errors content must use bullet points: `- ErrorType - condition`"),
                        Some(_) if doc_content.contains("Returns ") => Some(
                            "Use format `- ErrorType - condition` not `Returns ErrorType if condition`",
                        ),
                        Some(bullet) if !bullet.contains('`') || !bullet.contains(" - ") => Some(
                            "Use format `- ErrorType - condition` with backticks around error type",
                        ),
                        Some(_) => None,
                    };
                    if let Some(message) = message {
                        self.violations.push(NamingViolation::new(
                            file_path,
                            start_line + j + 1,
                            "INVALID_DOC_FORMAT",
                            message,
                        ));
                    }
                }
                j += 1;
            }

            if !found_content && section_type == "Errors" {
                self.violations.push(NamingViolation::new(
                    file_path,
                    absolute_line,
                    "INVALID_DOC_FORMAT",
                    "# Errors section cannot be empty - list specific error types",
                ));
            }

            i = j;
        }

        for window in sections_found.windows(2) {
            if let [("Panics", _), ("Errors", line)] = window {
                self.violations.push(NamingViolation::new(
                    file_path,
                    *line,
                    "INVALID_DOC_FORMAT",
                    "# Errors section must come before # Panics section",
                ));
            }
        }
    }

    fn check_file(&mut self, file_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let path_str = file_path.to_string_lossy();
        if path_str.contains("/tests/")
            || path_str.contains("test_")
            // Contains deliberate violations as test input
            || path_str.ends_with("naming_conventions.rs")
        {
            return Ok(());
        }

        let content = fs::read_to_string(file_path)?;

        self.check_function_prefixes(file_path, &content);
        self.check_type_naming(file_path, &content);
        self.check_module_names(file_path);
        self.check_documentation_format(file_path, &content);

        self.files_checked += 1;
        Ok(())
    }

    fn check_workspace(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        for file in self.find_rust_files()? {
            if let Err(e) = self.check_file(&file) {
                eprintln!("Warning: Failed to check {}: {}", file.display(), e);
            }
        }
        Ok(())
    }

    /// Prints every violation. Returns true when there are none.
    fn report_violations(&self) -> bool {
        if self.violations.is_empty() {
            println!("Naming conventions check passed");
            println!("  Files checked: {}", self.files_checked);
            return true;
        }

        println!("Naming convention violations found:");
        println!();
        for violation in &self.violations {
            println!(
                "{}:{}:{} - {}",
                violation.file_path,
                violation.line_number,
                violation.violation_type,
                violation.message
            );
        }
        println!();
        println!("Summary:");
        println!("  Files checked: {}", self.files_checked);
        println!("  Violations: {}", self.violations.len());

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(checker: &NamingChecker) -> Vec<&str> {
        checker
            .violations
            .iter()
            .map(|v| v.message.as_str())
            .collect()
    }

    #[test]
    fn test_banned_function_prefixes() {
        let mut checker = NamingChecker::new();
        const VIOLATION_CODE: &str = r#"
impl Scheduler {
    pub fn get_now(&self) -> u64 { 42 }
    pub fn set_now(&mut self, now: u64) { }
    pub fn handle_event(&self) { }
    pub fn pop_due(&self) { } // This is OK
    fn get_queue(&self) -> usize { 0 } // Also banned
    pub async fn set_seed(&mut self) { } // Async is also banned
}
"#;

        checker.check_function_prefixes(Path::new("scheduler.rs"), VIOLATION_CODE);
        assert_eq!(checker.violations.len(), 5);

        let messages = messages(&checker);
        assert!(messages.iter().any(|m| m.contains("get_")));
        assert!(messages.iter().any(|m| m.contains("set_")));
        assert!(messages.iter().any(|m| m.contains("handle_")));
    }

    #[test]
    fn test_function_prefixes_edge_cases() {
        let mut checker = NamingChecker::new();
        const EDGE_CASE_CODE: &str = r#"
impl Strategy {
    pub fn getter(&self) -> u32 { 42 } // OK - no underscore
    pub fn setup(&mut self) { } // OK - set without underscore
    pub fn get_or_arm(&self) -> u32 { 42 } // Banned - has get_
    // pub fn get_commented(&self) -> u32 { 42 }
    fn claim_get_timer(&self) { } // OK - get_ not at function start
}
"#;

        checker.check_function_prefixes(Path::new("strategy.rs"), EDGE_CASE_CODE);
        assert_eq!(checker.violations.len(), 1);
        assert!(checker.violations[0].message.contains("get_"));
    }

    #[test]
    fn test_banned_type_suffixes() {
        let mut checker = NamingChecker::new();
        const TYPE_VIOLATION_CODE: &str = r#"
pub struct StrategyFactory {
}

pub struct SweepService {
}

pub struct TimerManager {
}

enum EventHandler {
}

pub trait RunManager {
}

struct BatchProcessor;
"#;

        checker.check_type_naming(Path::new("types.rs"), TYPE_VIOLATION_CODE);
        assert_eq!(checker.violations.len(), 5);

        let messages = messages(&checker);
        assert!(messages.iter().any(|m| m.contains("StrategyFactory")));
        assert!(messages.iter().any(|m| m.contains("SweepService")));
        assert!(messages.iter().any(|m| m.contains("TimerManager")));
        assert!(messages.iter().any(|m| m.contains("BatchProcessor")));
        assert!(!messages.iter().any(|m| m.contains("RunManager")));
    }

    #[test]
    fn test_banned_module_names() {
        let mut checker = NamingChecker::new();

        checker.check_module_names(Path::new("utils.rs"));
        checker.check_module_names(Path::new("common.rs"));
        checker.check_module_names(Path::new("helpers.rs"));
        checker.check_module_names(Path::new("misc.rs"));

        checker.check_module_names(Path::new("scheduler.rs"));
        checker.check_module_names(Path::new("threshold_batch.rs"));
        checker.check_module_names(Path::new("mod.rs"));

        assert_eq!(checker.violations.len(), 4);
    }

    #[test]
    fn test_errors_section_format() {
        let mut checker = NamingChecker::new();
        const DOC_CODE: &str = r#"
/// Schedules an event.
///
/// # Errors
/// - Returns an error when the time is in the past
pub fn schedule() {}

/// Pops the next event.
///
/// # Errors
///
/// - `SimulationError::EventInPast` - Queue order was violated
pub fn pop_due() {}

/// Advances the clock.
///
/// # Panics
///
/// Never.
///
/// # Errors
///
/// - missing backticks here
fn advance() {}
"#;

        checker.check_documentation_format(Path::new("scheduler.rs"), DOC_CODE);

        let kinds: Vec<usize> = checker.violations.iter().map(|v| v.line_number).collect();
        // Missing blank line, bad bullet, Panics before Errors
        assert_eq!(checker.violations.len(), 3, "{kinds:?}");
        assert!(
            checker
                .violations
                .iter()
                .all(|v| v.violation_type == "INVALID_DOC_FORMAT")
        );
    }

    #[test]
    fn test_violation_structure() {
        let mut checker = NamingChecker::new();
        const VIOLATION_EXAMPLE: &str = "pub fn get_report() -> u32 { 42 }";

        checker.check_function_prefixes(Path::new("example.rs"), VIOLATION_EXAMPLE);

        assert_eq!(checker.violations.len(), 1);
        let violation = &checker.violations[0];
        assert_eq!(violation.file_path, "example.rs");
        assert_eq!(violation.line_number, 1);
        assert_eq!(violation.violation_type, "BANNED_FUNCTION_PREFIX");
    }

    #[test]
    fn naming_convention_enforcement() {
        let mut checker = NamingChecker::new();
        checker
            .check_workspace()
            .expect("Failed to check workspace");

        assert!(
            checker.report_violations(),
            "Naming convention violations found - see output above"
        );
        assert!(checker.files_checked > 0, "No mixsim sources found");
    }
}
