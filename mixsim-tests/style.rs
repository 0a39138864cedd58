//! Style Enforcement Tests
//!
//! Validates that the mixsim crates follow the project's naming and
//! documentation conventions. These checks catch patterns clippy does not.
//!
//! # Test Organization
//!
//! - `naming_conventions` - Enforces naming patterns for types, functions, and modules
//! - `dead_code_enforcement` - Prevents #[allow(dead_code)] in production code
//!
//! Both scan the workspace and fail on the first run that finds violations.

#[path = "style/naming_conventions.rs"]
mod naming_conventions;

#[path = "style/dead_code_enforcement.rs"]
mod dead_code_enforcement;
