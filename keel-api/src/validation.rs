//! Validation Traits
//!
//! Field rules for request bodies. Every failing field is reported, not just
//! the first one.

use crate::error::{ApiError, ApiResult, ValidationIssue};
use crate::types::{CreateUserRequest, UpdateUserRequest};

/// Trait for request bodies with field-level rules.
pub trait Validate {
    /// All failed checks, in field order. Empty means valid.
    fn validation_issues(&self) -> Vec<ValidationIssue>;

    /// `Err(VALIDATION_ERROR)` listing every issue.
    fn validate(&self) -> ApiResult<()> {
        let issues = self.validation_issues();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ApiError::validation(issues))
        }
    }
}

fn char_len(value: &str) -> usize {
    value.chars().count()
}

fn check_username(value: &str, issues: &mut Vec<ValidationIssue>) {
    let len = char_len(value);
    if !(3..=50).contains(&len) {
        issues.push(
            ValidationIssue::new("username", "Username must be between 3 and 50 characters")
                .with_value(value),
        );
    }
}

fn check_email(value: &str, issues: &mut Vec<ValidationIssue>) {
    let well_formed = match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !domain.contains('@'),
        None => false,
    };
    if !well_formed {
        issues.push(ValidationIssue::new("email", "Email must be a valid email address").with_value(value));
    } else if char_len(value) > 100 {
        issues.push(ValidationIssue::new("email", "Email must be at most 100 characters"));
    }
}

fn check_name(field: &str, value: &str, issues: &mut Vec<ValidationIssue>) {
    if char_len(value) > 50 {
        issues.push(ValidationIssue::new(
            field,
            format!("{} must be at most 50 characters", field),
        ));
    }
}

impl Validate for CreateUserRequest {
    fn validation_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        check_username(&self.username, &mut issues);
        check_email(&self.email, &mut issues);
        let len = char_len(&self.password);
        if !(6..=255).contains(&len) {
            // No value: passwords never echo back.
            issues.push(ValidationIssue::new(
                "password",
                "Password must be between 6 and 255 characters",
            ));
        }
        check_name("firstName", &self.first_name, &mut issues);
        check_name("lastName", &self.last_name, &mut issues);
        issues
    }
}

impl Validate for UpdateUserRequest {
    fn validation_issues(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if !self.username.is_empty() {
            check_username(&self.username, &mut issues);
        }
        if !self.email.is_empty() {
            check_email(&self.email, &mut issues);
        }
        check_name("firstName", &self.first_name, &mut issues);
        check_name("lastName", &self.last_name, &mut issues);
        issues
    }
}
