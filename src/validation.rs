use anyhow::{anyhow, Result};
use std::path::Path;

/// Validation utilities for input sanitization and edge case handling
#[derive(Debug, Copy, Clone)]
pub struct InputValidator;

impl InputValidator {
    /// Validate a customer key from an export row
    pub fn validate_customer_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(anyhow!("Customer id cannot be empty"));
        }

        if id.len() > 64 {
            return Err(anyhow!("Customer id too long (max 64 characters)"));
        }

        if id.chars().any(char::is_control) {
            return Err(anyhow!("Customer id contains invalid characters"));
        }

        Ok(())
    }

    /// Validate email format
    pub fn validate_email(email: &str) -> Result<()> {
        if email.trim().is_empty() {
            return Err(anyhow!("Email cannot be empty"));
        }

        if email.len() > 254 {
            return Err(anyhow!("Email too long (max 254 characters)"));
        }

        // Basic email validation
        if !email.contains('@') {
            return Err(anyhow!("Email must contain @ symbol"));
        }

        let parts: Vec<&str> = email.split('@').collect();
        if parts.len() != 2 {
            return Err(anyhow!("Email must have exactly one @ symbol"));
        }

        let local_part = parts[0];
        let domain_part = parts[1];

        if local_part.is_empty() || local_part.len() > 64 {
            return Err(anyhow!("Email local part invalid"));
        }

        if domain_part.is_empty() || !domain_part.contains('.') {
            return Err(anyhow!("Email domain invalid"));
        }

        if email.chars().any(char::is_whitespace) {
            return Err(anyhow!("Email contains whitespace"));
        }

        Ok(())
    }

    /// Validate an audience display name
    pub fn validate_audience_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(anyhow!("Audience name cannot be empty"));
        }

        // Provider limit on custom audience names
        if name.chars().count() > 200 {
            return Err(anyhow!("Audience name too long (max 200 characters)"));
        }

        if name.contains('\0') || name.contains('\r') || name.contains('\n') {
            return Err(anyhow!("Audience name contains invalid characters"));
        }

        Ok(())
    }

    /// Validate the drop directory
    pub fn validate_drop_dir(path: &Path) -> Result<()> {
        if path.to_string_lossy().is_empty() {
            return Err(anyhow!("Drop directory cannot be empty"));
        }

        if !path.exists() {
            return Err(anyhow!("Drop directory does not exist: {path:?}"));
        }

        if !path.is_dir() {
            return Err(anyhow!("Drop directory is not a directory: {path:?}"));
        }

        Ok(())
    }

    /// Normalize an email for use as a sync key, or `None` if unusable
    #[must_use]
    pub fn sanitize_email(raw: &str) -> Option<String> {
        let email = raw.trim().trim_matches('"').to_lowercase();
        Self::validate_email(&email).ok().map(|()| email)
    }

    /// Sanitize text input
    #[must_use]
    pub fn sanitize_text(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim()
            .to_string()
    }
}
