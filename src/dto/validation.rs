//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of a match join code.
pub const MATCH_CODE_LEN: usize = 6;

/// Validates that a join code is exactly 6 uppercase alphanumeric characters.
///
/// # Examples
///
/// ```ignore
/// validate_match_code("AB12CD") // Ok
/// validate_match_code("ab12cd") // Err - lowercase
/// validate_match_code("AB12C")  // Err - too short
/// ```
pub fn validate_match_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != MATCH_CODE_LEN {
        let mut err = ValidationError::new("match_code_length");
        err.message = Some(
            format!(
                "Match code must be exactly {MATCH_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    {
        let mut err = ValidationError::new("match_code_format");
        err.message = Some("Match code must contain only uppercase letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a question difficulty level (1 to 3).
pub fn validate_level(level: u8) -> Result<(), ValidationError> {
    if (1..=3).contains(&level) {
        Ok(())
    } else {
        let mut err = ValidationError::new("level_range");
        err.message = Some(format!("Level must be between 1 and 3 (got {level})").into());
        Err(err)
    }
}
