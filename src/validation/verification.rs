use crate::error::{AppError, Result};

/// Smallest accepted face-embedding dimension.
pub const MIN_EMBEDDING_DIM: usize = 64;
/// Largest accepted face-embedding dimension.
pub const MAX_EMBEDDING_DIM: usize = 1024;

/// Validates a client-submitted score.
///
/// # Arguments
///
/// * `name` - The score name, used in the error message.
/// * `value` - The score to validate.
///
/// # Returns
///
/// A `Result<()>` indicating whether the score lies in `[0, 1]`.
pub fn validate_score(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() {
        return Err(AppError::Validation(format!("{} must be a number", name)));
    }

    if !(0.0..=1.0).contains(&value) {
        return Err(AppError::Validation(format!(
            "{} must be between 0 and 1, got {}",
            name, value
        )));
    }

    Ok(())
}

/// Validates a face embedding's dimension and values.
pub fn validate_embedding(name: &str, embedding: &[f32]) -> Result<()> {
    if embedding.len() < MIN_EMBEDDING_DIM || embedding.len() > MAX_EMBEDDING_DIM {
        return Err(AppError::Validation(format!(
            "{} must have between {} and {} values, got {}",
            name,
            MIN_EMBEDDING_DIM,
            MAX_EMBEDDING_DIM,
            embedding.len()
        )));
    }

    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(AppError::Validation(format!(
            "{} must contain only finite numbers",
            name
        )));
    }

    Ok(())
}

/// Validates an image reference handed to the OCR / face collaborators.
pub fn validate_image_ref(image_ref: &str) -> Result<()> {
    if image_ref.trim().is_empty() {
        return Err(AppError::Validation("image_ref cannot be empty".to_string()));
    }

    if image_ref.len() > 2048 {
        return Err(AppError::Validation(
            "image_ref must be at most 2048 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scores_outside_unit_interval_are_rejected() {
        assert!(validate_score("liveness", 0.0).is_ok());
        assert!(validate_score("liveness", 1.0).is_ok());
        assert!(matches!(
            validate_score("liveness", 1.2),
            Err(AppError::Validation(_))
        ));
        assert!(validate_score("faceMatch", -0.01).is_err());
        assert!(validate_score("faceMatch", f32::NAN).is_err());
    }

    #[test]
    fn embedding_dimension_bounds() {
        assert!(validate_embedding("embedding", &vec![0.1; 64]).is_ok());
        assert!(validate_embedding("embedding", &vec![0.1; 1024]).is_ok());
        assert!(validate_embedding("embedding", &vec![0.1; 63]).is_err());
        assert!(validate_embedding("embedding", &vec![0.1; 1025]).is_err());

        let mut poisoned = vec![0.1; 128];
        poisoned[7] = f32::INFINITY;
        assert!(validate_embedding("embedding", &poisoned).is_err());
    }

    #[test]
    fn blank_image_ref_is_rejected() {
        assert!(validate_image_ref("uploads/front.jpg").is_ok());
        assert!(validate_image_ref("   ").is_err());
    }
}
