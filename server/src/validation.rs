use tts_core::SynthesisRequest;

use crate::error::ApiError;

/// Validate a resolved synthesis request before it reaches the engine.
pub fn validate_tts_request(request: &SynthesisRequest) -> Result<(), ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Text cannot be empty".to_string()));
    }
    Ok(())
}
