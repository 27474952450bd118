//! Frame validation rules.

use relay_core::error::AppError;

/// Maximum topic name length.
const MAX_TOPIC_LEN: usize = 256;

/// Validates the raw size and shape of an inbound frame.
pub fn validate_inbound(raw: &str, max_frame_bytes: usize) -> Result<(), AppError> {
    if raw.len() > max_frame_bytes {
        return Err(AppError::protocol(format!(
            "Frame exceeds maximum size of {max_frame_bytes} bytes"
        )));
    }

    if raw.trim().is_empty() {
        return Err(AppError::protocol("Empty frame"));
    }

    Ok(())
}

/// Validates topic name format.
pub fn validate_topic(topic: &str) -> Result<(), AppError> {
    if topic.is_empty() || topic.len() > MAX_TOPIC_LEN {
        return Err(AppError::validation("Invalid topic name length"));
    }

    if !topic
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'))
    {
        return Err(AppError::validation("Topic name contains invalid characters"));
    }

    Ok(())
}
