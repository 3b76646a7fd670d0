//! Attachment chunking
//!
//! Webhook executions carry at most `limit` bytes of files. Larger sets are
//! split greedily, in order, into groups that each fit under the limit.

use serde::{Deserialize, Serialize};

pub const DEFAULT_UPLOAD_LIMIT: u64 = 8 * 1024 * 1024;

/// An externally hosted file to re-upload with the proxied message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    /// Declared size in bytes
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("attachment {filename} is {size} bytes, the upload limit is {limit} bytes")]
pub struct AttachmentTooLarge {
    pub filename: String,
    pub size: u64,
    pub limit: u64,
}

/// Split attachments into ordered groups whose total size stays below `limit`.
///
/// Fails if any single attachment is at or above the limit. Empty input
/// gives no groups.
pub fn chunk_attachments(
    attachments: &[Attachment],
    limit: u64,
) -> Result<Vec<Vec<Attachment>>, AttachmentTooLarge> {
    let mut chunks = Vec::new();
    let mut current: Vec<Attachment> = Vec::new();
    let mut current_size = 0u64;

    for attachment in attachments {
        if attachment.size >= limit {
            return Err(AttachmentTooLarge {
                filename: attachment.filename.clone(),
                size: attachment.size,
                limit,
            });
        }

        if !current.is_empty() && current_size.saturating_add(attachment.size) >= limit {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }

        current_size = current_size.saturating_add(attachment.size);
        current.push(attachment.clone());
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}
