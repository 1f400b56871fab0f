use serde::{Deserialize, Serialize};

/// One uploaded part, ready for the multipart finalize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    /// 1-based part index, matching the chunk plan.
    pub part_number: u32,
    /// ETag returned by the storage backend for this part.
    pub etag: String,
}

/// Payload for the backend's multipart finalize endpoint.
///
/// Parts are kept sorted by part number; the backend requires the
/// ordered list to assemble the remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub handle_id: String,
    pub parts: Vec<CompletedPart>,
}

impl FinalizeRequest {
    /// Builds a finalize request, sorting parts by part number.
    pub fn new(handle_id: impl Into<String>, mut parts: Vec<CompletedPart>) -> Self {
        parts.sort_by_key(|p| p.part_number);
        Self {
            handle_id: handle_id.into(),
            parts,
        }
    }
}
