//! # System Constants
//!
//! Default names and the object key layout shared by the stage actors.

use crate::state_machine::Stage;

/// Default prefix for queue, table and review-loop names
pub const DEFAULT_PREFIX: &str = "docpipe";

/// PostgreSQL table backing the tracking store
pub const DOCUMENTS_TABLE: &str = "docpipe_documents";

/// Attempts of an optimistic read-modify-write before giving up
pub const MAX_VERSION_RETRIES: u32 = 5;

/// Key in a review loop's input that names the document
pub const REVIEW_DOCUMENT_ID_KEY: &str = "documentId";

/// Key in a reviewer's answers holding table classifications
pub const REVIEW_TABLE_TYPES_KEY: &str = "tableTypes";

/// Review loop names are limited by the review service
pub const MAX_REVIEW_LOOP_NAME_LEN: usize = 63;

/// Object keys written by the stage actors
pub mod object_keys {
    use super::Stage;

    pub fn classify_output(document_id: &str) -> String {
        format!("{}/{document_id}.json", Stage::Classify)
    }

    pub fn extract_output(document_id: &str) -> String {
        format!("{}/{document_id}.json", Stage::Extract)
    }

    pub fn operate_output(document_id: &str) -> String {
        format!("{}/{document_id}/review-document.json", Stage::Operate)
    }

    pub fn reshape_output(document_id: &str) -> String {
        format!("{}/{document_id}/review-input.json", Stage::Reshape)
    }

    pub fn catalog_output(document_id: &str) -> String {
        format!("{}/{document_id}.json", Stage::Catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::object_keys;

    #[test]
    fn test_object_key_layout() {
        assert_eq!(object_keys::classify_output("001"), "classify/001.json");
        assert_eq!(
            object_keys::operate_output("001"),
            "operate/001/review-document.json"
        );
        assert_eq!(object_keys::reshape_output("001"), "reshape/001/review-input.json");
    }
}
