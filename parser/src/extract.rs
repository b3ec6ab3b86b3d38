use common::model::frame::BinaryType;
use common::model::task::Task;
use std::collections::HashMap;

/// What one parse pass produced: named field values plus raw candidate
/// links, before normalization and filtering.
#[derive(Debug, Default)]
pub struct Extraction {
    pub fields: HashMap<String, serde_json::Value>,
    pub links: Vec<String>,
}

/// External extraction collaborator. The server hands it the task (for
/// its rules and context) and the downloaded body; everything the
/// implementation returns in `links` goes through normalization,
/// depth/domain filtering and re-admission.
pub trait Extractor: Send + Sync {
    fn extract(&self, task: &Task, data: &[u8], binary_type: BinaryType) -> Extraction;
}

/// Extractor that finds nothing. Useful for download-only pipelines.
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    fn extract(&self, _task: &Task, _data: &[u8], _binary_type: BinaryType) -> Extraction {
        Extraction::default()
    }
}
