pub mod extractor;

pub use extractor::{
    from_config, ExtractedEntity, ExtractedRelationship, ExtractionResult, Extractor,
    FakeExtractor, LlmExtractor,
};
