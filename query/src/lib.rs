pub mod dsl;
pub mod engine;
pub mod graphsearch;

pub use dsl::{SearchRequest, SearchValidationError};
pub use engine::{
    EntityNode, Engine, ExplainResponse, ListDatesResponse, ListEntitiesResponse, QueryError,
    RecallResponse, RelationshipEdge, SearchHit, SearchResponse, TimelineEntry, TimelineResponse,
};
pub use storage::keyword::TimelineSort;
