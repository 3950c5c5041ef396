use serde::{Deserialize, Serialize};
use thiserror::Error;

const fn default_limit() -> usize {
    10
}

/// Parameters for the tri-hybrid search leg (§4.2). Deliberately smaller
/// than the teacher's `QueryRequest`: this domain has one search
/// algorithm, not a mode-selected family, so there is no `search_mode`/
/// `mode`/`model_id`/`snapshot_id` to carry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub date_from: Option<String>,
    #[serde(default)]
    pub date_to: Option<String>,
    /// When present, seeds the graph leg directly, rebuilds the keyword
    /// leg from these names joined by spaces, and post-filters the vector
    /// leg to hits whose content contains one of them (§4.2).
    #[serde(default)]
    pub entities: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            date_from: None,
            date_to: None,
            entities: None,
        }
    }

    pub fn validate(&self) -> Result<(), SearchValidationError> {
        if self.query.trim().is_empty() {
            return Err(SearchValidationError::EmptyQuery);
        }
        if self.limit == 0 {
            return Err(SearchValidationError::ZeroLimit);
        }
        if let (Some(from), Some(to)) = (&self.date_from, &self.date_to) {
            if from > to {
                return Err(SearchValidationError::InvalidDateRange);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SearchValidationError {
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("limit must be greater than zero")]
    ZeroLimit,
    #[error("date_from must be <= date_to")]
    InvalidDateRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_rejected() {
        let request = SearchRequest::new("   ");
        assert_eq!(request.validate(), Err(SearchValidationError::EmptyQuery));
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let mut request = SearchRequest::new("hello");
        request.date_from = Some("2024-02-01".to_string());
        request.date_to = Some("2024-01-01".to_string());
        assert_eq!(
            request.validate(),
            Err(SearchValidationError::InvalidDateRange)
        );
    }
}
