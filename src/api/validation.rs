use thiserror::Error;

use super::models::JobListQuery;
use crate::job::{JobFilter, JobState};

/// Largest page a listing may ask for
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryValidationError {
    #[error("unknown state filter '{0}', expected pending, running, done, failed or canceled")]
    UnknownState(String),
    #[error("limit must be between 1 and {MAX_LIST_LIMIT}")]
    InvalidLimit,
}

pub fn job_filter(query: &JobListQuery) -> Result<JobFilter, QueryValidationError> {
    let state = match query.state.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<JobState>()
                .map_err(|_| QueryValidationError::UnknownState(raw.to_string()))?,
        ),
    };

    if let Some(limit) = query.limit {
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(QueryValidationError::InvalidLimit);
        }
    }

    Ok(JobFilter {
        state,
        limit: query.limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_matches_everything() {
        let filter = job_filter(&JobListQuery::default()).unwrap();
        assert!(filter.state.is_none());
        assert!(filter.limit.is_none());
    }

    #[test]
    fn test_state_filter() {
        let query = JobListQuery {
            state: Some("Running".to_string()),
            limit: Some(10),
        };
        let filter = job_filter(&query).unwrap();
        assert_eq!(filter.state, Some(JobState::Running));
        assert_eq!(filter.limit, Some(10));
    }

    #[test]
    fn test_rejects_unknown_state() {
        let query = JobListQuery {
            state: Some("paused".to_string()),
            limit: None,
        };
        assert_eq!(
            job_filter(&query).unwrap_err(),
            QueryValidationError::UnknownState("paused".to_string())
        );
    }

    #[test]
    fn test_rejects_zero_limit() {
        let query = JobListQuery {
            state: None,
            limit: Some(0),
        };
        assert_eq!(job_filter(&query).unwrap_err(), QueryValidationError::InvalidLimit);
    }
}
