use thiserror::Error;

/// Errors raised while turning a request into a query plan.
///
/// Every variant is scoped to the request that produced it. Nothing here is
/// transient, so callers surface these instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("unknown field path `{path}`: {reason}")]
    InvalidFieldPath { path: String, reason: String },

    #[error("join alias `{alias}` is produced by both `{first}` and `{second}`")]
    AmbiguousJoin {
        alias: String,
        first: String,
        second: String,
    },

    #[error(
        "cannot paginate a flat result that crosses `{relation}`: select the distinct \
         root identifiers for the page first, then re-fetch joined attributes for those \
         identifiers only"
    )]
    UnsafePagination { relation: String },

    #[error("`{path}` ({field_type}) cannot be compared with {comparator}: {reason}")]
    IncompatibleValue {
        path: String,
        field_type: String,
        comparator: String,
        reason: String,
    },

    #[error("`{path}` is projected but relation `{relation}` was not declared in the join path")]
    UndeclaredJoin { path: String, relation: String },

    #[error("sort key `{path}` lies beyond collection relation `{relation}`")]
    CollectionSortKey { path: String, relation: String },

    #[error("projection must name at least one field")]
    EmptyProjection,

    #[error("invalid page request: {0}")]
    InvalidPage(String),

    #[error("column `{0}` is missing from the result set")]
    MissingColumn(String),

    #[error("invalid schema: {0}")]
    Schema(String),
}

impl SpecError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        SpecError::InvalidFieldPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsafe_pagination_message_carries_guidance() {
        let err = SpecError::UnsafePagination {
            relation: "roles".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("roles"));
        assert!(msg.contains("distinct root identifiers"));
    }

    #[test]
    fn test_invalid_path_helper() {
        let err = SpecError::invalid_path("roles.nope", "no field `nope` on Role");
        assert_eq!(
            err.to_string(),
            "unknown field path `roles.nope`: no field `nope` on Role"
        );
    }
}
