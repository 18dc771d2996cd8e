use crate::query::Aggregator;

/// Errors raised while resolving an X-Pick, a KPI or a legend breakdown.
///
/// None of these escape the evaluator: every call site matches on them and
/// takes a named fallback (alternate strategy, zero, unmodified predicate,
/// single-value path).
///
/// # Examples
///
/// ```rust
/// use vigil_alert::error::ResolveError;
///
/// let err = ResolveError::EmptyResult("sales".to_string());
/// assert!(err.to_string().contains("sales"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The external query engine rejected or failed the request.
    #[error("Resolve: query engine failed for source '{source_name}': {message}")]
    Query {
        source_name: String,
        message: String,
    },

    /// The query succeeded but returned nothing usable.
    #[error("Resolve: query on '{0}' returned no usable rows")]
    EmptyResult(String),

    /// Per-row pivot totals cannot be folded into one value for this aggregator.
    #[error("Resolve: aggregator '{0}' cannot be combined across window rows")]
    NotCombinable(Aggregator),

    /// The x-pick mode needs a dimension field and none was configured.
    #[error("Resolve: x-pick mode '{0}' requires an x field")]
    MissingDimension(&'static str),
}

impl ResolveError {
    pub(crate) fn query(source_name: &str, err: anyhow::Error) -> Self {
        ResolveError::Query {
            source_name: source_name.to_string(),
            message: format!("{err:#}"),
        }
    }
}

/// Convenience `Result` alias for resolution stages.
pub type Result<T> = std::result::Result<T, ResolveError>;
