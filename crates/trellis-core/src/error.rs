use thiserror::Error;

/// Top-level error type for the trellis object-graph mapper.
///
/// Every failure carries a [`ErrorKind`] so callers can branch on the kind
/// without matching on payloads.
#[derive(Error, Debug)]
pub enum OgmError {
    #[error("Invalid mapping for {entity}: {reason}")]
    Metadata { entity: String, reason: String },

    #[error("Unknown field path \"{path}\" on {entity}")]
    InvalidFieldPath { entity: String, path: String },

    #[error("Malformed query \"{input}\": {reason}")]
    QueryParse { input: String, reason: String },

    #[error("{entity}: required field \"{field}\" is missing")]
    MissingRequiredField { entity: String, field: String },

    #[error("{entity}: related entity in \"{field}\" is not yet persisted")]
    RelatedNotPersisted { entity: String, field: String },

    #[error("A {entity} with the {field} \"{value}\" already exists")]
    DuplicateEntry {
        entity: String,
        field: String,
        value: String,
    },

    #[error("Expected at most one {entity}, found {count}")]
    AmbiguousResult { entity: String, count: usize },

    #[error("No active transaction")]
    NoActiveTransaction,

    #[error("Transaction was aborted by an earlier failure")]
    TransactionAborted,

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Forbidden: role {required} required")]
    Forbidden { required: String },

    #[error("Graph store error: {source}")]
    Graph {
        #[source]
        source: anyhow::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The discriminant of an [`OgmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Metadata,
    InvalidFieldPath,
    QueryParse,
    MissingRequiredField,
    RelatedNotPersisted,
    DuplicateEntry,
    AmbiguousResult,
    NoActiveTransaction,
    TransactionAborted,
    NotAuthorized,
    Forbidden,
    Graph,
    Internal,
}

impl OgmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Metadata { .. } => ErrorKind::Metadata,
            Self::InvalidFieldPath { .. } => ErrorKind::InvalidFieldPath,
            Self::QueryParse { .. } => ErrorKind::QueryParse,
            Self::MissingRequiredField { .. } => ErrorKind::MissingRequiredField,
            Self::RelatedNotPersisted { .. } => ErrorKind::RelatedNotPersisted,
            Self::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            Self::AmbiguousResult { .. } => ErrorKind::AmbiguousResult,
            Self::NoActiveTransaction => ErrorKind::NoActiveTransaction,
            Self::TransactionAborted => ErrorKind::TransactionAborted,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Graph { .. } => ErrorKind::Graph,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Validation and access-control outcomes a caller is expected to handle.
    pub fn is_expected(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidFieldPath
                | ErrorKind::QueryParse
                | ErrorKind::MissingRequiredField
                | ErrorKind::RelatedNotPersisted
                | ErrorKind::DuplicateEntry
                | ErrorKind::AmbiguousResult
                | ErrorKind::NotAuthorized
                | ErrorKind::Forbidden
        )
    }

    /// Message safe to hand to an outer caller such as a REST layer.
    pub fn public_message(&self) -> String {
        if self.is_expected() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        }
    }

    /// Log the error according to its class: expected failures stay terse,
    /// everything else is logged with full detail.
    pub fn report(&self) {
        if self.is_expected() {
            tracing::debug!(kind = ?self.kind(), "{self}");
        } else {
            tracing::error!(kind = ?self.kind(), error = ?self, "{self}");
        }
    }

    pub fn graph(source: impl Into<anyhow::Error>) -> Self {
        Self::Graph {
            source: source.into(),
        }
    }

    pub fn metadata(entity: &str, reason: impl Into<String>) -> Self {
        Self::Metadata {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub fn query_parse(input: &str, reason: impl Into<String>) -> Self {
        Self::QueryParse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_path(entity: &str, path: impl Into<String>) -> Self {
        Self::InvalidFieldPath {
            entity: entity.to_string(),
            path: path.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OgmError>;
