use crate::api::{Error as ApiError, ItemId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure reaching a store or its feed, never retried by the core
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn not_found(item: ItemId) -> Error {
        Error::Api(ApiError::NotFound(item.0))
    }

    pub fn auth_required() -> Error {
        Error::Api(ApiError::AuthRequired)
    }

    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Error::Store(_) => None,
            Error::Api(e) => Some(e),
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_))
    }
}
