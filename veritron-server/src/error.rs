use veritron_api::Error as ApiError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }

    pub fn auth_required() -> Error {
        Error::Api(ApiError::AuthRequired)
    }
}

impl From<veritron_core::Error> for Error {
    fn from(e: veritron_core::Error) -> Error {
        match e {
            veritron_core::Error::Store(e) => Error::Anyhow(e),
            veritron_core::Error::Api(e) => Error::Api(e),
        }
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let err = match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "store error");
                #[cfg(not(test))]
                let err = ApiError::StoreUnavailable(String::from(
                    "Internal server error, see logs for details",
                ));
                #[cfg(test)]
                let err = ApiError::StoreUnavailable(format!("Internal server error: {err:?}"));
                err
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                err
            }
        };
        (err.status_code(), err.contents()).into_response()
    }
}
