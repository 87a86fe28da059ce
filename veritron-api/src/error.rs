use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde_json::json;
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Permission denied")]
    PermissionDenied,

    #[error("Authentication required")]
    AuthRequired,

    #[error("Item not found {0}")]
    NotFound(Uuid),

    #[error("Comment text is empty")]
    EmptyComment,

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),

    #[error("Invalid character in name {0:?}")]
    InvalidName(String),

    #[error("Uuid already used {0}")]
    UuidAlreadyUsed(Uuid),

    #[error("Name already used {0}")]
    NameAlreadyUsed(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::AuthRequired => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::EmptyComment => StatusCode::BAD_REQUEST,
            Error::NullByteInString(_) => StatusCode::BAD_REQUEST,
            Error::InvalidName(_) => StatusCode::BAD_REQUEST,
            Error::UuidAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::NameAlreadyUsed(_) => StatusCode::CONFLICT,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Validation failures are the errors that were raised before any store got touched
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::EmptyComment | Error::NullByteInString(_) | Error::InvalidName(_)
        )
    }

    pub fn contents(&self) -> Vec<u8> {
        serde_json::to_vec(&match self {
            Error::PermissionDenied => json!({
                "message": "permission denied",
                "type": "permission-denied",
            }),
            Error::AuthRequired => json!({
                "message": "authentication required",
                "type": "auth-required",
            }),
            Error::NotFound(id) => json!({
                "message": "item not found",
                "type": "not-found",
                "id": id,
            }),
            Error::EmptyComment => json!({
                "message": "comment text is empty",
                "type": "empty-comment",
            }),
            Error::NullByteInString(s) => json!({
                "message": "there was a null byte in argument string",
                "type": "null-byte",
                "string": s,
            }),
            Error::InvalidName(n) => json!({
                "message": "there was an invalid character in a viewer name",
                "type": "invalid-name",
                "name": n,
            }),
            Error::UuidAlreadyUsed(u) => json!({
                "message": "uuid conflict",
                "type": "conflict-uuid",
                "uuid": u,
            }),
            Error::NameAlreadyUsed(n) => json!({
                "message": "name already used",
                "type": "conflict-name",
                "name": n,
            }),
            Error::StoreUnavailable(msg) => json!({
                "message": msg,
                "type": "store-unavailable",
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let str_field = |field: &str| data.get(field).and_then(|f| f.as_str());
        let uuid_field = |field: &str| str_field(field).and_then(|u| Uuid::from_str(u).ok());
        Ok(
            match str_field("type").ok_or_else(|| anyhow!("error type is not a string"))? {
                "permission-denied" => Error::PermissionDenied,
                "auth-required" => Error::AuthRequired,
                "not-found" => Error::NotFound(
                    uuid_field("id")
                        .ok_or_else(|| anyhow!("error is a not-found without a proper id"))?,
                ),
                "empty-comment" => Error::EmptyComment,
                "null-byte" => Error::NullByteInString(String::from(
                    str_field("string").ok_or_else(|| {
                        anyhow!("error is a null-byte-in-string without a string")
                    })?,
                )),
                "invalid-name" => Error::InvalidName(String::from(
                    str_field("name").ok_or_else(|| {
                        anyhow!("error is about an invalid name but no name was provided")
                    })?,
                )),
                "conflict-uuid" => Error::UuidAlreadyUsed(
                    uuid_field("uuid")
                        .ok_or_else(|| anyhow!("error is a uuid conflict without a proper uuid"))?,
                ),
                "conflict-name" => Error::NameAlreadyUsed(String::from(
                    str_field("name")
                        .ok_or_else(|| anyhow!("error is a name conflict without a name"))?,
                )),
                "store-unavailable" => {
                    Error::StoreUnavailable(String::from(str_field("message").unwrap_or("")))
                }
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_bodies() {
        assert_eq!(
            Error::parse(br#"{"type":"auth-required","message":"authentication required"}"#)
                .unwrap(),
            Error::AuthRequired
        );
        assert_eq!(
            Error::parse(
                br#"{"type":"not-found","id":"ffffffff-ffff-ffff-ffff-ffffffffffff"}"#
            )
            .unwrap(),
            Error::NotFound(crate::STUB_UUID)
        );
        // a not-found without its id is malformed
        assert!(Error::parse(br#"{"type":"not-found"}"#).is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(Error::parse(br#"{"type":"teapot"}"#).is_err());
        assert!(Error::parse(b"not json").is_err());
    }

    #[test]
    fn taxonomy_status_codes() {
        assert_eq!(Error::AuthRequired.status_code(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::NotFound(Uuid::new_v4()).status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert!(Error::EmptyComment.is_validation());
        assert!(!Error::AuthRequired.is_validation());
    }
}
