use uuid::Uuid;

use crate::{Error, STUB_UUID};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
pub struct ViewerId(pub Uuid);

impl ViewerId {
    pub fn stub() -> ViewerId {
        ViewerId(STUB_UUID)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Viewer {
    pub id: ViewerId,
    pub name: String,
    /// Reference to the avatar picture, hosted elsewhere
    pub avatar: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AuthToken(pub Uuid);

impl AuthToken {
    pub fn stub() -> AuthToken {
        AuthToken(STUB_UUID)
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewSession {
    pub user: String,
    pub password: String,
}

impl NewSession {
    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.user)?;
        crate::validate_string(&self.password)?;
        Ok(())
    }
}

#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
pub struct NewViewer {
    pub id: ViewerId,
    pub name: String,
    pub avatar: Option<String>,
    pub initial_password_hash: String,
}

impl NewViewer {
    pub fn new(
        id: ViewerId,
        name: String,
        avatar: Option<String>,
        initial_password: String,
    ) -> anyhow::Result<NewViewer> {
        Ok(NewViewer {
            id,
            name,
            avatar,
            initial_password_hash: bcrypt::hash(initial_password, bcrypt::DEFAULT_COST)?,
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        crate::validate_string(&self.name)?;
        crate::validate_string(&self.initial_password_hash)?;
        if let Some(avatar) = &self.avatar {
            crate::validate_string(avatar)?;
        }
        if self.name.is_empty() || self.name.chars().any(|c| c == ':' || c.is_whitespace()) {
            return Err(Error::InvalidName(self.name.clone()));
        }
        Ok(())
    }

    pub fn viewer(&self) -> Viewer {
        Viewer {
            id: self.id,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        }
    }
}
