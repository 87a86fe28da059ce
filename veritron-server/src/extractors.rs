use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{self, request, HeaderValue},
};
use veritron_api::{AuthToken, Uuid, Viewer};
use veritron_core::Service;

use crate::Error;

#[derive(Clone, axum::extract::FromRef)]
pub struct AppState {
    pub service: Service,
    pub admin_token: Option<AuthToken>,
}

fn parse_bearer(auth: &HeaderValue) -> Result<AuthToken, Error> {
    let auth = auth.to_str().map_err(|_| Error::permission_denied())?;
    let mut auth = auth.split(' ');
    if !auth
        .next()
        .ok_or(Error::permission_denied())?
        .eq_ignore_ascii_case("bearer")
    {
        return Err(Error::permission_denied());
    }
    let token = auth.next().ok_or(Error::permission_denied())?;
    if auth.next().is_some() {
        return Err(Error::permission_denied());
    }
    let token = Uuid::try_from(token).map_err(|_| Error::permission_denied())?;
    Ok(AuthToken(token))
}

/// The bearer token of the request, not checked against any session yet
pub struct PreAuth(pub AuthToken);

#[async_trait]
impl<S: Sync> FromRequestParts<S> for PreAuth {
    type Rejection = Error;

    async fn from_request_parts(req: &mut request::Parts, _state: &S) -> Result<PreAuth, Error> {
        match req.headers.get(http::header::AUTHORIZATION) {
            None => Err(Error::auth_required()),
            Some(auth) => Ok(PreAuth(parse_bearer(auth)?)),
        }
    }
}

/// The viewer behind the request, `None` for anonymous requests. A token that
/// matches no session is refused rather than treated as anonymous.
pub struct MaybeViewer(pub Option<Viewer>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeViewer {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<MaybeViewer, Error> {
        let token = match req.headers.get(http::header::AUTHORIZATION) {
            None => return Ok(MaybeViewer(None)),
            Some(auth) => parse_bearer(auth)?,
        };
        match state.service.current_viewer(Some(token)).await? {
            Some(viewer) => Ok(MaybeViewer(Some(viewer))),
            None => Err(Error::permission_denied()),
        }
    }
}

pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = Error;

    async fn from_request_parts(
        req: &mut request::Parts,
        state: &AppState,
    ) -> Result<AdminAuth, Error> {
        let token = PreAuth::from_request_parts(req, state).await?.0;
        if Some(token) == state.admin_token {
            Ok(AdminAuth)
        } else {
            Err(Error::permission_denied())
        }
    }
}
