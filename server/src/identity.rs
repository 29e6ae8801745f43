//! Caller identity: raw auth identity, then the marketplace profile behind it.

use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::backend::{RpcClient, SessionProvider};
use crate::models::{AuthIdentity, Profile};

pub const PROFILE_PROCEDURE: &str = "profile_for_auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("no marketplace profile for this account")]
    ProfileNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: AuthIdentity,
    pub profile: Profile,
}

pub async fn resolve_caller(
    session: &dyn SessionProvider,
    rpc: &dyn RpcClient,
) -> Result<Caller, IdentityError> {
    let identity = match session.current_identity().await {
        Ok(Some(identity)) => identity,
        Ok(None) => return Err(IdentityError::NotAuthenticated),
        Err(e) => {
            warn!(error = %e, "Identity lookup failed");
            return Err(IdentityError::NotAuthenticated);
        }
    };

    let response = rpc
        .call(PROFILE_PROCEDURE, json!({ "auth_user_id": identity.id }))
        .await
        .map_err(|e| {
            warn!(auth_user_id = %identity.id, error = %e, "Profile lookup failed");
            IdentityError::ProfileNotFound
        })?;

    let profile: Option<Profile> = serde_json::from_value(response).map_err(|e| {
        warn!(auth_user_id = %identity.id, error = %e, "Unreadable profile record");
        IdentityError::ProfileNotFound
    })?;

    match profile {
        Some(profile) => Ok(Caller { identity, profile }),
        None => Err(IdentityError::ProfileNotFound),
    }
}
