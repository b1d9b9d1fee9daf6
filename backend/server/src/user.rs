//! # Users
//!
//! There is no login. Requests name their user with the `x-user-id` header, anything without it acts
//! as the demo user provisioned at startup.
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::state::State;

pub const USER_HEADER: &str = "x-user-id";

pub struct UserContext {
    pub user_id: String,
}

impl FromRequestParts<Arc<State>> for UserContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| state.config.demo_user_id.clone(), str::to_string);

        Ok(Self { user_id })
    }
}
