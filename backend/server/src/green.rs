//! Green tracking counters kept on the user document.
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    documents::{Document, key_of, sub_key},
    error::AppError,
    models::User,
    repository::{CARBON, Repository},
    store::WriteBatch,
    utils::{parse_number, parse_steps},
};

pub const USER_STEPS: &str = "user_steps";
pub const PUBLIC_TRIPS: &str = "public_trips";
pub const INVESTED: &str = "invested";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepsUpdate {
    #[serde(default)]
    pub steps_to_add: Option<Value>,
}

/// `None` only when the component is absent from the body. An explicit `null` sets it to 0.
#[derive(Debug, Default, Deserialize)]
pub struct CarbonUpdate {
    #[serde(default, deserialize_with = "provided")]
    pub travel: Option<Value>,
    #[serde(default, deserialize_with = "provided")]
    pub electricity: Option<Value>,
    #[serde(default, deserialize_with = "provided")]
    pub gas: Option<Value>,
}

fn provided<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Adds one to a user counter, returning the updated user.
pub async fn bump(repo: &Repository, user_id: &str, counter: &str) -> Result<User, AppError> {
    add(repo, user_id, counter, 1).await
}

pub async fn add_steps(
    repo: &Repository,
    user_id: &str,
    update: &StepsUpdate,
) -> Result<User, AppError> {
    add(repo, user_id, USER_STEPS, parse_steps(update.steps_to_add.as_ref())).await
}

async fn add(repo: &Repository, user_id: &str, counter: &str, delta: i64) -> Result<User, AppError> {
    // Existence check first so a missing user is not created by the increment.
    repo.user(user_id).await?;

    repo.store()
        .increment(&key_of::<User>(user_id), counter, delta)
        .await?;

    repo.user(user_id).await
}

/// Overwrites the provided components, leaving the others untouched.
pub async fn set_carbon_footprint(
    repo: &Repository,
    user_id: &str,
    update: &CarbonUpdate,
) -> Result<User, AppError> {
    repo.user(user_id).await?;

    let mut fields = Vec::new();
    for (name, value) in [
        ("travel", &update.travel),
        ("electricity", &update.electricity),
        ("gas", &update.gas),
    ] {
        let Some(value) = value else {
            continue;
        };

        let number = parse_number(value)
            .ok_or_else(|| AppError::Validation(format!("{name} must be a number")))?;
        fields.push((name.to_string(), number.to_string()));
    }

    let mut batch = WriteBatch::new();
    batch.put_fields(sub_key(User::COLLECTION, user_id, CARBON), fields);
    repo.store().commit(batch).await?;

    repo.user(user_id).await
}
