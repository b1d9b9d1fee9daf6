use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::info;

use crate::{
    bills::{AnalyzeRequest, analyze_bills},
    error::AppError,
    feedback::Feedback,
    green::{CarbonUpdate, INVESTED, PUBLIC_TRIPS, StepsUpdate, add_steps, bump, set_carbon_footprint},
    ledger::{FundRequest, fund, register_investor},
    refund::settle,
    repository::{NewFounder, NewInvestor, NewMeeting, NewProject},
    state::State as AppState,
    user::UserContext,
    utils::Payload,
};

type Shared = State<Arc<AppState>>;

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "message": "Server is running" }))
}

// Projects

pub async fn create_project_handler(
    State(state): Shared,
    Payload(draft): Payload<NewProject>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.repo.create_project(draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "project": project, "message": "Project created and added to founder" })),
    ))
}

pub async fn project_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let project = state.repo.project_by_name(&name).await?;

    Ok(Json(json!({ "project": project })))
}

pub async fn all_projects_handler(State(state): Shared) -> Result<impl IntoResponse, AppError> {
    let projects = state.repo.projects().await?;

    Ok(Json(json!({ "projects": projects })))
}

pub async fn fund_handler(
    State(state): Shared,
    Payload(request): Payload<FundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let project = fund(&state.repo, &state.locks, &request).await?;

    Ok(Json(json!({ "message": "Funding successful", "project": project })))
}

pub async fn like_handler(
    State(state): Shared,
    Path((name, phase)): Path<(String, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.feedback.record(&name, phase, Feedback::Like).await?;

    Ok(Json(outcome))
}

pub async fn dislike_handler(
    State(state): Shared,
    Path((name, phase)): Path<(String, usize)>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.feedback.record(&name, phase, Feedback::Dislike).await?;

    Ok(Json(outcome))
}

pub async fn refund_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let settlement = settle(&state.repo, &state.locks, &name).await?;

    Ok(Json(json!({
        "message": "Refunds processed successfully",
        "settlement": settlement,
    })))
}

// Founders, investors and meetings

pub async fn create_founder_handler(
    State(state): Shared,
    Payload(draft): Payload<NewFounder>,
) -> Result<impl IntoResponse, AppError> {
    let founder = state.repo.create_founder(draft).await?;

    Ok((StatusCode::CREATED, Json(json!({ "founder": founder }))))
}

pub async fn founder_handler(
    State(state): Shared,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let founder = state.repo.founder_profile(&name).await?;

    Ok(Json(json!({ "founder": founder })))
}

pub async fn create_investor_handler(
    State(state): Shared,
    Payload(draft): Payload<NewInvestor>,
) -> Result<impl IntoResponse, AppError> {
    let investor = register_investor(&state.repo, &state.locks, draft).await?;

    Ok((StatusCode::CREATED, Json(json!({ "investor": investor }))))
}

pub async fn investor_handler(
    State(state): Shared,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let investor = state.repo.investor_by_key(&key).await?;

    Ok(Json(json!({ "investor": investor })))
}

pub async fn investor_by_id_handler(
    State(state): Shared,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let investor = state.repo.investor_by_id(&id).await?;

    Ok(Json(json!({ "investor": investor })))
}

pub async fn create_meeting_handler(
    State(state): Shared,
    Payload(draft): Payload<NewMeeting>,
) -> Result<impl IntoResponse, AppError> {
    let meeting = state.repo.create_meeting(draft).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "meeting": meeting,
            "message": "Meeting created successfully and linked to founder",
        })),
    ))
}

// Users

pub async fn analyze_bills_handler(
    State(state): Shared,
    user: UserContext,
    Payload(request): Payload<AnalyzeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let results = analyze_bills(
        &state.repo,
        state.analyzer.as_ref(),
        &user.user_id,
        request,
    )
    .await?;

    Ok(Json(results))
}

pub async fn increment_invested_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = bump(&state.repo, &user.user_id, INVESTED).await?;

    Ok(Json(json!({ "message": "Investment incremented", "user": user })))
}

pub async fn increment_trips_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = bump(&state.repo, &user.user_id, PUBLIC_TRIPS).await?;

    Ok(Json(json!({ "message": "Public trip recorded", "user": user })))
}

pub async fn invested_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.repo.user(&user.user_id).await?;

    Ok(Json(json!({ "investedProjectsCount": user.invested })))
}

pub async fn steps_count_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.repo.user(&user.user_id).await?;

    Ok(Json(json!({ "stepsCount": user.user_steps })))
}

pub async fn trips_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.repo.user(&user.user_id).await?;

    Ok(Json(json!({ "public_trips": user.public_trips })))
}

// Green tracking

pub async fn update_steps_handler(
    State(state): Shared,
    user: UserContext,
    Payload(update): Payload<StepsUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let user = add_steps(&state.repo, &user.user_id, &update).await?;

    info!("User {} now has {} steps", user.id, user.user_steps);

    Ok(Json(json!({
        "message": "User steps updated successfully",
        "user": { "userId": user.id, "steps": user.user_steps, "name": user.name },
    })))
}

pub async fn update_carbon_handler(
    State(state): Shared,
    user: UserContext,
    Payload(update): Payload<CarbonUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let user = set_carbon_footprint(&state.repo, &user.user_id, &update).await?;

    Ok(Json(json!({
        "message": "Carbon footprint updated successfully",
        "user": {
            "userId": user.id,
            "carbonFootprint": user.carbon_footprint,
            "name": user.name,
        },
    })))
}

pub async fn steps_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.repo.user(&user.user_id).await?;

    Ok(Json(json!({ "steps": user.user_steps })))
}

pub async fn carbon_handler(
    State(state): Shared,
    user: UserContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.repo.user(&user.user_id).await?;

    Ok(Json(json!({ "carbonFootprint": user.carbon_footprint })))
}
