//! # Refund Settlement
//!
//! Returns every investor's stake in a project and resets the project.
//!
//! 1. Project looked up by name, refused when nothing has been raised
//! 2. Each investor in the project's investor set gets their investment entry for the project back
//!    on `totFunds`, and the entry is removed
//! 3. Raised amount set to 0, investor set cleared
//!
//! Steps 2 and 3 are one [`WriteBatch`]. A settled project has raised amount 0, so running it again
//! is refused before anything is written.
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    documents::{Document, key_of, sub_key},
    error::AppError,
    ledger::{ProjectLocks, RAISED_AMOUNT, TOT_FUNDS},
    models::{Investor, Project},
    repository::{INVESTMENTS, INVESTORS, Repository},
    store::WriteBatch,
};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Refund {
    pub investor: String,
    pub name: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub project: String,
    pub raised_amount: i64,
    pub total_refunded: i64,
    pub refunds: Vec<Refund>,
}

/// Builds the settlement for `project` without writing anything.
pub async fn plan(
    repo: &Repository,
    project: &Project,
) -> Result<(Settlement, WriteBatch), AppError> {
    if project.raised_amount == 0 {
        return Err(AppError::InvalidState("No funds to refund".to_string()));
    }

    let mut batch = WriteBatch::new();
    let mut refunds = Vec::with_capacity(project.investors.len());

    for investor_id in &project.investors {
        let Some(investor) = repo.investor(investor_id).await? else {
            warn!(
                "Project {} references missing investor {investor_id}",
                project.name
            );
            continue;
        };

        let amount = investor.invested_in(&project.id);
        batch
            .increment(key_of::<Investor>(&investor.id), TOT_FUNDS, amount)
            .remove_field(
                sub_key(Investor::COLLECTION, &investor.id, INVESTMENTS),
                project.id.as_str(),
            );

        refunds.push(Refund {
            investor: investor.id,
            name: investor.name,
            amount,
        });
    }

    batch
        .put_field(key_of::<Project>(&project.id), RAISED_AMOUNT, "0")
        .delete(sub_key(Project::COLLECTION, &project.id, INVESTORS));

    let total_refunded: i64 = refunds.iter().map(|refund| refund.amount).sum();
    if total_refunded != project.raised_amount {
        warn!(
            "Project {} raised {} but investments only cover {total_refunded}",
            project.name, project.raised_amount
        );
    }

    Ok((
        Settlement {
            project: project.name.clone(),
            raised_amount: project.raised_amount,
            total_refunded,
            refunds,
        },
        batch,
    ))
}

pub async fn settle(
    repo: &Repository,
    locks: &ProjectLocks,
    project_name: &str,
) -> Result<Settlement, AppError> {
    let project = repo.project_by_name(project_name).await?;

    let _guard = locks.acquire(&project.id).await;

    // Re-read under the lock, a funding may have landed while waiting.
    let project = repo
        .project(&project.id)
        .await?
        .ok_or_else(|| AppError::not_found("Project"))?;

    let (settlement, batch) = plan(repo, &project).await?;
    repo.store().commit(batch).await?;

    info!(
        "Refunded {} to {} investors of {}",
        settlement.total_refunded,
        settlement.refunds.len(),
        settlement.project
    );

    Ok(settlement)
}
