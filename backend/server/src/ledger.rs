//! # Funding Ledger
//!
//! Raised amounts only ever move through atomic field increments, never read-modify-write.
//!
//! ## Attribution
//!
//! - `fund` without an investor adds to `raisedAmount` alone, the way the mobile client has always
//!   called it. No investment entry exists for that money, so a later refund cannot return it.
//! - `fund` with an investor commits one batch: raised amount, project investor set, the investor's
//!   investment entry for the project and the investor's `totFunds` balance.
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::{
    documents::{Document, doc_key, key_of, sub_key},
    error::AppError,
    models::{Investor, Project},
    repository::{INVESTMENTS, INVESTORS, NewInvestor, Repository},
    store::{Store, WriteBatch},
};

pub const RAISED_AMOUNT: &str = "raisedAmount";
pub const TOT_FUNDS: &str = "totFunds";

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically adds `delta` to an integer field of one document, returning the new value.
    async fn apply_delta(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> anyhow::Result<i64>;
}

#[async_trait]
impl<S> Ledger for S
where
    S: Store + ?Sized,
{
    async fn apply_delta(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> anyhow::Result<i64> {
        self.increment(&doc_key(collection, id), field, delta).await
    }
}

/// Per-project async locks. Funding and settlement of one project never interleave inside this
/// process.
#[derive(Clone, Default)]
pub struct ProjectLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(project_id.to_string())
            .or_default()
            .value()
            .clone();

        lock.lock_owned().await
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundRequest {
    #[serde(default)]
    pub proj_name: String,
    pub fund_amt: i64,
    #[serde(default)]
    pub investor_name: Option<String>,
}

pub async fn fund(
    repo: &Repository,
    locks: &ProjectLocks,
    request: &FundRequest,
) -> Result<Project, AppError> {
    let project = repo.project_by_name(&request.proj_name).await?;
    let investor = match request.investor_name.as_deref() {
        Some(name) if !name.trim().is_empty() => Some(repo.investor_by_name(name).await?),
        _ => None,
    };

    let _guard = locks.acquire(&project.id).await;

    match investor {
        Some(investor) => {
            repo.store()
                .commit(attributed_funding(&project, &investor, request.fund_amt))
                .await?;

            info!(
                "Investor {} funded {} with {}",
                investor.name, project.name, request.fund_amt
            );
        }
        None => {
            let raised = repo
                .store()
                .apply_delta(Project::COLLECTION, &project.id, RAISED_AMOUNT, request.fund_amt)
                .await?;

            warn!(
                "Unattributed funding of {} on {}, raised amount now {raised}",
                request.fund_amt, project.name
            );
        }
    }

    repo.project(&project.id)
        .await?
        .ok_or_else(|| AppError::not_found("Project"))
}

/// Creates an investor whose seeded investments land on their projects while those projects are
/// locked, so a settlement in flight cannot miss them.
pub async fn register_investor(
    repo: &Repository,
    locks: &ProjectLocks,
    draft: NewInvestor,
) -> Result<Investor, AppError> {
    let mut project_ids: Vec<String> = draft
        .investments
        .iter()
        .map(|investment| investment.project.clone())
        .collect();
    project_ids.sort();
    project_ids.dedup();

    // Sorted acquisition keeps two registrations from deadlocking.
    let mut guards = Vec::with_capacity(project_ids.len());
    for id in &project_ids {
        guards.push(locks.acquire(id).await);
    }

    repo.create_investor(draft).await
}

fn attributed_funding(project: &Project, investor: &Investor, amount: i64) -> WriteBatch {
    let mut batch = WriteBatch::new();
    batch
        .increment(key_of::<Project>(&project.id), RAISED_AMOUNT, amount)
        .add_member(
            sub_key(Project::COLLECTION, &project.id, INVESTORS),
            investor.id.as_str(),
        )
        .increment(
            sub_key(Investor::COLLECTION, &investor.id, INVESTMENTS),
            project.id.as_str(),
            amount,
        )
        .increment(key_of::<Investor>(&investor.id), TOT_FUNDS, -amount);

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryStore,
        repository::{NewFounder, NewInvestor, NewProject},
    };

    async fn seeded(raised: i64) -> Repository {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();
        repo.create_project(NewProject {
            founder_name: "Mira".into(),
            name: "Hydro".into(),
            short_description: String::new(),
            description: String::new(),
            industry: String::new(),
            image_uri: String::new(),
            funding_goal: 10_000,
            raised_amount: raised,
            investors: Vec::new(),
            sustainability_score: 0.0,
            trust_score: 0.0,
            progress: None,
        })
        .await
        .unwrap();
        repo.create_investor(NewInvestor {
            name: "Asha".into(),
            tot_funds: 1000,
            investments: Vec::new(),
        })
        .await
        .unwrap();
        repo
    }

    fn request(amount: i64, investor: Option<&str>) -> FundRequest {
        FundRequest {
            proj_name: "Hydro".into(),
            fund_amt: amount,
            investor_name: investor.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_fund_adds_to_raised_amount() {
        let repo = seeded(200).await;

        let project = fund(&repo, &ProjectLocks::new(), &request(500, None))
            .await
            .unwrap();

        assert_eq!(project.raised_amount, 700);
        assert!(project.investors.is_empty());
    }

    #[tokio::test]
    async fn test_fund_missing_project_changes_nothing() {
        let repo = seeded(200).await;

        let err = fund(
            &repo,
            &ProjectLocks::new(),
            &FundRequest {
                proj_name: "Solar".into(),
                fund_amt: 500,
                investor_name: Some("Asha".into()),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(repo.project_by_name("Hydro").await.unwrap().raised_amount, 200);
        assert_eq!(repo.investor_by_name("Asha").await.unwrap().tot_funds, 1000);
    }

    #[tokio::test]
    async fn test_attributed_funding_records_investment() {
        let repo = seeded(0).await;
        let locks = ProjectLocks::new();

        fund(&repo, &locks, &request(300, Some("Asha"))).await.unwrap();
        let project = fund(&repo, &locks, &request(100, Some("Asha"))).await.unwrap();

        let investor = repo.investor_by_name("Asha").await.unwrap();
        assert_eq!(project.raised_amount, 400);
        assert_eq!(project.investors, vec![investor.id.clone()]);
        assert_eq!(investor.investments.len(), 1);
        assert_eq!(investor.invested_in(&project.id), 400);
        assert_eq!(investor.tot_funds, 600);
    }

    #[tokio::test]
    async fn test_unknown_investor_is_not_found() {
        let repo = seeded(0).await;

        let err = fund(&repo, &ProjectLocks::new(), &request(300, Some("Ghost")))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Investor not found");
        assert_eq!(repo.project_by_name("Hydro").await.unwrap().raised_amount, 0);
    }

    #[tokio::test]
    async fn test_concurrent_funding_loses_nothing() {
        let repo = seeded(0).await;
        let locks = ProjectLocks::new();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let repo = repo.clone();
            let locks = locks.clone();
            handles.push(tokio::spawn(async move {
                fund(&repo, &locks, &request(5, None)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(repo.project_by_name("Hydro").await.unwrap().raised_amount, 100);
    }

    #[tokio::test]
    async fn test_apply_delta_returns_new_value() {
        let store = MemoryStore::new();

        assert_eq!(store.apply_delta("project", "p1", RAISED_AMOUNT, 40).await.unwrap(), 40);
        assert_eq!(store.apply_delta("project", "p1", RAISED_AMOUNT, 2).await.unwrap(), 42);
    }
}
