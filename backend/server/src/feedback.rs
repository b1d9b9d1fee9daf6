//! # Satisfaction Evaluator
//!
//! Meeting feedback per phase and the refund rule attached to it.
//!
//! `satisfaction = likes / (likes + dislikes) * 100`, 0 with no feedback at all. A dislike that
//! leaves a phase below [`SATISFACTION_THRESHOLD`] settles the whole project, in the same batch that
//! records the dislike.
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    documents::{Document, sub_key},
    error::AppError,
    ledger::ProjectLocks,
    models::Project,
    refund::{Settlement, plan},
    repository::{FEEDBACK, Repository},
    store::WriteBatch,
};

pub const SATISFACTION_THRESHOLD: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Like,
    Dislike,
}

impl Feedback {
    /// Counter field inside the project's feedback hash.
    pub fn field(self, phase: usize) -> String {
        match self {
            Feedback::Like => format!("{phase}:likes"),
            Feedback::Dislike => format!("{phase}:dislikes"),
        }
    }
}

pub fn satisfaction(likes: i64, dislikes: i64) -> f64 {
    let total = likes + dislikes;
    if total <= 0 {
        return 0.0;
    }

    likes as f64 / total as f64 * 100.0
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub project: String,
    pub phase: usize,
    pub likes: i64,
    pub dislikes: i64,
    pub satisfaction: f64,
    pub settlement: Option<Settlement>,
}

#[async_trait]
pub trait FeedbackSink: Send + Sync {
    /// Records feedback on one phase, then re-checks the threshold and settles when crossed.
    async fn record(
        &self,
        project_name: &str,
        phase: usize,
        feedback: Feedback,
    ) -> Result<FeedbackOutcome, AppError>;
}

/// Server-side sink, the client no longer decides when a project is refunded.
#[derive(Clone)]
pub struct SettlingFeedbackSink {
    repo: Repository,
    locks: ProjectLocks,
}

impl SettlingFeedbackSink {
    pub fn new(repo: Repository, locks: ProjectLocks) -> Self {
        Self { repo, locks }
    }
}

#[async_trait]
impl FeedbackSink for SettlingFeedbackSink {
    async fn record(
        &self,
        project_name: &str,
        phase: usize,
        feedback: Feedback,
    ) -> Result<FeedbackOutcome, AppError> {
        let project = self.repo.project_by_name(project_name).await?;

        let _guard = self.locks.acquire(&project.id).await;

        let project = self
            .repo
            .project(&project.id)
            .await?
            .ok_or_else(|| AppError::not_found("Project"))?;

        let Some(current) = project.progress.get(phase) else {
            return Err(AppError::Validation(format!(
                "Project {} has no phase {phase}",
                project.name
            )));
        };

        let (likes, dislikes) = match feedback {
            Feedback::Like => (current.meet_likes + 1, current.meet_dislikes),
            Feedback::Dislike => (current.meet_likes, current.meet_dislikes + 1),
        };
        let score = satisfaction(likes, dislikes);

        let mut batch = WriteBatch::new();
        batch.increment(
            sub_key(Project::COLLECTION, &project.id, FEEDBACK),
            feedback.field(phase),
            1,
        );

        let settlement = if feedback == Feedback::Dislike && score < SATISFACTION_THRESHOLD {
            settle_on_dislike(&self.repo, &project, &mut batch).await?
        } else {
            None
        };

        self.repo.store().commit(batch).await?;

        if let Some(settlement) = &settlement {
            info!(
                "Satisfaction on {} phase {phase} fell to {score:.1}, refunded {}",
                project.name, settlement.total_refunded
            );
        }

        Ok(FeedbackOutcome {
            project: project.name,
            phase,
            likes,
            dislikes,
            satisfaction: score,
            settlement,
        })
    }
}

async fn settle_on_dislike(
    repo: &Repository,
    project: &Project,
    batch: &mut WriteBatch,
) -> Result<Option<Settlement>, AppError> {
    match plan(repo, project).await {
        Ok((settlement, settlement_batch)) => {
            batch.extend(settlement_batch);
            Ok(Some(settlement))
        }
        Err(AppError::InvalidState(reason)) => {
            debug!("No settlement for {}: {reason}", project.name);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        ledger::{FundRequest, fund},
        memory::MemoryStore,
        models::Phase,
        repository::{NewFounder, NewInvestor, NewProject},
    };

    fn phase(likes: i64, dislikes: i64) -> Phase {
        Phase {
            meet_likes: likes,
            meet_dislikes: dislikes,
            ..Phase::research_and_feasibility()
        }
    }

    async fn setup(likes: i64, dislikes: i64, invested: i64) -> (Repository, ProjectLocks) {
        let repo = Repository::new(Arc::new(MemoryStore::new()));
        let locks = ProjectLocks::new();

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
            raised_amount: 0,
            investors: Vec::new(),
            sustainability_score: 0.0,
            trust_score: 0.0,
            progress: Some(vec![phase(likes, dislikes)]),
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

        if invested > 0 {
            fund(
                &repo,
                &locks,
                &FundRequest {
                    proj_name: "Hydro".into(),
                    fund_amt: invested,
                    investor_name: Some("Asha".into()),
                },
            )
            .await
            .unwrap();
        }

        (repo, locks)
    }

    #[test]
    fn test_satisfaction_score() {
        assert_eq!(satisfaction(0, 0), 0.0);
        assert_eq!(satisfaction(3, 1), 75.0);
        assert_eq!(satisfaction(0, 4), 0.0);
        assert_eq!(satisfaction(5, 0), 100.0);

        for likes in 0..20 {
            for dislikes in 0..20 {
                let score = satisfaction(likes, dislikes);
                if likes + dislikes == 0 {
                    assert_eq!(score, 0.0);
                } else {
                    let expected = likes as f64 / (likes + dislikes) as f64 * 100.0;
                    assert!((score - expected).abs() < 1e-9);
                    assert!((0.0..=100.0).contains(&score));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_like_only_counts() {
        let (repo, locks) = setup(1, 1, 600).await;
        let sink = SettlingFeedbackSink::new(repo.clone(), locks);

        let outcome = sink.record("Hydro", 0, Feedback::Like).await.unwrap();

        assert_eq!((outcome.likes, outcome.dislikes), (2, 1));
        assert!(outcome.settlement.is_none());
        assert_eq!(repo.project_by_name("Hydro").await.unwrap().progress[0].meet_likes, 2);
    }

    #[tokio::test]
    async fn test_dislike_above_threshold_keeps_funds() {
        let (repo, locks) = setup(19, 8, 600).await;
        let sink = SettlingFeedbackSink::new(repo.clone(), locks);

        let outcome = sink.record("Hydro", 0, Feedback::Dislike).await.unwrap();

        assert_eq!(outcome.dislikes, 9);
        assert!(outcome.settlement.is_none());
        assert_eq!(repo.project_by_name("Hydro").await.unwrap().raised_amount, 600);
    }

    #[tokio::test]
    async fn test_dislike_below_threshold_settles() {
        let (repo, locks) = setup(1, 1, 600).await;
        let sink = SettlingFeedbackSink::new(repo.clone(), locks);

        let outcome = sink.record("Hydro", 0, Feedback::Dislike).await.unwrap();

        let settlement = outcome.settlement.unwrap();
        assert_eq!(settlement.total_refunded, 600);

        let project = repo.project_by_name("Hydro").await.unwrap();
        assert_eq!(project.raised_amount, 0);
        assert!(project.investors.is_empty());
        assert_eq!(project.progress[0].meet_dislikes, 2);
        assert_eq!(repo.investor_by_name("Asha").await.unwrap().tot_funds, 1000);
    }

    #[tokio::test]
    async fn test_dislike_on_settled_project_only_counts() {
        let (repo, locks) = setup(0, 3, 0).await;
        let sink = SettlingFeedbackSink::new(repo.clone(), locks);

        let outcome = sink.record("Hydro", 0, Feedback::Dislike).await.unwrap();

        assert!(outcome.settlement.is_none());
        assert_eq!(outcome.dislikes, 4);
        assert_eq!(outcome.satisfaction, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_phase_is_rejected() {
        let (repo, locks) = setup(1, 1, 0).await;
        let sink = SettlingFeedbackSink::new(repo, locks);

        let err = sink.record("Hydro", 3, Feedback::Dislike).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }
}
