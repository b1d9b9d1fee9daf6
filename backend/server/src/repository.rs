use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    documents::{Document, Named, decode, encode, is_document_id, key_of, names_key, sub_key},
    error::AppError,
    feedback::{Feedback, satisfaction},
    ledger::RAISED_AMOUNT,
    models::{
        CarbonFootprint, Founder, FounderProfile, Investment, Investor, Meeting, Phase, Project,
        User, new_id,
    },
    store::{Store, WriteBatch},
};

pub const INVESTORS: &str = "investors";
pub const INVESTMENTS: &str = "investments";
pub const FEEDBACK: &str = "feedback";
pub const PROJECTS: &str = "projects";
pub const MEETINGS: &str = "meetings";
pub const CARBON: &str = "carbon";
pub const ANALYSES: &str = "analyses";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    #[serde(default)]
    pub founder_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_description: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub image_uri: String,
    #[serde(default)]
    pub funding_goal: i64,
    #[serde(default)]
    pub raised_amount: i64,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(rename = "sustainability_score", default)]
    pub sustainability_score: f64,
    #[serde(default)]
    pub trust_score: f64,
    pub progress: Option<Vec<Phase>>,
}

#[derive(Debug, Deserialize)]
pub struct NewFounder {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvestor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tot_funds: i64,
    #[serde(default)]
    pub investments: Vec<Investment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMeeting {
    #[serde(default)]
    pub founder_name: String,
    #[serde(default)]
    pub investor_names: Vec<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Typed entity access on top of a [`Store`].
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn Store>,
}

fn parse_int(key: &str, raw: &str) -> Result<i64, AppError> {
    raw.parse()
        .map_err(|_| AppError::Internal(anyhow!("{key} holds a non-integer value: {raw}")))
}

/// Stages the document hash. The name index entry is claimed separately by `commit_named`.
fn stage<T: Document>(batch: &mut WriteBatch, document: &T) -> Result<(), AppError> {
    batch.put_fields(key_of::<T>(document.id()), encode(document)?);
    Ok(())
}

fn required(value: &str, what: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{what} is required")));
    }
    Ok(())
}

impl Repository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    async fn load<T: Document>(&self, id: &str) -> Result<Option<T>, AppError> {
        if !is_document_id(id) {
            return Ok(None);
        }

        let fields = self.store.fields(&key_of::<T>(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        Ok(Some(decode(fields)?))
    }

    pub async fn id_for_name<T: Named>(&self, name: &str) -> Result<Option<String>, AppError> {
        Ok(self.store.field(&names_key(T::COLLECTION), name).await?)
    }

    /// Claims the name of `document`, then commits `batch`. Two creates racing on one name cannot
    /// both get past the claim.
    async fn commit_named<T: Named>(
        &self,
        document: &T,
        what: &str,
        batch: WriteBatch,
    ) -> Result<(), AppError> {
        let names = names_key(T::COLLECTION);
        if !self
            .store
            .claim(&names, document.name(), document.id())
            .await?
        {
            return Err(AppError::Validation(format!(
                "{what} named {} already exists",
                document.name()
            )));
        }

        if let Err(e) = self.store.commit(batch).await {
            let mut release = WriteBatch::new();
            release.remove_field(names.as_str(), document.name());
            if let Err(release_error) = self.store.commit(release).await {
                warn!(
                    "Failed to release name {} after a failed create: {release_error}",
                    document.name()
                );
            }
            return Err(e.into());
        }

        Ok(())
    }

    // Projects

    pub async fn project(&self, id: &str) -> Result<Option<Project>, AppError> {
        let Some(mut project) = self.load::<Project>(id).await? else {
            return Ok(None);
        };

        project.investors = self
            .store
            .members(&sub_key(Project::COLLECTION, id, INVESTORS))
            .await?;

        let counters = self
            .store
            .fields(&sub_key(Project::COLLECTION, id, FEEDBACK))
            .await?;
        for (index, phase) in project.progress.iter_mut().enumerate() {
            if let Some(raw) = counters.get(&Feedback::Like.field(index)) {
                phase.meet_likes = parse_int("likes", raw)?;
            }
            if let Some(raw) = counters.get(&Feedback::Dislike.field(index)) {
                phase.meet_dislikes = parse_int("dislikes", raw)?;
            }
            phase.satisfaction = satisfaction(phase.meet_likes, phase.meet_dislikes);
        }

        Ok(Some(project))
    }

    pub async fn project_by_name(&self, name: &str) -> Result<Project, AppError> {
        let id = self
            .id_for_name::<Project>(name)
            .await?
            .ok_or_else(|| AppError::not_found("Project"))?;

        self.project(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Project"))
    }

    pub async fn projects(&self) -> Result<Vec<Project>, AppError> {
        let index = self.store.fields(&names_key(Project::COLLECTION)).await?;

        let mut projects = Vec::with_capacity(index.len());
        for id in index.values() {
            match self.project(id).await? {
                Some(project) => projects.push(project),
                None => warn!("Name index points at missing project {id}"),
            }
        }
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(projects)
    }

    pub async fn create_project(&self, draft: NewProject) -> Result<Project, AppError> {
        required(&draft.name, "Project name")?;

        let founder = self.founder_by_name(&draft.founder_name).await?;

        let mut investors = Vec::with_capacity(draft.investors.len());
        for id in draft.investors {
            if self.investor(&id).await?.is_none() {
                return Err(AppError::not_found("Investor"));
            }
            if !investors.contains(&id) {
                investors.push(id);
            }
        }

        let project = Project {
            id: new_id(),
            name: draft.name,
            short_description: draft.short_description,
            description: draft.description,
            industry: draft.industry,
            image_uri: draft.image_uri,
            funding_goal: draft.funding_goal,
            raised_amount: draft.raised_amount,
            founder: founder.id.clone(),
            investors,
            progress: draft
                .progress
                .unwrap_or_else(|| vec![Phase::research_and_feasibility()]),
            sustainability_score: draft.sustainability_score,
            trust_score: draft.trust_score,
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        stage(&mut batch, &project)?;

        let investors_key = sub_key(Project::COLLECTION, &project.id, INVESTORS);
        for investor in &project.investors {
            batch.add_member(investors_key.as_str(), investor.as_str());
        }

        let feedback_key = sub_key(Project::COLLECTION, &project.id, FEEDBACK);
        for (index, phase) in project.progress.iter().enumerate() {
            batch.put_fields(
                feedback_key.as_str(),
                vec![
                    (Feedback::Like.field(index), phase.meet_likes.to_string()),
                    (Feedback::Dislike.field(index), phase.meet_dislikes.to_string()),
                ],
            );
        }

        batch.append(
            sub_key(Founder::COLLECTION, &founder.id, PROJECTS),
            project.id.as_str(),
        );
        self.commit_named(&project, "Project", batch).await?;

        info!("Project {} created for founder {}", project.name, founder.name);

        self.project(&project.id)
            .await?
            .ok_or_else(|| AppError::not_found("Project"))
    }

    // Founders

    pub async fn founder(&self, id: &str) -> Result<Option<Founder>, AppError> {
        let Some(mut founder) = self.load::<Founder>(id).await? else {
            return Ok(None);
        };

        founder.projects = self
            .store
            .items(&sub_key(Founder::COLLECTION, id, PROJECTS))
            .await?;
        founder.meetings = self
            .store
            .items(&sub_key(Founder::COLLECTION, id, MEETINGS))
            .await?;

        Ok(Some(founder))
    }

    pub async fn founder_by_name(&self, name: &str) -> Result<Founder, AppError> {
        let id = self
            .id_for_name::<Founder>(name)
            .await?
            .ok_or_else(|| AppError::not_found("Founder"))?;

        self.founder(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Founder"))
    }

    pub async fn founder_profile(&self, name: &str) -> Result<FounderProfile, AppError> {
        let founder = self.founder_by_name(name).await?;

        let mut projects = Vec::with_capacity(founder.projects.len());
        for id in &founder.projects {
            if let Some(project) = self.project(id).await? {
                projects.push(project);
            }
        }

        let mut meetings = Vec::with_capacity(founder.meetings.len());
        for id in &founder.meetings {
            if let Some(meeting) = self.load::<Meeting>(id).await? {
                meetings.push(meeting);
            }
        }

        Ok(FounderProfile {
            id: founder.id,
            name: founder.name,
            projects,
            meetings,
        })
    }

    pub async fn create_founder(&self, draft: NewFounder) -> Result<Founder, AppError> {
        required(&draft.name, "Founder name")?;

        let founder = Founder {
            id: new_id(),
            name: draft.name,
            projects: Vec::new(),
            meetings: Vec::new(),
        };

        let mut batch = WriteBatch::new();
        stage(&mut batch, &founder)?;
        self.commit_named(&founder, "Founder", batch).await?;

        info!("Founder {} created", founder.name);

        Ok(founder)
    }

    // Investors

    pub async fn investor(&self, id: &str) -> Result<Option<Investor>, AppError> {
        let Some(mut investor) = self.load::<Investor>(id).await? else {
            return Ok(None);
        };

        let entries = self
            .store
            .fields(&sub_key(Investor::COLLECTION, id, INVESTMENTS))
            .await?;

        let mut investments = entries
            .into_iter()
            .map(|(project, raw)| {
                Ok(Investment {
                    amount: parse_int("investment", &raw)?,
                    project,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        investments.sort_by(|a, b| a.project.cmp(&b.project));
        investor.investments = investments;

        Ok(Some(investor))
    }

    pub async fn investor_by_name(&self, name: &str) -> Result<Investor, AppError> {
        let id = self
            .id_for_name::<Investor>(name)
            .await?
            .ok_or_else(|| AppError::not_found("Investor"))?;

        self.investor(&id)
            .await?
            .ok_or_else(|| AppError::not_found("Investor"))
    }

    pub async fn investor_by_id(&self, id: &str) -> Result<Investor, AppError> {
        self.investor(id)
            .await?
            .ok_or_else(|| AppError::not_found("Investor"))
    }

    /// Name first, then id.
    pub async fn investor_by_key(&self, key: &str) -> Result<Investor, AppError> {
        match self.investor_by_name(key).await {
            Err(AppError::NotFound(_)) => self.investor_by_id(key).await,
            other => other,
        }
    }

    pub async fn create_investor(&self, draft: NewInvestor) -> Result<Investor, AppError> {
        required(&draft.name, "Investor name")?;

        let investor = Investor {
            id: new_id(),
            name: draft.name,
            tot_funds: draft.tot_funds,
            investments: Vec::new(),
        };

        let mut batch = WriteBatch::new();
        stage(&mut batch, &investor)?;

        // Seeded investments are staged like an attributed funding, `totFunds` is taken as already
        // net of them.
        let investments_key = sub_key(Investor::COLLECTION, &investor.id, INVESTMENTS);
        for investment in &draft.investments {
            let project = self
                .project(&investment.project)
                .await?
                .ok_or_else(|| AppError::not_found("Project"))?;

            batch
                .increment(key_of::<Project>(&project.id), RAISED_AMOUNT, investment.amount)
                .add_member(
                    sub_key(Project::COLLECTION, &project.id, INVESTORS),
                    investor.id.as_str(),
                )
                .increment(
                    investments_key.as_str(),
                    project.id.as_str(),
                    investment.amount,
                );
        }
        self.commit_named(&investor, "Investor", batch).await?;

        info!("Investor {} created", investor.name);

        self.investor_by_id(&investor.id).await
    }

    // Meetings

    pub async fn create_meeting(&self, draft: NewMeeting) -> Result<Meeting, AppError> {
        let founder = self.founder_by_name(&draft.founder_name).await?;

        let mut investors = Vec::with_capacity(draft.investor_names.len());
        for name in &draft.investor_names {
            match self.id_for_name::<Investor>(name).await? {
                Some(id) if !investors.contains(&id) => investors.push(id),
                Some(_) => {}
                None => {
                    return Err(AppError::NotFound(
                        "One or more investors not found".to_string(),
                    ));
                }
            }
        }

        let meeting = Meeting {
            id: new_id(),
            title: draft.title,
            date: draft.date,
            start_time: draft.start_time,
            end_time: draft.end_time,
            key_points: draft.key_points,
            founder: founder.id.clone(),
            investors,
            sentiment: "Neutral".to_string(),
            summary: String::new(),
            transcripts: String::new(),
            created_at: Utc::now(),
        };

        let mut batch = WriteBatch::new();
        batch
            .put_fields(key_of::<Meeting>(&meeting.id), encode(&meeting)?)
            .append(
                sub_key(Founder::COLLECTION, &founder.id, MEETINGS),
                meeting.id.as_str(),
            );
        self.store.commit(batch).await?;

        info!("Meeting {} linked to founder {}", meeting.id, founder.name);

        Ok(meeting)
    }

    // Users

    pub async fn user(&self, id: &str) -> Result<User, AppError> {
        let mut user = self
            .load::<User>(id)
            .await?
            .ok_or_else(|| AppError::not_found("User"))?;

        let carbon = self.store.fields(&sub_key(User::COLLECTION, id, CARBON)).await?;
        user.carbon_footprint = carbon_footprint(&carbon)?;

        user.analysis_results = self
            .store
            .items(&sub_key(User::COLLECTION, id, ANALYSES))
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw))
            .collect::<Result<_, _>>()?;

        Ok(user)
    }

    /// Creates the user document when missing. Returns true when it was created.
    pub async fn ensure_user(&self, id: &str, name: &str) -> Result<bool, AppError> {
        if !is_document_id(id) {
            return Err(AppError::Validation(format!("Invalid user id {id}")));
        }
        if self.load::<User>(id).await?.is_some() {
            return Ok(false);
        }

        let user = User {
            id: id.to_string(),
            name: name.to_string(),
            user_steps: 0,
            public_trips: 0,
            invested: 0,
            carbon_footprint: CarbonFootprint::default(),
            analysis_results: Vec::new(),
        };

        let mut batch = WriteBatch::new();
        batch
            .put_fields(key_of::<User>(id), encode(&user)?)
            .put_fields(
                sub_key(User::COLLECTION, id, CARBON),
                vec![
                    ("travel".to_string(), "0".to_string()),
                    ("electricity".to_string(), "0".to_string()),
                    ("gas".to_string(), "0".to_string()),
                ],
            );
        self.store.commit(batch).await?;

        info!("Provisioned user {id}");

        Ok(true)
    }
}

fn carbon_footprint(fields: &HashMap<String, String>) -> Result<CarbonFootprint, AppError> {
    let component = |name: &str| -> Result<f64, AppError> {
        match fields.get(name) {
            Some(raw) => raw.parse().map_err(|_| {
                AppError::Internal(anyhow!("carbon component {name} is not a number: {raw}"))
            }),
            None => Ok(0.0),
        }
    };

    Ok(CarbonFootprint {
        travel: component("travel")?,
        electricity: component("electricity")?,
        gas: component("gas")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStore, models::TaskStatus};

    fn repository() -> Repository {
        Repository::new(Arc::new(MemoryStore::new()))
    }

    fn draft(founder: &str, name: &str) -> NewProject {
        NewProject {
            founder_name: founder.to_string(),
            name: name.to_string(),
            short_description: String::new(),
            description: String::new(),
            industry: "energy".to_string(),
            image_uri: String::new(),
            funding_goal: 5000,
            raised_amount: 0,
            investors: Vec::new(),
            sustainability_score: 0.0,
            trust_score: 0.0,
            progress: None,
        }
    }

    #[tokio::test]
    async fn test_create_project_links_founder() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();

        let project = repo.create_project(draft("Mira", "Hydro")).await.unwrap();

        assert_eq!(project.raised_amount, 0);
        assert_eq!(project.progress.len(), 1);
        assert_eq!(project.progress[0].tasks[2].status, TaskStatus::InProgress);
        assert!((project.progress[0].satisfaction - 19.0 / 27.0 * 100.0).abs() < 1e-9);

        let profile = repo.founder_profile("Mira").await.unwrap();
        assert_eq!(profile.projects.len(), 1);
        assert_eq!(profile.projects[0].id, project.id);
    }

    #[tokio::test]
    async fn test_create_project_requires_founder() {
        let repo = repository();

        let err = repo.create_project(draft("Nobody", "Hydro")).await.unwrap_err();

        assert_eq!(err.to_string(), "Founder not found");
        assert!(repo.projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_are_rejected() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();

        let err = repo
            .create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_investor_lookup_by_name_or_id() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();
        let project = repo.create_project(draft("Mira", "Hydro")).await.unwrap();
        let investor = repo
            .create_investor(NewInvestor {
                name: "Asha".into(),
                tot_funds: 1000,
                investments: vec![Investment {
                    project: project.id.clone(),
                    amount: 250,
                }],
            })
            .await
            .unwrap();

        let by_name = repo.investor_by_key("Asha").await.unwrap();
        let by_id = repo.investor_by_key(&investor.id).await.unwrap();

        assert_eq!(by_name, by_id);
        assert_eq!(by_id.investments.len(), 1);
        assert_eq!(by_id.invested_in(&project.id), 250);

        let project = repo.project_by_name("Hydro").await.unwrap();
        assert_eq!(project.raised_amount, 250);
        assert_eq!(project.investors, vec![investor.id.clone()]);
        assert!(matches!(
            repo.investor_by_key("missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_meeting_with_missing_investor_creates_nothing() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();
        repo.create_investor(NewInvestor {
            name: "Asha".into(),
            tot_funds: 0,
            investments: Vec::new(),
        })
        .await
        .unwrap();

        let err = repo
            .create_meeting(NewMeeting {
                founder_name: "Mira".into(),
                investor_names: vec!["Asha".into(), "Ghost".into()],
                title: "Kickoff".into(),
                date: "2025-03-01".into(),
                start_time: "10:00".into(),
                end_time: "11:00".into(),
                key_points: Vec::new(),
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "One or more investors not found");
        assert!(repo.founder_profile("Mira").await.unwrap().meetings.is_empty());
    }

    #[tokio::test]
    async fn test_meeting_is_expanded_on_founder() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();
        let asha = repo
            .create_investor(NewInvestor {
                name: "Asha".into(),
                tot_funds: 0,
                investments: Vec::new(),
            })
            .await
            .unwrap();

        let meeting = repo
            .create_meeting(NewMeeting {
                founder_name: "Mira".into(),
                investor_names: vec!["Asha".into()],
                title: "Kickoff".into(),
                date: "2025-03-01".into(),
                start_time: "10:00".into(),
                end_time: "11:00".into(),
                key_points: vec!["budget".into()],
            })
            .await
            .unwrap();

        assert_eq!(meeting.investors, vec![asha.id]);
        assert_eq!(meeting.sentiment, "Neutral");

        let profile = repo.founder_profile("Mira").await.unwrap();
        assert_eq!(profile.meetings, vec![meeting]);
    }

    #[tokio::test]
    async fn test_ensure_user_is_idempotent() {
        let repo = repository();

        assert!(repo.ensure_user("u1", "Demo").await.unwrap());
        assert!(!repo.ensure_user("u1", "Demo").await.unwrap());

        let user = repo.user("u1").await.unwrap();
        assert_eq!(user.user_steps, 0);
        assert_eq!(user.carbon_footprint, CarbonFootprint::default());
    }

    #[tokio::test]
    async fn test_seeded_investment_needs_project() {
        let repo = repository();

        let err = repo
            .create_investor(NewInvestor {
                name: "Asha".into(),
                tot_funds: 1000,
                investments: vec![Investment {
                    project: "p1".into(),
                    amount: 250,
                }],
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Project not found");
        assert!(repo.investor_by_name("Asha").await.is_err());
    }

    #[tokio::test]
    async fn test_project_rejects_unknown_investor_ids() {
        let repo = repository();
        repo.create_founder(NewFounder { name: "Mira".into() })
            .await
            .unwrap();

        let err = repo
            .create_project(NewProject {
                investors: vec!["names".into()],
                ..draft("Mira", "Hydro")
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Investor not found");
        assert!(repo.projects().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ids_cannot_address_other_keys() {
        let repo = repository();
        let asha = repo
            .create_investor(NewInvestor {
                name: "Asha".into(),
                tot_funds: 0,
                investments: Vec::new(),
            })
            .await
            .unwrap();

        for key in ["names", &format!("{}:investments", asha.id)] {
            assert!(matches!(
                repo.investor_by_key(key).await,
                Err(AppError::NotFound(_))
            ));
        }
        assert!(matches!(repo.user("names").await, Err(AppError::NotFound(_))));
        assert!(matches!(
            repo.ensure_user("names", "Demo").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_creates_keep_one_name() {
        let repo = repository();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    repo.create_founder(NewFounder { name: "Mira".into() }).await
                })
            })
            .collect();

        let mut created = Vec::new();
        for handle in handles {
            if let Ok(founder) = handle.await.unwrap() {
                created.push(founder);
            }
        }

        assert_eq!(created.len(), 1);
        assert_eq!(repo.founder_by_name("Mira").await.unwrap().id, created[0].id);
    }
}
