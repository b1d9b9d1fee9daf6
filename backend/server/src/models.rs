use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::documents::{Document, Named};

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
}

/// One stage of a project's progress. Like and dislike counts come from the project's feedback
/// hash, `satisfaction` is derived from them on every read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub phase_name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub report_uri: String,
    #[serde(default)]
    pub meet_uri: String,
    #[serde(default)]
    pub meet_likes: i64,
    #[serde(default)]
    pub meet_dislikes: i64,
    #[serde(default)]
    pub satisfaction: f64,
}

impl Phase {
    /// Opening phase given to projects created without their own progress.
    pub fn research_and_feasibility() -> Self {
        let task = |title: &str, status| Task {
            title: title.to_string(),
            status,
        };

        Self {
            phase_name: "Research & Feasibility".to_string(),
            tasks: vec![
                task(
                    "Assess Water Flow & Potential Sites",
                    TaskStatus::Completed,
                ),
                task(
                    "Conduct Environmental Impact Study",
                    TaskStatus::Completed,
                ),
                task("Obtain Government Approvals", TaskStatus::InProgress),
                task("Analyze Economic Viability", TaskStatus::Pending),
            ],
            report_uri: "https://drive.google.com/file/d/1ABCxyz123/view?usp=sharing".to_string(),
            meet_uri:
                "https://drive.google.com/file/d/1SV-idaAp-sTlxsaURkO2VtAij3b8Hjib/view?usp=sharing"
                    .to_string(),
            meet_likes: 19,
            meet_dislikes: 8,
            satisfaction: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: String,
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
    pub founder: String,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(default)]
    pub progress: Vec<Phase>,
    #[serde(rename = "sustainability_score", default)]
    pub sustainability_score: f64,
    #[serde(default)]
    pub trust_score: f64,
    pub created_at: DateTime<Utc>,
}

impl Document for Project {
    const COLLECTION: &'static str = "project";
    const DETACHED: &'static [&'static str] = &["investors"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Named for Project {
    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Investment {
    pub project: String,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Investor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tot_funds: i64,
    #[serde(default)]
    pub investments: Vec<Investment>,
}

impl Document for Investor {
    const COLLECTION: &'static str = "investor";
    const DETACHED: &'static [&'static str] = &["investments"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Named for Investor {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Investor {
    pub fn invested_in(&self, project_id: &str) -> i64 {
        self.investments
            .iter()
            .filter(|investment| investment.project == project_id)
            .map(|investment| investment.amount)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Founder {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub meetings: Vec<String>,
}

impl Document for Founder {
    const COLLECTION: &'static str = "founder";
    const DETACHED: &'static [&'static str] = &["projects", "meetings"];

    fn id(&self) -> &str {
        &self.id
    }
}

impl Named for Founder {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Founder with project and meeting references replaced by the documents.
#[derive(Debug, Clone, Serialize)]
pub struct FounderProfile {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub projects: Vec<Project>,
    pub meetings: Vec<Meeting>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    #[serde(rename = "_id")]
    pub id: String,
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
    pub founder: String,
    #[serde(default)]
    pub investors: Vec<String>,
    #[serde(default = "neutral")]
    pub sentiment: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub transcripts: String,
    pub created_at: DateTime<Utc>,
}

fn neutral() -> String {
    "Neutral".to_string()
}

impl Document for Meeting {
    const COLLECTION: &'static str = "meeting";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CarbonFootprint {
    #[serde(default)]
    pub travel: f64,
    #[serde(default)]
    pub electricity: f64,
    #[serde(default)]
    pub gas: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_steps: i64,
    #[serde(default)]
    pub public_trips: i64,
    #[serde(default)]
    pub invested: i64,
    #[serde(rename = "carbonFootprint", default)]
    pub carbon_footprint: CarbonFootprint,
    #[serde(rename = "analysisResults", default)]
    pub analysis_results: Vec<Value>,
}

impl Document for User {
    const COLLECTION: &'static str = "user";
    const DETACHED: &'static [&'static str] = &["carbonFootprint", "analysisResults"];

    fn id(&self) -> &str {
        &self.id
    }
}
