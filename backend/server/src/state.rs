use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{
    bills::{BillAnalyzer, GeminiAnalyzer},
    config::Config,
    database::RedisStore,
    feedback::{FeedbackSink, SettlingFeedbackSink},
    ledger::ProjectLocks,
    repository::Repository,
    store::Store,
};

pub const DEMO_USER_NAME: &str = "Demo User";

pub struct State {
    pub config: Config,
    pub repo: Repository,
    pub locks: ProjectLocks,
    pub feedback: Arc<dyn FeedbackSink>,
    pub analyzer: Arc<dyn BillAnalyzer>,
}

impl State {
    pub async fn new() -> Result<Arc<Self>> {
        let config = Config::load()?;

        let store = RedisStore::connect(&config.redis_url).await?;
        let analyzer = GeminiAnalyzer::new(
            &config.gemini_url,
            &config.gemini_model,
            config.gemini_key.clone(),
        );

        let state = Self::with_parts(config, Arc::new(store), Arc::new(analyzer));

        if state
            .repo
            .ensure_user(&state.config.demo_user_id, DEMO_USER_NAME)
            .await?
        {
            info!("Demo user {} created", state.config.demo_user_id);
        }

        Ok(state)
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        analyzer: Arc<dyn BillAnalyzer>,
    ) -> Arc<Self> {
        let repo = Repository::new(store);
        let locks = ProjectLocks::new();
        let feedback = Arc::new(SettlingFeedbackSink::new(repo.clone(), locks.clone()));

        Arc::new(Self {
            config,
            repo,
            locks,
            feedback,
            analyzer,
        })
    }
}
