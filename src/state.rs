use std::sync::Arc;

use tracing::warn;

use crate::{
    config::Config,
    database::{RedisStore, init_redis},
    ledger::Ledger,
    store::{EntryStore, MemoryStore},
};

pub struct State {
    pub config: Config,
    pub ledger: Ledger,
    pub store_backend: &'static str,
}

impl State {
    pub async fn new() -> Arc<Self> {
        Self::with_config(Config::load()).await
    }

    pub async fn with_config(config: Config) -> Arc<Self> {
        let (store, store_backend): (Arc<dyn EntryStore>, &'static str) = match &config.redis_url {
            Some(url) => (Arc::new(RedisStore::new(init_redis(url).await)), "redis"),
            None => {
                warn!("REDIS_URL not set, entries will not survive a restart");
                (Arc::new(MemoryStore::new()), "memory")
            }
        };

        let ledger = Ledger::new(store, config.referral_base_url.clone());

        Arc::new(Self {
            config,
            ledger,
            store_backend,
        })
    }
}
