use std::sync::Arc;

use crate::config::Config;
use crate::ledger::collaborators::{
    AssetGenerator, Clock, GoldConversion, HeroClassGold, LogNotifications, LuckSource, NoAssets,
    NotificationSink, SystemClock, ThreadRngLuck,
};
use crate::ledger::errors::LedgerError;
use crate::ledger::events::{DomainEvent, Outbox};
use crate::ledger::modifiers::ModifierSettings;
use crate::ledger::storage::{LedgerStore, LedgerStoreBuilder};

/// Everything a ledger operation needs, passed explicitly instead of living in globals.
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct LedgerContext {
    pub store: Arc<LedgerStore>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub luck: Arc<dyn LuckSource>,
    pub gold: Arc<dyn GoldConversion>,
    pub assets: Arc<dyn AssetGenerator>,
    pub outbox: Arc<Outbox>,
}

impl LedgerContext {
    /// Open the store named in `config` with production collaborators.
    pub fn open(config: Config) -> Result<Self, LedgerError> {
        let store = LedgerStoreBuilder::new(&config.ledger.data_dir)
            .max_retries(config.ledger.max_transaction_retries)
            .open()?;
        Ok(LedgerContextBuilder::new(store, config).build())
    }

    pub fn builder(store: LedgerStore, config: Config) -> LedgerContextBuilder {
        LedgerContextBuilder::new(store, config)
    }

    pub fn modifier_settings(&self) -> ModifierSettings {
        ModifierSettings {
            gilded_multiplier: self.config.economy.gilded_multiplier,
            luck_chance: f64::from(self.config.economy.luck_chance_percent) / 100.0,
        }
    }

    /// Hand committed events to the outbox. Must only be called after commit.
    pub fn publish(&self, events: Vec<DomainEvent>) {
        if !events.is_empty() {
            self.outbox.publish(events);
        }
    }
}

pub struct LedgerContextBuilder {
    store: LedgerStore,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    luck: Option<Arc<dyn LuckSource>>,
    gold: Option<Arc<dyn GoldConversion>>,
    assets: Option<Arc<dyn AssetGenerator>>,
    sink: Option<Arc<dyn NotificationSink>>,
}

impl LedgerContextBuilder {
    pub fn new(store: LedgerStore, config: Config) -> Self {
        Self {
            store,
            config,
            clock: None,
            luck: None,
            gold: None,
            assets: None,
            sink: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn luck(mut self, luck: Arc<dyn LuckSource>) -> Self {
        self.luck = Some(luck);
        self
    }

    pub fn gold(mut self, gold: Arc<dyn GoldConversion>) -> Self {
        self.gold = Some(gold);
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetGenerator>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> LedgerContext {
        let gold = self
            .gold
            .unwrap_or_else(|| Arc::new(HeroClassGold::new(self.config.hero_classes.clone())));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogNotifications));
        LedgerContext {
            store: Arc::new(self.store),
            config: Arc::new(self.config),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            luck: self.luck.unwrap_or_else(|| Arc::new(ThreadRngLuck)),
            gold,
            assets: self.assets.unwrap_or_else(|| Arc::new(NoAssets)),
            outbox: Arc::new(Outbox::new(sink)),
        }
    }
}
