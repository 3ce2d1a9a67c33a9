//! Score and economy ledger.
//! Sled-backed optimistic transactions over per-student score ledgers, with the award
//! modifier pipeline, the shop and power-ups on top, and post-commit triggers fed through
//! an outbox.

pub mod award;
pub mod bounty;
pub mod collaborators;
pub mod context;
pub mod errors;
pub mod events;
pub mod familiar;
pub mod milestone;
pub mod modifiers;
pub mod powerup;
pub mod revoke;
pub mod rollover;
pub mod roster;
pub mod shop;
pub mod storage;
pub mod triggers;
pub mod types;

pub use award::{
    apply_star_award, apply_star_award_with_note, audit_entries, daily_records,
    grant_bonus_stars, mark_present, AwardOutcome,
};
pub use bounty::{advance_bounties, claim_bounty, create_bounty, list_bounties};
pub use collaborators::{
    Actor, AssetGenerator, Clock, FixedClock, FixedLuck, GoldConversion, HeroClassGold,
    LogNotifications, LuckSource, NoAssets, NotificationSink, RecordingNotifications,
    SystemClock, ThreadRngLuck,
};
pub use context::{LedgerContext, LedgerContextBuilder};
pub use errors::LedgerError;
pub use events::{DomainEvent, Outbox};
pub use familiar::{advance_familiar, generate_familiar_asset, load_asset, regenerate_pending_assets};
pub use milestone::{check_milestone, quest_history, quest_progress, quest_state, QuestProgress};
pub use modifiers::{compute_effective_award, AwardModifiers, ModifierInput, ModifierNote, ModifierSettings};
pub use powerup::{use_item, PowerUp, UseOutcome};
pub use revoke::{delete_award, RevokeOutcome};
pub use rollover::{monthly_history, recompute_guild_champions, rollover_student, Rollover};
pub use roster::{
    admin_correct_total, change_hero_class, clear_day_event, create_class, create_student,
    delete_class, delete_student, select_story_hero, set_calendar, set_day_event,
    set_reigning_hero, take_starfall_catalyst,
};
pub use shop::{
    buy_item, fixed_catalog, list_seasonal_items, stock_seasonal_item, storefront,
    NewSeasonalItem, PurchaseOutcome, ShopEntry,
};
pub use storage::{BatchOp, LedgerStore, LedgerStoreBuilder, LedgerTx};
pub use triggers::{run_for_event, TriggerDispatcher};
pub use types::*;
