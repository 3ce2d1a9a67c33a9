//! Shop and purchase engine.
//!
//! Two catalogs feed the shop:
//! - the fixed catalog, compiled in and always in stock
//! - seasonal items, unique documents a teacher stocks for one month and league
//!
//! A seasonal purchase deletes the item document and leaves a sold marker in the same
//! transaction, so at most one buyer ever gets it.

use chrono::NaiveDate;
use log::{debug, info};

use crate::ledger::collaborators::Actor;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::rollover::load_for_update;
use crate::ledger::storage::keys;
use crate::ledger::types::{
    month_key, CatalogItem, ClassRecord, FamiliarState, InventoryItem, SeasonalItem,
    StudentRecord,
};
use crate::logutil::escape_log;

pub const GILDED_QUILL: &str = "Gilded Quill";
pub const HOURGLASS_OF_PATIENCE: &str = "Hourglass of Patience";
pub const FOUR_LEAF_CLOVER: &str = "Four-Leaf Clover";
pub const STARFALL_CATALYST: &str = "Starfall Catalyst";
pub const BOUNTY_SCROLL: &str = "Bounty Scroll";
pub const CROWN_OF_DESTINY: &str = "Crown of Destiny";

/// (id, name, description, price, familiar type)
const FIXED_CATALOG: &[(&str, &str, &str, i64, Option<&str>)] = &[
    (
        "gilded_quill",
        GILDED_QUILL,
        "Your next award pays triple gold.",
        15,
        None,
    ),
    (
        "hourglass_of_patience",
        HOURGLASS_OF_PATIENCE,
        "Adds time to the class's running timer bounty.",
        10,
        None,
    ),
    (
        "four_leaf_clover",
        FOUR_LEAF_CLOVER,
        "A chance at a bonus star next lesson.",
        8,
        None,
    ),
    (
        "starfall_catalyst",
        STARFALL_CATALYST,
        "Sparks a star shower in the next story chapter.",
        20,
        None,
    ),
    (
        "bounty_scroll",
        BOUNTY_SCROLL,
        "Claim ten bounty stars at once. One use per class each month.",
        25,
        None,
    ),
    (
        "crown_of_destiny",
        CROWN_OF_DESTINY,
        "You will be the hero of the next story chapter.",
        30,
        None,
    ),
    (
        "owl_egg",
        "Owl Egg",
        "Hatches into a wise owl familiar as you earn stars.",
        40,
        Some("owl"),
    ),
    (
        "dragon_egg",
        "Dragon Egg",
        "Hatches into a tiny dragon familiar as you earn stars.",
        60,
        Some("dragon"),
    ),
    (
        "golden_trophy",
        "Golden Trophy",
        "A collectible for the display shelf.",
        50,
        None,
    ),
];

pub fn fixed_catalog() -> Vec<CatalogItem> {
    FIXED_CATALOG
        .iter()
        .map(|(id, name, description, price, familiar)| CatalogItem {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            image: format!("shop/{}.png", id),
            icon: format!("icons/{}.svg", id),
            price: *price,
            familiar_type: familiar.map(str::to_string),
        })
        .collect()
}

pub fn fixed_item(item_id: &str) -> Option<CatalogItem> {
    fixed_catalog().into_iter().find(|item| item.id == item_id)
}

/// Where a purchasable item comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopEntry {
    Fixed(CatalogItem),
    Seasonal(SeasonalItem),
}

impl ShopEntry {
    pub fn base_price(&self) -> i64 {
        match self {
            ShopEntry::Fixed(item) => item.price,
            ShopEntry::Seasonal(item) => item.price,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ShopEntry::Fixed(item) => &item.name,
            ShopEntry::Seasonal(item) => &item.name,
        }
    }
}

/// Price after the reigning hero's seasonal discount. Fixed items never discount.
pub fn hero_price(entry: &ShopEntry, is_reigning_hero: bool, discount_percent: u32) -> i64 {
    let price = entry.base_price();
    match entry {
        ShopEntry::Seasonal(_) if is_reigning_hero => {
            price - price * i64::from(discount_percent) / 100
        }
        _ => price,
    }
}

/// Look an item up in the fixed catalog, then among stocked seasonal items.
pub fn resolve(ctx: &LedgerContext, item_id: &str) -> Result<ShopEntry, LedgerError> {
    if let Some(item) = fixed_item(item_id) {
        return Ok(ShopEntry::Fixed(item));
    }
    match ctx.store.get::<SeasonalItem>(&keys::seasonal(item_id))? {
        Some(item) => Ok(ShopEntry::Seasonal(item)),
        None if ctx.store.get::<String>(&keys::seasonal_sold(item_id))?.is_some() => {
            Err(LedgerError::ItemAlreadySold(item_id.to_string()))
        }
        None => Err(LedgerError::NotFound(format!("shop item: {}", item_id))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOutcome {
    pub item: InventoryItem,
    pub price_paid: i64,
    pub gold_remaining: i64,
    /// The item was a familiar egg and went to the familiar slot, not the inventory.
    pub installed_familiar: bool,
}

/// Buy `item_id` for `student_id`.
pub fn buy_item(
    ctx: &LedgerContext,
    student_id: &str,
    item_id: &str,
) -> Result<PurchaseOutcome, LedgerError> {
    let entry = resolve(ctx, item_id)?;
    let student = ctx.store.get_student(student_id)?;
    let class: Option<ClassRecord> = ctx.store.get(&keys::class(&student.class_id))?;
    if let ShopEntry::Seasonal(item) = &entry {
        check_seasonal_scope(item, class.as_ref(), ctx.clock.today())?;
    }
    let is_hero = class
        .as_ref()
        .map(|c| c.is_reigning_hero(student_id))
        .unwrap_or(false);
    let price = hero_price(&entry, is_hero, ctx.config.economy.hero_discount_percent);

    let now = ctx.clock.now();
    let today = now.date_naive();
    let (outcome, events) = ctx.store.transaction(|tx| {
        let (mut record, rolled) = load_for_update(tx, student_id, today, now)?;
        let mut events: Vec<DomainEvent> = rolled
            .into_iter()
            .map(|r| r.into_event(student_id))
            .collect();

        let snapshot = match &entry {
            ShopEntry::Fixed(item) => item.snapshot(now),
            ShopEntry::Seasonal(item) => {
                let item_key = keys::seasonal(&item.id);
                let sold_key = keys::seasonal_sold(&item.id);
                let current: Option<SeasonalItem> = tx.get(&item_key)?;
                let Some(current) = current else {
                    if tx.exists(&sold_key)? {
                        return Err(LedgerError::ItemAlreadySold(item.id.clone()));
                    }
                    return Err(LedgerError::NotFound(format!("shop item: {}", item.id)));
                };
                tx.delete(&item_key);
                tx.put(&sold_key, &student_id.to_string())?;
                current.snapshot(now)
            }
        };

        if record.gold < price {
            return Err(LedgerError::InsufficientFunds {
                needed: price,
                available: record.gold,
            });
        }

        let familiar_type = match &entry {
            ShopEntry::Fixed(item) => item.familiar_type.clone(),
            ShopEntry::Seasonal(_) => None,
        };
        if let Some(type_id) = &familiar_type {
            if record.familiar.is_some() {
                return Err(LedgerError::InvalidOperation(
                    "student already has a familiar".to_string(),
                ));
            }
            record.familiar = Some(FamiliarState::new_egg(type_id, record.total_stars));
        } else {
            record.inventory.push(snapshot.clone());
        }
        record.gold -= price;
        record.touch();
        tx.put_score(&record)?;

        events.push(DomainEvent::ItemPurchased {
            student_id: student_id.to_string(),
            item_id: snapshot.item_id.clone(),
            name: snapshot.name.clone(),
            price,
        });
        Ok((
            PurchaseOutcome {
                item: snapshot,
                price_paid: price,
                gold_remaining: record.gold,
                installed_familiar: familiar_type.is_some(),
            },
            events,
        ))
    })?;

    info!(
        "{} bought {} for {} gold",
        student_id,
        escape_log(entry.name()),
        outcome.price_paid
    );
    ctx.publish(events);
    Ok(outcome)
}

fn check_seasonal_scope(
    item: &SeasonalItem,
    class: Option<&ClassRecord>,
    today: NaiveDate,
) -> Result<(), LedgerError> {
    if item.month_key != month_key(today) {
        return Err(LedgerError::InvalidOperation(format!(
            "{} was stocked for {}",
            item.name, item.month_key
        )));
    }
    match class {
        Some(class) if class.league == item.league => Ok(()),
        _ => Err(LedgerError::InvalidOperation(format!(
            "{} is not offered in this league",
            item.name
        ))),
    }
}

/// Fields a teacher fills in when stocking a seasonal item.
#[derive(Debug, Clone)]
pub struct NewSeasonalItem {
    pub league: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub icon: String,
    pub price: i64,
}

/// Stock a unique item for the current month in `league`.
pub fn stock_seasonal_item(
    ctx: &LedgerContext,
    actor: &Actor,
    new_item: NewSeasonalItem,
) -> Result<SeasonalItem, LedgerError> {
    if new_item.price <= 0 {
        return Err(LedgerError::InvalidOperation(
            "price must be positive".to_string(),
        ));
    }
    if new_item.name.trim().is_empty() {
        return Err(LedgerError::InvalidOperation(
            "item name is required".to_string(),
        ));
    }
    let now = ctx.clock.now();
    let item = SeasonalItem {
        id: uuid::Uuid::new_v4().simple().to_string(),
        teacher_id: actor.teacher_id.clone(),
        month_key: month_key(now.date_naive()),
        league: new_item.league,
        name: new_item.name,
        description: new_item.description,
        image: new_item.image,
        icon: new_item.icon,
        price: new_item.price,
        stocked_at: now,
    };
    ctx.store.put(&keys::seasonal(&item.id), &item)?;
    debug!(
        "stocked {} ({}) for {}",
        item.id,
        escape_log(&item.name),
        item.league
    );
    Ok(item)
}

/// Unsold seasonal items for `league` in the month of `month` (a `YYYY-MM` key).
pub fn list_seasonal_items(
    ctx: &LedgerContext,
    league: &str,
    month: &str,
) -> Result<Vec<SeasonalItem>, LedgerError> {
    let mut items: Vec<SeasonalItem> = ctx
        .store
        .scan::<SeasonalItem>(keys::SEASONAL_PREFIX)?
        .into_iter()
        .map(|(_, item)| item)
        .filter(|item| item.league == league && item.month_key == month)
        .collect();
    items.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
    Ok(items)
}

/// What a student in `student`'s class can buy right now, with prices they would pay.
pub fn storefront(
    ctx: &LedgerContext,
    student: &StudentRecord,
) -> Result<Vec<(ShopEntry, i64)>, LedgerError> {
    let class: Option<ClassRecord> = ctx.store.get(&keys::class(&student.class_id))?;
    let is_hero = class
        .as_ref()
        .map(|c| c.is_reigning_hero(&student.id))
        .unwrap_or(false);
    let discount = ctx.config.economy.hero_discount_percent;
    let mut entries: Vec<ShopEntry> = fixed_catalog().into_iter().map(ShopEntry::Fixed).collect();
    if let Some(class) = &class {
        let month = month_key(ctx.clock.today());
        entries.extend(
            list_seasonal_items(ctx, &class.league, &month)?
                .into_iter()
                .map(ShopEntry::Seasonal),
        );
    }
    Ok(entries
        .into_iter()
        .map(|entry| {
            let price = hero_price(&entry, is_hero, discount);
            (entry, price)
        })
        .collect())
}
