/// Shop purchases: funds, familiar eggs, hero pricing and unique seasonal items.
mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{at, harness, teacher};
use starledger::ledger::{
    buy_item, list_seasonal_items, set_reigning_hero, stock_seasonal_item, storefront,
    DomainEvent, FamiliarStage, LedgerError, NewSeasonalItem, ShopEntry,
};

fn seasonal(name: &str, price: i64) -> NewSeasonalItem {
    NewSeasonalItem {
        league: "junior".to_string(),
        name: name.to_string(),
        description: "One of a kind".to_string(),
        image: "seasonal/lantern.png".to_string(),
        icon: "icons/lantern.svg".to_string(),
        price,
    }
}

#[test]
fn test_insufficient_funds_changes_nothing() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    h.fund("s1", 10);
    let before = h.score("s1");

    let err = buy_item(&h.ctx, "s1", "gilded_quill").unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            needed: 15,
            available: 10
        }
    ));
    let after = h.score("s1");
    assert_eq!(after.gold, before.gold);
    assert!(after.inventory.is_empty());
}

#[test]
fn test_fixed_purchase_snapshots_item() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    h.fund("s1", 20);

    let outcome = buy_item(&h.ctx, "s1", "gilded_quill").unwrap();
    assert_eq!(outcome.price_paid, 15);
    assert_eq!(outcome.gold_remaining, 5);
    assert!(!outcome.installed_familiar);

    let score = h.score("s1");
    assert_eq!(score.gold, 5);
    assert_eq!(score.inventory.len(), 1);
    assert_eq!(score.inventory[0].name, "Gilded Quill");
    assert_eq!(score.inventory[0].item_id, "gilded_quill");
    assert!(h
        .sink
        .events()
        .iter()
        .any(|e| matches!(e, DomainEvent::ItemPurchased { price: 15, .. })));
}

#[test]
fn test_egg_goes_to_familiar_slot() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    h.edit_score("s1", |r| {
        r.gold = 100;
        r.total_stars = 30;
    });

    let outcome = buy_item(&h.ctx, "s1", "owl_egg").unwrap();
    assert!(outcome.installed_familiar);
    let score = h.score("s1");
    assert!(score.inventory.is_empty());
    let familiar = score.familiar.unwrap();
    assert_eq!(familiar.type_id, "owl");
    assert_eq!(familiar.stage, FamiliarStage::Egg);
    assert_eq!(familiar.stars_when_purchased, 30);

    let err = buy_item(&h.ctx, "s1", "dragon_egg").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
    assert_eq!(h.score("s1").gold, 60);
}

#[test]
fn test_unknown_item_is_not_found() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1"]);
    let err = buy_item(&h.ctx, "s1", "unicorn_horn").unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[test]
fn test_seasonal_item_sells_exactly_once_under_race() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1", "s2"]);
    h.fund("s1", 100);
    h.fund("s2", 100);
    let item = stock_seasonal_item(&h.ctx, &teacher(), seasonal("Moon Lantern", 40)).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["s1", "s2"]
        .into_iter()
        .map(|student| {
            let ctx = h.ctx.clone();
            let barrier = barrier.clone();
            let item_id = item.id.clone();
            thread::spawn(move || {
                barrier.wait();
                buy_item(&ctx, student, &item_id)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let sold_out = results
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::ItemAlreadySold(_))))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(sold_out, 1);

    let holders: Vec<i64> = ["s1", "s2"]
        .iter()
        .map(|id| h.score(id).inventory.len() as i64)
        .collect();
    assert_eq!(holders.iter().sum::<i64>(), 1);
    let total_gold: i64 = ["s1", "s2"].iter().map(|id| h.score(id).gold).sum();
    assert_eq!(total_gold, 160);
    assert!(list_seasonal_items(&h.ctx, "junior", "2025-03")
        .unwrap()
        .is_empty());
}

#[test]
fn test_sold_item_reports_already_sold() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1", "s2"]);
    h.fund("s1", 100);
    h.fund("s2", 100);
    let item = stock_seasonal_item(&h.ctx, &teacher(), seasonal("Moon Lantern", 40)).unwrap();

    buy_item(&h.ctx, "s1", &item.id).unwrap();
    let err = buy_item(&h.ctx, "s2", &item.id).unwrap_err();
    assert!(matches!(err, LedgerError::ItemAlreadySold(_)));
    assert_eq!(h.score("s2").gold, 100);
}

#[test]
fn test_reigning_hero_pays_discounted_seasonal_price() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &["s1", "s2"]);
    h.fund("s1", 100);
    set_reigning_hero(&h.ctx, "c1", Some("s1")).unwrap();
    let item = stock_seasonal_item(&h.ctx, &teacher(), seasonal("Moon Lantern", 40)).unwrap();

    let student = h.ctx.store.get_student("s2").unwrap();
    let listed = storefront(&h.ctx, &student).unwrap();
    assert!(listed
        .iter()
        .any(|(entry, price)| matches!(entry, ShopEntry::Seasonal(_)) && *price == 40));

    let outcome = buy_item(&h.ctx, "s1", &item.id).unwrap();
    assert_eq!(outcome.price_paid, 30);
    assert_eq!(h.score("s1").gold, 70);

    // Fixed items are never discounted.
    let outcome = buy_item(&h.ctx, "s1", "gilded_quill").unwrap();
    assert_eq!(outcome.price_paid, 15);
}

#[test]
fn test_seasonal_item_is_scoped_to_its_month() {
    let h = harness(at(2025, 3, 31));
    h.enrol("c1", &["s1"]);
    h.fund("s1", 100);
    let item = stock_seasonal_item(&h.ctx, &teacher(), seasonal("Moon Lantern", 40)).unwrap();

    h.clock.set(at(2025, 4, 1));
    let err = buy_item(&h.ctx, "s1", &item.id).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
    assert_eq!(h.score("s1").gold, 100);
}

#[test]
fn test_stocking_rejects_free_items() {
    let h = harness(at(2025, 3, 4));
    h.enrol("c1", &[]);
    let err = stock_seasonal_item(&h.ctx, &teacher(), seasonal("Freebie", 0)).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidOperation(_)));
}
