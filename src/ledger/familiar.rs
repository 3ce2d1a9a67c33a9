//! Familiar (companion) lifecycle.
//!
//! A familiar is bought as an egg, hatches once its owner has earned enough stars since the
//! purchase, then levels up on stars earned since hatching. The stage change commits first;
//! sprite generation runs afterwards and may fail without undoing it.

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::config::FamiliarConfig;
use crate::ledger::context::LedgerContext;
use crate::ledger::errors::LedgerError;
use crate::ledger::events::DomainEvent;
use crate::ledger::storage::keys;
use crate::ledger::types::{FamiliarStage, FamiliarState, ScoreRecord};

pub const MAX_LEVEL: u8 = 3;

/// Level an alive familiar should be at given stars earned since hatching.
fn level_for(stars_since_hatch: i64, cfg: &FamiliarConfig) -> u8 {
    if stars_since_hatch >= cfg.level3_stars {
        3
    } else if stars_since_hatch >= cfg.level2_stars {
        2
    } else {
        1
    }
}

/// Next lifecycle state for `total_stars`, or `None` if nothing changes. Levels never go
/// down, even if stars are later revoked.
pub fn next_state(
    familiar: &FamiliarState,
    total_stars: i64,
    cfg: &FamiliarConfig,
) -> Option<FamiliarState> {
    match familiar.stage {
        FamiliarStage::Egg => {
            if total_stars - familiar.stars_when_purchased < cfg.hatch_stars {
                return None;
            }
            let mut hatched = familiar.clone();
            hatched.stage = FamiliarStage::Alive;
            hatched.level = 1;
            hatched.stars_when_hatched = Some(total_stars);
            Some(hatched)
        }
        FamiliarStage::Alive => {
            let since = total_stars - familiar.stars_when_hatched.unwrap_or(total_stars);
            let target = level_for(since, cfg).min(MAX_LEVEL);
            if target <= familiar.level {
                return None;
            }
            let mut grown = familiar.clone();
            grown.level = target;
            Some(grown)
        }
    }
}

/// Commit the next lifecycle stage for a student's familiar, if one is due.
pub fn advance_familiar(
    ctx: &LedgerContext,
    student_id: &str,
) -> Result<Option<FamiliarState>, LedgerError> {
    let cfg = ctx.config.familiar.clone();
    let advanced = ctx.store.transaction(|tx| {
        let mut record = tx.score(student_id)?;
        let Some(familiar) = record.familiar.as_ref() else {
            return Ok(None);
        };
        let Some(next) = next_state(familiar, record.total_stars, &cfg) else {
            return Ok(None);
        };
        record.familiar = Some(next.clone());
        record.touch();
        tx.put_score(&record)?;
        Ok(Some(next))
    })?;

    if let Some(state) = &advanced {
        info!(
            "{}'s {} advanced to {:?} level {}",
            student_id, state.type_id, state.stage, state.level
        );
        ctx.publish(vec![DomainEvent::FamiliarAdvanced {
            student_id: student_id.to_string(),
            stage: state.stage,
            level: state.level,
        }]);
    }
    Ok(advanced)
}

fn sprite_prompt(familiar: &FamiliarState, level: u8) -> String {
    let size = match level {
        1 => "a newly hatched baby",
        2 => "a young, growing",
        _ => "a fully grown, majestic",
    };
    format!(
        "Pixel-art sprite of {} {} familiar, friendly, transparent background",
        size, familiar.type_id
    )
}

/// Generate and attach the sprite for the familiar's current level if it is missing.
/// Returns true when a sprite was stored. Generation failures are logged and leave the
/// sprite pending.
pub fn generate_familiar_asset(ctx: &LedgerContext, student_id: &str) -> Result<bool, LedgerError> {
    let record = ctx.store.get_score(student_id)?;
    let Some(familiar) = record.familiar.as_ref() else {
        return Ok(false);
    };
    let Some(level) = familiar.pending_asset_level() else {
        return Ok(false);
    };

    let bytes = match ctx.assets.generate(&sprite_prompt(familiar, level)) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(
                "sprite generation failed for {} level {}: {}",
                student_id, level, e
            );
            return Ok(false);
        }
    };
    let digest = format!("{:x}", Sha256::digest(&bytes));
    ctx.store.put(&keys::asset(&digest), &bytes)?;

    let attached = ctx.store.transaction(|tx| {
        let mut record = tx.score(student_id)?;
        let Some(familiar) = record.familiar.as_mut() else {
            return Ok(false);
        };
        if familiar.level != level || familiar.assets.contains_key(&level) {
            return Ok(false);
        }
        familiar.assets.insert(level, digest.clone());
        tx.put_score(&record)?;
        Ok(true)
    })?;
    debug!(
        "sprite {} for {} level {}: attached={}",
        digest, student_id, level, attached
    );
    Ok(attached)
}

/// Retry sprite generation for every familiar still missing its current sprite.
/// Returns how many were filled in.
pub fn regenerate_pending_assets(ctx: &LedgerContext) -> Result<usize, LedgerError> {
    let mut filled = 0;
    for student_id in ctx.store.list_student_ids()? {
        let Some(record) = ctx.store.get::<ScoreRecord>(&keys::ledger(&student_id))? else {
            continue;
        };
        let pending = record
            .familiar
            .as_ref()
            .and_then(|f| f.pending_asset_level())
            .is_some();
        if pending && generate_familiar_asset(ctx, &student_id)? {
            filled += 1;
        }
    }
    Ok(filled)
}

/// Raw sprite bytes by digest.
pub fn load_asset(ctx: &LedgerContext, digest: &str) -> Result<Option<Vec<u8>>, LedgerError> {
    ctx.store.get(&keys::asset(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egg_hatches_on_stars_since_purchase() {
        let cfg = FamiliarConfig::default();
        let egg = FamiliarState::new_egg("owl", 30);
        assert!(next_state(&egg, 49, &cfg).is_none());
        let hatched = next_state(&egg, 50, &cfg).unwrap();
        assert_eq!(hatched.stage, FamiliarStage::Alive);
        assert_eq!(hatched.level, 1);
        assert_eq!(hatched.stars_when_hatched, Some(50));
        assert_eq!(hatched.pending_asset_level(), Some(1));
    }

    #[test]
    fn levels_follow_stars_since_hatch() {
        let cfg = FamiliarConfig::default();
        let hatched = next_state(&FamiliarState::new_egg("owl", 0), 20, &cfg).unwrap();
        assert!(next_state(&hatched, 79, &cfg).is_none());
        let level2 = next_state(&hatched, 80, &cfg).unwrap();
        assert_eq!(level2.level, 2);
        let level3 = next_state(&level2, 160, &cfg).unwrap();
        assert_eq!(level3.level, 3);
        assert!(next_state(&level3, 10_000, &cfg).is_none());
    }

    #[test]
    fn levels_never_drop() {
        let cfg = FamiliarConfig::default();
        let mut grown = next_state(&FamiliarState::new_egg("owl", 0), 20, &cfg).unwrap();
        grown.level = 2;
        assert!(next_state(&grown, 21, &cfg).is_none());
    }

    #[test]
    fn big_jump_skips_straight_to_level_three() {
        let cfg = FamiliarConfig::default();
        let hatched = next_state(&FamiliarState::new_egg("dragon", 0), 25, &cfg).unwrap();
        assert_eq!(next_state(&hatched, 200, &cfg).unwrap().level, 3);
    }
}
