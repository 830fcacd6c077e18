//! Narrative-driven entity modification.
//!
//! The AI mutates the player, a named opponent, or the global meta record
//! through `[Event:Modify]`. Field semantics live here: numeric fields get
//! add/subtract/set arithmetic, list fields get append/remove-by-name, and
//! player health clamps into its valid range.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::command::{EntityModifyData, Modification, ModifyOp};
use crate::run;
use crate::session::{HistoryKind, NoticeLevel, SessionContext, SessionError};
use crate::store::{
    update_doc, DocKey, Enemy, EnemyData, Item, MetaData, PlayerData, StatusEffect,
};

/// Fallback ceiling when the player record carries no explicit max health.
const DEFAULT_MAX_HEALTH: i64 = 99;

const GLOBAL_TARGET: &str = "global";

pub async fn modify_entity(
    ctx: &mut SessionContext,
    data: EntityModifyData,
) -> Result<(), SessionError> {
    let EntityModifyData {
        target,
        modifications,
    } = data;
    if target.eq_ignore_ascii_case(GLOBAL_TARGET) {
        return modify_global(ctx, &modifications).await;
    }
    if ctx.config.is_player(&target) {
        modify_player(ctx, modifications).await
    } else {
        modify_enemy(ctx, &target, modifications).await
    }
}

/// Global modifications only touch the persistent meta record.
async fn modify_global(
    ctx: &mut SessionContext,
    modifications: &[Modification],
) -> Result<(), SessionError> {
    for m in modifications {
        if m.field != "legacy_shards" {
            warn!(field = m.field.as_str(), "unsupported global field, skipped");
            continue;
        }
        let Some(amount) = numeric_operand(&m.value) else {
            warn!(value = %m.value, "legacy shard modification needs a number");
            continue;
        };
        let op = m.operation;
        update_doc::<MetaData, _>(ctx.store(), DocKey::MetaData, move |meta| {
            meta.legacy_shards = match op {
                ModifyOp::Add => meta.legacy_shards + amount,
                ModifyOp::Subtract => meta.legacy_shards - amount,
                ModifyOp::Set => amount,
                ModifyOp::Remove => meta.legacy_shards,
            };
        })
        .await?;
        match m.operation {
            ModifyOp::Add => ctx.notify(
                NoticeLevel::Success,
                &format!("You gained {amount} legacy shards!"),
            ),
            ModifyOp::Subtract => ctx.notify(
                NoticeLevel::Warning,
                &format!("You lost {amount} legacy shards."),
            ),
            _ => {}
        }
    }
    ctx.fetch_all().await
}

/// Notices and history collected while the player updater runs, carried out
/// of the closure through a shared slot.
#[derive(Default)]
struct PlayerChanges {
    notices: Vec<(NoticeLevel, String)>,
    log: Vec<String>,
    chips_touched: bool,
}

async fn modify_player(
    ctx: &mut SessionContext,
    modifications: Vec<Modification>,
) -> Result<(), SessionError> {
    let changes: Arc<Mutex<PlayerChanges>> = Arc::new(Mutex::new(PlayerChanges::default()));
    let changes_slot = Arc::clone(&changes);
    update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, move |player| {
        let mut changes = changes_slot.lock().unwrap_or_else(|e| e.into_inner());
        for m in &modifications {
            apply_player_modification(player, m, &mut changes);
        }
    })
    .await?;
    let changes = std::mem::take(&mut *changes.lock().unwrap_or_else(|e| e.into_inner()));

    for (level, message) in changes.notices {
        ctx.notify(level, &message);
    }
    for entry in changes.log {
        let entry = ctx.config.substitute(&entry);
        ctx.history.add(HistoryKind::Event, entry);
    }

    ctx.fetch_all().await?;
    if changes.chips_touched {
        // May trigger bankruptcy handling against the fresh snapshot.
        run::check_player_vitals(ctx).await?;
    }
    Ok(())
}

fn apply_player_modification(
    player: &mut PlayerData,
    m: &Modification,
    changes: &mut PlayerChanges,
) {
    match m.field.as_str() {
        "health" => {
            let Some(amount) = numeric_operand(&m.value) else {
                warn!(value = %m.value, "health modification needs a number");
                return;
            };
            let max = if player.max_health > 0 {
                player.max_health
            } else {
                DEFAULT_MAX_HEALTH
            };
            let before = player.health;
            player.health = apply_numeric(player.health, m.operation, amount).clamp(0, max);
            let delta = player.health - before;
            if delta < 0 {
                changes
                    .notices
                    .push((NoticeLevel::Warning, format!("You lost {} health!", -delta)));
                changes.log.push(format!("{{user}} lost {} health.", -delta));
            } else if delta > 0 {
                changes
                    .notices
                    .push((NoticeLevel::Success, format!("You recovered {delta} health!")));
                changes.log.push(format!("{{user}} recovered {delta} health."));
            }
        }
        "chips" => {
            let Some(amount) = numeric_operand(&m.value) else {
                warn!(value = %m.value, "chip modification needs a number");
                return;
            };
            let before = player.chips;
            player.chips = apply_numeric(player.chips, m.operation, amount);
            let delta = player.chips - before;
            if delta < 0 {
                changes
                    .notices
                    .push((NoticeLevel::Warning, format!("You lost {} chips.", -delta)));
                changes.log.push(format!("{{user}} lost {} chips.", -delta));
            } else if delta > 0 {
                changes
                    .notices
                    .push((NoticeLevel::Success, format!("You gained {delta} chips!")));
                changes.log.push(format!("{{user}} gained {delta} chips."));
            }
            changes.chips_touched = true;
        }
        "inventory" => match m.operation {
            ModifyOp::Add => match serde_json::from_value::<Item>(m.value.clone()) {
                Ok(item) => {
                    changes
                        .notices
                        .push((NoticeLevel::Success, format!("You obtained: {}", item.name)));
                    changes.log.push(format!("{{user}} obtained {}.", item.name));
                    player.inventory.push(item);
                }
                Err(e) => warn!(error = %e, "bad inventory item payload"),
            },
            ModifyOp::Remove => {
                let before = player.inventory.len();
                player
                    .inventory
                    .retain(|item| !matches_named(&m.value, &item.name, item.id.as_deref()));
                if player.inventory.len() < before {
                    changes
                        .notices
                        .push((NoticeLevel::Info, "An item left your inventory.".to_string()));
                    changes.log.push("{{user}} lost an item.".to_string());
                }
            }
            _ => warn!("inventory only supports add and remove"),
        },
        "status_effects" => match m.operation {
            ModifyOp::Add => match serde_json::from_value::<StatusEffect>(m.value.clone()) {
                Ok(effect) => {
                    changes.notices.push((
                        NoticeLevel::Warning,
                        format!("You are now affected by: {}", effect.name),
                    ));
                    changes
                        .log
                        .push(format!("{{user}} is affected by {}.", effect.name));
                    player.status_effects.push(effect);
                }
                Err(e) => warn!(error = %e, "bad status effect payload"),
            },
            ModifyOp::Remove => {
                let before = player.status_effects.len();
                player
                    .status_effects
                    .retain(|e| !matches_named(&m.value, &e.name, e.id.as_deref()));
                if player.status_effects.len() < before {
                    changes
                        .notices
                        .push((NoticeLevel::Success, "A status effect wore off.".to_string()));
                    changes
                        .log
                        .push("{{user}} recovered from a status effect.".to_string());
                }
            }
            _ => warn!("status effects only support add and remove"),
        },
        "max_health" => {
            if let Some(amount) = numeric_operand(&m.value) {
                player.max_health = apply_numeric(player.max_health, m.operation, amount).max(1);
                player.health = player.health.min(player.max_health);
            }
        }
        other => warn!(field = other, "unsupported player field, skipped"),
    }
}

async fn modify_enemy(
    ctx: &mut SessionContext,
    target: &str,
    modifications: Vec<Modification>,
) -> Result<(), SessionError> {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log_slot = Arc::clone(&log);
    let name = target.to_string();
    update_doc::<EnemyData, _>(ctx.store(), DocKey::EnemyData, move |data| {
        let Some(enemy) = data.enemies.iter_mut().find(|e| e.name == name) else {
            warn!(target = name.as_str(), "entity modification targets unknown enemy");
            return;
        };
        let mut log = log_slot.lock().unwrap_or_else(|e| e.into_inner());
        for m in &modifications {
            apply_enemy_modification(enemy, m, &mut log);
        }
    })
    .await?;

    let log = std::mem::take(&mut *log.lock().unwrap_or_else(|e| e.into_inner()));
    for entry in log {
        ctx.history.add(HistoryKind::Event, entry);
    }
    ctx.fetch_all().await
}

fn apply_enemy_modification(enemy: &mut Enemy, m: &Modification, log: &mut Vec<String>) {
    match m.field.as_str() {
        "chips" => {
            let Some(amount) = numeric_operand(&m.value) else {
                warn!(value = %m.value, "chip modification needs a number");
                return;
            };
            let before = enemy.chips;
            enemy.chips = apply_numeric(enemy.chips, m.operation, amount);
            let delta = enemy.chips - before;
            if delta < 0 {
                log.push(format!("{} lost {} chips.", enemy.name, -delta));
            } else if delta > 0 {
                log.push(format!("{} gained {} chips.", enemy.name, delta));
            }
        }
        "play_style" => {
            if let Some(style) = m.value.as_str() {
                enemy.play_style = style.to_string();
            }
        }
        // Anything else lands in the opponent's free-form fields, so the AI
        // can track mood, tells, or bargains without a schema change.
        field => match m.operation {
            ModifyOp::Set | ModifyOp::Add => {
                enemy.extra.insert(field.to_string(), m.value.clone());
            }
            ModifyOp::Remove => {
                enemy.extra.remove(field);
            }
            ModifyOp::Subtract => warn!(field, "subtract unsupported for free-form fields"),
        },
    }
}

fn apply_numeric(current: i64, op: ModifyOp, amount: i64) -> i64 {
    match op {
        ModifyOp::Add => current + amount,
        ModifyOp::Subtract => current - amount,
        ModifyOp::Set => amount,
        ModifyOp::Remove => current,
    }
}

fn numeric_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Whether a removal payload names this entry: a bare string matches the
/// name, an object matches by its own `name` or `id`.
fn matches_named(value: &Value, name: &str, id: Option<&str>) -> bool {
    match value {
        Value::String(s) => s == name,
        Value::Object(map) => {
            map.get("name").and_then(Value::as_str) == Some(name)
                || (id.is_some() && map.get("id").and_then(Value::as_str) == id)
        }
        _ => false,
    }
}
