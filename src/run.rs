//! Run lifecycle: difficulty presets, resets, floor advancement, and the
//! bankruptcy vitals check.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::map::generate_map;
use crate::session::{GameMode, NoticeLevel, SessionContext, SessionError};
use crate::store::{
    read_doc, replace_doc, update_doc, DocKey, EnemyData, GameState, MetaData, PlayerCards,
    PlayerData, PrivateData,
};

/// Chips restocked after a bankruptcy that does not kill the player.
pub const BANKRUPTCY_RESTOCK: i64 = 1000;

/// Legacy shards awarded for clearing a floor.
pub const FLOOR_CLEAR_SHARDS: i64 = 10;

/// Fixed stake for origin mode.
const ORIGIN_HEALTH: i64 = 3;
const ORIGIN_CHIPS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Baby,
    Easy,
    Normal,
    Hard,
    Hell,
}

#[derive(Debug, Clone, Copy)]
pub struct DifficultySettings {
    pub health: i64,
    pub chips: i64,
    pub label: &'static str,
}

lazy_static! {
    pub static ref DIFFICULTY_SETTINGS: HashMap<Difficulty, DifficultySettings> = {
        let mut table = HashMap::new();
        table.insert(Difficulty::Baby, DifficultySettings { health: 5, chips: 2000, label: "Baby" });
        table.insert(Difficulty::Easy, DifficultySettings { health: 4, chips: 1500, label: "Easy" });
        table.insert(Difficulty::Normal, DifficultySettings { health: 3, chips: 1000, label: "Normal" });
        table.insert(Difficulty::Hard, DifficultySettings { health: 2, chips: 500, label: "Hard" });
        table.insert(Difficulty::Hell, DifficultySettings { health: 1, chips: 100, label: "Hell" });
        table
    };
}

/// Begin a fresh roguelike run at floor 0.
pub async fn start_new_run(
    ctx: &mut SessionContext,
    difficulty: Difficulty,
) -> Result<(), SessionError> {
    let settings = DIFFICULTY_SETTINGS[&difficulty];
    info!(?difficulty, "starting new run");

    let player_data = PlayerData {
        name: ctx.config.player_name.clone(),
        health: settings.health,
        max_health: settings.health,
        chips: settings.chips,
        claimable_pot: 0,
        inventory: Vec::new(),
        status_effects: Vec::new(),
    };
    let map_data = generate_map(0);

    let store = ctx.store();
    replace_doc(store, DocKey::PlayerData, player_data).await?;
    replace_doc(store, DocKey::MapData, map_data).await?;
    replace_doc(store, DocKey::GameState, GameState::default()).await?;
    replace_doc(store, DocKey::EnemyData, EnemyData::default()).await?;

    ctx.fetch_all().await
}

/// Blank every per-session document and return to difficulty selection.
///
/// Meta data (legacy shards, unlocks) survives the reset.
pub async fn reset_all_game_data(ctx: &mut SessionContext) -> Result<(), SessionError> {
    if ctx.config.mode != GameMode::Roguelike {
        warn!("reset requested outside roguelike mode, ignoring");
        return Ok(());
    }
    info!("resetting run data");

    let store = ctx.store();
    replace_doc(store, DocKey::PlayerData, PlayerData::default()).await?;
    replace_doc(store, DocKey::MapData, crate::map::MapData::default()).await?;
    replace_doc(store, DocKey::GameState, GameState::default()).await?;
    replace_doc(store, DocKey::EnemyData, EnemyData::default()).await?;
    replace_doc(store, DocKey::PlayerCards, PlayerCards::default()).await?;
    replace_doc(store, DocKey::PrivateData, PrivateData::default()).await?;

    ctx.staged_actions.clear();
    ctx.pending_chip_delta = 0;
    ctx.current_hint = None;

    ctx.notify(NoticeLevel::Success, "The challenge has been reset.");
    ctx.fetch_all().await
}

/// Select roguelike or origin mode. Origin mode seeds a fixed-stake player
/// immediately; roguelike waits for a difficulty pick.
pub async fn select_game_mode(
    ctx: &mut SessionContext,
    mode: GameMode,
) -> Result<(), SessionError> {
    info!(?mode, "game mode selected");
    ctx.config.mode = mode;

    if mode == GameMode::Origin {
        let player_data = PlayerData {
            name: ctx.config.player_name.clone(),
            health: ORIGIN_HEALTH,
            max_health: ORIGIN_HEALTH,
            chips: ORIGIN_CHIPS,
            claimable_pot: 0,
            inventory: Vec::new(),
            status_effects: Vec::new(),
        };
        replace_doc(ctx.store(), DocKey::PlayerData, player_data).await?;
    }
    ctx.fetch_all().await
}

/// Move to the next floor once the current boss is down.
pub async fn advance_to_next_floor(ctx: &mut SessionContext) -> Result<(), SessionError> {
    if !ctx.snapshot.map_data.boss_defeated {
        ctx.notify(
            NoticeLevel::Warning,
            "You must defeat this floor's boss first!",
        );
        return Ok(());
    }

    update_doc::<MetaData, _>(ctx.store(), DocKey::MetaData, |meta| {
        meta.legacy_shards += FLOOR_CLEAR_SHARDS;
    })
    .await?;
    ctx.notify(
        NoticeLevel::Success,
        &format!("Boss defeated! You earned {FLOOR_CLEAR_SHARDS} legacy shards."),
    );

    let next_layer = ctx.snapshot.map_data.map_layer + 1;
    let new_map = generate_map(next_layer);
    replace_doc(ctx.store(), DocKey::MapData, new_map).await?;

    ctx.notify(
        NoticeLevel::Success,
        &format!("You have reached floor {}!", next_layer + 1),
    );
    ctx.fetch_all().await
}

/// Transfer the claimable pot into chips, atomically within one update.
pub async fn claim_pot(ctx: &mut SessionContext) -> Result<(), SessionError> {
    if ctx.snapshot.player_data.claimable_pot <= 0 {
        return Ok(());
    }
    update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
        p.chips += p.claimable_pot;
        p.claimable_pot = 0;
    })
    .await?;
    ctx.fetch_all().await
}

/// Abandon the run. No shards are awarded.
pub async fn surrender(ctx: &mut SessionContext) -> Result<(), SessionError> {
    info!("player surrenders the run");
    reset_all_game_data(ctx).await?;
    ctx.notify(NoticeLevel::Info, "You gave up the challenge.");
    Ok(())
}

/// Throw the player's fate to the opponent. Prompt only, no state change.
pub async fn beg_for_mercy(ctx: &SessionContext) {
    ctx.notify(
        NoticeLevel::Info,
        "Your fate is now in your opponent's hands...",
    );
    ctx.submit_prompt(
        "(System: {{user}} falls to their knees and begs for mercy. \
         Decide, in character, whether to spare them, humiliate them further, \
         or end their suffering.)",
    )
    .await;
}

/// Bankruptcy check, the single place chip-driven death is decided.
///
/// Always re-reads the just-persisted player document rather than trusting
/// the snapshot, so a chip mutation that landed a moment ago is seen.
pub async fn check_player_vitals(ctx: &mut SessionContext) -> Result<(), SessionError> {
    let latest: PlayerData = read_doc(ctx.store(), DocKey::PlayerData).await?;
    if latest.chips > 0 || !ctx.snapshot.run_in_progress {
        return Ok(());
    }

    warn!("player is out of chips, applying health penalty");
    update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
        p.health = (p.health - 1).max(0);
        if p.health > 0 {
            p.chips = BANKRUPTCY_RESTOCK;
        }
    })
    .await?;

    let after: PlayerData = read_doc(ctx.store(), DocKey::PlayerData).await?;
    if after.health == 0 {
        ctx.notify(
            NoticeLevel::Error,
            "Your health is gone. The challenge is over.",
        );
        reset_all_game_data(ctx).await
    } else {
        ctx.notify(
            NoticeLevel::Warning,
            &format!(
                "You lost all your chips and 1 health! \
                 The house staked you {BANKRUPTCY_RESTOCK} chips to continue."
            ),
        );
        ctx.fetch_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use crate::store::MemoryStore;

    fn roguelike_context() -> SessionContext {
        SessionContext::new(Box::new(MemoryStore::new()), SessionConfig::new("Mara"))
    }

    #[test]
    fn test_difficulty_table() {
        assert_eq!(DIFFICULTY_SETTINGS[&Difficulty::Baby].chips, 2000);
        assert_eq!(DIFFICULTY_SETTINGS[&Difficulty::Hell].health, 1);
        assert_eq!(DIFFICULTY_SETTINGS.len(), 5);
    }

    #[tokio::test]
    async fn test_start_new_run_seeds_documents() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();

        assert_eq!(ctx.snapshot.player_data.health, 3);
        assert_eq!(ctx.snapshot.player_data.chips, 1000);
        assert_eq!(ctx.snapshot.player_data.name, "Mara");
        assert!(ctx.snapshot.map_data.is_present());
        assert_eq!(ctx.snapshot.map_data.map_layer, 0);
        assert!(ctx.snapshot.run_in_progress);
    }

    #[tokio::test]
    async fn test_advance_requires_boss_defeated() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();
        advance_to_next_floor(&mut ctx).await.unwrap();
        // Boss not defeated, still on floor 0.
        assert_eq!(ctx.snapshot.map_data.map_layer, 0);
    }

    #[tokio::test]
    async fn test_advance_awards_shards_and_new_map() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();
        update_doc::<crate::map::MapData, _>(ctx.store(), DocKey::MapData, |m| {
            m.boss_defeated = true;
        })
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();

        advance_to_next_floor(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.map_data.map_layer, 1);
        assert!(!ctx.snapshot.map_data.boss_defeated);
        assert_eq!(ctx.snapshot.meta_data.legacy_shards, FLOOR_CLEAR_SHARDS);
    }

    #[tokio::test]
    async fn test_vitals_restock_on_bankruptcy() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();
        update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
            p.chips = 0;
        })
        .await
        .unwrap();

        check_player_vitals(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.health, 2);
        assert_eq!(ctx.snapshot.player_data.chips, BANKRUPTCY_RESTOCK);
        assert!(ctx.snapshot.run_in_progress);
    }

    #[tokio::test]
    async fn test_vitals_death_resets_everything() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Hell).await.unwrap();
        update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
            p.chips = -50;
        })
        .await
        .unwrap();

        check_player_vitals(&mut ctx).await.unwrap();
        // Hell starts with 1 health, so bankruptcy is fatal.
        assert_eq!(ctx.snapshot.player_data.health, 0);
        assert!(!ctx.snapshot.map_data.is_present());
        assert!(!ctx.snapshot.run_in_progress);
    }

    #[tokio::test]
    async fn test_vitals_ignores_solvent_player() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();
        check_player_vitals(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.health, 3);
        assert_eq!(ctx.snapshot.player_data.chips, 1000);
    }

    #[tokio::test]
    async fn test_claim_pot_transfers_atomically() {
        let mut ctx = roguelike_context();
        start_new_run(&mut ctx, Difficulty::Normal).await.unwrap();
        update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
            p.claimable_pot = 400;
        })
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();

        claim_pot(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.chips, 1400);
        assert_eq!(ctx.snapshot.player_data.claimable_pot, 0);
    }

    #[tokio::test]
    async fn test_origin_mode_seeds_fixed_stake() {
        let mut ctx = roguelike_context();
        select_game_mode(&mut ctx, GameMode::Origin).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.chips, ORIGIN_CHIPS);
        assert_eq!(ctx.snapshot.player_data.health, ORIGIN_HEALTH);
        assert!(ctx.snapshot.run_in_progress);
    }
}
