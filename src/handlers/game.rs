//! Game lifecycle and table-action commands.
//!
//! Dealing is two-phase: AI deal commands only queue requests into the game
//! state ([`queue_deal`]); [`process_pending_deals`] later draws from the
//! authoritative deck in one atomic update and distributes the cards, and
//! [`cleanup_after_deal`] strips the transient markers once presentation is
//! done. The cleanup writes are strictly sequential; running them in parallel
//! once caused a queue-never-cleared loop in the system this replaces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::command::{
    BetData, CardFilter, CardIndex, CardModifyTarget, CardOp, DealRequest, DealTarget, EndData,
    GameResult, Location, Modification, ModifyOp, StartData, SwapData, SwapMode,
};
use crate::deck::{
    build_deck, deck_string, rank_value, shift_rank, shuffle, value_to_rank, Card, DeckSpec,
    Visibility,
};
use crate::map::{MapNode, NodeKind};
use crate::run;
use crate::session::{HistoryKind, NoticeLevel, SessionContext, SessionError};
use crate::staging::{self, StagedAction};
use crate::store::{
    read_doc, replace_doc, update_doc, DocKey, Enemy, EnemyData, GameState, PlayerCards,
    PlayerData, PrivateData, VisibleDeck, Wager,
};

const DEFAULT_ENEMY_CHIPS: i64 = 1000;

/// Mirror the deck into the visible-deck document when deterministic dealing
/// is enabled. The AI is expected to deal in exactly this order.
async fn update_visible_deck(ctx: &SessionContext, deck: &[Card]) -> Result<(), SessionError> {
    if !ctx.config.deck_visible_to_ai {
        return Ok(());
    }
    let mirror = VisibleDeck {
        deck: deck_string(deck),
        comment: "This deck order is binding. Deal cards strictly in this order.".to_string(),
    };
    replace_doc(ctx.store(), DocKey::VisibleDeck, mirror).await?;
    debug!("visible deck mirror updated");
    Ok(())
}

/// Build and shuffle a custom deck into the private document.
pub async fn setup_deck(ctx: &mut SessionContext, spec: &DeckSpec) -> Result<(), SessionError> {
    let mut deck = build_deck(spec);
    shuffle(&mut deck);
    info!(cards = deck.len(), "custom deck created");
    ctx.history.add(
        HistoryKind::Status,
        format!("A deck of {} cards was set up.", deck.len()),
    );
    update_visible_deck(ctx, &deck).await?;
    replace_doc(ctx.store(), DocKey::PrivateData, PrivateData { deck }).await?;
    ctx.fetch_all().await
}

/// Start a new hand: seed opponents, reset the table, shuffle a fresh deck.
pub async fn start_game(ctx: &mut SessionContext, data: StartData) -> Result<(), SessionError> {
    ctx.current_hint = None;

    let Some(players) = data.players else {
        warn!("Game:Start rejected, players list missing or malformed");
        ctx.notify(
            NoticeLevel::Error,
            "Cannot start the game: the command is missing player information.",
        );
        return Ok(());
    };

    let game_type = data.game_type.unwrap_or_else(|| "unknown".to_string());
    ctx.notify(
        NoticeLevel::Info,
        &format!("A new game has begun: {game_type}"),
    );
    ctx.history
        .add(HistoryKind::Status, format!("Game started: {game_type}"));

    let enemy_names: Vec<String> = players
        .iter()
        .filter(|p| !ctx.config.is_player(p))
        .cloned()
        .collect();
    let enemies = seed_enemies(&enemy_names, data.initial_state.as_ref());

    let mut deck = build_deck(&DeckSpec::default());
    shuffle(&mut deck);
    update_visible_deck(ctx, &deck).await?;

    let store = ctx.store();
    replace_doc(store, DocKey::PrivateData, PrivateData { deck }).await?;
    replace_doc(store, DocKey::EnemyData, EnemyData { enemies }).await?;

    let first_player = players.first().cloned();
    update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
        s.game_type = Some(game_type);
        s.players = players;
        s.current_turn = first_player;
        s.pot_amount = 0;
        s.board_cards = Vec::new();
        s.custom_wagers = Vec::new();
        s.last_bet_amount = 0;
        s.last_deal_animation_queue = None;
    })
    .await?;
    update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, |cards| {
        cards.current_hand = Vec::new();
    })
    .await?;

    ctx.fetch_all().await
}

/// Build opponent records from per-name or broadcast initial state.
fn seed_enemies(names: &[String], initial_state: Option<&Value>) -> Vec<Enemy> {
    names
        .iter()
        .map(|name| {
            let seed = match initial_state {
                // Per-opponent entries matched by name.
                Some(Value::Array(entries)) => entries
                    .iter()
                    .find(|e| e.get("name").and_then(Value::as_str) == Some(name))
                    .cloned(),
                // One object broadcast to every opponent.
                Some(Value::Object(_)) => initial_state.cloned(),
                _ => None,
            };
            let mut enemy = match seed {
                Some(seed) => serde_json::from_value(seed).unwrap_or_else(|e| {
                    warn!(name = name.as_str(), error = %e, "bad initial enemy state, using defaults");
                    Enemy::default()
                }),
                None => Enemy {
                    play_style: "Unknown".to_string(),
                    chips: DEFAULT_ENEMY_CHIPS,
                    ..Enemy::default()
                },
            };
            enemy.name = name.clone();
            enemy.hand = Vec::new();
            enemy
        })
        .collect()
}

/// Phase 1 of the deal protocol: queue the requests without touching the deck.
pub async fn queue_deal(
    ctx: &mut SessionContext,
    actions: Vec<DealRequest>,
) -> Result<(), SessionError> {
    debug!(requests = actions.len(), "deal actions queued");
    update_doc::<GameState, _>(ctx.store(), DocKey::GameState, move |s| {
        s.unprocessed_deal_actions = Some(actions);
    })
    .await?;
    ctx.fetch_all().await
}

/// Outcome of the atomic deck draw inside one update round trip.
enum DrawOutcome {
    Drawn(Vec<Card>),
    Short { available: usize },
}

/// Phase 2: draw the queued cards atomically and distribute them.
///
/// If the deck is short, the whole operation aborts with a user-visible error
/// and the deck is left untouched. Distribution writes are sequential; the
/// game-state write lands last so the animation queue only appears once the
/// hands already hold their cards.
pub async fn process_pending_deals(ctx: &mut SessionContext) -> Result<(), SessionError> {
    let state: GameState = read_doc(ctx.store(), DocKey::GameState).await?;
    let Some(actions) = state.unprocessed_deal_actions else {
        return Ok(());
    };
    let total: u64 = actions.iter().map(|a| a.count).sum();
    if actions.is_empty() || total == 0 {
        return Ok(());
    }

    let outcome: Arc<Mutex<Option<DrawOutcome>>> = Arc::new(Mutex::new(None));
    let outcome_slot = Arc::clone(&outcome);
    update_doc::<PrivateData, _>(ctx.store(), DocKey::PrivateData, move |p| {
        let mut slot = outcome_slot.lock().unwrap_or_else(|e| e.into_inner());
        if (p.deck.len() as u64) < total {
            *slot = Some(DrawOutcome::Short {
                available: p.deck.len(),
            });
            return;
        }
        let drawn: Vec<Card> = p.deck.drain(..total as usize).collect();
        *slot = Some(DrawOutcome::Drawn(drawn));
    })
    .await?;

    let mut drawn = match outcome.lock().unwrap_or_else(|e| e.into_inner()).take() {
        Some(DrawOutcome::Drawn(cards)) => cards,
        Some(DrawOutcome::Short { available }) => {
            warn!(needed = total, available, "deal aborted, deck too small");
            ctx.notify(
                NoticeLevel::Error,
                &format!("Not enough cards in the deck: needed {total}, only {available} left."),
            );
            return Ok(());
        }
        None => return Ok(()),
    };

    let mut to_player: Vec<Card> = Vec::new();
    let mut to_board: Vec<Card> = Vec::new();
    let mut to_enemies: HashMap<String, Vec<Card>> = HashMap::new();
    for action in &actions {
        if action.count == 0 {
            continue;
        }
        let take = (action.count as usize).min(drawn.len());
        let mut cards: Vec<Card> = drawn.drain(..take).collect();
        for card in &mut cards {
            card.visibility = action.visibility.unwrap_or(Visibility::Owner);
            card.is_new = true;
        }
        ctx.history.add(
            HistoryKind::Deal,
            format!("Dealt {} card(s) to {:?}.", cards.len(), action.target),
        );
        match action.target {
            DealTarget::Player => to_player.extend(cards),
            DealTarget::Board => to_board.extend(cards),
            DealTarget::Enemy => match &action.name {
                Some(name) => to_enemies.entry(name.clone()).or_default().extend(cards),
                None => warn!("deal request targets an enemy but names none, cards dropped"),
            },
        }
    }

    let store = ctx.store();
    if !to_player.is_empty() {
        update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, move |hand| {
            hand.current_hand.extend(to_player);
        })
        .await?;
    }
    if !to_enemies.is_empty() {
        update_doc::<EnemyData, _>(store, DocKey::EnemyData, move |data| {
            for enemy in &mut data.enemies {
                if let Some(cards) = to_enemies.remove(&enemy.name) {
                    enemy.hand.extend(cards);
                }
            }
            for name in to_enemies.keys() {
                warn!(name = name.as_str(), "deal targets unknown enemy, cards dropped");
            }
        })
        .await?;
    }

    let board_dealt = !to_board.is_empty();
    update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
        s.unprocessed_deal_actions = None;
        s.last_deal_animation_queue = Some(actions);
        if board_dealt {
            s.board_cards.extend(to_board);
            s.last_bet_amount = 0;
        }
    })
    .await?;

    ctx.fetch_all().await
}

/// Strip the transient new-card markers and clear the animation queue.
///
/// Each document is cleaned in its own sequential write, game state first,
/// and the authoritative state is refetched last.
pub async fn cleanup_after_deal(ctx: &mut SessionContext) -> Result<(), SessionError> {
    let store = ctx.store();
    update_doc::<GameState, _>(store, DocKey::GameState, |s| {
        s.last_deal_animation_queue = None;
        for card in &mut s.board_cards {
            card.is_new = false;
        }
    })
    .await?;
    update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, |hand| {
        for card in &mut hand.current_hand {
            card.is_new = false;
        }
    })
    .await?;
    update_doc::<EnemyData, _>(store, DocKey::EnemyData, |data| {
        for enemy in &mut data.enemies {
            for card in &mut enemy.hand {
                card.is_new = false;
            }
        }
    })
    .await?;
    ctx.fetch_all().await
}

/// Indices of the cards a filter selects, in location order.
fn select_card_indices<R: Rng>(cards: &[Card], filter: &CardFilter, rng: &mut R) -> Vec<usize> {
    let candidates: Vec<usize> = cards
        .iter()
        .enumerate()
        .filter(|(_, c)| filter.suit.as_deref().map_or(true, |s| c.suit == s))
        .filter(|(_, c)| filter.rank.as_deref().map_or(true, |r| c.rank == r))
        .map(|(i, _)| i)
        .collect();
    match filter.index.clone().unwrap_or_default() {
        CardIndex::All => candidates,
        CardIndex::Random => {
            if candidates.is_empty() {
                Vec::new()
            } else {
                vec![candidates[rng.gen_range(0..candidates.len())]]
            }
        }
        CardIndex::At(i) => candidates.get(i).copied().into_iter().collect(),
    }
}

/// Apply one field mutation to a card. Rank arithmetic clamps into [2, A];
/// suit and visibility only support `set`.
fn apply_card_modification(card: &mut Card, m: &Modification) {
    match m.field.as_str() {
        "rank" => {
            let operand = match &m.value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => rank_value(s).or_else(|| s.trim().parse().ok()),
                _ => None,
            };
            let Some(operand) = operand else { return };
            let shifted = match m.operation {
                ModifyOp::Set => Some(value_to_rank(operand)),
                ModifyOp::Add => shift_rank(&card.rank, operand),
                ModifyOp::Subtract => shift_rank(&card.rank, -operand),
                ModifyOp::Remove => None,
            };
            // Jokers and other special cards have no rank value to shift.
            if let Some(rank) = shifted {
                card.rank = rank;
            }
        }
        "suit" => {
            if m.operation == ModifyOp::Set {
                if let Some(suit) = m.value.as_str() {
                    card.suit = suit.to_string();
                }
            }
        }
        "visibility" => {
            if m.operation == ModifyOp::Set {
                if let Ok(visibility) = serde_json::from_value::<Visibility>(m.value.clone()) {
                    card.visibility = visibility;
                }
            }
        }
        other => debug!(field = other, "unsupported card field, ignored"),
    }
}

fn apply_card_op(cards: &mut Vec<Card>, target: &CardModifyTarget) {
    let mut rng = rand::thread_rng();
    match target.operation {
        CardOp::Update => {
            for i in select_card_indices(cards, &target.card_filter, &mut rng) {
                for m in &target.modifications {
                    apply_card_modification(&mut cards[i], m);
                }
            }
        }
        CardOp::Add => cards.extend(target.cards_to_add.iter().cloned()),
        CardOp::Remove => {
            let mut indices = select_card_indices(cards, &target.card_filter, &mut rng);
            indices.sort_unstable_by(|a, b| b.cmp(a));
            for i in indices {
                cards.remove(i);
            }
        }
    }
}

/// Bulk card transformation across hands, board, and deck.
pub async fn modify_cards(
    ctx: &mut SessionContext,
    targets: Vec<CardModifyTarget>,
) -> Result<(), SessionError> {
    for target in targets {
        let store = ctx.store();
        match target.location {
            Location::PlayerHand => {
                update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, move |hand| {
                    apply_card_op(&mut hand.current_hand, &target);
                })
                .await?;
            }
            Location::EnemyHand => {
                update_doc::<EnemyData, _>(store, DocKey::EnemyData, move |data| {
                    let name = target.enemy_name.as_deref().unwrap_or_default();
                    match data.enemies.iter_mut().find(|e| e.name == name) {
                        Some(enemy) => apply_card_op(&mut enemy.hand, &target),
                        None => warn!(name, "card modification targets unknown enemy"),
                    }
                })
                .await?;
            }
            Location::Board => {
                update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
                    apply_card_op(&mut s.board_cards, &target);
                })
                .await?;
            }
            Location::Deck => {
                update_doc::<PrivateData, _>(store, DocKey::PrivateData, move |p| {
                    apply_card_op(&mut p.deck, &target);
                })
                .await?;
            }
        }
    }
    ctx.fetch_all().await
}

/// Shallow-merge arbitrary AI-declared fields into the game state.
pub async fn update_state(
    ctx: &mut SessionContext,
    fields: serde_json::Map<String, Value>,
) -> Result<(), SessionError> {
    ctx.store()
        .update(
            DocKey::GameState.as_str(),
            Box::new(move |raw| {
                let mut doc = match raw {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                for (key, value) in fields {
                    doc.insert(key, value);
                }
                Value::Object(doc)
            }),
        )
        .await?;
    ctx.fetch_all().await
}

/// Transient advisory shown to the player; never persisted.
pub fn hint(ctx: &mut SessionContext, text: Option<String>) {
    if let Some(text) = text {
        debug!(text = text.as_str(), "hint received");
        ctx.current_hint = Some(text);
    }
}

/// Terminal transition for the hand.
pub async fn end_game(ctx: &mut SessionContext, data: EndData) -> Result<(), SessionError> {
    ctx.current_hint = None;
    let reason = data.reason.unwrap_or_default();
    ctx.history
        .add(HistoryKind::Status, format!("Game over: {reason}"));

    let pot = ctx.snapshot.game_state.pot_amount;
    if matches!(data.result, GameResult::Win | GameResult::BossWin) && pot > 0 {
        // Winnings are parked as a claimable pot, not credited directly.
        update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, move |p| {
            p.claimable_pot += pot;
        })
        .await?;
    }

    match data.result {
        GameResult::Lose => {
            ctx.notify(NoticeLevel::Warning, &reason);
            run::check_player_vitals(ctx).await?;
        }
        GameResult::Dead => {
            ctx.notify(NoticeLevel::Error, &reason);
            // The reset blanks every document; nothing left to clear.
            return run::reset_all_game_data(ctx).await;
        }
        GameResult::BossWin => {
            ctx.notify(NoticeLevel::Success, &reason);
            update_doc::<crate::map::MapData, _>(ctx.store(), DocKey::MapData, attach_boss_reward_nodes)
                .await?;
        }
        GameResult::Win => ctx.notify(NoticeLevel::Success, &reason),
        GameResult::Escape => ctx.notify(NoticeLevel::Info, &reason),
        GameResult::Draw => ctx.notify(NoticeLevel::Info, &reason),
    }

    let store = ctx.store();
    replace_doc(store, DocKey::EnemyData, EnemyData::default()).await?;
    replace_doc(store, DocKey::GameState, GameState::default()).await?;
    update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, |hand| {
        hand.current_hand = Vec::new();
    })
    .await?;

    ctx.fetch_all().await
}

/// After a boss win, wire angel and devil reward nodes onto the boss.
/// Idempotent: re-applying after a replayed command changes nothing.
fn attach_boss_reward_nodes(map: &mut crate::map::MapData) {
    map.boss_defeated = true;
    let Some(boss) = map.boss_node() else { return };
    let boss_id = boss.id.clone();
    let (boss_row, boss_x, boss_y) = (boss.row, boss.x, boss.y);

    let rewards = [
        (format!("L{}-ANGEL", map.map_layer), NodeKind::Angel, -100.0),
        (format!("L{}-DEVIL", map.map_layer), NodeKind::Devil, 100.0),
    ];
    for (id, kind, dx) in rewards {
        if map.node(&id).is_none() {
            map.nodes.push(MapNode {
                id: id.clone(),
                row: boss_row + 1,
                x: boss_x + dx,
                y: boss_y - 100.0,
                kind,
                connections: Vec::new(),
                properties: Vec::new(),
            });
        }
        if !map.paths.iter().any(|p| p.from == boss_id && p.to == id) {
            map.paths.push(crate::map::MapPath {
                from: boss_id.clone(),
                to: id.clone(),
            });
        }
        if let Some(boss) = map.node_mut(&boss_id) {
            if !boss.connections.contains(&id) {
                boss.connections.push(id);
            }
        }
    }
}

/// Deduct chips from whoever acted: the player's document or the named
/// enemy's record.
async fn deduct_chips(
    ctx: &SessionContext,
    actor: &str,
    amount: i64,
) -> Result<(), SessionError> {
    let store = ctx.store();
    if ctx.config.is_player(actor) {
        update_doc::<PlayerData, _>(store, DocKey::PlayerData, move |p| {
            p.chips -= amount;
        })
        .await?;
    } else {
        let actor = actor.to_string();
        update_doc::<EnemyData, _>(store, DocKey::EnemyData, move |data| {
            match data.enemies.iter_mut().find(|e| e.name == actor) {
                Some(enemy) => enemy.chips -= amount,
                None => warn!(actor = actor.as_str(), "chip deduction targets unknown actor"),
            }
        })
        .await?;
    }
    Ok(())
}

pub async fn bet(ctx: &mut SessionContext, data: BetData) -> Result<(), SessionError> {
    ctx.history.add(
        HistoryKind::Action,
        format!(
            "{} bet {}.",
            data.player_name,
            data.amount
                .map(|a| format!("{a} chips"))
                .unwrap_or_else(|| "a wager".to_string())
        ),
    );

    if let Some(amount) = data.amount {
        update_doc::<GameState, _>(ctx.store(), DocKey::GameState, move |s| {
            s.pot_amount += amount;
            s.last_bet_amount = amount;
        })
        .await?;
        deduct_chips(ctx, &data.player_name, amount).await?;
    }
    if let Some(things) = data.things {
        let player = data.player_name.clone();
        update_doc::<GameState, _>(ctx.store(), DocKey::GameState, move |s| {
            s.custom_wagers.push(Wager {
                player,
                item: things,
            });
        })
        .await?;
    }
    ctx.fetch_all().await
}

pub async fn call(ctx: &mut SessionContext, player_name: &str) -> Result<(), SessionError> {
    let amount = ctx.snapshot.game_state.last_bet_amount;
    if amount <= 0 {
        warn!(player_name, "call received with no outstanding bet, ignoring");
        return Ok(());
    }
    ctx.history.add(
        HistoryKind::Action,
        format!("{player_name} called {amount} chips."),
    );
    update_doc::<GameState, _>(ctx.store(), DocKey::GameState, move |s| {
        s.pot_amount += amount;
    })
    .await?;
    deduct_chips(ctx, player_name, amount).await?;
    ctx.fetch_all().await
}

pub async fn check(ctx: &mut SessionContext, player_name: &str) -> Result<(), SessionError> {
    ctx.history
        .add(HistoryKind::Action, format!("{player_name} checked."));
    ctx.fetch_all().await
}

pub async fn fold(ctx: &mut SessionContext, player_name: &str) -> Result<(), SessionError> {
    ctx.history
        .add(HistoryKind::Action, format!("{player_name} folded."));
    ctx.fetch_all().await
}

/// Draw one public card for the actor; reuses the deal queue.
pub async fn hit(ctx: &mut SessionContext, player_name: &str) -> Result<(), SessionError> {
    ctx.history
        .add(HistoryKind::Action, format!("{player_name} hit."));
    let action = if ctx.config.is_player(player_name) {
        DealRequest {
            target: DealTarget::Player,
            name: None,
            count: 1,
            visibility: Some(Visibility::Public),
        }
    } else {
        DealRequest {
            target: DealTarget::Enemy,
            name: Some(player_name.to_string()),
            count: 1,
            visibility: Some(Visibility::Public),
        }
    };
    queue_deal(ctx, vec![action]).await
}

/// Reveal the named enemy's entire hand.
pub async fn showdown(ctx: &mut SessionContext, player_name: &str) -> Result<(), SessionError> {
    ctx.history
        .add(HistoryKind::Action, format!("{player_name} showed their hand."));
    let name = player_name.to_string();
    update_doc::<EnemyData, _>(ctx.store(), DocKey::EnemyData, move |data| {
        if let Some(enemy) = data.enemies.iter_mut().find(|e| e.name == name) {
            for card in &mut enemy.hand {
                card.visibility = Visibility::Public;
            }
        }
    })
    .await?;
    ctx.fetch_all().await
}

/// Snapshot copy of the cards at a swap location.
fn cards_at(ctx: &SessionContext, location: &Location, enemy_name: Option<&str>) -> Option<Vec<Card>> {
    match location {
        Location::PlayerHand => Some(ctx.snapshot.player_cards.current_hand.clone()),
        Location::EnemyHand => ctx
            .snapshot
            .enemy_data
            .enemies
            .iter()
            .find(|e| Some(e.name.as_str()) == enemy_name)
            .map(|e| e.hand.clone()),
        Location::Board => Some(ctx.snapshot.game_state.board_cards.clone()),
        Location::Deck => {
            warn!("swap cannot address the deck");
            None
        }
    }
}

async fn write_cards(
    ctx: &SessionContext,
    location: &Location,
    enemy_name: Option<&str>,
    cards: Vec<Card>,
) -> Result<(), SessionError> {
    let store = ctx.store();
    match location {
        Location::PlayerHand => {
            update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, move |hand| {
                hand.current_hand = cards;
            })
            .await?
        }
        Location::EnemyHand => {
            let name = enemy_name.unwrap_or_default().to_string();
            update_doc::<EnemyData, _>(store, DocKey::EnemyData, move |data| {
                if let Some(enemy) = data.enemies.iter_mut().find(|e| e.name == name) {
                    enemy.hand = cards;
                }
            })
            .await?
        }
        Location::Board => {
            update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
                s.board_cards = cards;
            })
            .await?
        }
        Location::Deck => warn!("swap cannot write to the deck"),
    }
    Ok(())
}

/// Swap cards between two locations, either N at random or two specific
/// filter-selected cards. Specific mode applies nothing when either selector
/// comes up empty.
pub async fn swap_cards(ctx: &mut SessionContext, data: SwapData) -> Result<(), SessionError> {
    match data.swap_type {
        SwapMode::Random => {
            let (Some(source), Some(destination)) = (&data.source, &data.destination) else {
                warn!("random swap missing source or destination");
                return Ok(());
            };
            if data.count == 0 {
                warn!("random swap with zero count");
                return Ok(());
            }
            let (Some(mut source_cards), Some(mut dest_cards)) = (
                cards_at(ctx, &source.location, source.enemy_name.as_deref()),
                cards_at(ctx, &destination.location, destination.enemy_name.as_deref()),
            ) else {
                return Ok(());
            };

            let mut rng = rand::thread_rng();
            let mut from_source = Vec::new();
            let mut from_dest = Vec::new();
            for _ in 0..data.count {
                if !source_cards.is_empty() {
                    from_source.push(source_cards.remove(rng.gen_range(0..source_cards.len())));
                }
                if !dest_cards.is_empty() {
                    from_dest.push(dest_cards.remove(rng.gen_range(0..dest_cards.len())));
                }
            }
            source_cards.extend(from_dest);
            dest_cards.extend(from_source);

            write_cards(ctx, &source.location, source.enemy_name.as_deref(), source_cards).await?;
            write_cards(
                ctx,
                &destination.location,
                destination.enemy_name.as_deref(),
                dest_cards,
            )
            .await?;
        }
        SwapMode::Specific => {
            let (Some(one), Some(two)) = (&data.card_one, &data.card_two) else {
                warn!("specific swap missing card_one or card_two");
                return Ok(());
            };
            let (Some(mut cards_one), Some(mut cards_two)) = (
                cards_at(ctx, &one.location, one.enemy_name.as_deref()),
                cards_at(ctx, &two.location, two.enemy_name.as_deref()),
            ) else {
                return Ok(());
            };

            let mut rng = rand::thread_rng();
            let pick_one = select_card_indices(&cards_one, &one.card_filter, &mut rng)
                .first()
                .copied();
            let pick_two = select_card_indices(&cards_two, &two.card_filter, &mut rng)
                .first()
                .copied();
            let (Some(i), Some(j)) = (pick_one, pick_two) else {
                warn!("specific swap selector matched no cards, nothing applied");
                return Ok(());
            };

            let card_one = cards_one.remove(i);
            let card_two = cards_two.remove(j);
            cards_one.push(card_two);
            cards_two.push(card_one);

            write_cards(ctx, &one.location, one.enemy_name.as_deref(), cards_one).await?;
            write_cards(ctx, &two.location, two.enemy_name.as_deref(), cards_two).await?;
        }
    }
    ctx.fetch_all().await
}

/// Where a GM-initiated draw sends its cards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GmDrawTarget {
    Player,
    Board,
    AllPlayers,
    Enemy(String),
}

/// Game-master draw: queue a deal outside the AI command flow, optionally
/// prompting the AI with a notification plus a fresh context block.
pub async fn gm_draw_cards(
    ctx: &mut SessionContext,
    target: GmDrawTarget,
    quantity: u64,
    visibility: Visibility,
    notification: Option<&str>,
) -> Result<(), SessionError> {
    if !ctx.snapshot.game_state.in_progress() {
        ctx.notify(
            NoticeLevel::Warning,
            "GM draws are only available once a game has started.",
        );
        return Ok(());
    }
    if quantity == 0 {
        ctx.notify(NoticeLevel::Warning, "Draw quantity must be positive.");
        return Ok(());
    }

    let mut actions = Vec::new();
    match target {
        GmDrawTarget::Player => actions.push(DealRequest {
            target: DealTarget::Player,
            name: None,
            count: quantity,
            visibility: Some(visibility),
        }),
        GmDrawTarget::Board => actions.push(DealRequest {
            target: DealTarget::Board,
            name: None,
            count: quantity,
            visibility: Some(Visibility::Public),
        }),
        GmDrawTarget::AllPlayers => {
            actions.push(DealRequest {
                target: DealTarget::Player,
                name: None,
                count: quantity,
                visibility: Some(visibility),
            });
            for enemy in &ctx.snapshot.enemy_data.enemies {
                actions.push(DealRequest {
                    target: DealTarget::Enemy,
                    name: Some(enemy.name.clone()),
                    count: quantity,
                    visibility: Some(visibility),
                });
            }
        }
        GmDrawTarget::Enemy(name) => actions.push(DealRequest {
            target: DealTarget::Enemy,
            name: Some(name),
            count: quantity,
            visibility: Some(visibility),
        }),
    }

    queue_deal(ctx, actions).await?;

    if let Some(notification) = notification.filter(|n| !n.trim().is_empty()) {
        let prompt = format!("{notification}{}", staging::generate_context_block(ctx));
        ctx.submit_prompt(&prompt).await;
    }
    Ok(())
}

/// Stage the player's entire bankroll as one bet.
pub async fn player_goes_all_in(ctx: &mut SessionContext) -> Result<(), SessionError> {
    let amount = ctx.displayed_chips();
    if amount <= 0 {
        ctx.notify(NoticeLevel::Info, "You have no chips left!");
        return Ok(());
    }
    staging::stage(ctx, StagedAction::bet(amount));
    Ok(())
}

/// Ask the AI to adjudicate an escape attempt.
pub async fn attempt_escape(ctx: &SessionContext) {
    ctx.notify(
        NoticeLevel::Info,
        "Your opponent is deciding whether to let you run...",
    );
    ctx.submit_prompt(
        "(System: {{user}} tries to flee the current encounter. Decide from the \
         situation whether the escape succeeds, and emit the matching [Game:End] \
         or [Event:Modify] command.)",
    )
    .await;
}

/// Game-master removal of one card by location and index.
pub async fn delete_card(
    ctx: &mut SessionContext,
    location: Location,
    enemy_name: Option<&str>,
    index: usize,
) -> Result<(), SessionError> {
    let store = ctx.store();
    match location {
        Location::PlayerHand => {
            update_doc::<PlayerCards, _>(store, DocKey::PlayerCards, move |hand| {
                if index < hand.current_hand.len() {
                    hand.current_hand.remove(index);
                } else {
                    warn!(index, "no card at index in player hand");
                }
            })
            .await?
        }
        Location::EnemyHand => {
            let name = enemy_name.unwrap_or_default().to_string();
            update_doc::<EnemyData, _>(store, DocKey::EnemyData, move |data| {
                match data.enemies.iter_mut().find(|e| e.name == name) {
                    Some(enemy) if index < enemy.hand.len() => {
                        enemy.hand.remove(index);
                    }
                    _ => warn!(name = name.as_str(), index, "no card to delete"),
                }
            })
            .await?
        }
        Location::Board => {
            update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
                if index < s.board_cards.len() {
                    s.board_cards.remove(index);
                } else {
                    warn!(index, "no card at index on the board");
                }
            })
            .await?
        }
        Location::Deck => {
            warn!("card deletion does not address the deck");
            return Ok(());
        }
    }
    ctx.notify(NoticeLevel::Success, "Card deleted.");
    ctx.fetch_all().await
}
