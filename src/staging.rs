//! Player action staging: stage, undo, commit.
//!
//! Player-initiated actions are held in an in-memory list and are fully
//! reversible until committed. Bets and calls optimistically adjust the
//! displayed chip count through the session's pending-delta overlay; the
//! document store is untouched until `commit`, which persists everything in a
//! strict sequence and then hands a summary prompt to the AI.

use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::deck::Card;
use crate::session::{GameMode, HistoryKind, SessionContext, SessionError};
use crate::store::{update_doc, DocKey, GameState, PlayerData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedKind {
    Bet,
    Call,
    Check,
    Fold,
    Hit,
    Stand,
    PlayCards,
    Custom,
    Narrative,
}

/// One action staged by the player, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedAction {
    pub id: Uuid,
    pub kind: StagedKind,
    pub amount: Option<i64>,
    pub text: Option<String>,
    pub cards: Vec<Card>,
}

impl StagedAction {
    fn new(kind: StagedKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            amount: None,
            text: None,
            cards: Vec::new(),
        }
    }

    pub fn bet(amount: i64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(StagedKind::Bet)
        }
    }

    pub fn call(amount: i64) -> Self {
        Self {
            amount: Some(amount),
            ..Self::new(StagedKind::Call)
        }
    }

    pub fn check() -> Self {
        Self::new(StagedKind::Check)
    }

    pub fn fold() -> Self {
        Self::new(StagedKind::Fold)
    }

    pub fn hit() -> Self {
        Self::new(StagedKind::Hit)
    }

    pub fn stand() -> Self {
        Self::new(StagedKind::Stand)
    }

    pub fn play_cards(cards: Vec<Card>) -> Self {
        Self {
            cards,
            ..Self::new(StagedKind::PlayCards)
        }
    }

    pub fn custom(text: impl Into<String>, cards: Vec<Card>) -> Self {
        Self {
            text: Some(text.into()),
            cards,
            ..Self::new(StagedKind::Custom)
        }
    }

    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(StagedKind::Narrative)
        }
    }

    /// Chip cost displayed while the action is staged.
    fn chip_cost(&self) -> i64 {
        match self.kind {
            StagedKind::Bet | StagedKind::Call => self.amount.unwrap_or(0),
            _ => 0,
        }
    }
}

/// Stage an action, returning its id for later undo.
pub fn stage(ctx: &mut SessionContext, action: StagedAction) -> Uuid {
    let id = action.id;
    ctx.pending_chip_delta -= action.chip_cost();
    debug!(?id, kind = ?action.kind, "player action staged");
    ctx.staged_actions.push(action);
    id
}

/// Undo one staged action by id. Returns false if the id is unknown.
pub fn undo(ctx: &mut SessionContext, id: Uuid) -> bool {
    let Some(index) = ctx.staged_actions.iter().position(|a| a.id == id) else {
        return false;
    };
    let action = ctx.staged_actions.remove(index);
    ctx.pending_chip_delta += action.chip_cost();
    debug!(?id, "player action undone");
    true
}

/// Undo every staged action, restoring the displayed chip baseline.
pub fn undo_all(ctx: &mut SessionContext) {
    for action in ctx.staged_actions.drain(..) {
        ctx.pending_chip_delta += action.chip_cost();
    }
    debug!("all staged player actions undone");
}

/// Commit every staged action.
///
/// Writes land strictly in sequence: final chip total, then pot and last-bet,
/// then turn advance. Only after all three does the snapshot refresh and the
/// context block get built, so the prompt the AI receives reflects the
/// post-commit state including the advanced turn.
pub async fn commit(ctx: &mut SessionContext) -> Result<(), SessionError> {
    // An empty commit is a plain end of turn: no writes beyond the turn
    // advance, and the AI is told the player passed.
    let actions: Vec<StagedAction> = ctx.staged_actions.drain(..).collect();

    let mut pot_increase = 0i64;
    let mut new_last_bet: Option<i64> = None;
    let mut chips_changed = false;
    for action in &actions {
        let cost = action.chip_cost();
        if cost != 0 {
            pot_increase += cost;
            chips_changed = true;
        }
        if action.kind == StagedKind::Bet {
            new_last_bet = action.amount;
        }
    }
    let final_chips = ctx.snapshot.player_data.chips + ctx.pending_chip_delta;
    ctx.pending_chip_delta = 0;

    let store = ctx.store();
    if chips_changed {
        update_doc::<PlayerData, _>(store, DocKey::PlayerData, move |p| {
            p.chips = final_chips;
        })
        .await?;
    }
    if pot_increase > 0 || new_last_bet.is_some() {
        update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
            s.pot_amount += pot_increase;
            if let Some(bet) = new_last_bet {
                s.last_bet_amount = bet;
            }
        })
        .await?;
    }

    let player_name = ctx.config.player_name.clone();
    update_doc::<GameState, _>(store, DocKey::GameState, move |s| {
        advance_turn(s, &player_name);
    })
    .await?;

    ctx.fetch_all().await?;

    let mut game_lines = String::new();
    let mut narrative = String::new();
    for action in &actions {
        ctx.history
            .add(HistoryKind::Action, describe_action(action));
        match action.kind {
            StagedKind::Narrative => {
                if let Some(text) = &action.text {
                    narrative.push('"');
                    narrative.push_str(text);
                    narrative.push_str("\" ");
                }
            }
            _ => {
                game_lines.push_str("- ");
                game_lines.push_str(&describe_action(action));
                game_lines.push('\n');
            }
        }
    }

    let mut prompt = String::new();
    if !narrative.is_empty() {
        prompt.push_str(narrative.trim());
        prompt.push(' ');
    }
    if !game_lines.is_empty() {
        prompt.push_str(&format!(
            "(System: {{{{user}}}} took the following actions:\n{})",
            game_lines.trim_end()
        ));
    } else if narrative.is_empty() {
        prompt.push_str("(System: {{user}} ends their turn.)");
    }
    prompt.push_str(&generate_context_block(ctx));

    ctx.submit_prompt(prompt.trim()).await;
    Ok(())
}

/// Round-robin turn advance, applied only when it is the human's turn.
fn advance_turn(state: &mut GameState, player_name: &str) {
    let is_players_turn = state
        .current_turn
        .as_deref()
        .is_some_and(|turn| turn == player_name || turn == "{{user}}");
    if !is_players_turn || state.players.is_empty() {
        return;
    }
    let Some(index) = state
        .players
        .iter()
        .position(|p| p == player_name || p == "{{user}}")
    else {
        warn!(player_name, "player not in turn order, turn not advanced");
        return;
    };
    let next = (index + 1) % state.players.len();
    state.current_turn = Some(state.players[next].clone());
}

fn describe_action(action: &StagedAction) -> String {
    let cards = if action.cards.is_empty() {
        String::new()
    } else {
        let labels: Vec<String> = action.cards.iter().map(Card::label).collect();
        format!(" [{}]", labels.join(", "))
    };
    match action.kind {
        StagedKind::Bet => format!("bet {} chips.", action.amount.unwrap_or(0)),
        StagedKind::Call => format!("called {} chips.", action.amount.unwrap_or(0)),
        StagedKind::Check => "checked.".to_string(),
        StagedKind::Fold => format!("folded{cards}."),
        StagedKind::Hit => "hit.".to_string(),
        StagedKind::Stand => "stood.".to_string(),
        StagedKind::PlayCards => format!("played{cards}."),
        StagedKind::Custom => format!(
            "performed a custom action: {}{cards}.",
            action.text.as_deref().unwrap_or("")
        ),
        StagedKind::Narrative => action.text.clone().unwrap_or_default(),
    }
}

/// Machine-readable state summary appended to outbound prompts.
///
/// Reads the snapshot as-is; callers refresh it first so the block reflects
/// committed state.
pub fn generate_context_block(ctx: &SessionContext) -> String {
    let snapshot = &ctx.snapshot;
    let mut lines: Vec<String> = Vec::new();

    if let Some(game_type) = &snapshot.game_state.game_type {
        lines.push(format!("game_type: {game_type}"));

        let current_turn = snapshot
            .game_state
            .current_turn
            .clone()
            .unwrap_or_else(|| ctx.config.player_name.clone());
        lines.push(format!("current_turn: {current_turn}"));
        if let Some(index) = snapshot
            .game_state
            .players
            .iter()
            .position(|p| *p == current_turn)
        {
            let next = (index + 1) % snapshot.game_state.players.len();
            lines.push(format!("next_turn: {}", snapshot.game_state.players[next]));
        }

        let board: Vec<String> = snapshot
            .game_state
            .board_cards
            .iter()
            .map(Card::label)
            .collect();
        lines.push(format!("pot_amount: {}", snapshot.game_state.pot_amount));
        lines.push(format!("board_cards: {}", board.join(", ")));
    }

    lines.push(format!("player_chips: {}", snapshot.player_data.chips));
    for (index, enemy) in snapshot.enemy_data.enemies.iter().enumerate() {
        lines.push(format!("enemy_{index}_name: {}", enemy.name));
        lines.push(format!("enemy_{index}_chips: {}", enemy.chips));
    }

    if ctx.config.mode == GameMode::Roguelike && snapshot.map_data.is_present() {
        let map = &snapshot.map_data;
        lines.push(format!("map_floor: {}", map.map_layer + 1));
        if let Some(node) = map
            .player_position
            .as_deref()
            .and_then(|id| map.node(id))
        {
            lines.push(format!("map_node_type: {}", node.kind.as_str()));
            if !node.properties.is_empty() {
                let tags: Vec<String> = node
                    .properties
                    .iter()
                    .map(|p| json!(p).to_string())
                    .collect();
                lines.push(format!("room_properties: [{}]", tags.join(", ")));
            }
            let total_rows = map
                .nodes
                .iter()
                .filter(|n| n.kind != crate::map::NodeKind::Boss)
                .map(|n| n.row)
                .max()
                .unwrap_or(0);
            if total_rows > 0 {
                let progress = (node.row as f64 / total_rows as f64 * 100.0).round();
                lines.push(format!("map_progress: {progress}%"));
            }
        }
    }

    if lines.is_empty() {
        String::new()
    } else {
        format!("\n<context>\n{}\n</context>", lines.join("\n"))
    }
}
