//! Command dispatch: AI text in, document mutations out.
//!
//! Commands extracted from one text blob are applied strictly in textual
//! order, never concurrently. A command that fails to decode or validate is
//! logged and skipped; its siblings still run.

pub mod entity;
pub mod game;
pub mod item;
pub mod map;

use tracing::warn;

use crate::command::Command;
use crate::parser::parse_commands;
use crate::session::{SessionContext, SessionError};

/// Parse a blob of AI output and apply every command it contains.
pub async fn process_text(ctx: &mut SessionContext, text: &str) -> Result<(), SessionError> {
    for raw in parse_commands(text) {
        match Command::from_raw(raw) {
            Ok(command) => dispatch(ctx, command).await?,
            Err(e) => warn!(error = %e, "command skipped"),
        }
    }
    Ok(())
}

/// Apply one decoded command.
pub async fn dispatch(ctx: &mut SessionContext, command: Command) -> Result<(), SessionError> {
    match command {
        Command::SetupDeck(spec) => game::setup_deck(ctx, &spec).await,
        Command::StartGame(data) => game::start_game(ctx, data).await,
        Command::Deal(actions) => game::queue_deal(ctx, actions).await,
        Command::ModifyCards(targets) => game::modify_cards(ctx, targets).await,
        Command::UpdateState(fields) => game::update_state(ctx, fields).await,
        Command::Hint(text) => {
            game::hint(ctx, text);
            Ok(())
        }
        Command::EndGame(data) => game::end_game(ctx, data).await,
        Command::Bet(data) => game::bet(ctx, data).await,
        Command::Call { player_name } => game::call(ctx, &player_name).await,
        Command::Check { player_name } => game::check(ctx, &player_name).await,
        Command::Fold { player_name } => game::fold(ctx, &player_name).await,
        Command::Hit { player_name } => game::hit(ctx, &player_name).await,
        Command::Showdown { player_name } => game::showdown(ctx, &player_name).await,
        Command::SwapCards(data) => game::swap_cards(ctx, data).await,
        Command::ModifyEntity(data) => entity::modify_entity(ctx, data).await,
        Command::ModifyMap(data) => map::modify_map(ctx, data).await,
    }
}
