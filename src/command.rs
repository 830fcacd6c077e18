//! Typed commands decoded from [`RawCommand`] records.
//!
//! Dispatch is an exhaustive match over this enum rather than a string-keyed
//! handler table, so adding a variant forces every dispatcher to handle it.
//! Inline `key:value` pairs arrive as strings, so numeric fields accept both
//! JSON numbers and numeric strings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::deck::{Card, DeckSpec, Visibility};
use crate::parser::RawCommand;

/// The wire token the AI uses for deal commands.
pub const DEAL_FUNCTION_TYPE: &str = "发牌";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unhandled command {category}:{kind}")]
    Unhandled { category: String, kind: String },
    #[error("invalid payload for {category}:{kind}: {source}")]
    InvalidPayload {
        category: String,
        kind: String,
        source: serde_json::Error,
    },
}

/// One entry in a deal request: how many cards go where, face up or down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealRequest {
    pub target: DealTarget,
    /// Enemy name, required when `target` is an enemy hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::u64_field")]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealTarget {
    Player,
    Enemy,
    Board,
}

/// A card container addressed by a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    PlayerHand,
    EnemyHand,
    Board,
    Deck,
}

/// A location plus the enemy name that disambiguates enemy hands.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CardLocation {
    pub location: Location,
    #[serde(default)]
    pub enemy_name: Option<String>,
}

/// Index selector within a filtered card set.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CardIndex {
    #[default]
    All,
    Random,
    At(usize),
}

impl<'de> Deserialize<'de> for CardIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        match value {
            Value::String(s) if s == "all" => Ok(CardIndex::All),
            Value::String(s) if s == "random" => Ok(CardIndex::Random),
            Value::String(s) => s
                .parse::<usize>()
                .map(CardIndex::At)
                .map_err(|_| serde::de::Error::custom(format!("invalid card index {s:?}"))),
            Value::Number(n) => n
                .as_u64()
                .map(|n| CardIndex::At(n as usize))
                .ok_or_else(|| serde::de::Error::custom("card index must be a non-negative integer")),
            other => Err(serde::de::Error::custom(format!(
                "invalid card index: {other}"
            ))),
        }
    }
}

/// Selects cards within a location by suit, rank, and index.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CardFilter {
    #[serde(default)]
    pub suit: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub index: Option<CardIndex>,
}

/// A single field mutation, shared between card and entity modification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Modification {
    pub field: String,
    pub operation: ModifyOp,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModifyOp {
    Add,
    Subtract,
    Set,
    Remove,
}

/// One target of a bulk card-modification command.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CardModifyTarget {
    pub location: Location,
    #[serde(default)]
    pub enemy_name: Option<String>,
    pub operation: CardOp,
    #[serde(default)]
    pub card_filter: CardFilter,
    #[serde(default)]
    pub modifications: Vec<Modification>,
    #[serde(default)]
    pub cards_to_add: Vec<Card>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardOp {
    Update,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartData {
    #[serde(default)]
    pub game_type: Option<String>,
    /// `None` when the field was missing or malformed; the handler surfaces
    /// a user-visible notice rather than dropping the command silently.
    #[serde(default, deserialize_with = "lenient::opt_string_vec")]
    pub players: Option<Vec<String>>,
    #[serde(default)]
    pub initial_state: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    Win,
    Lose,
    Dead,
    BossWin,
    Escape,
    /// Any other result string is a draw-equivalent ending.
    #[serde(other)]
    Draw,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndData {
    pub result: GameResult,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BetData {
    pub player_name: String,
    #[serde(default, deserialize_with = "lenient::opt_i64_field")]
    pub amount: Option<i64>,
    /// Non-chip wager, recorded verbatim.
    #[serde(default)]
    pub things: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapMode {
    Random,
    Specific,
}

/// A location paired with a filter, used by specific-mode swaps.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SwapSelector {
    pub location: Location,
    #[serde(default)]
    pub enemy_name: Option<String>,
    #[serde(default)]
    pub card_filter: CardFilter,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SwapData {
    pub swap_type: SwapMode,
    #[serde(default)]
    pub source: Option<CardLocation>,
    #[serde(default)]
    pub destination: Option<CardLocation>,
    #[serde(default, deserialize_with = "lenient::u64_field")]
    pub count: u64,
    #[serde(default)]
    pub card_one: Option<SwapSelector>,
    #[serde(default)]
    pub card_two: Option<SwapSelector>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EntityModifyData {
    pub target: String,
    pub modifications: Vec<Modification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapScope {
    Reachable,
    Future,
    #[default]
    #[serde(other)]
    AnyUnvisited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowPriority {
    Closest,
    Furthest,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityPriority {
    Densest,
    Sparsest,
    Random,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SelectionPriority {
    #[serde(default)]
    pub row: Option<RowPriority>,
    #[serde(default)]
    pub density: Option<DensityPriority>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapTargetFilter {
    /// Node types to match; a single string or a list on the wire.
    #[serde(rename = "type", deserialize_with = "lenient::string_or_vec")]
    pub node_types: Vec<String>,
    #[serde(default)]
    pub scope: MapScope,
    #[serde(default)]
    pub selection_priority: SelectionPriority,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapModification {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MapModifyData {
    pub target_filter: MapTargetFilter,
    pub modification: MapModification,
    pub effect_description: String,
}

/// Every command the engine understands, decoded and typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetupDeck(DeckSpec),
    StartGame(StartData),
    Deal(Vec<DealRequest>),
    ModifyCards(Vec<CardModifyTarget>),
    UpdateState(Map<String, Value>),
    Hint(Option<String>),
    EndGame(EndData),
    Bet(BetData),
    Call { player_name: String },
    Check { player_name: String },
    Fold { player_name: String },
    Hit { player_name: String },
    Showdown { player_name: String },
    SwapCards(SwapData),
    ModifyEntity(EntityModifyData),
    ModifyMap(MapModifyData),
}

impl Command {
    /// Decode a parsed command into its typed form.
    pub fn from_raw(raw: RawCommand) -> Result<Self, CommandError> {
        let RawCommand {
            category,
            kind,
            data,
        } = raw;

        fn decode<T: serde::de::DeserializeOwned>(
            category: &str,
            kind: &str,
            data: Map<String, Value>,
        ) -> Result<T, CommandError> {
            serde_json::from_value(Value::Object(data)).map_err(|source| {
                CommandError::InvalidPayload {
                    category: category.to_string(),
                    kind: kind.to_string(),
                    source,
                }
            })
        }

        match (category.as_str(), kind.as_str()) {
            ("Game", "SetupDeck") => Ok(Command::SetupDeck(decode(&category, &kind, data)?)),
            ("Game", "Start") => Ok(Command::StartGame(decode(&category, &kind, data)?)),
            ("Game", "Function") => {
                let function_type = data
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match function_type.as_str() {
                    DEAL_FUNCTION_TYPE => {
                        let actions = match data.get("actions") {
                            Some(actions) => serde_json::from_value(actions.clone()).map_err(
                                |source| CommandError::InvalidPayload {
                                    category,
                                    kind,
                                    source,
                                },
                            )?,
                            None => Vec::new(),
                        };
                        Ok(Command::Deal(actions))
                    }
                    "Modify" | "ModifyCard" => {
                        let targets = data.get("targets").cloned().unwrap_or(Value::Null);
                        let targets = serde_json::from_value(targets).map_err(|source| {
                            CommandError::InvalidPayload {
                                category,
                                kind,
                                source,
                            }
                        })?;
                        Ok(Command::ModifyCards(targets))
                    }
                    _ => Err(CommandError::Unhandled {
                        category,
                        kind: format!("{kind}({function_type})"),
                    }),
                }
            }
            ("Game", "UpdateState") => Ok(Command::UpdateState(data)),
            ("Game", "Hint") => Ok(Command::Hint(
                data.get("text").and_then(Value::as_str).map(str::to_string),
            )),
            ("Game", "End") => Ok(Command::EndGame(decode(&category, &kind, data)?)),
            ("Action", "Bet") => Ok(Command::Bet(decode(&category, &kind, data)?)),
            ("Action", "Call") => Ok(Command::Call {
                player_name: player_name(&category, &kind, &data)?,
            }),
            ("Action", "Check") => Ok(Command::Check {
                player_name: player_name(&category, &kind, &data)?,
            }),
            ("Action", "Fold") => Ok(Command::Fold {
                player_name: player_name(&category, &kind, &data)?,
            }),
            ("Action", "Hit") => Ok(Command::Hit {
                player_name: player_name(&category, &kind, &data)?,
            }),
            ("Action", "Showdown") => Ok(Command::Showdown {
                player_name: player_name(&category, &kind, &data)?,
            }),
            ("Action", "SwapCards") => Ok(Command::SwapCards(decode(&category, &kind, data)?)),
            ("Event", "Modify") => Ok(Command::ModifyEntity(decode(&category, &kind, data)?)),
            ("Map", "Modify") => Ok(Command::ModifyMap(decode(&category, &kind, data)?)),
            _ => Err(CommandError::Unhandled { category, kind }),
        }
    }
}

fn player_name(
    category: &str,
    kind: &str,
    data: &Map<String, Value>,
) -> Result<String, CommandError> {
    data.get("player_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CommandError::InvalidPayload {
            category: category.to_string(),
            kind: kind.to_string(),
            source: serde::de::Error::custom("missing field `player_name`"),
        })
}

/// Deserializers tolerant of string-encoded wire values.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn u64_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => n
                .as_u64()
                .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer")),
            Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
            Value::Null => Ok(0),
            other => Err(serde::de::Error::custom(format!(
                "expected a count, got {other}"
            ))),
        }
    }

    pub fn opt_i64_field<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Number(n) => Ok(n.as_i64()),
            Value::String(s) => Ok(s.trim().parse().ok()),
            _ => Ok(None),
        }
    }

    pub fn opt_string_vec<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<String>>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => out.push(s),
                        _ => return Ok(None),
                    }
                }
                Ok(Some(out))
            }
            _ => Ok(None),
        }
    }

    pub fn string_or_vec<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(vec![s]),
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_commands;

    fn decode_one(text: &str) -> Command {
        let mut raw = parse_commands(text);
        assert_eq!(raw.len(), 1, "expected exactly one command in {text:?}");
        Command::from_raw(raw.remove(0)).unwrap()
    }

    #[test]
    fn test_decode_deal() {
        let command = decode_one(
            r#"[Game:Function, type:发牌, data:{"actions":[{"target":"player","count":2,"visibility":"owner"},{"target":"board","count":"3"}]}]"#,
        );
        match command {
            Command::Deal(actions) => {
                assert_eq!(actions.len(), 2);
                assert_eq!(actions[0].target, DealTarget::Player);
                assert_eq!(actions[0].count, 2);
                // String-encoded counts are accepted.
                assert_eq!(actions[1].count, 3);
                assert_eq!(actions[1].visibility, None);
            }
            other => panic!("expected Deal, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_start_with_malformed_players() {
        let command = decode_one(r#"[Game:Start, data:{"game_type":"poker","players":"Vex"}]"#);
        match command {
            Command::StartGame(start) => assert_eq!(start.players, None),
            other => panic!("expected StartGame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_modify_cards() {
        let command = decode_one(
            r#"[Game:Function, type:Modify, data:{"targets":[{"location":"player_hand","operation":"update","card_filter":{"index":"random"},"modifications":[{"field":"rank","operation":"add","value":2}]}]}]"#,
        );
        match command {
            Command::ModifyCards(targets) => {
                assert_eq!(targets[0].location, Location::PlayerHand);
                assert_eq!(targets[0].operation, CardOp::Update);
                assert_eq!(targets[0].card_filter.index, Some(CardIndex::Random));
                assert_eq!(targets[0].modifications[0].operation, ModifyOp::Add);
            }
            other => panic!("expected ModifyCards, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_bet_with_string_amount() {
        let command = decode_one("[Action:Bet, player_name:Vex, amount:150]");
        match command {
            Command::Bet(bet) => {
                assert_eq!(bet.player_name, "Vex");
                assert_eq!(bet.amount, Some(150));
            }
            other => panic!("expected Bet, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_map_modify_single_type() {
        let command = decode_one(
            r#"[Map:Modify, data:{"target_filter":{"type":"shop","scope":"reachable"},"modification":{"field":"type","value":"event"},"effect_description":"The shop twists into something else."}]"#,
        );
        match command {
            Command::ModifyMap(map) => {
                assert_eq!(map.target_filter.node_types, vec!["shop"]);
                assert_eq!(map.target_filter.scope, MapScope::Reachable);
                assert_eq!(map.modification.field, "type");
            }
            other => panic!("expected ModifyMap, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_scope_defaults_to_any_unvisited() {
        let command = decode_one(
            r#"[Map:Modify, data:{"target_filter":{"type":["rest","shop"],"scope":"everywhere"},"modification":{"field":"type","value":"enemy"},"effect_description":"The floor shifts."}]"#,
        );
        match command {
            Command::ModifyMap(map) => {
                assert_eq!(map.target_filter.scope, MapScope::AnyUnvisited);
                assert_eq!(map.target_filter.node_types.len(), 2);
            }
            other => panic!("expected ModifyMap, got {other:?}"),
        }
    }

    #[test]
    fn test_map_modify_without_description_is_rejected() {
        let raw = parse_commands(
            r#"[Map:Modify, data:{"target_filter":{"type":"shop"},"modification":{"field":"type","value":"event"}}]"#,
        )
        .remove(0);
        assert!(matches!(
            Command::from_raw(raw),
            Err(CommandError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn test_unknown_command_is_unhandled() {
        let raw = parse_commands("[Audio:Play, sound:chip]").remove(0);
        assert!(matches!(
            Command::from_raw(raw),
            Err(CommandError::Unhandled { .. })
        ));
    }

    #[test]
    fn test_unusual_end_result_is_draw() {
        let command = decode_one(r#"[Game:End, data:{"result":"stalemate","reason":"tie"}]"#);
        match command {
            Command::EndGame(end) => assert_eq!(end.result, GameResult::Draw),
            other => panic!("expected EndGame, got {other:?}"),
        }
    }
}
