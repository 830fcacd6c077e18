//! Deck construction, shuffling, and rank arithmetic.
//!
//! Cards are deliberately loose about suits and ranks (plain strings) so the
//! game master can set up non-standard decks, but rank arithmetic only applies
//! to the thirteen standard labels.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four French suits used when no custom deck is requested.
pub const DEFAULT_SUITS: [&str; 4] = ["♥", "♦", "♣", "♠"];

/// Standard ranks, ace high.
pub const DEFAULT_RANKS: [&str; 13] = [
    "A", "2", "3", "4", "5", "6", "7", "8", "9", "10", "J", "Q", "K",
];

/// Who gets to see a card's face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Revealed to everyone, including the AI.
    Public,
    /// Revealed only to the card's holder.
    #[default]
    Owner,
    /// Face down for everyone.
    Hidden,
}

/// A single playing card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub suit: String,
    pub rank: String,
    #[serde(default)]
    pub is_special: bool,
    #[serde(default)]
    pub visibility: Visibility,
    /// Transient marker set while a freshly dealt card awaits presentation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_new: bool,
}

impl Card {
    pub fn new(suit: impl Into<String>, rank: impl Into<String>) -> Self {
        Self {
            suit: suit.into(),
            rank: rank.into(),
            is_special: false,
            visibility: Visibility::Owner,
            is_new: false,
        }
    }

    /// Compact `suit+rank` label, e.g. `♥A`.
    pub fn label(&self) -> String {
        format!("{}{}", self.suit, self.rank)
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.suit, self.rank)
    }
}

/// Configuration for building a deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeckSpec {
    #[serde(default = "default_suits")]
    pub use_suits: Vec<String>,
    #[serde(default = "default_ranks")]
    pub use_ranks: Vec<String>,
    #[serde(default)]
    pub jokers: u32,
    #[serde(default = "one")]
    pub num_decks: u32,
}

fn default_suits() -> Vec<String> {
    DEFAULT_SUITS.iter().map(|s| s.to_string()).collect()
}

fn default_ranks() -> Vec<String> {
    DEFAULT_RANKS.iter().map(|s| s.to_string()).collect()
}

fn one() -> u32 {
    1
}

impl Default for DeckSpec {
    fn default() -> Self {
        Self {
            use_suits: default_suits(),
            use_ranks: default_ranks(),
            jokers: 0,
            num_decks: 1,
        }
    }
}

/// Build an unshuffled deck from a spec.
///
/// Jokers are appended last as `is_special` cards; the first is the Big Joker.
pub fn build_deck(spec: &DeckSpec) -> Vec<Card> {
    let mut single = Vec::with_capacity(spec.use_suits.len() * spec.use_ranks.len());
    for suit in &spec.use_suits {
        for rank in &spec.use_ranks {
            single.push(Card::new(suit.clone(), rank.clone()));
        }
    }

    let mut deck = Vec::new();
    for _ in 0..spec.num_decks.max(1) {
        deck.extend(single.iter().cloned());
    }

    for i in 0..spec.jokers {
        let mut joker = Card::new("🃏", if i == 0 { "Big Joker" } else { "Little Joker" });
        joker.is_special = true;
        deck.push(joker);
    }

    deck
}

/// Fisher-Yates shuffle, in place.
pub fn shuffle_with_rng<R: Rng>(cards: &mut [Card], rng: &mut R) {
    let mut current = cards.len();
    while current > 1 {
        let pick = rng.gen_range(0..current);
        current -= 1;
        cards.swap(current, pick);
    }
}

/// Shuffle with the thread RNG.
pub fn shuffle(cards: &mut [Card]) {
    shuffle_with_rng(cards, &mut rand::thread_rng());
}

/// Compact comma-joined mirror of a deck, for the visible-deck document.
pub fn deck_string(cards: &[Card]) -> String {
    let labels: Vec<String> = cards.iter().map(Card::label).collect();
    format!("[{}]", labels.join(","))
}

const MIN_RANK_VALUE: i64 = 2;
const MAX_RANK_VALUE: i64 = 14;

/// Numeric value of a rank label (2 to 14, ace high). `None` for jokers and
/// other non-standard labels.
pub fn rank_value(rank: &str) -> Option<i64> {
    match rank {
        "A" => Some(14),
        "K" => Some(13),
        "Q" => Some(12),
        "J" => Some(11),
        _ => match rank.parse::<i64>() {
            Ok(v) if (MIN_RANK_VALUE..=MAX_RANK_VALUE).contains(&v) => Some(v),
            _ => None,
        },
    }
}

/// Label for a rank value, clamped into [2, 14] first.
pub fn value_to_rank(value: i64) -> String {
    match value.clamp(MIN_RANK_VALUE, MAX_RANK_VALUE) {
        14 => "A".to_string(),
        13 => "K".to_string(),
        12 => "Q".to_string(),
        11 => "J".to_string(),
        v => v.to_string(),
    }
}

/// Shift a rank by a delta, clamping so the result stays within {2..A}.
///
/// Returns `None` when the input rank has no numeric value (jokers).
pub fn shift_rank(rank: &str, delta: i64) -> Option<String> {
    let value = rank_value(rank)?;
    Some(value_to_rank(value + delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_default_deck_is_52_cards() {
        let deck = build_deck(&DeckSpec::default());
        assert_eq!(deck.len(), 52);
        assert!(deck.iter().all(|c| !c.is_special));
    }

    #[test]
    fn test_deck_with_jokers_and_multiples() {
        let spec = DeckSpec {
            jokers: 2,
            num_decks: 2,
            ..DeckSpec::default()
        };
        let deck = build_deck(&spec);
        assert_eq!(deck.len(), 52 * 2 + 2);
        assert_eq!(deck.iter().filter(|c| c.is_special).count(), 2);
        assert_eq!(deck.last().unwrap().rank, "Little Joker");
    }

    #[test]
    fn test_deck_spec_empty_payload_is_default() {
        let spec: DeckSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec, DeckSpec::default());
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut deck = build_deck(&DeckSpec::default());
        let original = deck.clone();
        let mut rng = StdRng::seed_from_u64(7);
        shuffle_with_rng(&mut deck, &mut rng);

        assert_eq!(deck.len(), original.len());
        for card in &original {
            assert!(deck.contains(card));
        }
        assert_ne!(deck, original);
    }

    #[test]
    fn test_rank_values_round_trip() {
        for rank in DEFAULT_RANKS {
            let value = rank_value(rank).unwrap();
            assert_eq!(value_to_rank(value), rank);
        }
        assert_eq!(rank_value("Big Joker"), None);
    }

    #[test]
    fn test_shift_rank_clamps_at_ace() {
        // Repeated additions can never push a rank past the ace.
        let mut rank = "K".to_string();
        for _ in 0..5 {
            rank = shift_rank(&rank, 5).unwrap();
        }
        assert_eq!(rank, "A");
    }

    #[test]
    fn test_shift_rank_clamps_at_two() {
        assert_eq!(shift_rank("3", -10).unwrap(), "2");
        assert_eq!(shift_rank("A", -1).unwrap(), "K");
    }

    #[test]
    fn test_deck_string_format() {
        let cards = vec![Card::new("♥", "A"), Card::new("♠", "10")];
        assert_eq!(deck_string(&cards), "[♥A,♠10]");
    }

    #[test]
    fn test_card_serde_skips_transient_marker() {
        let card = Card::new("♥", "A");
        let json = serde_json::to_value(&card).unwrap();
        assert!(json.get("is_new").is_none());

        let mut dealt = card;
        dealt.is_new = true;
        let json = serde_json::to_value(&dealt).unwrap();
        assert_eq!(json["is_new"], true);
    }
}
