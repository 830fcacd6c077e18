//! AI-driven card table engine with roguelike map progression.
//!
//! This crate provides:
//! - A resilient parser for bracketed AI commands embedded in narrative text
//! - Typed commands applied to a JSON document store, in textual order
//! - A two-phase deal protocol over an authoritative hidden deck
//! - Procedural branching floor maps with secret rooms and boss rewards
//! - Run lifecycle: difficulty, vitals, bankruptcy, and meta progression
//! - Optimistic staging of player actions committed as one batch
//!
//! # Quick Start
//!
//! ```ignore
//! use cardtable_core::handlers::process_text;
//! use cardtable_core::session::{SessionConfig, SessionContext};
//! use cardtable_core::store::FileStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = FileStore::new("./save");
//!     let config = SessionConfig::new("Mara");
//!     let mut ctx = SessionContext::new(Box::new(store), config);
//!     ctx.fetch_all().await?;
//!
//!     let ai_text = r#"The dealer nods. [Game:Start, data:{"game_type":"poker","players":["Mara","Vex"]}]"#;
//!     process_text(&mut ctx, ai_text).await?;
//!     println!("pot: {}", ctx.snapshot.game_state.pot_amount);
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod deck;
pub mod handlers;
pub mod map;
pub mod parser;
pub mod run;
pub mod session;
pub mod staging;
pub mod store;
pub mod testing;

// Primary public API
pub use command::{Command, CommandError};
pub use handlers::process_text;
pub use parser::{parse_commands, RawCommand};
pub use session::{
    GameMode, NoticeLevel, Notifier, PromptSink, SessionConfig, SessionContext, SessionError,
};
pub use staging::StagedAction;
pub use store::{DocumentStore, FileStore, MemoryStore};
pub use testing::TestHarness;
