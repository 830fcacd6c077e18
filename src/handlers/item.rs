//! Inventory usage.
//!
//! Items carry no mechanical rules of their own. Using one hands its
//! description to the AI, which adjudicates the effect through follow-up
//! commands. Active items are consumed on use; passive items only get
//! re-announced so the AI keeps them in play.

use tracing::{error, info};

use crate::session::{HistoryKind, SessionContext, SessionError};
use crate::store::{update_doc, DocKey, ItemKind, PlayerData};

/// Use the inventory item at `index`.
pub async fn use_item(ctx: &mut SessionContext, index: usize) -> Result<(), SessionError> {
    let Some(item) = ctx.snapshot.player_data.inventory.get(index).cloned() else {
        error!(index, "no inventory item at index");
        return Ok(());
    };

    match item.kind {
        ItemKind::Passive => {
            // Passive items stay in the inventory; the prompt is a reminder.
            ctx.submit_prompt(&format!(
                "(System: a reminder that {{{{user}}}} carries the passive item \
                 \"{}\": {}. Keep its effect in play.)",
                item.name, item.description
            ))
            .await;
        }
        ItemKind::Active => {
            info!(name = item.name.as_str(), "active item consumed");
            update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, move |p| {
                if index < p.inventory.len() {
                    p.inventory.remove(index);
                }
            })
            .await?;
            ctx.history.add(
                HistoryKind::Action,
                format!("{} used {}.", ctx.config.player_name, item.name),
            );
            ctx.fetch_all().await?;
            ctx.submit_prompt(&format!(
                "(System: {{{{user}}}} uses the item \"{}\": {}. Apply its effect \
                 now and emit the commands it calls for.)",
                item.name, item.description
            ))
            .await;
        }
    }
    Ok(())
}
