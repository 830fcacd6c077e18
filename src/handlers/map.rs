//! Map commands: AI reshaping plus player navigation.
//!
//! `[Map:Modify]` runs a selection pipeline over the current floor: filter by
//! node type, narrow by scope, order by the AI's stated priority, then mutate
//! exactly one node. An empty selection is a quiet no-op so a stale AI
//! instruction can never corrupt the floor.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{info, warn};

use crate::command::{DensityPriority, MapModifyData, MapScope, RowPriority};
use crate::session::{HistoryKind, NoticeLevel, SessionContext, SessionError};
use crate::store::{read_doc, update_doc, DocKey, MapDocument, PlayerData};

/// Chip price of one secret-room search.
pub const SECRET_SEARCH_COST: i64 = 200;

pub async fn modify_map(
    ctx: &mut SessionContext,
    data: MapModifyData,
) -> Result<(), SessionError> {
    let map: MapDocument = read_doc(ctx.store(), DocKey::MapData).await?;
    if !map.is_present() {
        warn!("map modification with no map on disk, skipped");
        return Ok(());
    }

    let mut rng = rand::thread_rng();
    let Some(node_id) = select_target_node(&map, &data, &mut rng) else {
        info!("map modification matched no nodes, nothing applied");
        return Ok(());
    };

    // Only the node type can be rewritten. Unknown fields or values abort
    // before any write so the document never holds a half-applied change.
    if data.modification.field != "type" {
        warn!(
            field = data.modification.field.as_str(),
            "unsupported map field, aborted"
        );
        return Ok(());
    }
    let Some(new_kind) = data
        .modification
        .value
        .as_str()
        .and_then(crate::map::NodeKind::parse)
    else {
        warn!(value = %data.modification.value, "unknown node type, aborted");
        return Ok(());
    };

    info!(node_id = node_id.as_str(), to = new_kind.as_str(), "map node rewritten");
    let id = node_id.clone();
    update_doc::<MapDocument, _>(ctx.store(), DocKey::MapData, move |m| {
        if let Some(node) = m.node_mut(&id) {
            node.kind = new_kind;
        }
    })
    .await?;

    ctx.notify(NoticeLevel::Info, &data.effect_description);
    ctx.history.add(HistoryKind::Map, data.effect_description);
    ctx.fetch_all().await
}

/// The selection pipeline: type filter, scope, then priority ordering.
fn select_target_node<R: Rng>(
    map: &MapDocument,
    data: &MapModifyData,
    rng: &mut R,
) -> Option<String> {
    let filter = &data.target_filter;
    let reachable: Vec<&str> = map
        .player_position
        .as_deref()
        .and_then(|id| map.node(id))
        .map(|n| n.connections.iter().map(String::as_str).collect())
        .unwrap_or_default();

    let mut candidates: Vec<&crate::map::MapNode> = map
        .nodes
        .iter()
        .filter(|n| filter.node_types.iter().any(|t| t == n.kind.as_str()))
        .filter(|n| !map.path_taken.contains(&n.id))
        .filter(|n| Some(n.id.as_str()) != map.player_position.as_deref())
        .filter(|n| match filter.scope {
            MapScope::Reachable => reachable.contains(&n.id.as_str()),
            // Future nodes are exactly the ones the player cannot step to
            // from where they stand.
            MapScope::Future => !reachable.contains(&n.id.as_str()),
            MapScope::AnyUnvisited => true,
        })
        .collect();
    if candidates.is_empty() {
        return None;
    }

    // Ties are broken first, so the later row sort is the primary key.
    candidates.shuffle(rng);
    if let Some(density) = filter.selection_priority.density {
        match density {
            DensityPriority::Densest => {
                candidates.sort_by_key(|n| std::cmp::Reverse(n.connections.len()))
            }
            DensityPriority::Sparsest => candidates.sort_by_key(|n| n.connections.len()),
            DensityPriority::Random => {}
        }
    }
    match filter.selection_priority.row {
        Some(RowPriority::Closest) => {
            candidates.sort_by_key(|n| n.row);
        }
        Some(RowPriority::Furthest) => {
            candidates.sort_by_key(|n| std::cmp::Reverse(n.row));
        }
        Some(RowPriority::Random) | None => {}
    }

    candidates.first().map(|n| n.id.to_string())
}

/// Move the player to a node and brief the AI on the new room.
pub async fn travel_to_node(ctx: &mut SessionContext, node_id: &str) -> Result<(), SessionError> {
    let map: MapDocument = read_doc(ctx.store(), DocKey::MapData).await?;
    let Some(node) = map.node(node_id) else {
        warn!(node_id, "travel to unknown node rejected");
        return Ok(());
    };
    let kind = node.kind.as_str().to_string();
    let properties = node.properties.clone();

    let id = node_id.to_string();
    update_doc::<MapDocument, _>(ctx.store(), DocKey::MapData, move |m| {
        m.player_position = Some(id.clone());
        if !m.path_taken.contains(&id) {
            m.path_taken.push(id);
        }
    })
    .await?;
    ctx.history.add(
        HistoryKind::Map,
        format!("{} entered a {kind} room.", ctx.config.player_name),
    );
    ctx.fetch_all().await?;

    let map = &ctx.snapshot.map_data;
    let player = &ctx.snapshot.player_data;
    let progress = floor_progress(map);
    let properties = serde_json::to_string(&properties).unwrap_or_else(|_| "[]".to_string());
    let prompt = format!(
        "(System: {{{{user}}}} moves to a new room.\n\
         map_floor: {}\n\
         node_id: {node_id}\n\
         node_type: {kind}\n\
         room_properties: {properties}\n\
         map_progress: {progress}%\n\
         player_health: {}\n\
         player_chips: {}\n\
         Narrate the room and issue the commands it calls for.)",
        map.map_layer + 1,
        player.health,
        player.chips,
    );
    ctx.submit_prompt(&prompt).await;
    Ok(())
}

/// Percentage of non-boss rows already walked.
fn floor_progress(map: &MapDocument) -> u32 {
    let total_rows = map
        .nodes
        .iter()
        .filter(|n| n.kind != crate::map::NodeKind::Boss)
        .map(|n| n.row + 1)
        .max()
        .unwrap_or(0);
    if total_rows == 0 {
        return 0;
    }
    let current_row = map
        .player_position
        .as_deref()
        .and_then(|id| map.node(id))
        .map(|n| n.row + 1)
        .unwrap_or(0);
    (current_row.min(total_rows) * 100) / total_rows
}

/// Spend chips probing the current room for a hidden passage.
pub async fn find_secret_room(ctx: &mut SessionContext) -> Result<(), SessionError> {
    let map: MapDocument = read_doc(ctx.store(), DocKey::MapData).await?;
    let Some(position) = map.player_position.clone() else {
        ctx.notify(NoticeLevel::Warning, "You are nowhere to search.");
        return Ok(());
    };
    if map.searched_nodes.contains(&position) {
        ctx.notify(
            NoticeLevel::Info,
            "You have already searched this room top to bottom.",
        );
        return Ok(());
    }
    let player: PlayerData = read_doc(ctx.store(), DocKey::PlayerData).await?;
    if player.chips < SECRET_SEARCH_COST {
        ctx.notify(
            NoticeLevel::Error,
            &format!("Searching costs {SECRET_SEARCH_COST} chips and you cannot cover it."),
        );
        return Ok(());
    }

    update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
        p.chips -= SECRET_SEARCH_COST;
    })
    .await?;

    let found = map
        .secret_nodes
        .iter()
        .find(|s| s.attached_to_node_id == position && !s.discovered)
        .map(|s| s.id.clone());

    let searched = position.clone();
    let discovered = found.clone();
    update_doc::<MapDocument, _>(ctx.store(), DocKey::MapData, move |m| {
        m.searched_nodes.push(searched);
        if let Some(id) = discovered {
            if let Some(secret) = m.secret_nodes.iter_mut().find(|s| s.id == id) {
                secret.discovered = true;
            }
        }
    })
    .await?;

    match found {
        Some(id) => {
            ctx.notify(NoticeLevel::Success, "You found a hidden passage!");
            ctx.history.add(
                HistoryKind::Map,
                format!("{} discovered a secret room.", ctx.config.player_name),
            );
            ctx.fetch_all().await?;
            ctx.submit_prompt(&format!(
                "(System: {{{{user}}}} paid {SECRET_SEARCH_COST} chips to search the room and \
                 uncovered a secret passage (node {id}). Describe what lies behind it.)"
            ))
            .await;
        }
        None => {
            ctx.fetch_all().await?;
            ctx.submit_prompt(&format!(
                "(System: {{{{user}}}} paid {SECRET_SEARCH_COST} chips to search the room but \
                 found nothing. Narrate the wasted effort briefly.)"
            ))
            .await;
        }
    }
    Ok(())
}

/// Mark the current floor as checkpointed.
pub async fn save_map_data(ctx: &mut SessionContext) -> Result<(), SessionError> {
    update_doc::<MapDocument, _>(ctx.store(), DocKey::MapData, |m| {
        m.is_saved = true;
    })
    .await?;
    ctx.notify(NoticeLevel::Success, "Progress saved.");
    ctx.fetch_all().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{
        MapModification, MapTargetFilter, SelectionPriority,
    };
    use crate::map::{generate_map_with_rng, MapNode, NodeKind, SecretNode};
    use crate::session::SessionConfig;
    use crate::store::{replace_doc, MemoryStore};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    async fn context_with_map() -> SessionContext {
        let mut ctx = SessionContext::new(Box::new(MemoryStore::new()), SessionConfig::new("Mara"));
        let mut rng = StdRng::seed_from_u64(7);
        let map = generate_map_with_rng(0, 8, 5, &mut rng);
        replace_doc(ctx.store(), DocKey::MapData, map).await.unwrap();
        replace_doc(
            ctx.store(),
            DocKey::PlayerData,
            PlayerData {
                name: "Mara".to_string(),
                health: 3,
                max_health: 3,
                chips: 1000,
                ..PlayerData::default()
            },
        )
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();
        ctx
    }

    fn modify_request(types: &[&str], scope: MapScope, value: &str) -> MapModifyData {
        MapModifyData {
            target_filter: MapTargetFilter {
                node_types: types.iter().map(|t| t.to_string()).collect(),
                scope,
                selection_priority: SelectionPriority::default(),
            },
            modification: MapModification {
                field: "type".to_string(),
                value: serde_json::json!(value),
            },
            effect_description: "The air shimmers.".to_string(),
        }
    }

    fn count_kind(ctx: &SessionContext, kind: NodeKind) -> usize {
        ctx.snapshot
            .map_data
            .nodes
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    #[tokio::test]
    async fn test_modify_map_rewrites_exactly_one_node() {
        let mut ctx = context_with_map().await;
        let enemies_before = count_kind(&ctx, NodeKind::Enemy);
        let events_before = count_kind(&ctx, NodeKind::Event);
        assert!(enemies_before > 0);

        modify_map(
            &mut ctx,
            modify_request(&["enemy"], MapScope::AnyUnvisited, "event"),
        )
        .await
        .unwrap();

        assert_eq!(count_kind(&ctx, NodeKind::Enemy), enemies_before - 1);
        assert_eq!(count_kind(&ctx, NodeKind::Event), events_before + 1);
    }

    #[tokio::test]
    async fn test_modify_map_empty_selection_is_noop() {
        let mut ctx = context_with_map().await;
        let before = ctx.snapshot.map_data.nodes.clone();
        // Angel nodes only exist after a boss win.
        modify_map(
            &mut ctx,
            modify_request(&["angel"], MapScope::AnyUnvisited, "event"),
        )
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();
        assert_eq!(ctx.snapshot.map_data.nodes, before);
    }

    #[tokio::test]
    async fn test_modify_map_unknown_field_aborts() {
        let mut ctx = context_with_map().await;
        let before = ctx.snapshot.map_data.nodes.clone();
        let mut request = modify_request(&["enemy"], MapScope::AnyUnvisited, "event");
        request.modification.field = "reward".to_string();
        modify_map(&mut ctx, request).await.unwrap();
        ctx.fetch_all().await.unwrap();
        assert_eq!(ctx.snapshot.map_data.nodes, before);
    }

    #[tokio::test]
    async fn test_modify_map_unknown_type_aborts() {
        let mut ctx = context_with_map().await;
        let before = ctx.snapshot.map_data.nodes.clone();
        modify_map(
            &mut ctx,
            modify_request(&["enemy"], MapScope::AnyUnvisited, "volcano"),
        )
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();
        assert_eq!(ctx.snapshot.map_data.nodes, before);
    }

    #[tokio::test]
    async fn test_reachable_scope_only_touches_connections() {
        let mut ctx = context_with_map().await;
        // Stand on the first row-zero node.
        let start = ctx
            .snapshot
            .map_data
            .nodes
            .iter()
            .find(|n| n.row == 0)
            .unwrap()
            .id
            .clone();
        travel_to_node(&mut ctx, &start).await.unwrap();
        let reachable = ctx
            .snapshot
            .map_data
            .node(&start)
            .unwrap()
            .connections
            .clone();
        let reachable_kinds: Vec<NodeKind> = reachable
            .iter()
            .filter_map(|id| ctx.snapshot.map_data.node(id))
            .map(|n| n.kind)
            .collect();

        // Pick a type that exists among the connections.
        let Some(target_kind) = reachable_kinds.first().copied() else {
            return;
        };
        modify_map(
            &mut ctx,
            modify_request(&[target_kind.as_str()], MapScope::Reachable, "treasure"),
        )
        .await
        .unwrap();

        let changed: Vec<&str> = ctx
            .snapshot
            .map_data
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Treasure)
            .map(|n| n.id.as_str())
            .collect();
        for id in changed {
            assert!(reachable.iter().any(|r| r == id));
        }
    }

    fn shop_node(id: &str, row: u32, connections: &[&str]) -> MapNode {
        MapNode {
            id: id.to_string(),
            row,
            x: 0.0,
            y: 0.0,
            kind: NodeKind::Shop,
            connections: connections.iter().map(|c| c.to_string()).collect(),
            properties: Vec::new(),
        }
    }

    #[test]
    fn test_future_scope_skips_directly_reachable_nodes() {
        let mut map = MapDocument::default();
        let mut start = shop_node("start", 0, &["near"]);
        start.kind = NodeKind::Rest;
        map.nodes = vec![
            start,
            shop_node("near", 1, &[]),
            shop_node("far", 1, &[]),
        ];
        map.player_position = Some("start".to_string());
        map.path_taken = vec!["start".to_string()];

        let request = modify_request(&["shop"], MapScope::Future, "event");
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let picked = select_target_node(&map, &request, &mut rng);
            assert_eq!(picked.as_deref(), Some("far"));
        }
    }

    #[test]
    fn test_row_priority_sorts_by_absolute_row() {
        let mut map = MapDocument::default();
        let mut start = shop_node("start", 4, &[]);
        start.kind = NodeKind::Rest;
        map.nodes = vec![
            start,
            shop_node("low", 0, &[]),
            shop_node("high", 5, &[]),
        ];
        map.player_position = Some("start".to_string());
        map.path_taken = vec!["start".to_string()];

        // Row zero wins "closest" even though row five is nearer the player.
        let mut closest = modify_request(&["shop"], MapScope::AnyUnvisited, "event");
        closest.target_filter.selection_priority.row = Some(RowPriority::Closest);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let picked = select_target_node(&map, &closest, &mut rng);
            assert_eq!(picked.as_deref(), Some("low"));
        }

        let mut furthest = modify_request(&["shop"], MapScope::AnyUnvisited, "event");
        furthest.target_filter.selection_priority.row = Some(RowPriority::Furthest);
        for _ in 0..20 {
            let picked = select_target_node(&map, &furthest, &mut rng);
            assert_eq!(picked.as_deref(), Some("high"));
        }
    }

    #[test]
    fn test_density_priority_counts_outgoing_edges_only() {
        let mut map = MapDocument::default();
        map.nodes = vec![
            shop_node("wide", 1, &["a", "b", "c"]),
            shop_node("narrow", 1, &["a"]),
        ];
        // Heavy inbound traffic must not make "narrow" look dense.
        map.paths = (0..5)
            .map(|i| crate::map::MapPath {
                from: format!("feeder-{i}"),
                to: "narrow".to_string(),
            })
            .collect();

        let mut request = modify_request(&["shop"], MapScope::AnyUnvisited, "event");
        request.target_filter.selection_priority.density = Some(DensityPriority::Densest);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let picked = select_target_node(&map, &request, &mut rng);
            assert_eq!(picked.as_deref(), Some("wide"));
        }

        request.target_filter.selection_priority.density = Some(DensityPriority::Sparsest);
        for _ in 0..20 {
            let picked = select_target_node(&map, &request, &mut rng);
            assert_eq!(picked.as_deref(), Some("narrow"));
        }
    }

    #[tokio::test]
    async fn test_travel_records_path_and_position() {
        let mut ctx = context_with_map().await;
        let first = ctx.snapshot.map_data.nodes[0].id.clone();
        travel_to_node(&mut ctx, &first).await.unwrap();
        assert_eq!(ctx.snapshot.map_data.player_position.as_deref(), Some(first.as_str()));
        assert_eq!(ctx.snapshot.map_data.path_taken, vec![first.clone()]);

        // Re-entering the same node does not duplicate the trail.
        travel_to_node(&mut ctx, &first).await.unwrap();
        assert_eq!(ctx.snapshot.map_data.path_taken.len(), 1);
    }

    #[tokio::test]
    async fn test_travel_to_unknown_node_is_rejected() {
        let mut ctx = context_with_map().await;
        travel_to_node(&mut ctx, "L9-R9-N9").await.unwrap();
        assert!(ctx.snapshot.map_data.player_position.is_none());
    }

    #[tokio::test]
    async fn test_secret_search_deducts_and_marks() {
        let mut ctx = context_with_map().await;
        let first = ctx.snapshot.map_data.nodes[0].id.clone();
        travel_to_node(&mut ctx, &first).await.unwrap();

        find_secret_room(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.chips, 800);
        assert!(ctx.snapshot.map_data.searched_nodes.contains(&first));

        // Second search of the same room is free because it never runs.
        find_secret_room(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.chips, 800);
    }

    #[tokio::test]
    async fn test_secret_search_needs_chips() {
        let mut ctx = context_with_map().await;
        let first = ctx.snapshot.map_data.nodes[0].id.clone();
        travel_to_node(&mut ctx, &first).await.unwrap();
        update_doc::<PlayerData, _>(ctx.store(), DocKey::PlayerData, |p| {
            p.chips = 150;
        })
        .await
        .unwrap();
        ctx.fetch_all().await.unwrap();

        find_secret_room(&mut ctx).await.unwrap();
        assert_eq!(ctx.snapshot.player_data.chips, 150);
        assert!(ctx.snapshot.map_data.searched_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_secret_search_discovers_attached_room() {
        let mut ctx = context_with_map().await;
        let first = ctx.snapshot.map_data.nodes[0].id.clone();
        let secret_id = "L0-SECRET-TEST".to_string();
        let attach = first.clone();
        let sid = secret_id.clone();
        update_doc::<MapDocument, _>(ctx.store(), DocKey::MapData, move |m| {
            m.secret_nodes.push(SecretNode {
                id: sid,
                attached_to_node_id: attach,
                kind: "treasure".to_string(),
                discovered: false,
                x: 0.0,
                y: 0.0,
            });
        })
        .await
        .unwrap();
        travel_to_node(&mut ctx, &first).await.unwrap();

        find_secret_room(&mut ctx).await.unwrap();
        let secret = ctx
            .snapshot
            .map_data
            .secret_nodes
            .iter()
            .find(|s| s.id == secret_id)
            .unwrap();
        assert!(secret.discovered);
    }

    #[tokio::test]
    async fn test_save_map_sets_flag() {
        let mut ctx = context_with_map().await;
        assert!(!ctx.snapshot.map_data.is_saved);
        save_map_data(&mut ctx).await.unwrap();
        assert!(ctx.snapshot.map_data.is_saved);
    }

    #[tokio::test]
    async fn test_floor_progress_excludes_boss_row() {
        let ctx = context_with_map().await;
        let map = &ctx.snapshot.map_data;
        assert_eq!(floor_progress(map), 0);

        let mut map = map.clone();
        let last_row = map
            .nodes
            .iter()
            .filter(|n| n.kind != NodeKind::Boss)
            .map(|n| n.row)
            .max()
            .unwrap();
        let last = map
            .nodes
            .iter()
            .find(|n| n.row == last_row && n.kind != NodeKind::Boss)
            .unwrap()
            .id
            .clone();
        map.player_position = Some(last);
        assert_eq!(floor_progress(&map), 100);
    }
}
