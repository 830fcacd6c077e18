//! Roguelike floor map: layered DAG generation with connectivity and
//! elite-balancing guarantees.
//!
//! Every generated map satisfies two invariants:
//! - every row-0 node has a directed path to the boss (no orphans), and
//! - every start-to-boss path passes through at least one elite node,
//!   with no more than [`MAX_ELITES`] elites on the floor.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maximum elites allowed on one floor after path coverage is enforced.
pub const MAX_ELITES: usize = 6;

const LAYER_HEIGHT: f64 = 800.0;
const MAP_WIDTH: f64 = 500.0;

/// What happens at a map node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Enemy,
    Elite,
    Rest,
    Shop,
    Boss,
    Event,
    Treasure,
    #[serde(rename = "card-sharp")]
    CardSharp,
    Angel,
    Devil,
}

impl NodeKind {
    /// Parse the wire form used in map-modification commands.
    pub fn parse(s: &str) -> Option<NodeKind> {
        match s {
            "enemy" => Some(NodeKind::Enemy),
            "elite" => Some(NodeKind::Elite),
            "rest" => Some(NodeKind::Rest),
            "shop" => Some(NodeKind::Shop),
            "boss" => Some(NodeKind::Boss),
            "event" => Some(NodeKind::Event),
            "treasure" => Some(NodeKind::Treasure),
            "card-sharp" => Some(NodeKind::CardSharp),
            "angel" => Some(NodeKind::Angel),
            "devil" => Some(NodeKind::Devil),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Enemy => "enemy",
            NodeKind::Elite => "elite",
            NodeKind::Rest => "rest",
            NodeKind::Shop => "shop",
            NodeKind::Boss => "boss",
            NodeKind::Event => "event",
            NodeKind::Treasure => "treasure",
            NodeKind::CardSharp => "card-sharp",
            NodeKind::Angel => "angel",
            NodeKind::Devil => "devil",
        }
    }
}

/// One room on the floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: String,
    pub row: u32,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Forward edges, as target node ids.
    #[serde(default)]
    pub connections: Vec<String>,
    /// Flavor tags the AI weaves into encounters.
    #[serde(default)]
    pub properties: Vec<String>,
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPath {
    pub from: String,
    pub to: String,
}

/// A hidden room attached to a regular node, revealed by searching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretNode {
    pub id: String,
    pub attached_to_node_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub discovered: bool,
    pub x: f64,
    pub y: f64,
}

/// The full persisted map document for one floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MapData {
    #[serde(default)]
    pub nodes: Vec<MapNode>,
    #[serde(default)]
    pub paths: Vec<MapPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_position: Option<String>,
    #[serde(default)]
    pub path_taken: Vec<String>,
    #[serde(default)]
    pub secret_nodes: Vec<SecretNode>,
    #[serde(default)]
    pub searched_nodes: Vec<String>,
    #[serde(rename = "mapLayer", default)]
    pub map_layer: u32,
    #[serde(rename = "bossDefeated", default)]
    pub boss_defeated: bool,
    #[serde(default)]
    pub is_saved: bool,
}

impl MapData {
    /// True once a map has been generated for this document.
    pub fn is_present(&self) -> bool {
        !self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&MapNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut MapNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn boss_node(&self) -> Option<&MapNode> {
        self.nodes.iter().find(|n| n.kind == NodeKind::Boss)
    }
}

/// Generate a floor with the default dimensions (8 rows, up to 5 paths).
pub fn generate_map(layer: u32) -> MapData {
    generate_map_with_rng(layer, 8, 5, &mut rand::thread_rng())
}

/// Generate a floor deterministically from the given RNG.
pub fn generate_map_with_rng<R: Rng>(
    layer: u32,
    rows_per_layer: u32,
    max_parallel_paths: u32,
    rng: &mut R,
) -> MapData {
    let row_height = LAYER_HEIGHT / (rows_per_layer as f64 + 2.0);
    let mut nodes: Vec<MapNode> = Vec::new();
    let mut rows: Vec<Vec<usize>> = Vec::new();

    // Regular rows.
    for row in 0..rows_per_layer {
        let count = (rng.gen_range(0..max_parallel_paths.saturating_sub(2).max(1)) + 3) as usize;
        let mut row_indices = Vec::with_capacity(count);
        for slot in 0..count {
            let x = (MAP_WIDTH / (count as f64 + 1.0)) * (slot as f64 + 1.0)
                + (rng.gen::<f64>() - 0.5) * 40.0;
            let y = LAYER_HEIGHT - (row as f64 + 1.5) * row_height + (rng.gen::<f64>() - 0.5) * 30.0;
            row_indices.push(nodes.len());
            nodes.push(MapNode {
                id: format!("L{layer}-R{row}-N{slot}"),
                row,
                x,
                y,
                kind: roll_node_kind(row, rows_per_layer, rng),
                connections: Vec::new(),
                properties: roll_properties(rng),
            });
        }
        rows.push(row_indices);
    }

    // Synthetic final row: the boss.
    let boss_index = nodes.len();
    nodes.push(MapNode {
        id: format!("L{layer}-BOSS"),
        row: rows_per_layer,
        x: MAP_WIDTH / 2.0,
        y: row_height,
        kind: NodeKind::Boss,
        connections: Vec::new(),
        properties: Vec::new(),
    });
    rows.push(vec![boss_index]);

    let mut paths: Vec<MapPath> = Vec::new();
    let mut incoming: HashMap<usize, usize> = HashMap::new();

    // Forward edges: each node reaches its nearest next-row node(s), then any
    // next-row node left unreachable is wired back to its nearest predecessor.
    for row in 0..rows_per_layer as usize {
        let (current, next) = (rows[row].clone(), rows[row + 1].clone());

        for &from in &current {
            let mut targets = next.clone();
            let from_x = nodes[from].x;
            targets.sort_by(|&a, &b| {
                let da = (nodes[a].x - from_x).abs();
                let db = (nodes[b].x - from_x).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            });

            let edges = if rng.gen::<f64>() < 0.3 { 2 } else { 1 };
            for &to in targets.iter().take(edges) {
                connect(&mut nodes, &mut paths, &mut incoming, from, to);
            }
        }

        for &to in &next {
            if incoming.get(&to).copied().unwrap_or(0) == 0 {
                let to_x = nodes[to].x;
                let from = current
                    .iter()
                    .copied()
                    .min_by(|&a, &b| {
                        let da = (nodes[a].x - to_x).abs();
                        let db = (nodes[b].x - to_x).abs();
                        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .expect("every row has at least one node");
                connect(&mut nodes, &mut paths, &mut incoming, from, to);
            }
        }
    }

    ensure_elites_on_all_paths(&mut nodes, &paths, rng);
    cap_elites(&mut nodes, rng);
    let secret_nodes = roll_secret_nodes(layer, &nodes, rng);

    MapData {
        nodes,
        paths,
        player_position: None,
        path_taken: Vec::new(),
        secret_nodes,
        searched_nodes: Vec::new(),
        map_layer: layer,
        boss_defeated: false,
        is_saved: false,
    }
}

fn connect(
    nodes: &mut [MapNode],
    paths: &mut Vec<MapPath>,
    incoming: &mut HashMap<usize, usize>,
    from: usize,
    to: usize,
) {
    let to_id = nodes[to].id.clone();
    if nodes[from].connections.contains(&to_id) {
        return;
    }
    nodes[from].connections.push(to_id.clone());
    paths.push(MapPath {
        from: nodes[from].id.clone(),
        to: to_id,
    });
    *incoming.entry(to).or_insert(0) += 1;
}

/// 55% combat, with the elite share of combat scaling linearly from 0% on the
/// first row to 35% on the last; the non-combat bucket splits
/// event/rest/shop/treasure/card-sharp at 45/20/15/15/5.
fn roll_node_kind<R: Rng>(row: u32, total_rows: u32, rng: &mut R) -> NodeKind {
    if rng.gen::<f64>() < 0.55 {
        let elite_chance = 0.35 * (row as f64 / total_rows as f64);
        if rng.gen::<f64>() < elite_chance {
            NodeKind::Elite
        } else {
            NodeKind::Enemy
        }
    } else {
        let roll = rng.gen::<f64>();
        if roll < 0.45 {
            NodeKind::Event
        } else if roll < 0.65 {
            NodeKind::Rest
        } else if roll < 0.80 {
            NodeKind::Shop
        } else if roll < 0.95 {
            NodeKind::Treasure
        } else {
            NodeKind::CardSharp
        }
    }
}

const SPECIAL_PROPERTIES: [&str; 7] = [
    "Wealthy", "Cursed", "Blessed", "Volatile", "Ambush", "Trap", "Illusion",
];

fn roll_properties<R: Rng>(rng: &mut R) -> Vec<String> {
    let mut properties = Vec::new();
    if rng.gen::<f64>() < 0.05 {
        properties.push("big".to_string());
    }
    // One roll decides at most one special tag, ~4% per slot.
    let roll = rng.gen::<f64>();
    for (k, prop) in SPECIAL_PROPERTIES.iter().enumerate() {
        if roll < 0.04 * (k as f64 + 1.0) {
            properties.push(prop.to_string());
            break;
        }
    }
    properties
}

/// Enumerate every start-to-boss path; any path without an elite gets one of
/// its plain combat nodes promoted. A promoted node is never promoted twice.
fn ensure_elites_on_all_paths<R: Rng>(nodes: &mut [MapNode], paths: &[MapPath], rng: &mut R) {
    let index_by_id: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();
    let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
    for path in paths {
        if let (Some(&from), Some(&to)) = (index_by_id.get(&path.from), index_by_id.get(&path.to)) {
            adjacency.entry(from).or_default().push(to);
        }
    }

    let boss = match nodes.iter().position(|n| n.kind == NodeKind::Boss) {
        Some(i) => i,
        None => return,
    };
    let starts: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.row == 0)
        .map(|(i, _)| i)
        .collect();

    let mut paths_to_upgrade: Vec<Vec<usize>> = Vec::new();
    for start in starts {
        let mut trail = Vec::new();
        collect_elite_free_paths(
            nodes,
            &adjacency,
            boss,
            start,
            false,
            &mut trail,
            &mut paths_to_upgrade,
        );
    }

    let mut upgraded: HashSet<usize> = HashSet::new();
    for path in paths_to_upgrade {
        let candidates: Vec<usize> = path
            .iter()
            .copied()
            .filter(|&i| nodes[i].kind == NodeKind::Enemy && !upgraded.contains(&i))
            .collect();
        if let Some(&pick) = candidates.get(rng.gen_range(0..candidates.len().max(1))) {
            nodes[pick].kind = NodeKind::Elite;
            upgraded.insert(pick);
        }
    }
}

fn collect_elite_free_paths(
    nodes: &[MapNode],
    adjacency: &HashMap<usize, Vec<usize>>,
    boss: usize,
    current: usize,
    has_elite: bool,
    trail: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    trail.push(current);
    let has_elite = has_elite || nodes[current].kind == NodeKind::Elite;

    if current == boss {
        if !has_elite {
            out.push(trail.clone());
        }
    } else if let Some(nexts) = adjacency.get(&current) {
        for &next in nexts {
            collect_elite_free_paths(nodes, adjacency, boss, next, has_elite, trail, out);
        }
    }
    trail.pop();
}

/// Randomly demote elites back to plain combat until at most [`MAX_ELITES`]
/// remain.
fn cap_elites<R: Rng>(nodes: &mut [MapNode], rng: &mut R) {
    let mut elites: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.kind == NodeKind::Elite)
        .map(|(i, _)| i)
        .collect();
    while elites.len() > MAX_ELITES {
        let pick = rng.gen_range(0..elites.len());
        let index = elites.swap_remove(pick);
        nodes[index].kind = NodeKind::Enemy;
    }
}

/// Well-connected nodes (≥4 edges) host a super-hidden secret 20% of the
/// time; any other node hosts a plain hidden secret 5% of the time.
fn roll_secret_nodes<R: Rng>(layer: u32, nodes: &[MapNode], rng: &mut R) -> Vec<SecretNode> {
    let mut secrets = Vec::new();
    for (index, node) in nodes.iter().enumerate() {
        let kind = if node.connections.len() >= 4 && rng.gen::<f64>() < 0.20 {
            Some("super_hidden")
        } else if rng.gen::<f64>() < 0.05 {
            Some("hidden")
        } else {
            None
        };

        if let Some(kind) = kind {
            let angle = rng.gen::<f64>() * std::f64::consts::TAU;
            let distance = 60.0 + rng.gen::<f64>() * 20.0;
            secrets.push(SecretNode {
                id: format!("L{layer}-S{index}"),
                attached_to_node_id: node.id.clone(),
                kind: kind.to_string(),
                discovered: false,
                x: node.x + angle.cos() * distance,
                y: node.y + angle.sin() * distance,
            });
        }
    }
    secrets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::VecDeque;

    fn reaches_boss(map: &MapData, start_id: &str) -> bool {
        let boss_id = &map.boss_node().expect("boss exists").id;
        let mut queue = VecDeque::from([start_id.to_string()]);
        let mut seen = HashSet::new();
        while let Some(id) = queue.pop_front() {
            if &id == boss_id {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = map.node(&id) {
                queue.extend(node.connections.iter().cloned());
            }
        }
        false
    }

    fn all_paths_have_elite(map: &MapData) -> bool {
        let boss_id = map.boss_node().expect("boss exists").id.clone();
        // Depth-first over (node, elite-seen) pairs.
        let starts: Vec<&MapNode> = map.nodes.iter().filter(|n| n.row == 0).collect();
        for start in starts {
            let mut stack = vec![(start.id.clone(), start.kind == NodeKind::Elite)];
            while let Some((id, has_elite)) = stack.pop() {
                if id == boss_id {
                    if !has_elite {
                        return false;
                    }
                    continue;
                }
                let node = map.node(&id).expect("connection target exists");
                for next_id in &node.connections {
                    let next = map.node(next_id).expect("connection target exists");
                    stack.push((next_id.clone(), has_elite || next.kind == NodeKind::Elite));
                }
            }
        }
        true
    }

    #[test]
    fn test_generated_map_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let map = generate_map_with_rng(0, 8, 5, &mut rng);

        assert_eq!(map.map_layer, 0);
        assert!(map.player_position.is_none());
        assert!(map.path_taken.is_empty());
        assert!(map.searched_nodes.is_empty());
        assert!(!map.boss_defeated);
        assert_eq!(
            map.nodes.iter().filter(|n| n.kind == NodeKind::Boss).count(),
            1
        );
        for row in 0..8 {
            let count = map.nodes.iter().filter(|n| n.row == row).count();
            assert!((3..=5).contains(&count), "row {row} has {count} nodes");
        }
    }

    #[test]
    fn test_every_start_node_reaches_boss() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = generate_map_with_rng(0, 8, 5, &mut rng);
            for node in map.nodes.iter().filter(|n| n.row == 0) {
                assert!(reaches_boss(&map, &node.id), "seed {seed}: {} orphaned", node.id);
            }
        }
    }

    #[test]
    fn test_no_node_is_orphaned() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = generate_map_with_rng(0, 8, 5, &mut rng);
            let mut with_incoming: HashSet<&str> = HashSet::new();
            for path in &map.paths {
                with_incoming.insert(path.to.as_str());
            }
            for node in map.nodes.iter().filter(|n| n.row > 0) {
                assert!(
                    with_incoming.contains(node.id.as_str()),
                    "seed {seed}: {} has no incoming edge",
                    node.id
                );
            }
        }
    }

    #[test]
    fn test_every_path_contains_an_elite() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = generate_map_with_rng(0, 8, 5, &mut rng);
            assert!(all_paths_have_elite(&map), "seed {seed}: elite-free path");
        }
    }

    #[test]
    fn test_elite_count_is_capped() {
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let map = generate_map_with_rng(0, 8, 5, &mut rng);
            let elites = map
                .nodes
                .iter()
                .filter(|n| n.kind == NodeKind::Elite)
                .count();
            assert!(elites <= MAX_ELITES, "seed {seed}: {elites} elites");
        }
    }

    #[test]
    fn test_secret_nodes_start_undiscovered() {
        let mut rng = StdRng::seed_from_u64(3);
        let map = generate_map_with_rng(0, 8, 5, &mut rng);
        for secret in &map.secret_nodes {
            assert!(!secret.discovered);
            assert!(map.node(&secret.attached_to_node_id).is_some());
        }
    }

    #[test]
    fn test_node_kind_wire_names() {
        let json = serde_json::to_value(NodeKind::CardSharp).unwrap();
        assert_eq!(json, "card-sharp");
        assert_eq!(NodeKind::parse("card-sharp"), Some(NodeKind::CardSharp));
        assert_eq!(NodeKind::parse("volcano"), None);
    }

    #[test]
    fn test_map_data_serde_field_names() {
        let mut rng = StdRng::seed_from_u64(4);
        let map = generate_map_with_rng(2, 8, 5, &mut rng);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["mapLayer"], 2);
        assert_eq!(json["bossDefeated"], false);
    }
}
