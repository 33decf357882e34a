use crate::game::state::SessionId;
use crate::net::protocol::ArenaSnapshot;

/// One live cell as the leaderboard sees it
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCell<'a> {
    pub owner: SessionId,
    pub name: &'a str,
    pub score: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub session_id: SessionId,
    pub name: String,
    pub score: u64,
}

/// Group cells by owner, keep each owner's highest score and sort
/// descending. Ties keep first-seen order.
pub fn derive_leaderboard<'a>(cells: impl IntoIterator<Item = LiveCell<'a>>) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = Vec::new();
    for cell in cells {
        match entries.iter_mut().find(|e| e.session_id == cell.owner) {
            Some(entry) => entry.score = entry.score.max(cell.score),
            None => entries.push(LeaderboardEntry {
                session_id: cell.owner,
                name: cell.name.to_string(),
                score: cell.score,
            }),
        }
    }
    // sort_by is stable
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries
}

/// Leaderboard for a snapshot: the arena-wide standings merged with the
/// alive players in view. Split pieces carry no score of their own on the
/// wire and count as their owner's score.
pub fn leaderboard_from_snapshot(snapshot: &ArenaSnapshot) -> Vec<LeaderboardEntry> {
    let standings = snapshot.leaders.iter().map(|l| LiveCell {
        owner: l.session_id,
        name: &l.name,
        score: l.score,
    });
    let in_view = snapshot.players.iter().filter(|p| p.alive).flat_map(|p| {
        std::iter::once(LiveCell {
            owner: p.session_id,
            name: &p.name,
            score: p.score,
        })
        .chain(p.pieces.iter().map(move |_| LiveCell {
            owner: p.session_id,
            name: &p.name,
            score: p.score,
        }))
    });
    derive_leaderboard(standings.chain(in_view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::CashOutState;
    use crate::net::protocol::{LeaderSnapshot, PieceSnapshot, PlayerSnapshot, ZoneSnapshot};
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    #[test]
    fn test_split_pieces_fold_into_owner() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let cells = vec![
            LiveCell { owner: a, name: "A", score: 10 },
            LiveCell { owner: a, name: "A", score: 3 },
            LiveCell { owner: b, name: "B", score: 7 },
        ];

        let board = derive_leaderboard(cells);
        let rows: Vec<(SessionId, u64)> = board.iter().map(|e| (e.session_id, e.score)).collect();
        assert_eq!(rows, vec![(a, 10), (b, 7)]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let ids: Vec<SessionId> = (0..3).map(|_| Uuid::new_v4()).collect();
        let cells = ids.iter().map(|id| LiveCell { owner: *id, name: "x", score: 5 });
        let board = derive_leaderboard(cells);
        assert_eq!(board.iter().map(|e| e.session_id).collect::<Vec<_>>(), ids);
    }

    fn player(name: &str, score: u64, alive: bool, pieces: usize) -> PlayerSnapshot {
        PlayerSnapshot {
            session_id: Uuid::new_v4(),
            name: name.to_string(),
            cosmetic: String::new(),
            position: Vec2::ZERO,
            mass: 50.0,
            radius: 40.0,
            score,
            alive,
            spawn_protected: false,
            cash_out: CashOutState::default(),
            pieces: (0..pieces)
                .map(|i| PieceSnapshot {
                    id: i as u64,
                    position: Vec2::ZERO,
                    mass: 20.0,
                    radius: 25.0,
                    can_merge: false,
                })
                .collect(),
        }
    }

    #[test]
    fn test_from_snapshot_skips_dead_players() {
        let snapshot = ArenaSnapshot {
            tick: 1,
            zone: ZoneSnapshot {
                center: Vec2::ZERO,
                current_radius: 500.0,
                target_radius: 500.0,
            },
            players: vec![player("low", 2, true, 0), player("dead", 99, false, 0), player("split", 8, true, 3)],
            coins: Vec::new(),
            viruses: Vec::new(),
            players_alive: 2,
            leaders: Vec::new(),
        };

        let board = leaderboard_from_snapshot(&snapshot);
        let names: Vec<&str> = board.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["split", "low"]);
    }

    #[test]
    fn test_standings_include_players_out_of_view() {
        let near = player("near", 4, true, 0);
        let far = LeaderSnapshot {
            session_id: Uuid::new_v4(),
            name: "far".to_string(),
            score: 300,
        };
        let snapshot = ArenaSnapshot {
            tick: 1,
            zone: ZoneSnapshot {
                center: Vec2::ZERO,
                current_radius: 500.0,
                target_radius: 500.0,
            },
            leaders: vec![
                far.clone(),
                LeaderSnapshot {
                    session_id: near.session_id,
                    name: "near".to_string(),
                    score: 4,
                },
            ],
            players: vec![near],
            coins: Vec::new(),
            viruses: Vec::new(),
            players_alive: 2,
        };

        let board = leaderboard_from_snapshot(&snapshot);
        let rows: Vec<(&str, u64)> = board.iter().map(|e| (e.name.as_str(), e.score)).collect();
        assert_eq!(rows, vec![("far", 300), ("near", 4)]);
    }
}
