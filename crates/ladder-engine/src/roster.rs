use ladder_db::RosterSnapshot;
use ladder_types::api::RankEntry;
use ladder_types::{PlayerId, PlayerRecord};

/// One category's players: the ranked active pool and the removed pool.
///
/// Both pools keep insertion order, which is the tie-break between equal
/// ratings. A player id lives in at most one of the two.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    active: Vec<(PlayerId, PlayerRecord)>,
    removed: Vec<(PlayerId, PlayerRecord)>,
}

impl Roster {
    pub fn from_snapshot(snapshot: RosterSnapshot) -> Self {
        let mut roster = Self::default();
        for (player, record) in snapshot.active {
            if Self::position(&roster.active, player).is_none() {
                roster.active.push((player, record));
            }
        }
        // A stored duplicate across pools resolves in favour of the active record.
        for (player, record) in snapshot.removed {
            if Self::position(&roster.active, player).is_none()
                && Self::position(&roster.removed, player).is_none()
            {
                roster.removed.push((player, record));
            }
        }
        roster
    }

    pub fn active_records(&self) -> &[(PlayerId, PlayerRecord)] {
        &self.active
    }

    pub fn removed_records(&self) -> &[(PlayerId, PlayerRecord)] {
        &self.removed
    }

    fn position(pool: &[(PlayerId, PlayerRecord)], player: PlayerId) -> Option<usize> {
        pool.iter().position(|(id, _)| *id == player)
    }

    pub fn get(&self, player: PlayerId) -> Option<&PlayerRecord> {
        self.active
            .iter()
            .chain(self.removed.iter())
            .find(|(id, _)| *id == player)
            .map(|(_, record)| record)
    }

    pub fn is_removed(&self, player: PlayerId) -> bool {
        Self::position(&self.removed, player).is_some()
    }

    /// The player's record from whichever pool holds it, creating a fresh
    /// active one on first access.
    pub fn record_mut(&mut self, player: PlayerId, default_rating: f64) -> &mut PlayerRecord {
        if let Some(i) = Self::position(&self.active, player) {
            return &mut self.active[i].1;
        }
        if let Some(i) = Self::position(&self.removed, player) {
            return &mut self.removed[i].1;
        }
        self.active.push((player, PlayerRecord::fresh(default_rating)));
        let last = self.active.len() - 1;
        &mut self.active[last].1
    }

    /// Mutable access to two distinct players' records at once.
    pub fn pair_mut(
        &mut self,
        first: PlayerId,
        second: PlayerId,
        default_rating: f64,
    ) -> Option<(&mut PlayerRecord, &mut PlayerRecord)> {
        if first == second {
            return None;
        }
        self.record_mut(first, default_rating);
        self.record_mut(second, default_rating);

        let mut a = None;
        let mut b = None;
        for (id, record) in self.active.iter_mut().chain(self.removed.iter_mut()) {
            if *id == first {
                a = Some(record);
            } else if *id == second {
                b = Some(record);
            }
        }
        a.zip(b)
    }

    /// Active records sorted by rating, highest first. The sort is stable
    /// so equal ratings keep insertion order.
    pub fn standings(&self) -> Vec<RankEntry> {
        let mut ranked: Vec<&(PlayerId, PlayerRecord)> = self.active.iter().collect();
        ranked.sort_by(|a, b| b.1.rating.total_cmp(&a.1.rating));
        ranked
            .into_iter()
            .enumerate()
            .map(|(i, (player, record))| RankEntry {
                rank: i + 1,
                player: *player,
                record: *record,
            })
            .collect()
    }

    /// 1-based rank among active players.
    pub fn rank(&self, player: PlayerId) -> Option<(usize, PlayerRecord)> {
        self.standings()
            .into_iter()
            .find(|entry| entry.player == player)
            .map(|entry| (entry.rank, entry.record))
    }

    /// Move the player to the removed pool, keeping their stats. Returns
    /// false when there is no active record to move.
    pub fn remove(&mut self, player: PlayerId) -> bool {
        match Self::position(&self.active, player) {
            Some(i) => {
                let entry = self.active.remove(i);
                self.removed.push(entry);
                true
            }
            None => false,
        }
    }

    /// Bring a removed player back, or hand out a fresh record if none was
    /// kept. Returns the active record and whether anything changed.
    pub fn restore(&mut self, player: PlayerId, default_rating: f64) -> (PlayerRecord, bool) {
        if let Some(i) = Self::position(&self.active, player) {
            return (self.active[i].1, false);
        }
        let record = match Self::position(&self.removed, player) {
            Some(i) => self.removed.remove(i).1,
            None => PlayerRecord::fresh(default_rating),
        };
        self.active.push((player, record));
        (record, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ratings: &[(u64, f64)]) -> Roster {
        Roster::from_snapshot(RosterSnapshot {
            active: ratings
                .iter()
                .map(|(id, r)| (PlayerId(*id), PlayerRecord::fresh(*r)))
                .collect(),
            removed: vec![],
        })
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let r = roster(&[(1, 800.0), (2, 820.0), (3, 800.0), (4, 790.0)]);
        let order: Vec<u64> = r.standings().iter().map(|e| e.player.0).collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
        assert_eq!(r.rank(PlayerId(2)).map(|(n, _)| n), Some(1));
        assert_eq!(r.rank(PlayerId(1)).map(|(n, _)| n), Some(2));
        assert_eq!(r.rank(PlayerId(3)).map(|(n, _)| n), Some(3));
        assert_eq!(r.rank(PlayerId(4)).map(|(n, _)| n), Some(4));
        assert!(r.rank(PlayerId(9)).is_none());
    }

    #[test]
    fn remove_and_restore_preserve_stats() {
        let mut r = roster(&[(1, 800.0), (2, 900.0)]);
        r.record_mut(PlayerId(2), 800.0).wins = 4;

        assert!(r.remove(PlayerId(2)));
        assert!(!r.remove(PlayerId(2)));
        assert!(r.is_removed(PlayerId(2)));
        assert!(r.rank(PlayerId(2)).is_none());
        assert_eq!(r.rank(PlayerId(1)).map(|(n, _)| n), Some(1));

        let (record, changed) = r.restore(PlayerId(2), 800.0);
        assert!(changed);
        assert_eq!(record.wins, 4);
        assert_eq!(record.rating, 900.0);
        assert!(!r.is_removed(PlayerId(2)));
        assert_eq!(r.rank(PlayerId(2)).map(|(n, _)| n), Some(1));
    }

    #[test]
    fn restore_without_history_is_fresh() {
        let mut r = Roster::default();
        let (record, changed) = r.restore(PlayerId(5), 800.0);
        assert!(changed);
        assert_eq!(record, PlayerRecord::fresh(800.0));
        let (_, changed) = r.restore(PlayerId(5), 800.0);
        assert!(!changed);
    }

    #[test]
    fn duplicate_across_pools_keeps_active() {
        let r = Roster::from_snapshot(RosterSnapshot {
            active: vec![(PlayerId(1), PlayerRecord::fresh(810.0))],
            removed: vec![(PlayerId(1), PlayerRecord::fresh(700.0))],
        });
        assert!(!r.is_removed(PlayerId(1)));
        assert_eq!(r.get(PlayerId(1)).map(|rec| rec.rating), Some(810.0));
    }

    #[test]
    fn pair_mut_creates_missing_records() {
        let mut r = Roster::default();
        let (a, b) = r.pair_mut(PlayerId(1), PlayerId(2), 800.0).unwrap();
        a.rating = 805.0;
        b.rating = 795.0;
        assert_eq!(r.standings().len(), 2);
        assert!(r.pair_mut(PlayerId(1), PlayerId(1), 800.0).is_none());
    }
}
