//! Dimension ledger: per-dimension XP and the leveling formula.
//!
//! Levels are always derived from XP (`1 + total_xp / 100`) and never
//! stored on their own. The ledger can be rebuilt from the user's completed
//! quests at any time with [`recompute`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::{Dimension, DimensionStat, Quest, XP_PER_LEVEL};

/// Level reached with `total_xp` experience.
pub fn level_for_xp(total_xp: u64) -> u32 {
    let steps = total_xp / XP_PER_LEVEL;
    u32::try_from(steps).unwrap_or(u32::MAX - 1).saturating_add(1)
}

impl DimensionStat {
    /// A fresh row: no XP, level 1.
    pub fn new(user_id: impl Into<String>, dimension: Dimension) -> Self {
        Self {
            user_id: user_id.into(),
            dimension,
            total_xp: 0,
            level: 1,
        }
    }

    /// Add XP and re-derive the level.
    pub fn add_xp(&mut self, xp_delta: u32) {
        self.total_xp = self.total_xp.saturating_add(u64::from(xp_delta));
        self.level = level_for_xp(self.total_xp);
    }
}

/// Award XP to one dimension, creating the row when the user has none yet.
pub fn award(
    current: Option<DimensionStat>,
    user_id: &str,
    dimension: Dimension,
    xp_delta: u32,
) -> DimensionStat {
    let mut stat = current.unwrap_or_else(|| DimensionStat::new(user_id, dimension));
    stat.add_xp(xp_delta);
    debug!(
        user_id,
        dimension = %dimension,
        xp_delta,
        total_xp = stat.total_xp,
        level = stat.level,
        "Awarded XP"
    );
    stat
}

/// Rebuild a user's ledger from scratch.
///
/// Only completed quests owned by `user_id` that carry a dimension count.
/// Rows come back in canonical dimension order, so running this twice over
/// the same history yields identical output.
pub fn recompute(user_id: &str, quests: &[Quest]) -> Vec<DimensionStat> {
    let mut totals: BTreeMap<Dimension, u64> = BTreeMap::new();

    for quest in quests
        .iter()
        .filter(|q| q.user_id == user_id && q.is_completed())
    {
        if let Some(dimension) = quest.dimension {
            *totals.entry(dimension).or_insert(0) += u64::from(quest.xp_value());
        }
    }

    totals
        .into_iter()
        .map(|(dimension, total_xp)| DimensionStat {
            user_id: user_id.to_string(),
            dimension,
            total_xp,
            level: level_for_xp(total_xp),
        })
        .collect()
}

/// Character level: the weakest dimension gates the whole character, but
/// only once every one of the eight dimensions has a row.
pub fn character_level(stats: &[DimensionStat]) -> u32 {
    let levels: Vec<u32> = Dimension::ALL
        .iter()
        .filter_map(|d| stats.iter().find(|s| s.dimension == *d).map(|s| s.level))
        .collect();

    if levels.len() < Dimension::ALL.len() {
        return 1;
    }
    levels.into_iter().min().unwrap_or(1)
}

/// Total XP across all dimension rows.
pub fn total_xp(stats: &[DimensionStat]) -> u64 {
    stats.iter().map(|s| s.total_xp).sum()
}

/// Sort rows into canonical dimension order.
pub fn sort_canonical(stats: &mut [DimensionStat]) {
    stats.sort_by_key(|s| s.dimension);
}
