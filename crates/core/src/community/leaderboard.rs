use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl RewardTier {
    pub fn for_points(points: u64) -> Self {
        match points {
            0..=99 => Self::Bronze,
            100..=499 => Self::Silver,
            500..=999 => Self::Gold,
            _ => Self::Platinum,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }

    /// Points still needed to reach the next tier, if any.
    pub fn points_to_next(points: u64) -> Option<u64> {
        match Self::for_points(points) {
            Self::Bronze => Some(100 - points),
            Self::Silver => Some(500 - points),
            Self::Gold => Some(1000 - points),
            Self::Platinum => None,
        }
    }
}

impl fmt::Display for RewardTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitizenScore {
    pub user_id: String,
    pub display_name: String,
    pub points: u64,
    #[serde(default)]
    pub resolved_reports: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub points: u64,
    pub resolved_reports: u32,
    pub tier: RewardTier,
}

fn compare(left: &CitizenScore, right: &CitizenScore) -> Ordering {
    right
        .points
        .cmp(&left.points)
        .then_with(|| right.resolved_reports.cmp(&left.resolved_reports))
        .then_with(|| left.display_name.cmp(&right.display_name))
        .then_with(|| left.user_id.cmp(&right.user_id))
}

/// Ranks scores with standard competition ranking (1, 2, 2, 4). Citizens tie
/// when both points and resolved reports match.
pub fn rank(scores: &[CitizenScore], limit: usize) -> Vec<LeaderboardEntry> {
    let mut ordered = scores.iter().collect::<Vec<_>>();
    ordered.sort_by(|left, right| compare(left, right));

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(limit.min(ordered.len()));
    for (position, score) in ordered.into_iter().take(limit).enumerate() {
        let rank = match entries.last() {
            Some(previous)
                if previous.points == score.points
                    && previous.resolved_reports == score.resolved_reports =>
            {
                previous.rank
            }
            _ => position + 1,
        };
        entries.push(LeaderboardEntry {
            rank,
            user_id: score.user_id.clone(),
            display_name: score.display_name.clone(),
            points: score.points,
            resolved_reports: score.resolved_reports,
            tier: RewardTier::for_points(score.points),
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::{rank, CitizenScore, RewardTier};

    fn score(user_id: &str, name: &str, points: u64, resolved: u32) -> CitizenScore {
        CitizenScore {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
            points,
            resolved_reports: resolved,
        }
    }

    #[test]
    fn ties_share_a_rank_and_skip_the_next() {
        let scores = vec![
            score("u1", "Ana", 300, 4),
            score("u2", "Ben", 900, 1),
            score("u3", "Cy", 300, 4),
            score("u4", "Di", 120, 9),
        ];

        let board = rank(&scores, 10);
        let ranks = board.iter().map(|entry| (entry.rank, entry.user_id.as_str())).collect::<Vec<_>>();
        assert_eq!(ranks, vec![(1, "u2"), (2, "u1"), (2, "u3"), (4, "u4")]);
    }

    #[test]
    fn resolved_reports_break_point_ties() {
        let scores = vec![score("u1", "Ana", 300, 1), score("u2", "Ben", 300, 7)];

        let board = rank(&scores, 10);
        assert_eq!(board[0].user_id, "u2");
        assert_eq!(board[1].rank, 2);
    }

    #[test]
    fn limit_slices_the_board() {
        let scores = (0..20).map(|i| score(&format!("u{i}"), "Name", i * 10, 0)).collect::<Vec<_>>();

        let board = rank(&scores, 5);
        assert_eq!(board.len(), 5);
        assert_eq!(board[0].points, 190);
        assert!(rank(&scores, 0).is_empty());
    }

    #[test]
    fn tiers_follow_point_thresholds() {
        assert_eq!(RewardTier::for_points(0), RewardTier::Bronze);
        assert_eq!(RewardTier::for_points(99), RewardTier::Bronze);
        assert_eq!(RewardTier::for_points(100), RewardTier::Silver);
        assert_eq!(RewardTier::for_points(499), RewardTier::Silver);
        assert_eq!(RewardTier::for_points(500), RewardTier::Gold);
        assert_eq!(RewardTier::for_points(1000), RewardTier::Platinum);
        assert_eq!(RewardTier::points_to_next(450), Some(50));
        assert_eq!(RewardTier::points_to_next(5000), None);
    }
}
