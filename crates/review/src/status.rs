//! Review status of a skeleton's segments: per reviewer, for the team, and
//! for the union of all reviewers.

use std::collections::BTreeMap;

use foundation::ids::{SegmentId, UserId};

use crate::reviewers::Whitelist;
use crate::segment::Segment;

pub const STATUS_COLOR_FULL: &str = "#6fff5c";
pub const STATUS_COLOR_PARTIAL: &str = "#ffc71d";
pub const STATUS_COLOR_NONE: &str = "#ff8c8c";
/// Partial review colours in ten percent steps.
pub const STATUS_COLOR_PARTIAL_DETAILED: [&str; 10] = [
    "#ff9789", "#ffa286", "#ffaf83", "#ffbc80", "#ffc97d", "#ffd87a", "#ffe777", "#fff774",
    "#e6ff6e", "#d4ff6b",
];

pub fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 * 100.0 / total as f64
}

/// Two decimals, the way statuses are shown and exchanged.
pub fn format_percentage(value: f64) -> String {
    format!("{value:.2}")
}

pub fn background_color(percent: f64, detailed: bool) -> &'static str {
    let rounded = percent.round() as i64;
    match rounded {
        100 => STATUS_COLOR_FULL,
        0 => STATUS_COLOR_NONE,
        _ if detailed => STATUS_COLOR_PARTIAL_DETAILED[(rounded / 10).clamp(0, 9) as usize],
        _ => STATUS_COLOR_PARTIAL,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReviewColumn {
    User(UserId),
    /// Whitelisted reviewers, each node counted once.
    Team,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewerCount {
    pub column: ReviewColumn,
    pub name: String,
    pub count: usize,
    pub segment_counts: BTreeMap<SegmentId, usize>,
}

/// Review counts of one skeleton, ready to be shown as a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTable {
    /// Current user first, then every other reviewer with reviews, then the
    /// team if anyone else reviewed.
    pub reviewers: Vec<ReviewerCount>,
}

impl ReviewTable {
    pub fn build(
        segments: &[Segment],
        users: &BTreeMap<UserId, String>,
        current_user: UserId,
        whitelist: &Whitelist,
    ) -> Self {
        let mut counts: BTreeMap<UserId, ReviewerCount> = BTreeMap::new();
        let mut team = ReviewerCount {
            column: ReviewColumn::Team,
            name: "Team".to_string(),
            count: 0,
            segment_counts: BTreeMap::new(),
        };
        ensure_reviewer(&mut counts, users, current_user);

        for segment in segments {
            for node in &segment.sequence {
                let mut whitelisted = false;
                for review in &node.rids {
                    ensure_reviewer(&mut counts, users, review.reviewer);
                    if let Some(c) = counts.get_mut(&review.reviewer) {
                        c.count += 1;
                        *c.segment_counts.entry(segment.id).or_default() += 1;
                    }
                    let accepted = whitelist
                        .accept_after(review.reviewer)
                        .is_some_and(|after| review.time >= after);
                    if !whitelisted && accepted {
                        team.count += 1;
                        *team.segment_counts.entry(segment.id).or_default() += 1;
                        whitelisted = true;
                    }
                }
            }
        }

        let mut reviewers = Vec::new();
        if let Some(me) = counts.remove(&current_user) {
            reviewers.push(me);
        }
        reviewers.extend(counts.into_values().filter(|c| c.count > 0));
        if reviewers.len() > 1 {
            reviewers.push(team);
        }
        Self { reviewers }
    }

    /// Per-reviewer columns are shown once someone besides the current user
    /// has reviewed.
    pub fn shows_reviewer_columns(&self) -> bool {
        self.reviewers.len() > 2
    }

    /// `"name: count, ..."` in column order.
    pub fn revisions(&self) -> String {
        self.reviewers
            .iter()
            .map(|r| format!("{}: {}", r.name, r.count))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn status(&self, column: ReviewColumn, segment: &Segment) -> f64 {
        let count = self
            .reviewers
            .iter()
            .find(|r| r.column == column)
            .and_then(|r| r.segment_counts.get(&segment.id).copied())
            .unwrap_or(0);
        percentage(count, segment.nr_nodes)
    }
}

fn ensure_reviewer(
    counts: &mut BTreeMap<UserId, ReviewerCount>,
    users: &BTreeMap<UserId, String>,
    user: UserId,
) {
    counts.entry(user).or_insert_with(|| ReviewerCount {
        column: ReviewColumn::User(user),
        name: users
            .get(&user)
            .cloned()
            .unwrap_or_else(|| format!("user {user}")),
        count: 0,
        segment_counts: BTreeMap::new(),
    });
}

/// Percentage of `segment` reviewed by `user` alone.
pub fn user_status(segment: &Segment, user: UserId) -> f64 {
    let count = segment
        .sequence
        .iter()
        .filter(|n| n.is_reviewed_by(user))
        .count();
    percentage(count, segment.nr_nodes)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};
    use foundation::ids::{NodeId, SegmentId, UserId};
    use foundation::math::Vec3;
    use pretty_assertions::assert_eq;

    use super::{ReviewColumn, ReviewTable, background_color, format_percentage, user_status};
    use crate::reviewers::Whitelist;
    use crate::segment::{ReviewNode, Segment};

    fn segments() -> Vec<Segment> {
        let early = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2016, 6, 1, 0, 0, 0).unwrap();
        let mut nodes: Vec<ReviewNode> = (1..=3)
            .map(|i| ReviewNode::new(NodeId(i), Vec3::default()))
            .collect();
        nodes[0].record_review(UserId(1), late);
        nodes[0].record_review(UserId(2), late);
        nodes[1].record_review(UserId(2), early);
        nodes[1].record_review(UserId(3), late);
        vec![Segment::new(SegmentId(0), nodes)]
    }

    #[test]
    fn colours_by_percentage() {
        assert_eq!(background_color(100.0, false), "#6fff5c");
        assert_eq!(background_color(0.2, true), "#ff8c8c");
        assert_eq!(background_color(33.3, false), "#ffc71d");
        assert_eq!(background_color(33.3, true), "#ffbc80");
        assert_eq!(background_color(99.4, true), "#d4ff6b");
    }

    #[test]
    fn table_orders_current_user_first_and_counts_team_once() {
        let users: BTreeMap<_, _> = [
            (UserId(1), "me".to_string()),
            (UserId(2), "anna".to_string()),
            (UserId(3), "bob".to_string()),
            (UserId(4), "idle".to_string()),
        ]
        .into_iter()
        .collect();
        let mut whitelist = Whitelist::new();
        whitelist.add(UserId(2), Some(Utc.with_ymd_and_hms(2016, 3, 1, 0, 0, 0).unwrap()));
        whitelist.add(UserId(3), None);

        let segs = segments();
        let table = ReviewTable::build(&segs, &users, UserId(1), &whitelist);

        assert_eq!(table.revisions(), "me: 1, anna: 2, bob: 1, Team: 2");
        assert!(table.shows_reviewer_columns());
        assert_eq!(
            format_percentage(table.status(ReviewColumn::Team, &segs[0])),
            "66.67"
        );
        assert_eq!(
            format_percentage(table.status(ReviewColumn::User(UserId(4)), &segs[0])),
            "0.00"
        );
        assert_eq!(format_percentage(user_status(&segs[0], UserId(2))), "66.67");
        assert_eq!(format_percentage(segs[0].status), "66.67");
    }

    #[test]
    fn lone_reviewer_gets_no_team_column() {
        let segs = segments();
        let table = ReviewTable::build(&segs[..0], &BTreeMap::new(), UserId(1), &Whitelist::new());
        assert_eq!(table.revisions(), "user 1: 0");
        assert!(!table.shows_reviewer_columns());
    }
}
