//! Whose reviews count.
//!
//! A node counts as reviewed for the current user if the user reviewed it, or
//! if a followed reviewer did. Followed users are accepted unconditionally;
//! whitelisted reviewers only for reviews made after their accept-after time.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use foundation::ids::UserId;
use serde::{Deserialize, Serialize};

use crate::segment::{Review, ReviewNode, Segment};

#[derive(Debug, Clone, PartialEq)]
pub enum WhitelistError {
    InvalidDate(String),
    UnknownReviewer(UserId),
}

impl std::fmt::Display for WhitelistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhitelistError::InvalidDate(s) => write!(f, "accept after date is invalid: {s}"),
            WhitelistError::UnknownReviewer(id) => {
                write!(f, "reviewer {id} does not have a valid user ID")
            }
        }
    }
}

impl std::error::Error for WhitelistError {}

/// One entry of the reviewer whitelist endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub reviewer_id: UserId,
    pub accept_after: DateTime<Utc>,
}

/// The user's review team: reviewer -> time after which reviews are accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Whitelist {
    entries: BTreeMap<UserId, DateTime<Utc>>,
}

impl Whitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = WhitelistEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.reviewer_id, e.accept_after))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn accept_after(&self, reviewer: UserId) -> Option<DateTime<Utc>> {
        self.entries.get(&reviewer).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (UserId, DateTime<Utc>)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Adds or overwrites a reviewer. Without an accept-after time all of the
    /// reviewer's reviews are accepted.
    pub fn add(&mut self, reviewer: UserId, accept_after: Option<DateTime<Utc>>) {
        self.entries
            .insert(reviewer, accept_after.unwrap_or(DateTime::<Utc>::UNIX_EPOCH));
    }

    /// Adds a reviewer known to `users`, with an RFC 3339 accept-after time.
    pub fn add_checked(
        &mut self,
        reviewer: UserId,
        accept_after: Option<&str>,
        users: &BTreeMap<UserId, String>,
    ) -> Result<(), WhitelistError> {
        let accept_after = match accept_after {
            Some(s) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| WhitelistError::InvalidDate(s.to_string()))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        if !users.contains_key(&reviewer) {
            return Err(WhitelistError::UnknownReviewer(reviewer));
        }
        self.add(reviewer, accept_after);
        Ok(())
    }

    pub fn remove(&mut self, reviewer: UserId) -> bool {
        self.entries.remove(&reviewer).is_some()
    }

    /// Body for saving the whitelist: reviewer id -> ISO timestamp.
    pub fn to_wire(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(id, t)| (id.to_string(), t.to_rfc3339()))
            .collect()
    }
}

/// The current user plus everyone whose reviews they follow.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewerSet {
    user: UserId,
    followed: Vec<UserId>,
    follow_whitelist: bool,
    whitelist: Whitelist,
}

impl ReviewerSet {
    /// Follows the user and their whitelist.
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            followed: vec![user],
            follow_whitelist: true,
            whitelist: Whitelist::new(),
        }
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn set_whitelist(&mut self, whitelist: Whitelist) {
        self.whitelist = whitelist;
    }

    pub fn follows_whitelist(&self) -> bool {
        self.follow_whitelist
    }

    pub fn set_follow_whitelist(&mut self, follow: bool) {
        self.follow_whitelist = follow;
    }

    pub fn followed(&self) -> &[UserId] {
        &self.followed
    }

    pub fn follow(&mut self, reviewer: UserId) {
        if !self.followed.contains(&reviewer) {
            self.followed.push(reviewer);
        }
    }

    pub fn unfollow(&mut self, reviewer: UserId) {
        self.followed.retain(|r| *r != reviewer);
    }

    /// Accept-after time of a team member, `None` if the reviewer is not on
    /// the team. Followed users win over their whitelist entry.
    fn team_accept_after(&self, reviewer: UserId) -> Option<DateTime<Utc>> {
        if self.followed.contains(&reviewer) {
            return Some(DateTime::<Utc>::UNIX_EPOCH);
        }
        if self.follow_whitelist {
            return self.whitelist.accept_after(reviewer);
        }
        None
    }

    pub fn accepts(&self, review: &Review) -> bool {
        if review.reviewer == self.user {
            return true;
        }
        self.team_accept_after(review.reviewer)
            .is_some_and(|after| review.time >= after)
    }

    pub fn has_reviewed(&self, node: &ReviewNode) -> bool {
        node.rids.iter().any(|r| self.accepts(r))
    }

    /// `true` if every node except those at `ignored` indices is reviewed.
    pub fn is_fully_reviewed(&self, segment: &Segment, ignored: &[usize]) -> bool {
        segment
            .sequence
            .iter()
            .enumerate()
            .all(|(i, n)| ignored.contains(&i) || self.has_reviewed(n))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};
    use foundation::ids::{NodeId, SegmentId, UserId};
    use foundation::math::Vec3;
    use pretty_assertions::assert_eq;

    use super::{ReviewerSet, Whitelist, WhitelistError};
    use crate::segment::{ReviewNode, Segment};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2016, 5, d, 12, 0, 0).unwrap()
    }

    fn node(id: u64, reviews: &[(u64, u32)]) -> ReviewNode {
        let mut n = ReviewNode::new(NodeId(id), Vec3::default());
        for (user, d) in reviews {
            n.record_review(UserId(*user), day(*d));
        }
        n
    }

    #[test]
    fn whitelist_respects_accept_after() {
        let mut set = ReviewerSet::new(UserId(1));
        let mut whitelist = Whitelist::new();
        whitelist.add(UserId(2), Some(day(10)));
        set.set_whitelist(whitelist);

        assert!(!set.has_reviewed(&node(1, &[(2, 9)])));
        assert!(set.has_reviewed(&node(1, &[(2, 10)])));
        assert!(!set.has_reviewed(&node(1, &[(3, 20)])));
        assert!(set.has_reviewed(&node(1, &[(1, 1)])));

        set.set_follow_whitelist(false);
        assert!(!set.has_reviewed(&node(1, &[(2, 10)])));
    }

    #[test]
    fn followed_users_are_accepted_regardless_of_time() {
        let mut set = ReviewerSet::new(UserId(1));
        let mut whitelist = Whitelist::new();
        whitelist.add(UserId(2), Some(day(10)));
        set.set_whitelist(whitelist);
        set.follow(UserId(2));
        assert!(set.has_reviewed(&node(1, &[(2, 1)])));
    }

    #[test]
    fn completion_requires_every_node() {
        let set = ReviewerSet::new(UserId(1));
        let seg = Segment::new(
            SegmentId(0),
            vec![node(1, &[(1, 1)]), node(2, &[(5, 1)]), node(3, &[(1, 2)])],
        );
        assert!(!set.is_fully_reviewed(&seg, &[]));
        assert!(set.is_fully_reviewed(&seg, &[1]));
    }

    #[test]
    fn add_checked_validates_input() {
        let users: BTreeMap<_, _> = [(UserId(2), "anna".to_string())].into_iter().collect();
        let mut wl = Whitelist::new();
        assert_eq!(
            wl.add_checked(UserId(2), Some("not a date"), &users),
            Err(WhitelistError::InvalidDate("not a date".into()))
        );
        assert_eq!(
            wl.add_checked(UserId(9), None, &users),
            Err(WhitelistError::UnknownReviewer(UserId(9)))
        );
        wl.add_checked(UserId(2), None, &users).unwrap();
        assert_eq!(wl.accept_after(UserId(2)), Some(DateTime::<Utc>::UNIX_EPOCH));
        assert_eq!(
            wl.to_wire().get("2").map(String::as_str),
            Some("1970-01-01T00:00:00+00:00")
        );
    }
}
