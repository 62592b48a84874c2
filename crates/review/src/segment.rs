//! Review segments: ordered runs of skeleton nodes with their review records.
//!
//! The serde layout matches what the review endpoint returns, so a segment
//! table decodes straight into `Vec<Segment>`.

use chrono::{DateTime, Utc};
use foundation::ids::{NodeId, SegmentId, UserId};
use foundation::math::Vec3;
use serde::{Deserialize, Serialize};

/// One review of one node, `[reviewer_id, review_time]` on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(UserId, DateTime<Utc>)", into = "(UserId, DateTime<Utc>)")]
pub struct Review {
    pub reviewer: UserId,
    pub time: DateTime<Utc>,
}

impl From<(UserId, DateTime<Utc>)> for Review {
    fn from((reviewer, time): (UserId, DateTime<Utc>)) -> Self {
        Self { reviewer, time }
    }
}

impl From<Review> for (UserId, DateTime<Utc>) {
    fn from(r: Review) -> Self {
        (r.reviewer, r.time)
    }
}

/// A virtual node position the tracer marked as not worth stopping at,
/// `[orientation, depth_coordinate]` on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(u8, f64)", into = "(u8, f64)")]
pub struct SuppressedVirtualNode {
    pub orientation: u8,
    /// Project coordinate along the depth axis of `orientation`.
    pub coordinate: f64,
}

impl From<(u8, f64)> for SuppressedVirtualNode {
    fn from((orientation, coordinate): (u8, f64)) -> Self {
        Self {
            orientation,
            coordinate,
        }
    }
}

impl From<SuppressedVirtualNode> for (u8, f64) {
    fn from(s: SuppressedVirtualNode) -> Self {
        (s.orientation, s.coordinate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewNode {
    pub id: NodeId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub rids: Vec<Review>,
    #[serde(default)]
    pub sup: Vec<SuppressedVirtualNode>,
}

impl ReviewNode {
    pub fn new(id: NodeId, position: Vec3) -> Self {
        Self {
            id,
            x: position.x,
            y: position.y,
            z: position.z,
            rids: Vec::new(),
            sup: Vec::new(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn is_reviewed_by(&self, user: UserId) -> bool {
        self.rids.iter().any(|r| r.reviewer == user)
    }

    /// Records a review, replacing an earlier one by the same reviewer.
    /// Returns `true` if an existing entry was updated.
    pub fn record_review(&mut self, reviewer: UserId, time: DateTime<Utc>) -> bool {
        match self.rids.iter_mut().find(|r| r.reviewer == reviewer) {
            Some(existing) => {
                existing.time = time;
                true
            }
            None => {
                self.rids.push(Review { reviewer, time });
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub sequence: Vec<ReviewNode>,
    /// Percentage of nodes with at least one review.
    #[serde(with = "percent")]
    pub status: f64,
    pub nr_nodes: usize,
}

impl Segment {
    pub fn new(id: SegmentId, sequence: Vec<ReviewNode>) -> Self {
        let nr_nodes = sequence.len();
        let mut segment = Self {
            id,
            sequence,
            status: 0.0,
            nr_nodes,
        };
        segment.refresh_status();
        segment
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.sequence.iter().any(|n| n.id == node)
    }

    /// Recomputes `status` from the local review records.
    pub fn refresh_status(&mut self) {
        let reviewed = self.sequence.iter().filter(|n| !n.rids.is_empty()).count();
        self.status = crate::status::percentage(reviewed, self.nr_nodes);
    }

    pub fn is_complete(&self) -> bool {
        crate::status::format_percentage(self.status) == "100.00"
    }
}

/// Id of a virtual node between a child and its parent: `vn-<child>-<parent>-<depth>`.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualNodeId {
    pub child: NodeId,
    pub parent: NodeId,
    /// Project coordinate along the depth axis.
    pub depth: f64,
}

impl VirtualNodeId {
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("vn-")?;
        let mut parts = rest.splitn(3, '-');
        let child = parts.next()?.parse().ok()?;
        let parent = parts.next()?.parse().ok()?;
        let depth = parts.next()?.parse().ok()?;
        Some(Self {
            child: NodeId(child),
            parent: NodeId(parent),
            depth,
        })
    }
}

impl std::fmt::Display for VirtualNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vn-{}-{}-{}", self.child, self.parent, self.depth)
    }
}

mod percent {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&crate::status::format_percentage(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Number(v) => Ok(v),
            Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}
