//! Sequential review of a skeleton's segments.
//!
//! The navigator is a pure state machine. It never talks to the server or the
//! viewer itself: every step queues [`Command`]s for the host and raises
//! notices on a [`NoticeBus`]. Review marks are fire-and-forget; the host
//! reports their outcome through [`ReviewNavigator::review_confirmed`] and
//! [`ReviewNavigator::review_failed`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use foundation::ids::{NodeId, SegmentId, SkeletonId, UserId};
use foundation::math::Vec3;
use foundation::stack::Stack;
use runtime::notices::{Notice, NoticeBus};

use crate::reviewers::ReviewerSet;
use crate::segment::{ReviewNode, Segment, VirtualNodeId};
use crate::skip::{LimitedMove, SkipStep, limit_move};

/// Presses needed on a completed segment's last node before moving on when
/// segments are not refreshed in between.
pub const END_OF_SEGMENT_PRESSES: u32 = 3;
/// Upper bound for tile prefetch locations.
pub const MAX_PREFETCH_LOCATIONS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewConfig {
    /// Maximum number of sections a single step may cross.
    pub virtual_node_step: u32,
    /// Review from a segment's first node towards its last one.
    pub review_upstream: bool,
    pub auto_centering: bool,
    /// Send review marks to the server. When off, reviews are only recorded
    /// locally.
    pub persist_review: bool,
    pub no_refresh_between_segments: bool,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            virtual_node_step: 1,
            review_upstream: true,
            auto_centering: true,
            persist_review: true,
            no_refresh_between_segments: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTarget {
    Real(NodeId),
    Virtual(VirtualNodeId),
}

impl std::fmt::Display for NodeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeTarget::Real(id) => write!(f, "{id}"),
            NodeTarget::Virtual(vn) => write!(f, "{vn}"),
        }
    }
}

/// What the host has to do on the navigator's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Move the view to a node and select it. Without `center` only the
    /// depth of the view changes.
    GoTo {
        target: NodeTarget,
        position: Vec3,
        center: bool,
    },
    /// Move the view without selecting a node.
    MoveTo { position: Vec3 },
    /// Persist a review of `node` by the current user.
    MarkReviewed { node: NodeId },
    /// Reload the segment table and hand it to
    /// [`ReviewNavigator::load_segments`].
    RefreshSegments {
        skeleton: SkeletonId,
        subarbor: Option<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cursor {
    OnRealNode,
    OnSkipNode(SkipStep),
    /// The view was moved one section past the segment's end.
    LookingBeyond,
    /// The active node changed outside of the navigator. The next step
    /// re-centres on the current position instead of advancing.
    Unfocused { skip: Option<SkipStep> },
}

impl Cursor {
    pub fn skip_step(&self) -> Option<&SkipStep> {
        match self {
            Cursor::OnSkipNode(step) => Some(step),
            Cursor::Unfocused { skip } => skip.as_ref(),
            Cursor::OnRealNode | Cursor::LookingBeyond => None,
        }
    }

    fn unfocused(self) -> Cursor {
        match self {
            Cursor::OnSkipNode(step) => Cursor::Unfocused { skip: Some(step) },
            Cursor::Unfocused { skip } => Cursor::Unfocused { skip },
            Cursor::OnRealNode | Cursor::LookingBeyond => Cursor::Unfocused { skip: None },
        }
    }

    fn without_skip(self) -> Cursor {
        match self {
            Cursor::OnSkipNode(_) => Cursor::OnRealNode,
            Cursor::Unfocused { .. } => Cursor::Unfocused { skip: None },
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReviewState {
    Idle,
    Active {
        /// Position of the segment in the loaded table.
        segment: usize,
        index: usize,
        cursor: Cursor,
    },
}

/// The view the navigator steers.
#[derive(Debug, Copy, Clone)]
pub struct FocusedView<'a> {
    pub stack: &'a Stack,
    /// Current project-space position of the view.
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonReview {
    pub skeleton: SkeletonId,
    pub subarbor: Option<NodeId>,
    pub segments: Vec<Segment>,
}

/// Unreviewed node positions worth caching tiles for.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrefetchPlan {
    pub first_segment: Option<SegmentId>,
    pub last_segment: Option<SegmentId>,
    pub locations: Vec<Vec3>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigatorError {
    NoSkeleton,
    UnknownSegment(SegmentId),
    EmptySegment(SegmentId),
}

impl std::fmt::Display for NavigatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigatorError::NoSkeleton => write!(f, "no skeleton is under review"),
            NavigatorError::UnknownSegment(id) => write!(f, "unknown segment {id}"),
            NavigatorError::EmptySegment(id) => write!(f, "segment {id} has no nodes"),
        }
    }
}

impl std::error::Error for NavigatorError {}

pub struct ReviewNavigator {
    config: ReviewConfig,
    reviewers: ReviewerSet,
    review: Option<SkeletonReview>,
    state: ReviewState,
    end_presses: u32,
    /// Unsettled review marks of the loaded skeleton, per node.
    pending_marks: BTreeMap<NodeId, usize>,
    selection_deferred: bool,
    commands: Vec<Command>,
    notices: NoticeBus,
    clock: fn() -> DateTime<Utc>,
}

impl std::fmt::Debug for ReviewNavigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewNavigator")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("pending_marks", &self.pending_marks())
            .field("selection_deferred", &self.selection_deferred)
            .finish_non_exhaustive()
    }
}

impl ReviewNavigator {
    pub fn new(config: ReviewConfig, reviewers: ReviewerSet) -> Self {
        Self {
            config,
            reviewers,
            review: None,
            state: ReviewState::Idle,
            end_presses: 0,
            pending_marks: BTreeMap::new(),
            selection_deferred: false,
            commands: Vec::new(),
            notices: NoticeBus::new(),
            clock: Utc::now,
        }
    }

    /// Clock used for reviews recorded locally.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ReviewConfig {
        &mut self.config
    }

    pub fn reviewers(&self) -> &ReviewerSet {
        &self.reviewers
    }

    pub fn reviewers_mut(&mut self) -> &mut ReviewerSet {
        &mut self.reviewers
    }

    pub fn user(&self) -> UserId {
        self.reviewers.user()
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    pub fn review(&self) -> Option<&SkeletonReview> {
        self.review.as_ref()
    }

    pub fn segments(&self) -> &[Segment] {
        self.review.as_ref().map_or(&[], |r| r.segments.as_slice())
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        match &self.state {
            ReviewState::Active { segment, .. } => self.segments().get(*segment),
            ReviewState::Idle => None,
        }
    }

    pub fn current_node(&self) -> Option<&ReviewNode> {
        match &self.state {
            ReviewState::Active { index, .. } => self.current_segment()?.sequence.get(*index),
            ReviewState::Idle => None,
        }
    }

    pub fn pending_marks(&self) -> usize {
        self.pending_marks.values().sum()
    }

    pub fn is_selection_deferred(&self) -> bool {
        self.selection_deferred
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn notices(&self) -> &NoticeBus {
        &self.notices
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    /// Replaces the segment table. Any segment under review is left; review
    /// continues with [`Self::init_review_segment`] or
    /// [`Self::select_next_segment`].
    pub fn load_segments(
        &mut self,
        skeleton: SkeletonId,
        subarbor: Option<NodeId>,
        segments: Vec<Segment>,
    ) {
        if self.review.as_ref().map(|r| r.skeleton) != Some(skeleton) {
            self.pending_marks.clear();
            self.selection_deferred = false;
        }
        self.review = Some(SkeletonReview {
            skeleton,
            subarbor,
            segments,
        });
        self.state = ReviewState::Idle;
        self.end_presses = 0;
    }

    pub fn end_review(&mut self) {
        self.review = None;
        self.state = ReviewState::Idle;
        self.end_presses = 0;
        self.pending_marks.clear();
        self.selection_deferred = false;
    }

    /// Starts reviewing a segment at its first node (last node when reviewing
    /// downstream), regardless of its review state.
    pub fn init_review_segment(&mut self, id: SegmentId) -> Result<(), NavigatorError> {
        let review = self.review.as_ref().ok_or(NavigatorError::NoSkeleton)?;
        let position = review
            .segments
            .iter()
            .position(|s| s.id == id)
            .ok_or(NavigatorError::UnknownSegment(id))?;
        let len = review.segments[position].sequence.len();
        if len == 0 {
            return Err(NavigatorError::EmptySegment(id));
        }
        let index = if self.config.review_upstream { 0 } else { len - 1 };
        self.state = ReviewState::Active {
            segment: position,
            index,
            cursor: Cursor::OnRealNode,
        };
        self.go_to_current(true);
        self.end_presses = 0;
        Ok(())
    }

    /// Steps towards the segment's last node.
    pub fn move_node_in_segment_forward(
        &mut self,
        view: &FocusedView<'_>,
        advance_to_next_unfollowed: bool,
    ) {
        self.move_to_next_node(view, advance_to_next_unfollowed, true);
    }

    /// Steps towards the segment's first node.
    pub fn move_node_in_segment_backward(
        &mut self,
        view: &FocusedView<'_>,
        advance_to_next_unfollowed: bool,
    ) {
        self.move_to_next_node(view, advance_to_next_unfollowed, false);
    }

    fn move_to_next_node(&mut self, view: &FocusedView<'_>, advance: bool, upstream: bool) {
        let ReviewState::Active {
            segment,
            index,
            cursor,
        } = self.state.clone()
        else {
            return;
        };
        let Some(current) = self.review.as_ref().and_then(|r| r.segments.get(segment)) else {
            return;
        };
        let len = current.sequence.len();
        if len == 0 {
            return;
        }
        let is_last = if upstream { index == len - 1 } else { index == 0 };

        if cursor.skip_step().is_none() {
            let fully_reviewed = self.reviewers.is_fully_reviewed(current, &[index]);
            let nr_nodes = current.nr_nodes;
            self.mark_as_reviewed(segment, index);

            let mut stay = false;
            let mut select_next = false;
            let mut refresh = false;
            if fully_reviewed {
                self.notices
                    .info("Done", format!("Segment fully reviewed: {nr_nodes} nodes"));
                if is_last {
                    if self.config.no_refresh_between_segments || !self.config.persist_review {
                        self.end_presses += 1;
                        if self.end_presses < END_OF_SEGMENT_PRESSES {
                            return;
                        }
                        select_next = true;
                    } else {
                        refresh = true;
                    }
                    stay = true;
                }
            }
            // Downstream, the segment's end may not be a real end.
            if !upstream && is_last {
                self.look_beyond_segment(view);
                stay = true;
            }
            if select_next {
                self.select_next_segment();
            }
            if refresh {
                self.request_refresh();
            }
            if stay {
                return;
            }
        }

        let mut change_selected = true;
        let mut force_centering = false;
        let mut cursor = match cursor {
            Cursor::LookingBeyond => {
                change_selected = false;
                Cursor::OnRealNode
            }
            Cursor::Unfocused { skip } => {
                change_selected = false;
                force_centering = true;
                skip.map_or(Cursor::OnRealNode, Cursor::OnSkipNode)
            }
            other => other,
        };

        let mut index = index;
        if change_selected {
            let Some(current) = self.review.as_ref().and_then(|r| r.segments.get(segment)) else {
                return;
            };
            let sequence = &current.sequence;
            let mut new_index = if upstream {
                (index + 1).min(len - 1)
            } else {
                index.saturating_sub(1)
            };
            if advance {
                let unreviewed = |i: &usize| !self.reviewers.has_reviewed(&sequence[*i]);
                let found = if upstream {
                    (new_index..len).find(unreviewed)
                } else {
                    (1..=new_index).rev().find(unreviewed)
                };
                if let Some(i) = found {
                    new_index = i;
                }
            }

            let skip = cursor.skip_step().cloned();
            let from = match &skip {
                Some(step) => {
                    // A pending step is finished first. Reversing heads back to
                    // the node the step came from.
                    new_index = match (step.backwards, upstream) {
                        (false, false) => step.to.saturating_sub(1),
                        (true, true) => (step.to + 1).min(len - 1),
                        _ => step.to,
                    };
                    Some(step.position)
                }
                None if new_index == index => None,
                None => {
                    let previous = if upstream {
                        new_index.checked_sub(1)
                    } else {
                        new_index.checked_add(1)
                    };
                    previous.and_then(|i| sequence.get(i)).map(|n| n.position())
                }
            };
            let moved = match from {
                Some(from) => limit_move(
                    view.stack,
                    self.config.virtual_node_step,
                    sequence,
                    from,
                    new_index,
                    !upstream,
                ),
                None => LimitedMove::default(),
            };
            if moved.suppressed_skips > 0 {
                self.notices.warn(
                    "Warning",
                    format!("Skipped {} suppressed virtual nodes.", moved.suppressed_skips),
                );
            }
            match moved.step {
                Some(step) => cursor = Cursor::OnSkipNode(step),
                None => {
                    index = new_index;
                    cursor = Cursor::OnRealNode;
                    if index > 0 {
                        let reference = from.unwrap_or_else(|| sequence[index - 1].position());
                        let distance = (view.stack.project_to_stack_z(sequence[index].position())
                            - view.stack.project_to_stack_z(reference))
                        .abs();
                        if distance > i64::from(self.config.virtual_node_step) {
                            self.notices.warn(
                                "Skipped sections",
                                format!(
                                    "This node is {distance} sections away from the previous node."
                                ),
                            );
                        }
                    }
                }
            }
        }

        self.state = ReviewState::Active {
            segment,
            index,
            cursor,
        };
        self.go_to_current(force_centering);
    }

    /// Moves the view one valid section past the end of the current segment
    /// to check whether the segment really ends there.
    ///
    /// The direction is taken from the first pair of nodes at different
    /// depths. If all nodes share one depth the move is aborted with a notice.
    pub fn look_beyond_segment(&mut self, view: &FocusedView<'_>) {
        let direction = {
            let Some(current) = self.current_segment() else {
                return;
            };
            let sequence = &current.sequence;
            if sequence.is_empty() {
                return;
            }
            let depth = |n: &ReviewNode| view.stack.depth_of(n.position());
            (1..sequence.len())
                .find(|&i| depth(&sequence[i - 1]) != depth(&sequence[i]))
                .map(|i| depth(&sequence[i]) > depth(&sequence[i - 1]))
        };
        let Some(deeper) = direction else {
            self.notices.info(
                "Can't look beyond node",
                "Can't decide whether to move forward or backward one section!",
            );
            return;
        };

        let z = view.stack.project_to_stack_z(view.position);
        let distance = if deeper {
            view.stack.valid_z_distance_before(z)
        } else {
            view.stack.valid_z_distance_after(z)
        };
        let target = z + distance.unwrap_or(0);
        let position = view
            .stack
            .with_depth(view.position, view.stack.section_to_depth(target));

        if let ReviewState::Active { cursor, .. } = &mut self.state {
            *cursor = match std::mem::replace(cursor, Cursor::OnRealNode) {
                unfocused @ Cursor::Unfocused { .. } => unfocused,
                _ => Cursor::LookingBeyond,
            };
        }
        self.commands.push(Command::MoveTo { position });
    }

    /// Moves on to the first segment after the current one (wrapping around)
    /// that has a node not reviewed by the followed reviewers.
    ///
    /// Runs once all pending review marks have settled, so the decision is
    /// made on up-to-date review records.
    pub fn select_next_segment(&mut self) {
        if let ReviewState::Active { cursor, .. } = &mut self.state {
            *cursor = std::mem::replace(cursor, Cursor::OnRealNode).without_skip();
        }
        if self.review.is_none() {
            return;
        }
        if !self.pending_marks.is_empty() {
            self.selection_deferred = true;
            return;
        }
        self.run_next_segment_selection();
    }

    fn run_next_segment_selection(&mut self) {
        self.selection_deferred = false;
        let Some(review) = self.review.as_ref() else {
            return;
        };
        let n = review.segments.len();
        let from = match &self.state {
            ReviewState::Active { segment, .. } if n > 0 => (segment + 1) % n,
            _ => 0,
        };
        let next = (0..n)
            .map(|i| &review.segments[(from + i) % n])
            .find(|s| s.sequence.iter().any(|node| !self.reviewers.has_reviewed(node)))
            .map(|s| s.id);
        match next {
            Some(id) => {
                if let Err(e) = self.init_review_segment(id) {
                    self.notices.error("Error", e.to_string());
                }
            }
            None => self.notices.info("Done", "Done reviewing."),
        }
    }

    /// Records the server's confirmation of a review mark. Every copy of the
    /// node in the table is updated. Returns `false` if the node is unknown.
    ///
    /// Only marks sent for the loaded skeleton count towards a deferred
    /// segment selection.
    pub fn review_confirmed(
        &mut self,
        node: NodeId,
        reviewer: UserId,
        time: DateTime<Utc>,
    ) -> bool {
        let settled = self.settle_mark(node);
        let found = self.record_review(node, reviewer, time);
        if settled && self.pending_marks.is_empty() && self.selection_deferred {
            self.run_next_segment_selection();
        }
        found
    }

    /// A review mark failed. It is not retried; a deferred segment selection
    /// is dropped.
    pub fn review_failed(&mut self, node: NodeId) {
        if !self.settle_mark(node) {
            return;
        }
        if self.selection_deferred {
            self.selection_deferred = false;
            self.notices.error(
                "Error",
                "Couldn't select next segment for review, please try again!",
            );
        }
    }

    /// Tracks the active node of the viewer. Returns the segments containing
    /// it. A node other than the one under review unfocuses the segment.
    pub fn observe_active_node(&mut self, active: Option<&NodeTarget>) -> Vec<SegmentId> {
        if self.review.is_none() {
            return Vec::new();
        }
        let current = self.current_node().map(|n| n.id);
        let (node, unfocus) = match active {
            Some(NodeTarget::Real(id)) => (Some(*id), current.is_some_and(|c| c != *id)),
            Some(NodeTarget::Virtual(vn)) => (
                Some(vn.parent),
                current.is_some_and(|c| c != vn.parent && c != vn.child),
            ),
            None => (None, current.is_some()),
        };
        if unfocus {
            if let ReviewState::Active { cursor, .. } = &mut self.state {
                *cursor = std::mem::replace(cursor, Cursor::OnRealNode).unfocused();
            }
        }
        match node {
            Some(node) => self
                .segments()
                .iter()
                .filter(|s| s.contains(node))
                .map(|s| s.id)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Positions of nodes the current user has not reviewed, taken from
    /// incomplete segments in table order.
    pub fn prefetch_locations(&self) -> PrefetchPlan {
        let user = self.user();
        let mut plan = PrefetchPlan::default();
        for segment in self.segments() {
            if !segment.is_complete() {
                plan.first_segment.get_or_insert(segment.id);
                plan.locations.extend(
                    segment
                        .sequence
                        .iter()
                        .take(segment.nr_nodes)
                        .filter(|n| !n.is_reviewed_by(user))
                        .map(ReviewNode::position),
                );
                plan.last_segment = Some(segment.id);
            }
            if plan.locations.len() > MAX_PREFETCH_LOCATIONS {
                break;
            }
        }
        plan
    }

    /// The skeleton whose own reviews may be reset, if resetting is allowed.
    pub fn reset_own_reviews_target(&mut self) -> Option<SkeletonId> {
        let Some(review) = self.review.as_ref() else {
            self.notices
                .info("BEWARE", "You need to activate a skeleton to review.");
            return None;
        };
        if !self.config.persist_review {
            self.notices.warn(
                "Warning",
                "Reviews are currently immutable ('Save review updates' disabled)",
            );
            return None;
        }
        Some(review.skeleton)
    }

    fn mark_as_reviewed(&mut self, segment: usize, index: usize) {
        let Some(node) = self
            .review
            .as_ref()
            .and_then(|r| r.segments.get(segment))
            .and_then(|s| s.sequence.get(index))
            .map(|n| n.id)
        else {
            return;
        };
        if self.config.persist_review {
            *self.pending_marks.entry(node).or_default() += 1;
            self.commands.push(Command::MarkReviewed { node });
        } else {
            let now = (self.clock)();
            let user = self.user();
            self.record_review(node, user, now);
        }
    }

    /// Returns `false` for marks this navigator is not waiting for.
    fn settle_mark(&mut self, node: NodeId) -> bool {
        let Some(count) = self.pending_marks.get_mut(&node) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.pending_marks.remove(&node);
        }
        true
    }

    fn record_review(&mut self, node: NodeId, reviewer: UserId, time: DateTime<Utc>) -> bool {
        let Some(review) = self.review.as_mut() else {
            return false;
        };
        let mut found = false;
        for segment in &mut review.segments {
            let mut touched = false;
            for n in segment.sequence.iter_mut().filter(|n| n.id == node) {
                n.record_review(reviewer, time);
                touched = true;
            }
            if touched {
                segment.refresh_status();
                found = true;
            }
        }
        found
    }

    fn request_refresh(&mut self) {
        if let Some(review) = self.review.as_ref() {
            self.commands.push(Command::RefreshSegments {
                skeleton: review.skeleton,
                subarbor: review.subarbor,
            });
        }
        self.state = ReviewState::Idle;
    }

    fn go_to_current(&mut self, force_centering: bool) {
        let ReviewState::Active { cursor, .. } = &self.state else {
            return;
        };
        let target = match cursor.skip_step() {
            Some(step) => Some((NodeTarget::Virtual(step.id.clone()), step.position)),
            None => self
                .current_node()
                .map(|n| (NodeTarget::Real(n.id), n.position())),
        };
        if let Some((target, position)) = target {
            self.commands.push(Command::GoTo {
                target,
                position,
                center: self.config.auto_centering || force_centering,
            });
        }
    }
}
