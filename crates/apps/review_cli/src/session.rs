//! Interactive review over stdin.
//!
//! The navigator decides where to go; this loop carries out its commands
//! against the server and feeds review confirmations back as they arrive.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use foundation::ids::{NodeId, SegmentId, SkeletonId, UserId};
use foundation::math::Vec3;
use foundation::stack::Stack;
use review::navigator::{Command, FocusedView, NodeTarget, ReviewNavigator, ReviewState};
use review::segment::Segment;
use review::source::{BasicSkeletonSource, SkeletonModel, SkeletonSources, SourceId};
use review::status::format_percentage;
use runtime::notices::{Notice, NoticeLevel};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::client::{CatmaidClient, ClientError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Forward,
    Backward,
    /// Forward, jumping past nodes the team already reviewed.
    ForwardAdvance,
    BackwardAdvance,
    NextSegment,
    Segment(SegmentId),
    /// Make another node active, as a click in the viewer would.
    Activate(NodeId),
    NextSkeleton,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "n/p: next/previous node, N/P: same but skip reviewed nodes, \
s: next unreviewed segment, s <id>: review segment, a <node>: activate node, \
k: next skeleton, t: status, q: quit";

pub fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?;
    let arg = words.next().map(str::parse::<u64>);
    let input = match (cmd, arg) {
        ("n", None) => Input::Forward,
        ("p", None) => Input::Backward,
        ("N", None) => Input::ForwardAdvance,
        ("P", None) => Input::BackwardAdvance,
        ("s", None) => Input::NextSegment,
        ("s", Some(Ok(id))) => Input::Segment(SegmentId(id)),
        ("a", Some(Ok(id))) => Input::Activate(NodeId(id)),
        ("k", None) => Input::NextSkeleton,
        ("t", None) => Input::Status,
        ("h" | "?", None) => Input::Help,
        ("q", None) => Input::Quit,
        _ => return None,
    };
    Some(input)
}

#[derive(Debug)]
enum MarkOutcome {
    Confirmed {
        node: NodeId,
        reviewer: UserId,
        time: DateTime<Utc>,
    },
    Failed {
        node: NodeId,
        reason: String,
    },
}

pub fn forward_notices(notices: Vec<Notice>) {
    for n in notices {
        match n.level {
            NoticeLevel::Info => info!("{}: {}", n.title, n.message),
            NoticeLevel::Warning => warn!("{}: {}", n.title, n.message),
            NoticeLevel::Error => error!("{}: {}", n.title, n.message),
        }
    }
}

/// Skeletons queued for review, as a group when one is named.
pub fn review_queue(
    sources: &mut SkeletonSources,
    skeletons: &[SkeletonId],
    group: Option<&str>,
) -> Result<SourceId, review::source::SourceError> {
    let queue = sources.add(BasicSkeletonSource::new("Review queue"));
    let models: Vec<SkeletonModel> = skeletons
        .iter()
        .map(|&id| SkeletonModel::new(id, format!("skeleton {id}")))
        .collect();
    match group {
        Some(name) => sources.load_as_group(queue, name, &models)?,
        None => sources.append(queue, &models)?,
    }
    Ok(queue)
}

/// Installs a reloaded segment table and moves on to the next unreviewed
/// segment. A failed reload is logged and leaves the navigator idle on the
/// table it had, so the session carries on.
fn apply_refresh(
    navigator: &mut ReviewNavigator,
    skeleton: SkeletonId,
    subarbor: Option<NodeId>,
    segments: Result<Vec<Segment>, ClientError>,
) {
    match segments {
        Ok(segments) => {
            info!("{} segments loaded", segments.len());
            navigator.load_segments(skeleton, subarbor, segments);
            navigator.select_next_segment();
        }
        Err(e) => error!(
            "reloading segments of skeleton {skeleton} failed: {e}; \
             s continues on the last table, k moves to the next skeleton"
        ),
    }
}

pub struct ReviewSession {
    client: CatmaidClient,
    navigator: ReviewNavigator,
    stack: Stack,
    position: Vec3,
    sources: SkeletonSources,
    queue: SourceId,
    subarbor: Option<NodeId>,
    marks: mpsc::UnboundedSender<MarkOutcome>,
}

impl ReviewSession {
    pub async fn run(
        client: CatmaidClient,
        navigator: ReviewNavigator,
        stack: Stack,
        sources: SkeletonSources,
        queue: SourceId,
        subarbor: Option<NodeId>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (marks, mut outcomes) = mpsc::unbounded_channel();
        let mut session = ReviewSession {
            client,
            navigator,
            stack,
            position: Vec3::default(),
            sources,
            queue,
            subarbor,
            marks,
        };
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("{HELP}");

        let mut open = session.open_next_skeleton().await?;
        while open {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse_input(&line) {
                        Some(Input::Quit) => break,
                        Some(Input::NextSkeleton) => {
                            open = session.open_next_skeleton().await?;
                            continue;
                        }
                        Some(input) => session.handle(input),
                        None => warn!("unknown input {line:?}; {HELP}"),
                    }
                }
                Some(outcome) = outcomes.recv() => session.settle(outcome),
            }
            session.flush().await;
        }

        while session.navigator.pending_marks() > 0 {
            match outcomes.recv().await {
                Some(outcome) => session.settle(outcome),
                None => break,
            }
        }
        forward_notices(session.navigator.drain_notices());
        Ok(())
    }

    /// Leaves the current skeleton and starts on the next queued one.
    /// Returns `false` once the queue is empty.
    async fn open_next_skeleton(&mut self) -> Result<bool, Box<dyn std::error::Error>> {
        if let Some(done) = self.navigator.review().map(|r| r.skeleton) {
            self.sources.remove_skeletons(self.queue, &[done])?;
            self.navigator.end_review();
        }
        let next = self
            .sources
            .get(self.queue)
            .and_then(|s| s.selected_skeletons().first().copied());
        let Some(skeleton) = next else {
            info!("review queue is empty");
            return Ok(false);
        };
        info!("reviewing skeleton {skeleton}");
        self.load(skeleton).await?;
        self.navigator.select_next_segment();
        self.flush().await;
        Ok(true)
    }

    async fn load(&mut self, skeleton: SkeletonId) -> Result<(), ClientError> {
        let segments = self.client.segments(skeleton, self.subarbor).await?;
        info!("{} segments loaded", segments.len());
        self.navigator.load_segments(skeleton, self.subarbor, segments);
        Ok(())
    }

    fn handle(&mut self, input: Input) {
        let view = FocusedView {
            stack: &self.stack,
            position: self.position,
        };
        let nav = &mut self.navigator;
        match input {
            Input::Forward => nav.move_node_in_segment_forward(&view, false),
            Input::Backward => nav.move_node_in_segment_backward(&view, false),
            Input::ForwardAdvance => nav.move_node_in_segment_forward(&view, true),
            Input::BackwardAdvance => nav.move_node_in_segment_backward(&view, true),
            Input::NextSegment => nav.select_next_segment(),
            Input::Segment(id) => {
                if let Err(e) = nav.init_review_segment(id) {
                    warn!("{e}");
                }
            }
            Input::Activate(node) => {
                let segments = nav.observe_active_node(Some(&NodeTarget::Real(node)));
                let ids: Vec<String> = segments.iter().map(ToString::to_string).collect();
                info!("node {node} is in segments [{}]", ids.join(", "));
            }
            Input::Status => self.log_status(),
            Input::Help => info!("{HELP}"),
            Input::NextSkeleton | Input::Quit => {}
        }
    }

    fn settle(&mut self, outcome: MarkOutcome) {
        match outcome {
            MarkOutcome::Confirmed {
                node,
                reviewer,
                time,
            } => {
                if !self.navigator.review_confirmed(node, reviewer, time) {
                    warn!("review of node {node} confirmed, but it is not in the table");
                }
            }
            MarkOutcome::Failed { node, reason } => {
                error!("marking node {node} as reviewed failed: {reason}");
                self.navigator.review_failed(node);
            }
        }
    }

    /// Runs queued navigator commands until none are left.
    async fn flush(&mut self) {
        loop {
            let commands = self.navigator.take_commands();
            forward_notices(self.navigator.drain_notices());
            if commands.is_empty() {
                return;
            }
            for command in commands {
                self.execute(command).await;
            }
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::GoTo {
                target,
                position,
                center,
            } => {
                self.position = if center {
                    position
                } else {
                    self.stack
                        .with_depth(self.position, self.stack.depth_of(position))
                };
                info!(
                    "at {target} ({:.1}, {:.1}, {:.1}), section {}",
                    position.x,
                    position.y,
                    position.z,
                    self.stack.project_to_stack_z(position)
                );
            }
            Command::MoveTo { position } => {
                self.position = position;
                info!("view moved to section {}", self.stack.project_to_stack_z(position));
            }
            Command::MarkReviewed { node } => {
                let client = self.client.clone();
                let marks = self.marks.clone();
                tokio::spawn(async move {
                    let outcome = match client.mark_reviewed(node).await {
                        Ok(resp) => match resp.review() {
                            Some((reviewer, time)) => MarkOutcome::Confirmed {
                                node,
                                reviewer,
                                time,
                            },
                            None => MarkOutcome::Failed {
                                node,
                                reason: "no review recorded".to_string(),
                            },
                        },
                        Err(e) => MarkOutcome::Failed {
                            node,
                            reason: e.to_string(),
                        },
                    };
                    let _ = marks.send(outcome);
                });
            }
            Command::RefreshSegments { skeleton, subarbor } => {
                let segments = self.client.segments(skeleton, subarbor).await;
                apply_refresh(&mut self.navigator, skeleton, subarbor, segments);
            }
        }
    }

    fn log_status(&self) {
        let ReviewState::Active { index, cursor, .. } = self.navigator.state() else {
            info!("no segment under review");
            return;
        };
        if let Some(segment) = self.navigator.current_segment() {
            info!(
                "segment {} ({}%), node {} of {}, {cursor:?}",
                segment.id,
                format_percentage(segment.status),
                index + 1,
                segment.sequence.len()
            );
        }
        let pending: BTreeMap<&str, usize> = [
            ("pending marks", self.navigator.pending_marks()),
            ("queued skeletons", self.sources.get(self.queue).map_or(0, |s| s.len())),
        ]
        .into_iter()
        .collect();
        info!("{pending:?}");
    }
}

#[cfg(test)]
mod tests {
    use foundation::ids::{NodeId, SegmentId, SkeletonId, UserId};
    use pretty_assertions::assert_eq;
    use review::navigator::{ReviewNavigator, ReviewState};
    use review::reviewers::ReviewerSet;
    use review::segment::Segment;
    use review::source::SkeletonSources;

    use super::{Input, apply_refresh, parse_input, review_queue};
    use crate::client::ClientError;

    fn table(reviewed_first: bool) -> Vec<Segment> {
        let rids = if reviewed_first {
            r#"[[1, "2016-03-01T10:00:00Z"]]"#
        } else {
            "[]"
        };
        let json = format!(
            r#"[
                {{"id": 0, "nr_nodes": 1, "status": "0.00", "sequence": [
                    {{"id": 11, "x": 0.0, "y": 0.0, "z": 0.0, "rids": {rids}, "sup": []}}]}},
                {{"id": 1, "nr_nodes": 1, "status": "0.00", "sequence": [
                    {{"id": 12, "x": 0.0, "y": 0.0, "z": 0.0, "rids": [], "sup": []}}]}}
            ]"#
        );
        serde_json::from_str(&json).unwrap()
    }

    fn active_segment(nav: &ReviewNavigator) -> Option<SegmentId> {
        nav.current_segment().map(|s| s.id)
    }

    #[test]
    fn parses_navigation_keys() {
        assert_eq!(parse_input("n"), Some(Input::Forward));
        assert_eq!(parse_input(" P "), Some(Input::BackwardAdvance));
        assert_eq!(parse_input("s 12"), Some(Input::Segment(SegmentId(12))));
        assert_eq!(parse_input("a 7"), Some(Input::Activate(NodeId(7))));
        assert_eq!(parse_input("s x"), None);
        assert_eq!(parse_input("n 3"), None);
        assert_eq!(parse_input(""), None);
    }

    #[test]
    fn queue_keeps_skeletons_in_order() {
        let mut sources = SkeletonSources::new();
        let queue = review_queue(&mut sources, &[SkeletonId(5), SkeletonId(2)], Some("todo")).unwrap();
        let source = sources.get(queue).unwrap();
        assert_eq!(source.selected_skeletons(), vec![SkeletonId(5), SkeletonId(2)]);
        assert!(source.is_group("todo"));

        sources.remove_skeletons(queue, &[SkeletonId(5)]).unwrap();
        assert_eq!(
            sources.get(queue).unwrap().selected_skeletons(),
            vec![SkeletonId(2)]
        );
    }

    #[test]
    fn failed_reload_keeps_the_session_usable() {
        let skeleton = SkeletonId(9);
        let mut nav = ReviewNavigator::new(Default::default(), ReviewerSet::new(UserId(1)));
        nav.load_segments(skeleton, None, table(false));
        nav.select_next_segment();
        assert_eq!(active_segment(&nav), Some(SegmentId(0)));

        nav.load_segments(skeleton, None, table(false));
        apply_refresh(
            &mut nav,
            skeleton,
            None,
            Err(ClientError::Server("database is locked".to_string())),
        );
        assert_eq!(nav.state(), &ReviewState::Idle);
        assert_eq!(nav.review().map(|r| r.skeleton), Some(skeleton));
        assert_eq!(nav.segments().len(), 2);

        nav.select_next_segment();
        assert_eq!(active_segment(&nav), Some(SegmentId(0)));
    }

    #[test]
    fn successful_reload_selects_the_next_unreviewed_segment() {
        let skeleton = SkeletonId(9);
        let mut nav = ReviewNavigator::new(Default::default(), ReviewerSet::new(UserId(1)));
        nav.load_segments(skeleton, None, table(false));

        apply_refresh(&mut nav, skeleton, None, Ok(table(true)));
        assert_eq!(active_segment(&nav), Some(SegmentId(1)));
    }
}
