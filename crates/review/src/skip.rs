//! Skip steps: synthetic stops between two real nodes that are too many
//! sections apart.

use foundation::math::Vec3;
use foundation::stack::Stack;

use crate::segment::{ReviewNode, VirtualNodeId};

/// A virtual node the reviewer is moved to instead of the next real node.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipStep {
    pub id: VirtualNodeId,
    pub position: Vec3,
    /// Stack section of `position`.
    pub section: i64,
    /// Index of the real node the step leads to.
    pub to: usize,
    /// The step was made moving towards the segment's start.
    pub backwards: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LimitedMove {
    pub step: Option<SkipStep>,
    /// Sections passed over because the tracer suppressed a virtual node there.
    pub suppressed_skips: usize,
}

/// Limits a move from `from` to the real node `sequence[to]` to `max_step`
/// sections along the depth axis of `stack`.
///
/// Returns a skip step at the first acceptable section no further than
/// `max_step` away, or no step if the target node is close enough. Broken
/// sections and virtual nodes suppressed on the edge towards `to` are never
/// chosen. `backwards` tells on which side of `to` the previous real node
/// lies.
pub fn limit_move(
    stack: &Stack,
    max_step: u32,
    sequence: &[ReviewNode],
    from: Vec3,
    to: usize,
    backwards: bool,
) -> LimitedMove {
    let Some(target_node) = sequence.get(to) else {
        return LimitedMove::default();
    };
    let from_z = stack.project_to_unclamped_stack_z(from);
    let to_z = stack.project_to_unclamped_stack_z(target_node.position());
    let diff = to_z - from_z;
    let distance = diff.abs();
    if distance <= i64::from(max_step) {
        return LimitedMove::default();
    }

    let previous = if backwards {
        to.checked_add(1)
    } else {
        to.checked_sub(1)
    }
    .and_then(|i| sequence.get(i));
    let orientation = stack.orientation().code();
    let suppressed: Vec<i64> = previous
        .map(|n| {
            n.sup
                .iter()
                .filter(|s| s.orientation == orientation)
                .map(|s| stack.depth_to_stack_z(s.coordinate))
                .collect()
        })
        .unwrap_or_default();

    let inc = diff.signum();
    let mut steps = 0;
    let mut section = from_z;
    let mut suppressed_skips = 0;
    while steps < distance {
        steps += 1;
        section = from_z + steps * inc;
        if stack.is_broken(section) {
            continue;
        }
        if suppressed.contains(&section) {
            suppressed_skips += 1;
            continue;
        }
        if section == to_z || steps >= i64::from(max_step) {
            break;
        }
    }

    if section == to_z {
        return LimitedMove {
            step: None,
            suppressed_skips,
        };
    }

    let position = from.lerp(target_node.position(), steps as f64 / distance as f64);
    let other = previous.map_or(target_node.id, |n| n.id);
    let (child, parent) = if backwards {
        (target_node.id, other)
    } else {
        (other, target_node.id)
    };
    LimitedMove {
        step: Some(SkipStep {
            id: VirtualNodeId {
                child,
                parent,
                depth: stack.depth_of(position),
            },
            position,
            section,
            to,
            backwards,
        }),
        suppressed_skips,
    }
}

#[cfg(test)]
mod tests {
    use foundation::ids::{NodeId, StackId};
    use foundation::math::Vec3;
    use foundation::stack::{Orientation, Stack};
    use pretty_assertions::assert_eq;

    use super::limit_move;
    use crate::segment::{ReviewNode, SuppressedVirtualNode};

    fn stack() -> Stack {
        Stack::new(
            StackId(1),
            [1024, 1024, 100],
            Vec3::new(4.0, 4.0, 40.0),
            Vec3::default(),
            Orientation::Xy,
        )
        .unwrap()
    }

    fn at(id: u64, section: i64) -> ReviewNode {
        ReviewNode::new(NodeId(id), Vec3::new(100.0, 100.0, section as f64 * 40.0))
    }

    #[test]
    fn close_nodes_need_no_step() {
        let seq = vec![at(1, 0), at(2, 1)];
        let moved = limit_move(&stack(), 1, &seq, seq[0].position(), 1, false);
        assert_eq!(moved.step, None);
    }

    #[test]
    fn steps_at_most_max_step_sections() {
        let seq = vec![at(1, 0), at(2, 5)];
        let one = limit_move(&stack(), 1, &seq, seq[0].position(), 1, false)
            .step
            .unwrap();
        assert_eq!(one.section, 1);
        assert_eq!(one.position, Vec3::new(100.0, 100.0, 40.0));
        assert_eq!(one.to, 1);
        assert!(!one.backwards);
        assert_eq!(one.id.to_string(), "vn-1-2-40");

        let two = limit_move(&stack(), 2, &seq, seq[0].position(), 1, false)
            .step
            .unwrap();
        assert_eq!(two.section, 2);
    }

    #[test]
    fn backwards_moves_step_down_towards_the_child() {
        let seq = vec![at(1, 0), at(2, 5)];
        let step = limit_move(&stack(), 1, &seq, seq[1].position(), 0, true)
            .step
            .unwrap();
        assert_eq!(step.section, 4);
        assert_eq!((step.id.child, step.id.parent), (NodeId(1), NodeId(2)));
        assert!(step.backwards);
    }

    #[test]
    fn broken_and_suppressed_sections_are_passed_over() {
        let broken = stack().with_broken_slices([1]);
        let seq = vec![at(1, 0), at(2, 5)];
        let step = limit_move(&broken, 1, &seq, seq[0].position(), 1, false)
            .step
            .unwrap();
        assert_eq!(step.section, 2);

        let mut seq = vec![at(1, 0), at(2, 3)];
        seq[0].sup = vec![
            SuppressedVirtualNode {
                orientation: 0,
                coordinate: 40.0,
            },
            SuppressedVirtualNode {
                orientation: 1,
                coordinate: 80.0,
            },
        ];
        let moved = limit_move(&stack(), 1, &seq, seq[0].position(), 1, false);
        assert_eq!(moved.suppressed_skips, 1);
        assert_eq!(moved.step.map(|s| s.section), Some(2));
    }

    #[test]
    fn reaching_the_target_through_gaps_needs_no_step() {
        let broken = stack().with_broken_slices([1, 2, 3]);
        let seq = vec![at(1, 0), at(2, 4)];
        let moved = limit_move(&broken, 1, &seq, seq[0].position(), 1, false);
        assert_eq!(moved.step, None);
    }
}
