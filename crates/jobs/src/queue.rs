use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::group::GroupCounters;
use crate::task::Task;
use crate::types::{Priority, TaskGroupId};

/// One ready-to-run execution of a task.
///
/// Carries the group's counter block so completion can be reported without
/// looking the group up under the structural lock.
pub(crate) struct Invocation {
    pub(crate) group: TaskGroupId,
    pub(crate) counters: Arc<GroupCounters>,
    pub(crate) task: Arc<Task>,
    pub(crate) index: u32,
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("group", &self.group)
            .field("task", &self.task.name())
            .field("index", &self.index)
            .finish()
    }
}

/// One FIFO lane per [`Priority`].
///
/// Not synchronized; lives inside the scheduler's structural state.
#[derive(Debug)]
pub(crate) struct PriorityQueueSet {
    lanes: [VecDeque<Invocation>; Priority::COUNT],
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self {
            lanes: std::array::from_fn(|_| VecDeque::new()),
        }
    }
}

impl PriorityQueueSet {
    /// Append a batch behind everything already queued in the lane.
    pub(crate) fn push_back_batch(&mut self, priority: Priority, batch: Vec<Invocation>) {
        self.lanes[priority.lane()].extend(batch);
    }

    /// Put a batch ahead of everything already queued in the lane, keeping the
    /// batch's own order.
    pub(crate) fn push_front_batch(&mut self, priority: Priority, batch: Vec<Invocation>) {
        let lane = &mut self.lanes[priority.lane()];
        for invocation in batch.into_iter().rev() {
            lane.push_front(invocation);
        }
    }

    /// Take the next invocation from the first non-empty lane of `lanes`.
    ///
    /// With `prefer`, an invocation of that group is taken first if any of the
    /// lanes holds one.
    pub(crate) fn pop(
        &mut self,
        lanes: &[Priority],
        prefer: Option<TaskGroupId>,
    ) -> Option<Invocation> {
        if let Some(group) = prefer {
            for priority in lanes {
                let lane = &mut self.lanes[priority.lane()];
                if let Some(pos) = lane.iter().position(|inv| inv.group == group) {
                    return lane.remove(pos);
                }
            }
        }
        lanes
            .iter()
            .find_map(|priority| self.lanes[priority.lane()].pop_front())
    }

    /// Remove every queued invocation of `task`.
    pub(crate) fn remove_task(&mut self, task: &Arc<Task>) -> Vec<Invocation> {
        let mut removed = Vec::new();
        for lane in &mut self.lanes {
            if !lane.iter().any(|inv| Arc::ptr_eq(&inv.task, task)) {
                continue;
            }
            let mut kept = VecDeque::with_capacity(lane.len());
            for invocation in lane.drain(..) {
                if Arc::ptr_eq(&invocation.task, task) {
                    removed.push(invocation);
                } else {
                    kept.push_back(invocation);
                }
            }
            *lane = kept;
        }
        removed
    }

    pub(crate) fn len(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].len()
    }

    pub(crate) fn total_len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    /// Whether any of `lanes` holds work.
    pub(crate) fn has_ready(&self, lanes: &[Priority]) -> bool {
        lanes.iter().any(|p| !self.lanes[p.lane()].is_empty())
    }
}
