//! Per-priority FIFO lanes served by a weighted round-robin cycle

use std::collections::{HashMap, VecDeque};

use crate::state::{JobId, Priority};

/// What the scheduler should do with a lane head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// Start it now
    Ready,
    /// Waiting on a retry backoff; move to the lane tail
    Deferred,
    /// No longer queued; drop from the lane
    Stale,
}

/// Three FIFO lanes and a service cycle cursor
#[derive(Debug, Clone)]
pub struct PriorityLanes {
    lanes: HashMap<Priority, VecDeque<JobId>>,
    cycle: Vec<Priority>,
    cursor: usize,
}

impl PriorityLanes {
    /// Lanes served in `cycle` order; an empty cycle falls back to highest-first.
    pub fn new(cycle: Vec<Priority>) -> Self {
        let cycle = if cycle.is_empty() {
            Priority::all().to_vec()
        } else {
            cycle
        };
        let lanes = Priority::all()
            .iter()
            .map(|p| (*p, VecDeque::new()))
            .collect();
        Self {
            lanes,
            cycle,
            cursor: 0,
        }
    }

    pub fn push(&mut self, priority: Priority, job_id: JobId) {
        self.lanes.entry(priority).or_default().push_back(job_id);
    }

    /// Remove a job from whichever lane holds it
    pub fn remove(&mut self, job_id: &str) -> bool {
        let mut removed = false;
        for lane in self.lanes.values_mut() {
            let before = lane.len();
            lane.retain(|id| id != job_id);
            removed |= lane.len() != before;
        }
        removed
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lanes.values().any(|lane| lane.iter().any(|id| id == job_id))
    }

    /// Next job to run.
    ///
    /// Walks at most one full cycle from the cursor. Within a lane, deferred
    /// heads rotate to the tail so they never block ready jobs behind them.
    pub fn dequeue<F>(&mut self, mut classify: F) -> Option<JobId>
    where
        F: FnMut(&JobId) -> Candidate,
    {
        for _ in 0..self.cycle.len() {
            let priority = self.cycle[self.cursor];
            self.cursor = (self.cursor + 1) % self.cycle.len();

            let Some(lane) = self.lanes.get_mut(&priority) else {
                continue;
            };
            for _ in 0..lane.len() {
                let Some(job_id) = lane.pop_front() else {
                    break;
                };
                match classify(&job_id) {
                    Candidate::Ready => return Some(job_id),
                    Candidate::Deferred => lane.push_back(job_id),
                    Candidate::Stale => {}
                }
            }
        }
        None
    }

    pub fn depth(&self, priority: Priority) -> usize {
        self.lanes.get(&priority).map_or(0, VecDeque::len)
    }

    pub fn total_depth(&self) -> usize {
        self.lanes.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_depth() == 0
    }

    /// All queued ids, highest priority first
    pub fn job_ids(&self) -> impl Iterator<Item = &JobId> {
        Priority::all()
            .iter()
            .filter_map(|p| self.lanes.get(p))
            .flat_map(|lane| lane.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_cycle() -> Vec<Priority> {
        vec![
            Priority::High,
            Priority::High,
            Priority::Normal,
            Priority::Normal,
            Priority::Low,
        ]
    }

    #[test]
    fn test_weighted_service_ratio() {
        let mut lanes = PriorityLanes::new(default_cycle());
        for i in 0..200 {
            lanes.push(Priority::High, format!("h{}", i));
            lanes.push(Priority::Normal, format!("n{}", i));
            lanes.push(Priority::Low, format!("l{}", i));
        }

        let mut served: HashMap<char, usize> = HashMap::new();
        for _ in 0..100 {
            let id = lanes.dequeue(|_| Candidate::Ready).unwrap();
            *served.entry(id.chars().next().unwrap()).or_default() += 1;
        }
        assert_eq!(served[&'h'], 40);
        assert_eq!(served[&'n'], 40);
        assert_eq!(served[&'l'], 20);
    }

    #[test]
    fn test_fifo_within_lane() {
        let mut lanes = PriorityLanes::new(default_cycle());
        lanes.push(Priority::Low, "a".to_string());
        lanes.push(Priority::Low, "b".to_string());
        assert_eq!(lanes.dequeue(|_| Candidate::Ready).as_deref(), Some("a"));
        assert_eq!(lanes.dequeue(|_| Candidate::Ready).as_deref(), Some("b"));
        assert_eq!(lanes.dequeue(|_| Candidate::Ready), None);
    }

    #[test]
    fn test_empty_lanes_do_not_starve_others() {
        let mut lanes = PriorityLanes::new(default_cycle());
        lanes.push(Priority::Low, "only".to_string());
        assert_eq!(lanes.dequeue(|_| Candidate::Ready).as_deref(), Some("only"));
    }

    #[test]
    fn test_deferred_moves_to_tail() {
        let mut lanes = PriorityLanes::new(default_cycle());
        lanes.push(Priority::High, "waiting".to_string());
        lanes.push(Priority::High, "ready".to_string());

        let next = lanes.dequeue(|id| {
            if id == "waiting" {
                Candidate::Deferred
            } else {
                Candidate::Ready
            }
        });
        assert_eq!(next.as_deref(), Some("ready"));
        assert_eq!(lanes.depth(Priority::High), 1);
        assert!(lanes.contains("waiting"));

        // Only deferred work left: idle, nothing lost
        assert_eq!(lanes.dequeue(|_| Candidate::Deferred), None);
        assert_eq!(lanes.depth(Priority::High), 1);
    }

    #[test]
    fn test_stale_entries_dropped() {
        let mut lanes = PriorityLanes::new(default_cycle());
        lanes.push(Priority::Normal, "gone".to_string());
        assert_eq!(lanes.dequeue(|_| Candidate::Stale), None);
        assert!(lanes.is_empty());
    }

    #[test]
    fn test_remove_and_depth() {
        let mut lanes = PriorityLanes::new(default_cycle());
        lanes.push(Priority::High, "a".to_string());
        lanes.push(Priority::Low, "b".to_string());
        assert_eq!(lanes.total_depth(), 2);
        assert!(lanes.remove("b"));
        assert!(!lanes.remove("b"));
        assert_eq!(lanes.depth(Priority::Low), 0);
        assert_eq!(lanes.job_ids().collect::<Vec<_>>(), vec!["a"]);
    }
}
