use crate::layout::PageRange;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPriority {
    Visible,
    Prefetch,
}

impl RenderPriority {
    fn rank(self) -> u8 {
        match self {
            Self::Visible => 0,
            Self::Prefetch => 1,
        }
    }

    /// `Visible` inside the visible range, `Prefetch` in the buffer.
    pub fn for_page(page: u32, visible: PageRange) -> Self {
        if visible.contains(page) {
            Self::Visible
        } else {
            Self::Prefetch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderJob {
    pub page: u32,
    pub priority: RenderPriority,
    pub generation: u64,
}

/// Pages waiting for a render within one window pass.
///
/// Visible pages are handed out before buffer pages; within a priority,
/// pages come out in the order they were queued.
#[derive(Debug, Default)]
pub struct RenderQueue {
    generation: u64,
    pending: HashMap<u32, (RenderPriority, u64)>,
    order: VecDeque<u32>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue for one pass: every page of `pages`, prioritised against
    /// `visible`.
    pub fn for_pass(pages: &[u32], visible: PageRange) -> Self {
        let mut queue = Self::new();
        queue.begin_generation();
        for &page in pages {
            queue.enqueue(page, RenderPriority::for_page(page, visible));
        }
        queue
    }

    pub fn begin_generation(&mut self) -> u64 {
        self.generation += 1;
        self.pending.clear();
        self.order.clear();
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn enqueue(&mut self, page: u32, priority: RenderPriority) {
        match self.pending.get_mut(&page) {
            Some((existing_priority, _)) => {
                if priority.rank() < existing_priority.rank() {
                    *existing_priority = priority;
                }
            }
            None => {
                let generation = self.generation;
                self.pending.insert(page, (priority, generation));
                self.order.push_back(page);
            }
        }
    }

    pub fn pop_next(&mut self) -> Option<RenderJob> {
        let mut best: Option<(u32, RenderPriority, u64)> = None;

        for page in &self.order {
            let Some((priority, generation)) = self.pending.get(page).copied() else {
                continue;
            };

            match best {
                Some((_, best_priority, _)) if priority.rank() >= best_priority.rank() => {}
                _ => best = Some((*page, priority, generation)),
            }

            if matches!(best, Some((_, RenderPriority::Visible, _))) {
                break;
            }
        }

        let (page, priority, generation) = best?;
        self.pending.remove(&page);

        if let Some(index) = self.order.iter().position(|candidate| *candidate == page) {
            let _ = self.order.remove(index);
        }

        Some(RenderJob { page, priority, generation })
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_queue_prioritizes_visible_before_prefetch() {
        let mut queue = RenderQueue::new();
        queue.begin_generation();

        queue.enqueue(4, RenderPriority::Prefetch);
        queue.enqueue(1, RenderPriority::Visible);

        let first = queue.pop_next().expect("first render job expected");
        assert_eq!(first.priority, RenderPriority::Visible);
        assert_eq!(first.page, 1);

        let second = queue.pop_next().expect("second render job expected");
        assert_eq!(second.priority, RenderPriority::Prefetch);
        assert_eq!(second.page, 4);
    }

    #[test]
    fn render_queue_upgrades_priority_for_existing_jobs() {
        let mut queue = RenderQueue::new();
        queue.begin_generation();

        queue.enqueue(8, RenderPriority::Prefetch);
        queue.enqueue(8, RenderPriority::Visible);

        let job = queue.pop_next().expect("render job expected");
        assert_eq!(job.page, 8);
        assert_eq!(job.priority, RenderPriority::Visible);
        assert!(queue.is_empty());
    }

    #[test]
    fn pass_queue_serves_visible_pages_first_in_page_order() {
        let mut queue = RenderQueue::for_pass(&[6, 7, 8, 9, 10], PageRange::new(7, 9));

        let order: Vec<u32> = std::iter::from_fn(|| queue.pop_next()).map(|job| job.page).collect();

        assert_eq!(order, vec![7, 8, 9, 6, 10]);
    }
}
