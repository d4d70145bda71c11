use std::{cmp::Reverse, time::Duration};

use priority_queue::PriorityQueue;
use tokio::time::Instant;

use crate::message::Block;

/// Block requests in flight to a single peer, oldest first, so stalled requests can be swept.
pub struct Requests {
    timeout: Duration,
    in_flight: PriorityQueue<Block, Reverse<Instant>>,
}

impl Requests {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: PriorityQueue::new(),
        }
    }

    pub fn requested(&mut self, block: Block, instant: Instant) {
        self.in_flight.push(block, Reverse(instant));
    }

    /// Returns false for blocks that were never requested (or already answered).
    pub fn received(&mut self, block: &Block) -> bool {
        self.in_flight.remove(block).is_some()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    /// The oldest request, if it has been waiting longer than the timeout.
    pub fn expired(&self, now: Instant) -> Option<Block> {
        self.in_flight
            .peek()
            .filter(|(_, Reverse(requested_at))| *requested_at + self.timeout <= now)
            .map(|(block, _)| *block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_request_expires_first() {
        let start = Instant::now();
        let mut requests = Requests::new(Duration::from_secs(10));
        requests.requested(Block::new(0, 0, 16), start);
        requests.requested(Block::new(0, 16, 16), start + Duration::from_secs(5));

        assert_eq!(requests.expired(start + Duration::from_secs(9)), None);
        assert_eq!(
            requests.expired(start + Duration::from_secs(10)),
            Some(Block::new(0, 0, 16))
        );

        assert!(requests.received(&Block::new(0, 0, 16)));
        assert_eq!(requests.expired(start + Duration::from_secs(12)), None);
        assert_eq!(
            requests.expired(start + Duration::from_secs(15)),
            Some(Block::new(0, 16, 16))
        );
    }

    #[test]
    fn unrequested_block() {
        let mut requests = Requests::new(Duration::from_secs(10));

        assert!(!requests.received(&Block::new(1, 0, 16)));
    }
}
