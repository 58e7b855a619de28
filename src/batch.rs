use std::time::{Duration, Instant};

/// Burst collector for incoming SysEx frames.
///
/// A preset dump arrives as many discrete frames with no end-of-dump
/// marker; the only reliable end-of-burst signal is the input going
/// quiet. Frames accumulate while the input is busy, and one batch is
/// released after a full quiescence window with no arrivals.
///
/// The caller owns the clock: `push` and `poll` take the current time,
/// which keeps the state machine synchronous and directly testable.
#[derive(Debug)]
pub struct FrameBatcher {
    window: Duration,
    pending: Vec<Vec<u8>>,
    state: State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Buffering { deadline: Instant },
}

impl FrameBatcher {
    pub fn new(window: Duration) -> Self {
        FrameBatcher {
            window,
            pending: Vec::new(),
            state: State::Idle,
        }
    }

    /// Record an arrived frame and push the flush deadline out by one
    /// full window.
    pub fn push(&mut self, frame: Vec<u8>, now: Instant) {
        self.pending.push(frame);
        self.state = State::Buffering {
            deadline: now + self.window,
        };
    }

    /// Release the batch if the window has elapsed since the last frame.
    /// Frames come out in arrival order; the batcher is Idle afterwards.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<Vec<u8>>> {
        match self.state {
            State::Buffering { deadline } if now >= deadline => {
                self.state = State::Idle;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Session reset: discard buffered frames without releasing them.
    pub fn cancel(&mut self) {
        self.pending.clear();
        self.state = State::Idle;
    }

    /// The pending flush deadline, if a batch is building up. Lets an
    /// event loop size its receive timeout instead of busy-polling.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Idle => None,
            State::Buffering { deadline } => Some(deadline),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn at(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn burst_flushes_once_after_quiescence() {
        let t0 = Instant::now();
        let mut batcher = FrameBatcher::new(WINDOW);
        batcher.push(vec![1], at(t0, 0));
        batcher.push(vec![2], at(t0, 200));
        batcher.push(vec![3], at(t0, 400));

        // window is measured from the last arrival: 400 + 1000 = 1400
        assert_eq!(batcher.poll(at(t0, 1399)), None);
        let batch = batcher.poll(at(t0, 1400)).unwrap();
        assert_eq!(batch, vec![vec![1], vec![2], vec![3]]);

        // exactly once
        assert_eq!(batcher.poll(at(t0, 5000)), None);
        assert_eq!(batcher.deadline(), None);
    }

    #[test]
    fn each_arrival_restarts_the_window() {
        let t0 = Instant::now();
        let mut batcher = FrameBatcher::new(WINDOW);
        batcher.push(vec![1], at(t0, 0));
        assert_eq!(batcher.deadline(), Some(at(t0, 1000)));
        batcher.push(vec![2], at(t0, 900));
        assert_eq!(batcher.deadline(), Some(at(t0, 1900)));
        assert_eq!(batcher.poll(at(t0, 1000)), None);
    }

    #[test]
    fn cancel_discards_without_flushing() {
        let t0 = Instant::now();
        let mut batcher = FrameBatcher::new(WINDOW);
        batcher.push(vec![1], at(t0, 0));
        batcher.cancel();
        assert_eq!(batcher.poll(at(t0, 2000)), None);

        // a fresh burst after the reset flushes normally
        batcher.push(vec![9], at(t0, 3000));
        assert_eq!(batcher.poll(at(t0, 4000)), Some(vec![vec![9]]));
    }

    #[test]
    fn idle_poll_is_a_no_op() {
        let mut batcher = FrameBatcher::new(WINDOW);
        assert_eq!(batcher.poll(Instant::now()), None);
        assert_eq!(batcher.deadline(), None);
    }
}
