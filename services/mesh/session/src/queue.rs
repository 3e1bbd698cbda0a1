//! Per-link send queue with priority lane and admission control.

use crate::error::QueueError;
use crate::transport::Transport;
use bytes::{Buf, Bytes};
use std::collections::VecDeque;
use tracing::{error, trace};

/// What one drain pass achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Bytes accepted by the transport
    pub written: usize,
    /// Frames completely handed over
    pub frames: usize,
    /// Stopped because the transport had no room
    pub blocked: bool,
}

/// Outbound frames of one link
///
/// Priority frames go out before regular ones, but never before the rest of a
/// frame that is already partly written.
#[derive(Debug)]
pub struct SendQueue {
    current: Option<Bytes>,
    priority: VecDeque<Bytes>,
    regular: VecDeque<Bytes>,
    max_pending: usize,
    min_free_memory: usize,
}

impl SendQueue {
    /// Queue holding at most `max_pending` regular frames and keeping
    /// `min_free_memory` bytes free
    pub fn new(max_pending: usize, min_free_memory: usize) -> Self {
        Self {
            current: None,
            priority: VecDeque::new(),
            regular: VecDeque::new(),
            max_pending,
            min_free_memory,
        }
    }

    /// Queue a complete frame.
    ///
    /// Every frame needs `headroom` to cover the low-water mark plus its own
    /// size; only regular frames are subject to the length cap.
    pub fn enqueue(
        &mut self,
        frame: Bytes,
        priority: bool,
        headroom: usize,
    ) -> Result<(), QueueError> {
        let needed = self.min_free_memory.saturating_add(frame.len());
        if headroom < needed {
            return Err(QueueError::MemoryPressure { headroom, needed });
        }

        if priority {
            self.priority.push_back(frame);
        } else {
            if self.regular.len() >= self.max_pending {
                return Err(QueueError::QueueFull {
                    pending: self.regular.len(),
                });
            }
            self.regular.push_back(frame);
        }
        Ok(())
    }

    /// Push as many bytes into `transport` as it will take.
    ///
    /// A frame may be cut at the transport's capacity; the remainder stays
    /// at the head of the queue for the next pass.
    pub fn drain(&mut self, transport: &mut dyn Transport) -> Result<DrainReport, QueueError> {
        let mut report = DrainReport::default();
        loop {
            if self.current.is_none() {
                self.current = self.priority.pop_front().or_else(|| self.regular.pop_front());
            }
            let Some(frame) = self.current.as_mut() else {
                break;
            };

            let space = transport.space();
            if space == 0 {
                report.blocked = true;
                break;
            }

            let requested = space.min(frame.len());
            let written = transport.write(&frame[..requested]);
            if written == 0 {
                report.blocked = true;
                break;
            }
            if written != requested {
                error!(requested, written, "transport lost part of a frame");
                return Err(QueueError::PartialWriteBug { requested, written });
            }

            frame.advance(written);
            report.written += written;
            if frame.is_empty() {
                self.current = None;
                report.frames += 1;
            }
        }
        trace!(
            written = report.written,
            frames = report.frames,
            blocked = report.blocked,
            "drained send queue"
        );
        Ok(report)
    }

    /// Frames waiting, including a partly written one
    pub fn len(&self) -> usize {
        self.priority.len() + self.regular.len() + usize::from(self.current.is_some())
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.current = None;
        self.priority.clear();
        self.regular.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transport with a fixed per-pass budget
    struct Budget {
        space: usize,
        written: Vec<u8>,
        short_by: usize,
    }

    impl Budget {
        fn new(space: usize) -> Self {
            Self {
                space,
                written: Vec::new(),
                short_by: 0,
            }
        }
    }

    impl Transport for Budget {
        fn write(&mut self, data: &[u8]) -> usize {
            let n = data.len().saturating_sub(self.short_by);
            self.written.extend_from_slice(&data[..n]);
            self.space -= n;
            n
        }

        fn space(&self) -> usize {
            self.space
        }

        fn close(&mut self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn frame(tag: u8, len: usize) -> Bytes {
        Bytes::from(vec![tag; len])
    }

    #[test]
    fn test_regular_cap_and_priority_bypass() {
        let mut queue = SendQueue::new(2, 0);
        queue.enqueue(frame(1, 4), false, usize::MAX).unwrap();
        queue.enqueue(frame(2, 4), false, usize::MAX).unwrap();
        assert_eq!(
            queue.enqueue(frame(3, 4), false, usize::MAX),
            Err(QueueError::QueueFull { pending: 2 })
        );
        assert!(queue.enqueue(frame(4, 4), true, usize::MAX).is_ok());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_memory_pressure_applies_to_priority() {
        let mut queue = SendQueue::new(10, 100);
        assert_eq!(
            queue.enqueue(frame(1, 8), true, 107),
            Err(QueueError::MemoryPressure {
                headroom: 107,
                needed: 108
            })
        );
        assert!(queue.enqueue(frame(1, 8), true, 108).is_ok());
    }

    #[test]
    fn test_priority_frames_go_first() {
        let mut queue = SendQueue::new(10, 0);
        queue.enqueue(frame(1, 2), false, usize::MAX).unwrap();
        queue.enqueue(frame(2, 2), true, usize::MAX).unwrap();
        queue.enqueue(frame(3, 2), false, usize::MAX).unwrap();

        let mut transport = Budget::new(100);
        let report = queue.drain(&mut transport).unwrap();
        assert_eq!(report, DrainReport { written: 6, frames: 3, blocked: false });
        assert_eq!(transport.written, vec![2, 2, 1, 1, 3, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_partial_write_resumes() {
        let mut queue = SendQueue::new(10, 0);
        queue.enqueue(frame(1, 5), false, usize::MAX).unwrap();
        queue.enqueue(frame(2, 3), false, usize::MAX).unwrap();

        let mut transport = Budget::new(3);
        let report = queue.drain(&mut transport).unwrap();
        assert_eq!(report, DrainReport { written: 3, frames: 0, blocked: true });

        // A priority frame must wait for the rest of the cut frame
        queue.enqueue(frame(9, 1), true, usize::MAX).unwrap();
        transport.space = 100;
        let report = queue.drain(&mut transport).unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(transport.written, vec![1, 1, 1, 1, 1, 9, 2, 2, 2]);
    }

    #[test]
    fn test_zero_write_is_backpressure() {
        let mut queue = SendQueue::new(10, 0);
        queue.enqueue(frame(1, 5), false, usize::MAX).unwrap();
        let mut transport = Budget::new(0);
        let report = queue.drain(&mut transport).unwrap();
        assert!(report.blocked);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_short_write_is_fatal() {
        let mut queue = SendQueue::new(10, 0);
        queue.enqueue(frame(1, 5), false, usize::MAX).unwrap();
        let mut transport = Budget::new(100);
        transport.short_by = 2;
        assert_eq!(
            queue.drain(&mut transport),
            Err(QueueError::PartialWriteBug {
                requested: 5,
                written: 3
            })
        );
    }

    #[test]
    fn test_clear() {
        let mut queue = SendQueue::new(10, 0);
        queue.enqueue(frame(1, 5), false, usize::MAX).unwrap();
        queue.enqueue(frame(2, 5), true, usize::MAX).unwrap();
        queue.clear();
        assert!(queue.is_empty());
    }
}
