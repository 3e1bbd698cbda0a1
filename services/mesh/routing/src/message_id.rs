//! Wrapping sequence identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequence id that survives wraparound
///
/// 0 means "never set" and is older than every other id. Ordering between
/// two set ids uses the signed distance, so `u32::MAX` is older than `10`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(u32);

impl MessageId {
    /// Wrap a raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Whether the id was never set
    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }

    /// Whether `self` comes before `other`
    pub fn is_older_than(&self, other: MessageId) -> bool {
        if self.0 == other.0 {
            return false;
        }
        if self.0 == 0 {
            return true;
        }
        if other.0 == 0 {
            return false;
        }
        (self.0 as i32).wrapping_sub(other.0 as i32) < 0
    }

    /// Adopt `other` if it is newer; returns whether anything changed
    pub fn update(&mut self, other: MessageId) -> bool {
        if self.is_older_than(other) {
            *self = other;
            true
        } else {
            false
        }
    }

    /// Advance to the next id, skipping 0
    pub fn increment(&mut self) -> MessageId {
        self.0 = self.0.wrapping_add(1);
        if self.0 == 0 {
            self.0 = 1;
        }
        *self
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_oldest() {
        let zero = MessageId::default();
        assert!(zero.is_unset());
        assert!(zero.is_older_than(MessageId::new(1)));
        assert!(zero.is_older_than(MessageId::new(u32::MAX)));
        assert!(!MessageId::new(1).is_older_than(zero));
        assert!(!zero.is_older_than(zero));
    }

    #[test]
    fn test_wraparound_ordering() {
        let max = MessageId::new(u32::MAX);
        let ten = MessageId::new(10);
        assert!(max.is_older_than(ten));
        assert!(!ten.is_older_than(max));
        assert!(MessageId::new(10).is_older_than(MessageId::new(11)));
    }

    #[test]
    fn test_increment_skips_zero() {
        let mut id = MessageId::new(u32::MAX);
        assert_eq!(id.increment(), MessageId::new(1));
        assert_eq!(id.increment(), MessageId::new(2));
        assert_eq!(MessageId::default().increment(), MessageId::new(1));
    }

    #[test]
    fn test_update() {
        let mut id = MessageId::new(5);
        assert!(!id.update(MessageId::new(4)));
        assert!(!id.update(MessageId::new(5)));
        assert!(id.update(MessageId::new(6)));
        assert_eq!(id.value(), 6);
        assert!(!id.update(MessageId::default()));
    }
}
