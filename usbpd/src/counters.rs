//! Small wrap-around counters for message ids, retry attempts and hard
//! reset attempts.

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The counter wrapped back to zero.
    Overrun,
}

/// A counter that wraps modulo `max_value + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    value: u8,
    max_value: u8,
}

/// The kind of thing being counted, selecting the wrap-around ceiling.
#[derive(Debug, Clone, Copy)]
pub enum CounterType {
    /// `tx_msg_id_counter`/`rx_msg_id_stored`: cyclic 0..=7.
    MessageId,
    /// Transmit retry attempts under spec revision >= 3.0.
    Retry,
    /// Transmit retry attempts under spec revision 2.0.
    RetryRev20,
    /// Hard Reset attempts before giving up.
    HardReset,
}

impl Counter {
    /// Create a zeroed counter of `counter_type`.
    pub fn new(counter_type: CounterType) -> Self {
        let max_value = match counter_type {
            CounterType::MessageId => 7,
            CounterType::Retry => crate::config::N_RETRY_COUNT,
            CounterType::RetryRev20 => crate::config::N_RETRY_COUNT_REV20,
            CounterType::HardReset => u8::MAX, // reference counter is unbounded; PE applies its own ceiling
        };
        Self { value: 0, max_value }
    }

    /// Set the counter to `value`, wrapped modulo `max_value + 1`.
    pub fn set(&mut self, value: u8) {
        self.value = value % self.max_value.wrapping_add(1).max(1);
    }

    /// The current value.
    pub fn value(&self) -> u8 {
        self.value
    }

    /// Advance by one, reporting whether this wrapped back to zero.
    pub fn increment(&mut self) -> Result<(), Error> {
        self.set(self.value.wrapping_add(1));
        if self.value == 0 {
            Err(Error::Overrun)
        } else {
            Ok(())
        }
    }

    /// Reset to zero.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_wraps_modulo_eight() {
        let mut counter = Counter::new(CounterType::MessageId);
        for _ in 0..7 {
            counter.increment().unwrap();
        }
        assert_eq!(counter.value(), 7);
        assert!(counter.increment().is_err());
        assert_eq!(counter.value(), 0);
    }
}
