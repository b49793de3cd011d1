//! Units of work flowing from the producer to the consumer pool.

/// A unit of work, or the sentinel that tells a consumer to exit.
#[derive(Debug)]
pub enum Item<P> {
    /// A synthesized payload tagged with the slot it was produced for.
    Work { sequence_id: u64, payload: P },

    /// Poison pill. Exactly one is delivered to each consumer.
    Terminal,
}

impl<P> Item<P> {
    /// Create a work item.
    pub fn work(sequence_id: u64, payload: P) -> Self {
        Item::Work {
            sequence_id,
            payload,
        }
    }

    /// Whether this item signals consumer shutdown.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Item::Terminal)
    }

    /// Sequence id of a work item, `None` for terminals.
    pub fn sequence_id(&self) -> Option<u64> {
        match self {
            Item::Work { sequence_id, .. } => Some(*sequence_id),
            Item::Terminal => None,
        }
    }
}

/// Destination key derived from an item's identity.
pub fn item_key(sequence_id: u64) -> String {
    format!("image_{}", sequence_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_discriminant() {
        let work: Item<Vec<u8>> = Item::work(3, vec![1, 2, 3]);
        assert!(!work.is_terminal());
        assert_eq!(work.sequence_id(), Some(3));

        let terminal: Item<Vec<u8>> = Item::Terminal;
        assert!(terminal.is_terminal());
        assert_eq!(terminal.sequence_id(), None);
    }

    #[test]
    fn test_item_key() {
        assert_eq!(item_key(0), "image_0");
        assert_eq!(item_key(42), "image_42");
    }
}
