use std::fmt;

/// FramingMode governs how package bytes are laid out inside one action's
/// encoded buffer, and therefore how the receive side reassembles them.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramingMode {
    /// One action carries exactly one package, raw. No header.
    #[default]
    Single,

    /// One action carries one or more whole packages as length-prefixed
    /// records.
    Batch,

    /// Length-prefixed records under a fragment header; head and tail
    /// records may be slices of a package continued across neighboring
    /// fragments. One producer per link.
    FragmentSingleProducer,

    /// Like [`FramingMode::FragmentSingleProducer`] with a 16-byte producer
    /// id in the header; reassembly is tracked per producer.
    FragmentMultipleProducer,
}

const FRAMING_MODE_SINGLE_STR: &str = "single";
const FRAMING_MODE_BATCH_STR: &str = "batch";
const FRAMING_MODE_FRAGMENT_SINGLE_PRODUCER_STR: &str = "fragment-single-producer";
const FRAMING_MODE_FRAGMENT_MULTIPLE_PRODUCER_STR: &str = "fragment-multiple-producer";

impl FramingMode {
    /// Whether a package may be split across actions in this mode.
    pub fn allows_fragmentation(&self) -> bool {
        matches!(
            self,
            FramingMode::FragmentSingleProducer | FramingMode::FragmentMultipleProducer
        )
    }

    /// Whether more than one package may ride in one encoding slot.
    pub fn allows_batching(&self) -> bool {
        !matches!(self, FramingMode::Single)
    }
}

impl From<&str> for FramingMode {
    fn from(raw: &str) -> Self {
        match raw {
            FRAMING_MODE_BATCH_STR => FramingMode::Batch,
            FRAMING_MODE_FRAGMENT_SINGLE_PRODUCER_STR => FramingMode::FragmentSingleProducer,
            FRAMING_MODE_FRAGMENT_MULTIPLE_PRODUCER_STR => FramingMode::FragmentMultipleProducer,
            _ => FramingMode::Single,
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            FramingMode::Single => FRAMING_MODE_SINGLE_STR,
            FramingMode::Batch => FRAMING_MODE_BATCH_STR,
            FramingMode::FragmentSingleProducer => FRAMING_MODE_FRAGMENT_SINGLE_PRODUCER_STR,
            FramingMode::FragmentMultipleProducer => FRAMING_MODE_FRAGMENT_MULTIPLE_PRODUCER_STR,
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_framing_mode_string() {
        let tests = vec![
            (FramingMode::Single, "single"),
            (FramingMode::Batch, "batch"),
            (
                FramingMode::FragmentSingleProducer,
                "fragment-single-producer",
            ),
            (
                FramingMode::FragmentMultipleProducer,
                "fragment-multiple-producer",
            ),
        ];

        for (mode, expected_string) in tests {
            assert_eq!(mode.to_string(), expected_string);
            assert_eq!(FramingMode::from(expected_string), mode);
        }
    }

    #[test]
    fn test_framing_mode_capabilities() {
        assert!(!FramingMode::Single.allows_batching());
        assert!(!FramingMode::Single.allows_fragmentation());
        assert!(FramingMode::Batch.allows_batching());
        assert!(!FramingMode::Batch.allows_fragmentation());
        assert!(FramingMode::FragmentSingleProducer.allows_fragmentation());
        assert!(FramingMode::FragmentMultipleProducer.allows_fragmentation());
    }
}
