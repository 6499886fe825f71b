//! Input label map

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Names the user gave each input, keyed by 0-based slot
///
/// Slot `n` corresponds to input number `n + 1` in commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputLabels {
    labels: BTreeMap<u8, String>,
}

impl InputLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: u8) -> Option<&str> {
        self.labels.get(&slot).map(String::as_str)
    }

    /// Store a label, returning whether it differed from the previous one
    pub fn set(&mut self, slot: u8, label: impl Into<String>) -> bool {
        let label = label.into();
        if self.labels.get(&slot) == Some(&label) {
            return false;
        }
        self.labels.insert(slot, label);
        true
    }

    /// Label for a slot, or `"Input N"` if the device has not reported one
    pub fn display_name(&self, slot: u8) -> String {
        self.get(slot)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Input {slot}"))
    }

    /// Option list for an input selector covering `slots` slots
    pub fn options(&self, slots: u8) -> Vec<String> {
        (0..slots).map(|slot| self.display_name(slot)).collect()
    }

    /// Slot whose label (or fallback name) matches `label`
    pub fn slot_of(&self, label: &str, slots: u8) -> Option<u8> {
        (0..slots).find(|slot| self.display_name(*slot) == label)
    }

    /// Label of the given 1-based input number
    pub fn for_input(&self, input: u8) -> Option<&str> {
        input.checked_sub(1).and_then(|slot| self.get(slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &str)> {
        self.labels.iter().map(|(slot, label)| (*slot, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_changes() {
        let mut labels = InputLabels::new();
        assert!(labels.set(0, "Apple TV"));
        assert!(!labels.set(0, "Apple TV"));
        assert!(labels.set(0, "Shield"));
        assert_eq!(labels.get(0), Some("Shield"));
    }

    #[test]
    fn test_options_fall_back_to_input_names() {
        let mut labels = InputLabels::new();
        labels.set(1, "Blu-ray");
        assert_eq!(
            labels.options(4),
            vec!["Input 0", "Blu-ray", "Input 2", "Input 3"]
        );
    }

    #[test]
    fn test_slot_lookup() {
        let mut labels = InputLabels::new();
        labels.set(2, "Kaleidescape");
        assert_eq!(labels.slot_of("Kaleidescape", 10), Some(2));
        assert_eq!(labels.slot_of("Input 5", 10), Some(5));
        assert_eq!(labels.slot_of("Input 5", 4), None);
        assert_eq!(labels.for_input(3), Some("Kaleidescape"));
        assert_eq!(labels.for_input(0), None);
    }
}
