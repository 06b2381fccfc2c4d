//! Result formatting
//!
//! Maps class indices to diagnostic labels and packages the response payload.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::fmt;

/// Number of diagnostic classes
pub const NUM_CLASSES: usize = 3;

/// Diagnostic label, ordered by class index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Normal,
    Benign,
    Malignant,
}

impl Label {
    /// All labels in class-index order
    pub const ALL: [Label; NUM_CLASSES] = [Label::Normal, Label::Benign, Label::Malignant];

    /// Label for a class index, `None` outside `0..3`
    pub fn from_index(index: usize) -> Option<Label> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Label::Normal => "Normal",
            Label::Benign => "Benign",
            Label::Malignant => "Malignant",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Probability per label, indexed by class index
///
/// Serializes as a JSON object in class-index order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProbabilities([f64; NUM_CLASSES]);

impl ClassProbabilities {
    pub fn new(values: [f64; NUM_CLASSES]) -> Self {
        Self(values)
    }

    pub fn get(&self, label: Label) -> f64 {
        self.0[label.index()]
    }

    pub fn as_array(&self) -> &[f64; NUM_CLASSES] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Label, f64)> + '_ {
        Label::ALL.iter().map(move |&label| (label, self.0[label.index()]))
    }

    /// Index of the largest probability; ties go to the lowest index
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, &p) in self.0.iter().enumerate().skip(1) {
            if p > self.0[best] {
                best = i;
            }
        }
        best
    }
}

impl Serialize for ClassProbabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for (label, p) in self.iter() {
            map.serialize_entry(label.as_str(), &p)?;
        }
        map.end()
    }
}

/// Final prediction returned to callers
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Prediction {
    pub prediction: Label,
    pub confidence: f64,
    pub class_probabilities: ClassProbabilities,
}

/// Package a probability distribution into a [`Prediction`]
///
/// `confidence` is the maximum probability itself, not a recomputation.
pub fn format_prediction(probabilities: ClassProbabilities) -> Prediction {
    let best = probabilities.argmax();
    Prediction {
        prediction: Label::ALL[best],
        confidence: probabilities.as_array()[best],
        class_probabilities: probabilities,
    }
}
