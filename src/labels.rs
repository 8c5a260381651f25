//! Class vocabularies shared by the detector and the segmenter.

use anyhow::{anyhow, Result};

/// 21-class segmentation layout (PASCAL VOC ordering). Index 0 is background.
pub const SEGMENTATION_LABELS: &[&str] = &[
    "background",
    "aeroplane",
    "bicycle",
    "bird",
    "board",
    "bottle",
    "bus",
    "car",
    "cat",
    "chair",
    "cow",
    "diningTable",
    "dog",
    "horse",
    "motorbike",
    "person",
    "pottedPlant",
    "sheep",
    "sofa",
    "train",
    "tvOrMonitor",
];

pub const BACKGROUND_CLASS: u8 = 0;

/// Ordered class vocabulary. The position of a label is its raster value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            return Err(anyhow!("label vocabulary must not be empty"));
        }
        if labels.len() > usize::from(u8::MAX) + 1 {
            return Err(anyhow!(
                "label vocabulary has {} entries; an 8-bit mask holds at most 256",
                labels.len()
            ));
        }
        Ok(Self { labels })
    }

    pub fn segmentation_default() -> Self {
        Self {
            labels: SEGMENTATION_LABELS.iter().map(|l| l.to_string()).collect(),
        }
    }

    /// Raster value for `label`.
    pub fn class_index(&self, label: &str) -> Option<u8> {
        self.labels
            .iter()
            .position(|l| l == label)
            .and_then(|idx| u8::try_from(idx).ok())
    }

    pub fn label(&self, index: u8) -> Option<&str> {
        self.labels.get(usize::from(index)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self::segmentation_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vocabulary_matches_voc_layout() {
        let vocab = LabelVocabulary::default();
        assert_eq!(vocab.len(), 21);
        assert_eq!(vocab.class_index("background"), Some(BACKGROUND_CLASS));
        assert_eq!(vocab.class_index("car"), Some(7));
        assert_eq!(vocab.class_index("person"), Some(15));
        assert_eq!(vocab.label(20), Some("tvOrMonitor"));
        assert_eq!(vocab.class_index("spaceship"), None);
    }

    #[test]
    fn rejects_empty_vocabulary() {
        assert!(LabelVocabulary::new(Vec::new()).is_err());
    }
}
