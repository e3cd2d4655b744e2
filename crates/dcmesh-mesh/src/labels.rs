//! Label value to output name mapping.
use std::collections::BTreeMap;

/// Labels written by default, in order.
pub const DEFAULT_LABELS: [i32; 5] = [1, 2, 3, 4, 5];

const ANATOMICAL: [(i32, &str); 5] = [
    (1, "Upper_Skull"),
    (2, "Mandible"),
    (3, "Upper_Teeth"),
    (4, "Lower_Teeth"),
    (5, "Mandibular_canal"),
];

/// Total mapping from label value to a file-safe name. Values without an
/// entry fall back to `label_<value>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    names: BTreeMap<i32, String>,
}

impl LabelSpec {
    /// The cranio-maxillofacial table the segmentation model is trained on.
    pub fn anatomical() -> Self {
        Self {
            names: ANATOMICAL
                .iter()
                .map(|(value, name)| (*value, (*name).to_string()))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }

    /// Entries in `overrides` replace or extend the table.
    pub fn with_overrides(mut self, overrides: &BTreeMap<i32, String>) -> Self {
        for (value, name) in overrides {
            self.names.insert(*value, name.clone());
        }
        self
    }

    pub fn name(&self, label: i32) -> String {
        self.names
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("label_{label}"))
    }

    pub fn file_name(&self, label: i32, ext: &str) -> String {
        format!("{}.{}", self.name(label), ext)
    }
}

impl Default for LabelSpec {
    fn default() -> Self {
        Self::anatomical()
    }
}
