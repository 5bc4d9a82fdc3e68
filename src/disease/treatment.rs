//! Treatment Catalog
//!
//! Static advisory text per canonical disease label. Lookup is total: anything
//! not in the table (sentinels included) gets the specialist fallback.

use rustc_hash::FxHashMap;

use super::labels::{canonical_label, HEALTHY};

/// Advisory for labels without a specific entry
pub const SPECIALIST_FALLBACK: &str =
    "Consult with a plant pathologist for specific recommendations.";

/// Advisory for healthy findings
pub const NO_TREATMENT_NEEDED: &str =
    "No treatment needed. Continue regular maintenance and monitoring.";

static TREATMENTS: &[(&str, &str)] = &[
    (
        "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
        "Apply fungicides containing pyraclostrobin, azoxystrobin, trifloxystrobin, or picoxystrobin. Rotate crops and remove crop debris.",
    ),
    (
        "Corn_(maize)___Common_rust_",
        "Apply fungicides with active ingredients like azoxystrobin, pyraclostrobin, or trifloxystrobin. Plant resistant corn varieties.",
    ),
    ("Corn_(maize)___healthy", NO_TREATMENT_NEEDED),
    (
        "Peach___Bacterial_spot",
        "Apply copper-based bactericides in early spring. Prune infected branches and ensure good air circulation.",
    ),
    ("Peach___healthy", NO_TREATMENT_NEEDED),
    (
        "Apple___Apple_scab",
        "Apply captan or myclobutanil fungicides from green tip through petal fall. Rake and destroy fallen leaves and prune for airflow.",
    ),
];

pub struct TreatmentCatalog {
    entries: FxHashMap<&'static str, &'static str>,
}

impl TreatmentCatalog {
    /// Build the catalog. `healthy_advice` controls whether a bare "healthy"
    /// finding gets the no-treatment message or the specialist fallback.
    pub fn new(healthy_advice: bool) -> Self {
        let mut entries: FxHashMap<&'static str, &'static str> =
            TREATMENTS.iter().copied().collect();
        if healthy_advice {
            entries.insert(HEALTHY, NO_TREATMENT_NEEDED);
        }
        Self { entries }
    }

    /// Advisory text for a disease label. Never empty.
    pub fn treatment_for(&self, disease_label: &str) -> &'static str {
        self.entries
            .get(canonical_label(disease_label))
            .copied()
            .unwrap_or(SPECIALIST_FALLBACK)
    }

    pub fn has_entry(&self, disease_label: &str) -> bool {
        self.entries.contains_key(canonical_label(disease_label))
    }
}

impl Default for TreatmentCatalog {
    fn default() -> Self {
        Self::new(true)
    }
}
