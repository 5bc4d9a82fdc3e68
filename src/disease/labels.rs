//! Disease labels: sentinels, the legacy vocabulary and label canonicalisation.

/// No detector or legacy handle was ever loaded
pub const MODEL_NOT_LOADED: &str = "Model Not Loaded";

/// Inference or result parsing failed
pub const ERROR_DURING_PREDICTION: &str = "Error During Prediction";

/// Detector ran and found nothing, with no legacy fallback
pub const HEALTHY: &str = "healthy";

/// Output vocabulary of the legacy 5-class classifier, in output index order
pub const LEGACY_CATEGORIES: [&str; 5] = [
    "Corn_(maize)___Cercospora_leaf_spot Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___healthy",
    "Peach___Bacterial_spot",
    "Peach___healthy",
];

/// Detector spellings that share a catalog key with another label
static LABEL_ALIASES: &[(&str, &str)] = &[("Apple Scab Leaf", "Apple___Apple_scab")];

/// Map a recognizer label to its canonical catalog key
pub fn canonical_label(label: &str) -> &str {
    LABEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == label)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(label)
}
