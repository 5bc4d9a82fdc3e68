//! Fertilizer Advisor
//!
//! Static per-crop rule table. Deficiencies are checked in strict priority
//! order (N, then P, then K); the first one below the threshold decides.

/// Below this value (kg/ha) a nutrient counts as deficient
pub const NPK_LOW_THRESHOLD: f64 = 30.0;

/// Returned for crops that have no entry in the table
pub const GENERIC_FERTILIZER_ADVICE: &str =
    "General purpose NPK fertilizer recommended. Consult local agricultural extension for specific advice.";

/// Fertilizer choices for one crop
#[derive(Debug, Clone)]
pub struct FertilizerPlan {
    pub crop: &'static str,
    pub low_n: &'static str,
    pub low_p: &'static str,
    pub low_k: &'static str,
    pub balanced: &'static str,
}

static FERTILIZER_TABLE: &[FertilizerPlan] = &[
    FertilizerPlan {
        crop: "rice",
        low_n: "Urea",
        low_p: "Single Superphosphate",
        low_k: "Muriate of Potash",
        balanced: "NPK 10-26-26",
    },
    FertilizerPlan {
        crop: "wheat",
        low_n: "Ammonium Sulfate",
        low_p: "Diammonium Phosphate",
        low_k: "Sulfate of Potash",
        balanced: "NPK 12-32-16",
    },
];

/// Look up the plan for a crop label (exact match)
pub fn plan_for(crop: &str) -> Option<&'static FertilizerPlan> {
    FERTILIZER_TABLE.iter().find(|plan| plan.crop == crop)
}

/// Recommend a fertilizer for the predicted crop given the measured N, P and K
pub fn recommend_fertilizer(n: f64, p: f64, k: f64, crop: &str) -> &'static str {
    let Some(plan) = plan_for(crop) else {
        return GENERIC_FERTILIZER_ADVICE;
    };

    if n < NPK_LOW_THRESHOLD {
        plan.low_n
    } else if p < NPK_LOW_THRESHOLD {
        plan.low_p
    } else if k < NPK_LOW_THRESHOLD {
        plan.low_k
    } else {
        plan.balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_nitrogen_wins_over_everything() {
        for plan in FERTILIZER_TABLE {
            for (p, k) in [(0.0, 0.0), (10.0, 90.0), (90.0, 10.0), (90.0, 90.0)] {
                assert_eq!(recommend_fertilizer(29.9, p, k, plan.crop), plan.low_n);
            }
        }
    }

    #[test]
    fn test_priority_order() {
        assert_eq!(recommend_fertilizer(40.0, 10.0, 10.0, "rice"), "Single Superphosphate");
        assert_eq!(recommend_fertilizer(40.0, 40.0, 10.0, "rice"), "Muriate of Potash");
        assert_eq!(recommend_fertilizer(40.0, 40.0, 40.0, "rice"), "NPK 10-26-26");
        assert_eq!(recommend_fertilizer(40.0, 40.0, 10.0, "wheat"), "Sulfate of Potash");
    }

    #[test]
    fn test_threshold_is_strict() {
        // Exactly 30 is not deficient
        assert_eq!(recommend_fertilizer(30.0, 30.0, 30.0, "wheat"), "NPK 12-32-16");
    }

    #[test]
    fn test_unknown_crop_gets_generic_advice() {
        for (n, p, k) in [(0.0, 0.0, 0.0), (100.0, 100.0, 100.0), (-5.0, 50.0, 12.0)] {
            assert_eq!(recommend_fertilizer(n, p, k, "mango"), GENERIC_FERTILIZER_ADVICE);
        }
        // Labels are case sensitive
        assert_eq!(recommend_fertilizer(10.0, 50.0, 50.0, "Rice"), GENERIC_FERTILIZER_ADVICE);
    }
}
