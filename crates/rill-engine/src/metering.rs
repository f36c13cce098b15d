//! Earnings computation against a campaign's rate and remaining budget.

/// Authoritative settled amount: elapsed seconds times the per-second rate,
/// clamped to the remaining budget and never negative.
pub fn settled_earnings(elapsed_seconds: f64, rate_per_second: f64, remaining_budget: f64) -> f64 {
    (elapsed_seconds.max(0.0) * rate_per_second.max(0.0))
        .min(remaining_budget.max(0.0))
        .max(0.0)
}

/// Mid-session projection pushed to the listener. Uncapped: informational
/// display only, never a source of truth.
pub fn projected_earnings(elapsed_seconds: f64, rate_per_second: f64) -> f64 {
    elapsed_seconds.max(0.0) * rate_per_second.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_settled_earnings_is_min_of_accrual_and_budget() {
        assert_eq!(settled_earnings(5.0, 0.01, 1.0), 0.05);
        assert_eq!(settled_earnings(5.0, 0.01, 0.03), 0.03);
        assert_eq!(settled_earnings(0.0, 0.01, 1.0), 0.0);
        assert_eq!(settled_earnings(100.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn unit_settled_earnings_never_leaves_budget_bounds() {
        for (elapsed, rate, budget) in [
            (-5.0, 0.01, 1.0),
            (5.0, -0.01, 1.0),
            (5.0, 0.01, -1.0),
            (1e9, 1e9, 0.25),
        ] {
            let earned = settled_earnings(elapsed, rate, budget);
            assert!(earned >= 0.0);
            assert!(earned <= budget.max(0.0));
        }
    }

    #[test]
    fn unit_projection_is_uncapped() {
        assert_eq!(projected_earnings(500.0, 0.01), 5.0);
    }
}
