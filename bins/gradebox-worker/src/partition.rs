// Result partitioning: what the candidate-facing surface may see
use gradebox_common::types::{CandidateView, HiddenSummary, RunResult};

/// Split results into full detail for visible tiers and a count-only
/// summary for hidden tiers.
pub fn partition_results(results: &[RunResult]) -> CandidateView {
    let (visible, hidden): (Vec<&RunResult>, Vec<&RunResult>) =
        results.iter().partition(|result| result.tier.is_visible());

    CandidateView {
        visible_results: visible.into_iter().cloned().collect(),
        hidden_summary: HiddenSummary {
            total: hidden.len(),
            passed: hidden.iter().filter(|result| result.passed).count(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebox_common::types::Tier;

    fn result(test_id: u32, tier: u8, passed: bool) -> RunResult {
        let tier = Tier::new(tier).unwrap();
        RunResult {
            test_id,
            name: tier.is_visible().then(|| format!("test {}", test_id)),
            tier,
            passed,
            error: (!passed && tier.is_visible()).then(|| "Expected 1 but got 2".to_string()),
            visible: tier.is_visible(),
            execution_time_ms: 1,
        }
    }

    #[test]
    fn test_partition_counts() {
        let results = vec![
            result(1, 1, true),
            result(2, 2, false),
            result(3, 3, true),
            result(4, 4, false),
            result(5, 5, true),
        ];
        let view = partition_results(&results);

        assert_eq!(view.visible_results.len(), 2);
        assert_eq!(view.visible_results[1].error.as_deref(), Some("Expected 1 but got 2"));
        assert_eq!(view.hidden_summary, HiddenSummary { total: 3, passed: 2 });
    }

    #[test]
    fn test_hidden_summary_is_counts_only() {
        let view = partition_results(&[result(9, 4, false)]);
        let json = serde_json::to_value(&view.hidden_summary).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["passed", "total"]);
        assert!(view.visible_results.is_empty());
    }

    #[test]
    fn test_empty_results() {
        let view = partition_results(&[]);
        assert!(view.visible_results.is_empty());
        assert_eq!(view.hidden_summary, HiddenSummary::default());
    }
}
