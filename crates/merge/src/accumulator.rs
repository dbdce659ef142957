use extract::Fragment;

/// Join-point reducer: appends a branch's fragments to everything gathered so
/// far. Plain concatenation, so items keep their extraction order and no
/// deduplication happens here.
pub fn combine(existing: Vec<Fragment>, new: Vec<Fragment>) -> Vec<Fragment> {
    let mut combined = existing;
    combined.extend(new);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Observation, SectionItem, SectionType};

    fn obs_fragment(names: &[&str]) -> Fragment {
        Fragment {
            section_type: SectionType::Observations,
            items: names
                .iter()
                .map(|n| SectionItem::Observation(Observation::new(n, "1", None, None)))
                .collect(),
            patient_candidate: None,
        }
    }

    #[test]
    fn test_empty_is_identity() {
        let a = vec![obs_fragment(&["A"])];
        assert_eq!(combine(Vec::new(), a.clone()), a);
        assert_eq!(combine(a.clone(), Vec::new()), a);
    }

    #[test]
    fn test_associative() {
        let (a, b, c) = (
            vec![obs_fragment(&["A"])],
            vec![obs_fragment(&["B"])],
            vec![obs_fragment(&["C1", "C2"])],
        );

        let left = combine(combine(a.clone(), b.clone()), c.clone());
        let right = combine(a, combine(b, c));
        assert_eq!(left, right);
    }

    #[test]
    fn test_keeps_item_order_within_fragment() {
        let combined = combine(vec![obs_fragment(&["A"])], vec![obs_fragment(&["X", "Y", "Z"])]);
        assert_eq!(combined[1], obs_fragment(&["X", "Y", "Z"]));
    }
}
