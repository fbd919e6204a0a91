use pagewright::progress::{SectionProgress, SectionWeight};
use proptest::prelude::*;

fn weights(sizes: &[f64]) -> Vec<SectionWeight> {
    sizes.iter().map(|&size| SectionWeight::new(true, size)).collect()
}

fn progress(sizes: &[f64]) -> SectionProgress {
    SectionProgress::new(&weights(sizes), 1500.0, 1600.0)
}

proptest! {
    #[test]
    fn get_section_inverts_get_progress(
        sizes in prop::collection::vec(1.0f64..50_000.0, 1..12),
        pick in any::<prop::sample::Index>(),
        within in 0.0f64..0.999,
    ) {
        let progress = progress(&sizes);
        let index = pick.index(sizes.len());
        let fraction = progress.get_progress(index, within, 0.0).fraction;
        let (found, found_within) = progress.get_section(fraction);
        prop_assert_eq!(found, index);
        prop_assert!((found_within - within).abs() < 1e-6, "{} vs {}", found_within, within);
    }

    #[test]
    fn section_fractions_are_cumulative(
        sizes in prop::collection::vec(0.0f64..10_000.0, 1..12),
    ) {
        let progress = progress(&sizes);
        let fractions = progress.section_fractions();
        prop_assert_eq!(fractions.len(), sizes.len() + 1);
        prop_assert_eq!(fractions[0], 0.0);
        if sizes.iter().any(|&s| s > 0.0) {
            prop_assert!((fractions[sizes.len()] - 1.0).abs() < 1e-9);
        }
        prop_assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn ends_clamp(sizes in prop::collection::vec(0.0f64..10_000.0, 2..8)) {
        let progress = progress(&sizes);
        prop_assert_eq!(progress.get_section(0.0), (0, 0.0));
        prop_assert_eq!(progress.get_section(-1.0), (0, 0.0));
        prop_assert_eq!(progress.get_section(1.0), (sizes.len() - 1, 1.0));
        prop_assert_eq!(progress.get_section(3.0), (sizes.len() - 1, 1.0));
    }

    #[test]
    fn zero_weight_sections_are_never_returned(
        sizes in prop::collection::vec(prop_oneof![Just(0.0f64), 1.0f64..5_000.0], 2..10),
        fraction in 0.001f64..0.999,
    ) {
        prop_assume!(sizes.iter().any(|&s| s > 0.0));
        let progress = progress(&sizes);
        let (index, _) = progress.get_section(fraction);
        prop_assert!(sizes[index] > 0.0);
    }
}

#[test]
fn non_linear_sections_keep_their_slot() {
    let mut sections = weights(&[1000.0, 1000.0, 1000.0]);
    sections[1].linear = false;
    let progress = SectionProgress::new(&sections, 1500.0, 1600.0);
    let fractions = progress.section_fractions();
    assert_eq!(fractions.len(), 4);
    assert_eq!(fractions[1], fractions[2]);
    assert_eq!(progress.get_section(0.5).0, 2);
}

#[test]
fn location_totals_round_up() {
    let progress = progress(&[1000.0, 1000.0, 1000.0]);
    let p = progress.get_progress(2, 1.0, 0.0);
    assert_eq!(p.location.total, 2);
    assert_eq!(p.section.current, 2);
    assert_eq!(p.section.total, 3);
    assert!((p.fraction - 1.0).abs() < 1e-9);
}
