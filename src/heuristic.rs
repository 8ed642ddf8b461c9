//! Neighbor-selection heuristic: a diversity-aware prune over a
//! candidate pool, fixed to the "simple extend with pruning" variant (see
//! `DESIGN.md` for why the `extend_candidates`/`keep_pruned` toggles some
//! implementations expose were dropped).

use ordered_float::OrderedFloat;

use crate::types::Candidate;

/// Select up to `m` of `candidates` for a node whose distances to the
/// selection center are already recorded in each candidate's `distance`
/// field.
///
/// Candidates are considered in ascending distance order. The closest is
/// always admitted; each subsequent candidate `c` is admitted only if no
/// already-selected neighbor `r` is strictly closer to `c` than `c` is to
/// the center — i.e. `c` isn't redundant with something already chosen.
/// Ties in distance break on the smaller point id (already encoded in
/// `Candidate`'s `Ord` impl).
pub fn select_neighbors(
    candidates: &[Candidate],
    m: usize,
    pairwise_distance: impl Fn(Candidate, Candidate) -> f32,
) -> Vec<Candidate> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable();

    let mut selected: Vec<Candidate> = Vec::with_capacity(m.min(sorted.len()));
    for candidate in sorted {
        if selected.len() >= m {
            break;
        }

        let admit = selected
            .iter()
            .all(|&r| candidate.distance < OrderedFloat(pairwise_distance(candidate, r)));

        if admit {
            selected.push(candidate);
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PointId;

    fn candidate(id: u32, distance: f32) -> Candidate {
        Candidate {
            distance: OrderedFloat(distance),
            pid: PointId(id),
        }
    }

    #[test]
    fn closest_candidate_is_always_admitted() {
        let candidates = vec![candidate(0, 1.0)];
        let result = select_neighbors(&candidates, 5, |_, _| 0.0);
        assert_eq!(result, candidates);
    }

    #[test]
    fn redundant_candidate_behind_a_closer_neighbor_is_pruned() {
        // c is farther from the center than from an already-selected
        // neighbor r, so it's redundant and should be skipped.
        let a = candidate(0, 1.0);
        let b = candidate(1, 2.0);
        let candidates = vec![a, b];
        let result = select_neighbors(&candidates, 5, |_, _| 0.1);
        assert_eq!(result, vec![a]);
    }

    #[test]
    fn bridging_candidate_farther_from_selected_than_from_center_is_kept() {
        let a = candidate(0, 1.0);
        let b = candidate(1, 2.0);
        let candidates = vec![a, b];
        let result = select_neighbors(&candidates, 5, |_, _| 100.0);
        assert_eq!(result, vec![a, b]);
    }

    #[test]
    fn stops_at_target_degree() {
        let candidates = vec![candidate(0, 1.0), candidate(1, 2.0), candidate(2, 3.0)];
        let result = select_neighbors(&candidates, 1, |_, _| 100.0);
        assert_eq!(result.len(), 1);
    }
}
