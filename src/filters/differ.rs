//! Minimal updates from an evaluation
//!
//! Only attributes whose target value differs from the stored one end up in
//! the update. Unknown and known are different values.

use crate::filters::policy::Evaluation;
use crate::models::{Nest, NestPartialUpdate};

/// Build the sparse update that moves `nest` to the evaluated state.
///
/// Returns `None` when nothing changes. A nest that ends up inactive loses
/// its `pokemon_id` in the same update.
pub fn build_update(nest: &Nest, evaluation: &Evaluation) -> Option<NestPartialUpdate> {
    let mut update = NestPartialUpdate::default();

    let discarded = evaluation.classification.discarded();
    if nest.discarded != discarded {
        update.discarded = Some(discarded);
    }
    if nest.m2 != evaluation.m2 {
        update.m2 = Some(evaluation.m2);
    }
    if nest.spawnpoints != evaluation.spawnpoints {
        update.spawnpoints = Some(evaluation.spawnpoints);
    }

    let active = evaluation.classification.is_active();
    if nest.active != Some(active) {
        update.active = Some(Some(active));
    }
    if !active && nest.pokemon_id.is_some() {
        update.pokemon_id = Some(None);
    }

    if update.is_empty() {
        None
    } else {
        Some(update)
    }
}

/// Set the `updated` timestamp (epoch seconds).
pub fn stamp(update: &mut NestPartialUpdate, now: i64) {
    update.updated = Some(Some(now));
}

/// The nest as it reads after `update` has been written.
pub fn apply(nest: &Nest, update: &NestPartialUpdate) -> Nest {
    let mut updated = nest.clone();
    update.apply_to(&mut updated);
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::policy::Classification;
    use crate::models::DiscardReason;

    fn active_nest() -> Nest {
        Nest {
            nest_id: 9,
            name: "Lake".into(),
            area_name: None,
            lat: 0.0,
            lon: 0.0,
            polygon: None,
            m2: Some(2500.0),
            spawnpoints: Some(30),
            pokemon_id: Some(133),
            active: Some(true),
            discarded: None,
            updated: Some(100),
        }
    }

    fn evaluation(
        m2: Option<f64>,
        spawnpoints: Option<i64>,
        classification: Classification,
    ) -> Evaluation {
        Evaluation {
            m2,
            spawnpoints,
            classification,
            explanations: Vec::new(),
        }
    }

    #[test]
    fn test_up_to_date_nest_has_no_update() {
        let nest = active_nest();
        let eval = evaluation(Some(2500.0), Some(30), Classification::Active);
        assert_eq!(build_update(&nest, &eval), None);
    }

    #[test]
    fn test_deactivation_clears_pokemon() {
        let nest = active_nest();
        let eval = evaluation(
            Some(2500.0),
            Some(4),
            Classification::Discarded(DiscardReason::Spawnpoints),
        );

        let update = build_update(&nest, &eval).unwrap();
        assert_eq!(
            update,
            NestPartialUpdate {
                discarded: Some(Some(DiscardReason::Spawnpoints)),
                spawnpoints: Some(Some(4)),
                active: Some(Some(false)),
                pokemon_id: Some(None),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_invalid_resets_derived_attributes() {
        let nest = active_nest();
        let eval = evaluation(None, None, Classification::Discarded(DiscardReason::Invalid));

        let update = build_update(&nest, &eval).unwrap();
        assert_eq!(update.m2, Some(None));
        assert_eq!(update.spawnpoints, Some(None));
        assert_eq!(update.discarded, Some(Some(DiscardReason::Invalid)));
        assert_eq!(update.pokemon_id, Some(None));
        assert_eq!(update.updated, None);
    }

    #[test]
    fn test_reactivation_clears_discard_reason() {
        let nest = Nest {
            active: Some(false),
            discarded: Some(DiscardReason::Area),
            pokemon_id: None,
            ..active_nest()
        };
        let eval = evaluation(Some(2500.0), Some(30), Classification::Active);

        let update = build_update(&nest, &eval).unwrap();
        assert_eq!(update.discarded, Some(None));
        assert_eq!(update.active, Some(Some(true)));
        assert_eq!(update.pokemon_id, None);
    }

    #[test]
    fn test_unknown_to_known_is_a_change() {
        let nest = Nest {
            m2: None,
            spawnpoints: None,
            active: None,
            pokemon_id: None,
            ..active_nest()
        };
        let eval = evaluation(Some(2500.0), None, Classification::Active);

        let update = build_update(&nest, &eval).unwrap();
        assert_eq!(update.changed_fields(), vec!["m2", "active"]);
    }

    #[test]
    fn test_stamp_and_apply() {
        let nest = active_nest();
        let overlap = Classification::Discarded(DiscardReason::Overlap);
        let eval = evaluation(Some(2500.0), Some(30), overlap);

        let mut update = build_update(&nest, &eval).unwrap();
        stamp(&mut update, 1_700_000_000);

        let applied = apply(&nest, &update);
        assert_eq!(applied.active, Some(false));
        assert_eq!(applied.discarded, Some(DiscardReason::Overlap));
        assert_eq!(applied.pokemon_id, None);
        assert_eq!(applied.updated, Some(1_700_000_000));
        // caller's copy untouched
        assert_eq!(nest.active, Some(true));
    }
}
