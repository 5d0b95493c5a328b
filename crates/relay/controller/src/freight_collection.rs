//! Builds the Freight collection a Promotion delivers to its Stage

use relay_types::{FreightCollection, FreightReference, Stage};
use tracing::debug;

/// Merge `target` into the Freight the Stage received from its last
/// Promotion.
///
/// Only Stages requesting more than one origin inherit anything, and only
/// for origins they still request, in request order. The target replaces
/// the entry for its own origin in place or is appended.
pub fn build_freight_collection(target: &FreightReference, stage: &Stage) -> FreightCollection {
    let mut collection = FreightCollection::new();

    if stage.spec.requested_freight.len() > 1 {
        let inherited = stage
            .status
            .last_promotion
            .as_ref()
            .and_then(|p| p.status.as_ref())
            .and_then(|s| s.freight_collection.as_ref());

        match inherited {
            Some(previous) => {
                for request in &stage.spec.requested_freight {
                    if let Some(reference) = previous.get(&request.origin) {
                        collection.update_or_push(reference.clone());
                    }
                }
            }
            None => debug!(stage = %stage.metadata.name, "last promotion has no collection to inherit Freight from"),
        }
    }

    collection.update_or_push(target.clone());
    collection
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{
        FreightOrigin, FreightRequest, ObjectMeta, PromotionReference, PromotionStatus, StageSpec,
    };

    fn reference(name: &str, origin: &str) -> FreightReference {
        FreightReference::new(name, FreightOrigin::warehouse(origin))
    }

    fn stage(origins: &[&str], last: Option<FreightCollection>) -> Stage {
        let mut stage = Stage::new(
            ObjectMeta::new("demo", "prod"),
            StageSpec {
                requested_freight: origins
                    .iter()
                    .map(|o| FreightRequest::direct(FreightOrigin::warehouse(*o)))
                    .collect(),
                verification: None,
            },
        );
        stage.status.last_promotion = last.map(|c| PromotionReference {
            status: Some(PromotionStatus {
                freight_collection: Some(c),
                ..Default::default()
            }),
            ..PromotionReference::named("previous")
        });
        stage
    }

    fn previous() -> FreightCollection {
        let mut c = FreightCollection::new();
        c.update_or_push(reference("f1", "a"));
        c.update_or_push(reference("f2", "b"));
        c
    }

    fn names(c: &FreightCollection) -> Vec<(String, String)> {
        c.references()
            .map(|r| (r.origin.name.clone(), r.name.clone()))
            .collect()
    }

    #[test]
    fn test_multi_origin_inherits_and_replaces_in_place() {
        let result = build_freight_collection(&reference("f3", "a"), &stage(&["a", "b"], Some(previous())));
        assert_eq!(
            names(&result),
            vec![("a".into(), "f3".into()), ("b".into(), "f2".into())]
        );
    }

    #[test]
    fn test_single_origin_does_not_inherit() {
        let result = build_freight_collection(&reference("f3", "a"), &stage(&["a"], Some(previous())));
        assert_eq!(names(&result), vec![("a".into(), "f3".into())]);
    }

    #[test]
    fn test_no_longer_requested_origins_dropped() {
        let result =
            build_freight_collection(&reference("f4", "c"), &stage(&["c", "a"], Some(previous())));
        assert_eq!(
            names(&result),
            vec![("a".into(), "f1".into()), ("c".into(), "f4".into())]
        );
    }

    #[test]
    fn test_no_last_promotion() {
        let result = build_freight_collection(&reference("f3", "b"), &stage(&["a", "b"], None));
        assert_eq!(names(&result), vec![("b".into(), "f3".into())]);
    }
}
