//! Pipeline identifier generation.

use uuid::Uuid;

const GENERATED_PREFIX: &str = "run-";

/// Generates a time-ordered pipeline id, `run-<uuid v7>`.
#[must_use]
pub fn generate_pipeline_id() -> String {
    format!("{GENERATED_PREFIX}{}", Uuid::now_v7())
}

/// Returns true if `id` has the shape produced by [`generate_pipeline_id`].
#[must_use]
pub fn is_generated_id(id: &str) -> bool {
    id.strip_prefix(GENERATED_PREFIX)
        .and_then(|rest| Uuid::parse_str(rest).ok())
        .is_some_and(|uuid| uuid.get_version_num() == 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_recognised() {
        let a = generate_pipeline_id();
        let b = generate_pipeline_id();
        assert_ne!(a, b);
        assert!(is_generated_id(&a));
        assert!(!is_generated_id("p1"));
        assert!(!is_generated_id(&format!("run-{}", Uuid::new_v4())));
    }

    #[test]
    fn test_generated_ids_sort_by_creation() {
        let ids: Vec<String> = (0..5).map(|_| generate_pipeline_id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
