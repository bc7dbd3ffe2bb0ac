//! Correlation id providers.

/// Source of collision-resistant, opaque request ids.
pub trait IdProvider: Send + Sync + 'static {
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs in their 32-character simple form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

impl<F> IdProvider for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn next_id(&self) -> String {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_ids_are_distinct() {
        let ids: HashSet<String> = (0..256).map(|_| UuidProvider.next_id()).collect();
        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| id.len() == 32));
    }
}
