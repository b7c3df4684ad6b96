use std::collections::HashSet;

use tokio::sync::RwLock;

/// Identifiers returned by grounding calls during this session. The linter
/// accepts a query only if every identifier in it is in this set.
#[derive(Default)]
pub struct GroundedSet {
    ids: RwLock<HashSet<String>>,
}

impl GroundedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_many<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = self.ids.write().await;
        set.extend(ids.into_iter().map(Into::into));
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.read().await.contains(id)
    }

    /// A copy for one lint pass.
    pub async fn snapshot(&self) -> HashSet<String> {
        self.ids.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ids.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let set = GroundedSet::new();
        set.insert_many(["Q76", "P26"]).await;
        set.insert_many(vec!["Q76".to_string()]).await;
        assert_eq!(set.len().await, 2);
        assert!(set.contains("P26").await);
        assert!(set.snapshot().await.contains("Q76"));
    }
}
