use crate::record::{
    merge_updates, Item, ItemKey, PutCondition, Query, RecordStore, Table, UpdateCondition,
};
use async_trait::async_trait;
use callcoord_core::{CoordError, CoordResult};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory record store for tests and single-process deployments.
pub struct MemoryRecordStore {
    items: RwLock<HashMap<(Table, ItemKey), Item>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Number of items held in `table`.
    pub async fn len(&self, table: Table) -> usize {
        let items = self.items.read().await;
        items.keys().filter(|(t, _)| *t == table).count()
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, table: Table, key: &ItemKey) -> CoordResult<Option<Item>> {
        let items = self.items.read().await;
        Ok(items.get(&(table, key.clone())).cloned())
    }

    async fn put(
        &self,
        table: Table,
        key: &ItemKey,
        item: Item,
        condition: PutCondition,
    ) -> CoordResult<()> {
        let mut items = self.items.write().await;
        let slot = (table, key.clone());
        if condition == PutCondition::IfAbsent && items.contains_key(&slot) {
            return Err(CoordError::Conflict(format!("{table} item {key} already exists")));
        }
        items.insert(slot, item);
        Ok(())
    }

    async fn update(
        &self,
        table: Table,
        key: &ItemKey,
        updates: Item,
        condition: UpdateCondition,
    ) -> CoordResult<()> {
        let mut items = self.items.write().await;
        match items.get_mut(&(table, key.clone())) {
            Some(existing) => {
                merge_updates(existing, updates);
                Ok(())
            }
            None if condition == UpdateCondition::Upsert => {
                let mut fresh = Item::new();
                merge_updates(&mut fresh, updates);
                items.insert((table, key.clone()), fresh);
                Ok(())
            }
            None => Err(CoordError::Conflict(format!("{table} item {key} does not exist"))),
        }
    }

    async fn query(&self, table: Table, query: &Query) -> CoordResult<Vec<Item>> {
        let items = self.items.read().await;
        let matched = items
            .iter()
            .filter(|((t, _), item)| *t == table && query.matches(item))
            .map(|(_, item)| item.clone())
            .collect();
        Ok(query.finish(matched))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(v: serde_json::Value) -> Item {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn put_if_absent_rejects_existing() {
        let store = MemoryRecordStore::new();
        let key = ItemKey::simple("a1");
        store
            .put(Table::Agents, &key, item(json!({"agent_id": "a1"})), PutCondition::IfAbsent)
            .await
            .unwrap();
        let err = store
            .put(Table::Agents, &key, item(json!({"agent_id": "a1"})), PutCondition::IfAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Conflict(_)));
        assert_eq!(store.len(Table::Agents).await, 1);
    }

    #[tokio::test]
    async fn update_if_exists_rejects_missing() {
        let store = MemoryRecordStore::new();
        let err = store
            .update(
                Table::Calls,
                &ItemKey::composite("a1", "CA1"),
                item(json!({"status": "completed"})),
                UpdateCondition::IfExists,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Conflict(_)));
    }

    #[tokio::test]
    async fn upsert_creates_then_merges() {
        let store = MemoryRecordStore::new();
        let key = ItemKey::composite("a1", "CA1");
        store
            .update(Table::Calls, &key, item(json!({"x": 1})), UpdateCondition::Upsert)
            .await
            .unwrap();
        store
            .update(Table::Calls, &key, item(json!({"y": 2})), UpdateCondition::IfExists)
            .await
            .unwrap();
        let got = store.get(Table::Calls, &key).await.unwrap().unwrap();
        assert_eq!(serde_json::Value::Object(got), json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn tables_are_isolated() {
        let store = MemoryRecordStore::new();
        let key = ItemKey::simple("same");
        store
            .put(Table::Agents, &key, item(json!({"kind": "agent"})), PutCondition::Always)
            .await
            .unwrap();
        assert!(store.get(Table::Calls, &key).await.unwrap().is_none());
        let all = store.query(Table::Calls, &Query::new()).await.unwrap();
        assert!(all.is_empty());
    }
}
