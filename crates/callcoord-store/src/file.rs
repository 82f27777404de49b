use crate::record::{
    merge_updates, Item, ItemKey, PutCondition, Query, RecordStore, Table, UpdateCondition,
};
use async_trait::async_trait;
use callcoord_core::{CoordError, CoordResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// File-based record store: one JSON document per item, one directory per table.
///
/// Writes go through a temp file and a rename so readers never see a torn item.
pub struct FileRecordStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRecordStore {
    pub async fn new(dir: PathBuf) -> CoordResult<Self> {
        for table in [Table::Agents, Table::Calls] {
            tokio::fs::create_dir_all(dir.join(table.name()))
                .await
                .map_err(io_error)?;
        }
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn item_path(&self, table: Table, key: &ItemKey) -> PathBuf {
        let name = match &key.sort {
            Some(sort) => format!("{}.{}", hex::encode(&key.partition), hex::encode(sort)),
            None => hex::encode(&key.partition),
        };
        self.dir.join(table.name()).join(format!("{name}.json"))
    }

    async fn read_item(path: &Path) -> CoordResult<Option<Item>> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => {
                let item: Item = serde_json::from_str(&data).map_err(|e| {
                    CoordError::Store(format!("Failed to parse {}: {e}", path.display()))
                })?;
                Ok(Some(item))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn write_item(path: &Path, item: &Item) -> CoordResult<()> {
        let json = serde_json::to_string_pretty(item)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, path).await.map_err(io_error)?;
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> CoordError {
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            CoordError::TransientStore(e.to_string())
        }
        _ => CoordError::Store(e.to_string()),
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, table: Table, key: &ItemKey) -> CoordResult<Option<Item>> {
        Self::read_item(&self.item_path(table, key)).await
    }

    async fn put(
        &self,
        table: Table,
        key: &ItemKey,
        item: Item,
        condition: PutCondition,
    ) -> CoordResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.item_path(table, key);
        if condition == PutCondition::IfAbsent && Self::read_item(&path).await?.is_some() {
            return Err(CoordError::Conflict(format!("{table} item {key} already exists")));
        }
        Self::write_item(&path, &item).await
    }

    async fn update(
        &self,
        table: Table,
        key: &ItemKey,
        updates: Item,
        condition: UpdateCondition,
    ) -> CoordResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.item_path(table, key);
        let mut item = match Self::read_item(&path).await? {
            Some(item) => item,
            None if condition == UpdateCondition::Upsert => Item::new(),
            None => {
                return Err(CoordError::Conflict(format!("{table} item {key} does not exist")))
            }
        };
        merge_updates(&mut item, updates);
        Self::write_item(&path, &item).await
    }

    async fn query(&self, table: Table, query: &Query) -> CoordResult<Vec<Item>> {
        let mut entries = tokio::fs::read_dir(self.dir.join(table.name()))
            .await
            .map_err(io_error)?;
        let mut matched = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(item) = Self::read_item(&path).await? {
                if query.matches(&item) {
                    matched.push(item);
                }
            }
        }
        Ok(query.finish(matched))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn item(v: serde_json::Value) -> Item {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn put_get_across_instances() {
        let tmp = TempDir::new().unwrap();
        let key = ItemKey::composite("agent/1", "CA 1");
        {
            let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
            store
                .put(Table::Calls, &key, item(json!({"call_id": "CA 1"})), PutCondition::IfAbsent)
                .await
                .unwrap();
        }
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        let got = store.get(Table::Calls, &key).await.unwrap().unwrap();
        assert_eq!(got["call_id"], "CA 1");
    }

    #[tokio::test]
    async fn missing_item_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        assert!(store
            .get(Table::Agents, &ItemKey::simple("nope"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn conditional_writes() {
        let tmp = TempDir::new().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        let key = ItemKey::simple("a1");

        let err = store
            .update(Table::Agents, &key, item(json!({"status": "inactive"})), UpdateCondition::IfExists)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordError::Conflict(_)));

        store
            .put(Table::Agents, &key, item(json!({"status": "active", "name": "A"})), PutCondition::IfAbsent)
            .await
            .unwrap();
        store
            .update(Table::Agents, &key, item(json!({"status": "inactive"})), UpdateCondition::IfExists)
            .await
            .unwrap();
        let got = store.get(Table::Agents, &key).await.unwrap().unwrap();
        assert_eq!(got["status"], "inactive");
        assert_eq!(got["name"], "A");
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let tmp = TempDir::new().unwrap();
        let store = FileRecordStore::new(tmp.path().to_path_buf()).await.unwrap();
        for (i, status) in ["completed", "in-progress", "in-progress"].iter().enumerate() {
            store
                .put(
                    Table::Calls,
                    &ItemKey::composite("a1", format!("CA{i}")),
                    item(json!({
                        "call_id": format!("CA{i}"),
                        "status": status,
                        "started_at": format!("2025-01-0{}T00:00:00.000000Z", i + 1),
                    })),
                    PutCondition::Always,
                )
                .await
                .unwrap();
        }

        let q = Query::new().eq("status", "in-progress").newest_first("started_at");
        let out = store.query(Table::Calls, &q).await.unwrap();
        let ids: Vec<&str> = out.iter().map(|i| i["call_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["CA2", "CA1"]);
    }
}
