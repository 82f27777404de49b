use async_trait::async_trait;
use callcoord_core::CoordResult;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A raw stored item: a flat JSON object of attributes.
pub type Item = serde_json::Map<String, Value>;

/// Entity collections held by the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// Agent configurations, keyed by agent id.
    Agents,
    /// Call records, keyed by (agent id, call id).
    Calls,
}

impl Table {
    /// Stable name used for directories and log fields.
    pub fn name(self) -> &'static str {
        match self {
            Table::Agents => "agents",
            Table::Calls => "calls",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Primary key of an item: a partition key plus an optional sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    /// Partition key value.
    pub partition: String,
    /// Sort key value, for composite keys.
    pub sort: Option<String>,
}

impl ItemKey {
    /// A single-attribute key.
    pub fn simple(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    /// A composite key.
    pub fn composite(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "{}/{}", self.partition, sort),
            None => f.write_str(&self.partition),
        }
    }
}

/// Condition attached to a `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Overwrite unconditionally.
    Always,
    /// Fail with `Conflict` if the key already exists.
    IfAbsent,
}

/// Condition attached to an `update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCondition {
    /// Fail with `Conflict` if the key does not exist.
    IfExists,
    /// Create the item from the updates if the key does not exist.
    Upsert,
}

/// A predicate on one attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Attribute equals the value.
    Eq(String, Value),
    /// String attribute starts with the prefix.
    BeginsWith(String, String),
}

impl Filter {
    fn matches(&self, item: &Item) -> bool {
        match self {
            Filter::Eq(attr, expected) => item.get(attr) == Some(expected),
            Filter::BeginsWith(attr, prefix) => item
                .get(attr)
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
        }
    }
}

/// A range query over one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// All filters must match.
    pub filters: Vec<Filter>,
    /// Attribute to order results by.
    pub order_by: Option<String>,
    /// Order descending (most recent first for timestamps).
    pub descending: bool,
    /// Maximum number of items returned.
    pub limit: Option<usize>,
}

impl Query {
    /// An unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality filter.
    pub fn eq(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(attr.into(), value.into()));
        self
    }

    /// Adds a prefix filter.
    pub fn begins_with(mut self, attr: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.filters
            .push(Filter::BeginsWith(attr.into(), prefix.into()));
        self
    }

    /// Orders by `attr`, newest/largest first.
    pub fn newest_first(mut self, attr: impl Into<String>) -> Self {
        self.order_by = Some(attr.into());
        self.descending = true;
        self
    }

    /// Orders by `attr`, oldest/smallest first.
    pub fn oldest_first(mut self, attr: impl Into<String>) -> Self {
        self.order_by = Some(attr.into());
        self.descending = false;
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `item` passes every filter.
    pub fn matches(&self, item: &Item) -> bool {
        self.filters.iter().all(|f| f.matches(item))
    }

    /// Orders and truncates already-filtered items.
    pub fn finish(&self, mut items: Vec<Item>) -> Vec<Item> {
        if let Some(attr) = &self.order_by {
            items.sort_by(|a, b| {
                let ord = compare_values(a.get(attr), b.get(attr));
                if self.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

/// Total order over optional JSON scalars: missing < numbers < strings < others.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(_) => 3,
        }
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Applies a shallow merge: each update attribute replaces the stored one,
/// and a `null` update removes the attribute.
pub fn merge_updates(item: &mut Item, updates: Item) {
    for (attr, value) in updates {
        if value.is_null() {
            item.remove(&attr);
        } else {
            item.insert(attr, value);
        }
    }
}

/// Raw key-value storage backend for the durable store.
///
/// Implementations report retryable failures as `CoordError::TransientStore`,
/// rejected conditional writes as `CoordError::Conflict`, and anything else
/// as `CoordError::Store`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one item.
    async fn get(&self, table: Table, key: &ItemKey) -> CoordResult<Option<Item>>;

    /// Write a whole item.
    async fn put(
        &self,
        table: Table,
        key: &ItemKey,
        item: Item,
        condition: PutCondition,
    ) -> CoordResult<()>;

    /// Merge attributes into an item.
    async fn update(
        &self,
        table: Table,
        key: &ItemKey,
        updates: Item,
        condition: UpdateCondition,
    ) -> CoordResult<()>;

    /// Return items matching `query`, ordered and limited as requested.
    async fn query(&self, table: Table, query: &Query) -> CoordResult<Vec<Item>>;
}
