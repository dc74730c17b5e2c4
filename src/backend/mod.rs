//! The consumed backend contract: a request/response query surface plus a
//! row-level change feed. The hosted store (auth, relational data, row-level
//! security) sits behind [`Backend`]; this crate only describes the shapes it
//! depends on. Filter and ordering semantics are defined here so that fakes
//! and any future concrete client agree on them.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::AppResult;

/// A raw backend row, possibly carrying embedded (joined) resources under
/// their alias keys.
pub type Row = Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(column.to_owned(), value.into())
    }

    pub fn neq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Neq(column.to_owned(), value.into())
    }

    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(column.to_owned(), value.into())
    }

    pub fn is_in(column: &str, values: Vec<Value>) -> Self {
        Filter::In(column.to_owned(), values)
    }

    pub fn matches(&self, row: &Row) -> bool {
        let null = Value::Null;
        match self {
            Filter::Eq(column, value) => row.get(column).unwrap_or(&null) == value,
            Filter::Neq(column, value) => row.get(column).unwrap_or(&null) != value,
            Filter::Gt(column, value) => {
                value_cmp(row.get(column).unwrap_or(&null), value) == Ordering::Greater
            }
            Filter::In(column, values) => values.contains(row.get(column).unwrap_or(&null)),
        }
    }
}

/// Total order over JSON scalars: nulls first, then booleans, numbers,
/// strings. Strings compare lexicographically, which matches chronological
/// order for RFC 3339 timestamps only when their fractional-second width is
/// uniform (a bare `...:00Z` sorts after `...:00.5Z`). Timestamps produced by
/// [`crate::models::fmt_rfc3339`] carry sub-second precision in practice;
/// mixed-precision columns must not rely on this ordering.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// How an embedded resource hangs off the parent row.
#[derive(Debug, Clone)]
pub enum Link {
    /// This table's `column` references a row id in the embedded table.
    /// Yields an object, or null when the reference does not resolve.
    BelongsTo { column: String },
    /// The embedded table's `column` references this row's id. Yields an
    /// array of matching rows.
    HasMany { column: String },
}

#[derive(Debug, Clone)]
pub struct Embed {
    /// Key the joined resource appears under in the result row.
    pub alias: String,
    pub table: String,
    pub link: Link,
    pub embeds: Vec<Embed>,
}

impl Embed {
    pub fn belongs_to(alias: &str, table: &str, column: &str) -> Self {
        Self {
            alias: alias.to_owned(),
            table: table.to_owned(),
            link: Link::BelongsTo {
                column: column.to_owned(),
            },
            embeds: Vec::new(),
        }
    }

    pub fn has_many(alias: &str, table: &str, column: &str) -> Self {
        Self {
            alias: alias.to_owned(),
            table: table.to_owned(),
            link: Link::HasMany {
                column: column.to_owned(),
            },
            embeds: Vec::new(),
        }
    }

    pub fn nest(mut self, child: Embed) -> Self {
        self.embeds.push(child);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    pub embeds: Vec<Embed>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(name: &str) -> Self {
        Self {
            table: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_owned(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level notification from the change feed. The payload carries the
/// changed row's values but none of its joined resources.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub row: Row,
}

/// One registration on a change-feed channel.
#[derive(Debug, Clone)]
pub struct ChangeBinding {
    /// `None` listens to every change kind.
    pub kind: Option<ChangeKind>,
    pub table: String,
    pub filter: Option<Filter>,
}

impl ChangeBinding {
    pub fn any(table: &str) -> Self {
        Self {
            kind: None,
            table: table.to_owned(),
            filter: None,
        }
    }

    pub fn insert(table: &str) -> Self {
        Self {
            kind: Some(ChangeKind::Insert),
            table: table.to_owned(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.table == event.table
            && self.kind.is_none_or(|kind| kind == event.kind)
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&event.row))
    }
}

/// A live change-feed channel. Dropping it releases the channel; holding it
/// past the life of the consuming view leaks one channel per visit.
pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    bindings: Vec<ChangeBinding>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<ChangeEvent>, bindings: Vec<ChangeBinding>) -> Self {
        Self { rx, bindings }
    }

    /// Next event matching any binding, or `None` once the feed closes.
    /// Events missed under lag are skipped: every consumer re-derives its
    /// view from source rows instead of patching deltas, so a dropped
    /// notification costs at most one refresh.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.bindings.iter().any(|b| b.matches(&event)) => {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, query: Query) -> AppResult<Vec<Row>>;

    async fn insert(&self, table: &str, record: Row) -> AppResult<Row>;

    async fn update(&self, table: &str, patch: Row, filters: Vec<Filter>) -> AppResult<Vec<Row>>;

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> AppResult<Vec<Row>>;

    async fn subscribe(&self, bindings: Vec<ChangeBinding>) -> AppResult<Subscription>;
}

pub fn decode<T: DeserializeOwned>(row: Row) -> AppResult<T> {
    Ok(serde_json::from_value(row)?)
}

pub fn decode_all<T: DeserializeOwned>(rows: Vec<Row>) -> AppResult<Vec<T>> {
    rows.into_iter().map(decode).collect()
}
