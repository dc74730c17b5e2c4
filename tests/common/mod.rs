//! Shared fakes for the integration tests: an in-memory backend with join
//! and change-feed support, a switchable identity, and a recording object
//! store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Value, json};
use time::{Duration, OffsetDateTime};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use greenloop::backend::{
    Backend, ChangeBinding, ChangeEvent, ChangeKind, Embed, Filter, Link, Query, Row,
    Subscription, value_cmp,
};
use greenloop::error::{AppError, AppResult};
use greenloop::models::fmt_rfc3339;
use greenloop::session::{AuthSession, Identity, SessionContext};
use greenloop::storage::{ObjectStore, UploadOptions};

type Tables = BTreeMap<String, Vec<Row>>;

pub struct MemoryBackend {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<ChangeEvent>,
    fail_updates_on: Mutex<Option<String>>,
    fail_selects_on: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tables: Mutex::new(Tables::new()),
            feed: broadcast::channel(64).0,
            fail_updates_on: Mutex::new(None),
            fail_selects_on: Mutex::new(None),
        })
    }

    /// Inserts without emitting a change event, for test setup.
    pub fn seed(&self, table: &str, row: Value) {
        self.lock_tables()
            .entry(table.to_owned())
            .or_default()
            .push(row);
    }

    /// Makes every subsequent update on `table` fail.
    pub fn fail_updates_on(&self, table: &str) {
        *self
            .fail_updates_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(table.to_owned());
    }

    /// Makes every subsequent select on `table` fail.
    pub fn fail_selects_on(&self, table: &str) {
        *self
            .fail_selects_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(table.to_owned());
    }

    pub fn heal(&self) {
        *self
            .fail_updates_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        *self
            .fail_selects_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Number of live change-feed subscriptions.
    pub fn feed_receivers(&self) -> usize {
        self.feed.receiver_count()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock_tables().get(table).cloned().unwrap_or_default()
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, kind: ChangeKind, table: &str, row: Row) {
        let _ = self.feed.send(ChangeEvent {
            kind,
            table: table.to_owned(),
            row,
        });
    }
}

fn apply_embeds(tables: &Tables, row: &mut Row, embeds: &[Embed]) {
    for embed in embeds {
        let value = match &embed.link {
            Link::BelongsTo { column } => {
                let fk = row.get(column).cloned().unwrap_or(Value::Null);
                if fk.is_null() {
                    Value::Null
                } else {
                    match tables
                        .get(&embed.table)
                        .and_then(|rows| rows.iter().find(|r| r.get("id") == Some(&fk)))
                    {
                        Some(found) => {
                            let mut child = found.clone();
                            apply_embeds(tables, &mut child, &embed.embeds);
                            child
                        }
                        None => Value::Null,
                    }
                }
            }
            Link::HasMany { column } => {
                let id = row.get("id").cloned().unwrap_or(Value::Null);
                let children: Vec<Row> = tables
                    .get(&embed.table)
                    .map(|rows| {
                        rows.iter()
                            .filter(|r| r.get(column) == Some(&id))
                            .map(|r| {
                                let mut child = r.clone();
                                apply_embeds(tables, &mut child, &embed.embeds);
                                child
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Value::Array(children)
            }
        };
        if let Some(object) = row.as_object_mut() {
            object.insert(embed.alias.clone(), value);
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, query: Query) -> AppResult<Vec<Row>> {
        let failing = self
            .fail_selects_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if failing.as_deref() == Some(query.table.as_str()) {
            return Err(AppError::Backend(anyhow!("injected select failure")));
        }

        let tables = self.lock_tables();
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| f.matches(row)))
            .collect();

        for row in &mut rows {
            apply_embeds(&tables, row, &query.embeds);
        }

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = value_cmp(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.descending { ord.reverse() } else { ord }
            });
        }

        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, record: Row) -> AppResult<Row> {
        self.lock_tables()
            .entry(table.to_owned())
            .or_default()
            .push(record.clone());
        self.emit(ChangeKind::Insert, table, record.clone());
        Ok(record)
    }

    async fn update(&self, table: &str, patch: Row, filters: Vec<Filter>) -> AppResult<Vec<Row>> {
        let failing = self
            .fail_updates_on
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if failing.as_deref() == Some(table) {
            return Err(AppError::Backend(anyhow!("injected update failure")));
        }

        let mut updated = Vec::new();
        {
            let mut tables = self.lock_tables();
            if let Some(rows) = tables.get_mut(table) {
                for row in rows.iter_mut() {
                    if filters.iter().all(|f| f.matches(row)) {
                        if let (Some(object), Some(fields)) =
                            (row.as_object_mut(), patch.as_object())
                        {
                            for (key, value) in fields {
                                object.insert(key.clone(), value.clone());
                            }
                        }
                        updated.push(row.clone());
                    }
                }
            }
        }
        for row in &updated {
            self.emit(ChangeKind::Update, table, row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: Vec<Filter>) -> AppResult<Vec<Row>> {
        let mut removed = Vec::new();
        {
            let mut tables = self.lock_tables();
            if let Some(rows) = tables.get_mut(table) {
                rows.retain(|row| {
                    if filters.iter().all(|f| f.matches(row)) {
                        removed.push(row.clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }
        for row in &removed {
            self.emit(ChangeKind::Delete, table, row.clone());
        }
        Ok(removed)
    }

    async fn subscribe(&self, bindings: Vec<ChangeBinding>) -> AppResult<Subscription> {
        Ok(Subscription::new(self.feed.subscribe(), bindings))
    }
}

pub struct FakeIdentity {
    tx: watch::Sender<Option<AuthSession>>,
}

impl FakeIdentity {
    pub fn signed_in(user_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            tx: watch::channel(Some(AuthSession { user_id })).0,
        })
    }

    pub fn set(&self, session: Option<AuthSession>) {
        self.tx.send_replace(session);
    }
}

#[async_trait]
impl Identity for FakeIdentity {
    async fn session(&self) -> AppResult<Option<AuthSession>> {
        Ok(*self.tx.borrow())
    }

    fn on_change(&self) -> watch::Receiver<Option<AuthSession>> {
        self.tx.subscribe()
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.tx.send_replace(None);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _options: UploadOptions,
    ) -> AppResult<()> {
        self.uploads
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((bucket.to_owned(), path.to_owned(), bytes.len()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn session_for(
    backend: &Arc<MemoryBackend>,
    user_id: Uuid,
) -> (Arc<SessionContext>, Arc<FakeIdentity>) {
    init_tracing();
    let identity = FakeIdentity::signed_in(user_id);
    let ctx = SessionContext::initialize(backend.clone(), identity.clone())
        .await
        .expect("session init");
    (ctx, identity)
}

pub fn ts_minutes_ago(minutes: i64) -> String {
    fmt_rfc3339(OffsetDateTime::now_utc() - Duration::minutes(minutes))
}

pub fn ts_in_minutes(minutes: i64) -> String {
    fmt_rfc3339(OffsetDateTime::now_utc() + Duration::minutes(minutes))
}

pub fn profile_row(id: Uuid, name: &str) -> Value {
    json!({
        "id": id.to_string(),
        "display_name": name,
        "photo_url": format!("https://pics.example/{name}.png"),
        "bio": null,
        "created_at": ts_minutes_ago(600),
        "updated_at": ts_minutes_ago(600),
    })
}

pub fn event_row(id: Uuid, author_id: Uuid, title: &str) -> Value {
    json!({
        "id": id.to_string(),
        "title": title,
        "description": "community gathering",
        "starts_at": ts_in_minutes(1440),
        "venue": "Town Hall",
        "stage": "upcoming",
        "image_url": null,
        "author_id": author_id.to_string(),
        "created_at": ts_minutes_ago(600),
    })
}

pub fn chat_row(id: Uuid, kind: &str, event_id: Option<Uuid>, updated_minutes_ago: i64) -> Value {
    json!({
        "id": id.to_string(),
        "kind": kind,
        "event_id": event_id.map(|id| id.to_string()),
        "enabled": true,
        "updated_at": ts_minutes_ago(updated_minutes_ago),
    })
}

pub fn chat_member_row(chat_id: Uuid, user_id: Uuid) -> Value {
    json!({
        "chat_id": chat_id.to_string(),
        "user_id": user_id.to_string(),
    })
}

pub fn message_row(chat_id: Uuid, sender_id: Uuid, content: &str, minutes_ago: i64) -> Value {
    json!({
        "id": Uuid::now_v7().to_string(),
        "chat_id": chat_id.to_string(),
        "sender_id": sender_id.to_string(),
        "content": content,
        "created_at": ts_minutes_ago(minutes_ago),
    })
}

pub fn membership_row(event_id: Uuid, user_id: Uuid) -> Value {
    json!({
        "event_id": event_id.to_string(),
        "user_id": user_id.to_string(),
    })
}
