//! Session/profile provider. The authenticated identity itself belongs to the
//! backend; this module caches the matching profile row and hands assemblers
//! an explicitly constructed context with a `ready -> disposed` lifecycle, so
//! nothing in the crate reaches for ambient global state.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{Backend, Filter, Query};
use crate::models::{Profile, fmt_rfc3339};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: Uuid,
}

/// The backend's identity surface: current session, sign-out, and a watchable
/// auth-state stream.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn session(&self) -> AppResult<Option<AuthSession>>;

    fn on_change(&self) -> watch::Receiver<Option<AuthSession>>;

    async fn sign_out(&self) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Ready,
    Disposed,
}

/// Authenticated context passed down to every assembler.
pub struct SessionContext {
    backend: Arc<dyn Backend>,
    identity: Arc<dyn Identity>,
    user_id: Uuid,
    profile: RwLock<Profile>,
    state: RwLock<Lifecycle>,
}

impl SessionContext {
    /// Resolves the current identity, fetches the profile row (creating it on
    /// first authentication), and starts watching for identity changes. The
    /// context disposes itself when the identity signs out or switches user.
    pub async fn initialize(
        backend: Arc<dyn Backend>,
        identity: Arc<dyn Identity>,
    ) -> AppResult<Arc<Self>> {
        let auth = identity.session().await?.ok_or(AppError::SignedOut)?;
        let profile = fetch_or_create_profile(backend.as_ref(), auth.user_id).await?;

        let ctx = Arc::new(Self {
            backend,
            identity: identity.clone(),
            user_id: auth.user_id,
            profile: RwLock::new(profile),
            state: RwLock::new(Lifecycle::Ready),
        });

        let weak = Arc::downgrade(&ctx);
        let mut changes = identity.on_change();
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let current = *changes.borrow();
                let Some(ctx) = weak.upgrade() else { break };
                if current.map(|auth| auth.user_id) != Some(ctx.user_id) {
                    ctx.dispose();
                    break;
                }
            }
        });

        Ok(ctx)
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Cached profile as of the last fetch.
    pub fn profile(&self) -> Profile {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.state.read().unwrap_or_else(PoisonError::into_inner) == Lifecycle::Ready
    }

    pub fn ensure_ready(&self) -> AppResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(AppError::Disposed)
        }
    }

    pub fn dispose(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if *state != Lifecycle::Disposed {
            tracing::debug!(user = %self.user_id, "session context disposed");
            *state = Lifecycle::Disposed;
        }
    }

    pub async fn refresh_profile(&self) -> AppResult<Profile> {
        self.ensure_ready()?;
        let rows = self
            .backend
            .select(
                Query::table("profiles")
                    .filter(Filter::eq("id", self.user_id.to_string()))
                    .limit(1),
            )
            .await?;
        let row = rows.into_iter().next().ok_or(AppError::NotFound("profile"))?;
        let fresh: Profile = serde_json::from_value(row)?;
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = fresh.clone();
        Ok(fresh)
    }

    /// Whole-field update: only the fields present in the patch are written,
    /// each replacing the stored value outright.
    pub async fn update_profile(&self, patch: ProfilePatch) -> AppResult<Profile> {
        self.ensure_ready()?;

        let mut fields = Map::new();
        if let Some(display_name) = patch.display_name {
            fields.insert("display_name".to_owned(), Value::String(display_name));
        }
        if let Some(photo_url) = patch.photo_url {
            fields.insert("photo_url".to_owned(), Value::String(photo_url));
        }
        if let Some(bio) = patch.bio {
            fields.insert("bio".to_owned(), Value::String(bio));
        }
        fields.insert(
            "updated_at".to_owned(),
            Value::String(fmt_rfc3339(OffsetDateTime::now_utc())),
        );

        self.backend
            .update(
                "profiles",
                Value::Object(fields),
                vec![Filter::eq("id", self.user_id.to_string())],
            )
            .await?;

        self.refresh_profile().await
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.identity.sign_out().await?;
        self.dispose();
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
}

async fn fetch_or_create_profile(backend: &dyn Backend, user_id: Uuid) -> AppResult<Profile> {
    let rows = backend
        .select(
            Query::table("profiles")
                .filter(Filter::eq("id", user_id.to_string()))
                .limit(1),
        )
        .await?;

    match rows.into_iter().next() {
        Some(row) => Ok(serde_json::from_value(row)?),
        None => {
            let profile = Profile::new(user_id);
            let row = backend
                .insert("profiles", serde_json::to_value(&profile)?)
                .await?;
            Ok(serde_json::from_value(row)?)
        }
    }
}
