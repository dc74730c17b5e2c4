//! Social feed: posts (permanent) and stories (visible until `expires_at`).
//! Stories are garbage-collected by query filter, never deleted.

use std::sync::Arc;

use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::backend::{Backend, Embed, Filter, Query};
use crate::models::{Post, Profile, Story, fmt_rfc3339};
use crate::session::SessionContext;
use crate::storage::{ObjectStore, UploadOptions};
use crate::AppResult;

const STORY_LIFETIME: Duration = Duration::hours(24);

#[derive(Debug, Clone, PartialEq)]
pub struct PostView {
    pub post: Post,
    pub author: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoryView {
    pub story: Story,
    pub author: Option<Profile>,
}

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[derive(Deserialize)]
struct PostRow {
    #[serde(flatten)]
    post: Post,
    #[serde(default)]
    author: Option<Profile>,
}

#[derive(Deserialize)]
struct StoryRow {
    #[serde(flatten)]
    story: Story,
    #[serde(default)]
    author: Option<Profile>,
}

#[derive(Clone)]
pub struct FeedAssembler {
    backend: Arc<dyn Backend>,
    session: Arc<SessionContext>,
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl FeedAssembler {
    pub fn new(session: Arc<SessionContext>, store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            backend: session.backend(),
            session,
            store,
            bucket: bucket.to_owned(),
        }
    }

    pub async fn posts(&self) -> AppResult<Vec<PostView>> {
        self.session.ensure_ready()?;

        let rows = self
            .backend
            .select(
                Query::table("posts")
                    .embed(Embed::belongs_to("author", "profiles", "author_id"))
                    .order_by("created_at", true),
            )
            .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in rows {
            let row: PostRow = serde_json::from_value(row)?;
            posts.push(PostView {
                post: row.post,
                author: row.author,
            });
        }
        Ok(posts)
    }

    /// Only stories that have not yet expired.
    pub async fn stories(&self) -> AppResult<Vec<StoryView>> {
        self.session.ensure_ready()?;

        let now = fmt_rfc3339(OffsetDateTime::now_utc());
        let rows = self
            .backend
            .select(
                Query::table("stories")
                    .filter(Filter::gt("expires_at", now))
                    .embed(Embed::belongs_to("author", "profiles", "author_id"))
                    .order_by("created_at", true),
            )
            .await?;

        let mut stories = Vec::with_capacity(rows.len());
        for row in rows {
            let row: StoryRow = serde_json::from_value(row)?;
            stories.push(StoryView {
                story: row.story,
                author: row.author,
            });
        }
        Ok(stories)
    }

    /// Returns `None` when the content is empty after trimming; nothing is
    /// written in that case.
    pub async fn create_post(
        &self,
        content: &str,
        image: Option<ImageUpload>,
    ) -> AppResult<Option<Post>> {
        self.session.ensure_ready()?;

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let image_url = match image {
            Some(image) => Some(self.upload_image("posts", image).await?),
            None => None,
        };

        let post = Post {
            id: Uuid::now_v7(),
            content: content.to_owned(),
            image_url,
            author_id: self.session.user_id(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.backend
            .insert("posts", serde_json::to_value(&post)?)
            .await?;
        Ok(Some(post))
    }

    pub async fn create_story(&self, image: Option<ImageUpload>) -> AppResult<Story> {
        self.session.ensure_ready()?;

        let image_url = match image {
            Some(image) => Some(self.upload_image("stories", image).await?),
            None => None,
        };

        let now = OffsetDateTime::now_utc();
        let story = Story {
            id: Uuid::now_v7(),
            author_id: self.session.user_id(),
            image_url,
            created_at: now,
            expires_at: now + STORY_LIFETIME,
        };
        self.backend
            .insert("stories", serde_json::to_value(&story)?)
            .await?;
        Ok(story)
    }

    async fn upload_image(&self, prefix: &str, image: ImageUpload) -> AppResult<String> {
        let path = format!("{prefix}/{}", Uuid::now_v7());
        self.store
            .upload(
                &self.bucket,
                &path,
                image.bytes,
                UploadOptions {
                    content_type: Some(image.content_type),
                    upsert: false,
                },
            )
            .await?;
        Ok(self.store.public_url(&self.bucket, &path))
    }
}
