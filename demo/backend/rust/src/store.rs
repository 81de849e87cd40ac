/* demo/backend/rust/src/store.rs */

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use trellis_server::Value;

#[derive(Debug, Clone)]
pub struct Post {
  pub slug: String,
  pub title: String,
  pub body: String,
  pub author: String,
  pub published_at: DateTime<Utc>,
}

impl Post {
  pub fn summary(&self) -> Value {
    Value::object([
      ("slug", Value::from(self.slug.clone())),
      ("title", Value::from(self.title.clone())),
      ("publishedAt", Value::from(self.published_at)),
    ])
  }

  pub fn detail(&self) -> Value {
    Value::object([
      ("slug", Value::from(self.slug.clone())),
      ("title", Value::from(self.title.clone())),
      ("body", Value::from(self.body.clone())),
      ("author", Value::from(self.author.clone())),
      ("publishedAt", Value::from(self.published_at)),
    ])
  }
}

/// In-memory post storage shared with loaders through the load context.
#[derive(Debug, Clone, Default)]
pub struct Store {
  posts: Arc<RwLock<Vec<Post>>>,
}

impl Store {
  pub fn seeded() -> Self {
    let posts = vec![Post {
      slug: "hello-world".into(),
      title: "Hello, world".into(),
      body: "Nested routes load their data in parallel.".into(),
      author: "ada".into(),
      published_at: Utc::now(),
    }];
    Self { posts: Arc::new(RwLock::new(posts)) }
  }

  pub async fn list(&self) -> Vec<Post> {
    self.posts.read().await.clone()
  }

  pub async fn find(&self, slug: &str) -> Option<Post> {
    self.posts.read().await.iter().find(|p| p.slug == slug).cloned()
  }

  /// Insert a post under a slug derived from its title; returns the slug.
  pub async fn create(&self, title: &str, body: &str, author: &str) -> anyhow::Result<String> {
    let slug = slugify(title);
    if slug.is_empty() {
      anyhow::bail!("title \"{title}\" has no usable characters");
    }
    let mut posts = self.posts.write().await;
    if posts.iter().any(|p| p.slug == slug) {
      anyhow::bail!("a post with slug \"{slug}\" already exists");
    }
    posts.push(Post {
      slug: slug.clone(),
      title: title.to_string(),
      body: body.to_string(),
      author: author.to_string(),
      published_at: Utc::now(),
    });
    Ok(slug)
  }
}

fn slugify(title: &str) -> String {
  let lowered: String = title
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
    .collect();
  lowered.split('-').filter(|s| !s.is_empty()).collect::<Vec<_>>().join("-")
}
