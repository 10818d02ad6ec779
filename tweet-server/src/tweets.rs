use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    pub text: String,
    pub created_at_ms: u64,
}

/// Inbound body for create and update.
#[derive(Serialize, Deserialize, Validate)]
pub struct TweetRequest {
    #[validate(length(min = 1, max = 280))]
    pub text: String,
}

/// In-memory document store for tweets. Keyed by tweet id; listing is
/// ordered by creation time so the feed is stable across calls.
pub struct TweetStore {
    tweets: DashMap<String, Tweet>,
}

impl Default for TweetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TweetStore {
    pub fn new() -> Self {
        Self {
            tweets: DashMap::new(),
        }
    }

    pub fn find_all(&self) -> Vec<Tweet> {
        let mut all: Vec<Tweet> = self.tweets.iter().map(|t| t.value().clone()).collect();
        all.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    pub fn create(&self, text: String) -> Tweet {
        let tweet = Tweet {
            id: Uuid::new_v4().to_string(),
            text,
            created_at_ms: now_ms(),
        };
        self.tweets.insert(tweet.id.clone(), tweet.clone());
        tweet
    }

    pub fn find_by_id(&self, id: &str) -> Option<Tweet> {
        self.tweets.get(id).map(|t| t.value().clone())
    }

    /// Replaces the text of an existing tweet. `None` if the id is unknown.
    pub fn update_text(&self, id: &str, text: String) -> Option<Tweet> {
        let mut entry = self.tweets.get_mut(id)?;
        entry.text = text;
        Some(entry.value().clone())
    }

    pub fn delete(&self, id: &str) -> Option<Tweet> {
        self.tweets.remove(id).map(|(_, t)| t)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
