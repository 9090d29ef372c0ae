use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use skein_protocol::{Memory, MemoryService, Message, SearchMemoryResponse, SkeinResult, UserId};
use tracing::debug;

mod updater;

pub use updater::MemoryUpdater;

pub const NO_MEMORY_FOUND: &str = "no memory found for this user";
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_QUERY_CACHE_CAPACITY: usize = 64;

/// Render a message as one `role: content` memory line.
pub fn format_message(message: &Message) -> String {
    format!("{}: {}", message.role.as_str(), message.content.text())
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Process-local memory keyed by user.
///
/// Search ranks stored lines by how many distinct query terms they contain;
/// when nothing matches, the most recent lines are returned instead. Results
/// are cached per user and query until the next update for that user; each
/// user keeps at most `query_cache_capacity` queries, oldest evicted first.
#[derive(Debug)]
pub struct InMemoryMemoryService {
    top_k: usize,
    query_cache_capacity: usize,
    lines: Mutex<HashMap<UserId, Vec<String>>>,
    cached_queries: Mutex<HashMap<UserId, IndexMap<String, SearchMemoryResponse>>>,
}

impl Default for InMemoryMemoryService {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl InMemoryMemoryService {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k: top_k.max(1),
            query_cache_capacity: DEFAULT_QUERY_CACHE_CAPACITY,
            lines: Mutex::new(HashMap::new()),
            cached_queries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_query_cache_capacity(mut self, capacity: usize) -> Self {
        self.query_cache_capacity = capacity;
        self
    }

    #[cfg(test)]
    fn cached_query_count(&self, user_id: &UserId) -> usize {
        self.cached_queries
            .lock()
            .get(user_id)
            .map_or(0, IndexMap::len)
    }

    fn rank(&self, lines: &[String], query: &str) -> Vec<Memory> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, usize)> = lines
            .iter()
            .enumerate()
            .map(|(index, line)| (index, terms(line).intersection(&query_terms).count()))
            .filter(|(_, score)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

        if scored.is_empty() {
            scored = (0..lines.len()).rev().map(|index| (index, 0)).collect();
        }

        scored
            .into_iter()
            .take(self.top_k)
            .map(|(index, score)| Memory {
                memory_content: lines[index].clone(),
                reference: None,
                metadata: Some(json!({"index": index, "score": score})),
            })
            .collect()
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn update_memory(&self, user_id: &UserId, messages: Vec<Message>) -> SkeinResult<()> {
        let added = messages.len();
        self.lines
            .lock()
            .entry(user_id.clone())
            .or_default()
            .extend(messages.iter().map(format_message));
        self.cached_queries.lock().remove(user_id);
        debug!(user_id = %user_id, added, "memory updated");
        Ok(())
    }

    async fn search_memory(
        &self,
        user_id: &UserId,
        query: &str,
    ) -> SkeinResult<SearchMemoryResponse> {
        if let Some(cached) = self
            .cached_queries
            .lock()
            .get(user_id)
            .and_then(|queries| queries.get(query))
        {
            return Ok(cached.clone());
        }

        let response = {
            let lines = self.lines.lock();
            match lines.get(user_id) {
                Some(lines) => SearchMemoryResponse {
                    memories: self.rank(lines, query),
                },
                None => {
                    return Ok(SearchMemoryResponse {
                        memories: vec![Memory::new(NO_MEMORY_FOUND)],
                    });
                }
            }
        };

        if self.query_cache_capacity > 0 {
            let mut cached = self.cached_queries.lock();
            let queries = cached.entry(user_id.clone()).or_default();
            queries.insert(query.to_owned(), response.clone());
            while queries.len() > self.query_cache_capacity {
                queries.shift_remove_index(0);
            }
        }
        Ok(response)
    }

    async fn delete_user(&self, user_id: &UserId) -> SkeinResult<()> {
        self.lines.lock().remove(user_id);
        self.cached_queries.lock().remove(user_id);
        debug!(user_id = %user_id, "memory deleted");
        Ok(())
    }
}
