use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Model lists keyed by platform and API key, valid for a fixed time
pub struct ModelCache {
    ttl: Duration,
    entries: Mutex<HashMap<(String, String), (Instant, Vec<String>)>>,
}

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, platform: &str, api_key: &str) -> Option<Vec<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let cache_key = (platform.to_string(), api_key.to_string());

        match entries.get(&cache_key) {
            Some((stored_at, models)) if stored_at.elapsed() < self.ttl => Some(models.clone()),
            Some(_) => {
                entries.remove(&cache_key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, platform: &str, api_key: &str, models: Vec<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (platform.to_string(), api_key.to_string()),
                (Instant::now(), models),
            );
    }
}
