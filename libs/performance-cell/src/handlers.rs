use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::services::CacheService;

pub async fn get_cache_stats(
    State(cache): State<Arc<CacheService>>,
) -> Json<Value> {
    let stats = cache.stats();

    Json(json!({
        "cache_stats": stats,
        "hit_rate": stats.hit_rate(),
        "timestamp": chrono::Utc::now(),
    }))
}
