use axum::extract::{Query, State};
use axum::response::Response;
use serde::Serialize;

use crate::catalog::{filter_and_sort, FilterParams, ShardId};
use crate::models::category::sort_categories;
use crate::models::Category;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

#[derive(Debug, Serialize)]
pub struct CategoryBody {
    #[serde(flatten)]
    pub category: Category,
    pub shard: ShardId,
}

pub async fn list_categories(State(state): State<AppState>) -> Result<Response, AppError> {
    let mut categories = state.directory.list_categories().await?;
    sort_categories(&mut categories);
    let body: Vec<CategoryBody> = categories
        .into_iter()
        .map(|category| CategoryBody {
            shard: state.catalog.shards().shard_for(&category.name),
            category,
        })
        .collect();
    Ok(success(body, "Categories retrieved"))
}

pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Result<Response, AppError> {
    let events = state.directory.list_events().await?;
    Ok(success(filter_and_sort(events, &params), "Events retrieved"))
}
