//! Postgres adapter.
//!
//! Rows are projected with `to_jsonb` so each shard table can keep its own
//! column set and still reach the normalizer unchanged. Table names come from
//! [`ShardId::table`] and are never user input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::backend::{
    is_valid_procedure_name, BackendError, BackendResult, Directory, NewTicketRow, RowFilter,
    RpcClient, SessionFactory, SessionProvider, TicketStore, TicketUpdate,
};
use crate::catalog::shard::ShardId;
use crate::models::category::CategoryRow;
use crate::models::{AuthIdentity, Category, Event, Subscriber, TicketId, UserSummary};

#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
    session_ttl: Duration,
}

impl PgBackend {
    pub fn new(pool: PgPool, session_ttl: Duration) -> Self {
        Self { pool, session_ttl }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TicketStore for PgBackend {
    async fn select_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<Option<Value>> {
        let sql = format!("SELECT to_jsonb(t) FROM {} t WHERE t.id = $1", shard.table());
        let row = sqlx::query_scalar::<_, Value>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn select_listings(
        &self,
        shard: ShardId,
        filter: RowFilter,
    ) -> BackendResult<Vec<Value>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT to_jsonb(t) FROM {} t WHERE TRUE",
            shard.table()
        ));
        if let Some(status) = filter.status {
            query.push(" AND t.status = ").push_bind(status.as_str());
        }
        if let Some(owner_id) = filter.owner_id {
            query.push(" AND t.owner_id = ").push_bind(owner_id);
        }
        let rows = query
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn insert(&self, shard: ShardId, row: &NewTicketRow) -> BackendResult<Value> {
        let sql = format!(
            "INSERT INTO {} AS t (id, title, description, category, price, quantity, status, \
             event_id, event_date, venue, seat, file_path, owner_id, seller_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING to_jsonb(t)",
            shard.table()
        );
        let inserted = sqlx::query_scalar::<_, Value>(&sql)
            .bind(row.id.as_str())
            .bind(&row.title)
            .bind(&row.description)
            .bind(&row.category)
            .bind(row.price)
            .bind(row.quantity)
            .bind(row.status.as_str())
            .bind(&row.event_id)
            .bind(row.event_date)
            .bind(&row.venue)
            .bind(&row.seat)
            .bind(&row.file_path)
            .bind(row.owner_id)
            .bind(row.seller_id)
            .bind(row.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn update_by_id(
        &self,
        shard: ShardId,
        id: &TicketId,
        update: &TicketUpdate,
    ) -> BackendResult<bool> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("UPDATE {} SET updated_at = now()", shard.table()));
        if let Some(title) = &update.title {
            query.push(", title = ").push_bind(title.clone());
        }
        if let Some(description) = &update.description {
            query.push(", description = ").push_bind(description.clone());
        }
        if let Some(price) = update.price {
            query.push(", price = ").push_bind(price);
        }
        if let Some(quantity) = update.quantity {
            query.push(", quantity = ").push_bind(quantity);
        }
        if let Some(status) = update.status {
            query.push(", status = ").push_bind(status.as_str());
        }
        if let Some(event_id) = &update.event_id {
            query.push(", event_id = ").push_bind(event_id.clone());
        }
        if let Some(event_date) = update.event_date {
            query.push(", event_date = ").push_bind(event_date);
        }
        if let Some(venue) = &update.venue {
            query.push(", venue = ").push_bind(venue.clone());
        }
        if let Some(seat) = &update.seat {
            query.push(", seat = ").push_bind(seat.clone());
        }
        if let Some(file_path) = &update.file_path {
            query.push(", file_path = ").push_bind(file_path.clone());
        }
        if let Some(owner_id) = update.owner_id {
            query.push(", owner_id = ").push_bind(owner_id);
        }
        if let Some(buyer_id) = update.buyer_id {
            query.push(", buyer_id = ").push_bind(buyer_id);
        }

        query.push(" WHERE id = ").push_bind(id.as_str().to_string());
        if let Some(expected) = update.expected_status {
            query.push(" AND status = ").push_bind(expected.as_str());
        }

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_id(&self, shard: ShardId, id: &TicketId) -> BackendResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", shard.table());
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RpcClient for PgBackend {
    async fn call(&self, name: &str, params: Value) -> BackendResult<Value> {
        if !is_valid_procedure_name(name) {
            return Err(BackendError::UnknownProcedure(name.to_string()));
        }
        let sql = format!("SELECT {name}($1::jsonb)");
        let result = sqlx::query_scalar::<_, Option<Value>>(&sql)
            .bind(params)
            .fetch_one(&self.pool)
            .await?;
        Ok(result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Directory for PgBackend {
    async fn list_categories(&self) -> BackendResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT name, variants, sort_priority FROM categories ORDER BY sort_priority, name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn list_events(&self) -> BackendResult<Vec<Event>> {
        let events = sqlx::query_as::<_, Event>(
            "SELECT id, title, description, category, venue, start_date FROM events",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn list_users(&self) -> BackendResult<Vec<UserSummary>> {
        let users = sqlx::query_as::<_, UserSummary>(
            "SELECT p.id, u.email, p.display_name, p.is_admin, p.created_at \
             FROM profiles p JOIN auth_users u ON u.id = p.auth_user_id \
             ORDER BY p.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn list_subscribers(&self) -> BackendResult<Vec<Subscriber>> {
        let subscribers = sqlx::query_as::<_, Subscriber>(
            "SELECT id, email, locale, subscribed_at FROM subscribers ORDER BY subscribed_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(subscribers)
    }
}

impl SessionFactory for PgBackend {
    fn open(&self, bearer_token: Option<&str>) -> Arc<dyn SessionProvider> {
        Arc::new(PgSession {
            pool: self.pool.clone(),
            token: bearer_token.map(str::to_string),
            ttl: self.session_ttl,
        })
    }
}

/// Session row in `auth_sessions`, addressed by its bearer token.
#[derive(Debug)]
pub struct PgSession {
    pool: PgPool,
    token: Option<String>,
    ttl: Duration,
}

#[async_trait]
impl SessionProvider for PgSession {
    async fn current_identity(&self) -> BackendResult<Option<AuthIdentity>> {
        let Some(token) = &self.token else {
            return Ok(None);
        };
        let identity = sqlx::query_as::<_, AuthIdentity>(
            "SELECT u.id, u.email FROM auth_sessions s \
             JOIN auth_users u ON u.id = s.user_id \
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn refresh_session(&self) -> BackendResult<bool> {
        let Some(token) = &self.token else {
            return Ok(false);
        };
        let result = sqlx::query(
            "UPDATE auth_sessions SET expires_at = now() + make_interval(secs => $2) \
             WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .bind(self.ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
