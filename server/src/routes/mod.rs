use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::create_cors_layer;
use crate::handlers::{account, admin, directory, health_check, tickets};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    let api = Router::new()
        .route("/categories", get(directory::list_categories))
        .route("/events", get(directory::list_events))
        .route(
            "/tickets",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .route(
            "/tickets/:id",
            get(tickets::get_ticket)
                .patch(tickets::update_ticket)
                .delete(tickets::delete_ticket),
        )
        .route("/tickets/:id/purchase", post(tickets::purchase_ticket))
        .route("/me/tickets", get(account::my_tickets))
        .route("/me/tickets/refresh", post(account::refresh_my_tickets))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/refresh", post(admin::refresh_users))
        .route("/admin/subscribers", get(admin::list_subscribers))
        .route("/admin/subscribers/refresh", post(admin::refresh_subscribers));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
