use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use telegram_module::Update;
use tracing::{error, info, warn};

use super::bot;
use crate::context::AppContext;
use crate::payments::{self, PaymentOutcome};

#[derive(Clone)]
pub(crate) struct AppState {
    pub ctx: Arc<AppContext>,
    pub product_permalink: Option<String>,
}

/// Sale ping posted by Gumroad as a form. Unknown fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GumroadSale {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    sale_id: Option<String>,
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook/gumroad", get(gumroad_ready).post(gumroad_webhook))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn gumroad_ready() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Always answers 200 so the provider does not retry; problems are logged.
async fn gumroad_webhook(
    State(state): State<AppState>,
    Form(sale): Form<GumroadSale>,
) -> impl IntoResponse {
    let matches_product = match (&state.product_permalink, &sale.permalink) {
        (Some(expected), Some(got)) => expected == got,
        _ => false,
    };
    if !matches_product {
        warn!(
            "ignoring gumroad sale for product {:?}",
            sale.permalink.as_deref().unwrap_or("")
        );
        return (StatusCode::OK, "OK");
    }

    let email = sale.email.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let sale_id = sale.sale_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (Some(email), Some(sale_id)) = (email, sale_id) else {
        warn!("gumroad sale without email or sale_id");
        return (StatusCode::OK, "OK");
    };

    match payments::apply_payment(&state.ctx, email, sale_id, Utc::now()).await {
        Ok(PaymentOutcome::Applied { subscriber_id, .. }) => {
            info!("gumroad sale {} applied to subscriber {}", sale_id, subscriber_id);
        }
        Ok(PaymentOutcome::Duplicate { subscriber_id }) => {
            info!("gumroad sale {} replayed for subscriber {}", sale_id, subscriber_id);
        }
        Ok(PaymentOutcome::UnknownEmail) => {
            warn!("gumroad sale {} has no matching subscriber", sale_id);
        }
        Err(err) => {
            error!("gumroad sale {} failed: {}", sale_id, err);
        }
    }
    (StatusCode::OK, "OK")
}

async fn telegram_webhook(
    State(state): State<AppState>,
    Json(update): Json<Update>,
) -> impl IntoResponse {
    bot::handle_update(&state.ctx, update, Utc::now()).await;
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{PaymentStatus, SubscriberStore};
    use crate::testing::{harness, seed_trial, Harness};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use chrono::Duration;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        build_router(AppState {
            ctx: h.ctx.clone(),
            product_permalink: Some("vip".to_string()),
        })
    }

    fn form_post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/gumroad")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let h = harness();
        let response = app(&h)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn gumroad_sale_marks_subscriber_paid() {
        let h = harness();
        let start = Utc::now() - Duration::days(1);
        seed_trial(&h.ctx, 5, "a@b.com", start, start + Duration::days(7), PaymentStatus::TrialActive);

        let response = app(&h)
            .oneshot(form_post("email=A%40b.com&permalink=vip&sale_id=s-1&price=100"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let record = h.ctx.store.get(5).unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::PaidSubscriber);
        assert!(h.ctx.jobs.pending("payment_confirmation_5").is_some());
    }

    #[tokio::test]
    async fn other_products_are_ignored() {
        let h = harness();
        let start = Utc::now() - Duration::days(1);
        seed_trial(&h.ctx, 6, "c@d.com", start, start + Duration::days(7), PaymentStatus::TrialActive);

        let response = app(&h)
            .oneshot(form_post("email=c%40d.com&permalink=other&sale_id=s-2"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let record = h.ctx.store.get(6).unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::TrialActive);
    }

    #[tokio::test]
    async fn gumroad_get_is_a_liveness_probe() {
        let h = harness();
        let response = app(&h)
            .oneshot(
                Request::builder()
                    .uri("/webhook/gumroad")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn telegram_webhook_accepts_updates() {
        let h = harness();
        let update = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 3,
                "from": {"id": 77, "is_bot": false, "first_name": "Dana"},
                "chat": {"id": 77, "type": "private"},
                "date": 1_760_000_000,
                "text": "/help"
            }
        });
        let response = app(&h)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/telegram/webhook")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(update.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.notifier.messages_to(77).len(), 1);
    }
}
