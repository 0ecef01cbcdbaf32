//! Notification send, transactional and query endpoints.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use courier_core::{CoreError, Notification, SendStatus};

use crate::app::dto::{
    BatchSendAsyncResponseBody, BatchSendRequest, BatchSendResponseBody, NotificationView,
    SendNotificationRequest, SendNotificationResponse, TxKeyRequest, TxPrepareResponse,
};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::BizContext;

pub fn router() -> Router {
    Router::new()
        .route("/send", post(send))
        .route("/send-async", post(send_async))
        .route("/batch-send", post(batch_send))
        .route("/batch-send-async", post(batch_send_async))
        .route("/tx-prepare", post(tx_prepare))
        .route("/tx-commit", post(tx_commit))
        .route("/tx-cancel", post(tx_cancel))
        .route("/:id", get(get_by_id))
        .route("/key/:key", get(get_by_key))
}

fn build_notification(
    body: SendNotificationRequest,
    biz: BizContext,
) -> Result<Notification, axum::response::Response> {
    body.notification
        .into_domain(biz.biz_id())
        .map_err(errors::send_error_response)
}

async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<SendNotificationRequest>,
) -> axum::response::Response {
    let notification = match build_notification(body, biz) {
        Ok(n) => n,
        Err(response) => return response,
    };
    match services.send.send_notification(notification).await {
        Ok(response) => Json(SendNotificationResponse::ok(response)).into_response(),
        Err(err) => errors::send_error_response(err),
    }
}

async fn send_async(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<SendNotificationRequest>,
) -> axum::response::Response {
    let notification = match build_notification(body, biz) {
        Ok(n) => n,
        Err(response) => return response,
    };
    match services.send.send_notification_async(notification).await {
        Ok(response) => Json(SendNotificationResponse::ok(response)).into_response(),
        Err(err) => errors::send_error_response(err),
    }
}

async fn batch_send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<BatchSendRequest>,
) -> axum::response::Response {
    let first_strategy_immediate = body
        .notifications
        .first()
        .map(|n| {
            matches!(
                n.strategy,
                None | Some(crate::app::dto::SendStrategyDto::Immediate)
            )
        })
        .unwrap_or(true);

    let mut notifications = Vec::with_capacity(body.notifications.len());
    for dto in body.notifications {
        match dto.into_domain(biz.biz_id()) {
            Ok(n) => notifications.push(n),
            Err(err) => return errors::json_error_response(err),
        }
    }

    match services.send.batch_send_notifications(notifications).await {
        Ok(batch) => {
            // A row counts as successful when its strategy family reached
            // the state that family targets: SUCCEEDED for immediate,
            // PENDING for deferred.
            let success_count = batch
                .results
                .iter()
                .filter(|r| {
                    (first_strategy_immediate && r.status == SendStatus::Succeeded)
                        || (!first_strategy_immediate && r.status == SendStatus::Pending)
                })
                .count() as i32;
            Json(BatchSendResponseBody {
                total_count: batch.results.len() as i32,
                success_count,
                results: batch
                    .results
                    .into_iter()
                    .map(SendNotificationResponse::ok)
                    .collect(),
            })
            .into_response()
        }
        Err(err) => errors::json_error_response(err),
    }
}

async fn batch_send_async(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<BatchSendRequest>,
) -> axum::response::Response {
    let mut notifications = Vec::with_capacity(body.notifications.len());
    for dto in body.notifications {
        match dto.into_domain(biz.biz_id()) {
            Ok(n) => notifications.push(n),
            Err(err) => return errors::json_error_response(err),
        }
    }

    match services
        .send
        .batch_send_notifications_async(notifications)
        .await
    {
        Ok(response) => Json(BatchSendAsyncResponseBody {
            notification_ids: response.notification_ids,
        })
        .into_response(),
        Err(err) => errors::json_error_response(err),
    }
}

async fn tx_prepare(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<SendNotificationRequest>,
) -> axum::response::Response {
    let notification = match body
        .notification
        .into_domain(biz.biz_id())
        .map_err(errors::json_error_response)
    {
        Ok(n) => n,
        Err(response) => return response,
    };
    // The same admission gate as the send path: template resolution, ID
    // minting, validation.
    let admitted = match services.send.admit(notification).await {
        Ok(n) => n,
        Err(err) => return errors::json_error_response(err),
    };
    match services.txn.prepare(admitted).await {
        Ok(notification_id) => Json(TxPrepareResponse { notification_id }).into_response(),
        Err(err) => errors::json_error_response(err),
    }
}

async fn tx_commit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<TxKeyRequest>,
) -> axum::response::Response {
    match services.txn.commit(biz.biz_id(), &body.key).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => errors::json_error_response(err),
    }
}

async fn tx_cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Json(body): Json<TxKeyRequest>,
) -> axum::response::Response {
    match services.txn.cancel(biz.biz_id(), &body.key).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => errors::json_error_response(err),
    }
}

async fn get_by_id(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Path(id): Path<i64>,
) -> axum::response::Response {
    match services.queries.get_by_id(id).await {
        // Tenants only ever see their own rows.
        Ok(n) if n.biz_id == biz.biz_id() => Json(NotificationView::from(n)).into_response(),
        Ok(_) => errors::not_found(),
        Err(CoreError::NotificationNotFound) => errors::not_found(),
        Err(err) => errors::internal_error(err),
    }
}

async fn get_by_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(biz): Extension<BizContext>,
    Path(key): Path<String>,
) -> axum::response::Response {
    match services.queries.get_by_key(biz.biz_id(), &key).await {
        Ok(n) => Json(NotificationView::from(n)).into_response(),
        Err(CoreError::NotificationNotFound) => errors::not_found(),
        Err(err) => errors::internal_error(err),
    }
}
