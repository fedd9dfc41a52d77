use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use patron::domain::customer::Customer;
use patron::domain::DataAccessError;
use patron::service::{CustomerService, CustomerServiceError};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error};

pub fn router(service: CustomerService) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/customers", get(find_by_name).post(save))
        .route(
            "/customers/:id",
            get(find_by_id).put(update).delete(delete_by_id),
        )
        .with_state(service)
}

/// APIエラー
///
/// `NotFound` は404、接続エラーは503、それ以外のリポジトリエラーは500。
/// リクエストの解釈に失敗した場合はaxumの判定したステータスを使う。
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] CustomerServiceError),
    #[error("{}", .0.body_text())]
    Json(#[from] JsonRejection),
    #[error("{}", .0.body_text())]
    Query(#[from] QueryRejection),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Service(CustomerServiceError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Service(CustomerServiceError::Repository(
                DataAccessError::ConnectionError(_),
            )) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(CustomerServiceError::Repository(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Json(rejection) => rejection.status(),
            ApiError::Query(rejection) => rejection.status(),
        };
        if status.is_server_error() {
            error!("リクエスト処理エラー: {}", self);
        } else {
            debug!("リクエスト処理エラー: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Deserialize)]
struct NameQuery {
    name: String,
}

#[derive(Deserialize)]
struct CustomerBody {
    name: String,
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP" }))
}

async fn find_by_id(
    State(service): State<CustomerService>,
    Path(id): Path<String>,
) -> Result<Json<Customer>, ApiError> {
    Ok(Json(service.find_by_id(&id.into()).await?))
}

async fn find_by_name(
    State(service): State<CustomerService>,
    query: Result<Query<NameQuery>, QueryRejection>,
) -> Result<Json<Vec<Customer>>, ApiError> {
    let Query(query) = query?;
    let customers = service.find_by_name(&query.name).try_collect().await?;
    Ok(Json(customers))
}

async fn save(
    State(service): State<CustomerService>,
    customer: Result<Json<Customer>, JsonRejection>,
) -> Result<Json<Customer>, ApiError> {
    let Json(customer) = customer?;
    Ok(Json(service.save(customer).await?))
}

async fn update(
    State(service): State<CustomerService>,
    Path(id): Path<String>,
    body: Result<Json<CustomerBody>, JsonRejection>,
) -> Result<Json<Customer>, ApiError> {
    let Json(body) = body?;
    Ok(Json(service.save(Customer::new(id, body.name)).await?))
}

async fn delete_by_id(
    State(service): State<CustomerService>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.delete_by_id(&id.into()).await?;
    Ok(StatusCode::NO_CONTENT)
}
