use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// 查询引擎内部错误分类
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported aggregation: {0}")]
    UnsupportedAggregation(String),
    #[error("batch for {schema}.{table}.{column} has no values")]
    EmptyBatchValues {
        schema: String,
        table: String,
        column: String,
    },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("all pagination strategies failed, last error: {0}")]
    StrategiesExhausted(Box<EngineError>),
}

impl EngineError {
    /// 配置类错误: 同步失败, 直接反馈给调用方
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::UnsupportedAggregation(_)
            | Self::EmptyBatchValues { .. }
            | Self::InvalidIdentifier(_)
            | Self::InvalidFilter(_)
            | Self::UnknownColumn(_) => true,
            Self::StrategiesExhausted(inner) => inner.is_configuration(),
            Self::Database(_) => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error_type) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Engine(e) if e.is_configuration() => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Engine(_) => (StatusCode::BAD_GATEWAY, "database_error"),
        };

        let body = ErrorBody {
            status: "error",
            error_type,
            error: message,
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    error_type: &'a str,
    error: String,
}
