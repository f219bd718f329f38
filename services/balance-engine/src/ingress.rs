//! Request ingress
//!
//! Thin HTTP adapter over the core: `mutate` goes through the outbox,
//! `query` reads the authoritative store. Everything else the service
//! exposes here is operational (health, prometheus metrics).

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use balance_core::{
    AccountId, CoreError, Currency, MutationKind, MutationRequest, TransactionId,
};
use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use crate::config::ServerConfig;
use crate::database::PgStore;
use crate::errors::EngineError;
use crate::outbox::OutboxWriter;

pub struct AppState {
    pub outbox: Arc<OutboxWriter>,
    pub store: Arc<PgStore>,
}

#[derive(Debug, Deserialize)]
struct MutateBody {
    transaction_id: String,
    account_id: i64,
    #[serde(default)]
    partition_key: Option<String>,
    currency: String,
    kind: String,
    #[serde(default)]
    to_account: Option<i64>,
    amount: Decimal,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

impl MutateBody {
    fn into_request(self) -> Result<MutationRequest, CoreError> {
        let kind = match self.kind.as_str() {
            "deposit" => MutationKind::Deposit,
            "withdraw" => MutationKind::Withdraw,
            "freeze" => MutationKind::Freeze,
            "unfreeze" => MutationKind::Unfreeze,
            "transfer" => {
                let to_account = self.to_account.ok_or_else(|| {
                    CoreError::Validation("transfer requires to_account".to_string())
                })?;
                MutationKind::Transfer {
                    to_account: AccountId(to_account),
                }
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "unknown mutation kind: {}",
                    other
                )))
            }
        };

        Ok(MutationRequest {
            transaction_id: TransactionId::new(self.transaction_id)?,
            account_id: AccountId(self.account_id),
            partition_key: self
                .partition_key
                .unwrap_or_else(|| format!("acct-{}", self.account_id)),
            currency: Currency::new(self.currency)?,
            kind,
            amount: self.amount,
            description: self.description,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, Serialize)]
struct MutateResponse {
    event_id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct BalanceResponse {
    account_id: i64,
    currency: String,
    available: Decimal,
    frozen: Decimal,
    version: i64,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct TransactionResponse {
    transaction_id: String,
    account_id: i64,
    currency: String,
    kind: String,
    amount: Decimal,
    available_before: Decimal,
    available_after: Decimal,
    frozen_before: Decimal,
    frozen_after: Decimal,
    status: &'static str,
    error_message: Option<String>,
    created_at: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

async fn mutate(state: web::Data<AppState>, body: web::Json<MutateBody>) -> impl Responder {
    let request = match body.into_inner().into_request() {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::UnprocessableEntity().json(ErrorResponse {
                error: "invalid",
                message: e.to_string(),
            })
        }
    };

    match state.outbox.submit(&request).await {
        Ok(event_id) => HttpResponse::Ok().json(MutateResponse {
            event_id: event_id.to_string(),
        }),
        Err(e) => error_response(e),
    }
}

fn error_response(e: EngineError) -> HttpResponse {
    match e.into_core() {
        CoreError::Duplicate(id) => HttpResponse::Conflict().json(ErrorResponse {
            error: "duplicate",
            message: format!("transaction {} already submitted", id),
        }),
        CoreError::Validation(message) => {
            HttpResponse::UnprocessableEntity().json(ErrorResponse {
                error: "invalid",
                message,
            })
        }
        other => {
            error!("Mutation submit failed: {}", other);
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "transient",
                message: "temporarily unable to accept mutations, retry with the same transaction_id"
                    .to_string(),
            })
        }
    }
}

async fn query_balance(
    state: web::Data<AppState>,
    path: web::Path<(i64, String)>,
) -> impl Responder {
    let (account_id, currency) = path.into_inner();

    let currency = match Currency::new(currency) {
        Ok(currency) => currency,
        Err(e) => {
            return HttpResponse::UnprocessableEntity().json(ErrorResponse {
                error: "invalid",
                message: e.to_string(),
            })
        }
    };

    match state.store.get_balance(AccountId(account_id), &currency).await {
        Ok(Some(balance)) => HttpResponse::Ok().json(BalanceResponse {
            account_id: balance.account_id.value(),
            currency: balance.currency.to_string(),
            available: balance.available,
            frozen: balance.frozen,
            version: balance.version,
            updated_at: balance.updated_at.to_rfc3339(),
        }),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "not_found",
            message: format!("no balance for account {} in {}", account_id, currency),
        }),
        Err(e) => {
            error!("Balance query failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "transient",
                message: "balance store unavailable".to_string(),
            })
        }
    }
}

/// Terminal outcome of a mutation; clients poll this after an accepted
/// submit to learn whether the pipeline applied or rejected it
async fn query_transaction(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let transaction_id = path.into_inner();

    match state.store.get_ledger_entry(&transaction_id).await {
        Ok(Some(entry)) => HttpResponse::Ok().json(TransactionResponse {
            transaction_id: entry.transaction_id.to_string(),
            account_id: entry.account_id.value(),
            currency: entry.currency.to_string(),
            kind: entry.kind,
            amount: entry.amount,
            available_before: entry.available_before,
            available_after: entry.available_after,
            frozen_before: entry.frozen_before,
            frozen_after: entry.frozen_after,
            status: entry.status.as_str(),
            error_message: entry.error_message,
            created_at: entry.created_at.to_rfc3339(),
        }),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
            error: "not_found",
            message: format!("no ledger entry for transaction {}", transaction_id),
        }),
        Err(e) => {
            error!("Transaction query failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ErrorResponse {
                error: "transient",
                message: "ledger store unavailable".to_string(),
            })
        }
    }
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "balance-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn prometheus_metrics() -> impl Responder {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => HttpResponse::Ok()
                .content_type("text/plain; version=0.0.4")
                .body(body),
            Err(e) => HttpResponse::InternalServerError()
                .body(format!("Failed to encode metrics: {}", e)),
        },
        Err(e) => {
            HttpResponse::InternalServerError().body(format!("Failed to gather metrics: {}", e))
        }
    }
}

/// Build and bind the ingress server; the caller spawns/awaits it
pub fn run_server(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> std::io::Result<actix_web::dev::Server> {
    let bind_address = format!("{}:{}", config.host, config.http_port);
    let state = web::Data::from(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .route("/metrics", web::get().to(prometheus_metrics))
            .route("/api/v1/mutations", web::post().to(mutate))
            .route(
                "/api/v1/balances/{account_id}/{currency}",
                web::get().to(query_balance),
            )
            .route(
                "/api/v1/transactions/{transaction_id}",
                web::get().to(query_transaction),
            )
    })
    // The runtime owns shutdown ordering; the server must not react to
    // signals on its own
    .disable_signals()
    .bind(&bind_address)?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn body(kind: &str) -> MutateBody {
        MutateBody {
            transaction_id: "t1".to_string(),
            account_id: 1,
            partition_key: None,
            currency: "USDT".to_string(),
            kind: kind.to_string(),
            to_account: None,
            amount: dec!(100.00),
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_body_conversion_defaults_partition_key() {
        let request = body("deposit").into_request().unwrap();
        assert_eq!(request.partition_key, "acct-1");
        assert_eq!(request.kind, MutationKind::Deposit);
    }

    #[test]
    fn test_transfer_requires_target() {
        assert!(body("transfer").into_request().is_err());

        let mut b = body("transfer");
        b.to_account = Some(2);
        let request = b.into_request().unwrap();
        assert_eq!(
            request.kind,
            MutationKind::Transfer {
                to_account: AccountId(2)
            }
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(body("mint").into_request().is_err());
    }
}
