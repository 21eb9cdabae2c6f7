//! HTTP endpoints for health checks, the invoice list and PDF downloads.

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{
    invoice::InvoiceRecord,
    reducer::{Invoices, Phase},
    render::{filename, render_pdf},
};

struct HttpState {
    invoices: watch::Receiver<Invoices>,
    phase: watch::Receiver<Phase>,
}

/// Response body for the `/healthz` endpoint.
#[derive(Serialize, Deserialize)]
struct Health {
    /// Always "ok" when the server is running.
    status: String,
    /// Reducer lifecycle phase.
    phase: Phase,
    /// Size of the visible collection.
    invoices: usize,
}

fn router(invoices: watch::Receiver<Invoices>, phase: watch::Receiver<Phase>) -> Router {
    let state = Arc::new(HttpState { invoices, phase });
    Router::new()
        .route("/healthz", get(healthz))
        .route("/invoices", get(list_invoices))
        .route("/invoices/:index/pdf", get(invoice_pdf))
        .with_state(state)
}

/// Start an HTTP server over the reducer's visible collection.
pub async fn serve_http(
    addr: SocketAddr,
    invoices: watch::Receiver<Invoices>,
    phase: watch::Receiver<Phase>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(invoices, phase).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn healthz(State(state): State<Arc<HttpState>>) -> Json<Health> {
    debug!("GET /healthz");
    Json(Health {
        status: "ok".to_string(),
        phase: *state.phase.borrow(),
        invoices: state.invoices.borrow().len(),
    })
}

async fn list_invoices(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    debug!("GET /invoices");
    let invoices: Vec<InvoiceRecord> = state.invoices.borrow().to_vec();
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(invoices),
    )
}

/// Render the invoice at `index` of the visible collection.
async fn invoice_pdf(
    State(state): State<Arc<HttpState>>,
    Path(index): Path<usize>,
) -> Response {
    debug!(index, "GET /invoices/:index/pdf");
    let invoices = state.invoices.borrow().clone();
    let Some(inv) = invoices.get(index) else {
        return (StatusCode::NOT_FOUND, "no such invoice").into_response();
    };
    match render_pdf(inv) {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/pdf".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", filename(inv)),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!(index, "pdf render failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
