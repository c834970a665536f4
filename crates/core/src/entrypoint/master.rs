// Webmap is an open source distributed web crawler.
// Copyright (C) 2024 Webmap
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The master entrypoint: the http control plane.
//!
//! `GET /` serves the submission form, `POST /submit` runs a whole
//! submission through the cluster and renders the results page. All handler
//! requests are served concurrently; per-submission state lives inside the
//! handler call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::config::{ConfigError, MasterConfig};
use crate::crawler::master::{FarmerHandle, FarmerPool};
use crate::distributed::cluster;
use crate::report::SystemClock;
use crate::Result;

const RESULTS_PLACEHOLDER: &str = "<!-- VYSLEDKY -->";

struct AppState {
    index_page: String,
    results_page: String,
    farmers: FarmerPool,
    results_path: PathBuf,
    clock: SystemClock,
}

pub async fn run(config: MasterConfig) -> Result<()> {
    if config.farmers.is_empty() {
        return Err(ConfigError::NoFarmers.into());
    }

    if config.workers_per_farmer == 0 {
        return Err(ConfigError::NoWorkers.into());
    }

    let index_page = load_template(&config.base_path, "index.html")?;
    let results_page = load_template(&config.base_path, "results.html")?;

    tracing::info!(
        "cluster topology: {} farmers, {} workers each ({} processes in total)",
        config.farmers.len(),
        config.workers_per_farmer,
        1 + config.farmers.len() + config.farmers.len() * config.workers_per_farmer,
    );

    let farmers = cluster::connect_farmers(&config.farmers)
        .await?
        .into_iter()
        .enumerate()
        .map(|(id, channel)| FarmerHandle::spawn(channel, id))
        .collect();

    let state = Arc::new(AppState {
        index_page,
        results_page,
        farmers: FarmerPool::new(farmers),
        results_path: config.results_path.clone(),
        clock: SystemClock,
    });

    let listener = tokio::net::TcpListener::bind(config.host).await?;
    tracing::info!("master listening on http://{}/", config.host);

    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting the cluster down");
    state.farmers.terminate_all().await;

    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/submit", post(submit))
        .fallback(not_found)
        .with_state(state)
}

fn load_template(base_path: &Path, name: &str) -> Result<String> {
    let path = base_path.join(name);

    if !path.exists() {
        return Err(ConfigError::MissingTemplate(path).into());
    }

    Ok(std::fs::read_to_string(path)?)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for the shutdown signal: {}", err);
    }
}

async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.index_page.clone())
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Form(form): Form<HashMap<String, String>>,
) -> std::result::Result<Response, AppError> {
    let Some(input) = form.get("vstup").filter(|input| !input.is_empty()) else {
        return Ok((
            StatusCode::BAD_REQUEST,
            "missing or empty form field 'vstup'",
        )
            .into_response());
    };

    let echo = crate::crawler::master::process(
        input,
        &state.farmers,
        &state.results_path,
        &state.clock,
    )
    .await?;

    Ok(Html(state.results_page.replace(RESULTS_PLACEHOLDER, &echo)).into_response())
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "page not found")
}

/// Any error escaping a handler becomes a plain 500 carrying the message.
struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
