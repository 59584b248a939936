//! `axum` router implementing the server endpoints of spec §6, grounded on
//! the pack's payjoin receiver (`other_examples/…payjoin.rs`): one `State`
//! extractor carrying a shared `Coordinator`, one handler per verb.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bitcoin::secp256k1::Secp256k1;
use serde::Deserialize;

use crate::backend::coordinator::Coordinator;
use crate::config::constants;
use crate::envelope::pledge::Pledge;
use crate::http::status::ProjectStatus;

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/_lighthouse/crowdfund/project/:id", get(get_project).post(post_pledge))
        .with_state(coordinator)
}

#[derive(Debug, Deserialize, Default)]
struct AuthQuery {
    sig: Option<String>,
    msg: Option<String>,
}

/// Split `"{id}.{format}"` into its id and optional format, per spec §6.
fn split_id_and_format(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('.') {
        Some((id, format)) => (id, Some(format)),
        None => (raw, None),
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

async fn get_project(Path(raw_id): Path<String>, Query(auth): Query<AuthQuery>, State(coordinator): State<Arc<Coordinator>>) -> Response {
    let (id, format) = split_id_and_format(&raw_id);

    if format == Some(constants::PROJECT_EXTENSION) {
        return match coordinator.project(id) {
            Some(project) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, constants::PROJECT_MIME)],
                project.raw_bytes().to_vec(),
            )
                .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let authenticated = match (&auth.sig, &auth.msg) {
        (Some(sig_hex), Some(msg)) => {
            let project = coordinator.project(id);
            match (project, hex::decode(sig_hex)) {
                (Some(project), Ok(sig_bytes)) => {
                    let secp = Secp256k1::verification_only();
                    project.authenticate_owner(&secp, msg.as_bytes(), &sig_bytes)
                }
                _ => false,
            }
        }
        _ => false,
    };

    let Some(status) = coordinator.project_status(id, authenticated, now_unix_secs()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match format {
        None => (StatusCode::OK, [(header::CONTENT_TYPE, "application/x-protobuf")], status.to_protobuf()).into_response(),
        Some("json") => (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")], status.to_json()).into_response(),
        Some("xml") => (StatusCode::OK, [(header::CONTENT_TYPE, "application/xml")], status.to_xml()).into_response(),
        Some("html") => (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], status.to_html()).into_response(),
        Some(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn post_pledge(Path(raw_id): Path<String>, State(coordinator): State<Arc<Coordinator>>, body: axum::body::Bytes) -> Response {
    let (id, _format) = split_id_and_format(&raw_id);

    if body.len() > constants::POST_BODY_CAP_BYTES {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let pledge = match Pledge::parse(&body) {
        Ok(pledge) => pledge,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match coordinator.submit_pledge(id, pledge).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(crate::error::CrowdfundError::ProjectClosed(_)) | Err(crate::error::CrowdfundError::DuplicatePledge(_)) => {
            StatusCode::BAD_REQUEST.into_response()
        }
        Err(crate::error::CrowdfundError::Pledge(_)) | Err(crate::error::CrowdfundError::Parse(_)) => StatusCode::BAD_REQUEST.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_id_and_format() {
        assert_eq!(split_id_and_format("abc123.json"), ("abc123", Some("json")));
        assert_eq!(split_id_and_format("abc123"), ("abc123", None));
        assert_eq!(split_id_and_format("abc123.lighthouse-project"), ("abc123", Some("lighthouse-project")));
    }
}
