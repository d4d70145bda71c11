use axum::Form;
use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::{Html, IntoResponse, Redirect, Response};
use log::{info, warn};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::flash::{self, Flash};
use crate::server::{AppState, page};

#[derive(Debug, Deserialize)]
pub struct AddForm {
    magnet: Option<String>,
}

/// `GET /`
pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let (flash, clear) = flash::take(&headers)?;
    let mut transfers = state.swarm.transfers();
    transfers.sort_by_cached_key(|transfer| transfer.name());
    let mut response = Html(page::render(&transfers, flash.as_ref())).into_response();
    if let Some(clear) = clear {
        response.headers_mut().append(SET_COOKIE, clear);
    }
    Ok(response)
}

/// `POST /`
pub async fn add(
    State(state): State<AppState>,
    form: std::result::Result<Form<AddForm>, FormRejection>,
) -> Result<Response> {
    let Form(form) = form.map_err(|err| Error::Internal(err.body_text()))?;
    let mut response = Redirect::to("/").into_response();
    let magnet = form.magnet.as_deref().map(str::trim).unwrap_or_default();
    if magnet.is_empty() {
        return Ok(response);
    }
    let flash = match state.lifecycle.add_magnet(magnet) {
        Ok(transfer) => {
            info!("added {} ({})", transfer.name(), transfer.info_hash);
            Flash::info(format!("Added {}", transfer.name()))
        }
        Err(err) => {
            warn!("rejected {:?}: {}", magnet, err);
            Flash::error(err.to_string())
        }
    };
    response.headers_mut().insert(SET_COOKIE, flash.set_cookie());
    Ok(response)
}
