use actix_files as fs;
use actix_web::error::ErrorInternalServerError;
use actix_web::{web, Error, HttpResponse};
use std::path::Path;

use crate::models::app_state::AppState;
use crate::session::actor::GetView;

/// HTTP handler for the index page
pub async fn index(app_state: web::Data<AppState>) -> Result<fs::NamedFile, Error> {
    let page = app_state.static_dir.join("index.html");
    Ok(fs::NamedFile::open_async(page).await?)
}

/// Current session view as JSON
pub async fn session_view(app_state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let view = app_state
        .session
        .send(GetView)
        .await
        .map_err(ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(view))
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: &Path) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/api/session").route(web::get().to(session_view)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(fs::Files::new("/static", static_dir));
}
