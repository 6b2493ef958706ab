use actix::Actor;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::rc::Rc;

use chess_session::config::Cli;
use chess_session::game::ChessRules;
use chess_session::models::app_state::AppState;
use chess_session::routes::configure_routes;
use chess_session::session::storage::{FileStore, LocalStore};
use chess_session::session::{GameSession, SessionActor};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = cli.session_config();

    let store = match &config.storage_dir {
        Some(dir) => FileStore::new(dir.clone()),
        None => FileStore::in_default_dir(),
    };
    info!("Session storage in {}", store.dir().display());
    let store: Rc<dyn LocalStore> = Rc::new(store);

    let mut session = GameSession::new(Box::new(ChessRules), store, config);
    match session.resume(cli.game_id.clone()) {
        Some(game_id) => info!("Attached to game {}", game_id),
        None => info!("No game to attach to; pass --game-id to join one"),
    }
    if cli.server_url.is_none() {
        info!("No --server-url given; running offline");
    }

    let session = SessionActor::new(session, cli.server()).start();
    let static_dir = cli.static_dir.clone().unwrap_or_else(|| PathBuf::from("./static"));
    let app_state = web::Data::new(AppState::new(session, static_dir.clone()));

    info!("Starting chess session host at http://{}", cli.bind);

    HttpServer::new(move || {
        let static_dir = static_dir.clone();
        App::new()
            .app_data(app_state.clone())
            .configure(move |cfg| configure_routes(cfg, &static_dir))
    })
    .bind(cli.bind.as_str())?
    .run()
    .await
}
