use std::sync::Arc;

use studylink::client::cache::QueryCache;
use studylink::client::config::ClientConfig;
use studylink::client::conversation::{shared_view_state, ConversationView};
use studylink::client::notify::Notifier;
use studylink::client::services::api_client::{ApiClient, ApiFetcher, DurableApi};
use studylink::client::services::socket_client::SocketClient;
use studylink::client::session::{self, SessionIdentity};
use studylink::client::sync::SyncEngine;

/// Manual probe: connect with a stored session, optionally open a direct
/// thread, and print every toast the sync layer produces.
///
/// Usage: sync-probe [peer_id | logout]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = ClientConfig::from_env();
    std::env::set_var("RUST_LOG", &cfg.log_level);
    env_logger::init();

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("logout") {
        session::clear_session()?;
        println!("Stored session cleared");
        return Ok(());
    }

    let session = match session::load_session() {
        Some(s) => s,
        None => {
            let user_id = std::env::var("STUDYLINK_USER_ID")
                .map_err(|_| anyhow::anyhow!("no stored session and STUDYLINK_USER_ID not set"))?;
            let token = std::env::var("STUDYLINK_TOKEN")
                .map_err(|_| anyhow::anyhow!("no stored session and STUDYLINK_TOKEN not set"))?;
            let s = SessionIdentity::new(user_id, token);
            if let Err(e) = session::save_session(&s) {
                log::warn!("[PROBE] session not persisted: {}", e);
            }
            s
        }
    };

    println!("Using API {} and socket {}", cfg.api_base_url, cfg.websocket_url());

    let api: Arc<dyn DurableApi> = Arc::new(ApiClient::new(cfg.api_base_url.clone(), session.clone()));
    let cache = QueryCache::new(Arc::new(ApiFetcher::new(api.clone())));
    let (notifier, mut toasts) = Notifier::new();
    let state = shared_view_state();

    let mut socket = SocketClient::new(cfg.websocket_url(), session.clone());
    socket.connect().await?;
    let events = socket
        .take_receiver()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;
    let socket = Arc::new(socket);

    let view = Arc::new(ConversationView::new(
        session.clone(),
        cache.clone(),
        api,
        socket,
        notifier.clone(),
        state.clone(),
    ));
    let engine = SyncEngine::new(cache, notifier, view.clone(), state);

    if let Some(peer) = arg {
        println!("Opening direct thread with {}", peer);
        view.select_direct(&peer).await;
    }

    tokio::spawn(async move {
        while let Some(toast) = toasts.recv().await {
            println!("TOAST [{:?}] {}", toast.level, toast.message);
        }
    });

    engine.run(events).await;
    Ok(())
}
