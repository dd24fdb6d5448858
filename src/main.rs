use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use voicedesk::ai::OpenAiClient;
use voicedesk::callcontrol::{run_event_subscriber, AriClient};
use voicedesk::config::AppConfig;
use voicedesk::engine::{DialogEngine, Services};
use voicedesk::intent::IntentClassifier;
use voicedesk::message::MessageCollector;
use voicedesk::tts::TtsCache;
use voicedesk::admin;
use voicedesk::webhook::HttpWebhookNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "voicedesk=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting VoiceDesk v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!(ari_host = %config.ari_host, ari_app = %config.ari_app, "configuration loaded");

    let ai: Arc<dyn voicedesk::ai::AiClient> = Arc::new(OpenAiClient::new(config.openai_api_key.clone()));
    let tts = Arc::new(TtsCache::new(ai.clone(), config.cache_dir.clone()));
    let intent = Arc::new(IntentClassifier::new(ai.clone(), config.services()));
    let collector = Arc::new(MessageCollector::new(ai.clone()));
    let call_control: Arc<dyn voicedesk::callcontrol::CallControlClient> =
        Arc::new(AriClient::new(&config.ari_host, config.ari_port, config.ari_user.clone(), config.ari_password.clone()));
    let webhook = Arc::new(HttpWebhookNotifier::new(config.n8n_webhook_url.clone()));

    let engine = Arc::new(DialogEngine::new(Services {
        ai: ai.clone(),
        tts: tts.clone(),
        intent,
        collector,
        call_control,
        webhook,
        config,
    }));

    // Pre-warm the TTS cache in the background: the engine can start
    // taking calls before every phrase has been synthesized once.
    let prewarm_tts = tts.clone();
    let prewarm_phrases = prewarm_phrases(config);
    tokio::spawn(async move {
        prewarm_tts.prewarm(&prewarm_phrases).await;
        info!("tts pre-warm complete");
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let ws_url = format!(
        "ws://{}:{}/ari/events?app={}&api_key={}:{}",
        config.ari_host, config.ari_port, config.ari_app, config.ari_user, config.ari_password
    );
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let subscriber_handle = tokio::spawn(run_event_subscriber(ws_url, event_tx, shutdown_rx.clone()));

    let dispatch_engine = engine.clone();
    let dispatch_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            dispatch_engine.dispatch(event);
        }
    });

    let admin_addr = "0.0.0.0:8088".to_string();
    let admin_router = admin::router(engine.clone());
    let admin_listener = TcpListener::bind(&admin_addr).await?;
    info!("admin surface listening on http://{admin_addr}");
    let admin_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(admin_listener, admin_router).await {
            error!(error = %e, "admin server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    admin_handle.abort();
    dispatch_handle.abort();
    if let Err(e) = subscriber_handle.await {
        warn!(error = ?e, "event subscriber task did not shut down cleanly");
    }

    Ok(())
}

/// The fixed list of phrases pre-warmed at startup: greeting,
/// one transfer announcement per configured service, the service-busy
/// opener, the collection prompts, the closer, the clarification retry,
/// and the goodbye.
fn prewarm_phrases(config: &'static AppConfig) -> Vec<String> {
    let mut phrases = vec![
        config.greeting_message.clone(),
        "Le service est actuellement occupé. Puis-je prendre un message ? Quel est votre nom ?".to_string(),
        "Puis-je avoir votre nom s'il vous plaît ?".to_string(),
        "Et votre société ?".to_string(),
        "Quel est le sujet de votre appel ?".to_string(),
        "Merci pour ces informations. Nous vous rappellerons dès que possible.".to_string(),
        "Je n'ai pas compris. Pouvez-vous répéter s'il vous plaît ?".to_string(),
        "Pouvez-vous me donner plus de détails ?".to_string(),
        "Au revoir et merci de votre appel.".to_string(),
    ];

    for service in config.services() {
        phrases.push(format!("Je vous transfère au {}. Un instant s'il vous plaît.", service.name));
    }

    phrases
}
