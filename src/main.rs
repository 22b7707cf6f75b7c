use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::{
    signal,
    sync::{broadcast, mpsc},
};
use tracing::{info, warn};
use uuid::Uuid;

use storefront_api as api;
use api::{
    auth::{AuthConfig, AuthService, Role},
    events::{process_events, EventSender},
    notifications::{mailer::mailer_from_config, ChannelNotifier},
    payments::{DisabledGateway, HttpPaymentGateway, PaymentGateway, SignatureVerifier},
    repositories::{SeaOrmCatalogStore, SeaOrmOrderRepository, SeaOrmUserDirectory},
    services::{OrderWorkflow, WorkflowDeps},
};

#[derive(Parser)]
#[command(name = "storefront-api", version, about = "Storefront order backend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
    /// Print a bearer token for a user
    IssueToken {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        admin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::Migrate => {
            let pool = api::db::establish_connection_from_app_config(&cfg)
                .await
                .context("failed to connect to database")?;
            api::db::run_migrations(&pool)
                .await
                .context("failed running migrations")?;
            Ok(())
        }
        Commands::IssueToken { user_id, admin } => {
            let auth = AuthService::new(AuthConfig::new(cfg.jwt_secret.clone()));
            let role = if admin { Role::Admin } else { Role::Customer };
            let token = auth
                .generate_token(user_id, role)
                .context("failed to sign token")?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(cfg: api::config::AppConfig) -> Result<()> {
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool)
            .await
            .context("failed running migrations")?;
    }
    let db = Arc::new(db_pool);

    let gateway: Arc<dyn PaymentGateway> = if cfg.gateway.is_configured() {
        Arc::new(
            HttpPaymentGateway::new(&cfg.gateway)
                .context("failed to build payment gateway client")?,
        )
    } else {
        warn!("Payment gateway keys not configured; gateway payments are disabled");
        Arc::new(DisabledGateway)
    };
    let verifier = match &cfg.gateway.key_secret {
        Some(secret) => SignatureVerifier::new(secret),
        None => SignatureVerifier::unconfigured(),
    };

    // Background notifications and refresh fan-out
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let (refresh_tx, _) = broadcast::channel(cfg.refresh_channel_capacity);
    let mailer = mailer_from_config(&cfg.mail).context("failed to build mailer")?;
    tokio::spawn(process_events(event_rx, mailer, refresh_tx.clone()));

    let workflow = OrderWorkflow::new(WorkflowDeps {
        orders: Arc::new(SeaOrmOrderRepository::new(db.clone())),
        catalog: Arc::new(SeaOrmCatalogStore::new(db.clone())),
        users: Arc::new(SeaOrmUserDirectory::new(db.clone())),
        gateway,
        verifier,
        notifier: Arc::new(ChannelNotifier::new(EventSender::new(event_tx))),
        restock_policy: cfg.admin_cancel_restock,
    });

    let addr = cfg.bind_address();
    let state = api::AppState {
        auth: Arc::new(AuthService::new(AuthConfig::new(cfg.jwt_secret.clone()))),
        config: Arc::new(cfg),
        workflow: Arc::new(workflow),
        refresh: refresh_tx,
        db: Some(db),
    };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("storefront-api listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("storefront-api stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
