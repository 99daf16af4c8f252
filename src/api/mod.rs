// API module
//
// HTTP surface over a single ledger handle

pub mod handlers;
pub mod routes;

use std::sync::{Arc, Mutex};

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::blockchain::{Blockchain, StopSignal};
use crate::config::{ApiConfig, WalletConfig};

pub use routes::configure_routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_chain,
        handlers::validate_chain,
        handlers::get_balance,
        handlers::get_unspent,
        handlers::send,
        handlers::create_wallet
    ),
    components(
        schemas(
            handlers::BlockView,
            handlers::TransactionView,
            handlers::InputView,
            handlers::OutputView,
            handlers::ChainResponse,
            handlers::BalanceResponse,
            handlers::UnspentResponse,
            handlers::SendRequest,
            handlers::SendResponse,
            handlers::WalletResponse
        )
    ),
    tags(
        (name = "ledger", description = "UTXO ledger API endpoints")
    ),
    info(
        title = "UTXO Ledger API",
        version = "1.0.0",
        description = "A single-node proof-of-work UTXO ledger"
    )
)]
pub struct ApiDoc;

/// Serves the API until the server is stopped, then closes the ledger
///
/// # Arguments
///
/// * `chain` - The opened ledger, shared by every worker
/// * `wallet` - Location of the wallet file
/// * `api` - Bind address
///
/// Ctrl-C cancels a seal that is still running so shutdown does not wait
/// for it.
pub async fn run_server(chain: Blockchain, wallet: WalletConfig, api: ApiConfig) -> std::io::Result<()> {
    let stop = StopSignal::new();
    let ledger = web::Data::new(Mutex::new(chain.with_stop_signal(stop.clone())));
    let wallet = web::Data::new(Mutex::new(wallet));

    info!("Starting HTTP server at http://{}:{}", api.host, api.port);

    actix_web::rt::spawn(async move {
        if actix_web::rt::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling any running seal");
            stop.stop();
        }
    });

    let app_ledger = ledger.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(app_ledger.clone())
            .app_data(wallet.clone())
            .configure(configure_routes)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", ApiDoc::openapi()),
            )
    })
    .bind((api.host.as_str(), api.port))?
    .run()
    .await?;

    match Arc::try_unwrap(ledger.into_inner()) {
        Ok(mutex) => match mutex.into_inner() {
            Ok(chain) => {
                if let Err(err) = chain.close() {
                    warn!("Failed to close ledger: {}", err);
                }
            }
            Err(_) => warn!("Ledger lock poisoned on shutdown"),
        },
        Err(_) => warn!("Ledger still shared on shutdown, relying on drop to flush"),
    }

    Ok(())
}
