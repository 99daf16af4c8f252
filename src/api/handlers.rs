use std::sync::Mutex;

use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::chain::ChainAudit;
use crate::blockchain::transaction::{InputSource, TxInput, TxOutput};
use crate::blockchain::{Address, Block, Blockchain, BlockchainError, Transaction};
use crate::config::WalletConfig;
use crate::wallet::{WalletError, Wallets};

/// Shared ledger; every request takes the lock on the blocking pool, so
/// appends never overlap and a long seal never stalls an async worker
pub type LedgerData = web::Data<Mutex<Blockchain>>;

/// Wallet file location, locked while the file is rewritten
pub type WalletData = web::Data<Mutex<WalletConfig>>;

/// A transaction input as exposed over HTTP
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InputView {
    /// Id of the spent transaction; absent for coinbase inputs
    pub txid: Option<String>,

    /// Index of the spent output; absent for coinbase inputs
    pub output_index: Option<u32>,

    /// Unlock data (spender address or coinbase memo)
    pub unlock: String,
}

/// A transaction output as exposed over HTTP
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OutputView {
    pub value: u64,
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransactionView {
    pub id: String,
    pub is_coinbase: bool,
    pub inputs: Vec<InputView>,
    pub outputs: Vec<OutputView>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockView {
    pub hash: String,
    pub prev_hash: String,
    pub timestamp: i64,
    pub difficulty: u32,
    pub nonce: u64,

    /// Whether the stored seal re-verifies
    pub pow_valid: bool,

    pub transactions: Vec<TransactionView>,
}

impl From<&TxInput> for InputView {
    fn from(input: &TxInput) -> Self {
        let (txid, output_index) = match &input.source {
            InputSource::Coinbase => (None, None),
            InputSource::Spend(outpoint) => (Some(hex::encode(&outpoint.txid)), Some(outpoint.index)),
        };

        InputView {
            txid,
            output_index,
            unlock: input.unlock.clone(),
        }
    }
}

impl From<&TxOutput> for OutputView {
    fn from(output: &TxOutput) -> Self {
        OutputView {
            value: output.value,
            address: output.lock.0.clone(),
        }
    }
}

impl From<&Transaction> for TransactionView {
    fn from(transaction: &Transaction) -> Self {
        TransactionView {
            id: transaction.id_hex(),
            is_coinbase: transaction.is_coinbase(),
            inputs: transaction.inputs.iter().map(InputView::from).collect(),
            outputs: transaction.outputs.iter().map(OutputView::from).collect(),
        }
    }
}

impl From<&Block> for BlockView {
    fn from(block: &Block) -> Self {
        BlockView {
            hash: block.hash_hex(),
            prev_hash: block.prev_hash_hex(),
            timestamp: block.timestamp,
            difficulty: block.difficulty,
            nonce: block.nonce,
            pow_valid: block.verify_seal(),
            transactions: block.transactions.iter().map(TransactionView::from).collect(),
        }
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// Hash of the newest block
    pub tip: String,

    /// The blocks from tip to genesis
    pub blocks: Vec<BlockView>,

    /// Whether every seal and link checks out
    pub is_valid: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u64,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct UnspentResponse {
    pub address: String,

    /// Transactions holding unspent outputs for the address
    pub transactions: Vec<TransactionView>,
}

/// Request for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendRequest {
    /// The sender's address
    pub from: String,

    /// The recipient's address
    pub to: String,

    /// The amount to transfer
    pub amount: u64,
}

/// Response for the send endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct SendResponse {
    /// The message
    pub message: String,

    /// The block holding the transfer
    pub block: BlockView,
}

/// Response for the create wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address
    pub address: String,
}

/// Runs `f` against the ledger on the blocking thread pool
///
/// # Arguments
///
/// * `ledger` - The shared ledger
/// * `f` - The work to run while holding the ledger lock
///
/// # Returns
///
/// Whatever `f` returns, or a system error if the lock is poisoned or the
/// blocking task could not run
async fn with_ledger<T, F>(ledger: &LedgerData, f: F) -> Result<T, BlockchainError>
where
    F: FnOnce(&mut Blockchain) -> Result<T, BlockchainError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = ledger.clone();

    web::block(move || -> Result<T, BlockchainError> {
        let mut chain = ledger
            .lock()
            .map_err(|_| BlockchainError::SystemError("ledger lock poisoned".to_string()))?;
        f(&mut *chain)
    })
    .await
    .map_err(|e| BlockchainError::SystemError(format!("blocking task failed: {}", e)))?
}

fn error_response(err: &BlockchainError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        BlockchainError::TransactionError(_) => HttpResponse::BadRequest().json(body),
        _ => {
            warn!("Request failed: {}", err);
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Get the full blockchain
///
/// Returns every block from tip to genesis and whether the chain audits clean
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let result = with_ledger(&ledger, |chain| {
        let blocks = chain.iter().collect::<Result<Vec<_>, _>>()?;
        let audit = chain.audit()?;
        Ok((hex::encode(chain.tip_hash()), blocks, audit))
    })
    .await;

    match result {
        Ok((tip, blocks, audit)) => HttpResponse::Ok().json(ChainResponse {
            length: blocks.len(),
            tip,
            blocks: blocks.iter().map(BlockView::from).collect(),
            is_valid: audit.is_valid(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Check if the blockchain is valid
///
/// Re-verifies every seal and back link
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let result: Result<ChainAudit, BlockchainError> = with_ledger(&ledger, |chain| chain.audit()).await;

    match result {
        Ok(audit) => HttpResponse::Ok().json(audit.is_valid()),
        Err(err) => error_response(&err),
    }
}

/// Get balance
///
/// Sums the unspent outputs locked to the address
#[utoipa::path(
    get,
    path = "/api/v1/balance/{address}",
    params(
        ("address" = String, Path, description = "Address to query")
    ),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_balance(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let query = address.clone();

    match with_ledger(&ledger, move |chain| chain.balance(&query)).await {
        Ok(balance) => HttpResponse::Ok().json(BalanceResponse {
            address: address.0,
            balance,
        }),
        Err(err) => error_response(&err),
    }
}

/// Get unspent transactions
///
/// Lists the transactions that still hold unspent outputs for the address
#[utoipa::path(
    get,
    path = "/api/v1/unspent/{address}",
    params(
        ("address" = String, Path, description = "Address to query")
    ),
    responses(
        (status = 200, description = "Unspent transactions retrieved successfully", body = UnspentResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn get_unspent(ledger: LedgerData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let query = address.clone();

    match with_ledger(&ledger, move |chain| chain.find_unspent_transactions(&query)).await {
        Ok(transactions) => HttpResponse::Ok().json(UnspentResponse {
            address: address.0,
            transactions: transactions.iter().map(TransactionView::from).collect(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Send funds
///
/// Builds a transfer from the sender's unspent outputs and seals it into a new block
#[utoipa::path(
    post,
    path = "/api/v1/send",
    request_body = SendRequest,
    responses(
        (status = 201, description = "Transfer sealed", body = SendResponse),
        (status = 400, description = "Insufficient funds or invalid amount"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn send(ledger: LedgerData, request: web::Json<SendRequest>) -> impl Responder {
    let request = request.into_inner();

    let result = with_ledger(&ledger, move |chain| {
        let transaction = Transaction::new_transfer(
            &Address(request.from),
            &Address(request.to),
            request.amount,
            chain,
        )?;
        chain.add_block(vec![transaction])
    })
    .await;

    match result {
        Ok(block) => HttpResponse::Created().json(SendResponse {
            message: "New transaction success".to_string(),
            block: BlockView::from(&block),
        }),
        Err(err) => error_response(&err),
    }
}

/// Create a new wallet
///
/// Generates a key pair, stores it in the wallet file and returns its address
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet(wallet: WalletData) -> impl Responder {
    let wallet = wallet.clone();

    let result = web::block(move || -> Result<Address, WalletError> {
        let config = wallet
            .lock()
            .map_err(|_| WalletError::Io(std::io::Error::new(std::io::ErrorKind::Other, "wallet lock poisoned")))?;
        let mut wallets = Wallets::load(&config.path)?;
        let address = wallets.add_wallet();
        wallets.save()?;
        Ok(address)
    })
    .await;

    match result {
        Ok(Ok(address)) => HttpResponse::Created().json(WalletResponse { address: address.0 }),
        Ok(Err(err)) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to create wallet: {}", err)
        })),
        Err(err) => HttpResponse::InternalServerError().json(serde_json::json!({
            "error": format!("Failed to create wallet: {}", err)
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::ChainParams;
    use actix_web::{http::StatusCode, test, App};

    fn ledger(dir: &std::path::Path) -> LedgerData {
        let params = ChainParams {
            difficulty: 8,
            reward: 100,
            seal_timeout: None,
        };
        let chain = Blockchain::initialize(dir, &Address::from("Alice"), &params).unwrap();
        web::Data::new(Mutex::new(chain))
    }

    #[actix_web::test]
    async fn test_balance_and_send() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(ledger(dir.path()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/balance/Alice").to_request();
        let body: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.balance, 100);

        let req = test::TestRequest::post()
            .uri("/api/v1/send")
            .set_json(SendRequest { from: "Alice".into(), to: "Bob".into(), amount: 1000 })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/send")
            .set_json(SendRequest { from: "Alice".into(), to: "Bob".into(), amount: 40 })
            .to_request();
        let body: SendResponse = test::call_and_read_body_json(&app, req).await;
        assert!(body.block.pow_valid);
        assert_eq!(body.block.transactions[0].outputs[0].address, "Bob");

        let req = test::TestRequest::get().uri("/api/v1/balance/Bob").to_request();
        let body: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.balance, 40);

        let req = test::TestRequest::get().uri("/api/v1/unspent/Alice").to_request();
        let body: UnspentResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.transactions.len(), 1);
        assert!(!body.transactions[0].is_coinbase);
    }

    #[actix_web::test]
    async fn test_chain_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(ledger(dir.path()))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let body: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.length, 1);
        assert!(body.is_valid);
        assert_eq!(body.tip, body.blocks[0].hash);
        assert!(body.blocks[0].transactions[0].is_coinbase);
        assert_eq!(body.blocks[0].transactions[0].inputs[0].txid, None);

        let req = test::TestRequest::get().uri("/api/v1/validate").to_request();
        let valid: bool = test::call_and_read_body_json(&app, req).await;
        assert!(valid);
    }

    #[actix_web::test]
    async fn test_reads_wait_off_the_worker_while_ledger_is_busy() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger(dir.path());
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .configure(configure_routes),
        )
        .await;

        // Stands in for a long seal holding the ledger
        let busy = ledger.lock().unwrap();
        let req = test::TestRequest::get().uri("/api/v1/balance/Alice").to_request();
        let waited = actix_web::rt::time::timeout(
            std::time::Duration::from_millis(200),
            test::call_service(&app, req),
        )
        .await;
        assert!(waited.is_err());
        drop(busy);

        let req = test::TestRequest::get().uri("/api/v1/balance/Alice").to_request();
        let body: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.balance, 100);
    }

    #[actix_web::test]
    async fn test_create_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = WalletConfig { path: dir.path().join("wallets.json") };
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Mutex::new(wallet)))
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let body: WalletResponse = test::call_and_read_body_json(&app, req).await;

        let wallets = Wallets::load(dir.path().join("wallets.json")).unwrap();
        assert_eq!(wallets.addresses(), vec![Address(body.address)]);
    }
}
