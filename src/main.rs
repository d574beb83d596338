mod network;
mod node;
mod wallet;
mod wire;

use chain_core::{ChainStore, Transaction, TxInput, TxOutput};
use chain_shared::{hash_pubkey, ChainError, Hash256, Result};
use clap::{Parser, Subcommand};
use node::{NodeContext, CENTRAL_NODE};
use std::sync::Arc;
use tracing::info;
use wallet::Wallets;

#[derive(Parser)]
#[command(name = "utxod")]
#[command(about = "A pedagogical UTXO blockchain node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new blockchain and send its genesis subsidy to ADDRESS
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },
    /// Generate a new wallet and print its address
    CreateWallet,
    /// List every address held in this node's wallet file
    ListAddresses,
    /// Print every block from the tip back to genesis
    PrintChain,
    /// Report the balance locked to ADDRESS
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Rebuild the UTXO index from the chain store
    ReindexUtxo,
    /// Build, sign, and submit a transaction moving AMOUNT from FROM to TO
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction into a block locally instead of gossiping it
        #[arg(long)]
        mine: bool,
    },
    /// Start the gossip server and, if MINER is set, mine transactions
    StartNode {
        #[arg(long)]
        miner: Option<String>,
    },
}

fn node_id() -> String {
    std::env::var("NODE_ID").unwrap_or_else(|_| "0".to_string())
}

fn node_address(id: &str) -> String {
    let offset: u16 = id.parse().unwrap_or(0);
    format!("127.0.0.1:{}", 3000 + offset)
}

fn chain_store_path(id: &str) -> String {
    format!("blockchain_{id}.db")
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let id = node_id();

    match cli.command {
        Commands::CreateBlockchain { address } => create_blockchain(&id, &address),
        Commands::CreateWallet => create_wallet(&id),
        Commands::ListAddresses => list_addresses(&id),
        Commands::PrintChain => print_chain(&id),
        Commands::GetBalance { address } => get_balance(&id, &address),
        Commands::ReindexUtxo => reindex_utxo(&id),
        Commands::Send {
            from,
            to,
            amount,
            mine,
        } => send(&id, &from, &to, amount, mine).await,
        Commands::StartNode { miner } => start_node(&id, miner).await,
    }
}

fn create_blockchain(id: &str, address: &str) -> Result<()> {
    chain_core::validate_address(address)?;
    let store = ChainStore::create(chain_store_path(id), address)?;
    let utxo = store.utxo_index()?;
    utxo.reindex(&store)?;
    println!("blockchain created, genesis block mined");
    Ok(())
}

fn create_wallet(id: &str) -> Result<()> {
    let mut wallets = Wallets::load_from_file(id)?;
    let address = wallets.create_wallet()?;
    wallets.save_to_file(id)?;
    println!("{address}");
    Ok(())
}

fn list_addresses(id: &str) -> Result<()> {
    let wallets = Wallets::load_from_file(id)?;
    for address in wallets.get_addresses() {
        println!("{address}");
    }
    Ok(())
}

fn print_chain(id: &str) -> Result<()> {
    let store = ChainStore::open(chain_store_path(id))?;
    for block in store.iter() {
        let block = block?;
        println!("height:     {}", block.height);
        println!("hash:       {}", block.hash);
        println!("prev hash:  {}", block.prev_block_hash);
        println!("nonce:      {}", block.nonce);
        println!("timestamp:  {}", block.timestamp);
        println!("merkle:     {}", block.merkle_root());
        for tx in &block.transactions {
            println!("  tx: {}", tx.id);
        }
        println!();
    }
    Ok(())
}

fn get_balance(id: &str, address: &str) -> Result<()> {
    chain_core::validate_address(address)?;
    let store = ChainStore::open(chain_store_path(id))?;
    let utxo = store.utxo_index()?;
    let pubkey_hash = decode_pubkey_hash(address)?;
    let balance = utxo.get_balance(&pubkey_hash)?;
    println!("balance of {address}: {balance}");
    Ok(())
}

fn reindex_utxo(id: &str) -> Result<()> {
    let store = ChainStore::open(chain_store_path(id))?;
    let utxo = store.utxo_index()?;
    utxo.reindex(&store)?;
    println!("reindexed, {} transactions with unspent outputs", utxo.count_transactions()?);
    Ok(())
}

async fn send(id: &str, from: &str, to: &str, amount: u64, mine: bool) -> Result<()> {
    chain_core::validate_address(from)?;
    chain_core::validate_address(to)?;

    let store = ChainStore::open(chain_store_path(id))?;
    let wallets = Wallets::load_from_file(id)?;
    let keypair = wallets.get_wallet(from)?;

    let tx = build_transaction(&store, &keypair, from, to, amount)?;

    if mine {
        let coinbase = Transaction::new_coinbase(from, "")?;
        let block = store.mine_block(vec![coinbase, tx])?;
        let utxo = store.utxo_index()?;
        utxo.update(&block)?;
        println!("mined block {} at height {}", block.hash, block.height);
    } else {
        network::broadcast_tx(&node_address(id), &tx).await?;
        println!("transaction {} sent to {CENTRAL_NODE}", tx.id);
    }
    Ok(())
}

fn build_transaction(
    store: &ChainStore,
    keypair: &chain_shared::KeyPair,
    from: &str,
    to: &str,
    amount: u64,
) -> Result<Transaction> {
    let utxo = store.utxo_index()?;
    let pubkey_hash = hash_pubkey(keypair.public_key.as_bytes());
    let (accumulated, selection) = utxo.find_spendable_outputs(&pubkey_hash, amount)?;

    let mut inputs = Vec::new();
    for (txid, indices) in selection {
        for index in indices {
            inputs.push(TxInput {
                prev_tx_id: txid,
                prev_out_index: i64::from(index),
                signature: Vec::new(),
                pubkey: keypair.public_key.as_bytes().to_vec(),
            });
        }
    }

    let mut outputs = vec![TxOutput::lock(amount, to)?];
    if accumulated > amount {
        outputs.push(TxOutput::lock(accumulated - amount, from)?);
    }

    let mut tx = Transaction {
        id: Hash256::zero(),
        inputs,
        outputs,
    };
    tx.id = tx.compute_id()?;
    tx.sign(keypair, |txid| store.find_transaction(txid))?;
    Ok(tx)
}

async fn start_node(id: &str, miner: Option<String>) -> Result<()> {
    if let Some(addr) = &miner {
        chain_core::validate_address(addr)?;
    }

    let store = ChainStore::open(chain_store_path(id))?;
    let address = node_address(id);
    info!(%address, miner = ?miner, "starting node");

    let ctx = Arc::new(NodeContext::new(store, address, miner));
    network::run(ctx).await.map_err(|e| ChainError::StorageError(e.to_string()))
}

fn decode_pubkey_hash(address: &str) -> Result<[u8; 20]> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|_| ChainError::InvalidAddress)?;
    if payload.len() != 25 {
        return Err(ChainError::InvalidAddress);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..21]);
    Ok(hash)
}
