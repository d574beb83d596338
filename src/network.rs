//! Raw-TCP gossip server and client. One connection carries exactly one
//! message: a 12-byte command prefix followed by its payload.

use crate::node::NodeContext;
use crate::wire::{
    self, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, TxPayload,
    VersionPayload, COMMAND_LENGTH, PROTOCOL_VERSION,
};
use chain_core::{Block, Transaction};
use chain_shared::Hash256;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Binds `ctx.node_address` and dispatches each inbound connection to
/// `handle_connection`. If this node is not the bootstrap peer, it first
/// announces itself with a `version` message.
///
/// # Errors
///
/// Returns an error if the listener cannot bind.
pub async fn run(ctx: Arc<NodeContext>) -> std::io::Result<()> {
    let listener = TcpListener::bind(&ctx.node_address).await?;
    info!(addr = %ctx.node_address, "gossip server listening");

    if !ctx.is_central() {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = send_version(&ctx, crate::node::CENTRAL_NODE).await {
                warn!(error = %e, "failed to announce version to bootstrap peer");
            }
        });
    }

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(ctx, stream).await {
                error!(peer = %peer_addr, error = %e, "connection handling failed");
            }
        });
    }
}

async fn handle_connection(ctx: Arc<NodeContext>, mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    if buf.len() < COMMAND_LENGTH {
        warn!("received undersized message");
        return Ok(());
    }

    let command = wire::bytes_to_command(&buf[..COMMAND_LENGTH]);
    let payload = &buf[COMMAND_LENGTH..];
    debug!(%command, "handling gossip message");

    let result = match command.as_str() {
        "version" => handle_version(&ctx, payload).await,
        "getblocks" => handle_get_blocks(&ctx, payload).await,
        "inv" => handle_inv(&ctx, payload).await,
        "getdata" => handle_get_data(&ctx, payload).await,
        "block" => handle_block(&ctx, payload).await,
        "tx" => handle_tx(&ctx, payload).await,
        other => {
            warn!(command = other, "unknown command");
            Ok(())
        }
    };

    if let Err(e) = result {
        error!(%command, error = %e, "handler failed");
    }
    Ok(())
}

type HandlerResult = chain_shared::Result<()>;

async fn handle_version(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let version: VersionPayload = bincode::deserialize(payload)?;
    ctx.add_peer(&version.addr_from);

    let local_height = ctx.store.get_best_height()?;
    if version.best_height > local_height {
        send_get_blocks(ctx, &version.addr_from).await;
    } else if local_height > version.best_height {
        send_version(ctx, &version.addr_from).await.ok();
    }
    Ok(())
}

async fn handle_get_blocks(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let req: GetBlocksPayload = bincode::deserialize(payload)?;
    let hashes = ctx.store.get_block_hashes()?;
    send_inv(
        ctx,
        &req.addr_from,
        InvKind::Block,
        hashes.iter().map(|h| h.as_bytes().to_vec()).collect(),
    )
    .await;
    Ok(())
}

async fn handle_inv(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let inv: InvPayload = bincode::deserialize(payload)?;
    let Some(first) = inv.items.first().cloned() else {
        return Ok(());
    };

    match inv.kind {
        InvKind::Block => {
            {
                let mut transit = ctx.blocks_in_transit.lock().unwrap();
                transit.clear();
                transit.extend(inv.items.into_iter().skip(1));
            }
            send_get_data(ctx, &inv.addr_from, InvKind::Block, first).await;
        }
        InvKind::Tx => {
            let txid = Hash256::try_from(first.as_slice())?;
            if !ctx.mempool.lock().unwrap().contains(&txid) {
                send_get_data(ctx, &inv.addr_from, InvKind::Tx, first).await;
            }
        }
    }
    Ok(())
}

async fn handle_get_data(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let req: GetDataPayload = bincode::deserialize(payload)?;
    match req.kind {
        InvKind::Block => {
            let hash = Hash256::try_from(req.id.as_slice())?;
            let block = ctx.store.get_block(&hash)?;
            send_block(ctx, &req.addr_from, &block).await;
        }
        InvKind::Tx => {
            let txid = Hash256::try_from(req.id.as_slice())?;
            let tx = ctx.mempool.lock().unwrap().get(&txid).cloned();
            if let Some(tx) = tx {
                send_tx(ctx, &req.addr_from, &tx).await;
            }
        }
    }
    Ok(())
}

async fn handle_block(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let msg: BlockPayload = bincode::deserialize(payload)?;
    let block: Block = bincode::deserialize(&msg.block)?;
    ctx.store.add_block(&block)?;
    info!(hash = %block.hash, height = block.height, "stored block from peer");

    let next = {
        let mut transit = ctx.blocks_in_transit.lock().unwrap();
        if transit.is_empty() {
            None
        } else {
            Some(transit.remove(0))
        }
    };
    if let Some(next_id) = next {
        send_get_data(ctx, &msg.addr_from, InvKind::Block, next_id).await;
    } else {
        let utxo = ctx.store.utxo_index()?;
        utxo.reindex(&ctx.store)?;
    }
    Ok(())
}

async fn handle_tx(ctx: &NodeContext, payload: &[u8]) -> HandlerResult {
    let msg: TxPayload = bincode::deserialize(payload)?;
    let tx: Transaction = bincode::deserialize(&msg.tx)?;
    let txid = tx.id;
    ctx.mempool.lock().unwrap().insert(tx);

    if ctx.is_central() {
        for peer in ctx.known_peers() {
            if peer != msg.addr_from {
                send_inv(ctx, &peer, InvKind::Tx, vec![txid.as_bytes().to_vec()]).await;
            }
        }
        return Ok(());
    }

    let Some(mining_address) = ctx.mining_address.clone() else {
        return Ok(());
    };

    loop {
        let pending: Vec<Transaction> = {
            let pool = ctx.mempool.lock().unwrap();
            if pool.len() < 2 {
                return Ok(());
            }
            pool.values().cloned().collect()
        };

        let mut verified = Vec::with_capacity(pending.len());
        for tx in &pending {
            if tx.verify(|id| ctx.store.find_transaction(id))? {
                verified.push(tx.clone());
            }
        }
        if verified.is_empty() {
            return Ok(());
        }

        let coinbase = Transaction::new_coinbase(&mining_address, "")?;
        let mut block_txs = vec![coinbase];
        block_txs.extend(verified.clone());

        let block = ctx.store.mine_block(block_txs)?;
        info!(hash = %block.hash, height = block.height, "mined block from pool");

        let utxo = ctx.store.utxo_index()?;
        utxo.reindex(&ctx.store)?;

        let mined_ids: Vec<Hash256> = verified.iter().map(|tx| tx.id).collect();
        ctx.mempool.lock().unwrap().remove_many(&mined_ids);

        for peer in ctx.known_peers() {
            send_inv(
                ctx,
                &peer,
                InvKind::Block,
                vec![block.hash.as_bytes().to_vec()],
            )
            .await;
        }

        if ctx.mempool.lock().unwrap().is_empty() {
            return Ok(());
        }
    }
}

async fn dial_and_send(ctx: &NodeContext, addr: &str, message: Vec<u8>) {
    match TcpStream::connect(addr).await {
        Ok(mut stream) => {
            if let Err(e) = stream.write_all(&message).await {
                warn!(%addr, error = %e, "failed to send gossip message");
            }
        }
        Err(e) => {
            warn!(%addr, error = %e, "peer unreachable, evicting");
            ctx.remove_peer(addr);
        }
    }
}

async fn send_version(ctx: &NodeContext, addr: &str) -> chain_shared::Result<()> {
    let payload = VersionPayload {
        version: PROTOCOL_VERSION,
        best_height: ctx.store.get_best_height()?,
        addr_from: ctx.node_address.clone(),
    };
    let message = wire::encode("version", &payload)?;
    dial_and_send(ctx, addr, message).await;
    Ok(())
}

async fn send_get_blocks(ctx: &NodeContext, addr: &str) {
    let payload = GetBlocksPayload {
        addr_from: ctx.node_address.clone(),
    };
    if let Ok(message) = wire::encode("getblocks", &payload) {
        dial_and_send(ctx, addr, message).await;
    }
}

async fn send_inv(ctx: &NodeContext, addr: &str, kind: InvKind, items: Vec<Vec<u8>>) {
    let payload = InvPayload {
        addr_from: ctx.node_address.clone(),
        kind,
        items,
    };
    if let Ok(message) = wire::encode("inv", &payload) {
        dial_and_send(ctx, addr, message).await;
    }
}

async fn send_get_data(ctx: &NodeContext, addr: &str, kind: InvKind, id: Vec<u8>) {
    let payload = GetDataPayload {
        addr_from: ctx.node_address.clone(),
        kind,
        id,
    };
    if let Ok(message) = wire::encode("getdata", &payload) {
        dial_and_send(ctx, addr, message).await;
    }
}

async fn send_block(ctx: &NodeContext, addr: &str, block: &Block) {
    let Ok(serialized) = bincode::serialize(block) else {
        return;
    };
    let payload = BlockPayload {
        addr_from: ctx.node_address.clone(),
        block: serialized,
    };
    if let Ok(message) = wire::encode("block", &payload) {
        dial_and_send(ctx, addr, message).await;
    }
}

async fn send_tx(ctx: &NodeContext, addr: &str, tx: &Transaction) {
    let Ok(serialized) = bincode::serialize(tx) else {
        return;
    };
    let payload = TxPayload {
        addr_from: ctx.node_address.clone(),
        tx: serialized,
    };
    if let Ok(message) = wire::encode("tx", &payload) {
        dial_and_send(ctx, addr, message).await;
    }
}

/// Sends a `tx` gossip message to the bootstrap peer — used by `send`
/// invocations that don't mine locally.
///
/// # Errors
///
/// Propagates a connection failure as `PeerUnreachable`.
pub async fn broadcast_tx(node_address: &str, tx: &Transaction) -> chain_shared::Result<()> {
    let payload = TxPayload {
        addr_from: node_address.to_string(),
        tx: bincode::serialize(tx)?,
    };
    let message = wire::encode("tx", &payload)?;
    TcpStream::connect(crate::node::CENTRAL_NODE)
        .await
        .map_err(|e| chain_shared::ChainError::PeerUnreachable(e.to_string()))?
        .write_all(&message)
        .await
        .map_err(|e| chain_shared::ChainError::PeerUnreachable(e.to_string()))?;
    Ok(())
}
