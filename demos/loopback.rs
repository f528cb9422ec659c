//! Loopback demo: both ETSI interfaces without any QKD hardware.
//!
//! Starts a simulated ETSI 004 node on localhost, pulls a few key chunks
//! from it over TCP as two applications, then issues and redeems ETSI 014
//! keys against the simulated KME.
//!
//! ```text
//! RUST_LOG=qkd_etsi_api=debug cargo run --example loopback
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use qkd_etsi_api::etsi004::{
    Metadata, Qos, Role, SimulatedStreamBackend, SocketStreamBackend, StreamEngine, StreamServer,
};
use qkd_etsi_api::etsi014::{
    KeyRequest, RedemptionPolicy, RetrievalEngine, SimulatedRetrievalBackend,
};
use qkd_etsi_api::Credentials;

type DemoResult = Result<(), Box<dyn std::error::Error>>;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

async fn streams() -> DemoResult {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let node = format!("server://{}", listener.local_addr()?);
    tokio::spawn(StreamServer::new(Arc::new(SimulatedStreamBackend::new())).serve(listener));

    let alice = StreamEngine::with_backend(Arc::new(SocketStreamBackend::new()));
    let bob = StreamEngine::with_backend(Arc::new(SocketStreamBackend::new()));
    let qos = Qos {
        max_bps: 8 * 32 * 10,
        ..Qos::default()
    };

    let opened = alice.open("app://alice", &node, &qos, Role::Initiator).await?;
    println!("alice opened {} ({})", opened.ksid, opened.status);
    let joined = bob
        .open("app://bob", &node, &qos, Role::Responder(opened.ksid))
        .await?;
    println!("bob joined {} ({})", joined.ksid, joined.status);

    for index in 0..3 {
        // Ten chunks per second at this rate.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut metadata = Metadata::with_capacity(64);
        let a = alice.get_key(opened.ksid, index, Some(&mut metadata)).await?;
        let b = bob.get_key(opened.ksid, index, None).await?;
        println!(
            "chunk {}: {} match={} metadata={}",
            index,
            hex(a.key()),
            a.key() == b.key(),
            String::from_utf8_lossy(metadata.as_bytes())
        );
    }

    alice.close(opened.ksid).await?;
    bob.close(opened.ksid).await?;
    Ok(())
}

async fn retrieval() -> DemoResult {
    let engine = RetrievalEngine::with_backend(Arc::new(
        SimulatedRetrievalBackend::builder()
            .redemption_policy(RedemptionPolicy::SingleUse)
            .build(),
    ));
    let endpoint = "https://kme-a.local";
    let creds = Credentials::none();

    let status = engine.get_status(endpoint, &creds, "SAE_B").await?;
    println!(
        "KME {} -> {}: {} keys stored",
        status.source_kme_id, status.target_kme_id, status.stored_key_count
    );

    let issued = engine
        .get_key(endpoint, &creds, "SAE_B", &KeyRequest::new().number(2).size(256))
        .await?;
    for record in &issued {
        println!("issued {} ({} bits)", record.key_id(), record.bits());
    }

    let redeemed = engine
        .get_key_with_ids(endpoint, &creds, "SAE_A", &issued.key_ids())
        .await?;
    println!("redeemed {} keys", redeemed.len());

    if let Err(e) = engine
        .get_key_with_ids(endpoint, &creds, "SAE_A", &issued.key_ids())
        .await
    {
        println!("second redemption refused: {} ({})", e, e.status());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> DemoResult {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    streams().await?;
    retrieval().await
}
