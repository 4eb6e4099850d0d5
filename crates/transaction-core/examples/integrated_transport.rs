/**
 * Integrated Transport Example
 *
 * Two dispatchers on loopback UDP:
 *
 * 1. The client sends a REGISTER through a non-INVITE client transaction
 * 2. The server has no transaction for it, so its fallback listener creates
 *    a server transaction and answers 200 OK
 * 3. The client's listener reports the final response
 *
 * To run this example with full logging:
 * ```
 * RUST_LOG=siptx=trace cargo run --example integrated_transport
 * ```
 */

use std::sync::Arc;
use std::time::Duration;

use siptx_sip_core::prelude::*;
use siptx_transaction_core::prelude::*;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Accepts every REGISTER.
struct Registrar;

impl FallbackListener for Registrar {
    fn on_unmatched_message(&self, dispatcher: &Dispatcher, incoming: IncomingMessage) {
        let request = match incoming.message {
            Message::Request(request) if request.method == Method::Register => request,
            other => {
                warn!("Registrar ignoring {:?}", other.method());
                return;
            }
        };

        let response = Response::for_request(&request, StatusCode::OK).with_header(names::EXPIRES, "3600");
        match dispatcher.create_server_transaction(request, incoming.source, incoming.connection, None) {
            Ok(tx) => {
                info!(id = %tx.key(), "Registrar accepting REGISTER from {}", incoming.source);
                if let Err(e) = tx.respond_with(response) {
                    error!(error = %e, "Failed to queue response");
                }
            }
            Err(e) => warn!(error = %e, "Could not create server transaction"),
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("siptx=debug,info")))
        .init();

    // ------------- Server setup -----------------
    let server = Dispatcher::bind_udp("127.0.0.1:0".parse()?, DispatcherConfig::default()).await?;
    server.set_fallback_listener(FallbackKey::Method(Method::Register), Arc::new(Registrar));
    let server_addr = server.local_addr()?;
    info!("Server listening on {}", server_addr);

    // ------------- Client setup -----------------
    let client = Dispatcher::bind_udp("127.0.0.1:0".parse()?, DispatcherConfig::default()).await?;
    let client_addr = client.local_addr()?.to_string();
    info!("Client bound to {}", client_addr);

    let register = Request::builder(Method::Register, format!("sip:{}", server_addr))
        .via("UDP", &client_addr, &generate_branch())
        .from("sip:alice@example.com", Some(&generate_tag()))
        .to("sip:alice@example.com", None)
        .call_id(&generate_call_id(Some("example.com")))
        .cseq(1)
        .max_forwards(70)
        .header(names::CONTACT, format!("<sip:alice@{}>", client_addr))
        .build();

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let tx = client.create_client_transaction(register, server_addr, Some(Arc::new(events_tx)))?;
    info!(id = %tx.key(), "Starting client transaction");
    tx.start()?;

    loop {
        match tokio::time::timeout(Duration::from_secs(40), events_rx.recv()).await {
            Ok(Some(TransactionEvent::ProvisionalResponse { response, .. })) => {
                info!("Provisional response: {} {}", response.status, response.reason);
            }
            Ok(Some(TransactionEvent::SuccessResponse { response, .. })) => {
                info!("Registered: {} {}", response.status, response.reason);
                break;
            }
            Ok(Some(TransactionEvent::FailureResponse { response, .. })) => {
                warn!("Registration rejected: {} {}", response.status, response.reason);
                break;
            }
            Ok(Some(TransactionEvent::Timeout { transaction_id })) => {
                error!(id = %transaction_id, "Registration timed out");
                break;
            }
            Ok(Some(other)) => info!("Event: {:?}", other),
            Ok(None) | Err(_) => break,
        }
    }

    info!("Client transaction state: {:?}", tx.state());
    client.shutdown();
    server.shutdown();
    Ok(())
}
