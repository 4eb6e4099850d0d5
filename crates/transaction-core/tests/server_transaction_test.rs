
use std::time::Duration;

use siptx_sip_core::prelude::*;
use siptx_transaction_core::prelude::*;
use siptx_transaction_core::{Error, TimerSettings};

use transaction_test_utils::*;

#[tokio::test(start_paused = true)]
async fn test_invite_server_failure_waits_for_ack() {
    init_tracing();
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (mut transactions, mut events) = Acceptor::install(&dispatcher);
    let invite = request(Method::Invite, "z9hG4bKsrv1");

    dispatcher.dispatch(incoming(invite.clone(), client_addr()));
    let tx = transactions.recv().await.unwrap();
    match next_event(&mut events).await {
        TransactionEvent::RequestReceived { request, source, .. } => {
            assert_eq!(request.method, Method::Invite);
            assert_eq!(source, client_addr());
        }
        other => panic!("expected request, got {:?}", other),
    }
    settle().await;

    // Automatic 100 Trying
    assert_eq!(tx.state(), TransactionState::Proceeding);
    let trying = transport.sent_responses(StatusCode::TRYING);
    assert_eq!(trying.len(), 1);
    assert_eq!(trying[0].destination, client_addr());

    let busy = response_to(&invite, StatusCode::BUSY_HERE);
    tx.respond_with(busy.clone()).unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Completed);
    assert_eq!(transport.sent_responses(StatusCode::BUSY_HERE).len(), 1);
    assert!(tx.respond_with(response_to(&invite, StatusCode::OK)).is_err());

    // A retransmitted INVITE gets the final response again
    dispatcher.dispatch(incoming(invite.clone(), client_addr()));
    settle().await;
    assert_eq!(transport.sent_responses(StatusCode::BUSY_HERE).len(), 2);

    // Timer G
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.sent_responses(StatusCode::BUSY_HERE).len(), 3);

    let ack = Request::non_2xx_ack(&invite, &busy).unwrap();
    dispatcher.dispatch(incoming(ack, client_addr()));
    settle().await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.sent_responses(StatusCode::BUSY_HERE).len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_invite_server_timer_h_without_ack() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (mut transactions, _events) = Acceptor::install(&dispatcher);
    let invite = request(Method::Invite, "z9hG4bKsrv2");

    dispatcher.dispatch(incoming(invite.clone(), client_addr()));
    let tx = transactions.recv().await.unwrap();
    tx.respond_with(response_to(&invite, StatusCode::DECLINE)).unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Completed);

    tokio::time::sleep(TimerSettings::default().transaction_timeout).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);

    // G doubled up to T2 and stopped with H
    let sent = transport.sent_responses(StatusCode::DECLINE).len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.sent_responses(StatusCode::DECLINE).len(), sent);
    assert!(sent > 5);
}

#[tokio::test(start_paused = true)]
async fn test_invite_server_success_terminates() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (mut transactions, _events) = Acceptor::install(&dispatcher);
    let invite = request(Method::Invite, "z9hG4bKsrv3");

    dispatcher.dispatch(incoming(invite.clone(), client_addr()));
    let tx = transactions.recv().await.unwrap();
    tx.respond_with(response_to(&invite, StatusCode::RINGING)).unwrap();
    tx.respond_with(response_to(&invite, StatusCode::OK)).unwrap();
    settle().await;

    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
    assert_eq!(transport.sent_responses(StatusCode::RINGING).len(), 1);
    assert_eq!(transport.sent_responses(StatusCode::OK).len(), 1);
    assert_eq!(tx.last_response().map(|r| r.status), Some(StatusCode::OK));

    // The ACK for a 2xx matches no transaction and is dropped
    let ack = Request::builder(Method::Ack, "sip:bob@127.0.0.1:5070")
        .via("UDP", CLIENT_ADDR, "z9hG4bKack2xx")
        .call_id("test-call-id@127.0.0.1")
        .cseq(1)
        .build();
    let before = transport.sent_count();
    dispatcher.dispatch(incoming(ack, client_addr()));
    settle().await;
    assert_eq!(transport.sent_count(), before);
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_server_absorbs_and_replays() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (mut transactions, mut events) = Acceptor::install(&dispatcher);
    let register = request(Method::Register, "z9hG4bKsrv4");

    dispatcher.dispatch(incoming(register.clone(), client_addr()));
    let tx = transactions.recv().await.unwrap();
    assert_eq!(tx.kind(), TransactionKind::NonInviteServer);
    assert!(matches!(
        next_event(&mut events).await,
        TransactionEvent::RequestReceived { .. }
    ));
    assert_eq!(tx.state(), TransactionState::Trying);

    // Nothing to replay yet
    dispatcher.dispatch(incoming(register.clone(), client_addr()));
    settle().await;
    assert_eq!(transport.sent_count(), 0);

    tx.respond_with(response_to(&register, StatusCode::TRYING)).unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Proceeding);
    dispatcher.dispatch(incoming(register.clone(), client_addr()));
    settle().await;
    assert_eq!(transport.sent_responses(StatusCode::TRYING).len(), 2);

    tx.respond_with(response_to(&register, StatusCode::OK)).unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Completed);
    dispatcher.dispatch(incoming(register.clone(), client_addr()));
    settle().await;
    assert_eq!(transport.sent_responses(StatusCode::OK).len(), 2);
    assert!(transport.sent().iter().all(|s| s.destination == client_addr()));

    // Timer J
    tokio::time::sleep(TimerSettings::default().transaction_timeout).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_server_reliable_terminates_on_final() {
    let transport = MockTransport::reliable();
    let dispatcher = dispatcher_with(transport.clone());
    let register = request(Method::Register, "z9hG4bKsrv5");
    let connection = siptx_sip_transport::ConnectionId {
        protocol: siptx_sip_transport::TransportProtocol::Tcp,
        local: server_addr(),
        remote: client_addr(),
    };

    let tx = dispatcher
        .create_server_transaction(register.clone(), client_addr(), Some(connection), None)
        .unwrap();
    tx.respond_with(response_to(&register, StatusCode::OK)).unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_send_failure_reports_timeout() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let options = request(Method::Options, "z9hG4bKsrv6");

    let tx = dispatcher
        .create_server_transaction(options.clone(), client_addr(), None, Some(listener))
        .unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        TransactionEvent::RequestReceived { .. }
    ));

    transport.set_fail_sends(true);
    tx.respond_with(response_to(&options, StatusCode::OK)).unwrap();
    assert!(matches!(next_event(&mut events).await, TransactionEvent::Timeout { .. }));
    settle().await;
    assert_eq!(tx.state(), TransactionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_server_rejects_duplicates_and_ack() {
    let dispatcher = dispatcher_with(MockTransport::new());
    let options = request(Method::Options, "z9hG4bKsrv7");

    let first = dispatcher
        .create_server_transaction(options.clone(), client_addr(), None, None)
        .unwrap();
    assert!(matches!(
        dispatcher.create_server_transaction(options.clone(), client_addr(), None, None),
        Err(Error::DuplicateRegistration(_))
    ));
    assert!(matches!(
        dispatcher.create_server_transaction(request(Method::Ack, "z9hG4bKsrv7"), client_addr(), None, None),
        Err(Error::InvalidRequest(_))
    ));

    // A new transaction may reuse the identity once the first is gone
    first.terminate();
    let second = dispatcher
        .create_server_transaction(options, client_addr(), None, None)
        .unwrap();
    settle().await;
    assert!(dispatcher.is_registered(second.key()));
    assert_eq!(first.state(), TransactionState::Terminated);
    assert_eq!(second.state(), TransactionState::Trying);
}
