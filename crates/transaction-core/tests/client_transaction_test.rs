
use std::time::Duration;

use siptx_sip_core::prelude::*;
use siptx_transaction_core::prelude::*;
use siptx_transaction_core::{Error, TimerSettings};

use transaction_test_utils::*;

fn assert_near(actual: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    let diff = if actual > expected { actual - expected } else { expected - actual };
    assert!(
        diff <= Duration::from_millis(20),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_retransmits_until_timer_f() {
    init_tracing();
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();

    let tx = dispatcher
        .create_client_transaction(request(Method::Register, "z9hG4bKreg1"), server_addr(), Some(listener))
        .unwrap();
    assert_eq!(tx.kind(), TransactionKind::NonInviteClient);
    assert_eq!(tx.state(), TransactionState::Initial);
    tx.start().unwrap();

    match next_event(&mut events).await {
        TransactionEvent::Timeout { transaction_id } => assert_eq!(&transaction_id, tx.key()),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_no_more_events(&mut events).await;

    let sent = transport.sent_requests(Method::Register);
    let start = sent[0].at;
    let offsets: Vec<Duration> = sent.iter().map(|s| s.at - start).collect();
    let expected = [0, 500, 1500, 3500, 7500, 11500, 15500, 19500, 23500, 27500, 31500];
    assert_eq!(offsets.len(), expected.len(), "offsets: {:?}", offsets);
    for (offset, expected) in offsets.iter().zip(expected) {
        assert_near(*offset, expected);
    }
    assert!(sent.iter().all(|s| s.destination == server_addr()));

    settle().await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_non_invite_final_response_then_timer_k() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let req = request(Method::Options, "z9hG4bKopt1");

    let tx = dispatcher
        .create_client_transaction(req.clone(), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();
    settle().await;
    assert_eq!(tx.state(), TransactionState::Trying);
    assert!(dispatcher.is_registered(tx.key()));

    dispatcher.dispatch(incoming(response_to(&req, StatusCode::TRYING), server_addr()));
    match next_event(&mut events).await {
        TransactionEvent::ProvisionalResponse { response, .. } => assert_eq!(response.status, StatusCode::TRYING),
        other => panic!("expected provisional, got {:?}", other),
    }
    assert_eq!(tx.state(), TransactionState::Proceeding);

    // Proceeding stops Timer E
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(transport.sent_requests(Method::Options).len(), 1);

    let ok = response_to(&req, StatusCode::OK);
    dispatcher.dispatch(incoming(ok.clone(), server_addr()));
    match next_event(&mut events).await {
        TransactionEvent::SuccessResponse { response, .. } => assert_eq!(response.status, StatusCode::OK),
        other => panic!("expected success, got {:?}", other),
    }
    settle().await;
    assert_eq!(tx.state(), TransactionState::Completed);
    assert_eq!(tx.last_response().map(|r| r.status), Some(StatusCode::OK));

    // Retransmitted final responses are absorbed
    dispatcher.dispatch(incoming(ok, server_addr()));
    assert_no_more_events(&mut events).await;

    tokio::time::sleep(TimerSettings::default().t4).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(!dispatcher.is_registered(tx.key()));
}

#[tokio::test(start_paused = true)]
async fn test_reliable_transport_skips_retransmissions_and_wait_timers() {
    let transport = MockTransport::reliable();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let req = request(Method::Register, "z9hG4bKtcp1");

    let tx = dispatcher
        .create_client_transaction(req.clone(), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.sent_count(), 1);

    dispatcher.dispatch(incoming(response_to(&req, StatusCode::OK), server_addr()));
    assert!(matches!(next_event(&mut events).await, TransactionEvent::SuccessResponse { .. }));
    settle().await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invite_provisional_then_success() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let invite = request(Method::Invite, "z9hG4bKinv1");

    let tx = dispatcher
        .create_client_transaction(invite.clone(), server_addr(), Some(listener))
        .unwrap();
    assert_eq!(tx.kind(), TransactionKind::InviteClient);
    tx.start().unwrap();

    let started = tokio::time::Instant::now();

    // 180 at half of T1, before Timer A first fires
    tokio::time::sleep(Duration::from_millis(250)).await;
    dispatcher.dispatch(incoming(response_to(&invite, StatusCode::RINGING), server_addr()));
    assert!(matches!(
        next_event(&mut events).await,
        TransactionEvent::ProvisionalResponse { .. }
    ));
    assert_eq!(tx.state(), TransactionState::Proceeding);

    tokio::time::sleep_until(started + Duration::from_secs(2)).await;
    assert_eq!(transport.sent_requests(Method::Invite).len(), 1);

    dispatcher.dispatch(incoming(response_to(&invite, StatusCode::OK), server_addr()));
    assert!(matches!(next_event(&mut events).await, TransactionEvent::SuccessResponse { .. }));
    assert_no_more_events(&mut events).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
    // The 2xx ACK belongs to the owner
    assert!(transport.sent_requests(Method::Ack).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invite_provisional_stops_retransmission_but_not_timer_b() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let invite = request(Method::Invite, "z9hG4bKinv1b");

    let tx = dispatcher
        .create_client_transaction(invite.clone(), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();
    let started = tokio::time::Instant::now();

    // Timer A fires once before the 183 arrives
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(transport.sent_requests(Method::Invite).len(), 2);

    dispatcher.dispatch(incoming(response_to(&invite, StatusCode::SESSION_PROGRESS), server_addr()));
    assert!(matches!(
        next_event(&mut events).await,
        TransactionEvent::ProvisionalResponse { .. }
    ));
    assert_eq!(tx.state(), TransactionState::Proceeding);

    // No final response ever arrives
    match next_event(&mut events).await {
        TransactionEvent::Timeout { transaction_id } => assert_eq!(&transaction_id, tx.key()),
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_near(started.elapsed(), 32_000);
    assert_no_more_events(&mut events).await;

    assert_eq!(transport.sent_requests(Method::Invite).len(), 2);
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(!dispatcher.is_registered(tx.key()));
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invite_failure_is_acknowledged() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let invite = request(Method::Invite, "z9hG4bKinv2");

    let tx = dispatcher
        .create_client_transaction(invite.clone(), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();
    settle().await;

    let busy = response_to(&invite, StatusCode::BUSY_HERE);
    dispatcher.dispatch(incoming(busy.clone(), server_addr()));
    match next_event(&mut events).await {
        TransactionEvent::FailureResponse { response, .. } => assert_eq!(response.status, StatusCode::BUSY_HERE),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(tx.state(), TransactionState::Completed);

    let acks = transport.sent_requests(Method::Ack);
    assert_eq!(acks.len(), 1);
    let ack = acks[0].message.as_request().unwrap();
    assert_eq!(ack.top_via().unwrap().branch(), Some("z9hG4bKinv2"));
    assert_eq!(ack.cseq().unwrap().method, Method::Ack);
    assert_eq!(ack.to_header(), busy.to_header());
    assert_eq!(acks[0].destination, server_addr());

    // A retransmitted failure means the ACK was lost
    dispatcher.dispatch(incoming(busy, server_addr()));
    settle().await;
    assert_eq!(transport.sent_requests(Method::Ack).len(), 2);

    assert_no_more_events(&mut events).await;
    tokio::time::sleep(TimerSettings::default().transaction_timeout).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invite_timer_b_times_out() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();

    let tx = dispatcher
        .create_client_transaction(request(Method::Invite, "z9hG4bKinv3"), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();

    let started = tokio::time::Instant::now();
    assert!(matches!(next_event(&mut events).await, TransactionEvent::Timeout { .. }));
    assert_near(started.elapsed(), 32_000);
    assert_no_more_events(&mut events).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_reports_timeout() {
    let transport = MockTransport::new();
    transport.set_fail_sends(true);
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();

    let tx = dispatcher
        .create_client_transaction(request(Method::Options, "z9hG4bKfail"), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();

    assert!(matches!(next_event(&mut events).await, TransactionEvent::Timeout { .. }));
    assert_no_more_events(&mut events).await;
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_owner_terminate_suppresses_notifications() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();
    let req = request(Method::Options, "z9hG4bKcancel");

    let tx = dispatcher
        .create_client_transaction(req.clone(), server_addr(), Some(listener))
        .unwrap();
    tx.start().unwrap();
    settle().await;

    tx.terminate();
    tx.terminate();
    assert_eq!(tx.state(), TransactionState::Terminated);
    assert!(!dispatcher.is_registered(tx.key()));

    // Arrives after termination and is offered to nobody
    dispatcher.dispatch(incoming(response_to(&req, StatusCode::OK), server_addr()));
    assert_no_more_events(&mut events).await;

    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn test_client_rejects_bad_requests() {
    let dispatcher = dispatcher_with(MockTransport::new());

    let ack = request(Method::Ack, "z9hG4bKack");
    assert!(matches!(
        dispatcher.create_client_transaction(ack, server_addr(), None),
        Err(Error::InvalidRequest(_))
    ));

    let no_via = Request::builder(Method::Options, "sip:bob@127.0.0.1")
        .call_id("abc")
        .cseq(1)
        .build();
    assert!(matches!(
        dispatcher.create_client_transaction(no_via, server_addr(), None),
        Err(Error::MissingIdentity(_))
    ));
}

#[tokio::test]
async fn test_start_twice_fails() {
    let dispatcher = dispatcher_with(MockTransport::new());
    let tx = dispatcher
        .create_client_transaction(request(Method::Options, "z9hG4bKtwice"), server_addr(), None)
        .unwrap();
    tx.start().unwrap();
    assert!(tx.start().is_err());
    tx.terminate();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_unstarted_transaction_releases_listener() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (listener, mut events) = listener();

    let tx = dispatcher
        .create_client_transaction(request(Method::Options, "z9hG4bKidle"), server_addr(), Some(listener))
        .unwrap();
    assert_eq!(tx.state(), TransactionState::Initial);
    drop(tx);

    // The listener's sender went away with the transaction's task
    assert_no_more_events(&mut events).await;
    assert_eq!(transport.sent_count(), 0);
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_losing_duplicate_start_is_released_on_drop() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let req = request(Method::Options, "z9hG4bKdup");
    let (first_listener, mut first_events) = listener();
    let (second_listener, mut second_events) = listener();

    let first = dispatcher
        .create_client_transaction(req.clone(), server_addr(), Some(first_listener))
        .unwrap();
    first.start().unwrap();

    let second = dispatcher
        .create_client_transaction(req.clone(), server_addr(), Some(second_listener))
        .unwrap();
    assert!(matches!(second.start(), Err(Error::DuplicateRegistration(_))));
    drop(second);
    assert_no_more_events(&mut second_events).await;

    // The winner is untouched by the loser going away
    assert!(dispatcher.is_registered(first.key()));
    dispatcher.dispatch(incoming(response_to(&req, StatusCode::OK), server_addr()));
    assert!(matches!(
        next_event(&mut first_events).await,
        TransactionEvent::SuccessResponse { .. }
    ));
}

/// Terminates the transaction as soon as it hears anything.
struct HangUp {
    dispatcher: Dispatcher,
    events: tokio::sync::mpsc::UnboundedSender<TransactionEvent>,
}

impl TransactionListener for HangUp {
    fn on_transaction_event(&self, event: TransactionEvent) {
        self.dispatcher.terminate_transaction(event.transaction_id()).unwrap();
        let _ = self.events.send(event);
    }
}

#[tokio::test(start_paused = true)]
async fn test_terminate_from_inside_listener_callback() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher_with(transport.clone());
    let (events_tx, mut events) = tokio::sync::mpsc::unbounded_channel();
    let hang_up = HangUp {
        dispatcher: dispatcher.clone(),
        events: events_tx,
    };
    let invite = request(Method::Invite, "z9hG4bKhangup");

    let tx = dispatcher
        .create_client_transaction(invite.clone(), server_addr(), Some(std::sync::Arc::new(hang_up)))
        .unwrap();
    tx.start().unwrap();
    settle().await;

    dispatcher.dispatch(incoming(response_to(&invite, StatusCode::RINGING), server_addr()));
    assert!(matches!(
        next_event(&mut events).await,
        TransactionEvent::ProvisionalResponse { .. }
    ));
    assert_eq!(tx.state(), TransactionState::Terminated);

    dispatcher.dispatch(incoming(response_to(&invite, StatusCode::OK), server_addr()));
    assert_no_more_events(&mut events).await;
    assert_eq!(dispatcher.transaction_count(), 0);
}
