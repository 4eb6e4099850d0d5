
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;

use siptx_sip_core::prelude::*;
use siptx_transaction_core::prelude::*;
use siptx_transaction_core::{Error, TimerSettings};

use transaction_test_utils::*;

/// Counts events that arrive after the test closed the gate.
#[derive(Default)]
struct GateListener {
    closed: AtomicBool,
    delivered: AtomicUsize,
    late: AtomicUsize,
}

impl TransactionListener for GateListener {
    fn on_transaction_event(&self, _event: TransactionEvent) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_transactions_each_get_one_final_response() {
    init_tracing();
    let transport = MockTransport::reliable();
    let dispatcher = dispatcher_with(transport.clone());

    let mut tasks = Vec::new();
    for i in 0..64 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            let req = request(Method::Options, &format!("z9hG4bKpar{}", i));
            let (listener, mut events) = listener();
            let tx = dispatcher
                .create_client_transaction(req.clone(), server_addr(), Some(listener))
                .unwrap();
            tx.start().unwrap();

            let responder = dispatcher.clone();
            let reply = response_to(&req, StatusCode::OK);
            tokio::spawn(async move {
                // Duplicates race the first copy into the transaction
                for _ in 0..3 {
                    responder.dispatch(incoming(reply.clone(), server_addr()));
                    tokio::task::yield_now().await;
                }
            });

            match next_event(&mut events).await {
                TransactionEvent::SuccessResponse { response, .. } => assert_eq!(response.status, StatusCode::OK),
                other => panic!("expected success, got {:?}", other),
            }
            assert_no_more_events(&mut events).await;
            assert_eq!(tx.state(), TransactionState::Terminated);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(dispatcher.transaction_count(), 0);
    assert_eq!(transport.sent_requests(Method::Options).len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_has_one_winner() {
    let dispatcher = dispatcher_with(MockTransport::new());
    let invite = request(Method::Invite, "z9hG4bKrace");
    let racers = 16;

    // Server side: the same INVITE seen by many tasks at once
    let barrier = Arc::new(Barrier::new(racers));
    let mut tasks = Vec::new();
    for _ in 0..racers {
        let dispatcher = dispatcher.clone();
        let invite = invite.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            dispatcher.create_server_transaction(invite, client_addr(), None, None)
        }));
    }
    let mut winners = Vec::new();
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(tx) => winners.push(tx),
            Err(Error::DuplicateRegistration(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(duplicates, racers - 1);
    assert_eq!(dispatcher.transaction_count(), 1);

    // Client side: many handles for one request racing to start
    let options = request(Method::Options, "z9hG4bKrace2");
    let barrier = Arc::new(Barrier::new(racers));
    let mut tasks = Vec::new();
    for _ in 0..racers {
        let dispatcher = dispatcher.clone();
        let options = options.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            let tx = dispatcher.create_client_transaction(options, server_addr(), None).unwrap();
            barrier.wait().await;
            let result = tx.start();
            (tx, result)
        }));
    }
    let mut started = Vec::new();
    for task in tasks {
        let (tx, result) = task.await.unwrap();
        match result {
            Ok(()) => started.push(tx),
            Err(Error::DuplicateRegistration(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(started.len(), 1);
    assert_eq!(dispatcher.transaction_count(), 2);

    winners[0].terminate();
    started[0].terminate();
    assert_eq!(dispatcher.transaction_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_terminate_racing_timers_and_messages_delivers_nothing_after() {
    let transport = MockTransport::new();
    let timers = TimerSettings::default()
        .with_t1(Duration::from_millis(1))
        .with_t2(Duration::from_millis(2));
    let dispatcher = Dispatcher::new(transport, DispatcherConfig::default().with_timers(timers)).unwrap();

    let mut tasks = Vec::new();
    for i in 0..32u64 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            let req = request(Method::Options, &format!("z9hG4bKrt{}", i));
            let gate = Arc::new(GateListener::default());
            let listener: Arc<dyn TransactionListener> = gate.clone();
            let tx = dispatcher
                .create_client_transaction(req.clone(), server_addr(), Some(listener))
                .unwrap();
            tx.start().unwrap();

            // Provisionals keep the listener busy while Timer E keeps firing
            let flooder = dispatcher.clone();
            let trying = response_to(&req, StatusCode::TRYING);
            let flood = tokio::spawn(async move {
                for _ in 0..200 {
                    flooder.dispatch(incoming(trying.clone(), server_addr()));
                    tokio::task::yield_now().await;
                }
            });

            tokio::time::sleep(Duration::from_millis(i % 5)).await;
            tx.terminate();
            gate.closed.store(true, Ordering::SeqCst);

            flood.await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;

            assert_eq!(gate.late.load(Ordering::SeqCst), 0, "event delivered after terminate()");
            assert_eq!(tx.state(), TransactionState::Terminated);
            assert!(!dispatcher.is_registered(tx.key()));
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(dispatcher.transaction_count(), 0);
}
