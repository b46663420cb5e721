//! End-to-end jobs against real and faulty workers over TCP.

use std::collections::BTreeSet;

use common::{
    Fault, init_tracing, random_matrix, start_faulty_worker, start_workers, test_rng,
    unreachable_address, write_registry,
};
use shardmul::{
    Error, Matrix, ProtocolError,
    dispatch::{DispatchOptions, Dispatcher},
    partition::Layout,
    registry::Registry,
    select::{BindProbe, ConnectProbe, select_workers},
};

mod common;

#[tokio::test]
async fn two_workers_four_tasks() {
    init_tracing();
    let workers = start_workers(2).await;
    let a = Matrix::<i64>::new(4, 4, (1..=16).collect()).unwrap();
    let b = Matrix::new(4, 2, vec![1, 0, 0, 1, 2, 3, -1, 4]).unwrap();

    let dispatcher = Dispatcher::new(workers.clone()).unwrap();
    let report = dispatcher.run(&a, &b, Layout::new(2, 2)).await.unwrap();

    let table = &report.execution.table;
    assert_eq!(table.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    assert_eq!(report.product, a.multiply(&b).unwrap());
    for worker in &workers {
        assert!(report.execution.reliability[worker] >= 0);
    }
}

#[tokio::test]
async fn retries_converge_next_to_failing_workers() {
    init_tracing();
    let mut workers = vec![
        start_faulty_worker(Fault::NoResult).await,
        start_faulty_worker(Fault::Hangup).await,
        unreachable_address(),
    ];
    workers.extend(start_workers(1).await);
    let good = workers[3].clone();

    let a = random_matrix(9, 6);
    let b = random_matrix(6, 5);
    let layout = Layout::new(3, 3);
    let dispatcher = Dispatcher::new(workers.clone())
        .unwrap()
        .with_options(DispatchOptions {
            keep_local: false,
            max_consecutive_failures: 0,
            ..Default::default()
        });
    let report = dispatcher.run(&a, &b, layout).await.unwrap();

    assert_eq!(report.product, a.multiply(&b).unwrap());
    let indices: BTreeSet<_> = report.execution.table.keys().copied().collect();
    assert_eq!(indices, (0..layout.tasks()).collect());
    assert_eq!(report.execution.reliability[&good], layout.tasks() as i64);
    for bad in &workers[..3] {
        assert!(report.execution.reliability[bad] < 0);
    }
}

#[tokio::test]
async fn redacted_job_over_tcp() {
    init_tracing();
    let workers = start_workers(3).await;
    let a = random_matrix(8, 8);
    let b = random_matrix(8, 3);
    let dispatcher = Dispatcher::new(workers).unwrap().with_options(DispatchOptions {
        redact: true,
        ..Default::default()
    });
    let report = dispatcher
        .run_with_rng(&a, &b, Layout::new(4, 2), &mut *test_rng())
        .await
        .unwrap();
    assert_eq!(report.product, a.multiply(&b).unwrap());
}

#[tokio::test]
async fn bad_acknowledgement_aborts_the_job() {
    init_tracing();
    let workers = vec![start_faulty_worker(Fault::BadAck).await];
    let a = random_matrix(2, 2);
    let dispatcher = Dispatcher::new(workers).unwrap().with_options(DispatchOptions {
        keep_local: false,
        ..Default::default()
    });
    let err = dispatcher.run(&a, &a, Layout::new(1, 1)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::InvalidAcknowledgement(ref token)) if token == "NAK"
    ));
}

#[tokio::test]
async fn silent_workers_time_out_and_get_retired() {
    init_tracing();
    let workers = vec![
        start_faulty_worker(Fault::Silent).await,
        start_faulty_worker(Fault::Silent).await,
    ];
    let a = random_matrix(4, 4);
    let dispatcher = Dispatcher::new(workers).unwrap().with_options(DispatchOptions {
        keep_local: false,
        exchange_timeout_ms: 50,
        max_consecutive_failures: 1,
        ..Default::default()
    });
    assert!(matches!(
        dispatcher.run(&a, &a, Layout::new(2, 1)).await,
        Err(Error::NoWorkersReachable { pending: 2 })
    ));
}

#[tokio::test]
async fn bounded_retries_report_the_exhausted_task() {
    init_tracing();
    let workers = vec![start_faulty_worker(Fault::NoResult).await];
    let a = random_matrix(3, 3);
    let dispatcher = Dispatcher::new(workers).unwrap().with_options(DispatchOptions {
        keep_local: false,
        max_attempts: Some(3),
        max_consecutive_failures: 0,
        max_in_flight: Some(1),
        ..Default::default()
    });
    let err = dispatcher.run(&a, &a, Layout::new(1, 1)).await.unwrap_err();
    assert!(matches!(err, Error::TaskExhausted { index: 0, attempts: 3 }));
}

#[tokio::test]
async fn selected_workers_run_a_job() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(dir.path().join("workers.txt"));
    let live = start_workers(2).await;
    let dead = unreachable_address();
    write_registry(
        &registry,
        &[
            (live[0].clone(), 4, 8.0),
            (dead.clone(), 64, 512.0),
            (live[1].clone(), 8, 8.0),
        ],
    )
    .await;

    let selected = select_workers(&registry, Some(2), &BindProbe, &mut *test_rng())
        .await
        .unwrap();
    assert_eq!(selected, vec![live[1].clone(), live[0].clone()]);
    let via_connect = select_workers(&registry, Some(2), &ConnectProbe::default(), &mut *test_rng())
        .await
        .unwrap();
    assert_eq!(via_connect, selected);

    let a = random_matrix(6, 4);
    let b = random_matrix(4, 4);
    let report = Dispatcher::new(selected)
        .unwrap()
        .run(&a, &b, Layout::new(3, 2))
        .await
        .unwrap();
    assert_eq!(report.product, a.multiply(&b).unwrap());
}
