mod fixture;

use fixture::Fixture;
use orb_smsd::{
    dispatcher::SendFailure,
    error::Rejected,
    sim::{SentSms, SimConfig},
};

#[tokio::test]
async fn it_sends_through_the_worker() {
    // Arrange
    let fx = Fixture::builder().run();

    // Act
    let ticket = fx.gateway.enqueue_send("+33600000000", "hello").unwrap();
    let report = ticket.wait().await.unwrap();

    // Assert
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(
        fx.sim.sent(),
        [SentSms {
            destination: "+33600000000".into(),
            text: "hello".into(),
            smsc: None,
        }]
    );
    fx.stop().await;
}

#[tokio::test]
async fn it_unlocks_a_pin_locked_sim_before_sending() {
    // Arrange
    let fx = Fixture::builder()
        .sim(SimConfig {
            pin: Some("2468".into()),
            ..SimConfig::default()
        })
        .modem_pin("2468")
        .run();

    // Act
    let report = fx
        .gateway
        .enqueue_send("+33600000000", "unlocked")
        .unwrap()
        .wait()
        .await;

    // Assert
    assert!(report.is_ok(), "{report:?}");
    assert!(!fx.sim.is_locked());
    fx.stop().await;
}

#[tokio::test]
async fn a_message_is_retried_then_given_up_on() {
    // Arrange
    let fx = Fixture::builder().max_retries(2).run();
    fx.sim.fail_sends(u32::MAX);

    // Act
    let outcome = fx
        .gateway
        .enqueue_send("+33600000000", "doomed")
        .unwrap()
        .wait()
        .await;

    // Assert
    match outcome {
        Err(SendFailure::RetriesExhausted {
            attempts,
            undelivered,
            ..
        }) => {
            assert_eq!(attempts, 3);
            assert_eq!(undelivered.len(), 1);
        }
        other => panic!("expected retries to run out, got {other:?}"),
    }
    assert!(fx.sim.sent().is_empty());
    fx.stop().await;
}

#[tokio::test]
async fn a_transient_failure_does_not_lose_the_message() {
    // Arrange
    let fx = Fixture::builder().run();
    fx.sim.fail_sends(1);

    // Act
    let first = fx.gateway.enqueue_send("+33611111111", "one").unwrap();
    let second = fx.gateway.enqueue_send("+33622222222", "two").unwrap();
    let (first, second) = tokio::join!(first.wait(), second.wait());

    // Assert
    assert_eq!(first.unwrap().attempts, 2);
    assert_eq!(second.unwrap().attempts, 1);
    let mut texts: Vec<String> = fx.sim.sent().into_iter().map(|s| s.text).collect();
    texts.sort();
    assert_eq!(texts, ["one", "two"]);
    fx.stop().await;
}

#[tokio::test]
async fn one_message_can_go_to_several_numbers() {
    // Arrange
    let fx = Fixture::builder().run();

    // Act
    let report = fx
        .gateway
        .enqueue_send("+33611111111, +33622222222", "all")
        .unwrap()
        .wait()
        .await
        .unwrap();

    // Assert
    let destinations: Vec<String> = report
        .deliveries
        .iter()
        .map(|d| d.destination.to_string())
        .collect();
    assert_eq!(destinations, ["+33611111111", "+33622222222"]);
    assert_eq!(fx.sim.sent().len(), 2);
    fx.stop().await;
}

#[tokio::test]
async fn nothing_is_accepted_after_stop() {
    // Arrange
    let fx = Fixture::builder().run();
    let gateway = fx.gateway.clone();

    // Act
    fx.stop().await;
    let result = gateway.enqueue_send("+33600000000", "too late");

    // Assert
    assert_eq!(result.unwrap_err(), Rejected::WorkerStopped);
}
