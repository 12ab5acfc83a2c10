mod common;

use broker_controller::config::Config;
use broker_controller::control::{
    BrokerController, ControllerError, ControllerEvent, ControllerOptions, ControllerState,
};
use broker_controller::management::ManagementError;
use broker_controller::model::DesiredAddress;
use common::{endpoint, MockBroker, MockConnector};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn controller(connector: &Arc<MockConnector>) -> Arc<BrokerController> {
    let config = Config::for_broker("http://mock-broker:8161/console");
    Arc::new(BrokerController::from_config(&config, connector.clone()).unwrap())
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<ControllerEvent>) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event in time")
        .unwrap()
}

async fn wait_for_in_flight(controller: &BrokerController) {
    while controller.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[tokio::test]
async fn operations_before_connect_are_not_ready() {
    let connector = MockConnector::new(MockBroker::new());
    let controller = controller(&connector);

    let err = controller.sync(&[]).await.unwrap_err();
    assert!(matches!(err, ControllerError::NotReady(ControllerState::Disconnected)));
    let err = controller.retrieve_stats().await.unwrap_err();
    assert!(matches!(err, ControllerError::NotReady(_)));
    assert_eq!(connector.broker.calls("list_addresses"), 0);
}

#[tokio::test]
async fn connect_emits_ready() {
    let connector = MockConnector::new(MockBroker::new());
    let controller = controller(&connector);
    let mut events = controller.subscribe();

    controller.connect(&endpoint()).await.unwrap();

    assert_eq!(controller.state(), ControllerState::Ready);
    assert!(matches!(next_event(&mut events).await, ControllerEvent::Ready));
    let report = controller
        .sync(&[DesiredAddress::queue("orders")])
        .await
        .unwrap();
    assert_eq!(report.created, 1);

    let err = controller.connect(&endpoint()).await.unwrap_err();
    assert!(matches!(err, ControllerError::AlreadyConnected(ControllerState::Ready)));
    assert_eq!(connector.connects(), 1);
}

#[tokio::test]
async fn failed_connect_can_be_retried() {
    let connector = MockConnector::new(MockBroker::new());
    connector.fail_with(Some(ManagementError::Connection("connection refused".into())));
    let controller = controller(&connector);

    let err = controller.connect(&endpoint()).await.unwrap_err();
    assert!(matches!(err, ControllerError::Connection(ManagementError::Connection(_))));
    assert_eq!(controller.state(), ControllerState::Disconnected);

    connector.fail_with(None);
    controller.connect(&endpoint()).await.unwrap();
    assert_eq!(controller.state(), ControllerState::Ready);
}

#[tokio::test]
async fn wait_ready_resolves_on_connect() {
    let connector = MockConnector::new(MockBroker::new());
    connector.set_delay(Duration::from_millis(10));
    let controller = controller(&connector);

    let waiter = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.wait_ready().await })
    };
    controller.connect(&endpoint()).await.unwrap();

    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn close_rejects_further_operations() {
    let connector = MockConnector::new(MockBroker::new());
    let controller = controller(&connector);
    controller.connect(&endpoint()).await.unwrap();
    let mut events = controller.subscribe();

    controller.close().await.unwrap();

    assert_eq!(controller.state(), ControllerState::Closed);
    assert!(connector.broker.is_closed());
    assert!(matches!(next_event(&mut events).await, ControllerEvent::Closed));
    assert!(matches!(controller.sync(&[]).await, Err(ControllerError::Closed)));
    assert!(matches!(controller.retrieve_stats().await, Err(ControllerError::Closed)));
    assert!(matches!(
        controller.connect(&endpoint()).await,
        Err(ControllerError::Closed)
    ));
    // closing twice is harmless
    controller.close().await.unwrap();
    assert_eq!(connector.broker.calls("close"), 1);
}

#[tokio::test]
async fn close_waits_for_in_flight_sync() {
    let broker = MockBroker::new();
    broker.set_latency(Duration::from_millis(30));
    let connector = MockConnector::new(broker.clone());
    let controller = controller(&connector);
    controller.connect(&endpoint()).await.unwrap();

    let desired = vec![DesiredAddress::queue("a"), DesiredAddress::topic("b")];
    let sync = {
        let controller = controller.clone();
        let desired = desired.clone();
        tokio::spawn(async move { controller.sync(&desired).await })
    };
    wait_for_in_flight(&controller).await;

    controller.close().await.unwrap();

    assert!(sync.is_finished());
    assert_eq!(controller.in_flight(), 0);
    let report = sync.await.unwrap().unwrap();
    assert_eq!(report.created, 2);
    broker.verify_addresses(&desired);
    assert!(broker.is_closed());
}

#[tokio::test]
async fn operations_are_rejected_while_closing() {
    let broker = MockBroker::new();
    broker.set_latency(Duration::from_millis(50));
    let connector = MockConnector::new(broker.clone());
    let controller = controller(&connector);
    controller.connect(&endpoint()).await.unwrap();

    let sync = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.sync(&[DesiredAddress::topic("slow")]).await })
    };
    wait_for_in_flight(&controller).await;
    let closing = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.close().await })
    };
    while controller.state() != ControllerState::Closing {
        tokio::task::yield_now().await;
    }

    assert!(matches!(controller.sync(&[]).await, Err(ControllerError::Closed)));
    assert!(matches!(controller.retrieve_stats().await, Err(ControllerError::Closed)));
    assert!(!closing.is_finished());
    assert_eq!(controller.in_flight(), 1);

    closing.await.unwrap().unwrap();
    sync.await.unwrap().unwrap();
    assert_eq!(controller.state(), ControllerState::Closed);
}

#[tokio::test]
async fn close_gives_up_after_timeout() {
    let broker = MockBroker::new();
    broker.set_latency(Duration::from_millis(300));
    let connector = MockConnector::new(broker.clone());
    let options = ControllerOptions {
        close_timeout: Duration::from_millis(20),
        ..ControllerOptions::default()
    };
    let controller = Arc::new(BrokerController::new(connector.clone(), options).unwrap());
    controller.connect(&endpoint()).await.unwrap();

    let sync = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.sync(&[DesiredAddress::topic("slow")]).await })
    };
    wait_for_in_flight(&controller).await;

    let started = Instant::now();
    controller.close().await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(controller.state(), ControllerState::Closed);
    assert_eq!(controller.in_flight(), 1);
    // the abandoned pass still runs to completion against its own handle
    sync.await.unwrap().unwrap();
    assert_eq!(controller.in_flight(), 0);
}

#[tokio::test]
async fn close_during_connect_wins() {
    let broker = MockBroker::new();
    let connector = MockConnector::new(broker.clone());
    connector.set_delay(Duration::from_millis(50));
    let controller = controller(&connector);

    let connecting = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.connect(&endpoint()).await })
    };
    while controller.state() != ControllerState::Connecting {
        tokio::task::yield_now().await;
    }

    controller.close().await.unwrap();

    assert_eq!(controller.state(), ControllerState::Closed);
    assert!(matches!(connecting.await.unwrap(), Err(ControllerError::Closed)));
    assert!(broker.is_closed());
}

#[tokio::test]
async fn close_before_connect_is_terminal() {
    let connector = MockConnector::new(MockBroker::new());
    let controller = controller(&connector);

    controller.close().await.unwrap();

    assert_eq!(controller.state(), ControllerState::Closed);
    assert!(controller.wait_ready().await.is_err());
    assert_eq!(connector.connects(), 0);
}

#[tokio::test]
async fn invalid_global_size_is_rejected_at_construction() {
    let mut config = Config::for_broker("http://mock-broker:8161/console");
    config.global.broker_global_max_size = Some("lots".into());
    let connector = MockConnector::new(MockBroker::new());

    let err = BrokerController::from_config(&config, connector).err().unwrap();

    assert!(matches!(err, ControllerError::Settings(_)));
}
