use super::*;
use crate::controller::{MIN_CONNECTION_TIMEOUT, MIN_RECONNECT_INTERVAL};
use crate::message::std_types::{
    Int32, SetBool, SetBoolRequest, SetBoolResponse, StringMsg, Trigger, TriggerRequest,
};
use crate::transport::MockTransport;
use serde_json::json;
use std::sync::Mutex as StdMutex;

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::new(true, 3, Duration::from_millis(10), Duration::from_millis(10))
}

fn setup() -> (Arc<MockTransport>, ConnectionManager) {
    let transport = Arc::new(MockTransport::new());
    let manager = ConnectionManager::with_health_check_interval(
        transport.clone(),
        fast_policy(),
        Duration::from_millis(20),
    );
    (transport, manager)
}

async fn connected() -> (Arc<MockTransport>, ConnectionManager) {
    let (transport, manager) = setup();
    manager.connect().await.unwrap();
    (transport, manager)
}

async fn next_event(stream: &mut broadcast::Receiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(Duration::from_secs(2), stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

fn attempt(attempt: u32, max_attempts: u32) -> ConnectionEvent {
    ConnectionEvent::ReconnectionAttempt {
        attempt,
        max_attempts,
    }
}

// ============================================================================
// Services
// ============================================================================

#[tokio::test]
async fn test_service_created_while_disconnected_binds_on_connect() {
    let (transport, manager) = setup();
    transport
        .respond_with("/reset", |_| json!({"success": true, "message": "reset"}))
        .await;

    let reset = manager.create_service::<Trigger>("/reset", None).await.unwrap();
    assert!(!reset.is_bound().await);
    assert!(matches!(
        reset.call(&TriggerRequest {}).await,
        Err(LinkError::NotBound(_))
    ));

    manager.connect().await.unwrap();

    assert!(reset.is_bound().await);
    let response = reset.call(&TriggerRequest {}).await.unwrap();
    assert!(response.success);
    assert_eq!(response.message, "reset");
}

#[tokio::test]
async fn test_create_service_is_idempotent() {
    let (transport, manager) = connected().await;

    manager.create_service::<Trigger>("/reset", None).await.unwrap();
    manager.create_service::<Trigger>("/reset", None).await.unwrap();

    assert_eq!(manager.service_names().await, vec!["/reset"]);
    assert_eq!(transport.bound_services().await, vec!["/reset"]);
}

#[tokio::test]
async fn test_create_service_with_other_type_is_incompatible() {
    let (_transport, manager) = setup();
    manager.create_service::<Trigger>("/arm", None).await.unwrap();

    let result = manager.create_service::<SetBool>("/arm", None).await;

    assert!(matches!(result, Err(LinkError::IncompatibleType { .. })));
    assert!(manager.service::<Trigger>("/arm").await.is_ok());
    assert!(matches!(
        manager.service::<SetBool>("/arm").await,
        Err(LinkError::IncompatibleType { .. })
    ));
    assert!(matches!(
        manager.service::<Trigger>("/missing").await,
        Err(LinkError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_call_default_request() {
    let (transport, manager) = connected().await;
    transport
        .respond_with("/toggle", |request| {
            json!({"success": request["data"], "message": "toggled"})
        })
        .await;

    let toggle = manager
        .create_service::<SetBool>("/toggle", Some(SetBoolRequest { data: true }))
        .await
        .unwrap();
    let response: SetBoolResponse = toggle.call_default().await.unwrap();
    assert!(response.success);

    toggle
        .set_default_request(&SetBoolRequest { data: false })
        .await
        .unwrap();
    assert!(!toggle.call_default().await.unwrap().success);
}

#[tokio::test]
async fn test_call_default_without_default_is_invalid_config() {
    let (_transport, manager) = connected().await;
    let reset = manager.create_service::<Trigger>("/reset", None).await.unwrap();

    assert!(matches!(
        reset.call_default().await,
        Err(LinkError::InvalidConfig(_))
    ));
}

#[tokio::test]
async fn test_call_with_delivers_response_once() {
    let (transport, manager) = connected().await;
    transport
        .respond_with("/reset", |_| json!({"success": true, "message": "ok"}))
        .await;
    let reset = manager.create_service::<Trigger>("/reset", None).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();

    reset
        .call_with(&TriggerRequest {}, move |result| {
            let _ = tx.send(result);
        })
        .await
        .unwrap();

    let response = rx.await.unwrap().unwrap();
    assert_eq!(response.message, "ok");
}

#[tokio::test]
async fn test_call_with_unbound_fails_synchronously() {
    let (_transport, manager) = setup();
    let reset = manager.create_service::<Trigger>("/reset", None).await.unwrap();

    let result = reset
        .call_with(&TriggerRequest {}, |_| panic!("callback must not run"))
        .await;

    assert!(matches!(result, Err(LinkError::NotBound(_))));
}

#[tokio::test]
async fn test_call_after_loss_is_not_bound() {
    let (transport, manager) = connected().await;
    let reset = manager.create_service::<Trigger>("/reset", None).await.unwrap();
    transport.refuse_connects(true);

    transport.drop_connection().await;

    assert!(matches!(
        reset.call(&TriggerRequest {}).await,
        Err(LinkError::NotBound(_))
    ));
}

// ============================================================================
// Topics
// ============================================================================

#[tokio::test]
async fn test_publish_requires_active_topic() {
    let (transport, manager) = setup();
    let chatter = manager.create_publisher::<StringMsg>("/chatter").await.unwrap();

    assert!(matches!(
        chatter.publish(&StringMsg::from("early")).await,
        Err(LinkError::NotActive(_))
    ));

    manager.connect().await.unwrap();
    chatter.publish(&StringMsg::from("hello")).await.unwrap();

    assert!(chatter.is_active().await);
    assert_eq!(transport.sent("/chatter").await, vec![json!({"data": "hello"})]);
}

#[tokio::test]
async fn test_publish_marks_topic_inactive_on_loss_then_heals() {
    let (transport, manager) = connected().await;
    let chatter = manager.create_publisher::<StringMsg>("/chatter").await.unwrap();
    let mut stream = manager.event_stream();
    // Keep the monitor's own cycle from reconnecting before the asserts
    manager.set_max_reconnect_attempts(0).await;
    transport.refuse_connects(true);

    transport.drop_connection().await;
    let result = chatter.publish(&StringMsg::from("lost")).await;

    assert!(matches!(result, Err(LinkError::NotActive(_))));
    assert!(!chatter.is_active().await);
    {
        let core = manager.controller().lock().await;
        assert!(!core.registry.topic("/chatter").unwrap().is_active());
    }

    transport.refuse_connects(false);
    manager.manual_reconnect().await;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), stream.recv())
            .await
            .unwrap()
            .unwrap();
        if event == ConnectionEvent::Connected {
            break;
        }
    }

    assert!(chatter.is_active().await);
    chatter.publish(&StringMsg::from("back")).await.unwrap();
    assert_eq!(transport.sent("/chatter").await, vec![json!({"data": "back"})]);
}

#[tokio::test]
async fn test_subscriber_receives_typed_messages() {
    let (transport, manager) = connected().await;
    let received = Arc::new(StdMutex::new(Vec::new()));
    let sink = received.clone();

    manager
        .create_subscriber::<Int32, _>("/count", move |msg| sink.lock().unwrap().push(msg.data))
        .await
        .unwrap();

    transport.deliver("/count", json!({"data": 7})).await;
    // Undecodable payloads are dropped
    transport.deliver("/count", json!({"data": "seven"})).await;
    transport.deliver("/count", json!({"data": 8})).await;

    assert_eq!(*received.lock().unwrap(), vec![7, 8]);
}

#[tokio::test]
async fn test_change_callback_resubscribes() {
    let (transport, manager) = connected().await;
    let first = Arc::new(StdMutex::new(Vec::new()));
    let second = Arc::new(StdMutex::new(Vec::new()));

    let sink = first.clone();
    let subscriber = manager
        .create_subscriber::<StringMsg, _>("/chatter", move |msg| {
            sink.lock().unwrap().push(msg.data)
        })
        .await
        .unwrap();
    transport.deliver("/chatter", json!({"data": "one"})).await;

    let sink = second.clone();
    subscriber
        .change_callback(move |msg: StringMsg| sink.lock().unwrap().push(msg.data))
        .await
        .unwrap();
    transport.deliver("/chatter", json!({"data": "two"})).await;

    assert_eq!(*first.lock().unwrap(), vec!["one"]);
    assert_eq!(*second.lock().unwrap(), vec!["two"]);
    assert_eq!(transport.subscribed().await, vec!["/chatter"]);
    assert!(subscriber.is_active().await);
}

#[tokio::test]
async fn test_topic_role_conflict() {
    let (_transport, manager) = setup();
    manager.create_publisher::<StringMsg>("/chatter").await.unwrap();

    let result = manager
        .create_subscriber::<StringMsg, _>("/chatter", |_| {})
        .await;

    assert!(matches!(result, Err(LinkError::IncompatibleType { .. })));
    assert!(manager.publisher::<StringMsg>("/chatter").await.is_ok());
    assert!(matches!(
        manager.subscriber::<StringMsg>("/chatter").await,
        Err(LinkError::IncompatibleType { .. })
    ));
}

#[tokio::test]
async fn test_topic_and_service_names_share_namespace() {
    let (_transport, manager) = setup();
    manager.create_service::<Trigger>("/thing", None).await.unwrap();

    let result = manager.create_publisher::<StringMsg>("/thing").await;

    assert!(matches!(result, Err(LinkError::DuplicateName(_))));
}

#[tokio::test]
async fn test_remove_topic_twice() {
    let (transport, manager) = connected().await;
    manager.create_publisher::<StringMsg>("/chatter").await.unwrap();
    manager
        .create_subscriber::<StringMsg, _>("/echo", |_| {})
        .await
        .unwrap();

    assert!(manager.remove_topic("/chatter").await);
    assert!(!manager.remove_topic("/chatter").await);
    assert!(!manager.remove_topic("/never").await);

    assert!(transport.advertised().await.is_empty());
    assert_eq!(manager.topic_names().await, vec!["/echo"]);
}

#[tokio::test]
async fn test_remove_topic_while_disconnected() {
    let (_transport, manager) = setup();
    manager.create_publisher::<StringMsg>("/chatter").await.unwrap();

    assert!(manager.remove_topic("/chatter").await);
    assert!(manager.topic_names().await.is_empty());
}

// ============================================================================
// Policy, events, startup
// ============================================================================

#[tokio::test]
async fn test_policy_setters_clamp() {
    let (_transport, manager) = setup();

    manager.set_reconnect_interval(Duration::ZERO).await;
    manager.set_connection_timeout(Duration::ZERO).await;
    manager.set_max_reconnect_attempts(0).await;
    manager.set_auto_reconnect(false).await;

    assert_eq!(manager.reconnect_interval().await, MIN_RECONNECT_INTERVAL);
    assert_eq!(manager.connection_timeout().await, MIN_CONNECTION_TIMEOUT);
    assert_eq!(manager.max_reconnect_attempts().await, 0);
    assert!(!manager.auto_reconnect_enabled().await);
}

#[tokio::test]
async fn test_unsubscribed_handler_not_called() {
    let (_transport, manager) = setup();
    let calls = Arc::new(StdMutex::new(0));
    let counter = calls.clone();
    let id = manager
        .subscribe_events(move |_event: ConnectionEvent| {
            *counter.lock().unwrap() += 1;
            async {}
        })
        .await;

    assert!(manager.unsubscribe_events(id).await);
    manager.connect().await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_connect_without_start_monitors_health() {
    let (transport, manager) = connected().await;
    manager.set_reconnect_interval(Duration::from_secs(10)).await;
    transport.refuse_connects(true);
    let mut stream = manager.event_stream();

    transport.drop_connection().await;

    assert_eq!(next_event(&mut stream).await, ConnectionEvent::Disconnected);
    assert_eq!(manager.state().await, ConnectionState::Reconnecting);
    assert!(manager.is_reconnecting().await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_manual_reconnect_without_start_monitors_health() {
    let (transport, manager) = setup();
    manager.set_auto_reconnect(false).await;
    let mut stream = manager.event_stream();

    manager.manual_reconnect().await;
    assert_eq!(next_event(&mut stream).await, attempt(1, 3));
    assert_eq!(next_event(&mut stream).await, ConnectionEvent::Connected);

    transport.drop_connection().await;

    assert_eq!(next_event(&mut stream).await, ConnectionEvent::Disconnected);
    assert_eq!(manager.state().await, ConnectionState::Disconnected);
    assert!(!manager.is_reconnecting().await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_wait_for_connection() {
    let (transport, manager) = setup();
    transport.fail_connects(1);

    assert!(manager.connect().await.is_err());
    manager
        .wait_for_connection(Duration::from_secs(2))
        .await
        .unwrap();

    assert!(manager.is_connected().await);
    // Already connected resolves immediately
    manager
        .wait_for_connection(Duration::from_millis(1))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_wait_for_connection_exhausted() {
    let (transport, manager) = setup();
    transport.refuse_connects(true);

    let _ = manager.connect().await;
    let result = manager.wait_for_connection(Duration::from_secs(2)).await;

    assert!(matches!(
        result,
        Err(LinkError::ReconnectExhausted { attempts: 3 })
    ));
}

#[tokio::test]
async fn test_wait_for_connection_timeout() {
    let (_transport, manager) = setup();

    let result = manager.wait_for_connection(Duration::from_millis(20)).await;

    assert!(matches!(result, Err(LinkError::ConnectionTimeout(_))));
}

#[tokio::test]
async fn test_register_declared_services() {
    let (transport, manager) = connected().await;
    let declarations = vec![
        ServiceDeclaration {
            name: "/reset".to_string(),
            service_type: "std_srvs/Trigger".to_string(),
            ..Default::default()
        },
        ServiceDeclaration {
            name: "/toggle".to_string(),
            service_type: "std_srvs/SetBool".to_string(),
            default_request: Some(json!({"data": true})),
            comment: Some("gripper".to_string()),
        },
        ServiceDeclaration {
            name: "/unknown".to_string(),
            service_type: "custom_srvs/Teleport".to_string(),
            ..Default::default()
        },
        ServiceDeclaration {
            name: "/bad_default".to_string(),
            service_type: "std_srvs/SetBool".to_string(),
            default_request: Some(json!(42)),
            comment: None,
        },
    ];

    let registered = manager
        .register_declared_services(&declarations, &KindCatalog::with_std_types())
        .await;

    assert_eq!(registered, 2);
    assert_eq!(manager.service_names().await, vec!["/reset", "/toggle"]);
    assert_eq!(transport.bound_services().await, vec!["/reset", "/toggle"]);

    // Declaring again registers nothing new
    let again = manager
        .register_declared_services(&declarations, &KindCatalog::with_std_types())
        .await;
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_from_config() {
    let transport = Arc::new(MockTransport::new());
    let mut config = LinkConfig::default();
    config.reconnect.max_attempts = 9;
    config.reconnect.interval_secs = 0.25;

    let manager = ConnectionManager::from_config(transport, &config);

    assert_eq!(manager.max_reconnect_attempts().await, 9);
    assert_eq!(manager.reconnect_interval().await, Duration::from_millis(250));
    assert_eq!(
        manager.controller().health_check_interval(),
        Duration::from_secs(1)
    );
}

#[tokio::test]
async fn test_shutdown_clears_registry() {
    let (transport, manager) = connected().await;
    manager.create_publisher::<StringMsg>("/chatter").await.unwrap();
    manager.create_service::<Trigger>("/reset", None).await.unwrap();

    manager.shutdown().await;

    assert!(manager.topic_names().await.is_empty());
    assert!(manager.service_names().await.is_empty());
    assert!(!manager.is_connected().await);
    assert_eq!(transport.binding_count().await, 0);
}
