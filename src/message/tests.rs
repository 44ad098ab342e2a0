use super::std_types::*;
use super::*;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Pose {
    x: f64,
    y: f64,
}

impl Message for Pose {
    const KIND: MessageKind = MessageKind::new("geometry_msgs/Pose2D");
}

#[test]
fn test_message_kind_of() {
    assert_eq!(MessageKind::of::<StringMsg>().name(), "std_msgs/String");
    assert_eq!(MessageKind::of::<Pose>().to_string(), "geometry_msgs/Pose2D");
}

#[test]
fn test_service_kind_pairs_request_and_response() {
    let kind = ServiceKind::of::<Trigger>();
    assert_eq!(kind.service_type, "std_srvs/Trigger");
    assert_eq!(kind.request, TriggerRequest::KIND);
    assert_eq!(kind.response, TriggerResponse::KIND);
    assert_eq!(
        kind.to_string(),
        "std_srvs/Trigger (std_srvs/TriggerRequest -> std_srvs/TriggerResponse)"
    );
}

#[test]
fn test_payload_encoding() {
    let payload = Pose { x: 1.5, y: -2.0 }.to_payload().unwrap();
    assert_eq!(payload, serde_json::json!({"x": 1.5, "y": -2.0}));
    assert_eq!(
        Pose::from_payload(payload).unwrap(),
        Pose { x: 1.5, y: -2.0 }
    );
}

#[test]
fn test_decode_rejects_wrong_shape() {
    let result = Int32::from_payload(serde_json::json!({"data": "not a number"}));
    assert!(matches!(result, Err(crate::error::LinkError::Codec(_))));
}

#[test]
fn test_catalog_std_types() {
    let catalog = KindCatalog::with_std_types();

    assert_eq!(catalog.message("std_msgs/Bool"), Some(Bool::KIND));
    assert_eq!(
        catalog.service("std_srvs/SetBool"),
        Some(ServiceKind::of::<SetBool>())
    );
    // Service registration also registers its message kinds
    assert_eq!(
        catalog.message("std_srvs/TriggerResponse"),
        Some(TriggerResponse::KIND)
    );
    assert_eq!(
        catalog.service_types(),
        vec!["std_srvs/Empty", "std_srvs/SetBool", "std_srvs/Trigger"]
    );
}

#[test]
fn test_catalog_unknown_type() {
    let catalog = KindCatalog::with_std_types();
    assert!(catalog.service("std_srvs/Unknown").is_none());
    assert!(catalog.message("geometry_msgs/Pose2D").is_none());
}

#[test]
fn test_catalog_custom_message() {
    let mut catalog = KindCatalog::new();
    catalog.register_message::<Pose>();
    assert_eq!(catalog.message("geometry_msgs/Pose2D"), Some(Pose::KIND));
}
