use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use logman_agent::ControllerClient;
use logman_core::{
    rpc::{paths, RegisterRequest, RegisterResponse, ReportErrorRequest, RpcReply, NODE_ID_HEADER},
    transfer::encode_chunks,
    SchedulerError,
};
use uuid::Uuid;

#[derive(Clone, Default)]
struct Recorded {
    uploads: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    errors: Arc<Mutex<Vec<(String, String)>>>,
}

async fn spawn_controller(recorded: Recorded, node_id: Uuid) -> String {
    let app = Router::new()
        .route(
            paths::REGISTER,
            post(move |Json(request): Json<RegisterRequest>| async move {
                if request.hostname == "rejected" {
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"success": false, "message": "主机名非法"})),
                    );
                }
                (
                    StatusCode::OK,
                    Json(
                        serde_json::to_value(RegisterResponse {
                            success: true,
                            uuid: Some(node_id),
                        })
                        .unwrap(),
                    ),
                )
            }),
        )
        .route(
            paths::SUBMIT_RESULT,
            post(
                |State(recorded): State<Recorded>, headers: HeaderMap, body: Bytes| async move {
                    let id = headers[NODE_ID_HEADER].to_str().unwrap().to_string();
                    recorded.uploads.lock().unwrap().push((id, body.to_vec()));
                    Json(RpcReply::ok())
                },
            ),
        )
        .route(
            paths::REPORT_ERROR,
            post(
                |State(recorded): State<Recorded>,
                 headers: HeaderMap,
                 Json(request): Json<ReportErrorRequest>| async move {
                    let id = headers[NODE_ID_HEADER].to_str().unwrap().to_string();
                    recorded.errors.lock().unwrap().push((id, request.message));
                    Json(RpcReply::ok())
                },
            ),
        )
        .with_state(recorded);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{address}")
}

fn request(hostname: &str) -> RegisterRequest {
    RegisterRequest {
        hostname: hostname.into(),
        ip: "127.0.0.1".into(),
        port: 50052,
        uuid: None,
    }
}

#[tokio::test]
async fn test_register_and_upload() {
    let recorded = Recorded::default();
    let node_id = Uuid::new_v4();
    let url = spawn_controller(recorded.clone(), node_id).await;
    let client = ControllerClient::new(url).unwrap();

    let uuid = client.register(&request("NodeA")).await.unwrap();
    assert_eq!(uuid, node_id);

    let payload = vec![7u8; 2500];
    let reply = client.submit_result(uuid, &payload).await.unwrap();
    assert!(reply.success);

    let uploads = recorded.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].0, node_id.to_string());
    assert_eq!(uploads[0].1, encode_chunks(&payload, 1024).to_vec());

    client.report_error(uuid, "磁盘已满").await.unwrap();
    assert_eq!(
        recorded.errors.lock().unwrap().as_slice(),
        &[(node_id.to_string(), "磁盘已满".to_string())]
    );
}

#[tokio::test]
async fn test_rejected_registration_is_not_retried() {
    let url = spawn_controller(Recorded::default(), Uuid::new_v4()).await;
    let client = ControllerClient::new(url).unwrap();

    let started = Instant::now();
    let err = client
        .register_with_retry(&request("rejected"), 5, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(1));
    match err {
        SchedulerError::Rpc(logman_core::RpcError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "主机名非法");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_register_with_retry_gives_up_on_unreachable_controller() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);

    let client = ControllerClient::with_timeout(format!("http://{address}"), Duration::from_secs(2))
        .unwrap();
    let err = client
        .register_with_retry(&request("NodeA"), 3, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
}

#[test]
fn test_local_registration_uses_hostname() {
    let request = ControllerClient::local_registration("10.0.0.1", 50052, None);
    assert!(!request.hostname.is_empty());
    assert_eq!(request.ip, "10.0.0.1");
    assert_eq!(request.port, 50052);
}
