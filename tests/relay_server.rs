use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;

use motion_sentry::alert::{AlertDelivery, StepOutcome};
use motion_sentry::{AlertQueue, AlertTask, RelayDelivery, RelayServer, RelayServerConfig};

fn config() -> RelayServerConfig {
    RelayServerConfig {
        addr: "127.0.0.1:0".into(),
    }
}

fn post(addr: SocketAddr, path: &str, body: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let request = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    );
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    let (head, body) = response.split_once("\r\n\r\n").expect("complete response");
    (head.to_string(), body.to_string())
}

#[test]
fn send_task_queues_the_alert() {
    let (queue, receiver) = AlertQueue::channel();
    let handle = RelayServer::new(config(), queue).spawn().unwrap();

    let (head, body) = post(
        handle.addr,
        "/send_task",
        r#"{"photo_path":"output/motion_detected_20240101-120000.jpg","message_text":"Motion detected! Objects: person. (12:00:00)","voice_text":"Motion detected. Objects: person.","web_link":"http://cam.local:5000/"}"#,
    );
    assert!(head.starts_with("HTTP/1.1 202"), "unexpected response: {}", head);
    assert_eq!(body, r#"{"status":"queued"}"#);

    let task = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("queued task");
    assert_eq!(
        task.photo_path,
        PathBuf::from("output/motion_detected_20240101-120000.jpg")
    );
    assert_eq!(task.message, "Motion detected! Objects: person. (12:00:00)");
    assert_eq!(
        task.voice_text.as_deref(),
        Some("Motion detected. Objects: person.")
    );
    assert_eq!(task.stream_url.as_deref(), Some("http://cam.local:5000/"));

    handle.stop().unwrap();
}

#[test]
fn malformed_tasks_are_rejected() {
    let (queue, receiver) = AlertQueue::channel();
    let handle = RelayServer::new(config(), queue).spawn().unwrap();

    let (head, _) = post(handle.addr, "/send_task", "{not json");
    assert!(head.starts_with("HTTP/1.1 400"));

    let (head, body) = post(
        handle.addr,
        "/send_task",
        r#"{"photo_path":"a.jpg","message_text":"  "}"#,
    );
    assert!(head.starts_with("HTTP/1.1 400"));
    assert!(body.contains("message_text"));

    let (head, _) = post(handle.addr, "/elsewhere", "{}");
    assert!(head.starts_with("HTTP/1.1 404"));

    assert!(receiver.try_recv().is_err());
    handle.stop().unwrap();
}

#[test]
fn relay_delivery_round_trips_through_the_server() {
    let (queue, receiver) = AlertQueue::channel();
    let handle = RelayServer::new(config(), queue).spawn().unwrap();

    let url = format!("http://{}/send_task", handle.addr);
    let mut delivery = RelayDelivery::new(&url, Duration::from_secs(5)).unwrap();
    let task = AlertTask::for_motion(
        PathBuf::from("output/motion_detected_20240101-120000.jpg"),
        &["dog".to_string()],
        Local::now(),
        Some("http://cam.local:5000/".into()),
    );

    let report = delivery.deliver(&task);
    assert_eq!(report.photo, StepOutcome::Sent);
    assert_eq!(report.text, StepOutcome::Sent);
    assert_eq!(report.voice, StepOutcome::Sent);

    let received = receiver
        .recv_timeout(Duration::from_secs(2))
        .expect("forwarded task");
    assert_eq!(received.photo_path, task.photo_path);
    assert_eq!(received.message, task.message);
    assert_eq!(received.voice_text, task.voice_text);
    assert_eq!(received.stream_url, task.stream_url);

    handle.stop().unwrap();
}
