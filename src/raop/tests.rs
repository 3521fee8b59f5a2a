use std::io::{Read as _, Write as _};
use std::net::TcpStream;
use std::time::Duration;

use super::{RaopServer, ServerStatus};
use crate::config::{OutputConfig, RaopConfig};
use crate::outputs::Outputs;

fn start_server(config: RaopConfig) -> (RaopServer, Outputs) {
    let outputs = Outputs::open(&OutputConfig {
        module: "null".to_string(),
        ..OutputConfig::default()
    })
    .unwrap();
    let handle = outputs.open_handle("airtunes").unwrap();
    let server = RaopServer::start(config, handle).unwrap();

    for _ in 0..200 {
        if server.status() == ServerStatus::Running {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(server.status(), ServerStatus::Running);
    (server, outputs)
}

fn rtsp_round_trip(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).unwrap();
    stream.flush().unwrap();

    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&response).into_owned()
}

#[test]
fn serves_options_over_tcp() {
    let (server, outputs) = start_server(RaopConfig {
        port: 5000,
        ..RaopConfig::default()
    });

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    let response = rtsp_round_trip(&mut client, "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");

    assert!(response.starts_with("RTSP/1.0 200 OK"), "got: {response}");
    assert!(response.contains("Public:"));
    assert!(response.contains("CSeq: 1"));

    server.stop();
    outputs.close();
}

#[test]
fn session_appears_in_snapshot_while_connected() {
    let (server, outputs) = start_server(RaopConfig {
        port: 5100,
        ..RaopConfig::default()
    });

    let mut client = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    let _ = rtsp_round_trip(&mut client, "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    assert_eq!(server.streams().len(), 1);

    drop(client);
    for _ in 0..200 {
        if server.streams().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(server.streams().is_empty());

    server.stop();
    outputs.close();
}

#[test]
fn excess_clients_are_refused() {
    let (server, outputs) = start_server(RaopConfig {
        port: 5200,
        max_clients: 1,
        ..RaopConfig::default()
    });

    let mut first = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    let ok = rtsp_round_trip(&mut first, "OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n");
    assert!(ok.starts_with("RTSP/1.0 200"));

    let mut second = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    second
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut response = String::new();
    let _ = second.read_to_string(&mut response);
    assert!(response.contains("503"), "got: {response}");

    server.stop();
    outputs.close();
}

#[test]
fn service_name_and_txt_records_follow_config() {
    let (server, outputs) = start_server(RaopConfig {
        port: 5300,
        name: "Kitchen".to_string(),
        hw_addr: [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22],
        ..RaopConfig::default()
    });

    assert_eq!(server.service_name(), "aabbcc001122@Kitchen");
    let txt = server.txt_records();
    assert!(txt.contains(&("pw", "false".to_string())));
    assert!(txt.contains(&("sr", "44100".to_string())));
    assert!(txt.contains(&("txtvers", "1".to_string())));

    server.stop();
    outputs.close();
}

#[test]
fn stop_transitions_to_stopped() {
    let (server, outputs) = start_server(RaopConfig {
        port: 5400,
        ..RaopConfig::default()
    });
    server.stop();
    outputs.close();
}

#[test]
fn port_collision_retries_upwards() {
    let (first, outputs_a) = start_server(RaopConfig {
        port: 5500,
        ..RaopConfig::default()
    });
    let (second, outputs_b) = start_server(RaopConfig {
        port: first.port(),
        ..RaopConfig::default()
    });

    assert!(second.port() > first.port());

    first.stop();
    second.stop();
    outputs_a.close();
    outputs_b.close();
}
