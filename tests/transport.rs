use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use webwire::transport::Transport;

fn local_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn connect_to(port: u16) -> Transport {
    let t = Transport::new("127.0.0.1", port, false, false);
    assert!(t.connect().unwrap());
    assert!(t.connected());
    t
}

#[test]
fn sends_preserve_order() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut all = Vec::new();
        stream.read_to_end(&mut all).unwrap();
        all
    });

    let t = connect_to(port);
    for part in [&b"first "[..], b"second ", b"third"] {
        let mut sent = 0;
        while sent < part.len() {
            sent += t.send(&part[sent..]).unwrap();
        }
    }
    t.close();

    assert_eq!(server.join().unwrap(), b"first second third");
}

#[test]
fn receive_returns_what_arrived() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"hello").unwrap();
        // hold the socket open until the client has read
        thread::sleep(Duration::from_millis(200));
    });

    let t = connect_to(port);
    t.set_timeout(1000);

    let mut got = Vec::new();
    while got.len() < 5 {
        got.extend(t.receive(5 - got.len()).unwrap());
    }
    assert_eq!(got, b"hello");

    server.join().unwrap();
}

#[test]
fn timeout_receive_is_empty_not_an_error() {
    let (listener, port) = local_listener();
    let t = connect_to(port);
    t.set_timeout(50);

    assert!(t.receive(16).unwrap().is_empty());
    assert!(t.connected());

    drop(listener);
}

#[test]
fn peer_close_clears_connected() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let t = connect_to(port);
    server.join().unwrap();

    t.set_timeout(1000);
    // end-of-stream returns what arrived (nothing) and flips the flag
    assert!(t.receive(16).unwrap().is_empty());
    assert!(!t.connected());
}

#[test]
fn zero_byte_probe_discovers_disconnect() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let t = connect_to(port);
    server.join().unwrap();

    t.set_timeout(500);
    assert!(t.receive(0).unwrap().is_empty());
    assert!(!t.connected());
}

#[test]
fn probe_does_not_lose_bytes() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(b"hello").unwrap();
        thread::sleep(Duration::from_millis(200));
    });

    let t = connect_to(port);
    t.set_timeout(1000);

    // the probe may pull a byte off the wire; it must come back first
    assert!(t.receive(0).unwrap().is_empty());
    assert!(t.connected());

    let mut got = Vec::new();
    while got.len() < 5 {
        got.extend(t.receive(5 - got.len()).unwrap());
    }
    assert_eq!(got, b"hello");

    server.join().unwrap();
}

#[test]
fn close_then_send_errors() {
    let (listener, port) = local_listener();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink);
    });

    let t = connect_to(port);
    t.close();
    assert!(!t.connected());
    assert!(t.send(b"after close").is_err());

    server.join().unwrap();
}

#[test]
fn connect_refused_is_an_error() {
    // bind-then-drop yields a port with nothing listening
    let (listener, port) = local_listener();
    drop(listener);

    let t = Transport::new("127.0.0.1", port, false, false);
    assert!(t.connect().is_err());
    assert!(!t.connected());
}

#[test]
fn connect_twice_is_a_noop() {
    let (listener, port) = local_listener();
    let t = connect_to(port);

    assert!(!t.connect().unwrap());
    assert!(t.connected());

    t.close();
    drop(listener);
}
