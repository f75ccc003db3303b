//! Wire-level telnet scenarios over a loopback socket pair.

use lineterm::config::Config;
use lineterm::session::Connection;

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

/// A connected client [`Connection`] plus the server end of the socket.
fn loopback() -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().unwrap().port();
    let config = Config::default();
    let conn = Connection::connect("127.0.0.1", port, &config).expect("connect");
    let (server, _) = listener.accept().expect("accept");
    server
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    (conn, server)
}

fn read_exact(server: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    server.read_exact(&mut buf).expect("expected reply bytes");
    buf
}

fn assert_no_bytes(server: &mut TcpStream) {
    server
        .set_read_timeout(Some(Duration::from_millis(150)))
        .unwrap();
    let mut probe = [0u8; 16];
    match server.read(&mut probe) {
        Ok(0) => {}
        Ok(n) => panic!("unexpected {} bytes on the wire: {:?}", n, &probe[..n]),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
            ) => {}
        Err(e) => panic!("server read failed: {}", e),
    }
}

#[test]
fn duplicate_will_echo_answered_exactly_once() {
    let (mut conn, mut server) = loopback();

    // First WILL ECHO flips the state and draws DO ECHO
    let clean = conn.ingest(&[255, 251, 1]).unwrap();
    assert!(clean.is_empty());
    assert_eq!(read_exact(&mut server, 3), vec![255, 253, 1]);
    assert!(conn.registry.modes().echo_remote);

    // The duplicate is a confirmation: no bytes may appear on the wire
    conn.ingest(&[255, 251, 1]).unwrap();
    assert_no_bytes(&mut server);
}

#[test]
fn cr_disambiguation_in_clean_stream() {
    let (mut conn, mut server) = loopback();

    // CR NUL collapses to a bare CR
    let clean = conn.ingest(&[0x61, 0x0D, 0x00, 0x62]).unwrap();
    assert_eq!(clean, vec![0x61, 0x0D, 0x62]);

    // CR LF passes through
    let clean = conn.ingest(&[0x61, 0x0D, 0x0A, 0x62]).unwrap();
    assert_eq!(clean, vec![0x61, 0x0D, 0x0A, 0x62]);

    // CR IAC: the CR is emitted and the negotiation is handled
    let clean = conn.ingest(&[0x61, 0x0D, 255, 251, 3]).unwrap();
    assert_eq!(clean, vec![0x61, 0x0D]);
    assert_eq!(read_exact(&mut server, 3), vec![255, 253, 3]);
    assert!(conn.registry.modes().sga_remote);
}

#[test]
fn ttype_send_with_escaped_iac_in_payload() {
    let (mut conn, mut server) = loopback();

    // TTYPE SEND with an embedded escaped IAC: the handler sees payload
    // 18 01 FF and must still answer with the first cycle entry
    let clean = conn.ingest(&[255, 250, 24, 1, 255, 255, 255, 240]).unwrap();
    assert!(clean.is_empty());

    let reply = read_exact(&mut server, 4 + 5 + 2);
    assert_eq!(&reply[..4], &[255, 250, 24, 0]);
    assert_eq!(&reply[4..9], b"XTERM");
    assert_eq!(&reply[9..], &[255, 240]);
}

#[test]
fn ttype_cycle_advances_per_request() {
    let (mut conn, mut server) = loopback();

    for expected in [b"XTERM".as_slice(), b"VT100", b"ANSI", b"XTERM"] {
        conn.ingest(&[255, 250, 24, 1, 255, 240]).unwrap();
        let reply = read_exact(&mut server, 4 + expected.len() + 2);
        assert_eq!(&reply[4..4 + expected.len()], expected);
    }
}

#[test]
fn do_naws_triggers_size_report() {
    let (mut conn, mut server) = loopback();

    conn.ingest(&[255, 253, 31]).unwrap();
    // WILL NAWS, then the unsolicited size subnegotiation
    assert_eq!(read_exact(&mut server, 3), vec![255, 251, 31]);
    let report = read_exact(&mut server, 9);
    assert_eq!(report, vec![255, 250, 31, 0, 80, 0, 24, 255, 240]);
}

#[test]
fn unsupported_options_are_refused() {
    let (mut conn, mut server) = loopback();

    // WILL STATUS is refused with DONT
    conn.ingest(&[255, 251, 5]).unwrap();
    assert_eq!(read_exact(&mut server, 3), vec![255, 254, 5]);

    // DO ECHO (we never echo for the peer) is refused with WONT
    conn.ingest(&[255, 253, 1]).unwrap();
    assert_eq!(read_exact(&mut server, 3), vec![255, 252, 1]);
}

#[test]
fn ayt_draws_a_reply() {
    let (mut conn, mut server) = loopback();

    conn.ingest(&[255, 246]).unwrap();
    let mut buf = vec![0u8; 64];
    let n = server.read(&mut buf).expect("AYT reply expected");
    assert!(String::from_utf8_lossy(&buf[..n]).contains("here"));
}

#[test]
fn outbound_data_doubles_iac() {
    let (conn, mut server) = loopback();

    conn.send_data(&[0x41, 0xFF, 0x42]).unwrap();
    assert_eq!(read_exact(&mut server, 4), vec![0x41, 0xFF, 0xFF, 0x42]);
}

#[test]
fn linemode_mode_ack_echoed() {
    let (mut conn, mut server) = loopback();

    // LINEMODE MODE with EDIT and ACK bits: the mode is echoed back
    conn.ingest(&[255, 250, 34, 1, 0x05, 255, 240]).unwrap();
    let reply = read_exact(&mut server, 7);
    assert_eq!(reply, vec![255, 250, 34, 1, 0x05, 255, 240]);
    assert!(conn.registry.modes().linemode_edit);
}
