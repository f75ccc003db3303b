//! Transfer supervision end to end over a loopback socket: BINARY
//! negotiation, drain-time packet preservation, engine hand-off, option
//! restoration and failure recovery.

use lineterm::config::Config;
use lineterm::errors::ClientError;
use lineterm::events::TransferLog;
use lineterm::kermit::packet::{BlockCheck, Packet, PacketType, QCTL, ctl, encode_data, tochar};
use lineterm::kermit::port::{CloseStatus, KermitIo, OpenMode, TelnetPort};
use lineterm::session::{Connection, Mode};
use lineterm::transfer::{PendingBytes, Supervisor, TransferRequest};

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;

fn peer_sinit() -> Packet {
    let payload = vec![
        tochar(94),
        tochar(10),
        tochar(0),
        ctl(0),
        tochar(13),
        QCTL,
        b'Y',
        b'3',
        b' ',
        tochar(0x06),
        tochar(31),
        tochar((4096 / 95) as u8),
        tochar((4096 % 95) as u8),
    ];
    Packet::new(0, PacketType::SendInit, payload)
}

fn encoded(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_data(data, &mut out);
    out
}

/// Read one SOH...CR frame from the socket.
fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => panic!("peer closed while a frame was expected"),
            Ok(_) => {
                // Skip leading telnet negotiation noise before SOH
                if frame.is_empty() && byte[0] != 0x01 {
                    continue;
                }
                frame.push(byte[0]);
                if byte[0] == 0x0D {
                    return frame;
                }
            }
            Err(e) => panic!("server read failed: {}", e),
        }
    }
}

fn frame_type(frame: &[u8]) -> u8 {
    frame[3]
}

fn client_config(download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.transfer.download_dir = download_dir.display().to_string();
    config
}

#[test]
fn kermit_receive_end_to_end_with_early_packet() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        // BINARY request from the client
        let mut negotiation = [0u8; 6];
        s.read_exact(&mut negotiation).unwrap();
        assert_eq!(negotiation, [255, 251, 0, 255, 253, 0]);
        s.write_all(&[255, 253, 0, 255, 251, 0]).unwrap();

        // The S-init goes out immediately: it lands inside the client's
        // negotiation drain and must be preserved, not discarded
        s.write_all(&peer_sinit().encode(BlockCheck::Type1)).unwrap();

        let ack = read_frame(&mut s);
        assert_eq!(frame_type(&ack), b'Y');

        let exchanges = [
            Packet::new(1, PacketType::FileHeader, encoded(b"notes.txt")),
            Packet::new(2, PacketType::Data, encoded(b"line one\r\nline two\r\n")),
            Packet::new(3, PacketType::Eof, Vec::new()),
            Packet::new(4, PacketType::Break, Vec::new()),
        ];
        for packet in &exchanges {
            s.write_all(&packet.encode(BlockCheck::Type3)).unwrap();
            let reply = read_frame(&mut s);
            assert_eq!(frame_type(&reply), b'Y', "packet {:?}", packet.ptype);
        }

        // Restoration verbs may arrive; ignore whatever is left
        std::thread::sleep(Duration::from_millis(100));
        let mut sink = [0u8; 64];
        let _ = s.read(&mut sink);
    });

    let config = client_config(dir.path());
    let mut conn = Connection::connect("127.0.0.1", port, &config).unwrap();
    let supervisor = Supervisor::new(config.transfer.clone(), TransferLog::disabled());

    let summary = supervisor
        .execute(&mut conn, TransferRequest::KermitReceive)
        .expect("transfer should complete");

    assert_eq!(summary.filename, "notes.txt");
    assert_eq!(summary.bytes, 20);
    assert_eq!(conn.mode, Mode::Client);
    // BINARY was forced for the transfer and restored afterwards
    assert!(!conn.registry.modes().binary_local);
    assert!(!conn.registry.modes().binary_remote);
    assert!(conn.pending.is_empty());

    let received = std::fs::read(dir.path().join("notes.txt")).unwrap();
    assert_eq!(received, b"line one\r\nline two\r\n");

    server.join().unwrap();
}

#[test]
fn binary_mode_loss_mid_receive_recovers_to_client_mode() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (mut s, _) = listener.accept().unwrap();
        s.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

        let mut negotiation = [0u8; 6];
        s.read_exact(&mut negotiation).unwrap();
        s.write_all(&[255, 253, 0, 255, 251, 0]).unwrap();

        // Let the drain expire quietly, then run a normal start
        std::thread::sleep(Duration::from_millis(350));
        s.write_all(&peer_sinit().encode(BlockCheck::Type1)).unwrap();
        let _ = read_frame(&mut s);

        let fheader = Packet::new(1, PacketType::FileHeader, encoded(b"partial.bin"));
        s.write_all(&fheader.encode(BlockCheck::Type3)).unwrap();
        let _ = read_frame(&mut s);

        // A data packet cut short by IAC IP: the peer has left BINARY
        let data = Packet::new(2, PacketType::Data, encoded(b"doomed"));
        let frame = data.encode(BlockCheck::Type3);
        s.write_all(&frame[..frame.len() - 4]).unwrap();
        s.write_all(&[255, 244]).unwrap();

        // The client restores options; drain the tail and hold the
        // socket open long enough for its flush to find silence
        std::thread::sleep(Duration::from_millis(400));
        let mut sink = [0u8; 64];
        let _ = s.read(&mut sink);
    });

    let config = client_config(dir.path());
    let mut conn = Connection::connect("127.0.0.1", port, &config).unwrap();
    let supervisor = Supervisor::new(config.transfer.clone(), TransferLog::disabled());

    let err = supervisor
        .execute(&mut conn, TransferRequest::KermitReceive)
        .expect_err("transfer must fail");
    assert!(matches!(err, ClientError::BinaryModeLost));

    // The session is usable again and the partial file is gone
    assert_eq!(conn.mode, Mode::Client);
    assert!(!dir.path().join("partial.bin").exists());

    server.join().unwrap();
}

#[test]
fn port_strips_framing_and_unescapes_iac() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (mut server, _) = listener.accept().unwrap();

    let mut pending = PendingBytes::new();
    let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);

    // A frame whose body contains a doubled IAC
    server
        .write_all(&[0x01, b'%', b'#', b'D', 0xFF, 0xFF, b'q', 0x0D])
        .unwrap();
    match telnet_port.rxd(64, Duration::from_secs(1)).unwrap() {
        lineterm::kermit::port::Rx::Data(body) => {
            assert_eq!(body, vec![b'%', b'#', b'D', 0xFF, b'q']);
        }
        other => panic!("expected data, got {:?}", other),
    }
}

#[test]
fn port_reassembles_fragmented_frames() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (mut server, _) = listener.accept().unwrap();

    let mut pending = PendingBytes::new();
    let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);

    let packet = Packet::new(7, PacketType::Data, encoded(b"split across reads"));
    let frame = packet.encode(BlockCheck::Type3);
    let (first, second) = frame.split_at(frame.len() / 2);

    server.write_all(first).unwrap();
    let writer = {
        let mut server = server.try_clone().unwrap();
        let second = second.to_vec();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            server.write_all(&second).unwrap();
        })
    };

    match telnet_port.rxd(4096, Duration::from_secs(2)).unwrap() {
        lineterm::kermit::port::Rx::Data(body) => {
            let parsed = Packet::parse(&body, BlockCheck::Type3).unwrap();
            assert_eq!(parsed, packet);
        }
        other => panic!("expected data, got {:?}", other),
    }
    writer.join().unwrap();
}

#[test]
fn port_drains_pending_before_socket() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (_server, _) = listener.accept().unwrap();

    let mut pending = PendingBytes::new();
    // The drain saved an S-init, SOH and EOM included
    let early = peer_sinit().encode(BlockCheck::Type1);
    assert!(pending.push(&early));

    let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);
    match telnet_port.rxd(128, Duration::from_millis(100)).unwrap() {
        lineterm::kermit::port::Rx::Data(body) => {
            let parsed = Packet::parse(&body, BlockCheck::Type1).unwrap();
            assert_eq!(parsed.ptype, PacketType::SendInit);
        }
        other => panic!("expected pending data, got {:?}", other),
    }
}

#[test]
fn port_receive_open_cannot_escape_download_dir() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (_server, _) = listener.accept().unwrap();

    let mut pending = PendingBytes::new();
    let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);

    telnet_port
        .openf("../../etc/evil.conf", OpenMode::Receive)
        .unwrap();
    telnet_port.writef(b"contents").unwrap();
    telnet_port.closef(CloseStatus::Eof, true).unwrap();

    // Only the basename is honored, inside the download directory
    assert!(dir.path().join("evil.conf").exists());
    assert!(!dir.path().parent().unwrap().join("etc/evil.conf").exists());
}

#[test]
fn port_deletes_partial_file_only_when_interrupted_without_keep() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let (_server, _) = listener.accept().unwrap();

    // keep_partial = false: interrupted receives are deleted
    {
        let mut pending = PendingBytes::new();
        let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);
        telnet_port.openf("half.bin", OpenMode::Receive).unwrap();
        telnet_port.writef(b"half").unwrap();
        telnet_port.closef(CloseStatus::Interrupted, true).unwrap();
        assert!(!dir.path().join("half.bin").exists());
    }

    // keep_partial = true: the file survives
    {
        let mut pending = PendingBytes::new();
        let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), true);
        telnet_port.openf("kept.bin", OpenMode::Receive).unwrap();
        telnet_port.writef(b"kept").unwrap();
        telnet_port.closef(CloseStatus::Interrupted, true).unwrap();
        assert_eq!(std::fs::read(dir.path().join("kept.bin")).unwrap(), b"kept");
    }

    // Clean EOF close never deletes
    {
        let mut pending = PendingBytes::new();
        let mut telnet_port = TelnetPort::new(&client, &mut pending, dir.path(), false);
        telnet_port.openf("done.bin", OpenMode::Receive).unwrap();
        telnet_port.writef(b"done").unwrap();
        telnet_port.closef(CloseStatus::Eof, true).unwrap();
        assert_eq!(std::fs::read(dir.path().join("done.bin")).unwrap(), b"done");
    }
}
