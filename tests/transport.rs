//! # Transport Tests
//!
//! Client and server endpoints talking over loopback TCP. Each test runs the
//! server side on its own thread and joins it at the end, so assertion
//! failures on either side fail the test.
//!
//! ## Covered
//!
//! - Byte streaming within and across frames and calls
//! - Failure reports in both directions
//! - Lost synchronization detected by either side (V2)
//! - Bulk file transfer in both directions
//! - Every V1/V2 client/server pairing

use std::fs::{self, File};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use seriesfs::encoding::{BinaryRead, BinaryWrite};
use seriesfs::transport::{
    ProtocolVersion, RemoteFailure, Side, TransportClient, TransportError, TransportServer,
};
use tempfile::tempdir;

fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        })
        .collect()
}

fn serve<F>(max_version: ProtocolVersion, body: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TransportServer) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let server = TransportServer::accept(stream, max_version).unwrap();
        body(server);
    });
    (addr, handle)
}

fn connect(addr: SocketAddr, version: ProtocolVersion) -> TransportClient {
    TransportClient::connect_with(addr, version, Duration::from_secs(5)).unwrap()
}

mod streaming {
    use super::*;

    #[test]
    fn single_byte_round_trip() {
        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            assert_eq!(server.next_method().unwrap().as_deref(), Some("increment"));
            let b = server.read_u8().unwrap();
            server.write_u8(b + 1).unwrap();
            server.done_with_method().unwrap();
            assert_eq!(server.next_method().unwrap(), None);
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("increment").unwrap();
        client.write_u8(7).unwrap();
        assert_eq!(client.read_u8().unwrap(), 8);
        client.done_with_method().unwrap();
        client.close().unwrap();

        server.join().unwrap();
    }

    #[test]
    fn many_frames_echo() {
        let data = pattern(3 * 1024 * 1024 + 17, 1);
        let len = data.len();
        let (addr, server) = serve(ProtocolVersion::V2, move |mut server| {
            server.next_method().unwrap();
            let mut buf = vec![0u8; len];
            server.read_exact(&mut buf).unwrap();
            server.write_all(&buf).unwrap();
            server.done_with_method().unwrap();
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("echo").unwrap();
        client.write_all(&data).unwrap();
        let mut back = vec![0u8; len];
        client.read_exact(&mut back).unwrap();
        client.done_with_method().unwrap();
        assert_eq!(back, data);

        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn consecutive_calls_keep_their_bytes_apart() {
        let sizes = [1usize, 65_531, 65_532, 1_048_575, 1_048_576, 2_500_000, 3];
        let (addr, server) = serve(ProtocolVersion::V2, move |mut server| {
            for &size in &sizes {
                assert_eq!(server.next_method().unwrap().as_deref(), Some("sum"));
                let mut buf = vec![0u8; size];
                server.read_exact(&mut buf).unwrap();
                let sum: u64 = buf.iter().map(|&b| b as u64).sum();
                server.write_u64(sum).unwrap();
                server.done_with_method().unwrap();
            }
            assert_eq!(server.next_method().unwrap(), None);
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        for (i, &size) in sizes.iter().enumerate() {
            let data = pattern(size, i as u32);
            client.start_method("sum").unwrap();
            client.write_all(&data).unwrap();
            let expected: u64 = data.iter().map(|&b| b as u64).sum();
            assert_eq!(client.read_u64().unwrap(), expected, "call {}", i);
            client.done_with_method().unwrap();
        }
        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn random_sized_reads_and_writes() {
        let mut seed = 99u32;
        let mut next = move || {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (seed >> 8) as usize
        };
        let sizes: Vec<usize> = (0..25).map(|_| next() % 300_000).collect();

        let (addr, server) = serve(ProtocolVersion::V2, move |mut server| {
            while let Some(method) = server.next_method().unwrap() {
                assert_eq!(method, "reverse");
                let len = server.read_u32().unwrap() as usize;
                let mut buf = vec![0u8; len];
                server.read_exact(&mut buf).unwrap();
                buf.reverse();
                server.write_all(&buf).unwrap();
                server.done_with_method().unwrap();
            }
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        for (i, &size) in sizes.iter().enumerate() {
            let data = pattern(size, i as u32 + 1000);
            client.start_method("reverse").unwrap();
            client.write_u32(size as u32).unwrap();
            client.write_all(&data).unwrap();

            let mut back = vec![0u8; size];
            client.read_exact(&mut back).unwrap();
            back.reverse();
            assert_eq!(back, data);
            client.done_with_method().unwrap();
        }
        client.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn io_traits_wrap_transport_errors() {
        use std::io::Read;

        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            server.next_method().unwrap();
            server.done_with_method().unwrap();
            assert_eq!(server.next_method().unwrap(), None);
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        let mut buf = [0u8; 4];
        let err = Read::read(&mut client, &mut buf).unwrap_err();
        assert_eq!(
            TransportError::from_io(&err),
            Some(&TransportError::NoActiveCall)
        );

        client.start_method("noop").unwrap();
        client.done_with_method().unwrap();
        assert!(client.write_u8(1).is_err());
        client.close().unwrap();
        server.join().unwrap();
    }
}

mod failures {
    use super::*;

    #[test]
    fn client_failure_reaches_server() {
        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            server.next_method().unwrap();
            let mut buf = [0u8; 5];
            server.read_exact(&mut buf).unwrap();
            assert_eq!(buf, [1; 5]);

            let err = server.read_u8().unwrap_err();
            match TransportError::of(&err) {
                Some(TransportError::ClientSide(failure)) => {
                    assert_eq!(failure.message, "Blah");
                    assert!(failure.kind.ends_with("Error"));
                }
                other => panic!("expected a client side failure, got {:?}", other),
            }
            server.done_with_method().unwrap();
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("upload").unwrap();
        client.write_all(&[1; 5]).unwrap();
        client.flush().unwrap();
        client
            .send_error(&io::Error::new(io::ErrorKind::Other, "Blah"))
            .unwrap();
        client.close().unwrap();

        server.join().unwrap();
    }

    #[test]
    fn server_failure_reaches_client() {
        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            server.next_method().unwrap();
            server.write_u8(0).unwrap();
            server
                .send_failure(&RemoteFailure::new("SpecialFailure", "Yea!"))
                .unwrap();
            server.done_with_method().unwrap();
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("download").unwrap();
        let mut buf = [0u8; 2];
        let err = client.read_exact(&mut buf).unwrap_err();
        assert_eq!(
            TransportError::of(&err),
            Some(&TransportError::ServerSide(RemoteFailure::new(
                "SpecialFailure",
                "Yea!"
            )))
        );
        client.close().unwrap();

        server.join().unwrap();
    }

    #[test]
    fn refused_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let err = TransportServer::accept(stream, ProtocolVersion::V2).unwrap_err();
            assert_eq!(TransportError::of(&err), Some(&TransportError::Rejected));
        });

        use std::io::{Read, Write};
        let mut raw = TcpStream::connect(addr).unwrap();
        raw.write_all(&[1, 0, 0, 0, 0]).unwrap();
        let mut reply = [0u8; 1];
        raw.read_exact(&mut reply).unwrap();
        assert_eq!(reply[0], 42);

        server.join().unwrap();
    }
}

mod synchronization {
    use super::*;

    #[test]
    fn server_writing_after_done_is_detected_by_client() {
        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            server.next_method().unwrap();
            server.write_u8(0).unwrap();
            server.done_with_method().unwrap();
            server.write_u8(0).unwrap();
            server.flush().unwrap();
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("ping").unwrap();
        assert_eq!(client.read_u8().unwrap(), 0);

        let err = client.read_u8().unwrap_err();
        assert_eq!(
            TransportError::of(&err),
            Some(&TransportError::OutOfSync {
                side: Side::Client,
                local: 0,
                remote: 1
            })
        );
        server.join().unwrap();
        client.close().unwrap();
    }

    #[test]
    fn client_starting_early_is_detected_by_server() {
        let (addr, server) = serve(ProtocolVersion::V2, |mut server| {
            assert_eq!(server.next_method().unwrap().as_deref(), Some("first"));
            assert_eq!(server.read_u8().unwrap(), 1);

            let err = server.read_u8().unwrap_err();
            assert_eq!(
                TransportError::of(&err),
                Some(&TransportError::OutOfSync {
                    side: Side::Server,
                    local: 0,
                    remote: 1
                })
            );
            server.done_with_method().unwrap();

            // The early call is not lost.
            assert_eq!(server.next_method().unwrap().as_deref(), Some("second"));
            assert_eq!(server.read_u8().unwrap(), 2);
            server.done_with_method().unwrap();
            assert_eq!(server.next_method().unwrap(), None);
        });

        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("first").unwrap();
        client.write_u8(1).unwrap();
        client.flush().unwrap();
        client.start_method("second").unwrap();
        client.write_u8(2).unwrap();
        client.done_with_method().unwrap();
        client.close().unwrap();

        server.join().unwrap();
    }
}

mod file_transfer {
    use super::*;

    #[test]
    fn client_sends_file_to_server() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("source");
        let dest_path = dir.path().join("dest");
        let data = pattern(3 * 1024 * 1024 + 123, 5);
        fs::write(&source_path, &data).unwrap();

        let server_dest = dest_path.clone();
        let (addr, server) = serve(ProtocolVersion::V2, move |mut server| {
            server.next_method().unwrap();
            let size = server.read_u64().unwrap();
            let dest = File::create(&server_dest).unwrap();
            server.receive_file(&dest, 0, size).unwrap();
            server.write_u8(1).unwrap();
            server.done_with_method().unwrap();
        });

        let source = File::open(&source_path).unwrap();
        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("store").unwrap();
        client.write_u64(data.len() as u64).unwrap();
        client.send_file(&source, 0, data.len() as u64).unwrap();
        assert_eq!(client.read_u8().unwrap(), 1);
        client.done_with_method().unwrap();
        client.close().unwrap();
        server.join().unwrap();

        assert_eq!(fs::read(&dest_path).unwrap(), data);
    }

    #[test]
    fn partial_receive_leaves_rest_for_reads() {
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("source");
        let data = pattern(200_000, 8);
        fs::write(&source_path, &data).unwrap();

        let (addr, server) = serve(ProtocolVersion::V2, move |mut server| {
            server.next_method().unwrap();
            let source = File::open(&source_path).unwrap();
            server.send_file(&source, 0, 200_000).unwrap();
            server.done_with_method().unwrap();
        });

        let dest_path = dir.path().join("dest");
        let dest = File::create(&dest_path).unwrap();
        let mut client = connect(addr, ProtocolVersion::V2);
        client.start_method("fetch").unwrap();
        client.flush().unwrap();
        client.receive_file(&dest, 0, 120_000).unwrap();
        let mut rest = vec![0u8; 80_000];
        client.read_exact(&mut rest).unwrap();
        client.done_with_method().unwrap();
        client.close().unwrap();
        server.join().unwrap();

        assert_eq!(fs::read(&dest_path).unwrap(), &data[..120_000]);
        assert_eq!(rest, &data[120_000..]);
    }
}

mod compatibility {
    use super::*;

    const EXPECTED_BYTE: u8 = 0xA2;
    const ARRAY_LEN: usize = 5 * 1024 * 1024;

    fn run(client_version: ProtocolVersion, server_version: ProtocolVersion) {
        let negotiated = client_version.min(server_version);
        let file_len = ProtocolVersion::V1.max_message_size() * 2;
        let dir = tempdir().unwrap();
        let source_path = dir.path().join("source");
        let dest_path = dir.path().join("dest");
        let file_data = pattern(file_len, 77);
        fs::write(&source_path, &file_data).unwrap();

        let server_dest = dest_path.clone();
        let (addr, server) = serve(server_version, move |mut server| {
            assert_eq!(server.version(), negotiated);
            assert_eq!(server.next_method().unwrap().as_deref(), Some("compat"));

            let b = server.read_u8().unwrap();
            server.write_u8(b).unwrap();

            let mut array = vec![0u8; ARRAY_LEN];
            server.read_exact(&mut array).unwrap();
            server.write_all(&array).unwrap();

            match server.read_u8() {
                Err(e) if matches!(TransportError::of(&e), Some(TransportError::ClientSide(_))) => {
                    server.write_u8(34).unwrap()
                }
                _ => server.write_u8(0).unwrap(),
            }

            let dest = File::create(&server_dest).unwrap();
            server.receive_file(&dest, 0, file_len as u64).unwrap();

            assert_eq!(server.read_u8().unwrap(), EXPECTED_BYTE);
            server
                .send_failure(&RemoteFailure::new("Refusal", "Y"))
                .unwrap();
            server.done_with_method().unwrap();
        });

        let mut client = connect(addr, client_version);
        assert_eq!(client.version(), negotiated);
        client.start_method("compat").unwrap();

        client.write_u8(EXPECTED_BYTE).unwrap();
        assert_eq!(client.read_u8().unwrap(), EXPECTED_BYTE);

        let array = pattern(ARRAY_LEN, 434_543);
        client.write_all(&array).unwrap();
        let mut back = vec![0u8; ARRAY_LEN];
        client.read_exact(&mut back).unwrap();
        assert!(back == array, "arrays must be equal");

        client
            .send_failure(&RemoteFailure::new("Exception", "X"))
            .unwrap();
        assert_eq!(client.read_u8().unwrap(), 34);

        let source = File::open(&source_path).unwrap();
        client.send_file(&source, 0, file_len as u64).unwrap();

        client.write_u8(EXPECTED_BYTE).unwrap();
        let err = client.read_u8().unwrap_err();
        assert_eq!(
            TransportError::of(&err),
            Some(&TransportError::ServerSide(RemoteFailure::new("Refusal", "Y")))
        );
        client.done_with_method().unwrap();
        client.close().unwrap();
        server.join().unwrap();

        assert!(fs::read(&dest_path).unwrap() == file_data, "file contents must be equal");
    }

    #[test]
    fn v1_client_with_v1_server() {
        run(ProtocolVersion::V1, ProtocolVersion::V1);
    }

    #[test]
    fn v1_client_with_v2_server() {
        run(ProtocolVersion::V1, ProtocolVersion::V2);
    }

    #[test]
    fn v2_client_with_v1_server() {
        run(ProtocolVersion::V2, ProtocolVersion::V1);
    }

    #[test]
    fn v2_client_with_v2_server() {
        run(ProtocolVersion::V2, ProtocolVersion::V2);
    }
}
