//! End-to-end exchanges against a served endpoint with recording mocks.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UdpSocket, UnixDatagram};
use tokio_util::sync::CancellationToken;

use cmdmon::config::CommandConfig;
use cmdmon::daemon::reports::ClientAccessReport;
use cmdmon::daemon::{AccessTable, CommandClass};
use cmdmon::protocol::reply::{DecodedReply, ReplyPayload, ReplyTag, Status};
use cmdmon::protocol::request::{
    AcCheck, AllowDeny, NtpSource, Request, RequestPayload, ADDSRC_IBURST, ADDSRC_ONLINE,
    MANUAL_ENABLE,
};
use cmdmon::protocol::wire::{Addr, WireTimestamp};
use cmdmon::protocol::PROTOCOL_VERSION;
use cmdmon::server::CmdMon;

use common::{collaborators, AccessHandle, MockAccessTable, TestDaemon};

struct TestServer {
    daemon: Arc<TestDaemon>,
    cmd_access: Arc<MockAccessTable>,
    ntp_access: Arc<MockAccessTable>,
    server: CmdMon,
    addr: SocketAddr,
    path: PathBuf,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Bind a server on a probed loopback port with the local socket open.
    /// `cmd_default_allow` seeds the command CIDR table's default answer
    /// for remote callers.
    async fn start(name: &str, cmd_default_allow: bool) -> TestServer {
        let daemon = TestDaemon::new();
        let cmd_access = MockAccessTable::new(cmd_default_allow);
        let ntp_access = MockAccessTable::new(true);

        let port = free_udp_port();
        let path = test_path(name, "server");
        let config = CommandConfig {
            port,
            bind_address: None,
            bind_address6: None,
            socket_path: Some(path.clone()),
        };

        let mut server = CmdMon::bind(
            &config,
            collaborators(&daemon, &ntp_access),
            Box::new(AccessHandle(cmd_access.clone())),
        )
        .await
        .expect("bind command endpoint");
        server.open_local_socket().expect("open local socket");

        TestServer {
            daemon,
            cmd_access,
            ntp_access,
            server,
            addr: format!("127.0.0.1:{port}").parse().unwrap(),
            path,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve while the test body runs, then stop.
    async fn drive<Fut: Future<Output = ()>>(&self, body: Fut) {
        tokio::join!(self.server.run(self.shutdown.clone()), async {
            body.await;
            self.shutdown.cancel();
        });
    }

    fn cleanup(self) {
        self.server.shutdown();
    }
}

fn free_udp_port() -> u16 {
    let probe = std::net::UdpSocket::bind(("127.0.0.1", 0)).expect("probe socket");
    probe.local_addr().expect("probe addr").port()
}

fn test_path(name: &str, side: &str) -> PathBuf {
    std::env::temp_dir().join(format!("cmdmon-{}-{name}-{side}.sock", std::process::id()))
}

async fn udp_client(bind_ip: &str) -> UdpSocket {
    UdpSocket::bind((bind_ip, 0)).await.expect("client socket")
}

async fn exchange_udp(client: &UdpSocket, server: SocketAddr, bytes: &[u8]) -> Option<DecodedReply> {
    client.send_to(bytes, server).await.expect("send");
    let mut buf = [0u8; 2048];
    match tokio::time::timeout(Duration::from_millis(400), client.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(DecodedReply::decode(&buf[..len]).expect("decodable reply")),
        _ => None,
    }
}

async fn exchange_unix(
    client: &UnixDatagram,
    server: &PathBuf,
    bytes: &[u8],
) -> Option<DecodedReply> {
    client.send_to(bytes, server).await.expect("send");
    let mut buf = [0u8; 2048];
    match tokio::time::timeout(Duration::from_millis(400), client.recv(&mut buf)).await {
        Ok(Ok(len)) => Some(DecodedReply::decode(&buf[..len]).expect("decodable reply")),
        _ => None,
    }
}

fn unix_client(name: &str) -> UnixDatagram {
    let path = test_path(name, "client");
    let _ = std::fs::remove_file(&path);
    UnixDatagram::bind(&path).expect("bind client socket")
}

fn add_server_request(address: &str) -> Vec<u8> {
    Request::new(RequestPayload::AddServer(NtpSource {
        ip_addr: Addr::V4(address.parse().unwrap()),
        port: 123,
        minpoll: 6,
        maxpoll: 10,
        presend_minpoll: 0,
        authkey: 0,
        max_delay: 0.5,
        max_delay_ratio: 2.0,
        flags: ADDSRC_ONLINE | ADDSRC_IBURST,
    }))
    .encode()
}

#[tokio::test]
async fn add_server_then_n_sources() {
    let ts = TestServer::start("add-server", false).await;
    ts.drive(async {
        let unix = unix_client("add-server");
        let reply = exchange_unix(&unix, &ts.path, &add_server_request("192.0.2.1"))
            .await
            .expect("reply");
        assert_eq!(reply.status, Status::Success);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);

        // an open caller on loopback sees the new source count
        let loopback = udp_client("127.0.0.1").await;
        let reply = exchange_udp(
            &loopback,
            ts.addr,
            &Request::new(RequestPayload::NSources).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::Success);
        assert_eq!(reply.payload, ReplyPayload::NSources { n_sources: 1 });
    })
    .await;

    let added = ts.daemon.added_sources.lock().unwrap().clone();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].1, Addr::V4("192.0.2.1".parse().unwrap()));
    assert_eq!(added[0].2, 123);
    assert!(added[0].3.online && added[0].3.iburst);
    ts.cleanup();
}

#[tokio::test]
async fn remote_caller_cannot_mutate() {
    let ts = TestServer::start("remote-mutate", true).await;
    ts.drive(async {
        // 127.0.0.2 is not the loopback address, so it classifies remote
        let remote = udp_client("127.0.0.2").await;
        let request = Request::new(RequestPayload::DelSource {
            ip_addr: Addr::V4("192.0.2.1".parse().unwrap()),
        });
        let reply = exchange_udp(&remote, ts.addr, &request.encode()).await.expect("reply");
        assert_eq!(reply.status, Status::Unauthorized);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);
    })
    .await;

    // the registry was never touched
    assert!(ts.daemon.mutation_calls().is_empty());
    ts.cleanup();
}

#[tokio::test]
async fn version_mismatch_at_compat_floor_gets_reply() {
    let ts = TestServer::start("bad-version", false).await;
    ts.drive(async {
        let unix = unix_client("bad-version");

        let mut bytes = Request { attempt: 0, sequence: 31, payload: RequestPayload::NSources }
            .encode();
        bytes[0] = PROTOCOL_VERSION - 1;
        let reply = exchange_unix(&unix, &ts.path, &bytes).await.expect("reply");
        assert_eq!(reply.status, Status::BadPktVersion);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);
        assert_eq!(reply.sequence, 31);

        // below the floor the caller cannot parse a reply; stay silent
        let mut bytes = Request::new(RequestPayload::NSources).encode();
        bytes[0] = 1;
        assert!(exchange_unix(&unix, &ts.path, &bytes).await.is_none());
    })
    .await;

    let logged = ts.daemon.logged_commands();
    assert_eq!(logged.len(), 2);
    assert!(logged.iter().all(|(_, class)| *class == CommandClass::BadPacket));
    ts.cleanup();
}

#[tokio::test]
async fn settime_needs_manual_mode() {
    let ts = TestServer::start("settime", false).await;
    ts.drive(async {
        let unix = unix_client("settime");
        let settime = Request::new(RequestPayload::Settime {
            ts: WireTimestamp { sec: 1_700_000_100, usec: 0 },
        })
        .encode();

        let reply = exchange_unix(&unix, &ts.path, &settime).await.expect("reply");
        assert_eq!(reply.status, Status::NotEnabled);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);

        let enable =
            Request::new(RequestPayload::Manual { option: MANUAL_ENABLE }).encode();
        let reply = exchange_unix(&unix, &ts.path, &enable).await.expect("reply");
        assert_eq!(reply.status, Status::Success);

        let reply = exchange_unix(&unix, &ts.path, &settime).await.expect("reply");
        assert_eq!(reply.status, Status::Success);
        assert_eq!(
            reply.payload,
            ReplyPayload::ManualTimestamp {
                centiseconds: 50,
                dfreq_ppm: 1.5,
                new_afreq_ppm: -2.5
            }
        );
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn paged_client_accesses_skip_missing_rows() {
    let ts = TestServer::start("paged", false).await;
    {
        let mut rows = HashMap::new();
        for index in [2u32, 5] {
            rows.insert(
                index,
                ClientAccessReport {
                    ip_addr: Addr::V4(format!("198.51.100.{index}").parse().unwrap()),
                    client_hits: index,
                    cmd_hits_normal: 1,
                    ..Default::default()
                },
            );
        }
        *ts.daemon.client_rows.lock().unwrap() = Some(rows);
        *ts.daemon.client_table_size.lock().unwrap() = 6;
    }

    ts.drive(async {
        let unix = unix_client("paged");
        let request = Request::new(RequestPayload::ClientAccessesByIndex {
            first_index: 0,
            n_indices: 8,
        })
        .encode();
        let reply = exchange_unix(&unix, &ts.path, &request).await.expect("reply");
        assert_eq!(reply.status, Status::Success);
        match reply.payload {
            ReplyPayload::ClientAccessesByIndex { n_indices, next_index, clients } => {
                assert_eq!(n_indices, 6);
                assert_eq!(next_index, 8);
                assert_eq!(clients.len(), 2);
                assert_eq!(clients[0].ip, Addr::V4("198.51.100.2".parse().unwrap()));
                assert_eq!(clients[1].ip, Addr::V4("198.51.100.5".parse().unwrap()));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // a zero-row request is a valid empty page
        let request = Request::new(RequestPayload::ClientAccessesByIndex {
            first_index: 4,
            n_indices: 0,
        })
        .encode();
        let reply = exchange_unix(&unix, &ts.path, &request).await.expect("reply");
        assert_eq!(reply.status, Status::Success);
        match reply.payload {
            ReplyPayload::ClientAccessesByIndex { next_index, clients, .. } => {
                assert_eq!(next_index, 4);
                assert!(clients.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // switched-off accounting answers INACTIVE
        *ts.daemon.client_rows.lock().unwrap() = None;
        let request = Request::new(RequestPayload::ClientAccessesByIndex {
            first_index: 0,
            n_indices: 4,
        })
        .encode();
        let reply = exchange_unix(&unix, &ts.path, &request).await.expect("reply");
        assert_eq!(reply.status, Status::Inactive);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn cidr_denied_callers_are_invisible() {
    let ts = TestServer::start("cidr-denied", false).await;
    ts.drive(async {
        let remote = udp_client("127.0.0.3").await;
        let request = Request::new(RequestPayload::NSources).encode();
        assert!(exchange_udp(&remote, ts.addr, &request).await.is_none());
    })
    .await;

    // dropped before any accounting
    assert!(ts.daemon.logged_commands().is_empty());
    assert!(ts.daemon.mutation_calls().is_empty());
    ts.cleanup();
}

#[tokio::test]
async fn allowed_remote_caller_can_report() {
    let ts = TestServer::start("cidr-allowed", false).await;
    let _ = AccessHandle(ts.cmd_access.clone()).allow(Addr::V4("127.0.0.4".parse().unwrap()), 32);
    ts.drive(async {
        let remote = udp_client("127.0.0.4").await;
        let request = Request::new(RequestPayload::NSources).encode();
        let reply = exchange_udp(&remote, ts.addr, &request).await.expect("reply");
        assert_eq!(reply.status, Status::Success);
        assert_eq!(reply.payload, ReplyPayload::NSources { n_sources: 0 });
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn replies_keep_request_order_per_socket() {
    let ts = TestServer::start("serial", false).await;
    ts.drive(async {
        let client = udp_client("127.0.0.1").await;
        for sequence in 1..=3u32 {
            let request =
                Request { attempt: 0, sequence, payload: RequestPayload::NSources };
            client.send_to(&request.encode(), ts.addr).await.expect("send");
        }
        for sequence in 1..=3u32 {
            let mut buf = [0u8; 2048];
            let (len, _) =
                tokio::time::timeout(Duration::from_millis(500), client.recv_from(&mut buf))
                    .await
                    .expect("reply in time")
                    .expect("recv");
            let reply = DecodedReply::decode(&buf[..len]).expect("decodable reply");
            assert_eq!(reply.sequence, sequence);
        }
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn logon_always_fails() {
    let ts = TestServer::start("logon", false).await;
    ts.drive(async {
        let client = udp_client("127.0.0.1").await;
        let request = Request::new(RequestPayload::Logon {
            ts: WireTimestamp { sec: 0, usec: 0 },
        });
        let reply = exchange_udp(&client, ts.addr, &request.encode()).await.expect("reply");
        assert_eq!(reply.status, Status::Failed);
        assert_eq!(reply.payload.tag(), ReplyTag::Null);
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn unknown_opcode_answers_invalid() {
    let ts = TestServer::start("unknown-opcode", false).await;
    ts.drive(async {
        let client = udp_client("127.0.0.1").await;
        let mut bytes = Request { attempt: 0, sequence: 9, payload: RequestPayload::NSources }
            .encode();
        bytes[4..6].copy_from_slice(&999u16.to_be_bytes());
        let reply = exchange_udp(&client, ts.addr, &bytes).await.expect("reply");
        assert_eq!(reply.status, Status::Invalid);
        assert_eq!(reply.command, 999);
        assert_eq!(reply.sequence, 9);
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn short_payload_answers_bad_length() {
    let ts = TestServer::start("short-payload", false).await;
    ts.drive(async {
        let unix = unix_client("short-payload");
        let bytes = add_server_request("192.0.2.9");
        let reply = exchange_unix(&unix, &ts.path, &bytes[..40]).await.expect("reply");
        assert_eq!(reply.status, Status::BadPktLength);
    })
    .await;

    // bad packets are accounted but no mutation happened
    assert_eq!(ts.daemon.logged_commands().len(), 1);
    assert!(ts.daemon.mutation_calls().is_empty());
    ts.cleanup();
}

#[tokio::test]
async fn garbage_below_reply_header_is_dropped() {
    let ts = TestServer::start("garbage", false).await;
    ts.drive(async {
        let client = udp_client("127.0.0.1").await;
        let bytes = Request::new(RequestPayload::NSources).encode();
        client.send_to(&bytes[..20], ts.addr).await.expect("send");
        // no reply at all
        let mut buf = [0u8; 64];
        let outcome =
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
        assert!(outcome.is_err());
    })
    .await;

    let logged = ts.daemon.logged_commands();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].1, CommandClass::BadPacket);
    ts.cleanup();
}

#[tokio::test]
async fn access_tables_mutate_per_namespace() {
    let ts = TestServer::start("access-tables", false).await;
    let subnet = Addr::V4("203.0.113.0".parse().unwrap());
    ts.drive(async {
        let unix = unix_client("access-tables");

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::CmdAllow(AllowDeny { ip: subnet, subnet_bits: 24 }))
                .encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::Success);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::CmdAcCheck(AcCheck { ip: subnet })).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::AccessAllowed);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::Deny(AllowDeny { ip: subnet, subnet_bits: 24 }))
                .encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::Success);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::AcCheck(AcCheck { ip: subnet })).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::AccessDenied);

        // unusable mask
        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::CmdAllow(AllowDeny { ip: subnet, subnet_bits: 99 }))
                .encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::BadSubnet);
    })
    .await;

    assert!(ts.cmd_access.allowed.lock().unwrap().contains(&subnet));
    assert!(ts.ntp_access.denied.lock().unwrap().contains(&subnet));
    ts.cleanup();
}

#[tokio::test]
async fn semantic_statuses_map_through() {
    let ts = TestServer::start("semantic", false).await;
    *ts.daemon.rtc_present.lock().unwrap() = false;
    ts.drive(async {
        let unix = unix_client("semantic");

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::WriteRtc).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::NoRtc);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::SmoothTime { option: 0 }).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::NotEnabled);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::ManualDelete { index: 3 }).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::BadSample);

        let reply = exchange_unix(
            &unix,
            &ts.path,
            &Request::new(RequestPayload::DelSource {
                ip_addr: Addr::V4("192.0.2.200".parse().unwrap()),
            })
            .encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::NoSuchSource);
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn tracking_report_survives_the_wire() {
    let ts = TestServer::start("tracking", false).await;
    ts.drive(async {
        let client = udp_client("127.0.0.1").await;
        let reply = exchange_udp(
            &client,
            ts.addr,
            &Request::new(RequestPayload::Tracking).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::Success);
        match reply.payload {
            ReplyPayload::Tracking(t) => {
                assert_eq!(t.ref_id, 0x7f7f0101);
                assert_eq!(t.ip_addr, Addr::V4("192.0.2.1".parse().unwrap()));
                assert_eq!(t.stratum, 3);
                // dyadic values cross the float codec exactly
                assert_eq!(t.current_correction, 0.000244140625);
                assert_eq!(t.freq_ppm, -9.5);
                assert_eq!(t.last_update_interval, 64.0);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    })
    .await;
    ts.cleanup();
}

#[tokio::test]
async fn source_data_after_add() {
    let ts = TestServer::start("source-data", false).await;
    ts.drive(async {
        let unix = unix_client("source-data");
        exchange_unix(&unix, &ts.path, &add_server_request("192.0.2.33")).await.expect("reply");

        let client = udp_client("127.0.0.1").await;
        let reply = exchange_udp(
            &client,
            ts.addr,
            &Request::new(RequestPayload::SourceData { index: 0 }).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::Success);
        match reply.payload {
            ReplyPayload::SourceData(sd) => {
                assert_eq!(sd.ip_addr, Addr::V4("192.0.2.33".parse().unwrap()));
                assert_eq!(sd.stratum, 2);
                assert_eq!(sd.reachability, 0xff);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // out-of-range index
        let reply = exchange_udp(
            &client,
            ts.addr,
            &Request::new(RequestPayload::SourceData { index: 7 }).encode(),
        )
        .await
        .expect("reply");
        assert_eq!(reply.status, Status::NoSuchSource);
    })
    .await;
    ts.cleanup();
}
