use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use parking_lot::Mutex;
use peer_binary_protocol::{
    HANDSHAKE_LEN, Handshake, Message, Piece, Request,
    extended::{
        ExtendedMessage,
        handshake::ExtendedHandshake,
        registry::{ExtensionMessageRegistry, UT_METADATA, UT_PEX},
        ut_metadata::UtMetadata,
        ut_pex::{PexPeerInfo, UtPex},
    },
};
use peerwire_core::Id20;

use super::test_util::{MockTransport, TestTorrent, setup_test_logging, test_peer};
use crate::{
    Error, PeerSession, PeerSessionOptions, SessionEvent,
    download_context::DownloadContext,
    storage::{PieceStorage, SharedPieceStorage, in_memory::InMemoryPieceStorage},
};

const LOCAL_ID: Id20 = Id20::new([1; 20]);
const REMOTE_ID: Id20 = Id20::new([2; 20]);

fn new_session(
    t: &TestTorrent,
    storage: InMemoryPieceStorage,
    options: PeerSessionOptions,
) -> (PeerSession<MockTransport>, Arc<Mutex<InMemoryPieceStorage>>) {
    new_session_with_ctx(t.ctx.clone(), t.ctx.num_pieces(), storage, options)
}

fn new_session_with_ctx(
    ctx: Arc<DownloadContext>,
    num_pieces: u32,
    storage: InMemoryPieceStorage,
    options: PeerSessionOptions,
) -> (PeerSession<MockTransport>, Arc<Mutex<InMemoryPieceStorage>>) {
    setup_test_logging();
    let storage = Arc::new(Mutex::new(storage));
    let shared: SharedPieceStorage = storage.clone();
    let session = PeerSession::new(
        1,
        LOCAL_ID,
        test_peer(num_pieces),
        MockTransport::default(),
        ctx,
        shared,
        options,
    );
    (session, storage)
}

fn push(session: &mut PeerSession<MockTransport>, msgs: &[Message]) {
    let mut buf = Vec::new();
    for m in msgs {
        m.serialize(&mut buf);
    }
    session.connection_mut().get_mut().push_read(&buf);
}

fn push_handshake(session: &mut PeerSession<MockTransport>, h: Handshake) {
    let mut buf = Vec::new();
    h.serialize(&mut buf);
    session.connection_mut().get_mut().push_read(&buf);
}

#[track_caller]
fn written(session: &mut PeerSession<MockTransport>) -> Vec<Message> {
    let buf = session.connection_mut().get_mut().take_written();
    let mut pos = 0;
    let mut msgs = Vec::new();
    while pos < buf.len() {
        let (msg, len) = Message::deserialize(&buf[pos..]).unwrap();
        msgs.push(msg);
        pos += len;
    }
    msgs
}

fn extended_handshake(registry: &ExtensionMessageRegistry) -> Message {
    let mut h = ExtendedHandshake::new(registry);
    h.v = Some("remote/1.0".to_owned());
    h.p = Some(51413);
    Message::Extended(ExtendedMessage::new(0, h.to_vec()))
}

fn remote_handshake(t: &TestTorrent) -> Handshake {
    Handshake::new(t.ctx.info_hash, REMOTE_ID)
}

/// Options that keep the inactivity checks out of the way.
fn patient_options() -> PeerSessionOptions {
    PeerSessionOptions {
        inactive_timeout: Some(Duration::from_secs(3600)),
        not_interested_timeout: Some(Duration::from_secs(3600)),
        ..Default::default()
    }
}

#[test]
fn test_handshake_and_post_handshake_with_fast_extension() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    push_handshake(&mut s, remote_handshake(&t));

    let h = s.receive_and_send_handshake().unwrap().unwrap();
    assert_eq!(h.peer_id, REMOTE_ID);
    assert_eq!(s.peer().peer_id, Some(REMOTE_ID));
    assert!(s.peer().fast_extension_enabled);
    assert!(s.peer().extended_messaging_enabled);
    assert!(!s.peer().dht_enabled);

    let raw = s.connection_mut().get_mut().take_written();
    assert_eq!(raw.len(), HANDSHAKE_LEN);
    let (ours, _) = Handshake::deserialize(&raw).unwrap();
    assert_eq!(ours.peer_id, LOCAL_ID);
    assert_eq!(ours.info_hash, t.ctx.info_hash);

    s.do_post_handshake_processing().unwrap();
    let msgs = written(&mut s);
    assert!(matches!(&msgs[0], Message::Extended(m) if m.is_handshake()));
    assert_eq!(msgs[1], Message::HaveNone);
    let allowed: Vec<u32> = msgs[2..]
        .iter()
        .map(|m| match m {
            Message::AllowedFast(i) => *i,
            m => panic!("unexpected {m:?}"),
        })
        .collect();
    assert_eq!(allowed.len(), 4);
    assert!(s.peer().is_in_am_allowed_index_set(allowed[0]));
}

#[test]
fn test_post_handshake_without_extensions() {
    let t = TestTorrent::new(4, 1);
    let (mut s, storage) = new_session(&t, t.empty_storage(), Default::default());
    s.do_post_handshake_processing().unwrap();
    assert!(written(&mut s).is_empty());

    storage.lock().write_block(2, 0, t.block(2, 0)).unwrap();
    storage.lock().complete_piece(2);
    s.do_post_handshake_processing().unwrap();
    assert_eq!(
        written(&mut s),
        vec![Message::Bitfield(Bytes::from_static(&[0b0010_0000]))]
    );
}

#[test]
fn test_post_handshake_seeder_sends_have_all_and_port() {
    let t = TestTorrent::new(4, 1);
    let opts = PeerSessionOptions {
        dht_enabled: Some(true),
        dht_listen_port: Some(6882),
        allowed_fast_set_size: Some(0),
        ..Default::default()
    };
    let (mut s, _) = new_session(&t, t.full_storage(), opts);
    push_handshake(&mut s, remote_handshake(&t).with_extended(false).with_dht(true));
    s.receive_handshake().unwrap().unwrap();
    assert!(s.peer().dht_enabled);

    s.do_post_handshake_processing().unwrap();
    assert_eq!(written(&mut s), vec![Message::HaveAll, Message::Port(6882)]);
}

#[test]
fn test_handshake_rejects_ourselves_and_wrong_torrent() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    push_handshake(&mut s, Handshake::new(t.ctx.info_hash, LOCAL_ID));
    assert!(matches!(
        s.receive_handshake(),
        Err(Error::ConnectingToOurselves)
    ));

    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    push_handshake(&mut s, Handshake::new(Id20::new([9; 20]), REMOTE_ID));
    assert!(matches!(s.receive_handshake(), Err(Error::WrongInfoHash)));
}

#[test]
fn test_handshake_waits_for_more_data() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    let mut buf = Vec::new();
    remote_handshake(&t).serialize(&mut buf);
    s.connection_mut().get_mut().push_read(&buf[..20]);
    assert!(s.receive_and_send_handshake().unwrap().is_none());
    assert!(s.connection().get_ref().written.is_empty());

    s.connection_mut().get_mut().push_read(&buf[20..]);
    assert!(s.receive_and_send_handshake().unwrap().is_some());
    assert_eq!(s.connection().get_ref().written.len(), HANDSHAKE_LEN);
}

#[test]
fn test_download_whole_torrent() {
    let t = TestTorrent::new(2, 2);
    let (mut s, storage) = new_session(
        &t,
        t.empty_storage().with_end_game_piece_num(0),
        Default::default(),
    );
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();

    push(
        &mut s,
        &[
            Message::Bitfield(Bytes::from_static(&[0b1100_0000])),
            Message::Unchoke,
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(s.count_received_message_in_iteration(), 2);
    assert!(s.peer().am_interested);
    let bl = t.block_len;
    assert_eq!(
        written(&mut s),
        vec![
            Message::Interested,
            Message::Request(Request::new(0, 0, bl)),
            Message::Request(Request::new(0, bl, bl)),
            Message::Request(Request::new(1, 0, bl)),
            Message::Request(Request::new(1, bl, bl)),
        ]
    );
    assert_eq!(s.count_outstanding_request(), 4);
    assert_eq!(s.request_factory().get_target_piece_indexes(), &[0, 1]);

    let pieces: Vec<Message> = [(0, 0), (0, 1), (1, 0), (1, 1)]
        .into_iter()
        .map(|(index, block)| {
            Message::Piece(Piece::from_data(
                index,
                block * bl,
                Bytes::copy_from_slice(t.block(index, block)),
            ))
        })
        .collect();
    push(&mut s, &pieces);
    s.do_interaction_processing_at(t0 + Duration::from_millis(100))
        .unwrap();

    assert_eq!(
        s.take_events(),
        vec![
            SessionEvent::PieceCompleted(0),
            SessionEvent::PieceCompleted(1)
        ]
    );
    assert!(storage.lock().all_download_finished());
    assert_eq!(storage.lock().data(), &t.data[..]);
    assert_eq!(s.count_outstanding_request(), 0);
    assert_eq!(s.request_factory().count_target_piece(), 0);
    assert_eq!(written(&mut s), vec![Message::NotInterested]);
    assert!(!s.peer().am_interested);
}

#[test]
fn test_request_is_answered_when_unchoked() {
    let t = TestTorrent::new(2, 2);
    let (mut s, _) = new_session(&t, t.full_storage(), patient_options());
    s.peer_mut().choking_required = false;
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    assert_eq!(
        written(&mut s),
        vec![Message::Bitfield(Bytes::from_static(&[0b1100_0000]))]
    );

    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(written(&mut s), vec![Message::Unchoke]);
    assert!(!s.peer().am_choking);

    push(
        &mut s,
        &[Message::Request(Request::new(1, t.block_len, t.block_len))],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(
        written(&mut s),
        vec![Message::Piece(Piece::from_data(
            1,
            t.block_len,
            Bytes::copy_from_slice(t.block(1, 1)),
        ))]
    );
    assert_eq!(s.peer().stats.uploaded_bytes, t.block_len as u64);
}

#[test]
fn test_request_while_choking() {
    let t = TestTorrent::new(4, 1);

    // Without the fast extension the request is dropped silently.
    let (mut s, _) = new_session(&t, t.full_storage(), patient_options());
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    written(&mut s);
    push(&mut s, &[Message::Request(Request::new(0, 0, t.block_len))]);
    s.do_interaction_processing_at(t0).unwrap();
    assert!(written(&mut s).is_empty());

    // With it, the peer gets a reject, unless the piece is allowed fast.
    let opts = PeerSessionOptions {
        allowed_fast_set_size: Some(2),
        ..patient_options()
    };
    let (mut s, _) = new_session(&t, t.full_storage(), opts);
    push_handshake(&mut s, remote_handshake(&t).with_extended(false));
    s.receive_and_send_handshake().unwrap().unwrap();
    s.connection_mut().get_mut().take_written();
    s.do_post_handshake_processing_at(t0).unwrap();
    written(&mut s);

    let allowed = (0..4)
        .find(|&i| s.peer().is_in_am_allowed_index_set(i))
        .unwrap();
    let not_allowed = (0..4)
        .find(|&i| !s.peer().is_in_am_allowed_index_set(i))
        .unwrap();

    push(
        &mut s,
        &[
            Message::Request(Request::new(allowed, 0, t.block_len)),
            Message::Request(Request::new(not_allowed, 0, t.block_len)),
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(
        written(&mut s),
        vec![
            Message::Piece(Piece::from_data(
                allowed,
                0,
                Bytes::copy_from_slice(t.block(allowed, 0)),
            )),
            Message::RejectRequest(Request::new(not_allowed, 0, t.block_len)),
        ]
    );
}

#[test]
fn test_choked_releases_requests_but_keeps_targets() {
    let t = TestTorrent::new(2, 2);
    let (mut s, storage) = new_session(
        &t,
        t.empty_storage().with_end_game_piece_num(0),
        patient_options(),
    );
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    push(
        &mut s,
        &[
            Message::Bitfield(Bytes::from_static(&[0b1100_0000])),
            Message::Unchoke,
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();
    written(&mut s);
    assert_eq!(s.count_outstanding_request(), 4);

    push(&mut s, &[Message::Choke]);
    s.do_interaction_processing_at(t0).unwrap();
    assert!(s.peer().peer_choking);
    assert_eq!(s.count_outstanding_request(), 0);
    // Targets survive the choke, only their requested blocks are given back.
    assert_eq!(s.request_factory().get_target_piece_indexes(), &[0, 1]);
    {
        let storage = storage.lock();
        for index in 0..2 {
            assert!(storage.is_piece_used(index));
            let piece = storage.get_piece(index).unwrap();
            assert!(!piece.is_block_used(0));
            assert!(!piece.is_block_used(1));
        }
    }
    // Choked without the fast extension: nothing new to ask for.
    assert!(written(&mut s).is_empty());
}

#[test]
fn test_cancel_all_piece_returns_pieces() {
    let t = TestTorrent::new(2, 1);
    let (mut s, storage) = new_session(
        &t,
        t.empty_storage().with_end_game_piece_num(0),
        patient_options(),
    );
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    push(
        &mut s,
        &[
            Message::Bitfield(Bytes::from_static(&[0b1100_0000])),
            Message::Unchoke,
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert!(storage.lock().is_piece_used(0));

    s.cancel_all_piece();
    assert_eq!(s.request_factory().count_target_piece(), 0);
    assert_eq!(s.count_outstanding_request(), 0);
    assert!(!storage.lock().is_piece_used(0));
    assert!(!storage.lock().is_piece_used(1));
}

#[test]
fn test_request_timeout_snubs_peer() {
    let t = TestTorrent::new(1, 1);
    let opts = PeerSessionOptions {
        request_timeout: Some(Duration::from_secs(10)),
        ..patient_options()
    };
    let (mut s, _) = new_session(&t, t.empty_storage().with_end_game_piece_num(0), opts);
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    push(
        &mut s,
        &[
            Message::Bitfield(Bytes::from_static(&[0b1000_0000])),
            Message::Unchoke,
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(s.count_outstanding_request(), 1);
    written(&mut s);

    // The slot was stamped when the request went out, so give it a margin.
    s.do_interaction_processing_at(Instant::now() + Duration::from_secs(11))
        .unwrap();
    assert!(s.peer().snubbing);
    // The block was released, so it gets requested again.
    assert_eq!(
        written(&mut s),
        vec![Message::Request(Request::new(0, 0, t.block_len))]
    );
    assert_eq!(s.count_outstanding_request(), 1);
}

#[test]
fn test_both_seeders_disconnect() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.full_storage(), patient_options());
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    push(&mut s, &[Message::Bitfield(Bytes::from_static(&[0b1111_0000]))]);
    assert!(matches!(
        s.do_interaction_processing_at(t0),
        Err(Error::BothSeeders)
    ));
}

#[test]
fn test_flooding_detection() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), patient_options());
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();

    push(&mut s, &[Message::KeepAlive]);
    s.do_interaction_processing_at(t0).unwrap();
    // One keep-alive per interval is fine, and the counters restart.
    s.do_interaction_processing_at(t0 + Duration::from_secs(5))
        .unwrap();

    push(&mut s, &[Message::KeepAlive, Message::KeepAlive]);
    s.do_interaction_processing_at(t0 + Duration::from_secs(6))
        .unwrap();
    // Not checked before the interval elapsed.
    s.do_interaction_processing_at(t0 + Duration::from_secs(9))
        .unwrap();
    assert!(matches!(
        s.do_interaction_processing_at(t0 + Duration::from_secs(10)),
        Err(Error::Flooding(_))
    ));
}

#[test]
fn test_choke_flooding() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), patient_options());
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    push(&mut s, &[Message::Unchoke, Message::Choke]);
    s.do_interaction_processing_at(t0).unwrap();
    assert!(matches!(
        s.do_interaction_processing_at(t0 + Duration::from_secs(5)),
        Err(Error::Flooding(_))
    ));
}

#[test]
fn test_inactivity_disconnect() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    s.do_interaction_processing_at(t0 + Duration::from_secs(29))
        .unwrap();
    assert!(matches!(
        s.do_interaction_processing_at(t0 + Duration::from_secs(30)),
        Err(Error::Inactive(_))
    ));

    // Interest only postpones the disconnect.
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    s.do_post_handshake_processing_at(t0).unwrap();
    push(&mut s, &[Message::Interested]);
    s.do_interaction_processing_at(t0).unwrap();
    assert!(s.peer().peer_interested);
    s.do_interaction_processing_at(t0 + Duration::from_secs(119))
        .unwrap();
    assert!(matches!(
        s.do_interaction_processing_at(t0 + Duration::from_secs(120)),
        Err(Error::Inactive(_))
    ));
}

#[test]
fn test_keep_alive() {
    let t = TestTorrent::new(4, 1);
    let opts = PeerSessionOptions {
        keep_alive_interval: Some(Duration::from_secs(10)),
        ..patient_options()
    };
    let (mut s, _) = new_session(&t, t.empty_storage(), opts);
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    s.do_interaction_processing_at(t0 + Duration::from_secs(9))
        .unwrap();
    assert!(written(&mut s).is_empty());
    s.do_interaction_processing_at(t0 + Duration::from_secs(10))
        .unwrap();
    assert_eq!(written(&mut s), vec![Message::KeepAlive]);
    s.do_interaction_processing_at(t0 + Duration::from_secs(15))
        .unwrap();
    assert!(written(&mut s).is_empty());
}

#[test]
fn test_haves_from_other_sessions() {
    let t = TestTorrent::new(4, 1);
    let (mut s, storage) = new_session(&t, t.empty_storage(), patient_options());
    s.do_post_handshake_processing().unwrap();

    {
        let mut storage = storage.lock();
        storage.advertise_piece(2, 3);
        storage.advertise_piece(2, 1);
        // Our own completions are not announced back.
        storage.advertise_piece(1, 0);
    }
    s.do_interaction_processing().unwrap();
    assert_eq!(written(&mut s), vec![Message::Have(1), Message::Have(3)]);

    s.do_interaction_processing().unwrap();
    assert!(written(&mut s).is_empty());
}

#[test]
fn test_many_haves_collapse() {
    let t = TestTorrent::new(24, 1);
    let (mut s, storage) = new_session(&t, t.full_storage(), patient_options());
    push_handshake(&mut s, remote_handshake(&t).with_extended(false));
    s.receive_handshake().unwrap().unwrap();
    s.do_post_handshake_processing().unwrap();
    written(&mut s);

    {
        let mut storage = storage.lock();
        for i in 0..20 {
            storage.advertise_piece(2, i);
        }
    }
    s.do_interaction_processing().unwrap();
    assert_eq!(written(&mut s), vec![Message::HaveAll]);
}

#[test]
fn test_peer_exchange() {
    let t = TestTorrent::new(4, 1);
    let opts = PeerSessionOptions {
        ut_pex_enabled: Some(true),
        ..patient_options()
    };
    let (mut s, _) = new_session(&t, t.empty_storage(), opts);
    push_handshake(&mut s, remote_handshake(&t));
    s.receive_and_send_handshake().unwrap().unwrap();
    s.connection_mut().get_mut().take_written();
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    written(&mut s);

    let mut remote = ExtensionMessageRegistry::new();
    remote.set_extension_message_id(UT_PEX, 7);
    push(&mut s, &[extended_handshake(&remote)]);

    let other: SocketAddr = (Ipv4Addr::new(10, 0, 0, 1), 6881).into();
    let same_ip: SocketAddr = (Ipv4Addr::new(127, 0, 0, 1), 7000).into();
    let gone: SocketAddr = (Ipv4Addr::new(10, 0, 0, 2), 6881).into();
    s.update_pex_peers(
        vec![
            PexPeerInfo {
                flags: 0,
                addr: other,
            },
            PexPeerInfo {
                flags: 0,
                addr: same_ip,
            },
        ],
        vec![gone],
    );
    s.do_interaction_processing_at(t0).unwrap();
    assert_eq!(s.peer().client_version.as_deref(), Some("remote/1.0"));
    assert_eq!(s.peer().listen_port, Some(51413));

    let msgs = written(&mut s);
    let [Message::Extended(ext)] = &msgs[..] else {
        panic!("expected one pex message, got {msgs:?}");
    };
    assert_eq!(ext.id, 7);
    let pex = UtPex::deserialize(&ext.payload).unwrap();
    let added: Vec<SocketAddr> = pex.added_peers().map(|p| p.addr).collect();
    let dropped: Vec<SocketAddr> = pex.dropped_peers().map(|p| p.addr).collect();
    assert_eq!(added, vec![other]);
    assert_eq!(dropped, vec![gone]);

    s.do_interaction_processing_at(t0 + Duration::from_secs(59))
        .unwrap();
    assert!(written(&mut s).is_empty());
    s.do_interaction_processing_at(t0 + Duration::from_secs(60))
        .unwrap();
    assert_eq!(written(&mut s).len(), 1);
}

#[test]
fn test_pex_disabled_is_not_advertised() {
    let t = TestTorrent::new(4, 1);
    let (mut s, _) = new_session(&t, t.empty_storage(), Default::default());
    push_handshake(&mut s, remote_handshake(&t).with_fast(false));
    s.receive_handshake().unwrap().unwrap();
    s.do_post_handshake_processing().unwrap();

    let msgs = written(&mut s);
    let [Message::Extended(ext)] = &msgs[..] else {
        panic!("expected the extended handshake, got {msgs:?}");
    };
    let h = ExtendedHandshake::deserialize(&ext.payload).unwrap();
    assert!(h.registry().supports(UT_METADATA));
    assert!(!h.registry().supports(UT_PEX));
}

#[test]
fn test_metadata_request_is_answered() {
    let t = TestTorrent::new(4, 1);
    let metadata = Bytes::from(vec![b'x'; 100]);
    let ctx = Arc::new((*t.ctx).clone().with_metadata(metadata.clone()));
    let (mut s, _) = new_session_with_ctx(
        ctx,
        4,
        InMemoryPieceStorage::new(t.ctx.clone()),
        patient_options(),
    );
    push_handshake(&mut s, remote_handshake(&t).with_fast(false));
    s.receive_handshake().unwrap().unwrap();
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    written(&mut s);

    let mut remote = ExtensionMessageRegistry::new();
    remote.set_extension_message_id(UT_METADATA, 3);
    let mut request = Vec::new();
    UtMetadata::Request(0).serialize(&mut request);
    let our_id = ExtensionMessageRegistry::my().get_extension_message_id(UT_METADATA);
    push(
        &mut s,
        &[
            extended_handshake(&remote),
            Message::Extended(ExtendedMessage::new(our_id, request)),
        ],
    );
    s.do_interaction_processing_at(t0).unwrap();

    let msgs = written(&mut s);
    let [Message::Extended(ext)] = &msgs[..] else {
        panic!("expected a metadata reply, got {msgs:?}");
    };
    assert_eq!(ext.id, 3);
    assert_eq!(
        UtMetadata::deserialize(&ext.payload).unwrap(),
        UtMetadata::Data {
            piece: 0,
            total_size: 100,
            data: metadata,
        }
    );
}

#[test]
fn test_partial_write_resumes_next_tick() {
    let t = TestTorrent::new(2, 2);
    let (mut s, _) = new_session(&t, t.full_storage(), patient_options());
    s.peer_mut().choking_required = false;
    s.connection_mut().get_mut().set_write_budget(10);
    let t0 = Instant::now();
    s.do_post_handshake_processing_at(t0).unwrap();
    s.do_interaction_processing_at(t0).unwrap();
    // Bitfield is 6 bytes, unchoke 5: the unchoke is cut short.
    assert!(s.is_sending_message_in_progress());
    assert!(s.peer().am_choking);

    s.connection_mut().get_mut().set_write_budget(usize::MAX);
    s.do_interaction_processing_at(t0).unwrap();
    assert!(!s.is_sending_message_in_progress());
    assert!(!s.peer().am_choking);
    assert_eq!(
        written(&mut s),
        vec![
            Message::Bitfield(Bytes::from_static(&[0b1100_0000])),
            Message::Unchoke
        ]
    );
}
