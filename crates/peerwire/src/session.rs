use std::{
    io::{Read, Write},
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use peer_binary_protocol::{
    Handshake,
    extended::{
        registry::{ExtensionMessageRegistry, UT_PEX},
        ut_pex::{PexPeerInfo, UtPex},
    },
};
use peerwire_core::{Id20, fast_set::compute_fast_set};
use tracing::{debug, debug_span, info, trace};

use crate::{
    Error, Result,
    context::MessageContext,
    dispatcher::BtMessageDispatcher,
    download_context::DownloadContext,
    events::SessionEvent,
    extension::{MAX_DROPPED_PEERS, MAX_FRESH_PEERS},
    message_factory::BtMessageFactory,
    messages::{BtMessage, BtMessageKind},
    options::PeerSessionOptions,
    peer::Peer,
    peer_connection::PeerConnection,
    request_factory::BtRequestFactory,
    storage::{PieceStorage, SharedPieceStorage},
    type_aliases::SessionId,
};

/// Messages read from the connection in one tick, at most.
const MAX_RECEIVE_PER_TICK: usize = 50;
/// This many Haves since the last tick are sent as one bitfield instead.
const HAVE_COLLAPSE_THRESHOLD: usize = 20;
const REQUEST_SLOT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct FloodingStat {
    choke_unchoke_count: u32,
    keep_alive_count: u32,
}

impl FloodingStat {
    fn is_flooding(&self) -> Option<&'static str> {
        if self.choke_unchoke_count >= 2 {
            return Some("choke/unchoke");
        }
        if self.keep_alive_count >= 2 {
            return Some("keep-alive");
        }
        None
    }
}

/// Drives the conversation with one peer.
///
/// The owner calls the handshake methods once, then
/// [`do_interaction_processing`](Self::do_interaction_processing)
/// repeatedly. Any error means the connection should be dropped.
pub struct PeerSession<T> {
    session_id: SessionId,
    local_peer_id: Id20,
    options: PeerSessionOptions,
    ctx: Arc<DownloadContext>,

    peer: Peer,
    conn: PeerConnection<T>,
    storage: SharedPieceStorage,
    factory: BtMessageFactory,
    dispatcher: BtMessageDispatcher,
    request_factory: BtRequestFactory,
    events: Vec<SessionEvent>,
    span: tracing::Span,

    have_checkpoint: Instant,
    keep_alive_checkpoint: Instant,
    flooding_checkpoint: Instant,
    inactive_checkpoint: Instant,
    request_slot_checkpoint: Instant,
    /// `None` until the first PEX message went out.
    pex_checkpoint: Option<Instant>,
    flooding_stat: FloodingStat,
    received_in_iteration: usize,

    pex_fresh_peers: Vec<PexPeerInfo>,
    pex_dropped_peers: Vec<SocketAddr>,
}

impl<T: Read + Write> PeerSession<T> {
    pub fn new(
        session_id: SessionId,
        local_peer_id: Id20,
        peer: Peer,
        stream: T,
        ctx: Arc<DownloadContext>,
        storage: SharedPieceStorage,
        options: PeerSessionOptions,
    ) -> Self {
        let mut registry = ExtensionMessageRegistry::my();
        if !options.ut_pex_enabled() {
            registry.remove_extension(UT_PEX);
        }
        let now = Instant::now();
        Self {
            session_id,
            local_peer_id,
            factory: BtMessageFactory::new(ctx.clone(), registry),
            dispatcher: BtMessageDispatcher::new(options.request_timeout()),
            request_factory: BtRequestFactory::new(),
            span: debug_span!("peer", session_id, addr = %peer.addr),
            conn: PeerConnection::new(stream),
            events: Vec::new(),
            options,
            ctx,
            peer,
            storage,
            have_checkpoint: now,
            keep_alive_checkpoint: now,
            flooding_checkpoint: now,
            inactive_checkpoint: now,
            request_slot_checkpoint: now,
            pex_checkpoint: None,
            flooding_stat: FloodingStat::default(),
            received_in_iteration: 0,
            pex_fresh_peers: Vec::new(),
            pex_dropped_peers: Vec::new(),
        }
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// For the choking algorithm, which sets the peer's choking flags.
    pub fn peer_mut(&mut self) -> &mut Peer {
        &mut self.peer
    }

    pub fn connection(&self) -> &PeerConnection<T> {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut PeerConnection<T> {
        &mut self.conn
    }

    pub fn dispatcher(&self) -> &BtMessageDispatcher {
        &self.dispatcher
    }

    pub fn request_factory(&self) -> &BtRequestFactory {
        &self.request_factory
    }

    /// Drains what the session learned since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Peers to announce with the next PEX message.
    pub fn update_pex_peers(&mut self, fresh: Vec<PexPeerInfo>, dropped: Vec<SocketAddr>) {
        self.pex_fresh_peers = fresh;
        self.pex_dropped_peers = dropped;
    }

    pub fn initiate_handshake(&mut self) -> Result<()> {
        let handshake = self
            .factory
            .create_handshake_message_from(self.ctx.info_hash, self.local_peer_id)
            .with_dht(self.options.dht_enabled());
        trace!(parent: &self.span, ?handshake, "sending handshake");
        let mut buf = Vec::new();
        handshake.serialize(&mut buf);
        self.conn.send_message(&buf)
    }

    /// Reads the peer's handshake and records its capabilities. `Ok(None)`
    /// until the handshake fully arrived.
    pub fn receive_handshake(&mut self) -> Result<Option<Handshake>> {
        let _e = self.span.enter();
        let Some(raw) = self.conn.receive_handshake()? else {
            return Ok(None);
        };
        let handshake = self.factory.create_handshake_message(&raw)?;
        if handshake.peer_id == self.local_peer_id {
            return Err(Error::ConnectingToOurselves);
        }
        self.peer.peer_id = Some(handshake.peer_id);
        if handshake.supports_fast() {
            self.peer.fast_extension_enabled = true;
            info!("fast extension enabled");
        }
        if handshake.supports_extended() {
            self.peer.extended_messaging_enabled = true;
            info!("extended messaging enabled");
        }
        if handshake.supports_dht() {
            self.peer.dht_enabled = true;
            info!("peer supports dht");
        }
        debug!(peer_id = ?handshake.peer_id, "received handshake");
        Ok(Some(handshake))
    }

    /// Answers an incoming connection: reads its handshake, then sends
    /// ours.
    pub fn receive_and_send_handshake(&mut self) -> Result<Option<Handshake>> {
        let handshake = self.receive_handshake()?;
        if handshake.is_some() {
            self.initiate_handshake()?;
        }
        Ok(handshake)
    }

    pub fn do_post_handshake_processing(&mut self) -> Result<()> {
        self.do_post_handshake_processing_at(Instant::now())
    }

    /// Announces what we have and what the peer may fetch while choked.
    pub fn do_post_handshake_processing_at(&mut self, now: Instant) -> Result<()> {
        let span = self.span.clone();
        let _e = span.enter();

        self.have_checkpoint = now;
        self.keep_alive_checkpoint = now;
        self.flooding_checkpoint = now;
        self.inactive_checkpoint = now;
        self.request_slot_checkpoint = now;
        self.pex_checkpoint = None;

        if self.peer.extended_messaging_enabled {
            let msg = self.factory.create_extended_handshake_message(
                self.options.client_version(),
                self.options.listen_port,
            );
            self.dispatcher.add_message_to_queue(msg);
        }
        self.add_bitfield_message_to_queue()?;
        if self.peer.dht_enabled && self.options.dht_enabled() {
            if let Some(port) = self.options.dht_listen_port {
                self.dispatcher
                    .add_message_to_queue(self.factory.create_port_message(port));
            }
        }
        self.add_allowed_fast_message_to_queue()?;
        self.send_messages()
    }

    fn add_bitfield_message_to_queue(&mut self) -> Result<()> {
        let storage = self.storage.lock();
        let msg = if self.peer.fast_extension_enabled {
            if storage.all_download_finished() {
                Some(self.factory.create_have_all_message())
            } else if storage.completed_length() > 0 {
                Some(bitfield_message(&self.factory, &*storage)?)
            } else {
                Some(self.factory.create_have_none_message())
            }
        } else if storage.completed_length() > 0 {
            Some(bitfield_message(&self.factory, &*storage)?)
        } else {
            None
        };
        drop(storage);
        if let Some(msg) = msg {
            self.dispatcher.add_message_to_queue(msg);
        }
        Ok(())
    }

    fn add_allowed_fast_message_to_queue(&mut self) -> Result<()> {
        if !self.peer.fast_extension_enabled {
            return Ok(());
        }
        let fast_set = compute_fast_set(
            &self.ctx.info_hash,
            self.peer.addr.ip(),
            self.ctx.num_pieces(),
            self.options.allowed_fast_set_size(),
        );
        debug!(?fast_set, "allowed fast set");
        for index in fast_set {
            let msg = self.factory.create_allowed_fast_message(index)?;
            self.dispatcher.add_message_to_queue(msg);
        }
        Ok(())
    }

    pub fn do_interaction_processing(&mut self) -> Result<()> {
        self.do_interaction_processing_at(Instant::now())
    }

    /// One tick: timers, receive, schedule requests, send.
    pub fn do_interaction_processing_at(&mut self, now: Instant) -> Result<()> {
        let span = self.span.clone();
        let _e = span.enter();

        self.check_active_interaction(now)?;
        self.decide_choking();
        self.detect_message_flooding(now)?;
        if now.saturating_duration_since(self.request_slot_checkpoint) >= REQUEST_SLOT_CHECK_INTERVAL
        {
            self.request_slot_checkpoint = now;
            let mut storage = self.storage.lock();
            self.dispatcher.check_request_slot_and_do_necessary_thing(
                now,
                &mut self.peer,
                &mut *storage,
                &self.factory,
            )?;
        }
        self.check_have(now)?;
        self.send_keep_alive(now)?;
        self.received_in_iteration = self.receive_messages(now)?;

        {
            let mut storage = self.storage.lock();
            self.request_factory
                .remove_completed_piece(&mut self.dispatcher, &mut *storage);
        }
        self.decide_interest();
        let finished = self.storage.lock().download_finished();
        if !finished {
            self.add_requests()?;
        }
        if self.options.ut_pex_enabled() && self.peer.extensions().supports(UT_PEX) {
            self.add_peer_exchange_message(now)?;
        }
        self.send_messages()
    }

    fn check_active_interaction(&self, now: Instant) -> Result<()> {
        let inactive = now.saturating_duration_since(self.inactive_checkpoint);
        if !self.peer.am_interested
            && !self.peer.peer_interested
            && inactive >= self.options.not_interested_timeout()
        {
            return Err(Error::Inactive("neither side is interested"));
        }
        if inactive >= self.options.inactive_timeout() {
            return Err(Error::Inactive("no piece or request exchanged"));
        }
        Ok(())
    }

    fn decide_choking(&mut self) {
        if self.peer.should_be_choking() {
            if !self.peer.am_choking {
                self.dispatcher
                    .add_message_to_queue(self.factory.create_choke_message());
            }
        } else if self.peer.am_choking {
            self.dispatcher
                .add_message_to_queue(self.factory.create_unchoke_message());
        }
    }

    fn detect_message_flooding(&mut self, now: Instant) -> Result<()> {
        if now.saturating_duration_since(self.flooding_checkpoint)
            < self.options.flooding_check_interval()
        {
            return Ok(());
        }
        if let Some(kind) = self.flooding_stat.is_flooding() {
            return Err(Error::Flooding(kind));
        }
        self.flooding_stat = FloodingStat::default();
        self.flooding_checkpoint = now;
        Ok(())
    }

    fn check_have(&mut self, now: Instant) -> Result<()> {
        let storage = self.storage.lock();
        let indexes = storage.get_advertised_piece_indexes(self.session_id, self.have_checkpoint);
        self.have_checkpoint = now;
        if indexes.len() >= HAVE_COLLAPSE_THRESHOLD {
            let msg = if self.peer.fast_extension_enabled && storage.all_download_finished() {
                self.factory.create_have_all_message()
            } else {
                bitfield_message(&self.factory, &*storage)?
            };
            self.dispatcher.add_message_to_queue(msg);
        } else {
            for index in indexes {
                let msg = self.factory.create_have_message(index)?;
                self.dispatcher.add_message_to_queue(msg);
            }
        }
        Ok(())
    }

    fn send_keep_alive(&mut self, now: Instant) -> Result<()> {
        if now.saturating_duration_since(self.keep_alive_checkpoint)
            < self.options.keep_alive_interval()
        {
            return Ok(());
        }
        self.dispatcher
            .add_message_to_queue(self.factory.create_keep_alive_message());
        self.send_messages()?;
        self.keep_alive_checkpoint = now;
        Ok(())
    }

    /// Applies up to [`MAX_RECEIVE_PER_TICK`] messages, returns how many.
    fn receive_messages(&mut self, now: Instant) -> Result<usize> {
        let mut count = 0;
        while count < MAX_RECEIVE_PER_TICK {
            let Some(body) = self.conn.receive_message()? else {
                break;
            };
            count += 1;
            let msg = self.factory.create_bt_message(&body, &self.peer)?;
            debug!(%msg, "received");

            match msg.kind() {
                BtMessageKind::KeepAlive => self.flooding_stat.keep_alive_count += 1,
                BtMessageKind::Choke(_) if !self.peer.peer_choking => {
                    self.flooding_stat.choke_unchoke_count += 1
                }
                BtMessageKind::Unchoke(_) if self.peer.peer_choking => {
                    self.flooding_stat.choke_unchoke_count += 1
                }
                BtMessageKind::Piece(_) | BtMessageKind::Request(_) => {
                    self.inactive_checkpoint = now
                }
                _ => {}
            }

            let mut storage = self.storage.lock();
            let mut ctx = MessageContext {
                session_id: self.session_id,
                peer: &mut self.peer,
                dispatcher: &mut self.dispatcher,
                request_factory: &mut self.request_factory,
                storage: &mut *storage,
                factory: &self.factory,
                events: &mut self.events,
            };
            msg.do_received_action(&mut ctx)?;
        }
        Ok(count)
    }

    fn decide_interest(&mut self) {
        let has_missing = self.storage.lock().has_missing_piece(self.peer.bitfield());
        if has_missing {
            if !self.peer.am_interested {
                debug!("interested in the peer");
                self.dispatcher
                    .add_message_to_queue(self.factory.create_interested_message());
            }
        } else if self.peer.am_interested {
            debug!("not interested in the peer");
            self.dispatcher
                .add_message_to_queue(self.factory.create_not_interested_message());
        }
    }

    /// Targets more pieces until they hold `max_missing_block` blocks to
    /// request.
    fn fill_piece(&mut self, storage: &mut dyn PieceStorage, max_missing_block: usize) {
        if !storage.has_missing_piece(self.peer.bitfield()) {
            return;
        }
        if self.peer.peer_choking && !self.peer.fast_extension_enabled {
            return;
        }
        let mut num_missing_block = self.request_factory.count_missing_block(storage);
        let mut excluded = self.request_factory.get_target_piece_indexes().to_vec();
        while num_missing_block < max_missing_block {
            let index = if self.peer.peer_choking {
                storage.get_missing_fast_piece(
                    self.peer.bitfield(),
                    self.peer.peer_allowed_index_set(),
                    &excluded,
                )
            } else {
                storage.get_missing_piece(self.peer.bitfield(), &excluded)
            };
            let Some(index) = index else {
                break;
            };
            trace!(index, "targeting piece");
            self.request_factory.add_target_piece(index);
            excluded.push(index);
            num_missing_block += storage
                .get_piece(index)
                .map(|p| p.count_missing_block() as usize)
                .unwrap_or(0);
        }
    }

    fn add_requests(&mut self) -> Result<()> {
        let max_pending = self.options.max_pending_requests(self.peer.latency());
        let storage_handle = self.storage.clone();
        let mut storage = storage_handle.lock();
        self.fill_piece(&mut *storage, max_pending);

        let to_create = max_pending.saturating_sub(self.dispatcher.count_outstanding_request());
        if to_create == 0 {
            return Ok(());
        }
        let end_game = storage.is_end_game();
        let requests = self.request_factory.create_request_messages(
            to_create,
            end_game,
            &self.peer,
            &self.dispatcher,
            &mut *storage,
            &self.factory,
        )?;
        self.dispatcher.add_messages_to_queue(requests);
        Ok(())
    }

    fn add_peer_exchange_message(&mut self, now: Instant) -> Result<()> {
        if self
            .pex_checkpoint
            .is_some_and(|c| now.saturating_duration_since(c) < self.options.pex_interval())
        {
            return Ok(());
        }
        let ip = self.peer.addr.ip();
        let fresh: Vec<PexPeerInfo> = self
            .pex_fresh_peers
            .iter()
            .filter(|p| p.addr.ip() != ip)
            .take(MAX_FRESH_PEERS)
            .copied()
            .collect();
        let dropped: Vec<SocketAddr> = self
            .pex_dropped_peers
            .iter()
            .filter(|a| a.ip() != ip)
            .take(MAX_DROPPED_PEERS)
            .copied()
            .collect();
        debug!(fresh = fresh.len(), dropped = dropped.len(), "sending pex");
        let msg = self
            .factory
            .create_ut_pex_message(&self.peer, UtPex::from_peers(&fresh, &dropped))?;
        self.dispatcher.add_message_to_queue(msg);
        self.pex_checkpoint = Some(now);
        Ok(())
    }

    fn send_messages(&mut self) -> Result<()> {
        if !self.conn.send_buffer_is_empty() && !self.dispatcher.is_sending_in_progress() {
            self.conn.send_pending_data()?;
            if !self.conn.send_buffer_is_empty() {
                return Ok(());
            }
        }
        self.dispatcher.send_messages(&mut self.conn, &mut self.peer)
    }

    /// Gives every targeted piece back to the storage. Call before
    /// dropping the session.
    pub fn cancel_all_piece(&mut self) {
        let mut storage = self.storage.lock();
        self.request_factory
            .remove_all_target_piece(&mut self.dispatcher, &mut *storage);
    }

    pub fn count_pending_message(&self) -> usize {
        self.dispatcher.count_message_in_queue()
    }

    pub fn is_sending_message_in_progress(&self) -> bool {
        self.dispatcher.is_sending_in_progress()
    }

    pub fn count_received_message_in_iteration(&self) -> usize {
        self.received_in_iteration
    }

    pub fn count_outstanding_request(&self) -> usize {
        self.dispatcher.count_outstanding_request()
    }
}

fn bitfield_message(
    factory: &BtMessageFactory,
    storage: &dyn PieceStorage,
) -> Result<BtMessage> {
    factory.create_bitfield_message(Bytes::copy_from_slice(
        storage.bitfield().as_raw_slice(),
    ))
}
