use std::{
    collections::VecDeque,
    io::{Read, Write},
    time::{Duration, Instant},
};

use tracing::{debug, trace};

use crate::{
    Result,
    message_factory::BtMessageFactory,
    messages::BtMessage,
    peer::Peer,
    peer_connection::PeerConnection,
    piece::Piece,
    request_factory::BtRequestFactory,
    request_slot::RequestSlot,
    storage::PieceStorage,
};

/// Outgoing queue and outstanding request table of one connection.
///
/// Messages leave the queue in FIFO order. Invalidated messages are dropped
/// unsent, and a message that was partly written stays at the front until
/// the rest of it goes out.
#[derive(Debug)]
pub struct BtMessageDispatcher {
    message_queue: VecDeque<BtMessage>,
    /// Sorted by `(index, begin, length)`, no duplicates.
    request_slots: Vec<RequestSlot>,
    request_timeout: Duration,
}

fn cancel_block(storage: &mut dyn PieceStorage, index: u32, block_index: u32) {
    if let Some(piece) = storage.get_piece_mut(index) {
        piece.cancel_block(block_index);
    }
}

impl BtMessageDispatcher {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            message_queue: VecDeque::new(),
            request_slots: Vec::new(),
            request_timeout,
        }
    }

    pub fn add_message_to_queue(&mut self, msg: BtMessage) {
        self.message_queue.push_back(msg);
    }

    pub fn add_messages_to_queue(&mut self, msgs: impl IntoIterator<Item = BtMessage>) {
        self.message_queue.extend(msgs);
    }

    pub fn message_queue(&self) -> impl Iterator<Item = &BtMessage> {
        self.message_queue.iter()
    }

    /// Writes queued messages until the queue is empty or the transport
    /// stops accepting data.
    pub fn send_messages<T: Read + Write>(
        &mut self,
        conn: &mut PeerConnection<T>,
        peer: &mut Peer,
    ) -> Result<()> {
        while let Some(mut msg) = self.message_queue.pop_front() {
            if msg.is_invalidate() {
                trace!(%msg, "dropping invalidated message");
                continue;
            }
            if !msg.is_sending_in_progress() {
                if !msg.send_predicate(peer) {
                    trace!(%msg, "dropping stale message");
                    continue;
                }
                trace!(%msg, "sending");
                let mut buf = Vec::new();
                msg.serialize(&mut buf);
                conn.send_message(&buf)?;
            } else {
                conn.send_pending_data()?;
            }
            msg.set_sending_in_progress(!conn.send_buffer_is_empty());
            if msg.is_sending_in_progress() {
                self.message_queue.push_front(msg);
                break;
            }
            msg.on_send_complete(self, peer);
        }
        Ok(())
    }

    /// Invalidates queued Piece messages for the block the peer cancelled.
    pub fn do_cancel_sending_piece_action(
        &mut self,
        peer: &Peer,
        index: u32,
        begin: u32,
        length: u32,
    ) {
        let rejects: Vec<BtMessage> = self
            .message_queue
            .iter_mut()
            .filter_map(|m| m.on_cancel_sending_piece_event(peer, index, begin, length))
            .collect();
        self.message_queue.extend(rejects);
    }

    /// Same as [`do_cancel_sending_piece_action`](Self::do_cancel_sending_piece_action)
    /// for every block of `piece`.
    pub fn do_cancel_sending_piece_action_for_piece(&mut self, peer: &Peer, piece: &Piece) {
        for block_index in 0..piece.count_block() {
            self.do_cancel_sending_piece_action(
                peer,
                piece.index(),
                piece.block_offset(block_index),
                piece.block_length(block_index),
            );
        }
    }

    /// Forgets every request for `index` and invalidates queued Requests for
    /// it. Their blocks become available for requesting again.
    pub fn do_abort_outstanding_request_action(
        &mut self,
        index: u32,
        storage: &mut dyn PieceStorage,
    ) {
        self.request_slots.retain(|slot| {
            if slot.index != index {
                return true;
            }
            debug!(%slot, "aborting outstanding request");
            cancel_block(storage, slot.index, slot.block_index);
            false
        });

        for msg in self.message_queue.iter_mut() {
            if let Some(block_index) = msg.on_abort_outstanding_request_event(index) {
                cancel_block(storage, index, block_index);
            }
        }
    }

    /// The peer choked us. Requests it won't answer are forgotten; ones
    /// for pieces it allows us to download while choked stay.
    pub fn do_choked_action(
        &mut self,
        peer: &Peer,
        request_factory: &mut BtRequestFactory,
        storage: &mut dyn PieceStorage,
    ) {
        self.request_slots.retain(|slot| {
            if peer.is_in_peer_allowed_index_set(slot.index) {
                return true;
            }
            debug!(%slot, "peer choked us, dropping request");
            cancel_block(storage, slot.index, slot.block_index);
            false
        });
        request_factory.do_choked_action(peer, storage);
    }

    /// We choked the peer. Queued pieces it may no longer download are
    /// dropped.
    pub fn do_choking_action(&mut self, peer: &Peer) {
        let rejects: Vec<BtMessage> = self
            .message_queue
            .iter_mut()
            .filter_map(|m| m.on_choking_event(peer))
            .collect();
        self.message_queue.extend(rejects);
    }

    /// Gives up on timed out requests and cancels requests for blocks we
    /// got elsewhere.
    pub fn check_request_slot_and_do_necessary_thing(
        &mut self,
        now: Instant,
        peer: &mut Peer,
        storage: &mut dyn PieceStorage,
        factory: &BtMessageFactory,
    ) -> Result<()> {
        let mut cancels = Vec::new();
        let timeout = self.request_timeout;
        self.request_slots.retain(|slot| {
            if slot.is_timeout(now, timeout) {
                debug!(%slot, addr = %peer.addr, "request timed out");
                cancel_block(storage, slot.index, slot.block_index);
                peer.snubbing = true;
                return false;
            }
            let block_present = storage
                .get_piece(slot.index)
                .is_none_or(|p| p.has_block(slot.block_index));
            if block_present {
                trace!(%slot, "block already downloaded, cancelling");
                cancels.push(*slot);
                return false;
            }
            true
        });
        for slot in cancels {
            let msg = factory.create_cancel_message(slot.index, slot.begin, slot.length)?;
            self.add_message_to_queue(msg);
        }
        Ok(())
    }

    pub fn is_sending_in_progress(&self) -> bool {
        self.message_queue
            .front()
            .is_some_and(|m| m.is_sending_in_progress())
    }

    pub fn count_message_in_queue(&self) -> usize {
        self.message_queue.len()
    }

    pub fn count_outstanding_request(&self) -> usize {
        self.request_slots.len()
    }

    /// Number of queued Piece messages.
    pub fn count_outstanding_upload(&self) -> usize {
        self.message_queue.iter().filter(|m| m.is_uploading()).count()
    }

    pub fn is_outstanding_request(&self, index: u32, block_index: u32) -> bool {
        self.request_slots
            .iter()
            .any(|s| s.index == index && s.block_index == block_index)
    }

    fn find(&self, index: u32, begin: u32, length: u32) -> core::result::Result<usize, usize> {
        self.request_slots
            .binary_search_by_key(&(index, begin, length), |s| (s.index, s.begin, s.length))
    }

    pub fn get_outstanding_request(&self, index: u32, begin: u32, length: u32) -> Option<RequestSlot> {
        self.find(index, begin, length)
            .ok()
            .map(|pos| self.request_slots[pos])
    }

    /// Adding a slot that is already outstanding is a no-op.
    pub fn add_outstanding_request(&mut self, slot: RequestSlot) {
        match self.find(slot.index, slot.begin, slot.length) {
            Ok(_) => debug!(%slot, "request is already outstanding"),
            Err(pos) => self.request_slots.insert(pos, slot),
        }
    }

    /// Removes the slot and releases its block for requesting again.
    pub fn remove_outstanding_request(&mut self, slot: &RequestSlot, storage: &mut dyn PieceStorage) {
        match self.find(slot.index, slot.begin, slot.length) {
            Ok(pos) => {
                let removed = self.request_slots.remove(pos);
                cancel_block(storage, removed.index, removed.block_index);
            }
            Err(_) => trace!(%slot, "request was not outstanding"),
        }
    }

    pub fn outstanding_requests(&self) -> &[RequestSlot] {
        &self.request_slots
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::{
        messages::BtMessageKind,
        tests::test_util::{MockTransport, TestTorrent, test_peer},
    };

    fn dispatcher() -> BtMessageDispatcher {
        BtMessageDispatcher::new(Duration::from_secs(60))
    }

    fn queued_kinds(d: &BtMessageDispatcher) -> Vec<&'static str> {
        d.message_queue()
            .filter(|m| !m.is_invalidate())
            .map(|m| m.name())
            .collect()
    }

    #[test]
    fn test_add_remove_slot() {
        let t = TestTorrent::new(4, 2);
        let mut storage = t.empty_storage();
        let mut d = dispatcher();
        let slot = RequestSlot::new(0, 0, 16384, 0);
        d.add_outstanding_request(slot);
        assert_eq!(d.count_outstanding_request(), 1);
        d.remove_outstanding_request(&slot, &mut storage);
        assert_eq!(d.count_outstanding_request(), 0);

        let a = RequestSlot::new(1, 0, 16384, 0);
        let b = RequestSlot::new(1, 16384, 16384, 1);
        d.add_outstanding_request(b);
        d.add_outstanding_request(a);
        d.remove_outstanding_request(&a, &mut storage);
        assert_eq!(d.count_outstanding_request(), 1);
        assert!(d.get_outstanding_request(1, 16384, 16384).is_some());
        assert!(d.get_outstanding_request(1, 0, 16384).is_none());
        assert!(d.is_outstanding_request(1, 1));
        assert!(!d.is_outstanding_request(1, 0));
    }

    #[test]
    fn test_duplicate_slot_ignored() {
        let mut d = dispatcher();
        d.add_outstanding_request(RequestSlot::new(2, 0, 100, 0));
        d.add_outstanding_request(RequestSlot::new(2, 0, 100, 0));
        d.add_outstanding_request(RequestSlot::new(1, 0, 100, 0));
        assert_eq!(d.count_outstanding_request(), 2);
        let order: Vec<_> = d.outstanding_requests().iter().map(|s| s.index).collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn test_remove_releases_block() {
        let t = TestTorrent::new(2, 2);
        let mut storage = t.empty_storage();
        let peer_bf = crate::tests::test_util::bitfield_from_indexes(2, &[0]);
        storage.get_missing_piece(&peer_bf, &[]);
        let block = storage
            .get_piece_mut(0)
            .unwrap()
            .get_missing_unused_block_index()
            .unwrap();

        let mut d = dispatcher();
        let slot = RequestSlot::new(0, 0, t.block_len, block);
        d.add_outstanding_request(slot);
        d.remove_outstanding_request(&slot, &mut storage);
        assert!(!storage.get_piece(0).unwrap().is_block_used(block));
    }

    #[test]
    fn test_cancel_sending_piece() {
        let t = TestTorrent::new(2, 2);
        let f = t.factory();
        let mut peer = test_peer(2);
        peer.fast_extension_enabled = true;

        let mut d = dispatcher();
        d.add_message_to_queue(
            f.create_piece_message(0, 0, Bytes::from(vec![0; 16384]))
                .unwrap(),
        );
        d.add_message_to_queue(
            f.create_piece_message(0, 16384, Bytes::from(vec![0; 16384]))
                .unwrap(),
        );

        d.do_cancel_sending_piece_action(&peer, 0, 0, 100);
        assert_eq!(queued_kinds(&d), vec!["piece", "piece"]);

        d.do_cancel_sending_piece_action(&peer, 0, 0, 16384);
        assert_eq!(queued_kinds(&d), vec!["piece", "reject request"]);
        assert_eq!(d.count_outstanding_upload(), 2);

        // Already invalidated, no second reject.
        d.do_cancel_sending_piece_action(&peer, 0, 0, 16384);
        assert_eq!(d.count_message_in_queue(), 3);
    }

    #[test]
    fn test_cancel_sending_whole_piece() {
        let t = TestTorrent::new(1, 2);
        let f = t.factory();
        let peer = test_peer(1);
        let mut d = dispatcher();
        for begin in [0, 16384] {
            d.add_message_to_queue(
                f.create_piece_message(0, begin, Bytes::from(vec![0; 16384]))
                    .unwrap(),
            );
        }
        let piece = Piece::new(0, t.piece_len, t.block_len);
        d.do_cancel_sending_piece_action_for_piece(&peer, &piece);
        assert!(queued_kinds(&d).is_empty());
    }

    #[test]
    fn test_choking_action() {
        let t = TestTorrent::new(4, 1);
        let f = t.factory();
        let mut peer = test_peer(4);
        peer.fast_extension_enabled = true;
        peer.add_am_allowed_index(1);

        let mut d = dispatcher();
        for index in [0, 1] {
            d.add_message_to_queue(
                f.create_piece_message(index, 0, Bytes::from(vec![0; 16384]))
                    .unwrap(),
            );
        }
        d.add_message_to_queue(f.create_have_message(3).unwrap());
        d.do_choking_action(&peer);
        assert_eq!(queued_kinds(&d), vec!["piece", "have", "reject request"]);
        let survivor = d.message_queue().find(|m| !m.is_invalidate()).unwrap();
        assert!(matches!(survivor.kind(), BtMessageKind::Piece(p) if p.index == 1));
    }

    #[test]
    fn test_choked_action_keeps_allowed_fast() {
        let t = TestTorrent::new(4, 1);
        let mut storage = t.empty_storage();
        let mut peer = test_peer(4);
        peer.add_peer_allowed_index(2);
        let mut rf = BtRequestFactory::new();

        let mut d = dispatcher();
        d.add_outstanding_request(RequestSlot::new(1, 0, 16384, 0));
        d.add_outstanding_request(RequestSlot::new(2, 0, 16384, 0));
        d.do_choked_action(&peer, &mut rf, &mut storage);
        assert_eq!(d.count_outstanding_request(), 1);
        assert!(d.get_outstanding_request(2, 0, 16384).is_some());
    }

    #[test]
    fn test_abort_outstanding_request() {
        let t = TestTorrent::new(4, 2);
        let f = t.factory();
        let mut storage = t.empty_storage();
        let mut d = dispatcher();
        d.add_outstanding_request(RequestSlot::new(0, 0, 16384, 0));
        d.add_outstanding_request(RequestSlot::new(0, 16384, 16384, 1));
        d.add_outstanding_request(RequestSlot::new(1, 0, 16384, 0));
        d.add_message_to_queue(f.create_request_message(0, 0, 16384, 0).unwrap());
        d.add_message_to_queue(f.create_request_message(1, 0, 16384, 0).unwrap());

        d.do_abort_outstanding_request_action(0, &mut storage);
        assert_eq!(d.count_outstanding_request(), 1);
        assert!(d.get_outstanding_request(1, 0, 16384).is_some());
        assert_eq!(queued_kinds(&d), vec!["request"]);
    }

    #[test]
    fn test_check_request_slot() {
        let t = TestTorrent::new(2, 2);
        let f = t.factory();
        let mut storage = t.empty_storage().with_end_game_piece_num(0);
        let peer_bf = crate::tests::test_util::bitfield_from_indexes(2, &[0, 1]);
        storage.get_missing_piece(&peer_bf, &[]);
        storage.get_missing_piece(&peer_bf, &[]);
        storage.get_piece_mut(1).unwrap().complete_block(0);
        let mut peer = test_peer(2);

        let mut d = BtMessageDispatcher::new(Duration::from_secs(10));
        let now = Instant::now();
        let mut stale = RequestSlot::new(0, 0, 16384, 0);
        stale.dispatched_at = now - Duration::from_secs(11);
        d.add_outstanding_request(stale);
        d.add_outstanding_request(RequestSlot::new(0, 16384, 16384, 1));
        d.add_outstanding_request(RequestSlot::new(1, 0, 16384, 0));

        d.check_request_slot_and_do_necessary_thing(now, &mut peer, &mut storage, &f)
            .unwrap();
        assert!(peer.snubbing);
        assert_eq!(d.count_outstanding_request(), 1);
        assert!(d.get_outstanding_request(0, 16384, 16384).is_some());
        assert_eq!(queued_kinds(&d), vec!["cancel"]);
    }

    #[test]
    fn test_send_messages_partial_write() {
        let t = TestTorrent::new(2, 2);
        let f = t.factory();
        let mut peer = test_peer(2);
        peer.am_choking = false;
        let mut conn = PeerConnection::new(MockTransport::with_write_budget(100));

        let mut d = dispatcher();
        d.add_message_to_queue(f.create_have_message(0).unwrap());
        d.add_message_to_queue(
            f.create_piece_message(0, 0, Bytes::from(vec![1; 16384]))
                .unwrap(),
        );
        d.add_message_to_queue(f.create_have_message(1).unwrap());

        d.send_messages(&mut conn, &mut peer).unwrap();
        assert!(d.is_sending_in_progress());
        assert_eq!(d.count_message_in_queue(), 2);

        // A message mid-send survives a choke.
        d.do_choking_action(&peer);
        assert_eq!(queued_kinds(&d), vec!["piece", "have"]);

        conn.get_mut().set_write_budget(usize::MAX);
        d.send_messages(&mut conn, &mut peer).unwrap();
        assert_eq!(d.count_message_in_queue(), 0);
        assert_eq!(peer.stats.uploaded_bytes, 16384);
        assert_eq!(conn.get_ref().written.len(), 9 + 13 + 16384 + 9);
    }

    #[test]
    fn test_send_skips_invalidated_and_stale() {
        let t = TestTorrent::new(2, 1);
        let f = t.factory();
        let mut peer = test_peer(2);
        let mut conn = PeerConnection::new(MockTransport::default());

        let mut d = dispatcher();
        let mut have = f.create_have_message(0).unwrap();
        have.set_invalidate(true);
        d.add_message_to_queue(have);
        // We are already choking.
        d.add_message_to_queue(f.create_choke_message());
        d.add_message_to_queue(f.create_interested_message());
        d.add_message_to_queue(f.create_interested_message());
        d.add_message_to_queue(f.create_request_message(1, 0, 16384, 0).unwrap());

        d.send_messages(&mut conn, &mut peer).unwrap();
        assert_eq!(conn.get_ref().written, {
            let mut v = vec![0, 0, 0, 1, 2];
            v.extend_from_slice(&[0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0x40, 0]);
            v
        });
        assert!(peer.am_interested);
        assert_eq!(d.count_outstanding_request(), 1);
    }
}
