//! The per-channel discovery session: request building, response reassembly, and the discovery
//! state machine.
//!
//! A [`DiscoverySession`] is bound 1:1 to an L2CAP channel the host owns. The host drives it by
//! forwarding channel events; the session answers by enqueueing requests through the channel and
//! eventually hands back a [`Discovery`] carrying the terminal [`Status`] and the database.
//!
//! Two flows exist, selected at session creation:
//!
//! * [`DiscoveryKind::SearchThenAttributes`] first collects the matching record handles with
//!   Service Search transactions, then walks the handles with one Service Attribute transaction
//!   each.
//! * [`DiscoveryKind::SearchAttributes`] runs a single combined Service Search Attribute
//!   transaction returning every matching record's attributes at once.
//!
//! Either way, fragmented responses are accumulated in a bounded scratchpad and decoded only
//! once the server stops handing out continuation state.
//!
//! All entry points run synchronously on the host's serialization context; the session never
//! blocks and holds no locks.
//!
//! [`DiscoverySession`]: struct.DiscoverySession.html
//! [`Discovery`]: struct.Discovery.html
//! [`Status`]: ../enum.Status.html
//! [`DiscoveryKind::SearchThenAttributes`]: ../enum.DiscoveryKind.html#variant.SearchThenAttributes
//! [`DiscoveryKind::SearchAttributes`]: ../enum.DiscoveryKind.html#variant.SearchAttributes

use super::data_element::{self, DataElementHeader, ElementType};
use super::db::DiscoveryDb;
use super::decode;
use super::{
    ClientConfig, ContinuationState, DiscoveryKind, PduId, SdpChannel, Status, DATA_BUF_SIZE,
    MAX_ATTR_FILTERS, MAX_CONTINUATION_LEN, MAX_DISC_RECS, MAX_LIST_BYTE_COUNT, MAX_UUID_FILTERS,
    TX_HEADROOM,
};
use crate::bytes::{ByteReader, ByteWriter, FromBytes};
use crate::device_address::DeviceAddress;
use crate::uuid::Uuid;
use crate::Error;
use heapless::Vec;

/// Discovery phase, advanced by responses only.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum DiscState {
    Idle,
    WaitHandles,
    WaitAttr,
    WaitSearchAttr,
    Done,
}

/// Outcome of absorbing one response fragment.
enum Continuation {
    /// The server sent everything; the scratchpad holds the full attribute list.
    Complete,
    /// More fragments follow; reissue the request with this state appended.
    More(ContinuationState),
}

/// A finished discovery: the terminal status and the database moved back out of the session.
pub struct Discovery<'a> {
    pub status: Status,
    pub db: DiscoveryDb<'a>,
}

/// Client side of one SDP discovery conversation.
pub struct DiscoverySession<'a> {
    remote: DeviceAddress,
    kind: DiscoveryKind,
    config: ClientConfig,
    state: DiscState,
    transaction_id: u16,
    uuid_filters: Vec<Uuid, MAX_UUID_FILTERS>,
    attr_filters: Vec<u16, MAX_ATTR_FILTERS>,
    handles: [u32; MAX_DISC_RECS],
    num_handles: u16,
    cur_handle: u16,
    #[cfg(feature = "browse-plus")]
    cur_uuid_idx: usize,
    rsp_list: Vec<u8, MAX_LIST_BYTE_COUNT>,
    db: Option<DiscoveryDb<'a>>,
}

impl<'a> DiscoverySession<'a> {
    /// Creates a session for one discovery against `remote`.
    ///
    /// The database is moved into the session for the duration of the discovery and handed back
    /// through [`Discovery`]. `uuid_filters` selects the services searched for; an empty
    /// `attr_filters` requests all attributes of each matched record.
    ///
    /// Returns `Error::InvalidValue` when more filters are passed than a request can carry
    /// ([`MAX_UUID_FILTERS`] / [`MAX_ATTR_FILTERS`]).
    ///
    /// [`Discovery`]: struct.Discovery.html
    /// [`MAX_UUID_FILTERS`]: ../constant.MAX_UUID_FILTERS.html
    /// [`MAX_ATTR_FILTERS`]: ../constant.MAX_ATTR_FILTERS.html
    pub fn new(
        remote: DeviceAddress,
        db: DiscoveryDb<'a>,
        kind: DiscoveryKind,
        uuid_filters: &[Uuid],
        attr_filters: &[u16],
        mut config: ClientConfig,
    ) -> Result<Self, Error> {
        let uuid_filters = Vec::from_slice(uuid_filters).map_err(|()| Error::InvalidValue)?;
        let attr_filters = Vec::from_slice(attr_filters).map_err(|()| Error::InvalidValue)?;
        config.max_recs_per_search = config.max_recs_per_search.min(MAX_DISC_RECS as u16);

        Ok(Self {
            remote,
            kind,
            config,
            state: DiscState::Idle,
            transaction_id: 0,
            uuid_filters,
            attr_filters,
            handles: [0; MAX_DISC_RECS],
            num_handles: 0,
            cur_handle: 0,
            #[cfg(feature = "browse-plus")]
            cur_uuid_idx: 0,
            rsp_list: Vec::new(),
            db: Some(db),
        })
    }

    /// Selects which UUID filter the next search is built from.
    #[cfg(feature = "browse-plus")]
    pub fn select_uuid_filter(&mut self, index: usize) {
        self.cur_uuid_idx = index;
    }

    /// Called by the host once the L2CAP channel is open; sends the first request.
    pub fn on_connect<C: SdpChannel>(&mut self, channel: &mut C) -> Option<Discovery<'a>> {
        match self.kind {
            DiscoveryKind::SearchAttributes => {
                self.state = DiscState::WaitSearchAttr;
                self.send_search_attr_req(channel, None)
            }
            DiscoveryKind::SearchThenAttributes => {
                // First step is to get a list of the handles from the server; the attributes of
                // each matched record follow one handle at a time.
                self.num_handles = 0;
                self.send_service_search_req(channel, None)
            }
        }
    }

    /// Called by the host for every datagram arriving on the channel.
    ///
    /// Returns `Some` when the discovery reached a terminal state; the host should then release
    /// the channel.
    pub fn on_data<C: SdpChannel>(&mut self, channel: &mut C, pdu: &[u8]) -> Option<Discovery<'a>> {
        // Got a reply, stop the inactivity timer.
        channel.cancel_inactivity_timer();

        let mut r = ByteReader::new(pdu);
        let pdu_id = match r.read_u8() {
            Ok(id) => PduId::from(id),
            Err(_) => return self.finish(Status::GenericError),
        };

        match (pdu_id, self.state) {
            (PduId::ServiceSearchRsp, DiscState::WaitHandles) => {
                self.service_search_rsp(channel, &mut r)
            }
            (PduId::ServiceAttrRsp, DiscState::WaitAttr) => self.service_attr_rsp(channel, &mut r),
            (PduId::ServiceSearchAttrRsp, DiscState::WaitSearchAttr) => {
                self.service_search_attr_rsp(channel, &mut r)
            }
            _ => {
                warn!(
                    "SDP - unexpected PDU {:?} ({} bytes) in state {:?}",
                    pdu_id,
                    pdu.len(),
                    self.state
                );
                self.finish(Status::GenericError)
            }
        }
    }

    /// Called by the host when the inactivity timer fires.
    pub fn on_timeout(&mut self) -> Option<Discovery<'a>> {
        warn!("SDP - inactivity timeout");
        self.finish(Status::Timeout)
    }

    /// Called by the host when the channel is torn down mid-discovery.
    pub fn on_disconnect(&mut self) -> Option<Discovery<'a>> {
        self.finish(Status::Disconnected)
    }

    /// Terminates the discovery and moves the database back out.
    fn finish(&mut self, status: Status) -> Option<Discovery<'a>> {
        self.state = DiscState::Done;
        self.rsp_list.clear();
        trace!("SDP - discovery finished: {:?}", status);
        self.db.take().map(|db| Discovery { status, db })
    }

    fn next_transaction_id(&mut self) -> u16 {
        let tid = self.transaction_id;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        tid
    }

    #[cfg(not(feature = "browse-plus"))]
    fn active_uuid_filters(&self) -> &[Uuid] {
        &self.uuid_filters
    }

    /// One search per filter; the caller advances the index between searches.
    #[cfg(feature = "browse-plus")]
    fn active_uuid_filters(&self) -> &[Uuid] {
        match self.uuid_filters.get(self.cur_uuid_idx) {
            Some(filter) => core::slice::from_ref(filter),
            None => &[],
        }
    }

    /// Handles a Service Search response: collect handles, follow the continuation, and once
    /// complete move on to the attribute phase.
    fn service_search_rsp<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        r: &mut ByteReader<'_>,
    ) -> Option<Discovery<'a>> {
        // Transaction ID and parameter length are not cross-checked; the transport delivers
        // responses in FIFO order per channel.
        if r.skip(4).is_err() {
            return self.finish(Status::GenericError);
        }
        let (mut total, cur_handles) = match (r.read_u16_be(), r.read_u16_be()) {
            (Ok(total), Ok(cur)) => (total, cur),
            _ => return self.finish(Status::GenericError),
        };

        let orig = self.num_handles;
        self.num_handles = orig.wrapping_add(cur_handles);
        if self.num_handles == 0 || self.num_handles < orig {
            warn!("SDP - service search rsp without matches");
            return self.finish(Status::NoRecsMatch);
        }

        // Save the handles that match. We can only process a bounded number.
        if total > self.config.max_recs_per_search {
            total = self.config.max_recs_per_search;
        }
        if self.num_handles > self.config.max_recs_per_search {
            self.num_handles = self.config.max_recs_per_search;
        }
        trace!("SDP - search rsp: {}/{} handles", self.num_handles, total);

        for i in orig..self.num_handles {
            match r.read_u32_be() {
                Ok(handle) => self.handles[usize::from(i)] = handle,
                Err(_) => return self.finish(Status::GenericError),
            }
        }

        let cont_len = match r.read_u8() {
            Ok(len) => usize::from(len),
            Err(_) => return self.finish(Status::GenericError),
        };
        if cont_len != 0 {
            if cont_len > MAX_CONTINUATION_LEN {
                return self.finish(Status::InvalidContState);
            }
            let bytes = match r.read_slice(cont_len) {
                Ok(bytes) => bytes,
                Err(_) => return self.finish(Status::InvalidContState),
            };
            // Stay in the same state and pick up where the server stopped.
            let cont = ContinuationState::new(bytes);
            self.send_service_search_req(channel, Some(&cont))
        } else {
            self.state = DiscState::WaitAttr;
            // Kick off the first attribute request.
            self.request_next_attr(channel, None)
        }
    }

    /// Handles a Service Attribute response for the current handle.
    fn service_attr_rsp<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        r: &mut ByteReader<'_>,
    ) -> Option<Discovery<'a>> {
        if r.skip(4).is_err() {
            return self.finish(Status::InvalidPduSize);
        }

        match self.absorb_fragment(r) {
            Err(status) => self.finish(status),
            Ok(Continuation::More(cont)) => self.request_next_attr(channel, Some(&cont)),
            Ok(Continuation::Complete) => {
                // Save the response in the database. Stop on any error.
                let saved = match self.db.as_mut() {
                    Some(db) => {
                        let mut list = ByteReader::new(&self.rsp_list);
                        decode::save_attr_seq(db, &self.remote, &mut list)
                    }
                    None => Err(Error::InvalidValue),
                };
                if let Err(e) = saved {
                    warn!("SDP - failed to save attr seq: {:?}", e);
                    return self.finish(Status::DbFull);
                }
                self.rsp_list.clear();
                self.cur_handle += 1;
                self.request_next_attr(channel, None)
            }
        }
    }

    /// Handles a Service Search Attribute response fragment; decodes once complete.
    fn service_search_attr_rsp<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        r: &mut ByteReader<'_>,
    ) -> Option<Discovery<'a>> {
        if r.skip(4).is_err() {
            return self.finish(Status::InvalidPduSize);
        }

        match self.absorb_fragment(r) {
            Err(status) => self.finish(status),
            Ok(Continuation::More(cont)) => self.send_search_attr_req(channel, Some(&cont)),
            Ok(Continuation::Complete) => {
                // We now have the full response, which is a sequence of sequences.
                let status = self.decode_attr_lists();
                self.finish(status)
            }
        }
    }

    /// Appends one response fragment to the scratchpad and classifies the continuation state.
    fn absorb_fragment(&mut self, r: &mut ByteReader<'_>) -> Result<Continuation, Status> {
        let byte_count = match r.read_u16_be() {
            Ok(count) => usize::from(count),
            Err(_) => return Err(Status::InvalidPduSize),
        };

        // Safety check on the length before the scratchpad copy.
        if self.rsp_list.len() + byte_count > MAX_LIST_BYTE_COUNT {
            return Err(Status::InvalidPduSize);
        }
        // The fragment and the continuation length byte must lie within the received PDU.
        let fragment = r.read_slice(byte_count).map_err(|_| Status::InvalidPduSize)?;
        let cont_len = r.read_u8().map_err(|_| Status::InvalidPduSize)?;

        if self.rsp_list.extend_from_slice(fragment).is_err() {
            return Err(Status::InvalidPduSize);
        }

        if cont_len == 0 {
            return Ok(Continuation::Complete);
        }
        if usize::from(cont_len) > MAX_CONTINUATION_LEN {
            return Err(Status::InvalidContState);
        }
        let bytes = r
            .read_slice(usize::from(cont_len))
            .map_err(|_| Status::InvalidContState)?;
        Ok(Continuation::More(ContinuationState::new(bytes)))
    }

    /// Decodes the reassembled combined-search payload: one outer sequence wrapping one
    /// attribute sequence per record.
    fn decode_attr_lists(&mut self) -> Status {
        let db = match self.db.as_mut() {
            Some(db) => db,
            None => return Status::GenericError,
        };

        let mut r = ByteReader::new(&self.rsp_list);
        let hdr = match DataElementHeader::from_bytes(&mut r) {
            Ok(hdr) => hdr,
            Err(_) => {
                warn!("SDP - bad outer length in search attr rsp");
                return Status::IllegalParameter;
            }
        };
        if hdr.ty != ElementType::Sequence {
            warn!("SDP - wrong outer type in search attr rsp");
            return Status::IllegalParameter;
        }
        if hdr.len as usize != r.bytes_left() {
            return Status::InvalidContState;
        }

        while !r.is_empty() {
            if let Err(e) = decode::save_attr_seq(db, &self.remote, &mut r) {
                warn!("SDP - failed to save attr seq: {:?}", e);
                return Status::DbFull;
            }
        }
        Status::Success
    }

    /// Sends a Service Search request, optionally resuming from continuation state.
    fn send_service_search_req<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        cont: Option<&ContinuationState>,
    ) -> Option<Discovery<'a>> {
        let cont_len = cont.map_or(0, |c| c.as_bytes().len());
        // Conservative budget: headroom, request header, parameter length, max record count and
        // the continuation, before the variably-sized UUID sequence.
        let base_bytes = TX_HEADROOM + 3 + 2 + 3 + cont_len;
        if base_bytes > DATA_BUF_SIZE {
            error!("SDP - overran request buffer");
            return self.finish(Status::InvalidContState);
        }
        let uuid_budget = (DATA_BUF_SIZE - base_bytes) as u16;

        let tid = self.next_transaction_id();
        let max_recs = self.config.max_recs_per_search;
        let mut buf = [0; DATA_BUF_SIZE];
        let written = {
            let mut w = ByteWriter::new(&mut buf[TX_HEADROOM..]);
            write_search_req(&mut w, tid, self.active_uuid_filters(), uuid_budget, max_recs, cont)
        };
        let pdu_len = match written {
            Ok(len) => len,
            Err(_) => {
                error!("SDP - overran request buffer");
                return self.finish(Status::InvalidContState);
            }
        };

        self.state = DiscState::WaitHandles;
        channel.send(&buf[TX_HEADROOM..TX_HEADROOM + pdu_len]);
        channel.arm_inactivity_timer(self.config.inactivity_timeout);
        None
    }

    /// Sends the Service Attribute request for the current handle, or terminates with success
    /// when every handle has been drained.
    fn request_next_attr<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        cont: Option<&ContinuationState>,
    ) -> Option<Discovery<'a>> {
        if self.cur_handle >= self.num_handles {
            return self.finish(Status::Success);
        }

        let cont_len = cont.map_or(0, |c| c.as_bytes().len());
        let base_bytes = TX_HEADROOM + 3 + 2 + 3 + cont_len;
        if base_bytes > DATA_BUF_SIZE {
            error!("SDP - overran request buffer");
            return self.finish(Status::InvalidContState);
        }

        let tid = self.next_transaction_id();
        let handle = self.handles[usize::from(self.cur_handle)];
        let max_bytes = self.config.max_attr_list_size;
        let mut buf = [0; DATA_BUF_SIZE];
        let written = {
            let mut w = ByteWriter::new(&mut buf[TX_HEADROOM..]);
            write_attr_req(&mut w, tid, handle, max_bytes, &self.attr_filters, cont)
        };
        let pdu_len = match written {
            Ok(len) => len,
            Err(_) => {
                error!("SDP - overran request buffer");
                return self.finish(Status::InvalidContState);
            }
        };

        channel.send(&buf[TX_HEADROOM..TX_HEADROOM + pdu_len]);
        channel.arm_inactivity_timer(self.config.inactivity_timeout);
        None
    }

    /// Sends a Service Search Attribute request, optionally resuming from continuation state.
    fn send_search_attr_req<C: SdpChannel>(
        &mut self,
        channel: &mut C,
        cont: Option<&ContinuationState>,
    ) -> Option<Discovery<'a>> {
        let cont_len = cont.map_or(0, |c| c.as_bytes().len());
        let base_bytes = TX_HEADROOM + 3 + 2 + 3 + cont_len;
        if base_bytes > DATA_BUF_SIZE {
            return self.finish(Status::InvalidContState);
        }
        let uuid_budget = (DATA_BUF_SIZE - base_bytes) as u16;

        let tid = self.next_transaction_id();
        let max_bytes = self.config.max_attr_list_size;
        let mut buf = [0; DATA_BUF_SIZE];
        let written = {
            let mut w = ByteWriter::new(&mut buf[TX_HEADROOM..]);
            write_search_attr_req(
                &mut w,
                tid,
                self.active_uuid_filters(),
                uuid_budget,
                max_bytes,
                &self.attr_filters,
                cont,
            )
        };
        let pdu_len = match written {
            Ok(len) => len,
            Err(_) => {
                error!("SDP - overran request buffer");
                return self.finish(Status::InvalidContState);
            }
        };

        channel.send(&buf[TX_HEADROOM..TX_HEADROOM + pdu_len]);
        channel.arm_inactivity_timer(self.config.inactivity_timeout);
        None
    }
}

/// Writes the common request prefix, lets `body` fill in the parameters, and patches the
/// parameter length field afterwards. Returns the full PDU length.
fn write_request(
    w: &mut ByteWriter<'_>,
    pdu_id: PduId,
    tid: u16,
    body: impl FnOnce(&mut ByteWriter<'_>) -> Result<(), Error>,
) -> Result<usize, Error> {
    w.write_u8(pdu_id.into())?;
    w.write_u16_be(tid)?;

    // The parameter length is only known once the body is in place.
    let len_at = w.gap(2)?;
    body(w)?;
    let param_len = w.pos() - len_at - 2;
    w.patch_u16_be(len_at, param_len as u16);

    Ok(w.pos())
}

fn write_search_req(
    w: &mut ByteWriter<'_>,
    tid: u16,
    filters: &[Uuid],
    uuid_budget: u16,
    max_recs: u16,
    cont: Option<&ContinuationState>,
) -> Result<usize, Error> {
    write_request(w, PduId::ServiceSearchReq, tid, |w| {
        data_element::build_uuid_seq(w, filters, uuid_budget)?;
        w.write_u16_be(max_recs)?;
        write_continuation(w, cont)
    })
}

fn write_attr_req(
    w: &mut ByteWriter<'_>,
    tid: u16,
    handle: u32,
    max_bytes: u16,
    attr_filters: &[u16],
    cont: Option<&ContinuationState>,
) -> Result<usize, Error> {
    write_request(w, PduId::ServiceAttrReq, tid, |w| {
        w.write_u32_be(handle)?;
        w.write_u16_be(max_bytes)?;
        data_element::build_attrib_seq(w, attr_filters)?;
        write_continuation(w, cont)
    })
}

fn write_search_attr_req(
    w: &mut ByteWriter<'_>,
    tid: u16,
    filters: &[Uuid],
    uuid_budget: u16,
    max_bytes: u16,
    attr_filters: &[u16],
    cont: Option<&ContinuationState>,
) -> Result<usize, Error> {
    write_request(w, PduId::ServiceSearchAttrReq, tid, |w| {
        data_element::build_uuid_seq(w, filters, uuid_budget)?;
        w.write_u16_be(max_bytes)?;
        data_element::build_attrib_seq(w, attr_filters)?;
        write_continuation(w, cont)
    })
}

fn write_continuation(
    w: &mut ByteWriter<'_>,
    cont: Option<&ContinuationState>,
) -> Result<(), Error> {
    match cont {
        Some(cont) => {
            let bytes = cont.as_bytes();
            w.write_u8(bytes.len() as u8)?;
            w.write_slice(bytes)
        }
        None => w.write_u8(0),
    }
}
