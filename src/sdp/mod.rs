//! Implementation of the Service Discovery Protocol (SDP) client role.
//!
//! SDP runs over a connection-oriented L2CAP channel negotiated on PSM `0x0001`. A discovery is
//! a short-lived conversation: the client sends one of three request PDUs, the server answers
//! with the matching response, and large responses are split across rounds using an opaque
//! *continuation state* that the client echoes back verbatim.
//!
//! This module is split along the lifetime of a response byte:
//!
//! * [`data_element`]: the self-describing element (TLV) grammar all SDP values use.
//! * [`db`]: the arena database the decoded attribute trees are persisted into.
//! * `decode`: turns a reassembled attribute list into records and attributes.
//! * [`client`]: the per-channel session: request building, fragment reassembly, and the
//!   discovery state machine.
//!
//! The server role (publishing local records) is not implemented.
//!
//! [`data_element`]: data_element/index.html
//! [`db`]: db/index.html
//! [`client`]: client/index.html

pub mod client;
pub mod data_element;
pub mod db;
mod decode;

use crate::time::Duration;

/// Upper bound on the opaque continuation state a server may hand out, in bytes.
pub const MAX_CONTINUATION_LEN: usize = 16;

/// Capacity of the response reassembly scratchpad, and thus the largest attribute list a single
/// discovery round can return.
pub const MAX_LIST_BYTE_COUNT: usize = 4096;

/// Maximum number of record handles kept per service search.
pub const MAX_DISC_RECS: usize = 21;

/// Maximum number of UUID filters in a discovery request.
pub const MAX_UUID_FILTERS: usize = 3;

/// Maximum number of attribute-ID filters in a discovery request.
pub const MAX_ATTR_FILTERS: usize = 15;

/// Attribute nesting levels beyond this depth are dropped by the decoder.
pub const MAX_NEST_LEVELS: u8 = 5;

/// Size of the buffer outgoing requests are assembled in.
pub(crate) const DATA_BUF_SIZE: usize = 1024;

/// Headroom reserved at the front of every outgoing buffer for the headers the lower layers
/// prepend in place.
pub(crate) const TX_HEADROOM: usize = 13;

/// Only the low 12 bits of an element length are kept in a stored attribute descriptor.
pub(crate) const ATTR_LEN_MASK: u16 = 0x0fff;

/// ServiceClassIDList attribute ID.
pub const ATTR_ID_SERVICE_CLASS_ID_LIST: u16 = 0x0001;
/// ProtocolDescriptorList attribute ID.
pub const ATTR_ID_PROTOCOL_DESC_LIST: u16 = 0x0004;
/// AdditionalProtocolDescriptorLists attribute ID.
pub const ATTR_ID_ADDITIONAL_PROTO_DESC_LISTS: u16 = 0x000d;

enum_with_unknown! {
    /// Identifies an SDP PDU.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
    pub enum PduId(u8) {
        /// Server could not process the matching request.
        ErrorRsp = 0x01,
        ServiceSearchReq = 0x02,
        ServiceSearchRsp = 0x03,
        ServiceAttrReq = 0x04,
        ServiceAttrRsp = 0x05,
        ServiceSearchAttrReq = 0x06,
        ServiceSearchAttrRsp = 0x07,
    }
}

/// Terminal status of a discovery, reported to the caller together with the database.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum Status {
    /// The discovery ran to completion; every matching record is in the database.
    Success,
    /// The service search matched no records on the remote.
    NoRecsMatch,
    /// A response carried a length that contradicts the received PDU or would overflow the
    /// reassembly scratchpad.
    InvalidPduSize,
    /// A continuation state was malformed, or a request could not be built within the outgoing
    /// buffer budget.
    InvalidContState,
    /// The discovery database could not fit the response.
    DbFull,
    /// The reassembled attribute list failed structural validation.
    IllegalParameter,
    /// An unexpected or truncated PDU arrived for the current phase.
    GenericError,
    /// The remote did not answer within the inactivity timeout.
    Timeout,
    /// The transport was disconnected mid-discovery.
    Disconnected,
}

impl Status {
    /// Returns whether the discovery completed successfully.
    pub fn is_success(&self) -> bool {
        *self == Status::Success
    }
}

/// Selects which request flow a discovery session uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, defmt::Format)]
pub enum DiscoveryKind {
    /// A Service Search transaction for the record handles, followed by one Service Attribute
    /// transaction per matched record.
    SearchThenAttributes,
    /// A single combined Service Search Attribute transaction.
    SearchAttributes,
}

/// Process-wide discovery knobs, fixed for the lifetime of a session.
#[derive(Debug, Copy, Clone)]
pub struct ClientConfig {
    /// Most record handles requested from (and accepted of) a service search. Clamped to
    /// [`MAX_DISC_RECS`].
    ///
    /// [`MAX_DISC_RECS`]: constant.MAX_DISC_RECS.html
    pub max_recs_per_search: u16,
    /// Largest attribute list byte count requested per response.
    pub max_attr_list_size: u16,
    /// How long to wait for a response before the host's timer fires.
    pub inactivity_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_recs_per_search: MAX_DISC_RECS as u16,
            max_attr_list_size: 350,
            inactivity_timeout: Duration::from_secs(30),
        }
    }
}

/// Opaque continuation state echoed back to the server to resume a fragmented response.
#[derive(Debug, Copy, Clone)]
pub struct ContinuationState {
    len: u8,
    bytes: [u8; MAX_CONTINUATION_LEN],
}

impl ContinuationState {
    /// Wraps the continuation bytes of a response.
    ///
    /// `bytes` must have been length-validated by the caller (at most [`MAX_CONTINUATION_LEN`]).
    ///
    /// [`MAX_CONTINUATION_LEN`]: constant.MAX_CONTINUATION_LEN.html
    pub(crate) fn new(bytes: &[u8]) -> Self {
        let mut buf = [0; MAX_CONTINUATION_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Self {
            len: bytes.len() as u8,
            bytes: buf,
        }
    }

    /// Returns the continuation bytes to echo back (without the leading length byte).
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }
}

/// Host-provided services of the L2CAP channel a discovery session is bound to.
///
/// The host stack implements this once per platform. Both operations must be non-blocking;
/// the session calls them from within its event entry points.
pub trait SdpChannel {
    /// Enqueues one SDP PDU towards the remote.
    ///
    /// The PDU is complete; the implementation prepends its own L2CAP/HCI headers. Delivery must
    /// preserve per-channel FIFO order. Like the underlying datagram write, this cannot fail
    /// towards the caller; transport breakdown is reported through a later disconnect event.
    fn send(&mut self, pdu: &[u8]);

    /// (Re-)arms the channel's inactivity timer.
    ///
    /// When the timer expires before being cancelled, the host must call
    /// [`DiscoverySession::on_timeout`].
    ///
    /// [`DiscoverySession::on_timeout`]: client/struct.DiscoverySession.html#method.on_timeout
    fn arm_inactivity_timer(&mut self, timeout: Duration);

    /// Cancels the channel's inactivity timer if it is armed.
    fn cancel_inactivity_timer(&mut self);
}

pub use self::client::{Discovery, DiscoverySession};
pub use self::db::{AttrValue, Attribute, Attributes, DiscoveryDb, Record, Records};
