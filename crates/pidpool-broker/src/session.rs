//! Persisted in-flight state consumed by the session restore path.
//!
//! On reconnect with a persistent session, the persistence layer hands over
//! the packet identifiers that were still in flight when the previous
//! connection dropped. They must be marked unavailable in the new session's
//! pool before any new exchange starts, or a fresh PUBLISH could reuse an id
//! the client still associates with an unacknowledged message.

/// Quality of service level of an outbound PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// The acknowledged exchange a packet identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// PUBLISH awaiting PUBACK (QoS 1) or PUBREC/PUBCOMP (QoS 2).
    Publish(QoS),
    /// SUBSCRIBE awaiting SUBACK.
    Subscribe,
    /// UNSUBSCRIBE awaiting UNSUBACK.
    Unsubscribe,
}

impl ExchangeKind {
    /// Whether this exchange carries a packet identifier.
    ///
    /// [MQTT-2.3.1-5] A PUBLISH packet MUST NOT contain a Packet Identifier if its QoS value is set to 0.
    #[inline]
    pub fn requires_packet_id(self) -> bool {
        !matches!(self, ExchangeKind::Publish(QoS::AtMostOnce))
    }
}

/// One in-flight exchange as recorded by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflightRecord {
    pub packet_id: u16,
    pub kind: ExchangeKind,
}

/// The in-flight part of a persisted client session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Client identifier.
    pub client_id: String,
    /// Exchanges still awaiting acknowledgement, ascending by packet id.
    pub inflight: Vec<InflightRecord>,
}

impl SessionSnapshot {
    /// Create an empty snapshot for a client.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            inflight: Vec::new(),
        }
    }

    /// Record an in-flight exchange.
    pub fn with_inflight(mut self, packet_id: u16, kind: ExchangeKind) -> Self {
        self.inflight.push(InflightRecord { packet_id, kind });
        self
    }

    /// Packet identifiers of all recorded exchanges.
    pub fn packet_ids(&self) -> Vec<u16> {
        self.inflight.iter().map(|r| r.packet_id).collect()
    }

    /// Whether nothing was in flight.
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}
