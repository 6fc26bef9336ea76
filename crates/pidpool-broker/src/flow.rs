//! Outbound flow tracking.
//!
//! [`OutboundFlow`] is the per-client bookkeeping between the message flow
//! handlers and the session's packet identifier pool:
//! - starting a QoS 1/2 PUBLISH, SUBSCRIBE or UNSUBSCRIBE takes an id
//! - PUBACK, PUBCOMP, SUBACK and UNSUBACK complete the exchange and return it
//! - a restored session seeds the pool with the ids still in flight
//! - a queue poll reserves a batch of ids and returns what it did not use
//!
//! Pool exhaustion is reported to the caller, which rejects the triggering
//! operation; nothing here waits for an id to come back.

use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use pidpool_core::PacketIdPool;

use crate::config::PoolConfig;
use crate::error::{FlowError, Result};
use crate::session::{ExchangeKind, InflightRecord, SessionSnapshot};

/// An exchange awaiting acknowledgement.
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    pub kind: ExchangeKind,
    /// When the exchange started (or was restored).
    pub started: Instant,
}

impl Exchange {
    fn new(kind: ExchangeKind) -> Self {
        Self {
            kind,
            started: Instant::now(),
        }
    }

    /// Time since the exchange started.
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Per-client tracker of outbound acknowledged exchanges.
pub struct OutboundFlow {
    client_id: String,
    pool: Arc<dyn PacketIdPool>,
    inflight: AHashMap<u16, Exchange>,
    /// Ids taken by `reserve_batch` that are neither tracked nor released yet.
    reserved: AHashSet<u16>,
    window: Option<u16>,
    poll_limit: usize,
}

impl OutboundFlow {
    /// Create a tracker with a fresh pool of the configured strategy.
    pub fn new(client_id: impl Into<String>, config: &PoolConfig) -> Self {
        Self::with_pool(client_id, config.strategy.build(), config)
    }

    /// Create a tracker around an existing pool, e.g. one shared with the
    /// inbound path of the same session.
    pub fn with_pool(
        client_id: impl Into<String>,
        pool: Arc<dyn PacketIdPool>,
        config: &PoolConfig,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            pool,
            inflight: AHashMap::new(),
            reserved: AHashSet::new(),
            window: config.inflight_window(),
            poll_limit: config.poll_limit(),
        }
    }

    /// Client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// The session's packet identifier pool.
    pub fn pool(&self) -> &Arc<dyn PacketIdPool> {
        &self.pool
    }

    /// Number of exchanges awaiting acknowledgement.
    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Check if a packet identifier belongs to an open exchange.
    pub fn is_inflight(&self, packet_id: u16) -> bool {
        self.inflight.contains_key(&packet_id)
    }

    /// The open exchange for a packet identifier.
    pub fn exchange(&self, packet_id: u16) -> Option<&Exchange> {
        self.inflight.get(&packet_id)
    }

    fn check_start(&self, kind: ExchangeKind) -> Result<()> {
        if !kind.requires_packet_id() {
            return Err(FlowError::NoPacketIdRequired);
        }
        match self.window {
            Some(window) if self.inflight.len() >= usize::from(window) => {
                Err(FlowError::InflightLimit(window))
            }
            _ => Ok(()),
        }
    }

    /// Start an exchange with a newly taken packet identifier.
    pub fn begin(&mut self, kind: ExchangeKind) -> Result<u16> {
        self.check_start(kind)?;
        let packet_id = self.pool.take_next_id().inspect_err(|_| {
            log::warn!(
                "No packet id available for client {:?} ({} in flight)",
                self.client_id,
                self.inflight.len()
            );
        })?;
        match self.inflight.entry(packet_id) {
            Entry::Occupied(_) => {
                // Another user of a shared pool returned an id this flow still
                // tracks. The pool holds it again, so the open exchange keeps it.
                log::error!(
                    "Client {:?}: pool handed out packet_id={} which is still in flight",
                    self.client_id,
                    packet_id
                );
                Err(FlowError::AlreadyInflight(packet_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(Exchange::new(kind));
                log::trace!(
                    "Client {:?}: started {:?} with packet_id={}",
                    self.client_id,
                    kind,
                    packet_id
                );
                Ok(packet_id)
            }
        }
    }

    /// Start an exchange that must use `packet_id`, e.g. a queued message
    /// that already carries one.
    ///
    /// If the pool hands out a different id the substitute is returned
    /// immediately and the call fails with [`FlowError::IdMismatch`].
    pub fn begin_with_id(&mut self, kind: ExchangeKind, packet_id: u16) -> Result<u16> {
        self.check_start(kind)?;
        if self.inflight.contains_key(&packet_id) {
            return Err(FlowError::AlreadyInflight(packet_id));
        }
        let assigned = self.pool.take_if_available(packet_id)?;
        if assigned != packet_id {
            self.pool.return_id(assigned)?;
            return Err(FlowError::IdMismatch {
                requested: packet_id,
                assigned,
            });
        }
        self.inflight.insert(packet_id, Exchange::new(kind));
        Ok(packet_id)
    }

    /// Complete the exchange for `packet_id` and return the id to the pool.
    ///
    /// Returns `None` for ids with no open exchange, such as a duplicate
    /// acknowledgement.
    pub fn complete(&mut self, packet_id: u16) -> Option<Exchange> {
        let Some(exchange) = self.inflight.remove(&packet_id) else {
            log::debug!(
                "Client {:?}: acknowledgement for unknown packet_id={}",
                self.client_id,
                packet_id
            );
            return None;
        };
        if let Err(e) = self.pool.return_id(packet_id) {
            log::warn!(
                "Client {:?}: failed to return packet_id={}: {}",
                self.client_id,
                packet_id,
                e
            );
        }
        Some(exchange)
    }

    /// Reserve packet identifiers for one queue poll.
    ///
    /// The ids are held but not tracked; hand the ones that end up carrying a
    /// message to [`track_reserved`](Self::track_reserved) and the rest to
    /// [`release_unused`](Self::release_unused).
    pub fn reserve_batch(&mut self) -> Result<Vec<u16>> {
        let ids = self.pool.take_batch(self.poll_limit).map_err(|e| {
            log::error!(
                "No packet ids available for client {:?} (poll limit {})",
                self.client_id,
                self.poll_limit
            );
            FlowError::from(e)
        })?;
        self.reserved.extend(ids.iter().copied());
        Ok(ids)
    }

    /// Number of reserved ids not yet tracked or released.
    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    /// Register an exchange for an id obtained from [`reserve_batch`](Self::reserve_batch).
    ///
    /// Fails with [`FlowError::IdNotReserved`] for ids this flow did not
    /// reserve, since the pool may have handed those to someone else.
    pub fn track_reserved(&mut self, packet_id: u16, kind: ExchangeKind) -> Result<()> {
        if !kind.requires_packet_id() {
            return Err(FlowError::NoPacketIdRequired);
        }
        if self.inflight.contains_key(&packet_id) {
            return Err(FlowError::AlreadyInflight(packet_id));
        }
        if !self.reserved.remove(&packet_id) {
            return Err(FlowError::IdNotReserved(packet_id));
        }
        self.inflight.insert(packet_id, Exchange::new(kind));
        Ok(())
    }

    /// Return reserved ids that did not end up carrying a message.
    ///
    /// Ids that are in flight or were never reserved stay with their owner.
    pub fn release_unused(&mut self, packet_ids: &[u16]) {
        for &packet_id in packet_ids {
            if self.inflight.contains_key(&packet_id) {
                log::warn!(
                    "Client {:?}: not releasing packet_id={}, it is in flight",
                    self.client_id,
                    packet_id
                );
                continue;
            }
            if !self.reserved.remove(&packet_id) {
                log::warn!(
                    "Client {:?}: not releasing packet_id={}, it was not reserved",
                    self.client_id,
                    packet_id
                );
                continue;
            }
            if let Err(e) = self.pool.return_id(packet_id) {
                log::warn!(
                    "Client {:?}: failed to release packet_id={}: {}",
                    self.client_id,
                    packet_id,
                    e
                );
            }
        }
    }

    /// Seed the pool with a persisted session's in-flight ids and resume
    /// tracking their exchanges. Must run before new traffic starts.
    ///
    /// Fails with [`FlowError::AlreadyInflight`], leaving everything as it
    /// was, if a snapshot id is already tracked, appears twice, or is held in
    /// the pool by someone else.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<()> {
        if snapshot.client_id != self.client_id {
            log::warn!(
                "Restoring session of {:?} into tracker for {:?}",
                snapshot.client_id,
                self.client_id
            );
        }
        let packet_ids = snapshot.packet_ids();
        let mut seen = AHashSet::with_capacity(packet_ids.len());
        for &packet_id in &packet_ids {
            if !seen.insert(packet_id)
                || self.inflight.contains_key(&packet_id)
                || self.pool.is_in_use(packet_id)
            {
                log::warn!(
                    "Client {:?}: cannot restore packet_id={}, it is already in use",
                    self.client_id,
                    packet_id
                );
                return Err(FlowError::AlreadyInflight(packet_id));
            }
        }
        self.pool.prepopulate_with_unavailable_ids(&packet_ids)?;
        for record in &snapshot.inflight {
            self.inflight
                .insert(record.packet_id, Exchange::new(record.kind));
        }
        log::debug!(
            "Session restore: {} in-flight exchanges for client {:?}",
            snapshot.inflight.len(),
            self.client_id
        );
        Ok(())
    }

    /// In-flight exchanges for persistence, ascending by packet id.
    pub fn snapshot(&self) -> SessionSnapshot {
        let mut inflight: Vec<InflightRecord> = self
            .inflight
            .iter()
            .map(|(&packet_id, exchange)| InflightRecord {
                packet_id,
                kind: exchange.kind,
            })
            .collect();
        inflight.sort_unstable_by_key(|r| r.packet_id);
        SessionSnapshot {
            client_id: self.client_id.clone(),
            inflight,
        }
    }

    /// Return every open and reserved id to the pool (session end). Returns
    /// how many exchanges were dropped.
    pub fn terminate(&mut self) -> usize {
        let count = self.inflight.len();
        for (packet_id, _) in self.inflight.drain() {
            // Ids in the map were handed out by the pool, so they are legal.
            let _ = self.pool.return_id(packet_id);
        }
        for packet_id in self.reserved.drain() {
            let _ = self.pool.return_id(packet_id);
        }
        if count > 0 {
            log::debug!(
                "Client {:?}: dropped {} in-flight exchanges",
                self.client_id,
                count
            );
        }
        count
    }

    /// Forget all state (clean session connect).
    pub fn clear(&mut self) {
        self.inflight.clear();
        self.reserved.clear();
        self.pool.clear();
    }
}
