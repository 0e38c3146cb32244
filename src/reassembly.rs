//! Per-connection TCP byte reassembly.
//!
//! `RingBuffer` owns a growable region and supports append/peek/consume
//! instead of a one-shot borrow over a caller-supplied slice.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Instant;

/// The 4-tuple identifying a TCP connection, as handed to the core by the
/// link-layer reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourTuple {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

/// An append-only byte ring with a read cursor and a write cursor.
///
/// Not thread-safe and not meant to be: one buffer per connection, one
/// decoding thread per buffer, held by exclusive borrow for the duration
/// of one parse.
#[derive(Debug, Default)]
pub struct RingBuffer {
    data: Vec<u8>,
    r: usize,
    w: usize,
}

impl RingBuffer {
    pub fn new() -> Self {
        RingBuffer {
            data: Vec::new(),
            r: 0,
            w: 0,
        }
    }

    /// Bytes available to read right now.
    pub fn available(&self) -> usize {
        self.w - self.r
    }

    /// Append bytes, growing capacity if needed. Never fails.
    pub fn append(&mut self, bytes: &[u8]) {
        if self.w + bytes.len() > self.data.len() {
            self.compact();
        }
        if self.w + bytes.len() > self.data.len() {
            self.data.resize(self.w + bytes.len(), 0);
        }
        self.data[self.w..self.w + bytes.len()].copy_from_slice(bytes);
        self.w += bytes.len();
    }

    /// Borrow the next `n` unread bytes without consuming them. `None` if
    /// fewer than `n` bytes are available.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        if self.available() < n {
            return None;
        }
        Some(&self.data[self.r..self.r + n])
    }

    /// Advance the read cursor past `n` bytes. `None` (no side effect) if
    /// fewer than `n` bytes are available.
    pub fn consume(&mut self, n: usize) -> Option<()> {
        if self.available() < n {
            return None;
        }
        self.r += n;
        if self.r == self.w {
            self.r = 0;
            self.w = 0;
        }
        Some(())
    }

    /// Shift unread bytes down to offset 0, reclaiming space ahead of `w`.
    /// Opaque to callers: cursors may silently reset after a `consume`.
    fn compact(&mut self) {
        if self.r == 0 {
            return;
        }
        self.data.copy_within(self.r..self.w, 0);
        self.w -= self.r;
        self.r = 0;
    }
}

/// Per-connection reassembly buffers, keyed by 4-tuple, plus the
/// last-activity timestamp each needs for idle expiry.
///
/// Mutated only from the capture dispatch thread (§5): no internal
/// synchronization is provided.
#[derive(Default)]
pub struct ConnectionMap {
    connections: HashMap<FourTuple, (RingBuffer, Instant)>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        ConnectionMap {
            connections: HashMap::new(),
        }
    }

    /// Fetch the buffer for a connection, creating it on first payload
    /// arrival, and touch its last-activity timestamp.
    pub fn get_or_create(&mut self, tuple: FourTuple, now: Instant) -> &mut RingBuffer {
        let entry = self
            .connections
            .entry(tuple)
            .or_insert_with(|| (RingBuffer::new(), now));
        entry.1 = now;
        &mut entry.0
    }

    /// Remove connections whose last activity precedes `now - timeout`.
    pub fn sweep_idle(&mut self, now: Instant, timeout: std::time::Duration) {
        self.connections.retain(|tuple, (_, last_seen)| {
            let keep = now.duration_since(*last_seen) < timeout;
            if !keep {
                tracing::info!(
                    src = %tuple.src_ip, src_port = tuple.src_port,
                    dst = %tuple.dst_ip, dst_port = tuple.dst_port,
                    "connection closed (idle expiry)"
                );
            }
            keep
        });
    }

    pub fn contains(&self, tuple: &FourTuple) -> bool {
        self.connections.contains_key(tuple)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
