//! Fragmentation and reassembly of payloads larger than one wire packet.
//!
//! Every fragment travels as its own `Fragment` wire packet. Its payload begins
//! with a sub-header naming the group it belongs to:
//!
//! ```text
//! [group_id: u32 BE][index: u16 BE][count: u16 BE][data...]
//! ```
//!
//! The receiver keeps one [`FragmentGroup`] per group id until every index in
//! `0..count` has arrived, then concatenates the chunks in index order.

use crate::core::header::PacketFlags;
use crate::error::{constants, ProtocolError, Result};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// Encoded fragment sub-header length.
pub const FRAGMENT_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub group_id: u32,
    pub index: u16,
    pub count: u16,
}

impl FragmentHeader {
    pub fn to_bytes(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let mut out = [0u8; FRAGMENT_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.group_id.to_be_bytes());
        out[4..6].copy_from_slice(&self.index.to_be_bytes());
        out[6..8].copy_from_slice(&self.count.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FRAGMENT_HEADER_SIZE {
            return Err(ProtocolError::InvalidPacket(constants::ERR_SHORT_FRAGMENT));
        }
        let header = Self {
            group_id: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            index: u16::from_be_bytes([bytes[4], bytes[5]]),
            count: u16::from_be_bytes([bytes[6], bytes[7]]),
        };
        if header.index >= header.count {
            return Err(ProtocolError::InvalidPacket(constants::ERR_FRAGMENT_INDEX));
        }
        Ok(header)
    }
}

/// One chunk of a fragmented payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub data: Vec<u8>,
}

impl Fragment {
    /// Sub-header followed by the chunk, ready to be a wire payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_SIZE + self.data.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse a `Fragment` wire payload.
    ///
    /// # Errors
    /// `ProtocolError::InvalidPacket` for a short sub-header or `index >= count`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let header = FragmentHeader::from_bytes(payload)?;
        Ok(Self {
            header,
            data: payload[FRAGMENT_HEADER_SIZE..].to_vec(),
        })
    }
}

/// Split `payload` into `ceil(len / max_fragment_size)` fragments of group `group_id`.
///
/// # Errors
/// - `ProtocolError::ConfigError` if `max_fragment_size` is zero
/// - `ProtocolError::OversizedPacket` if the count does not fit in `u16`
pub fn fragment(payload: &[u8], max_fragment_size: usize, group_id: u32) -> Result<Vec<Fragment>> {
    if max_fragment_size == 0 {
        return Err(ProtocolError::ConfigError(
            "max_fragment_size must be greater than zero".to_string(),
        ));
    }

    let count = payload.len().div_ceil(max_fragment_size).max(1);
    let count = u16::try_from(count).map_err(|_| ProtocolError::OversizedPacket(payload.len()))?;

    if payload.is_empty() {
        return Ok(vec![Fragment {
            header: FragmentHeader {
                group_id,
                index: 0,
                count,
            },
            data: Vec::new(),
        }]);
    }

    Ok(payload
        .chunks(max_fragment_size)
        .enumerate()
        .map(|(index, chunk)| Fragment {
            header: FragmentHeader {
                group_id,
                index: index as u16,
                count,
            },
            data: chunk.to_vec(),
        })
        .collect())
}

/// Partially received fragmented payload.
#[derive(Debug)]
pub struct FragmentGroup {
    pub group_id: u32,
    pub count: u16,
    parts: BTreeMap<u16, Vec<u8>>,
    received_bytes: usize,
    pub created_at: Instant,
    /// Highest wire sequence among the fragments seen so far
    pub max_sequence: u32,
    pub flags: PacketFlags,
    pub packet_type: u16,
}

impl FragmentGroup {
    fn new(header: FragmentHeader, sequence: u32, flags: PacketFlags, packet_type: u16, now: Instant) -> Self {
        Self {
            group_id: header.group_id,
            count: header.count,
            parts: BTreeMap::new(),
            received_bytes: 0,
            created_at: now,
            max_sequence: sequence,
            flags,
            packet_type,
        }
    }

    pub fn received(&self) -> usize {
        self.parts.len()
    }

    fn is_complete(&self) -> bool {
        self.parts.len() == self.count as usize
    }

    fn assemble(self) -> Reassembled {
        let mut payload = Vec::with_capacity(self.received_bytes);
        for chunk in self.parts.into_values() {
            payload.extend_from_slice(&chunk);
        }
        let mut flags = self.flags;
        flags.remove(PacketFlags::FRAGMENTED);
        Reassembled {
            payload,
            flags,
            packet_type: self.packet_type,
            max_sequence: self.max_sequence,
        }
    }
}

/// A fully reassembled payload plus the metadata its fragments carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassembled {
    pub payload: Vec<u8>,
    /// Flags of the fragments with `FRAGMENTED` cleared
    pub flags: PacketFlags,
    pub packet_type: u16,
    pub max_sequence: u32,
}

/// Per-connection reassembly buffers.
#[derive(Debug)]
pub struct FragmentAssembler {
    groups: HashMap<u32, FragmentGroup>,
    timeout: Duration,
    max_pending_groups: usize,
    max_payload_size: usize,
    evicted: u64,
}

impl FragmentAssembler {
    pub fn new(timeout: Duration, max_pending_groups: usize, max_payload_size: usize) -> Self {
        Self {
            groups: HashMap::new(),
            timeout,
            max_pending_groups,
            max_payload_size,
            evicted: 0,
        }
    }

    /// Add a fragment that arrived in wire packet `sequence`.
    ///
    /// Returns the payload once, when the last missing index arrives. Repeated
    /// indices are ignored.
    ///
    /// # Errors
    /// - `ProtocolError::InvalidPacket` if `count` disagrees with the known group
    ///   or `index >= count`
    /// - `ProtocolError::OversizedPacket` if the group grows past the payload limit;
    ///   the group is discarded
    pub fn reassemble(
        &mut self,
        fragment: Fragment,
        sequence: u32,
        flags: PacketFlags,
        packet_type: u16,
        now: Instant,
    ) -> Result<Option<Reassembled>> {
        let Fragment { header, data } = fragment;
        if header.index >= header.count {
            return Err(ProtocolError::InvalidPacket(constants::ERR_FRAGMENT_INDEX));
        }

        if let Some(group) = self.groups.get(&header.group_id) {
            if group.count != header.count {
                return Err(ProtocolError::InvalidPacket(constants::ERR_FRAGMENT_COUNT));
            }
        } else {
            if self.groups.len() >= self.max_pending_groups {
                self.evict_oldest();
            }
            self.groups.insert(
                header.group_id,
                FragmentGroup::new(header, sequence, flags, packet_type, now),
            );
        }

        let Some(group) = self.groups.get_mut(&header.group_id) else {
            return Ok(None);
        };

        if group.parts.contains_key(&header.index) {
            return Ok(None);
        }

        group.received_bytes += data.len();
        if group.received_bytes > self.max_payload_size {
            let total = group.received_bytes;
            self.groups.remove(&header.group_id);
            return Err(ProtocolError::OversizedPacket(total));
        }

        group.max_sequence = group.max_sequence.max(sequence);
        group.parts.insert(header.index, data);

        if !group.is_complete() {
            return Ok(None);
        }

        Ok(self.groups.remove(&header.group_id).map(FragmentGroup::assemble))
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .groups
            .values()
            .min_by_key(|group| group.created_at)
            .map(|group| group.group_id);

        if let Some(group_id) = oldest {
            debug!(group_id, "Evicting oldest fragment group");
            self.groups.remove(&group_id);
            self.evicted += 1;
        }
    }

    /// Discard groups older than the fragment timeout. Returns how many were dropped.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let before = self.groups.len();
        self.groups.retain(|group_id, group| {
            let alive = now.saturating_duration_since(group.created_at) < timeout;
            if !alive {
                debug!(
                    group_id = *group_id,
                    received = group.received(),
                    count = group.count,
                    "Fragment group timed out"
                );
            }
            alive
        });
        before - self.groups.len()
    }

    /// Groups evicted for capacity since the last call.
    pub fn take_evicted(&mut self) -> u64 {
        std::mem::take(&mut self.evicted)
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assembler() -> FragmentAssembler {
        FragmentAssembler::new(Duration::from_secs(5), 8, 1 << 20)
    }

    fn feed(
        assembler: &mut FragmentAssembler,
        fragment: &Fragment,
        now: Instant,
    ) -> Option<Reassembled> {
        assembler
            .reassemble(
                fragment.clone(),
                fragment.header.index as u32,
                PacketFlags::FRAGMENTED | PacketFlags::RELIABLE,
                9,
                now,
            )
            .unwrap()
    }

    #[test]
    fn test_split_sizes() {
        let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let fragments = fragment(&payload, 1400, 1).unwrap();
        let sizes: Vec<usize> = fragments.iter().map(|f| f.data.len()).collect();
        assert_eq!(sizes, vec![1400, 1400, 1400, 800]);
        assert!(fragments.iter().all(|f| f.header.count == 4));
    }

    #[test]
    fn test_reassemble_out_of_order() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let fragments = fragment(&payload, 1400, 7).unwrap();
        let mut assembler = assembler();
        let now = Instant::now();

        for index in [2, 0, 3] {
            assert!(feed(&mut assembler, &fragments[index], now).is_none());
        }
        let done = feed(&mut assembler, &fragments[1], now).unwrap();
        assert_eq!(done.payload, payload);
        assert_eq!(done.packet_type, 9);
        assert_eq!(done.max_sequence, 3);
        assert!(!done.flags.is_fragmented());
        assert!(done.flags.is_reliable());
        assert_eq!(assembler.pending_groups(), 0);
    }

    #[test]
    fn test_duplicate_index_ignored() {
        let fragments = fragment(&[5u8; 30], 10, 3).unwrap();
        let mut assembler = assembler();
        let now = Instant::now();

        assert!(feed(&mut assembler, &fragments[0], now).is_none());
        assert!(feed(&mut assembler, &fragments[0], now).is_none());
        assert!(feed(&mut assembler, &fragments[1], now).is_none());
        assert!(feed(&mut assembler, &fragments[2], now).is_some());
        // completed groups are gone; a late duplicate starts nothing useful
        assert!(feed(&mut assembler, &fragments[2], now).is_none());
    }

    #[test]
    fn test_missing_fragment_never_completes() {
        let fragments = fragment(&[1u8; 40], 10, 4).unwrap();
        let mut assembler = assembler();
        let now = Instant::now();
        for f in fragments.iter().skip(1) {
            assert!(feed(&mut assembler, f, now).is_none());
        }
        assert_eq!(assembler.pending_groups(), 1);
    }

    #[test]
    fn test_inconsistent_count_rejected() {
        let mut assembler = assembler();
        let now = Instant::now();
        let first = Fragment {
            header: FragmentHeader {
                group_id: 1,
                index: 0,
                count: 3,
            },
            data: vec![1],
        };
        let liar = Fragment {
            header: FragmentHeader {
                group_id: 1,
                index: 1,
                count: 4,
            },
            data: vec![2],
        };
        feed(&mut assembler, &first, now);
        let result = assembler.reassemble(liar, 1, PacketFlags::FRAGMENTED, 9, now);
        assert!(matches!(result, Err(ProtocolError::InvalidPacket(_))));
    }

    #[test]
    fn test_index_out_of_range_rejected() {
        let bytes = FragmentHeader {
            group_id: 1,
            index: 3,
            count: 3,
        }
        .to_bytes();
        assert!(matches!(
            Fragment::decode(&bytes),
            Err(ProtocolError::InvalidPacket(_))
        ));
        assert!(Fragment::decode(&bytes[..5]).is_err());
    }

    #[test]
    fn test_expire_drops_old_groups() {
        let fragments = fragment(&[1u8; 20], 10, 2).unwrap();
        let mut assembler = assembler();
        let start = Instant::now();
        feed(&mut assembler, &fragments[0], start);

        assert_eq!(assembler.expire(start + Duration::from_secs(4)), 0);
        assert_eq!(assembler.expire(start + Duration::from_secs(5)), 1);
        assert_eq!(assembler.pending_groups(), 0);
    }

    #[test]
    fn test_oldest_group_evicted_at_capacity() {
        let mut assembler = FragmentAssembler::new(Duration::from_secs(5), 2, 1 << 20);
        let start = Instant::now();
        for (offset, group) in [1u32, 2, 3].into_iter().enumerate() {
            let fragments = fragment(&[0u8; 20], 10, group).unwrap();
            feed(
                &mut assembler,
                &fragments[0],
                start + Duration::from_millis(offset as u64),
            );
        }
        assert_eq!(assembler.pending_groups(), 2);
        assert_eq!(assembler.take_evicted(), 1);
        assert_eq!(assembler.take_evicted(), 0);
    }

    #[test]
    fn test_payload_limit_discards_group() {
        let mut assembler = FragmentAssembler::new(Duration::from_secs(5), 8, 15);
        let fragments = fragment(&[0u8; 20], 10, 1).unwrap();
        let now = Instant::now();
        feed(&mut assembler, &fragments[0], now);
        let result = assembler.reassemble(fragments[1].clone(), 1, PacketFlags::FRAGMENTED, 9, now);
        assert!(matches!(result, Err(ProtocolError::OversizedPacket(20))));
        assert_eq!(assembler.pending_groups(), 0);
    }

    #[test]
    fn test_fragment_argument_errors() {
        assert!(matches!(
            fragment(b"abc", 0, 1),
            Err(ProtocolError::ConfigError(_))
        ));
        let huge = vec![0u8; (u16::MAX as usize + 1) * 2];
        assert!(matches!(
            fragment(&huge, 1, 1),
            Err(ProtocolError::OversizedPacket(_))
        ));
    }

    #[test]
    fn test_encode_decode() {
        let fragments = fragment(b"hello world", 4, 77).unwrap();
        let decoded = Fragment::decode(&fragments[2].encode()).unwrap();
        assert_eq!(decoded, fragments[2]);
        assert_eq!(decoded.data, b"rld");
    }
}
