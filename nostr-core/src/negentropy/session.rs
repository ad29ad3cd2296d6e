//! Range-based set reconciliation session.

use std::collections::HashSet;

use super::codec::{encode_varint, Reader};
use super::error::{NegentropyError, Result};
use super::storage::NegentropyStorageVector;
use super::types::{minimal_bound, Bound, Mode};
use super::{FINGERPRINT_SIZE, ID_SIZE, MIN_FRAME_SIZE_LIMIT, PROTOCOL_VERSION};

/// Ranges with fewer items than this are sent as id lists.
const BUCKETS: usize = 16;

/// Headroom kept below the frame size limit for the trailing fingerprint.
const FRAME_SLACK: usize = 200;

/// One side of a negentropy exchange over a sealed storage vector.
///
/// The side that calls [`initiate`](Self::initiate) is the initiator; a
/// session that only ever calls [`reconcile`](Self::reconcile) is the
/// responder.
#[derive(Debug)]
pub struct Negentropy {
    storage: NegentropyStorageVector,
    frame_size_limit: u64,
    is_initiator: bool,
}

/// Delta-encoding state for the timestamps of one message.
#[derive(Debug, Default)]
struct Cursors {
    last_in: u64,
    last_out: u64,
}

impl Cursors {
    fn encode_timestamp(&mut self, timestamp: u64, out: &mut Vec<u8>) {
        if timestamp == u64::MAX {
            self.last_out = u64::MAX;
            encode_varint(0, out);
            return;
        }
        let delta = timestamp.saturating_sub(self.last_out);
        self.last_out = timestamp;
        encode_varint(delta.saturating_add(1), out);
    }

    fn decode_timestamp(&mut self, reader: &mut Reader<'_>) -> Result<u64> {
        let encoded = reader.read_varint()?;
        if encoded == 0 || self.last_in == u64::MAX {
            self.last_in = u64::MAX;
            return Ok(u64::MAX);
        }
        let timestamp = self.last_in.saturating_add(encoded - 1);
        self.last_in = timestamp;
        Ok(timestamp)
    }

    fn encode_bound(&mut self, bound: &Bound, out: &mut Vec<u8>) {
        self.encode_timestamp(bound.timestamp, out);
        encode_varint(bound.id_prefix.len() as u64, out);
        out.extend_from_slice(&bound.id_prefix);
    }

    fn decode_bound(&mut self, reader: &mut Reader<'_>) -> Result<Bound> {
        let timestamp = self.decode_timestamp(reader)?;
        let len = reader.read_varint()?;
        if len > ID_SIZE as u64 {
            return Err(NegentropyError::BoundIdTooLong(len));
        }
        let id_prefix = reader.read_bytes(len as usize)?.to_vec();
        Ok(Bound {
            timestamp,
            id_prefix,
        })
    }
}

impl Negentropy {
    /// Create a session. `frame_size_limit` is 0 for unlimited, otherwise at
    /// least 4096 bytes.
    pub fn new(storage: NegentropyStorageVector, frame_size_limit: u64) -> Result<Self> {
        if !storage.is_sealed() {
            return Err(NegentropyError::NotSealed);
        }
        if frame_size_limit != 0 && frame_size_limit < MIN_FRAME_SIZE_LIMIT {
            return Err(NegentropyError::FrameSizeLimitTooSmall(frame_size_limit));
        }
        Ok(Self {
            storage,
            frame_size_limit,
            is_initiator: false,
        })
    }

    /// The reconciled set.
    pub fn storage(&self) -> &NegentropyStorageVector {
        &self.storage
    }

    /// Whether this side called `initiate()`.
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Produce the opening message and become the initiator.
    pub fn initiate(&mut self) -> Result<Vec<u8>> {
        if self.is_initiator {
            return Err(NegentropyError::AlreadyInitiated);
        }
        self.is_initiator = true;

        let mut cursors = Cursors::default();
        let mut output = vec![PROTOCOL_VERSION];
        self.split_range(
            &mut cursors,
            0,
            self.storage.len(),
            &Bound::infinity(),
            &mut output,
        )?;
        Ok(output)
    }

    /// Consume one message from the peer and produce the reply.
    ///
    /// `on_have` receives ids this side holds and the peer lacks; `on_need`
    /// receives ids the peer holds and this side lacks. Callbacks run only
    /// once the whole message parsed. Returns `None` on the initiator when
    /// reconciliation is complete; a responder always replies.
    pub fn reconcile<H, N>(
        &self,
        query: &[u8],
        mut on_have: H,
        mut on_need: N,
    ) -> Result<Option<Vec<u8>>>
    where
        H: FnMut([u8; ID_SIZE]),
        N: FnMut([u8; ID_SIZE]),
    {
        let mut have = Vec::new();
        let mut need = Vec::new();
        let output = self.reconcile_inner(query, &mut have, &mut need)?;

        have.into_iter().for_each(&mut on_have);
        need.into_iter().for_each(&mut on_need);

        if output.len() == 1 && self.is_initiator {
            Ok(None)
        } else {
            Ok(Some(output))
        }
    }

    fn reconcile_inner(
        &self,
        query: &[u8],
        have: &mut Vec<[u8; ID_SIZE]>,
        need: &mut Vec<[u8; ID_SIZE]>,
    ) -> Result<Vec<u8>> {
        let mut cursors = Cursors::default();
        let mut reader = Reader::new(query);
        let mut full_output = vec![PROTOCOL_VERSION];

        let version = reader.read_byte()?;
        if !(0x60..=0x6f).contains(&version) {
            return Err(NegentropyError::InvalidVersion(version));
        }
        if version != PROTOCOL_VERSION {
            if self.is_initiator {
                return Err(NegentropyError::UnsupportedVersion(version));
            }
            return Ok(full_output);
        }

        let storage_size = self.storage.len();
        let mut prev_bound = Bound::zero();
        let mut prev_index = 0;
        let mut emitted_index = 0;
        let mut skip = false;

        while !reader.is_empty() {
            let mut o = Vec::new();

            let curr_bound = cursors.decode_bound(&mut reader)?;
            let mode = Mode::try_from(reader.read_varint()?)?;

            let lower = prev_index;
            let mut upper = self
                .storage
                .find_lower_bound(prev_index, storage_size, &curr_bound);

            match mode {
                Mode::Skip => skip = true,
                Mode::Fingerprint => {
                    let theirs = reader.read_bytes(FINGERPRINT_SIZE)?;
                    let ours = self.storage.fingerprint(lower, upper)?;
                    if theirs != ours.as_slice() {
                        flush_skip(&mut skip, &mut cursors, &prev_bound, &mut o);
                        self.split_range(&mut cursors, lower, upper, &curr_bound, &mut o)?;
                    } else {
                        skip = true;
                    }
                }
                Mode::IdList => {
                    let count = reader.read_varint()?;
                    let byte_len = usize::try_from(count)
                        .ok()
                        .and_then(|n| n.checked_mul(ID_SIZE))
                        .filter(|&n| n <= reader.remaining())
                        .ok_or(NegentropyError::Truncated)?;
                    let their_ids: Vec<[u8; ID_SIZE]> = reader
                        .read_bytes(byte_len)?
                        .chunks_exact(ID_SIZE)
                        .map(|chunk| {
                            let mut id = [0u8; ID_SIZE];
                            id.copy_from_slice(chunk);
                            id
                        })
                        .collect();

                    let mut pending: HashSet<[u8; ID_SIZE]> = their_ids.iter().copied().collect();
                    for item in self.storage.iter_range(lower, upper)? {
                        if !pending.remove(&item.id) {
                            have.push(item.id);
                        }
                    }
                    need.extend(their_ids.into_iter().filter(|id| pending.remove(id)));

                    if self.is_initiator {
                        skip = true;
                    } else {
                        flush_skip(&mut skip, &mut cursors, &prev_bound, &mut o);

                        let mut response = Vec::new();
                        let mut num_response_ids = 0u64;
                        let mut end_bound = curr_bound.clone();

                        for (offset, item) in self.storage.iter_range(lower, upper)?.enumerate() {
                            if self.exceeds_frame_limit(full_output.len() + response.len()) {
                                end_bound = Bound::from(item);
                                upper = lower + offset;
                                break;
                            }
                            response.extend_from_slice(&item.id);
                            num_response_ids += 1;
                        }

                        cursors.encode_bound(&end_bound, &mut o);
                        encode_varint(Mode::IdList as u64, &mut o);
                        encode_varint(num_response_ids, &mut o);
                        o.extend_from_slice(&response);

                        full_output.append(&mut o);
                        emitted_index = upper;
                    }
                }
            }

            if self.exceeds_frame_limit(full_output.len() + o.len()) {
                // The peer resumes at the last bound it received, so the
                // trailing fingerprint must start there too.
                let remaining = self.storage.fingerprint(emitted_index, storage_size)?;
                cursors.encode_bound(&Bound::infinity(), &mut full_output);
                encode_varint(Mode::Fingerprint as u64, &mut full_output);
                full_output.extend_from_slice(&remaining);
                break;
            }

            if !o.is_empty() {
                full_output.append(&mut o);
                emitted_index = upper;
            }
            prev_index = upper;
            prev_bound = curr_bound;
        }

        Ok(full_output)
    }

    /// Describe `[lower, upper)` either as an id list or as 16 fingerprinted
    /// sub-ranges, the last one ending at `upper_bound`.
    fn split_range(
        &self,
        cursors: &mut Cursors,
        lower: usize,
        upper: usize,
        upper_bound: &Bound,
        out: &mut Vec<u8>,
    ) -> Result<()> {
        let num_elems = upper - lower;

        if num_elems < BUCKETS * 2 {
            cursors.encode_bound(upper_bound, out);
            encode_varint(Mode::IdList as u64, out);
            encode_varint(num_elems as u64, out);
            for item in self.storage.iter_range(lower, upper)? {
                out.extend_from_slice(&item.id);
            }
            return Ok(());
        }

        let items_per_bucket = num_elems / BUCKETS;
        let buckets_with_extra = num_elems % BUCKETS;
        let mut curr = lower;

        for i in 0..BUCKETS {
            let bucket_size = items_per_bucket + usize::from(i < buckets_with_extra);
            let fingerprint = self.storage.fingerprint(curr, curr + bucket_size)?;
            curr += bucket_size;

            let next_bound = if curr == upper {
                upper_bound.clone()
            } else {
                minimal_bound(self.storage.get(curr - 1)?, self.storage.get(curr)?)
            };

            cursors.encode_bound(&next_bound, out);
            encode_varint(Mode::Fingerprint as u64, out);
            out.extend_from_slice(&fingerprint);
        }

        Ok(())
    }

    fn exceeds_frame_limit(&self, len: usize) -> bool {
        self.frame_size_limit != 0 && len as u64 > self.frame_size_limit - FRAME_SLACK as u64
    }
}

fn flush_skip(skip: &mut bool, cursors: &mut Cursors, prev_bound: &Bound, out: &mut Vec<u8>) {
    if *skip {
        *skip = false;
        cursors.encode_bound(prev_bound, out);
        encode_varint(Mode::Skip as u64, out);
    }
}
