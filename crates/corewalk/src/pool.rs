//! Puddle pool reader.
//!
//! A pool is a chain of fixed-capacity puddles. Each puddle header is
//! followed by an occupancy bitmap of `u32` words (bit `31 - slot % 32`
//! marks slot `slot` live) and then, at `firstElementAddress`, the slot
//! array itself.

use crate::algorithm::version::DEFAULT_VM_MINOR;
use crate::algorithm::{Algorithm, AlgorithmId};
use crate::corrupt::{raise, Severity};
use crate::error::{WalkError, WalkResult};
use crate::session::Session;
use std::collections::HashSet;
use tracing::{debug, warn};

const POOL_TYPE: &str = "J9Pool";
const PUDDLE_LIST_TYPE: &str = "J9PoolPuddleList";
const PUDDLE_TYPE: &str = "J9PoolPuddle";

const BITS_PER_WORD: u32 = 32;

/// Known pool layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAlgorithm {
    /// `puddleList` is the first puddle; the live count sits in the pool.
    V0,
    /// `puddleList` points at a puddle-list header holding the live count.
    V1,
}

impl PoolAlgorithm {
    pub const CANDIDATES: [PoolAlgorithm; 2] = [PoolAlgorithm::V0, PoolAlgorithm::V1];
}

impl Algorithm for PoolAlgorithm {
    fn vm_minor(&self) -> u32 {
        DEFAULT_VM_MINOR
    }

    fn algorithm_version(&self) -> u32 {
        match self {
            PoolAlgorithm::V0 => 0,
            PoolAlgorithm::V1 => 1,
        }
    }
}

/// Iteration limits.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Stop after this many live slots; guards against looping images.
    pub max_slots: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig { max_slots: 1 << 24 }
    }
}

/// Pool header snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pool {
    pub address: u64,
    pub element_size: u64,
    pub elements_per_puddle: u32,
    /// Live count as recorded by the target.
    pub num_elements: u64,
    pub first_puddle: u64,
}

/// Puddle header snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Puddle {
    pub address: u64,
    pub used_elements: u64,
    pub first_element: u64,
    pub next: u64,
}

/// Reads one pool.
pub struct PoolReader<'s> {
    session: &'s Session,
    algorithm: PoolAlgorithm,
    pool: Pool,
    bitmap_offset: u64,
    config: PoolConfig,
}

impl<'s> PoolReader<'s> {
    pub fn new(session: &'s Session, address: u64) -> WalkResult<Self> {
        Self::with_config(session, address, PoolConfig::default())
    }

    /// Read the pool header at `address`.
    ///
    /// A header that cannot be read is reported as fatal and returned.
    pub fn with_config(session: &'s Session, address: u64, config: PoolConfig) -> WalkResult<Self> {
        let algorithm = session.pick(AlgorithmId::Pool, PoolAlgorithm::CANDIDATES)?;
        let pool = match read_header(session, algorithm, address) {
            Ok(pool) => pool,
            Err(e) => {
                if let Some(copy) = e.duplicate() {
                    raise(
                        session.reporter(),
                        format!("cannot read pool header at {:#x}", address),
                        copy,
                        Severity::Fatal,
                    );
                }
                return Err(e);
            }
        };
        debug!(
            "Pool {:#x} ({:?}): element size {}, {} per puddle, {} live",
            address, algorithm, pool.element_size, pool.elements_per_puddle, pool.num_elements
        );

        Ok(PoolReader {
            session,
            algorithm,
            pool,
            bitmap_offset: session.type_size(PUDDLE_TYPE)? as u64,
            config,
        })
    }

    pub fn algorithm(&self) -> PoolAlgorithm {
        self.algorithm
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Live element count recorded in the header.
    pub fn num_elements(&self) -> u64 {
        self.pool.num_elements
    }

    /// Slot capacity summed over every puddle, live or not.
    pub fn capacity(&self) -> WalkResult<u64> {
        Ok(self.puddles()?.len() as u64 * self.pool.elements_per_puddle as u64)
    }

    /// Read one puddle header.
    pub fn puddle(&self, address: u64) -> WalkResult<Puddle> {
        let read = || -> WalkResult<Puddle> {
            let r = self.session.struct_reader(address, PUDDLE_TYPE)?;
            Ok(Puddle {
                address,
                used_elements: r.read_udata("usedElements")?,
                first_element: r.read_srp("firstElementAddress")?,
                next: r.read_wsrp("nextPuddle")?,
            })
        };
        read().map_err(|e| e.context(PUDDLE_TYPE))
    }

    /// Every puddle in chain order. Fails on an unreadable header or a cycle.
    pub fn puddles(&self) -> WalkResult<Vec<Puddle>> {
        let mut puddles = Vec::new();
        let mut visited = HashSet::new();
        let mut next = self.pool.first_puddle;
        while next != 0 {
            if !visited.insert(next) {
                return Err(WalkError::malformed(
                    POOL_TYPE,
                    self.pool.address,
                    format!("puddle chain loops back to {:#x}", next),
                ));
            }
            let puddle = self.puddle(next)?;
            next = puddle.next;
            puddles.push(puddle);
        }
        Ok(puddles)
    }

    /// Addresses of every live slot, puddle order then slot order.
    pub fn addresses(&self) -> PoolSlotIter<'_, 's> {
        PoolSlotIter {
            reader: self,
            current: None,
            next_puddle: self.pool.first_puddle,
            slot: 0,
            word: None,
            visited_in_puddle: 0,
            seen_puddles: HashSet::new(),
            yielded: 0,
            done: false,
        }
    }

    /// Live slots decoded with `decoder`; slots it cannot decode are
    /// reported and skipped.
    pub fn iter<T, D>(&self, decoder: D) -> PoolIter<'_, 's, D>
    where
        D: FnMut(&Session, u64) -> WalkResult<T>,
    {
        PoolIter {
            slots: self.addresses(),
            decoder,
        }
    }

    fn report(&self, message: String, error: WalkError, severity: Severity) {
        raise(self.session.reporter(), message, error, severity);
    }
}

fn read_header(session: &Session, algorithm: PoolAlgorithm, address: u64) -> WalkResult<Pool> {
    let r = session.struct_reader(address, POOL_TYPE)?;
    let element_size = r.read_udata("elementSize")?;
    let elements_per_puddle = r.read_u32("elementsPerPuddle")?;

    let (num_elements, first_puddle) = match algorithm {
        PoolAlgorithm::V0 => (r.read_udata("numElements")?, r.read_wsrp("puddleList")?),
        PoolAlgorithm::V1 => {
            let list = r.read_wsrp("puddleList")?;
            if list == 0 {
                (0, 0)
            } else {
                let l = session.struct_reader(list, PUDDLE_LIST_TYPE)?;
                (l.read_udata("numElements")?, l.read_wsrp("nextPuddle")?)
            }
        }
    };

    if first_puddle != 0 && (element_size == 0 || elements_per_puddle == 0) {
        return Err(WalkError::malformed(
            POOL_TYPE,
            address,
            format!(
                "element size {} with {} elements per puddle",
                element_size, elements_per_puddle
            ),
        ));
    }

    Ok(Pool {
        address,
        element_size,
        elements_per_puddle,
        num_elements,
        first_puddle,
    })
}

/// Cursor over live slot addresses.
///
/// Holds its own position; several cursors over one pool may be
/// interleaved freely.
pub struct PoolSlotIter<'r, 's> {
    reader: &'r PoolReader<'s>,
    current: Option<Puddle>,
    next_puddle: u64,
    slot: u32,
    word: Option<u32>,
    visited_in_puddle: u64,
    seen_puddles: HashSet<u64>,
    yielded: u64,
    done: bool,
}

impl PoolSlotIter<'_, '_> {
    /// Load the next puddle header, or finish.
    fn advance_puddle(&mut self) -> bool {
        let address = self.next_puddle;
        if address == 0 {
            return false;
        }
        if !self.seen_puddles.insert(address) {
            self.reader.report(
                format!("puddle chain of pool {:#x} loops", self.reader.pool.address),
                WalkError::malformed(POOL_TYPE, self.reader.pool.address, format!("puddle {:#x} revisited", address)),
                Severity::Fatal,
            );
            return false;
        }
        match self.reader.puddle(address) {
            Ok(puddle) => {
                self.current = Some(puddle);
                self.next_puddle = puddle.next;
                self.slot = 0;
                self.word = None;
                self.visited_in_puddle = 0;
                true
            }
            Err(e) => {
                self.reader.report(
                    format!("abandoning pool {:#x} at unreadable puddle", self.reader.pool.address),
                    e,
                    Severity::Fatal,
                );
                false
            }
        }
    }
}

impl Iterator for PoolSlotIter<'_, '_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let per_puddle = self.reader.pool.elements_per_puddle;
        let element_size = self.reader.pool.element_size;

        while !self.done {
            let Some(puddle) = self.current else {
                if !self.advance_puddle() {
                    self.done = true;
                }
                continue;
            };

            if self.visited_in_puddle >= puddle.used_elements || self.slot >= per_puddle {
                self.current = None;
                continue;
            }

            let word_index = self.slot / BITS_PER_WORD;
            let word = match self.word {
                Some(word) => word,
                None => {
                    let addr = puddle.address
                        + self.reader.bitmap_offset
                        + word_index as u64 * 4;
                    match self.reader.session.read_u32(addr) {
                        Ok(word) => {
                            self.word = Some(word);
                            word
                        }
                        Err(e) => {
                            self.reader.report(
                                format!("skipping bitmap word {} of puddle {:#x}", word_index, puddle.address),
                                e.context("puddle bitmap"),
                                Severity::Recoverable,
                            );
                            self.slot = (word_index + 1) * BITS_PER_WORD;
                            continue;
                        }
                    }
                }
            };

            let slot = self.slot;
            self.slot += 1;
            if self.slot % BITS_PER_WORD == 0 {
                self.word = None;
            }
            if word & (1 << (31 - slot % BITS_PER_WORD)) == 0 {
                continue;
            }

            self.visited_in_puddle += 1;
            if self.yielded >= self.reader.config.max_slots {
                warn!(
                    "Pool {:#x} hit the {} slot limit, results truncated",
                    self.reader.pool.address, self.reader.config.max_slots
                );
                self.done = true;
                return None;
            }
            self.yielded += 1;
            return Some(puddle.first_element.wrapping_add(slot as u64 * element_size));
        }
        None
    }
}

/// Cursor over decoded live slots, yielding `(address, element)`.
pub struct PoolIter<'r, 's, D> {
    slots: PoolSlotIter<'r, 's>,
    decoder: D,
}

impl<T, D> Iterator for PoolIter<'_, '_, D>
where
    D: FnMut(&Session, u64) -> WalkResult<T>,
{
    type Item = (u64, T);

    fn next(&mut self) -> Option<(u64, T)> {
        loop {
            let address = self.slots.next()?;
            match (self.decoder)(self.slots.reader.session, address) {
                Ok(element) => return Some((address, element)),
                Err(e) => self.slots.reader.report(
                    format!("skipping pool slot {:#x}", address),
                    e,
                    Severity::Recoverable,
                ),
            }
        }
    }
}
