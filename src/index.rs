//! Node location indexes.
//!
//! Resolving way geometry needs the location of every node referenced by a
//! way. Nodes come before ways in OSM files, so the locations are collected
//! while nodes stream past and looked up when the ways arrive.

use ahash::AHashMap;

use std::mem;

use crate::entity::{Entity, Location, Node, Way};
use crate::error::{Error, Result};

/// Maps node ids to locations.
pub trait LocationIndex {
    /// Stores `location` for `id`. Setting an undefined location removes the
    /// entry.
    fn set(&mut self, id: u64, location: Location);
    fn get(&self, id: u64) -> Option<Location>;
    /// Number of stored locations.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Approximate heap memory in bytes.
    fn used_memory(&self) -> usize;
    fn clear(&mut self);
}

const PAGE_BITS: u32 = 16;
const PAGE_SIZE: usize = 1 << PAGE_BITS;
const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Array indexed directly by id, for densely numbered ids.
///
/// Memory is allocated in pages of 2^16 locations on first write into a
/// page, so untouched regions of the id space cost nothing.
#[derive(Debug, Default)]
pub struct DenseMemArray {
    pages: AHashMap<u64, Box<[Location]>>,
    len: usize,
}

impl DenseMemArray {
    pub fn new() -> Self {
        Default::default()
    }

    fn page_of(id: u64) -> (u64, usize) {
        (id >> PAGE_BITS, (id & PAGE_MASK) as usize)
    }
}

impl LocationIndex for DenseMemArray {
    fn set(&mut self, id: u64, location: Location) {
        let (page, offset) = Self::page_of(id);
        let slot = if location.is_defined() {
            let page = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![Location::undefined(); PAGE_SIZE].into_boxed_slice());
            &mut page[offset]
        } else {
            match self.pages.get_mut(&page) {
                Some(page) => &mut page[offset],
                None => return,
            }
        };
        match (slot.is_defined(), location.is_defined()) {
            (false, true) => self.len += 1,
            (true, false) => self.len -= 1,
            _ => {}
        }
        *slot = location;
    }

    fn get(&self, id: u64) -> Option<Location> {
        let (page, offset) = Self::page_of(id);
        self.pages
            .get(&page)?
            .get(offset)
            .copied()
            .filter(Location::is_defined)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn used_memory(&self) -> usize {
        self.pages.capacity() * mem::size_of::<(u64, Box<[Location]>)>()
            + self.pages.len() * PAGE_SIZE * mem::size_of::<Location>()
    }

    fn clear(&mut self) {
        self.pages.clear();
        self.len = 0;
    }
}

/// Sorted `(id, location)` pairs, for sparsely numbered ids.
///
/// Ids are grouped by their upper 32 bits, so only the lower half is stored
/// per entry. Inserting ids in ascending order appends, anything else is a
/// sorted insert.
#[derive(Debug, Default)]
pub struct SparseMemArray {
    // map u64 id x to a sorted table for each value of x / 2^32
    data: AHashMap<u32, Vec<(u32, Location)>>,
    len: usize,
}

impl SparseMemArray {
    pub fn new() -> Self {
        Default::default()
    }
}

impl LocationIndex for SparseMemArray {
    fn set(&mut self, id: u64, location: Location) {
        let id_set = (id >> 32) as u32;
        let key = id as u32;
        if !location.is_defined() {
            if let Some(set) = self.data.get_mut(&id_set) {
                if let Ok(pos) = set.binary_search_by_key(&key, |item| item.0) {
                    set.remove(pos);
                    self.len -= 1;
                }
            }
            return;
        }

        let set = self.data.entry(id_set).or_default();
        match set.last() {
            Some(&(last, _)) if last < key => set.push((key, location)),
            None => set.push((key, location)),
            _ => match set.binary_search_by_key(&key, |item| item.0) {
                Ok(pos) => {
                    set[pos].1 = location;
                    return;
                }
                Err(pos) => set.insert(pos, (key, location)),
            },
        }
        self.len += 1;
    }

    fn get(&self, id: u64) -> Option<Location> {
        let set = self.data.get(&((id >> 32) as u32))?;
        set.binary_search_by_key(&(id as u32), |item| item.0)
            .ok()
            .map(|pos| set[pos].1)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn used_memory(&self) -> usize {
        self.data.capacity() * mem::size_of::<(u32, Vec<(u32, Location)>)>()
            + self
                .data
                .values()
                .map(|set| set.capacity() * mem::size_of::<(u32, Location)>())
                .sum::<usize>()
    }

    fn clear(&mut self) {
        self.data.clear();
        self.len = 0;
    }
}

/// Stores node locations and fills them into way node references.
///
/// Non-negative ids live in `positive`, negative ids (by absolute value) in
/// `negative`. Real OSM data only has positive ids, densely numbered;
/// negative ids come from editors and are few.
#[derive(Debug)]
pub struct LocationHandler<P = DenseMemArray, N = SparseMemArray> {
    positive: P,
    negative: N,
    ignore_missing: bool,
}

impl Default for LocationHandler {
    fn default() -> Self {
        Self::new(DenseMemArray::new(), SparseMemArray::new())
    }
}

impl<P: LocationIndex, N: LocationIndex> LocationHandler<P, N> {
    pub fn new(positive: P, negative: N) -> Self {
        Self {
            positive,
            negative,
            ignore_missing: false,
        }
    }

    /// Leave locations of unknown nodes undefined instead of failing.
    pub fn ignore_missing(mut self, ignore: bool) -> Self {
        self.ignore_missing = ignore;
        self
    }

    pub fn get(&self, id: i64) -> Option<Location> {
        if id >= 0 {
            self.positive.get(id as u64)
        } else {
            self.negative.get(id.unsigned_abs())
        }
    }

    pub fn node(&mut self, node: &Node) {
        if !node.location.is_defined() {
            return;
        }
        if node.id >= 0 {
            self.positive.set(node.id as u64, node.location);
        } else {
            self.negative.set(node.id.unsigned_abs(), node.location);
        }
    }

    pub fn way(&self, way: &mut Way) -> Result<()> {
        for node_ref in way.nodes.iter_mut() {
            match self.get(node_ref.id) {
                Some(location) => node_ref.location = location,
                None if self.ignore_missing => {}
                None => return Err(Error::LocationNotFound(node_ref.id)),
            }
        }
        Ok(())
    }

    pub fn apply(&mut self, entity: &mut Entity) -> Result<()> {
        match entity {
            Entity::Node(node) => {
                self.node(node);
                Ok(())
            }
            Entity::Way(way) => self.way(way),
            Entity::Relation(_) | Entity::Changeset(_) => Ok(()),
        }
    }

    /// Number of stored locations.
    pub fn len(&self) -> usize {
        self.positive.len() + self.negative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_memory(&self) -> usize {
        self.positive.used_memory() + self.negative.used_memory()
    }

    pub fn clear(&mut self) {
        self.positive.clear();
        self.negative.clear();
    }
}
