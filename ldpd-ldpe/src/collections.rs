//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap, btree_map, hash_map};
use std::net::Ipv4Addr;

use generational_arena::{Arena, Index};

use crate::discovery::{Adjacency, AdjacencySource, TargetedNbr};
use crate::error::Error;
use crate::interface::Interface;
use crate::neighbor::Neighbor;

pub type InterfaceId = usize;
pub type InterfaceIndex = Index;
pub type AdjacencyId = usize;
pub type AdjacencyIndex = Index;
pub type TargetedNbrIndex = Index;
pub type NeighborId = usize;
pub type NeighborIndex = Index;

// First peer-id handed out on the LDE pipe.
const NBR_CNTSTART: u32 = 1;

#[derive(Debug, Default)]
pub struct Interfaces {
    // Interface arena.
    arena: Arena<Interface>,
    // Interface hash table keyed by ID (1:1).
    id_tree: HashMap<InterfaceId, InterfaceIndex>,
    // Interface binary tree keyed by name (1:1).
    name_tree: BTreeMap<String, InterfaceIndex>,
    // Interface hash table keyed by ifindex (1:1).
    ifindex_tree: HashMap<u32, InterfaceIndex>,
    // Next available ID.
    next_id: InterfaceId,
}

#[derive(Debug, Default)]
pub struct Adjacencies {
    // Adjacency arena.
    arena: Arena<Adjacency>,
    // Adjacency hash table keyed by ID (1:1).
    id_tree: HashMap<AdjacencyId, AdjacencyIndex>,
    // Adjacency binary tree keyed by source (1:1).
    source_tree: BTreeMap<AdjacencySource, AdjacencyIndex>,
    // Adjacency binary tree keyed by LSR-ID (1:N).
    lsr_id_tree: BTreeMap<Ipv4Addr, BTreeMap<AdjacencySource, AdjacencyIndex>>,
    // Adjacency hash table keyed by interface ID (1:N).
    iface_tree: HashMap<InterfaceId, BTreeMap<AdjacencySource, AdjacencyIndex>>,
    // Next available ID.
    next_id: AdjacencyId,
}

#[derive(Debug, Default)]
pub struct TargetedNbrs {
    // Targeted neighbor arena.
    arena: Arena<TargetedNbr>,
    // Targeted neighbor binary tree keyed by address (1:1).
    addr_tree: BTreeMap<Ipv4Addr, TargetedNbrIndex>,
}

#[derive(Debug, Default)]
pub struct Neighbors {
    // Neighbor arena.
    arena: Arena<Neighbor>,
    // Neighbor hash table keyed by ID (1:1).
    id_tree: HashMap<NeighborId, NeighborIndex>,
    // Neighbor hash table keyed by peer-id (1:1).
    peerid_tree: HashMap<u32, NeighborIndex>,
    // Neighbor binary tree keyed by LSR-ID (1:1).
    lsr_id_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    // Neighbor binary tree keyed by remote transport address (1:1).
    addr_tree: BTreeMap<Ipv4Addr, NeighborIndex>,
    // Next available ID.
    next_id: NeighborId,
    // Next available peer-id.
    next_peerid: u32,
}

// ===== impl Interfaces =====

impl Interfaces {
    pub fn insert(
        &mut self,
        ifname: &str,
    ) -> (InterfaceIndex, &mut Interface) {
        // Check for existing entry first.
        if let Some(iface_idx) = self.name_tree.get(ifname).copied() {
            let iface = &mut self.arena[iface_idx];
            return (iface_idx, iface);
        }

        // Create and insert interface into the arena.
        let id = self.next_id();
        let iface = Interface::new(id, ifname.to_owned());
        let iface_idx = self.arena.insert(iface);

        // Link interface to the collections.
        let iface = &mut self.arena[iface_idx];
        self.id_tree.insert(iface.id, iface_idx);
        self.name_tree.insert(iface.name.clone(), iface_idx);

        (iface_idx, iface)
    }

    pub fn delete(&mut self, iface_idx: InterfaceIndex) {
        let iface = &mut self.arena[iface_idx];

        // Unlink interface from the collections.
        self.id_tree.remove(&iface.id);
        self.name_tree.remove(&iface.name);
        if let Some(ifindex) = iface.system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }

        // Remove interface from the arena.
        self.arena.remove(iface_idx);
    }

    pub fn update_ifindex(
        &mut self,
        ifname: &str,
        ifindex: Option<u32>,
    ) -> Option<(InterfaceIndex, &mut Interface)> {
        let iface_idx = self.name_tree.get(ifname).copied()?;
        let iface = &mut self.arena[iface_idx];

        // Update interface ifindex.
        if let Some(ifindex) = iface.system.ifindex {
            self.ifindex_tree.remove(&ifindex);
        }
        iface.system.ifindex = ifindex;
        if let Some(ifindex) = ifindex {
            self.ifindex_tree.insert(ifindex, iface_idx);
        }

        Some((iface_idx, iface))
    }

    pub fn get_by_id(
        &self,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &Interface), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    pub fn get_by_name(
        &self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(|iface_idx| (iface_idx, &self.arena[iface_idx]))
    }

    pub fn get_mut_by_name(
        &mut self,
        ifname: &str,
    ) -> Option<(InterfaceIndex, &mut Interface)> {
        self.name_tree
            .get(ifname)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
    }

    pub fn get_mut_by_ifindex(
        &mut self,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &mut Interface)> {
        self.ifindex_tree
            .get(&ifindex)
            .copied()
            .map(move |iface_idx| (iface_idx, &mut self.arena[iface_idx]))
    }

    // Returns a reference to the interface attached to the subnet of the
    // given IP address.
    pub fn get_by_addr(
        &self,
        addr: &Ipv4Addr,
    ) -> Option<(InterfaceIndex, &Interface)> {
        for (iface_idx, iface) in self.arena.iter() {
            if iface.system.contains_addr(addr) {
                return Some((iface_idx, iface));
            }
        }

        None
    }

    // Returns an iterator visiting all interfaces.
    //
    // Interfaces are ordered by their names.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Interface> + '_ {
        self.name_tree
            .values()
            .map(|iface_idx| &self.arena[*iface_idx])
    }

    // Returns an iterator over all interface indexes.
    //
    // Interfaces are ordered by their names.
    pub fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.name_tree.values().cloned()
    }

    // Get next interface ID.
    pub fn next_id(&mut self) -> InterfaceId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}

impl std::ops::Index<InterfaceIndex> for Interfaces {
    type Output = Interface;

    fn index(&self, index: InterfaceIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<InterfaceIndex> for Interfaces {
    fn index_mut(&mut self, index: InterfaceIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Adjacencies =====

impl Adjacencies {
    pub fn insert(
        &mut self,
        adj: Adjacency,
    ) -> (AdjacencyIndex, &mut Adjacency) {
        // Insert adjacency into the arena.
        let adj_idx = self.arena.insert(adj);

        // Link adjacency to the collections.
        let adj = &mut self.arena[adj_idx];
        self.id_tree.insert(adj.id, adj_idx);
        self.source_tree.insert(adj.source, adj_idx);
        self.lsr_id_tree
            .entry(adj.lsr_id)
            .or_default()
            .insert(adj.source, adj_idx);
        if let Some(iface_id) = adj.source.iface_id {
            self.iface_tree
                .entry(iface_id)
                .or_default()
                .insert(adj.source, adj_idx);
        }

        (adj_idx, adj)
    }

    pub fn delete(&mut self, adj_idx: AdjacencyIndex) {
        let adj = &mut self.arena[adj_idx];

        // Unlink adjacency from the collections.
        self.id_tree.remove(&adj.id);
        self.source_tree.remove(&adj.source);
        if let btree_map::Entry::Occupied(mut o) =
            self.lsr_id_tree.entry(adj.lsr_id)
        {
            let tree = o.get_mut();
            tree.remove(&adj.source);
            if tree.is_empty() {
                o.remove_entry();
            }
        }
        if let Some(iface_id) = adj.source.iface_id {
            if let hash_map::Entry::Occupied(mut o) =
                self.iface_tree.entry(iface_id)
            {
                let tree = o.get_mut();
                tree.remove(&adj.source);
                if tree.is_empty() {
                    o.remove_entry();
                }
            }
        }

        // Remove adjacency from the arena.
        self.arena.remove(adj_idx);
    }

    pub fn get_by_id(
        &self,
        id: AdjacencyId,
    ) -> Result<(AdjacencyIndex, &Adjacency), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|adj_idx| (adj_idx, &self.arena[adj_idx]))
            .ok_or(Error::AdjacencyIdNotFound(id))
    }

    pub fn get_by_source(
        &self,
        source: &AdjacencySource,
    ) -> Option<(AdjacencyIndex, &Adjacency)> {
        self.source_tree
            .get(source)
            .copied()
            .map(|adj_idx| (adj_idx, &self.arena[adj_idx]))
    }

    pub fn get_mut_by_source(
        &mut self,
        source: &AdjacencySource,
    ) -> Option<(AdjacencyIndex, &mut Adjacency)> {
        self.source_tree
            .get(source)
            .copied()
            .map(move |adj_idx| (adj_idx, &mut self.arena[adj_idx]))
    }

    // Returns a list of all adjacencies associated to the given LSR-ID.
    pub fn get_by_lsr_id(
        &self,
        lsr_id: &Ipv4Addr,
    ) -> Option<&BTreeMap<AdjacencySource, AdjacencyIndex>> {
        self.lsr_id_tree.get(lsr_id)
    }

    // Returns a list of all adjacencies associated to the given interface.
    pub fn get_by_iface(
        &self,
        iface_id: InterfaceId,
    ) -> Option<&BTreeMap<AdjacencySource, AdjacencyIndex>> {
        self.iface_tree.get(&iface_id)
    }

    // Returns an iterator visiting all adjacencies.
    //
    // Adjacencies are ordered by their sources.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Adjacency> + '_ {
        self.source_tree
            .values()
            .map(|adj_idx| &self.arena[*adj_idx])
    }

    // Get next adjacency ID.
    pub fn next_id(&mut self) -> AdjacencyId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }
}

impl std::ops::Index<AdjacencyIndex> for Adjacencies {
    type Output = Adjacency;

    fn index(&self, index: AdjacencyIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<AdjacencyIndex> for Adjacencies {
    fn index_mut(&mut self, index: AdjacencyIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl TargetedNbrs =====

impl TargetedNbrs {
    pub fn insert(
        &mut self,
        addr: Ipv4Addr,
    ) -> (TargetedNbrIndex, &mut TargetedNbr) {
        // Check for existing entry first.
        if let Some(tnbr_idx) = self.addr_tree.get(&addr).copied() {
            let tnbr = &mut self.arena[tnbr_idx];
            return (tnbr_idx, tnbr);
        }

        // Create and insert targeted neighbor into the arena.
        let tnbr = TargetedNbr::new(addr);
        let tnbr_idx = self.arena.insert(tnbr);

        // Link targeted neighbor to the collections.
        let tnbr = &mut self.arena[tnbr_idx];
        self.addr_tree.insert(tnbr.addr, tnbr_idx);

        (tnbr_idx, tnbr)
    }

    pub fn delete(&mut self, tnbr_idx: TargetedNbrIndex) {
        let tnbr = &mut self.arena[tnbr_idx];

        // Unlink targeted neighbor from the collections.
        self.addr_tree.remove(&tnbr.addr);

        // Remove targeted neighbor from the arena.
        self.arena.remove(tnbr_idx);
    }

    pub fn get_by_addr(
        &self,
        addr: &Ipv4Addr,
    ) -> Option<(TargetedNbrIndex, &TargetedNbr)> {
        self.addr_tree
            .get(addr)
            .copied()
            .map(|tnbr_idx| (tnbr_idx, &self.arena[tnbr_idx]))
    }

    pub fn get_mut_by_addr(
        &mut self,
        addr: &Ipv4Addr,
    ) -> Option<(TargetedNbrIndex, &mut TargetedNbr)> {
        self.addr_tree
            .get(addr)
            .copied()
            .map(move |tnbr_idx| (tnbr_idx, &mut self.arena[tnbr_idx]))
    }

    // Returns an iterator visiting all targeted neighbors.
    //
    // Targeted neighbors are ordered by their addresses.
    pub fn iter(&self) -> impl Iterator<Item = &'_ TargetedNbr> + '_ {
        self.addr_tree
            .values()
            .map(|tnbr_idx| &self.arena[*tnbr_idx])
    }

    // Returns an iterator over all targeted neighbor indexes.
    //
    // Targeted neighbors are ordered by their addresses.
    pub fn indexes(
        &self,
    ) -> impl Iterator<Item = TargetedNbrIndex> + '_ {
        self.addr_tree.values().cloned()
    }
}

impl std::ops::Index<TargetedNbrIndex> for TargetedNbrs {
    type Output = TargetedNbr;

    fn index(&self, index: TargetedNbrIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<TargetedNbrIndex> for TargetedNbrs {
    fn index_mut(&mut self, index: TargetedNbrIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub fn insert(
        &mut self,
        nbr: Neighbor,
    ) -> (NeighborIndex, &mut Neighbor) {
        // Insert neighbor into the arena.
        let nbr_idx = self.arena.insert(nbr);

        // Link neighbor to the collections.
        let nbr = &mut self.arena[nbr_idx];
        self.id_tree.insert(nbr.id, nbr_idx);
        self.peerid_tree.insert(nbr.peerid, nbr_idx);
        self.lsr_id_tree.insert(nbr.lsr_id, nbr_idx);
        self.addr_tree.insert(nbr.addr, nbr_idx);

        (nbr_idx, nbr)
    }

    pub fn delete(&mut self, nbr_idx: NeighborIndex) {
        let nbr = &mut self.arena[nbr_idx];

        // Unlink neighbor from the collections.
        self.id_tree.remove(&nbr.id);
        self.peerid_tree.remove(&nbr.peerid);
        self.lsr_id_tree.remove(&nbr.lsr_id);
        self.addr_tree.remove(&nbr.addr);

        // Remove neighbor from the arena.
        self.arena.remove(nbr_idx);
    }

    // Updates the neighbor ID to prevent events from an old session from
    // leaking into a new session.
    pub fn update_id(&mut self, nbr_idx: NeighborIndex, id: NeighborId) {
        let nbr = &mut self.arena[nbr_idx];

        self.id_tree.remove(&nbr.id);
        nbr.id = id;
        self.id_tree.insert(nbr.id, nbr_idx);
    }

    pub fn get_by_id(
        &self,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &self.arena[nbr_idx]))
            .ok_or(Error::NeighborIdNotFound(id))
    }

    pub fn get_mut_by_id(
        &mut self,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &mut Neighbor), Error> {
        self.id_tree
            .get(&id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut self.arena[nbr_idx]))
            .ok_or(Error::NeighborIdNotFound(id))
    }

    pub fn get_mut_by_peerid(
        &mut self,
        peerid: u32,
    ) -> Option<(NeighborIndex, &mut Neighbor)> {
        self.peerid_tree
            .get(&peerid)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut self.arena[nbr_idx]))
    }

    pub fn get_by_lsr_id(
        &self,
        lsr_id: &Ipv4Addr,
    ) -> Option<(NeighborIndex, &Neighbor)> {
        self.lsr_id_tree
            .get(lsr_id)
            .copied()
            .map(|nbr_idx| (nbr_idx, &self.arena[nbr_idx]))
    }

    pub fn get_mut_by_lsr_id(
        &mut self,
        lsr_id: &Ipv4Addr,
    ) -> Option<(NeighborIndex, &mut Neighbor)> {
        self.lsr_id_tree
            .get(lsr_id)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut self.arena[nbr_idx]))
    }

    pub fn get_mut_by_trans_addr(
        &mut self,
        addr: &Ipv4Addr,
    ) -> Option<(NeighborIndex, &mut Neighbor)> {
        self.addr_tree
            .get(addr)
            .copied()
            .map(move |nbr_idx| (nbr_idx, &mut self.arena[nbr_idx]))
    }

    // Returns an iterator visiting all neighbors.
    //
    // Neighbors are ordered by their LSR-IDs.
    pub fn iter(&self) -> impl Iterator<Item = &'_ Neighbor> + '_ {
        self.lsr_id_tree
            .values()
            .map(|nbr_idx| &self.arena[*nbr_idx])
    }

    // Returns an iterator visiting all neighbors with mutable references.
    //
    // Order of iteration is not defined.
    pub fn iter_mut(
        &mut self,
    ) -> impl Iterator<Item = &'_ mut Neighbor> + '_ {
        self.arena.iter_mut().map(|(_, nbr)| nbr)
    }

    // Returns an iterator over all neighbor indexes.
    //
    // Neighbors are ordered by their LSR-IDs.
    pub fn indexes(&self) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.lsr_id_tree.values().cloned()
    }

    // Get next neighbor ID.
    pub fn next_id(&mut self) -> NeighborId {
        self.next_id = self.next_id.wrapping_add(1);
        self.next_id
    }

    // Get next unused peer-id.
    pub fn next_peerid(&mut self) -> u32 {
        loop {
            self.next_peerid = self.next_peerid.wrapping_add(NBR_CNTSTART);
            if !self.peerid_tree.contains_key(&self.next_peerid) {
                return self.next_peerid;
            }
        }
    }
}

impl std::ops::Index<NeighborIndex> for Neighbors {
    type Output = Neighbor;

    fn index(&self, index: NeighborIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<NeighborIndex> for Neighbors {
    fn index_mut(&mut self, index: NeighborIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}
