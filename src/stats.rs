use std::fmt;
use std::ops::AddAssign;

use crate::buffer::Buffer;
use crate::entity::{Changeset, Entity, EntityKind, Node, Relation, Way};
use crate::error::Result;
use crate::handler::Handler;

/// Entity counts, usable as a handler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub num_nodes: usize,
    pub num_ways: usize,
    pub num_relations: usize,
    pub num_changesets: usize,
}

impl Stats {
    pub fn count(&mut self, entity: &Entity) {
        self.add(entity.kind());
    }

    fn add(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Node => self.num_nodes += 1,
            EntityKind::Way => self.num_ways += 1,
            EntityKind::Relation => self.num_relations += 1,
            EntityKind::Changeset => self.num_changesets += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.num_nodes + self.num_ways + self.num_relations + self.num_changesets
    }
}

impl From<&Buffer> for Stats {
    fn from(buffer: &Buffer) -> Self {
        let mut stats = Stats::default();
        for entity in buffer {
            stats.count(entity);
        }
        stats
    }
}

impl AddAssign for Stats {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.num_nodes += other.num_nodes;
        self.num_ways += other.num_ways;
        self.num_relations += other.num_relations;
        self.num_changesets += other.num_changesets;
    }
}

impl Handler for Stats {
    fn node(&mut self, _node: &Node) -> Result<()> {
        self.add(EntityKind::Node);
        Ok(())
    }

    fn way(&mut self, _way: &Way) -> Result<()> {
        self.add(EntityKind::Way);
        Ok(())
    }

    fn relation(&mut self, _relation: &Relation) -> Result<()> {
        self.add(EntityKind::Relation);
        Ok(())
    }

    fn changeset(&mut self, _changeset: &Changeset) -> Result<()> {
        self.add(EntityKind::Changeset);
        Ok(())
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"Entities:
  nodes:        {}
  ways:         {}
  relations:    {}
  changesets:   {}"#,
            self.num_nodes, self.num_ways, self.num_relations, self.num_changesets
        )
    }
}
