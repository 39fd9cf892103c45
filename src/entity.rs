//! OSM entity model.
//!
//! Coordinates are stored in fixed point with 7 decimal digits, which is the
//! precision OSM itself uses. Everything else is kept in plain owned types;
//! a decoded [`Entity`] does not borrow from the block it came from.

use std::fmt;

/// Number of fixed-point units per degree.
pub const COORDINATE_PRECISION: i32 = 10_000_000;

const UNDEFINED_COORDINATE: i32 = i32::MAX;

/// A position on earth in fixed-point degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    x: i32,
    y: i32,
}

impl Location {
    /// Creates a location from fixed-point longitude and latitude.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub const fn undefined() -> Self {
        Self {
            x: UNDEFINED_COORDINATE,
            y: UNDEFINED_COORDINATE,
        }
    }

    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Self {
            x: (lon * f64::from(COORDINATE_PRECISION)).round() as i32,
            y: (lat * f64::from(COORDINATE_PRECISION)).round() as i32,
        }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn lon(&self) -> f64 {
        f64::from(self.x) / f64::from(COORDINATE_PRECISION)
    }

    pub fn lat(&self) -> f64 {
        f64::from(self.y) / f64::from(COORDINATE_PRECISION)
    }

    pub fn is_defined(&self) -> bool {
        self.x != UNDEFINED_COORDINATE && self.y != UNDEFINED_COORDINATE
    }

    /// Whether the location is defined and inside the WGS84 value range.
    pub fn is_valid(&self) -> bool {
        self.is_defined()
            && (-180 * COORDINATE_PRECISION..=180 * COORDINATE_PRECISION).contains(&self.x)
            && (-90 * COORDINATE_PRECISION..=90 * COORDINATE_PRECISION).contains(&self.y)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_defined() {
            write!(f, "({:.7},{:.7})", self.lon(), self.lat())
        } else {
            write!(f, "(undefined,undefined)")
        }
    }
}

/// Axis-aligned box given by its bottom left and top right corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoundingBox {
    pub bottom_left: Location,
    pub top_right: Location,
}

impl BoundingBox {
    pub fn new(bottom_left: Location, top_right: Location) -> Self {
        Self {
            bottom_left,
            top_right,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.bottom_left.is_defined() && self.top_right.is_defined()
    }

    /// Returns `[min_lon, min_lat, max_lon, max_lat]` in degrees.
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.bottom_left.lon(),
            self.bottom_left.lat(),
            self.top_right.lon(),
            self.top_right.lat(),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Node,
    Way,
    Relation,
    Changeset,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            EntityKind::Node => "node",
            EntityKind::Way => "way",
            EntityKind::Relation => "relation",
            EntityKind::Changeset => "changeset",
        };
        f.write_str(name)
    }
}

/// Selects which entity kinds a reader materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityFilter {
    pub node: bool,
    pub way: bool,
    pub relation: bool,
    pub changeset: bool,
}

impl EntityFilter {
    pub const fn all() -> Self {
        Self {
            node: true,
            way: true,
            relation: true,
            changeset: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            node: false,
            way: false,
            relation: false,
            changeset: false,
        }
    }

    pub fn with(mut self, kind: EntityKind) -> Self {
        match kind {
            EntityKind::Node => self.node = true,
            EntityKind::Way => self.way = true,
            EntityKind::Relation => self.relation = true,
            EntityKind::Changeset => self.changeset = true,
        }
        self
    }

    pub fn contains(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::Node => self.node,
            EntityKind::Way => self.way,
            EntityKind::Relation => self.relation,
            EntityKind::Changeset => self.changeset,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.node || self.way || self.relation || self.changeset)
    }

    /// Whether both filters select at least one common kind.
    pub fn intersects(&self, other: &EntityFilter) -> bool {
        self.node && other.node
            || self.way && other.way
            || self.relation && other.relation
            || self.changeset && other.changeset
    }
}

impl Default for EntityFilter {
    fn default() -> Self {
        Self::all()
    }
}

/// Metadata attached to an entity version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub version: i32,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i32,
    pub user: String,
    pub visible: bool,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            version: 0,
            timestamp: 0,
            changeset: 0,
            uid: 0,
            user: String::new(),
            visible: true,
        }
    }
}

pub type Tags = Vec<(String, String)>;

fn find_tag<'a>(tags: &'a Tags, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub id: i64,
    pub location: Location,
    pub tags: Tags,
    pub info: Option<Info>,
}

impl Node {
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }
}

/// Reference from a way to one of its nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub id: i64,
    /// Filled in by the location handler, undefined otherwise.
    pub location: Location,
}

impl NodeRef {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            location: Location::undefined(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Way {
    pub id: i64,
    pub nodes: Vec<NodeRef>,
    pub tags: Tags,
    pub info: Option<Info>,
}

impl Way {
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }

    pub fn is_closed(&self) -> bool {
        match (self.nodes.first(), self.nodes.last()) {
            (Some(first), Some(last)) => self.nodes.len() > 1 && first.id == last.id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: EntityKind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relation {
    pub id: i64,
    pub members: Vec<Member>,
    pub tags: Tags,
    pub info: Option<Info>,
}

impl Relation {
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Changeset {
    pub id: i64,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
    Changeset(Changeset),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Node(_) => EntityKind::Node,
            Entity::Way(_) => EntityKind::Way,
            Entity::Relation(_) => EntityKind::Relation,
            Entity::Changeset(_) => EntityKind::Changeset,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Entity::Node(n) => n.id,
            Entity::Way(w) => w.id,
            Entity::Relation(r) => r.id,
            Entity::Changeset(c) => c.id,
        }
    }
}

impl From<Node> for Entity {
    fn from(node: Node) -> Self {
        Entity::Node(node)
    }
}

impl From<Way> for Entity {
    fn from(way: Way) -> Self {
        Entity::Way(way)
    }
}

impl From<Relation> for Entity {
    fn from(relation: Relation) -> Self {
        Entity::Relation(relation)
    }
}

impl From<Changeset> for Entity {
    fn from(changeset: Changeset) -> Self {
        Entity::Changeset(changeset)
    }
}
