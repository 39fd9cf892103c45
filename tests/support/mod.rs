//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use osmio::{
    BoundingBox, Buffer, Entity, EntityKind, File, Handler, Header, Info, Location, Member, Node,
    NodeRef, Overwrite, Relation, Result, Way, Writer,
};

pub const GENERATOR: &str = "osmio-test-fixture";

fn tags(tags: &[(&str, &str)]) -> Vec<(String, String)> {
    tags.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn node(id: i64, lon: f64, lat: f64) -> Node {
    Node {
        id,
        location: Location::from_degrees(lon, lat),
        tags: Vec::new(),
        info: Some(Info {
            version: 1,
            timestamp: 1_500_000_000,
            changeset: 42,
            uid: 17,
            user: "alice".into(),
            visible: true,
        }),
    }
}

pub fn way(id: i64, refs: &[i64]) -> Way {
    Way {
        id,
        nodes: refs.iter().map(|id| NodeRef::new(*id)).collect(),
        tags: tags(&[("highway", "footway")]),
        info: None,
    }
}

pub fn header() -> Header {
    Header {
        generator: GENERATOR.into(),
        bounds: Some(BoundingBox::new(
            Location::from_degrees(13.0, 52.0),
            Location::from_degrees(14.0, 53.0),
        )),
        ..Default::default()
    }
}

/// Six nodes, two ways and a relation, spread over two buffers.
pub fn buffers() -> Vec<Buffer> {
    let mut first = Buffer::new();
    for id in 1..=4 {
        first.push(node(id, 13.0 + id as f64 / 10.0, 52.5));
    }
    let mut second = Buffer::new();
    let mut pub_node = node(5, 13.45, 52.55);
    pub_node.tags = tags(&[("amenity", "pub"), ("name", "Zur letzten Instanz")]);
    second.push(pub_node);
    second.push(node(6, 13.6, 52.6));
    second.push(way(10, &[1, 2, 3]));
    second.push(way(11, &[3, 4, 5, 6]));
    second.push(Relation {
        id: 20,
        members: vec![
            Member {
                kind: EntityKind::Way,
                id: 10,
                role: "outer".into(),
            },
            Member {
                kind: EntityKind::Node,
                id: 5,
                role: "".into(),
            },
        ],
        tags: tags(&[("type", "route")]),
        info: None,
    });
    vec![first, second]
}

pub fn write_file(path: &Path, header: &Header, buffers: Vec<Buffer>) {
    let mut writer = Writer::new(File::new(path), header, Overwrite::Allow).unwrap();
    for buffer in buffers {
        writer.write(buffer).unwrap();
    }
    writer.close().unwrap();
}

/// Writes the standard fixture into `dir` and returns its path.
pub fn fixture(dir: &Path) -> PathBuf {
    let path = dir.join("fixture.osm.pbf");
    write_file(&path, &header(), buffers());
    path
}

/// Records every callback as `(kind, id)`.
#[derive(Debug, Default)]
pub struct Recorder {
    pub seen: Vec<(EntityKind, i64)>,
    pub ways: Vec<Way>,
    pub done_calls: usize,
}

impl Handler for Recorder {
    fn node(&mut self, node: &Node) -> Result<()> {
        self.seen.push((EntityKind::Node, node.id));
        Ok(())
    }

    fn way(&mut self, way: &Way) -> Result<()> {
        self.seen.push((EntityKind::Way, way.id));
        self.ways.push(way.clone());
        Ok(())
    }

    fn relation(&mut self, relation: &Relation) -> Result<()> {
        self.seen.push((EntityKind::Relation, relation.id));
        Ok(())
    }

    fn changeset(&mut self, changeset: &osmio::Changeset) -> Result<()> {
        self.seen.push((EntityKind::Changeset, changeset.id));
        Ok(())
    }

    fn done(&mut self) -> Result<()> {
        self.done_calls += 1;
        Ok(())
    }
}

/// `(kind, id)` of every entity in the file, collected with `read`.
pub fn read_ids(path: &Path) -> Vec<(EntityKind, i64)> {
    let mut reader = osmio::Reader::open(path).unwrap();
    let mut result = Vec::new();
    while let Some(buffer) = reader.read().unwrap() {
        result.extend(buffer.iter().map(|e: &Entity| (e.kind(), e.id())));
    }
    reader.close().unwrap();
    result
}
