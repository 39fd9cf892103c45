mod support;

use osmio::osmpbf::{self, BlobType, HeaderBlock};
use osmio::{
    ApplyOptions, Buffer, EntityFilter, EntityKind, Error, File, Handler, Header, Location, Reader,
    Result, Stats, Way,
};
use prost::Message;

use std::fs;

use support::Recorder;

#[test]
fn test_invalid_paths() {
    assert!(Reader::open("").unwrap_err().is_invalid_argument());
    assert!(Reader::open("-").unwrap_err().is_invalid_argument());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = Reader::open(dir.path().join("missing.osm.pbf"));
    assert!(matches!(result, Err(Error::Io(_))));
}

#[test]
fn test_unsupported_formats() {
    let dir = tempfile::tempdir().unwrap();
    let xml = dir.path().join("data.osm");
    fs::write(&xml, "<?xml version='1.0'?><osm version='0.6'></osm>").unwrap();
    assert!(matches!(
        Reader::open(xml.as_path()),
        Err(Error::UnsupportedFormat(_))
    ));

    // Declared format wins over the suffix.
    let pbf = support::fixture(dir.path());
    let file = File::with_format(&pbf, "opl").unwrap();
    assert!(matches!(
        Reader::open(file),
        Err(Error::UnsupportedFormat(_))
    ));

    // Unknown suffix and unrecognized content.
    let junk = dir.path().join("data.bin");
    fs::write(&junk, b"not an osm file").unwrap();
    assert!(matches!(
        Reader::open(junk.as_path()),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_unsupported_required_feature() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.osm.pbf");
    let header = HeaderBlock {
        required_features: vec!["OsmSchema-V0.6".into(), "Teleportation".into()],
        ..Default::default()
    };
    let mut out = fs::File::create(&path).unwrap();
    osmpbf::write_blob(
        &mut out,
        BlobType::Header,
        &header.encode_to_vec(),
        Default::default(),
    )
    .unwrap();
    drop(out);

    match Reader::open(path.as_path()) {
        Err(Error::UnsupportedFeature(msg)) => assert!(msg.contains("Teleportation")),
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_empty_handler_list() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();
    let err = reader
        .apply_all(&mut [], ApplyOptions::default())
        .unwrap_err();
    assert!(err.is_invalid_argument());

    // The reader is still usable.
    let mut stats = Stats::default();
    reader.apply(&mut stats, ApplyOptions::default()).unwrap();
    assert_eq!(stats.total(), 9);
}

#[test]
fn test_header_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();

    let before: Header = reader.header().clone();
    assert_eq!(before.generator(), support::GENERATOR);
    let bounds = before.bounds().unwrap();
    assert_eq!(bounds.bottom_left, Location::from_degrees(13.0, 52.0));
    assert_eq!(bounds.top_right, Location::from_degrees(14.0, 53.0));

    reader
        .apply(&mut Recorder::default(), ApplyOptions::default())
        .unwrap();
    assert_eq!(reader.header(), &before);
    reader.close().unwrap();
}

#[test]
fn test_apply_matches_read_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = support::fixture(dir.path());

    let mut recorder = Recorder::default();
    let mut reader = Reader::open(path.as_path()).unwrap();
    reader.apply(&mut recorder, ApplyOptions::default()).unwrap();
    reader.close().unwrap();

    let expected = support::read_ids(&path);
    assert_eq!(recorder.seen, expected);
    assert_eq!(recorder.done_calls, 1);

    let kinds: Vec<EntityKind> = expected.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(&kinds[..6], &[EntityKind::Node; 6]);
    assert_eq!(&kinds[6..], &[EntityKind::Way, EntityKind::Way, EntityKind::Relation]);
}

#[test]
fn test_entities_survive_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = support::fixture(dir.path());

    let mut reader = Reader::open(path.as_path()).unwrap();
    let mut entities = Vec::new();
    while let Some(buffer) = reader.read().unwrap() {
        entities.extend(buffer);
    }
    let expected: Vec<_> = support::buffers().into_iter().flatten().collect();
    assert_eq!(entities, expected);
}

#[test]
fn test_multiple_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();

    let mut first = Recorder::default();
    let mut second = Recorder::default();
    let mut stats = Stats::default();
    reader
        .apply_all(
            &mut [&mut first, &mut second, &mut stats],
            ApplyOptions::default(),
        )
        .unwrap();

    assert_eq!(first.seen, second.seen);
    assert_eq!(first.seen.len(), stats.total());
    assert_eq!(first.done_calls, 1);
    assert_eq!(second.done_calls, 1);
    assert_eq!(stats.num_nodes, 6);
    assert_eq!(stats.num_ways, 2);
    assert_eq!(stats.num_relations, 1);
}

#[test]
fn test_filtered_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = support::fixture(dir.path());

    let filter = EntityFilter::none()
        .with(EntityKind::Way)
        .with(EntityKind::Relation);
    let mut reader = Reader::with_filter(path.as_path(), filter).unwrap();
    assert_eq!(reader.filter(), filter);

    let mut recorder = Recorder::default();
    reader.apply(&mut recorder, ApplyOptions::default()).unwrap();
    assert_eq!(
        recorder.seen,
        vec![
            (EntityKind::Way, 10),
            (EntityKind::Way, 11),
            (EntityKind::Relation, 20)
        ]
    );

    let mut reader = Reader::with_filter(path.as_path(), EntityFilter::none()).unwrap();
    assert!(reader.read().unwrap().is_none());
}

#[test]
fn test_locations_are_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();

    let mut recorder = Recorder::default();
    let options = ApplyOptions {
        with_location_handler: true,
        ..Default::default()
    };
    reader.apply(&mut recorder, options).unwrap();

    assert_eq!(recorder.ways.len(), 2);
    for way in &recorder.ways {
        for node_ref in &way.nodes {
            assert!(node_ref.location.is_valid(), "way {} node {}", way.id, node_ref.id);
        }
    }
    let first = &recorder.ways[0].nodes[0];
    assert_eq!(first.location, Location::from_degrees(13.1, 52.5));
}

#[test]
fn test_locations_are_not_resolved_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();
    let mut recorder = Recorder::default();
    reader.apply(&mut recorder, ApplyOptions::default()).unwrap();
    assert!(recorder
        .ways
        .iter()
        .flat_map(|way| &way.nodes)
        .all(|node_ref| !node_ref.location.is_defined()));
}

#[test]
fn test_missing_locations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.osm.pbf");
    let mut buffers = support::buffers();
    buffers[1].push(support::way(12, &[1, 99]));
    support::write_file(&path, &support::header(), buffers);

    let options = ApplyOptions {
        with_location_handler: true,
        ..Default::default()
    };
    let mut reader = Reader::open(path.as_path()).unwrap();
    let mut recorder = Recorder::default();
    let err = reader.apply(&mut recorder, options).unwrap_err();
    assert!(matches!(err, Error::LocationNotFound(99)));
    assert_eq!(recorder.done_calls, 0);
    assert!(matches!(
        reader.apply(&mut recorder, options),
        Err(Error::Exhausted)
    ));

    let options = ApplyOptions {
        with_location_handler: true,
        ignore_missing_locations: true,
    };
    let mut reader = Reader::open(path.as_path()).unwrap();
    let mut recorder = Recorder::default();
    reader.apply(&mut recorder, options).unwrap();
    let way = recorder.ways.iter().find(|way| way.id == 12).unwrap();
    assert!(way.nodes[0].location.is_defined());
    assert!(!way.nodes[1].location.is_defined());
}

struct StopAtWay;

impl Handler for StopAtWay {
    fn way(&mut self, way: &Way) -> Result<()> {
        Err(Error::InvalidArgument(format!("stop at way {}", way.id)))
    }
}

#[test]
fn test_handler_error_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();
    let err = reader
        .apply(&mut StopAtWay, ApplyOptions::default())
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid argument: stop at way 10");
    assert!(reader.read().unwrap().is_none());
}

#[test]
fn test_single_pass() {
    let dir = tempfile::tempdir().unwrap();
    let mut reader = Reader::open(support::fixture(dir.path())).unwrap();

    reader
        .apply(&mut Stats::default(), ApplyOptions::default())
        .unwrap();
    assert!(matches!(
        reader.apply(&mut Stats::default(), ApplyOptions::default()),
        Err(Error::Exhausted)
    ));
    assert!(reader.read().unwrap().is_none());

    reader.close().unwrap();
    reader.close().unwrap();
    assert!(reader.is_closed());
    assert!(matches!(
        reader.apply(&mut Stats::default(), ApplyOptions::default()),
        Err(Error::Closed)
    ));
}

#[test]
fn test_extreme_node_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extreme.osm.pbf");
    let ids = [-1, i64::MAX, 1 << 50, i64::MIN, -(1 << 50)];
    let mut buffer = Buffer::new();
    for id in ids {
        buffer.push(support::node(id, 1.0, 2.0));
    }
    buffer.push(support::way(1, &ids));
    support::write_file(&path, &support::header(), vec![buffer]);

    let mut reader = Reader::open(path.as_path()).unwrap();
    let mut recorder = Recorder::default();
    let options = ApplyOptions {
        with_location_handler: true,
        ..Default::default()
    };
    reader.apply(&mut recorder, options).unwrap();

    let node_ids: Vec<i64> = recorder
        .seen
        .iter()
        .filter(|(kind, _)| *kind == EntityKind::Node)
        .map(|(_, id)| *id)
        .collect();
    assert_eq!(node_ids, ids);
    let way = &recorder.ways[0];
    let refs: Vec<i64> = way.nodes.iter().map(|node_ref| node_ref.id).collect();
    assert_eq!(refs, ids);
    assert!(way
        .nodes
        .iter()
        .all(|node_ref| node_ref.location == Location::from_degrees(1.0, 2.0)));
}
