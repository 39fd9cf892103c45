//! Handler capability interface and dispatch.

use crate::buffer::Buffer;
use crate::entity::{Changeset, Entity, Node, Relation, Way};
use crate::error::Result;

/// Receives entities in stream order.
///
/// Every callback defaults to doing nothing, so a handler only implements
/// the kinds it cares about. Returning an error aborts the pass and the
/// error is handed to the caller of the pass.
pub trait Handler {
    fn node(&mut self, _node: &Node) -> Result<()> {
        Ok(())
    }

    fn way(&mut self, _way: &Way) -> Result<()> {
        Ok(())
    }

    fn relation(&mut self, _relation: &Relation) -> Result<()> {
        Ok(())
    }

    fn changeset(&mut self, _changeset: &Changeset) -> Result<()> {
        Ok(())
    }

    /// Called once after the last entity.
    fn done(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<H: Handler + ?Sized> Handler for &mut H {
    fn node(&mut self, node: &Node) -> Result<()> {
        (**self).node(node)
    }

    fn way(&mut self, way: &Way) -> Result<()> {
        (**self).way(way)
    }

    fn relation(&mut self, relation: &Relation) -> Result<()> {
        (**self).relation(relation)
    }

    fn changeset(&mut self, changeset: &Changeset) -> Result<()> {
        (**self).changeset(changeset)
    }

    fn done(&mut self) -> Result<()> {
        (**self).done()
    }
}

/// Invokes the callback matching the entity's kind.
pub fn dispatch<H: Handler + ?Sized>(entity: &Entity, handler: &mut H) -> Result<()> {
    match entity {
        Entity::Node(node) => handler.node(node),
        Entity::Way(way) => handler.way(way),
        Entity::Relation(relation) => handler.relation(relation),
        Entity::Changeset(changeset) => handler.changeset(changeset),
    }
}

/// Dispatches every entity of the buffer, in order. Does not call `done`.
pub fn apply_buffer<H: Handler + ?Sized>(buffer: &Buffer, handler: &mut H) -> Result<()> {
    for entity in buffer {
        dispatch(entity, handler)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Handler for Recorder {
        fn node(&mut self, node: &Node) -> Result<()> {
            self.seen.push(format!("n{}", node.id));
            Ok(())
        }

        fn way(&mut self, way: &Way) -> Result<()> {
            self.seen.push(format!("w{}", way.id));
            Ok(())
        }

        fn relation(&mut self, relation: &Relation) -> Result<()> {
            self.seen.push(format!("r{}", relation.id));
            Ok(())
        }
    }

    struct Failing;

    impl Handler for Failing {
        fn way(&mut self, way: &Way) -> Result<()> {
            Err(Error::InvalidArgument(format!("way {}", way.id)))
        }
    }

    fn buffer() -> Buffer {
        let mut buffer = Buffer::new();
        buffer.push(Node {
            id: 1,
            ..Default::default()
        });
        buffer.push(Changeset {
            id: 9,
            ..Default::default()
        });
        buffer.push(Way {
            id: 2,
            ..Default::default()
        });
        buffer.push(Relation {
            id: 3,
            ..Default::default()
        });
        buffer
    }

    #[test]
    fn test_dispatch_in_order() {
        let mut recorder = Recorder::default();
        apply_buffer(&buffer(), &mut recorder).unwrap();
        assert_eq!(recorder.seen, vec!["n1", "w2", "r3"]);
    }

    #[test]
    fn test_dispatch_through_trait_object() {
        let mut recorder = Recorder::default();
        {
            let handler: &mut dyn Handler = &mut recorder;
            apply_buffer(&buffer(), handler).unwrap();
        }
        assert_eq!(recorder.seen.len(), 3);
    }

    #[test]
    fn test_handler_error_stops_dispatch() {
        let err = apply_buffer(&buffer(), &mut Failing).unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: way 2");
    }
}
