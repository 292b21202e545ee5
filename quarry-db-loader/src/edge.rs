//! Parsed edges, as handed to the mapper by the (external) n-quad parser.

use quarry_db_core::Value;

/// Object side of an edge: either another node or a literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeObject {
    /// External identifier of the object node.
    Id(String),
    /// Literal value.
    Value(Value),
}

/// One parsed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// External identifier of the subject; blank nodes use the
    /// `_:Type.local` form.
    pub subject: String,
    /// Predicate name, without namespace.
    pub predicate: String,
    /// Object node id or literal value.
    pub object: EdgeObject,
    /// Namespace the edge belongs to.
    pub namespace: u64,
}

impl Edge {
    /// A reference edge between two nodes.
    pub fn reference(subject: &str, predicate: &str, object: &str, namespace: u64) -> Edge {
        Edge {
            subject: subject.to_owned(),
            predicate: predicate.to_owned(),
            object: EdgeObject::Id(object.to_owned()),
            namespace,
        }
    }

    /// A literal-valued edge.
    pub fn literal(subject: &str, predicate: &str, value: Value, namespace: u64) -> Edge {
        Edge {
            subject: subject.to_owned(),
            predicate: predicate.to_owned(),
            object: EdgeObject::Value(value),
            namespace,
        }
    }

    /// For blank-node subjects of the form `_:Type.local`, the `Type`
    /// segment; empty otherwise.
    pub fn subject_type(&self) -> &str {
        match self.subject.strip_prefix("_:") {
            Some(rest) => rest.split_once('.').map_or("", |(typ, _)| typ),
            None => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_type_extraction() {
        let e = Edge::reference("_:Person.alice", "knows", "_:Person.bob", 0);
        assert_eq!(e.subject_type(), "Person");

        let e = Edge::reference("alice", "knows", "bob", 0);
        assert_eq!(e.subject_type(), "");

        let e = Edge::reference("_:orphan", "knows", "bob", 0);
        assert_eq!(e.subject_type(), "");
    }
}
