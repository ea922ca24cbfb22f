use crate::error::Result;
use crate::handler::{Handler, TwoPassHandler};
use crate::object::{ItemType, OsmObject, Relation, Way};

use ahash::{AHashMap, AHashSet};
use log::info;

/// Way membership of a relation after both passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipolygonStatus {
    pub relation: i64,
    /// Ids of member ways, in member order.
    pub ways: Vec<i64>,
    /// Ids of member ways not present in the input.
    pub missing: Vec<i64>,
}

impl MultipolygonStatus {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Collects the member ways of relations with a given `type` tag.
///
/// Needs two passes: the first pass finds the relations and the ids of their
/// way members, the second keeps the node references of exactly these ways.
pub struct MemberWays {
    relation_type: String,
    relations: Vec<(i64, Vec<i64>)>,
    wanted: AHashSet<i64>,
    ways: AHashMap<i64, Vec<i64>>,
    statuses: Vec<MultipolygonStatus>,
}

impl Default for MemberWays {
    fn default() -> Self {
        Self::new("multipolygon")
    }
}

impl MemberWays {
    pub fn new<S: Into<String>>(relation_type: S) -> Self {
        Self {
            relation_type: relation_type.into(),
            relations: Vec::new(),
            wanted: AHashSet::new(),
            ways: AHashMap::new(),
            statuses: Vec::new(),
        }
    }

    /// Node references of a collected way.
    pub fn way_nodes(&self, way: i64) -> Option<&[i64]> {
        self.ways.get(&way).map(Vec::as_slice)
    }

    /// Result per relation, in input order. Filled after the second pass.
    pub fn statuses(&self) -> &[MultipolygonStatus] {
        &self.statuses
    }
}

impl Handler for MemberWays {
    fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
        if relation.tags().get("type") != Some(self.relation_type.as_str()) {
            return Ok(());
        }
        let ways: Vec<i64> = relation
            .members()
            .iter()
            .filter(|m| m.member_type() == ItemType::Way)
            .map(|m| m.member_ref())
            .collect();
        self.wanted.extend(ways.iter().copied());
        self.relations.push((relation.id(), ways));
        Ok(())
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        if self.wanted.contains(&way.id()) {
            let nodes = way.nodes().iter().map(|n| n.node_ref()).collect();
            self.ways.insert(way.id(), nodes);
        }
        Ok(())
    }
}

impl TwoPassHandler for MemberWays {
    fn after_relations(&mut self) -> Result<()> {
        info!(
            "Found {} relations of type {} with {} member ways",
            self.relations.len(),
            self.relation_type,
            self.wanted.len()
        );
        Ok(())
    }

    fn after_ways(&mut self) -> Result<()> {
        let ways = &self.ways;
        self.statuses = self
            .relations
            .iter()
            .map(|(relation, members)| MultipolygonStatus {
                relation: *relation,
                ways: members.clone(),
                missing: members
                    .iter()
                    .filter(|id| !ways.contains_key(*id))
                    .copied()
                    .collect(),
            })
            .collect();
        let complete = self.statuses.iter().filter(|s| s.is_complete()).count();
        info!(
            "{} of {} relations have all member ways",
            complete,
            self.statuses.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::RelationMember;

    fn relation(id: i64, kind: &str, ways: &[i64]) -> Relation {
        let mut relation = Relation::new();
        relation.header_mut().set_id(id);
        relation.tags_mut().add("type", kind).unwrap();
        for way in ways {
            relation.add_member(RelationMember::new(*way, ItemType::Way, "outer"));
        }
        relation.add_member(RelationMember::new(1, ItemType::Node, "label"));
        relation
    }

    fn way(id: i64, nodes: &[i64]) -> Way {
        let mut way = Way::new();
        way.header_mut().set_id(id);
        for node in nodes {
            way.add_node_ref(*node);
        }
        way
    }

    #[test]
    fn test_collects_member_ways_of_matching_relations() {
        let mut handler = MemberWays::default();
        handler.before_relations().unwrap();
        handler
            .on_relation(&mut relation(1, "multipolygon", &[10, 11]))
            .unwrap();
        handler.on_relation(&mut relation(2, "route", &[12])).unwrap();
        handler.on_relation(&mut relation(3, "multipolygon", &[13])).unwrap();
        handler.after_relations().unwrap();

        handler.on_way(&mut way(10, &[1, 2, 3, 1])).unwrap();
        handler.on_way(&mut way(11, &[4, 5, 6, 4])).unwrap();
        handler.on_way(&mut way(12, &[7, 8])).unwrap();
        handler.after_ways().unwrap();

        assert_eq!(handler.way_nodes(10), Some(&[1, 2, 3, 1][..]));
        assert_eq!(handler.way_nodes(12), None);
        assert_eq!(
            handler.statuses(),
            &[
                MultipolygonStatus {
                    relation: 1,
                    ways: vec![10, 11],
                    missing: vec![],
                },
                MultipolygonStatus {
                    relation: 3,
                    ways: vec![13],
                    missing: vec![13],
                },
            ]
        );
        assert!(handler.statuses()[0].is_complete());
        assert!(!handler.statuses()[1].is_complete());
    }
}
