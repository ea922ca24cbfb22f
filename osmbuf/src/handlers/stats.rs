use crate::error::Result;
use crate::handler::Handler;
use crate::object::{Header, Node, OsmObject, Relation, Way};

use std::cmp::max;
use std::fmt;
use std::ops::AddAssign;

/// Collects basic statistics about the entities read.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Statistics {
    pub nodes: u64,
    pub nodes_without_tags: u64,
    pub node_tags: u64,
    pub max_node_id: i64,
    pub max_tags_on_node: u64,
    pub max_node_version: u32,
    pub sum_node_version: u64,

    pub ways: u64,
    pub closed_ways: u64,
    pub way_tags: u64,
    pub way_nodes: u64,
    pub max_way_id: i64,
    pub max_tags_on_way: u64,
    pub max_nodes_on_way: u64,
    pub max_way_version: u32,
    pub sum_way_version: u64,

    pub relations: u64,
    pub relation_tags: u64,
    pub relation_members: u64,
    pub max_relation_id: i64,
    pub max_tags_on_relation: u64,
    pub max_members_on_relation: u64,
    pub max_relation_version: u32,
    pub sum_relation_version: u64,

    pub anonymous_objects: u64,
    pub max_uid: i32,
    pub max_changeset: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Default::default()
    }

    fn object(&mut self, header: &Header) {
        if header.user_is_anonymous() {
            self.anonymous_objects += 1;
        }
        self.max_uid = max(self.max_uid, header.uid());
        self.max_changeset = max(self.max_changeset, header.changeset());
    }
}

impl Handler for Statistics {
    fn on_node(&mut self, node: &mut Node) -> Result<()> {
        self.object(node.header());
        let tags = node.tags().len() as u64;
        self.nodes += 1;
        if tags == 0 {
            self.nodes_without_tags += 1;
        }
        self.node_tags += tags;
        self.max_node_id = max(self.max_node_id, node.id());
        self.max_tags_on_node = max(self.max_tags_on_node, tags);
        self.max_node_version = max(self.max_node_version, node.version());
        self.sum_node_version += u64::from(node.version());
        Ok(())
    }

    fn on_way(&mut self, way: &mut Way) -> Result<()> {
        self.object(way.header());
        let tags = way.tags().len() as u64;
        let nodes = way.nodes().len() as u64;
        self.ways += 1;
        if way.is_closed() {
            self.closed_ways += 1;
        }
        self.way_tags += tags;
        self.way_nodes += nodes;
        self.max_way_id = max(self.max_way_id, way.id());
        self.max_tags_on_way = max(self.max_tags_on_way, tags);
        self.max_nodes_on_way = max(self.max_nodes_on_way, nodes);
        self.max_way_version = max(self.max_way_version, way.version());
        self.sum_way_version += u64::from(way.version());
        Ok(())
    }

    fn on_relation(&mut self, relation: &mut Relation) -> Result<()> {
        self.object(relation.header());
        let tags = relation.tags().len() as u64;
        let members = relation.members().len() as u64;
        self.relations += 1;
        self.relation_tags += tags;
        self.relation_members += members;
        self.max_relation_id = max(self.max_relation_id, relation.id());
        self.max_tags_on_relation = max(self.max_tags_on_relation, tags);
        self.max_members_on_relation = max(self.max_members_on_relation, members);
        self.max_relation_version = max(self.max_relation_version, relation.version());
        self.sum_relation_version += u64::from(relation.version());
        Ok(())
    }
}

impl AddAssign for Statistics {
    fn add_assign(&mut self, other: Self) {
        self.nodes += other.nodes;
        self.nodes_without_tags += other.nodes_without_tags;
        self.node_tags += other.node_tags;
        self.max_node_id = max(self.max_node_id, other.max_node_id);
        self.max_tags_on_node = max(self.max_tags_on_node, other.max_tags_on_node);
        self.max_node_version = max(self.max_node_version, other.max_node_version);
        self.sum_node_version += other.sum_node_version;

        self.ways += other.ways;
        self.closed_ways += other.closed_ways;
        self.way_tags += other.way_tags;
        self.way_nodes += other.way_nodes;
        self.max_way_id = max(self.max_way_id, other.max_way_id);
        self.max_tags_on_way = max(self.max_tags_on_way, other.max_tags_on_way);
        self.max_nodes_on_way = max(self.max_nodes_on_way, other.max_nodes_on_way);
        self.max_way_version = max(self.max_way_version, other.max_way_version);
        self.sum_way_version += other.sum_way_version;

        self.relations += other.relations;
        self.relation_tags += other.relation_tags;
        self.relation_members += other.relation_members;
        self.max_relation_id = max(self.max_relation_id, other.max_relation_id);
        self.max_tags_on_relation = max(self.max_tags_on_relation, other.max_tags_on_relation);
        self.max_members_on_relation =
            max(self.max_members_on_relation, other.max_members_on_relation);
        self.max_relation_version = max(self.max_relation_version, other.max_relation_version);
        self.sum_relation_version += other.sum_relation_version;

        self.anonymous_objects += other.anonymous_objects;
        self.max_uid = max(self.max_uid, other.max_uid);
        self.max_changeset = max(self.max_changeset, other.max_changeset);
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            r#"Nodes:
  count:        {}
  untagged:     {}
  tags:         {}
  max id:       {}
  max version:  {}
Ways:
  count:        {}
  closed:       {}
  tags:         {}
  way nodes:    {}
  max id:       {}
  max nodes:    {}
  max version:  {}
Relations:
  count:        {}
  tags:         {}
  members:      {}
  max id:       {}
  max members:  {}
  max version:  {}
Anonymous objects: {}
Max changeset:     {}"#,
            self.nodes,
            self.nodes_without_tags,
            self.node_tags,
            self.max_node_id,
            self.max_node_version,
            self.ways,
            self.closed_ways,
            self.way_tags,
            self.way_nodes,
            self.max_way_id,
            self.max_nodes_on_way,
            self.max_way_version,
            self.relations,
            self.relation_tags,
            self.relation_members,
            self.max_relation_id,
            self.max_members_on_relation,
            self.max_relation_version,
            self.anonymous_objects,
            self.max_changeset
        )
    }
}
