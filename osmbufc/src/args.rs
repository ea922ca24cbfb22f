use std::path::PathBuf;

use clap::{Parser, Subcommand};
use osmbuf::ItemType;

/// Reads OpenStreetMap data from osm.pbf or osm xml files and runs handlers over it
#[derive(Debug, Parser)]
#[command(about, version, author)]
pub struct Args {
    /// Verbose mode (-v, -vv, -vvv, etc.)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the bounding box of all nodes
    Bbox {
        /// Input OSM file, `-` for stdin
        input: String,
    },

    /// Print statistics about nodes, ways and relations
    Stats {
        /// Input OSM file, `-` for stdin
        input: String,
    },

    /// Read the input showing progress
    Progress {
        /// Input OSM file, `-` for stdin
        input: String,

        /// Refresh the display every this many entities
        #[arg(long, default_value_t = 1000)]
        step: u64,
    },

    /// Report which multipolygon relations have all their member ways
    Multipolygons {
        /// Input OSM file, must be seekable
        input: String,

        /// Value of the `type` tag of relations to check
        #[arg(long = "type", default_value = "multipolygon")]
        relation_type: String,
    },

    /// Serialize all entities into a binary dump file, with one index file
    /// per entity type next to it
    Serialize {
        /// Input OSM file, `-` for stdin
        input: String,

        /// Output dump file
        output: PathBuf,

        /// Initial buffer capacity in bytes
        #[arg(long, default_value_t = 1 << 20)]
        capacity: usize,

        /// Fail instead of growing the buffer when it is full
        #[arg(long)]
        fixed: bool,

        /// Resolve way node positions from the nodes in the input
        #[arg(long)]
        locations: bool,
    },

    /// Print the entities stored in a dump file
    Dump {
        /// Dump file written by `serialize`
        input: PathBuf,
    },

    /// Look up a single entity in a dump file through its index
    Get {
        /// Dump file written by `serialize`
        input: PathBuf,

        /// Entity type: `n`, `w`, `r` or `node`, `way`, `relation`
        #[arg(value_parser = parse_item_type)]
        item_type: ItemType,

        /// Entity id
        #[arg(allow_negative_numbers = true)]
        id: i64,
    },
}

fn parse_item_type(value: &str) -> Result<ItemType, String> {
    match value {
        "n" | "node" => Ok(ItemType::Node),
        "w" | "way" => Ok(ItemType::Way),
        "r" | "relation" => Ok(ItemType::Relation),
        other => Err(format!(
            "unknown type `{}`, expected one of n, w, r",
            other
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_arguments() {
        let args = Args::try_parse_from(["osmbufc", "get", "data.osmbuf", "w", "-12"]).unwrap();
        match args.command {
            Command::Get {
                input,
                item_type,
                id,
            } => {
                assert_eq!(input, PathBuf::from("data.osmbuf"));
                assert_eq!(item_type, ItemType::Way);
                assert_eq!(id, -12);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(Args::try_parse_from(["osmbufc", "get", "data.osmbuf", "x", "1"]).is_err());
    }
}
