mod args;

use crate::args::Command;

use clap::Parser;
use colored::*;
use itertools::Itertools;
use log::info;
use memmap2::Mmap;
use osmbuf::handlers::{FindBbox, MemberWays, NodeLocations, Progress, Statistics};
use osmbuf::{
    Growth, Item, ItemIndex, ItemType, Items, Reader, SerializationBuffer, SerializationHandler,
};

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

type Error = Box<dyn std::error::Error>;

fn bbox(input: &str) -> Result<(), Error> {
    let mut reader = Reader::new(osmbuf::open(input)?);
    let mut handler = FindBbox::new();
    match reader.apply(&mut handler) {
        // stopped reading at the first way
        Err(e) if e.is_abort() => (),
        other => {
            other?;
        }
    }
    println!("{}", handler.bounds());
    Ok(())
}

fn stats(input: &str) -> Result<(), Error> {
    let mut reader = Reader::new(osmbuf::open(input)?);
    let mut stats = Statistics::new();
    reader.apply(&mut stats)?;
    println!("{}", stats);
    Ok(())
}

fn progress(input: &str, step: u64) -> Result<(), Error> {
    let mut reader = Reader::new(osmbuf::open(input)?);
    let counts = reader.apply(Progress::new(step))?;
    println!(
        "{} nodes, {} ways, {} relations",
        counts.nodes, counts.ways, counts.relations
    );
    Ok(())
}

fn multipolygons(input: &str, relation_type: &str) -> Result<(), Error> {
    let mut reader = Reader::new(osmbuf::open(input)?);
    let mut handler = MemberWays::new(relation_type);
    reader.apply_two_pass(&mut handler)?;

    let (complete, incomplete): (Vec<_>, Vec<_>) =
        handler.statuses().iter().partition(|s| s.is_complete());
    for status in &incomplete {
        println!(
            "relation {}: missing ways {}",
            status.relation,
            status.missing.iter().join(", ")
        );
    }
    println!(
        "{} complete, {} incomplete relations",
        complete.len(),
        incomplete.len()
    );
    Ok(())
}

fn serialize(
    input: &str,
    output: &Path,
    capacity: usize,
    fixed: bool,
    locations: bool,
) -> Result<(), Error> {
    let growth = if fixed { Growth::Fixed } else { Growth::Double };
    let mut buffer = SerializationBuffer::new(capacity, growth);
    let mut reader = Reader::new(osmbuf::open(input)?);

    let index = if locations {
        let mut handler = (
            NodeLocations::new(),
            SerializationHandler::with_index(&mut buffer),
        );
        reader.apply(&mut handler)?;
        info!("Unresolved way nodes: {}", handler.0.unresolved());
        handler.1.into_index()
    } else {
        let mut handler = SerializationHandler::with_index(&mut buffer);
        reader.apply(&mut handler)?;
        handler.into_index()
    };

    info!(
        "Writing {} items ({} bytes) to {}",
        buffer.count(),
        buffer.len(),
        output.display()
    );
    let mut writer = BufWriter::new(File::create(output)?);
    buffer.write_to(&mut writer)?;
    writer.flush()?;

    if let Some(index) = index {
        index.save(output)?;
    }
    Ok(())
}

fn print_item<W: Write>(out: &mut W, item: &Item) -> Result<(), Error> {
    write!(
        out,
        "{} {} v{}{}",
        item.item_type(),
        item.id(),
        item.version(),
        if item.visible() { "" } else { " deleted" }
    )?;
    match item.item_type() {
        ItemType::Node => {
            if let Some(position) = item.position()? {
                write!(out, " {}", position)?;
            }
        }
        ItemType::Way => {
            let refs: Vec<i64> = item.way_nodes()?.map(|n| n.node_ref()).collect();
            write!(out, " [{}]", refs.iter().join(" "))?;
        }
        ItemType::Relation => {
            let members: Vec<_> = item.members()?.collect::<osmbuf::Result<_>>()?;
            let members = members.iter().format_with(" ", |m, f| {
                f(&format_args!("{}/{}:{}", m.member_type, m.member_ref, m.role))
            });
            write!(out, " [{}]", members)?;
        }
    }
    let tags: Vec<_> = item.tags()?.collect::<osmbuf::Result<_>>()?;
    if !tags.is_empty() {
        write!(
            out,
            " {{{}}}",
            tags.iter().map(|(k, v)| format!("{}={}", k, v)).join(", ")
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn dump(input: &Path) -> Result<(), Error> {
    let file = File::open(input)?;
    let data = unsafe { Mmap::map(&file)? };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0;
    for item in Items::new(&data) {
        print_item(&mut out, &item?)?;
        count += 1;
    }
    out.flush()?;
    info!("Dumped {} items", count);
    Ok(())
}

fn get(input: &Path, item_type: ItemType, id: i64) -> Result<(), Error> {
    let index = ItemIndex::load(input)?;
    let offset = index
        .get(item_type, id)
        .ok_or_else(|| format!("{} {} not found in {}", item_type, id, input.display()))?;

    let file = File::open(input)?;
    let data = unsafe { Mmap::map(&file)? };
    let item = Item::new(&data, offset)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    print_item(&mut out, &item)?;
    Ok(())
}

fn run(args: args::Args) -> Result<(), Error> {
    match args.command {
        Command::Bbox { input } => bbox(&input),
        Command::Stats { input } => stats(&input),
        Command::Progress { input, step } => progress(&input, step),
        Command::Multipolygons {
            input,
            relation_type,
        } => multipolygons(&input, &relation_type),
        Command::Serialize {
            input,
            output,
            capacity,
            fixed,
            locations,
        } => serialize(&input, &output, capacity, fixed, locations),
        Command::Dump { input } => dump(&input),
        Command::Get {
            input,
            item_type,
            id,
        } => get(&input, item_type, id),
    }
}

fn main() {
    let args = args::Args::parse();
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_module_path(false)
        .format_timestamp_nanos()
        .init();

    if let Err(e) = run(args) {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }
}
