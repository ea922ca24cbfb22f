use crate::error::Result;
use crate::handler::Handler;
use crate::object::{Node, Relation, Way};

use pbr::ProgressBar;

use std::io::{self, Stderr, Write};

/// Shows the number of nodes, ways and relations read so far.
///
/// The display is refreshed every `step` entities of a kind.
pub struct Progress<W: Write = Stderr> {
    bar: ProgressBar<W>,
    step: u64,
    nodes: u64,
    ways: u64,
    relations: u64,
}

impl Progress<Stderr> {
    pub fn new(step: u64) -> Self {
        Self::on(io::stderr(), step)
    }
}

impl<W: Write> Progress<W> {
    pub fn on(writer: W, step: u64) -> Self {
        // the total is unknown, only show counters
        let mut bar = ProgressBar::on(writer, 0);
        bar.show_bar = false;
        bar.show_percent = false;
        bar.show_counter = false;
        bar.show_speed = false;
        bar.show_time_left = false;
        Self {
            bar,
            step: step.max(1),
            nodes: 0,
            ways: 0,
            relations: 0,
        }
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    pub fn ways(&self) -> u64 {
        self.ways
    }

    pub fn relations(&self) -> u64 {
        self.relations
    }

    fn update(&mut self) {
        let mut message = format!("[{}]", self.nodes);
        if self.ways > 0 || self.relations > 0 {
            message.push_str(&format!(" [{}]", self.ways));
            if self.relations > 0 {
                message.push_str(&format!(" [{}]", self.relations));
            }
        }
        self.bar.message(&message);
        self.bar.tick();
    }
}

impl<W: Write> Handler for Progress<W> {
    fn on_init(&mut self) -> Result<()> {
        self.update();
        Ok(())
    }

    fn on_node(&mut self, _node: &mut Node) -> Result<()> {
        self.nodes += 1;
        if self.nodes % self.step == 0 {
            self.update();
        }
        Ok(())
    }

    fn on_way(&mut self, _way: &mut Way) -> Result<()> {
        self.ways += 1;
        if self.ways % self.step == 0 {
            self.update();
        }
        Ok(())
    }

    fn on_relation(&mut self, _relation: &mut Relation) -> Result<()> {
        self.relations += 1;
        if self.relations % self.step == 0 {
            self.update();
        }
        Ok(())
    }

    fn on_final(&mut self) -> Result<()> {
        self.update();
        self.bar.finish();
        Ok(())
    }
}
