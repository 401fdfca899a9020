//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lodstar::{AggregationKind, BuildParams, Generator, MAX_DEPTH};

/// Encoding of the input catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CatalogFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// A particle payload file, compact or legacy.
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GeneratorArg {
    /// Fill levels in order of brightness.
    Magnitude,
    /// Breadth-first sampling with a per-level budget.
    Greedy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AggregationArg {
    Brightest,
    Simple,
}

#[derive(Parser, Debug)]
#[command(about = "Generate a streaming octree dataset from a point catalog")]
pub struct Args {
    /// Catalog to read.
    #[arg(long, short)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = CatalogFormat::Csv)]
    pub format: CatalogFormat,

    /// Dataset directory; previous output in it is replaced.
    #[arg(long, short)]
    pub output: PathBuf,

    #[arg(long, value_enum, default_value_t = GeneratorArg::Magnitude)]
    pub generator: GeneratorArg,

    /// Aggregation used by the greedy generator.
    #[arg(long, value_enum, default_value_t = AggregationArg::Brightest)]
    pub aggregation: AggregationArg,

    /// Maximum objects per octant.
    #[arg(long = "maxpart", default_value_t = 100_000)]
    pub max_part: usize,

    #[arg(long = "maxdepth", default_value_t = MAX_DEPTH)]
    pub max_depth: u32,

    /// Leftover count at or below which an octant becomes a leaf.
    #[arg(long = "minpart", default_value_t = 0)]
    pub min_part: usize,

    /// Drop leftover objects instead of keeping them in leaves.
    #[arg(long)]
    pub discard: bool,

    /// Merge small leaves into their parents after generation.
    #[arg(long = "postprocess")]
    pub post_process: bool,

    #[arg(long = "childcount", default_value_t = 100)]
    pub child_count: usize,

    #[arg(long = "parentcount", default_value_t = 1000)]
    pub parent_count: usize,

    /// Ignore objects farther than this from the origin.
    #[arg(long = "distcap")]
    pub dist_cap: Option<f64>,
}

impl Args {
    pub fn build_params(&self) -> BuildParams {
        BuildParams {
            generator: match self.generator {
                GeneratorArg::Magnitude => Generator::MagnitudeLevelled,
                GeneratorArg::Greedy => Generator::GreedyBreadthFirst,
            },
            aggregation: match self.aggregation {
                AggregationArg::Brightest => AggregationKind::Brightest,
                AggregationArg::Simple => AggregationKind::BrightestSimple,
            },
            max_part: self.max_part,
            max_depth: self.max_depth,
            min_part: self.min_part,
            post_process: self.post_process,
            child_count: self.child_count,
            parent_count: self.parent_count,
            discard: self.discard,
        }
    }
}
