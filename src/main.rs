use aidlens::{
    aggregate::{self, GroupKey, ValueField},
    config::Config,
    dashboard::Dashboard,
    dataset::{self, Dataset},
    export::{self, TableFormat},
    filter::{self, Selection},
};
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Filter and aggregate aid disbursement results by sector, indicator and year"
)]
struct Cli {
    /// YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Dataset: CSV, ZIP of CSVs, Parquet, or a glob pattern (overrides config)
    #[arg(short, long, global = true)]
    data: Option<String>,

    #[command(flatten)]
    filters: FilterArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct FilterArgs {
    /// Fiscal years to keep (default: all)
    #[arg(long, global = true, value_delimiter = ',')]
    years: Option<Vec<i64>>,

    /// Sectors to keep (default: all)
    #[arg(long, global = true, value_delimiter = ',')]
    sectors: Option<Vec<String>>,

    /// Result names to keep (default: all offered under the year/sector filter)
    #[arg(long, global = true, value_delimiter = ',')]
    results: Option<Vec<String>>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the selectable years, sectors and result names
    Options,
    /// Build every dashboard view as one JSON document
    Report {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Grouped sums over the filtered rows
    Aggregate {
        /// Group keys, e.g. sector_name,result_name
        #[arg(long, value_delimiter = ',', default_value = "sector_name")]
        by: Vec<GroupKey>,
        #[arg(long, default_value = "value")]
        field: ValueField,
        /// Keep only the N largest groups
        #[arg(long)]
        top: Option<usize>,
        /// Only rows classified as human-impact
        #[arg(long)]
        human_only: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Export the filtered detail table
    Table {
        #[arg(short, long)]
        out: PathBuf,
        /// Defaults to the output file's extension
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Csv,
    Parquet,
}

impl From<FormatArg> for TableFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Csv => TableFormat::Csv,
            FormatArg::Parquet => TableFormat::Parquet,
        }
    }
}

/// Unset filters select everything, like a multiselect with every option ticked.
fn build_selection(ds: &Dataset, args: &FilterArgs) -> Result<Selection> {
    let mut selection = Selection {
        years: match &args.years {
            Some(years) => years.iter().copied().collect(),
            None => filter::distinct_years(ds).into_iter().collect(),
        },
        sectors: match &args.sectors {
            Some(sectors) => sectors.iter().map(|s| s.trim().to_string()).collect(),
            None => filter::distinct_sectors(ds).into_iter().collect(),
        },
        results: None,
    };
    let offered = filter::options(ds, &selection)?.results;
    selection.results = Some(match &args.results {
        Some(results) => results.iter().map(|r| r.trim().to_string()).collect(),
        None => offered.into_iter().collect(),
    });
    Ok(selection)
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(data) = &cli.data {
        cfg.data = data.clone();
    }
    info!(data = %cfg.data, "loading dataset");

    let ds = dataset::load_dataset(&cfg.data, &cfg.classifier())?;
    let selection = build_selection(&ds, &cli.filters)?;

    match cli.command {
        Command::Options => {
            let opts = filter::options(&ds, &selection)?;
            export::write_json(&opts, None)?;
        }
        Command::Report { out } => {
            let dash = Dashboard::build(&ds, &selection, &cfg.dashboard)?;
            export::write_json(&dash, out.as_deref())?;
        }
        Command::Aggregate {
            by,
            field,
            top,
            human_only,
            out,
        } => {
            let mut rows = filter::filter(&ds, &selection)?;
            if human_only {
                rows = filter::human_impact(&rows)?;
            }
            let groups = aggregate::aggregate(&rows, &by, field);
            let groups = match top {
                Some(n) => aggregate::top_n(groups, n),
                None => groups,
            };
            info!(groups = groups.len(), field = %field, "aggregated");
            export::write_json(&groups, out.as_deref())?;
        }
        Command::Table { out, format } => {
            let rows = filter::filter(&ds, &selection)?;
            let format = format
                .map(TableFormat::from)
                .unwrap_or_else(|| TableFormat::from_path(&out));
            export::write_table(&rows, &out, format)?;
        }
    }

    Ok(())
}
