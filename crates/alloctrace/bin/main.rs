use clap::{Parser, ValueEnum};
use eyre::Result;

use alloctrace::{Format, LoggingAlloc, Shared};

// The driver's own prints (and their formatting allocations) stay out of the
// trace.
macro_rules! banner {
    ($($arg:tt)*) => {
        alloctrace::untraced(|| println!($($arg)*))
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// Raw heap object wrapped by a handle; control record allocated apart
    Split,
    /// Control block and payload in one heap allocation
    Combined,
    /// Combined allocation drawn from the logging allocator
    Allocator,
    All,
}

impl Strategy {
    fn selected(self, wanted: Strategy) -> bool {
        self == wanted || self == Strategy::All
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl From<OutputFormat> for Format {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Table => Format::Table,
            OutputFormat::Json => Format::Json,
            OutputFormat::JsonPretty => Format::JsonPretty,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    version,
    about,
    long_about = "alloctrace demo: construct one shared value per strategy and watch which
allocation path each construction exercises"
)]
struct Args {
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[arg(long, value_enum, default_value = "all")]
    strategy: Strategy,

    /// Skip the per-event echo lines; only the summary is printed
    #[arg(long)]
    quiet: bool,
}

/// The constructed value: a single 64-bit field.
#[derive(Debug)]
struct Probe {
    a: i64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _trace = alloctrace::init!(alloctrace::TraceBuilder::new()
        .format(args.format.into())
        .echo(!args.quiet));
    let _scope = alloctrace::scope();

    banner!("size_of::<Probe>() = {}", std::mem::size_of::<Probe>());

    if args.strategy.selected(Strategy::Split) {
        banner!("\nsplit: raw heap object wrapped by a handle");
        {
            let probe = Shared::split(Probe { a: 1 });
            banner!("probe.a = {}", probe.a);
        }
        sync();
    }

    if args.strategy.selected(Strategy::Combined) {
        banner!("\ncombined: control block and payload in one allocation");
        {
            let probe = Shared::new(Probe { a: 2 });
            banner!("probe.a = {}", probe.a);
        }
        sync();
    }

    if args.strategy.selected(Strategy::Allocator) {
        banner!("\nallocator: combined allocation via LoggingAlloc");
        {
            let probe = Shared::new_in(Probe { a: 3 }, LoggingAlloc::new());
            banner!("probe.a = {}", probe.a);
        }
        sync();
    }

    banner!("\nend");
    Ok(())
}

// Waits until the worker has folded in every event sent so far, keeping the
// echo lines ordered relative to the banners.
fn sync() {
    let _ = alloctrace::ledger();
}
