use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use memmap2::MmapOptions;
use spanjoin::pipeline::load_records;
use spanjoin::{Counters, DecodedKey, Error, JoinConfig, LocalJoin, OwnedJoinResult};

/// Options shared by every command
#[derive(Debug, Clone, Default)]
struct Options {
    config: JoinConfig,
    dotted: bool,
}

/// Print a usage message
fn print_usage() {
    println!("SpanJoin - Partitioned Range Containment Join");
    println!("Usage:");
    println!("  spanjoin [OPTIONS] COMMAND [ARGS]");
    println!();
    println!("Options:");
    println!("  --partitions N     Number of partitions (default: 1)");
    println!("  --range-sep C      Range separator character (default: ':')");
    println!("  --point-suffix C   Point key suffix character (default: ';')");
    println!("  --window N         Initial active window capacity (default: 1000)");
    println!("  --dotted           Print addresses as dotted quads");
    println!("  --resolve-hosts    Resolve hostnames in keys");
    println!("  --help             Show this help message");
    println!();
    println!("Commands:");
    println!("  join RANGES POINTS          Join point records against range records");
    println!("  brute-force RANGES POINTS   Same join, checking every pair");
    println!("  span RANGES                 Print the partitioned keys for each record");
    println!("  partition KEY...            Print the partition of each key");
    println!("  version                     Show version information");
    println!();
    println!("Input files hold KEY<TAB>VALUE lines; POINTS may also hold access-log lines.");
}

fn option_value(args: &mut Vec<String>, i: usize, name: &str) -> Result<String, String> {
    if i + 1 < args.len() {
        args.remove(i);
        Ok(args.remove(i))
    } else {
        Err(format!("Missing value for {}", name))
    }
}

fn option_char(args: &mut Vec<String>, i: usize, name: &str) -> Result<char, String> {
    let value = option_value(args, i, name)?;
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(format!("{} takes a single character", name)),
    }
}

/// Parse command line arguments
fn parse_args(mut args: Vec<String>) -> Result<(Options, String, Vec<String>), String> {
    let mut options = Options::default();

    // Options come before the command; everything from the command on is positional
    while let Some(arg) = args.first().cloned() {
        match arg.as_str() {
            "--partitions" => {
                let value = option_value(&mut args, 0, "--partitions")?;
                options.config.num_partitions = value
                    .parse::<u32>()
                    .map_err(|_| "Invalid partition count".to_string())?;
            }
            "--range-sep" => {
                options.config.range_separator = option_char(&mut args, 0, "--range-sep")?;
            }
            "--point-suffix" => {
                options.config.point_suffix = option_char(&mut args, 0, "--point-suffix")?;
            }
            "--window" => {
                let value = option_value(&mut args, 0, "--window")?;
                options.config.window_capacity = value
                    .parse::<usize>()
                    .map_err(|_| "Invalid window capacity".to_string())?;
            }
            "--dotted" => {
                options.dotted = true;
                args.remove(0);
            }
            "--resolve-hosts" => {
                options.config.resolve_hostnames = true;
                args.remove(0);
            }
            _ => break,
        }
    }

    if args.is_empty() {
        return Err("Missing command".to_string());
    }

    let command = args.remove(0);
    Ok((options, command, args))
}

/// Read a whole input file through a memory map
fn load_file(path: &Path) -> Result<String, Error> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(String::new());
    }
    // Safety: the file is only read, and only while it stays mapped here
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    Ok(String::from_utf8_lossy(&mmap).into_owned())
}

fn load_inputs(
    join: &LocalJoin,
    args: &[String],
    counters: &Counters,
) -> Result<Vec<(DecodedKey, String)>, Error> {
    if args.len() < 2 {
        return Err(Error::Config("Missing RANGES or POINTS argument".to_string()));
    }
    let mut records = load_records(&load_file(Path::new(&args[0]))?, join.codec(), counters, false);
    records.extend(load_records(&load_file(Path::new(&args[1]))?, join.codec(), counters, true));
    Ok(records)
}

fn write_results(
    out: &mut impl Write,
    results: &[OwnedJoinResult<String>],
    dotted: bool,
) -> Result<(), Error> {
    for result in results {
        writeln!(out, "{}", result.to_tsv(dotted))?;
    }
    Ok(())
}

/// Handle join command
fn handle_join(options: &Options, args: &[String], out: &mut impl Write) -> Result<Counters, Error> {
    let join = LocalJoin::new(options.config.clone())?;
    let counters = Counters::new();
    let records = load_inputs(&join, args, &counters)?;
    let results = join.run_decoded(records, &counters);
    write_results(out, &results, options.dotted)?;
    Ok(counters)
}

/// Handle brute-force command
fn handle_brute_force(options: &Options, args: &[String], out: &mut impl Write) -> Result<Counters, Error> {
    let join = LocalJoin::new(options.config.clone())?;
    let counters = Counters::new();
    let records = load_inputs(&join, args, &counters)?;
    write_results(out, &join.brute_force(records), options.dotted)?;
    Ok(counters)
}

/// Handle span command
fn handle_span(options: &Options, args: &[String], out: &mut impl Write) -> Result<Counters, Error> {
    let path = args
        .first()
        .ok_or_else(|| Error::Config("Missing RANGES argument".to_string()))?;
    let join = LocalJoin::new(options.config.clone())?;
    let counters = Counters::new();
    let records = load_records(&load_file(Path::new(path))?, join.codec(), &counters, false);

    let mut routed = Vec::new();
    for (key, value) in records {
        join.partitioner().route(&key, value, &counters, |record| routed.push(record));
    }
    for record in routed {
        writeln!(out, "{}\t{}\t{}", record.partition, record.key, record.value)?;
    }
    Ok(counters)
}

/// Handle partition command
fn handle_partition(options: &Options, args: &[String], out: &mut impl Write) -> Result<Counters, Error> {
    if args.is_empty() {
        return Err(Error::Config("Missing KEY argument".to_string()));
    }
    let join = LocalJoin::new(options.config.clone())?;
    for key in args {
        match join.partitioner().get_partition(key.as_bytes()) {
            Ok(partition) => writeln!(out, "{}\t{}", key, partition)?,
            Err(err) => eprintln!("Error: {}", err),
        }
    }
    Ok(Counters::new())
}

/// Handle version command
fn handle_version(out: &mut impl Write) -> Result<Counters, Error> {
    writeln!(out, "SpanJoin v{}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "Partitioned Range Containment Join")?;
    Ok(Counters::new())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() || args.iter().any(|arg| arg == "--help") {
        print_usage();
        std::process::exit(0);
    }

    // Parse command line arguments
    let (options, command, args) = match parse_args(args) {
        Ok(result) => result,
        Err(err) => {
            eprintln!("Error: {}", err);
            print_usage();
            std::process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    // Dispatch command
    let result = match command.as_str() {
        "join" => handle_join(&options, &args, &mut out),
        "brute-force" => handle_brute_force(&options, &args, &mut out),
        "span" => handle_span(&options, &args, &mut out),
        "partition" => handle_partition(&options, &args, &mut out),
        "version" => handle_version(&mut out),
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            std::process::exit(1);
        }
    };
    out.flush()?;

    // Handle errors
    match result {
        Ok(counters) => {
            if !counters.snapshot().is_empty() {
                eprint!("{}", counters);
            }
        }
        Err(err) => {
            eprintln!("Error: {}", err);
            std::process::exit(1);
        }
    }

    Ok(())
}
