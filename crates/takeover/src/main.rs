use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use takeover::cancel::CancelToken;
use takeover::config::{ScanConfig, DEFAULT_THREADS, DEFAULT_TIMEOUT_SECS};
use takeover::dns::{DnsResolver, DEFAULT_RESOLVER};
use takeover::fingerprint::FingerprintDb;
use takeover::http::HttpFetcher;
use takeover::log::init_tracing_subscriber;
use takeover::oracle::DnsRegistrationOracle;
use takeover::report::{ensure_dir, Reporter};
use takeover::scan::scan;
use takeover::targets::{load_hosts, load_resolvers};
use takeover::verify::Engine;
use takeover::{Error, Result};
use tracing::{error, info, warn};

fn cli() -> Command {
    Command::new(clap::crate_name!())
        .version(clap::crate_version!())
        .about("Find subdomains whose CNAME points at an unclaimed cloud service")
        .subcommand(
            Command::new("fingerprints")
                .about("List the loaded fingerprints")
                .arg(fingerprints_arg())
                .arg(edge_arg()),
        )
        .arg(
            Arg::new("domain")
                .short('d')
                .long("domain")
                .value_name("HOST")
                .help("Single host to check"),
        )
        .arg(
            Arg::new("wordlist")
                .short('w')
                .long("wordlist")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("File with one host per line"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("Number of concurrent workers [default: 10]"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .help("Seconds to wait before an HTTP request times out [default: 10]"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write results to FILE (JSON array if it ends in .json)"),
        )
        .arg(
            Arg::new("ssl")
                .long("ssl")
                .action(ArgAction::SetTrue)
                .help("Force HTTPS connections"),
        )
        .arg(
            Arg::new("all")
                .short('a')
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Verify every host, not only those with a known service CNAME"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Report hosts that are not vulnerable too"),
        )
        .arg(
            Arg::new("manual")
                .short('m')
                .long("manual")
                .action(ArgAction::SetTrue)
                .help("Report dead CNAME targets that need manual review"),
        )
        .arg(fingerprints_arg())
        .arg(edge_arg())
        .arg(
            Arg::new("resolvers")
                .short('r')
                .long("resolvers")
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("File of alternate DNS servers, one picked at random per query"),
        )
        .arg(
            Arg::new("resolver")
                .long("resolver")
                .value_name("IP[:PORT]")
                .default_value(DEFAULT_RESOLVER)
                .help("Default DNS server"),
        )
        .arg(
            Arg::new("logs")
                .short('s')
                .long("logs")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Also save logs into a .log file in DIR"),
        )
        .arg_required_else_help(true)
}

fn fingerprints_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Fingerprint database (defaults to the bundled one)")
}

fn edge_arg() -> Arg {
    Arg::new("edge")
        .short('e')
        .long("edge")
        .action(ArgAction::SetTrue)
        .help("Include experimental fingerprints")
}

fn load_fingerprints(path: Option<&PathBuf>, include_edge: bool) -> Result<FingerprintDb> {
    match path {
        Some(path) => FingerprintDb::load(path, include_edge),
        None => FingerprintDb::bundled(include_edge),
    }
}

fn build_config(args: &ArgMatches) -> Result<ScanConfig> {
    let alternate_resolvers = match args.get_one::<PathBuf>("resolvers") {
        Some(path) => load_resolvers(path)?,
        None => Vec::new(),
    };

    Ok(ScanConfig {
        threads: *args.get_one::<usize>("threads").unwrap_or(&DEFAULT_THREADS),
        timeout: Duration::from_secs(
            *args
                .get_one::<u64>("timeout")
                .unwrap_or(&DEFAULT_TIMEOUT_SECS),
        ),
        force_https: args.get_flag("ssl"),
        exhaustive: args.get_flag("all"),
        verbose: args.get_flag("verbose"),
        manual: args.get_flag("manual"),
        include_edge: args.get_flag("edge"),
        default_resolver: args
            .get_one::<String>("resolver")
            .cloned()
            .unwrap_or_else(|| DEFAULT_RESOLVER.to_string()),
        alternate_resolvers,
        fingerprints: args.get_one::<PathBuf>("config").cloned(),
        output: args.get_one::<PathBuf>("output").cloned(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli().get_matches();

    if let Some(("fingerprints", args)) = cli.subcommand() {
        let db = load_fingerprints(args.get_one::<PathBuf>("config"), args.get_flag("edge"))?;
        db.display_all();
        return Ok(());
    }

    // create filename
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let filename = format!("run_{}", timestamp);

    let log_dir = cli.get_one::<PathBuf>("logs");
    if let Some(dir) = log_dir {
        ensure_dir(dir)?;
    }
    init_tracing_subscriber(log_dir.map(PathBuf::as_path), &filename);

    let single = cli.get_one::<String>("domain").map(String::as_str);
    let wordlist = cli.get_one::<PathBuf>("wordlist").map(PathBuf::as_path);
    if single.is_none() && wordlist.is_none() {
        error!("{:12} - a host (-d) or a wordlist (-w) is required", "CLI ERROR");
        return Err(Error::CliUsage("missing -d or -w".into()));
    }

    // load time: any failure here aborts before the first request
    let config = Arc::new(build_config(&cli)?);
    let hosts = load_hosts(single, wordlist)?;
    let fingerprints = Arc::new(load_fingerprints(
        config.fingerprints.as_ref(),
        config.include_edge,
    )?);
    let resolver = Arc::new(DnsResolver::new(
        &config.default_resolver,
        &config.alternate_resolvers,
    )?);
    let oracle = Arc::new(DnsRegistrationOracle::new(&config.default_resolver)?);
    let fetcher = Arc::new(HttpFetcher::new()?);
    let engine = Arc::new(Engine::new(
        fingerprints,
        resolver,
        fetcher,
        oracle,
        config.clone(),
    ));

    let reporter = Reporter::spawn(config.output.clone())?;
    let cancel = CancelToken::new();
    spawn_ctrl_c(cancel.clone());

    info!("Scanning {} hosts ({})", hosts.len(), filename);
    let summary = scan(hosts, engine, config, reporter.sink(), cancel).await;
    reporter.finish().await?;

    if summary.cancelled {
        warn!("{:12} - results are partial", "CANCELLED");
    }
    Ok(())
}

fn spawn_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("{:12} - stopping workers", "CTRL-C");
            cancel.cancel();
        }
    });
}
