use std::io::Write;
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use env_logger::Env;
use log::error;
use serde_json::Value;

use cuopt_sh_client::{
    client_version, ClientConfig, CuOptClient, CuOptError, DeleteFilter, JobOutcome,
    ProblemPayload, RepollResponse, ResponseType, SubmitOptions,
};

#[derive(Parser, Debug)]
#[command(name = "cuopt-sh", version = client_version(), about = "Client for a self-hosted cuOpt server")]
struct Arguments {
    #[command(flatten)]
    server: ServerArgs,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for values read from CUOPT_* environment variables
#[derive(Args, Debug)]
struct ServerArgs {
    #[arg(short, long)]
    ip: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Talk to the server over HTTPS
    #[arg(long)]
    https: bool,

    /// Self-signed certificate to trust
    #[arg(long)]
    cert: Option<String>,

    /// Do not verify the server certificate
    #[arg(long)]
    insecure: bool,

    /// Seconds between polls
    #[arg(long)]
    polling_interval: Option<f64>,

    /// Seconds to poll before giving up
    #[arg(long, conflicts_with = "no_timeout")]
    polling_timeout: Option<f64>,

    /// Poll until a result arrives
    #[arg(long)]
    no_timeout: bool,

    /// On timeout print the request id instead of failing
    #[arg(long)]
    no_raise: bool,

    /// Only validate the input
    #[arg(long)]
    only_validate: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a problem and wait for the result
    Solve {
        /// Problem file(s), a server-side path with --server-path, or a cached request id
        #[arg(required = true)]
        data: Vec<String>,

        /// Treat DATA as a path under the server's data directory
        #[arg(short = 'f', long)]
        server_path: bool,

        /// Cache the data on the server and print its request id
        #[arg(short, long)]
        cache: bool,

        /// Name of the result file written by the server
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Poll again for a request that timed out
    Repoll {
        req_id: String,

        /// Print the raw mapping even for LP results
        #[arg(long)]
        dict: bool,
    },
    /// Delete cached data or abort a job ('*' matches all)
    Delete {
        id: String,

        #[arg(long)]
        running: Option<bool>,

        #[arg(long)]
        queued: Option<bool>,

        #[arg(long)]
        cached: Option<bool>,
    },
}

fn seconds(secs: f64) -> Result<Duration, CuOptError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| CuOptError::Config(format!("invalid number of seconds: {}", secs)))
}

fn build_config(args: &ServerArgs) -> Result<ClientConfig, CuOptError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(ip) = &args.ip {
        config = config.with_ip(ip.as_str());
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if args.https {
        config = config.with_https(true);
    }
    if let Some(cert) = &args.cert {
        config = config.with_self_signed_cert(cert.as_str());
    }
    if args.insecure {
        config = config.with_insecure(true);
    }
    if let Some(secs) = args.polling_interval {
        config = config.with_polling_interval(seconds(secs)?);
    }
    if let Some(secs) = args.polling_timeout {
        config = config.with_polling_timeout(Some(seconds(secs)?));
    }
    if args.no_timeout {
        config = config.with_polling_timeout(None);
    }
    if args.no_raise {
        config = config.with_timeout_exception(false);
    }
    if args.only_validate {
        config = config.with_only_validate(true);
    }
    Ok(config)
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!("{}", value),
    }
}

fn print_outcome(outcome: JobOutcome) {
    match outcome {
        JobOutcome::Completed(result) | JobOutcome::Failed(result) => {
            print_json(&result.into_value())
        }
        JobOutcome::Pending(ack) => {
            if let Some(id) = ack.request_id() {
                eprintln!("Request is pending, repoll with: cuopt-sh repoll {}", id);
            }
            print_json(&ack.into_value());
        }
    }
}

fn run(args: Arguments) -> Result<(), CuOptError> {
    let config = build_config(&args.server)?;
    let client = CuOptClient::new(config)?;

    match args.command {
        Command::Solve {
            data,
            server_path,
            cache,
            output,
        } => {
            let payload = if data.len() == 1 {
                ProblemPayload::from(data[0].as_str())
            } else {
                ProblemPayload::Files(data.into_iter().map(Into::into).collect())
            };
            let mut options = SubmitOptions::new()
                .server_path(server_path)
                .cache(cache);
            if let Some(output) = output {
                options = options.output(output);
            }
            print_outcome(client.get_optimized_routes(payload, &options)?);
        }
        Command::Repoll { req_id, dict } => {
            let response_type = if dict {
                ResponseType::Dict
            } else {
                ResponseType::Obj
            };
            match client.repoll(req_id, response_type)? {
                RepollResponse::Mapping(outcome) => print_outcome(outcome),
                RepollResponse::Solution(lp) => match serde_json::to_value(&lp.solutions) {
                    Ok(solutions) => print_json(&solutions),
                    Err(e) => return Err(CuOptError::Decode(e.to_string())),
                },
            }
        }
        Command::Delete {
            id,
            running,
            queued,
            cached,
        } => {
            let filter = DeleteFilter {
                running,
                queued,
                cached,
            };
            print_json(&client.delete(&id, filter)?);
        }
    }
    Ok(())
}

fn main() {
    dotenv().ok();
    let args = Arguments::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(args.log_level.as_str()))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} {} {}",
                buf.timestamp_millis(),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        if let Some(id) = e.request_id() {
            eprintln!("Repoll with: cuopt-sh repoll {}", id);
        }
        process::exit(1);
    }
}
