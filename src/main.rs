//! Print a pre-signed URL for every URL given on the command line.
//! Credentials may come from the environment variables S3_ACCESS and S3_SECRET.
//! Usage:
//! ```shell
//! $ S3_ACCESS=<access> S3_SECRET=<secret> s3sign -d 2h --method PUT \
//!    https://s3.amazonaws.com/<bucket>/<key>
//! $ curl --upload-file <file> <url>
//! ```
use clap::Parser;
use error_chain::ChainedError;
use s3sign::{ErrorKind, Result};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "s3sign", version, about = "Generate pre-signed S3 URLs")]
struct Args {
    /// Access key
    #[arg(long, env = "S3_ACCESS")]
    id: String,
    /// Secret key
    #[arg(long, env = "S3_SECRET", hide_env_values = true)]
    key: String,
    /// Duration to expiration in seconds, or e.g. 90s, 1.5h, 1h30m, 500ms, 2d
    #[arg(short = 'd', long = "duration", default_value = "1h", value_parser = duration_arg)]
    duration: Duration,
    /// HTTP method to sign for
    #[arg(long, default_value = "GET")]
    method: String,
    /// URLs to sign
    #[arg(value_name = "URL", required = true)]
    urls: Vec<String>,
}

//------------------------------------------------------------------------------
/// Parse a plain number of seconds or a sequence of decimal numbers, each with
/// an optional fraction and a unit: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`
/// or `d`.
fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = || ErrorKind::InvalidDuration(text.to_string());
    if text.is_empty() {
        return Err(invalid().into());
    }
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = text;
    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c)).unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let (unit, tail) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));
        let nanos_per_unit: u128 = match unit {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 60 * 60 * 1_000_000_000,
            "d" => 24 * 60 * 60 * 1_000_000_000,
            _ => return Err(invalid().into()),
        };
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid().into());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        let mut nanos = whole.checked_mul(nanos_per_unit).ok_or_else(invalid)?;
        let mut scale = nanos_per_unit;
        for c in fraction.chars() {
            let digit = c.to_digit(10).ok_or_else(invalid)?;
            scale /= 10;
            nanos += u128::from(digit) * scale;
        }
        let nanos = u64::try_from(nanos).map_err(|_| invalid())?;
        total = total
            .checked_add(Duration::from_nanos(nanos))
            .ok_or_else(invalid)?;
        rest = tail;
    }
    Ok(total)
}

fn duration_arg(text: &str) -> std::result::Result<Duration, String> {
    parse_duration(text).map_err(|err| err.to_string())
}

/// Verbs are signed upper-case, so `put` and `PUT` yield the same URL.
fn signing_method(method: &str) -> String {
    method.to_uppercase()
}

//------------------------------------------------------------------------------
fn main() -> std::result::Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let method = signing_method(&args.method);
    let expires = s3sign::expiration(&chrono::Utc::now(), args.duration)
        .map_err(|err| err.display_chain().to_string())?;
    debug!(expires, method = %method, count = args.urls.len(), "signing urls");

    let results = s3sign::pre_sign_urls(&args.urls, &args.id, &args.key, expires, &method);
    for (url, result) in args.urls.iter().zip(results) {
        match result {
            Ok(signed) => println!("{}", signed),
            Err(err) => error!(url = %url, "{}", err.display_chain()),
        }
    }
    Ok(())
}
