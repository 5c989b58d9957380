use std::{
    io::{self, BufRead, Write},
    time::Duration,
};

use refill::{BucketConfig, TokenBucket};

/*
Every line typed is one request. Lines can be empty. Type "q" to quit.

    Please enter token bucket size: 2
    Please enter token bucket refill frequency (seconds): 5
    Please enter request:
    >a
    Request a succeeded
    Please enter request:
    >b
    Request b succeeded
    Please enter request:
    >c
    Request c dropped

    Refill of 2
    >
*/

fn prompt_number(
    lines: &mut impl Iterator<Item = io::Result<String>>,
    prompt: &str,
) -> io::Result<u64> {
    loop {
        print!("{prompt}");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            return Err(io::ErrorKind::UnexpectedEof.into());
        };
        match line?.trim().parse() {
            Ok(value) => return Ok(value),
            Err(_) => println!("Please enter a whole number"),
        }
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    let size = prompt_number(&mut lines, "Please enter token bucket size: ")?;
    let seconds = prompt_number(
        &mut lines,
        "Please enter token bucket refill frequency (seconds): ",
    )?;

    let capacity = u32::try_from(size).unwrap_or(u32::MAX);
    let config = BucketConfig::new(capacity, Duration::from_secs(seconds)).on_refill(|event| {
        print!("\nRefill of {}\n>", event.capacity);
        let _ = io::stdout().flush();
    });
    let bucket = TokenBucket::with_config(config).map_err(io::Error::other)?;

    loop {
        print!("Please enter request: \n>");
        io::stdout().flush()?;
        let Some(request) = lines.next() else {
            break;
        };
        let request = request?;
        if request == "q" {
            break;
        }
        let verdict = if bucket.request() { "succeeded" } else { "dropped" };
        println!("Request {request} {verdict}");
    }

    Ok(())
}
