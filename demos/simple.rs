use std::time::Duration;

use refill::TokenBucket;

/*
Showcases rate limiting with a simple example.

Output:

    Request 0 granted
    Request 1 granted
    Request 2 granted
    Request 3 granted
    Request 4 denied
    Request 5 granted
    ...
*/

fn main() {
    tracing_subscriber::fmt::init();

    let bucket = TokenBucket::new(
        // 4 tokens per bucket
        4,
        // 1 refill per second
        Duration::from_secs(1),
    )
    .expect("valid bucket parameters");

    for i in 0..20 {
        if bucket.request() {
            println!("Request {i} granted");
        } else {
            println!("Request {i} denied");
        }
        std::thread::sleep(Duration::from_millis(200));
    }
}
