use std::{sync::Arc, thread, time::Duration};

use refill::{BucketConfig, RefillMode, TokenBucket};

/*
Share a bucket across multiple threads. No outer Mutex is needed, the bucket locks internally.
*/

fn use_bucket_in_shared_way(bucket: Arc<TokenBucket>) {
    for _ in 0..20 {
        if bucket.request() {
            println!("Thread {:?} granted request", thread::current().id());
        } else {
            println!("Thread {:?} denied request", thread::current().id());
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let config = BucketConfig::new(
        // 4 tokens per bucket
        4,
        // 2 refills per second
        Duration::from_millis(500),
    )
    // 2 tokens per refill
    .refill_mode(RefillMode::Add(2))
    .on_refill(|event| {
        println!(
            "Refill #{}: {} -> {}",
            event.sequence, event.previous, event.current
        )
    });
    let bucket = Arc::new(TokenBucket::with_config(config).expect("valid bucket parameters"));

    let mut threads = Vec::new();
    for _ in 0..2 {
        let bucket_clone = bucket.clone();
        let handle = thread::spawn(move || use_bucket_in_shared_way(bucket_clone));
        threads.push(handle);
    }

    for handle in threads {
        handle.join().unwrap();
    }
}
