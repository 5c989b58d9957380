use std::sync::Arc;

use refill::TokenBucket;
use tokio::time::Duration;

/*
`request` never blocks on the refill period, so it is fine to call straight from async code.
*/

async fn use_bucket_in_shared_way(bucket: Arc<TokenBucket>, task_id: u64) {
    for _ in 0..20 {
        if bucket.request() {
            println!("Task {task_id} granted request");
        } else {
            println!("Task {task_id} denied request");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let bucket = Arc::new(
        TokenBucket::new(
            // 4 tokens per bucket
            4,
            // 5 refills per second
            Duration::from_millis(200),
        )
        .expect("valid bucket parameters"),
    );

    let mut handles = Vec::new();

    for task_id in 0..2 {
        let bucket_clone = bucket.clone();
        let handle = tokio::spawn(async move {
            use_bucket_in_shared_way(bucket_clone, task_id).await;
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap();
    }
}
