//! Integration tests for the request/response fabric
//!
//! Covers the deadline path, matched request/response delivery, concurrent
//! callers against one server, a three-node relay pipeline, and the
//! discard-after-abandon rule for late responses.

use rand::Rng;
use sqlchain::transport::{Router, TransportError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn deadline(after: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        timer.cancel();
    });
    token
}

#[tokio::test]
async fn test_request_timeout() {
    let router: Router<String, String> = Router::new();
    let a = router.transport("a");

    // Nobody serves "b", so the deadline fires
    let ctx = deadline(Duration::from_millis(50));
    let result = a
        .request(&ctx, &"b".to_string(), "Test", "happy".to_string())
        .await;

    assert_eq!(result, Err(TransportError::Cancelled));
}

#[tokio::test]
async fn test_successful_request() {
    let router: Router<String, String> = Router::new();

    let server = router.transport("d");
    tokio::spawn(async move {
        let request = server.recv().await.unwrap();
        assert_eq!(request.origin(), "c");
        assert_eq!(request.method(), "Test");
        assert_eq!(request.payload(), "happy");
        request.respond(Ok("happy too".to_string()));
    });

    let ctx = CancellationToken::new();
    let response = router
        .transport("c")
        .request(&ctx, &"d".to_string(), "Test", "happy".to_string())
        .await
        .unwrap();
    assert_eq!(response, "happy too");
}

#[tokio::test]
async fn test_concurrent_requests() {
    let router: Router<String, String> = Router::new();

    let server = router.transport("g");
    tokio::spawn(async move {
        for _ in 0..2 {
            let request = server.recv().await.unwrap();
            assert!(["e", "f"].contains(&request.origin().as_str()));
            assert!(["test1", "test2"].contains(&request.method()));
            assert_eq!(request.payload(), "happy");
            let reply = format!("happy {} {}", request.origin(), request.method());
            request.respond(Ok(reply));
        }
    });

    let ctx = CancellationToken::new();
    let e = router.transport("e");
    let f = router.transport("f");

    let (from_e, from_f) = tokio::join!(
        e.request(&ctx, &"g".to_string(), "test1", "happy".to_string()),
        f.request(&ctx, &"g".to_string(), "test2", "happy".to_string()),
    );

    assert_eq!(from_e.unwrap(), "happy e test1");
    assert_eq!(from_f.unwrap(), "happy f test2");
}

#[tokio::test]
async fn test_piped_request() {
    let router: Router<i64, i64> = Router::new();
    let mut rng = rand::thread_rng();
    let rand_req: i64 = rng.gen();
    let rand_resp: i64 = rng.gen();

    // j relays the payload to k, then relays k's response back
    let j = router.transport("j");
    tokio::spawn(async move {
        let request = j.recv().await.unwrap();
        assert_eq!(request.origin(), "i");
        assert_eq!(request.method(), "pass1");

        let ctx = CancellationToken::new();
        let relayed = j
            .request(&ctx, &"k".to_string(), "pass2", *request.payload())
            .await
            .unwrap();
        request.respond(Ok(relayed));
    });

    let k = router.transport("k");
    tokio::spawn(async move {
        let request = k.recv().await.unwrap();
        assert_eq!(request.origin(), "j");
        assert_eq!(request.method(), "pass2");
        request.respond(Ok(rand_resp));
    });

    let ctx = CancellationToken::new();
    let response = router
        .transport("i")
        .request(&ctx, &"j".to_string(), "pass1", rand_req)
        .await
        .unwrap();
    assert_eq!(response, rand_resp);
}

#[tokio::test]
async fn test_late_response_discarded_after_abandon() {
    let router: Router<String, String> = Router::new();
    let a = router.transport("a");
    let b = router.transport("b");

    // The caller gives up before "b" answers
    let ctx = deadline(Duration::from_millis(20));
    let result = a
        .request(&ctx, &"b".to_string(), "Test", "early".to_string())
        .await;
    assert_eq!(result, Err(TransportError::Cancelled));

    // The late response is discarded, and the endpoint keeps working
    let request = b.recv().await.unwrap();
    request.respond(Ok("too late".to_string()));

    tokio::spawn(async move {
        let request = b.recv().await.unwrap();
        request.respond(Ok("on time".to_string()));
    });

    let ctx = CancellationToken::new();
    let response = a
        .request(&ctx, &"b".to_string(), "Test", "retry".to_string())
        .await
        .unwrap();
    assert_eq!(response, "on time");
}

#[tokio::test]
async fn test_remote_error_is_surfaced() {
    let router: Router<String, String> = Router::new();

    let server = router.transport("b");
    tokio::spawn(async move {
        let request = server.recv().await.unwrap();
        request.respond(Err(TransportError::Remote("no such method".to_string())));
    });

    let ctx = CancellationToken::new();
    let result = router
        .transport("a")
        .request(&ctx, &"b".to_string(), "Unknown", "payload".to_string())
        .await;
    assert_eq!(
        result,
        Err(TransportError::Remote("no such method".to_string()))
    );
}
