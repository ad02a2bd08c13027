use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use strata::middleware::body_parser;
use strata::{Application, BoxFuture, Context, Error, Options, ResponseBody, from_fn};

fn app() -> Application {
    Application::with_options(Options::default().silent(true))
}

fn get(path: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(path).body(Full::default()).unwrap()
}

async fn text(res: http::Response<ResponseBody>) -> String {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn push(calls: &Arc<Mutex<Vec<u32>>>, before: u32, after: u32) -> impl strata::Middleware {
    let calls = Arc::clone(calls);
    from_fn(move |ctx, next| {
        let calls = Arc::clone(&calls);
        Box::pin(async move {
            calls.lock().unwrap().push(before);
            next.run(ctx).await?;
            calls.lock().unwrap().push(after);
            Ok(())
        })
    })
}

fn nothing(_ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async { Ok(()) })
}

#[tokio::test]
async fn routers_added_while_serving_are_reachable() {
    let app = app();
    let router1 = app.create_router("/route1").unwrap();
    router1
        .get("/abc", |ctx| Box::pin(async move {
            ctx.set_body("gocha1");
            Ok(())
        }))
        .unwrap();

    assert_eq!(app.handle(get("/")).await.status(), StatusCode::NOT_FOUND);
    let res = app.handle(get("/route1/abc")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(text(res).await, "gocha1");
    assert_eq!(app.handle(get("/route2/abc")).await.status(), StatusCode::NOT_FOUND);

    let router2 = app.create_router("/route2").unwrap();
    router2
        .get("/abc", |ctx| Box::pin(async move {
            ctx.set_body("gocha2");
            Ok(())
        }))
        .unwrap();
    assert_eq!(text(app.handle(get("/route2/abc")).await).await, "gocha2");
}

#[tokio::test]
async fn params_are_decoded() {
    let app = app();
    let router = app.create_router("/router").unwrap();
    router
        .get("/:foo/abc", |ctx| Box::pin(async move {
            let foo = ctx.param("foo").map(str::to_owned);
            assert_eq!(ctx.params().len(), 1);
            ctx.set_status(StatusCode::OK);
            ctx.set_body(foo);
            Ok(())
        }))
        .unwrap();

    let res = app.handle(get("/router/bar/abc")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(text(res).await, "bar");

    assert_eq!(text(app.handle(get("/router/caf%C3%A9%20au%20lait/abc")).await).await, "café au lait");
}

#[tokio::test]
async fn scoped_middleware_wrap_the_handler() {
    let app = app();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let router = app.create_router("/router").unwrap();
    router.with(push(&calls, 1, 6));
    router.with(push(&calls, 2, 5));
    router.with(push(&calls, 3, 4));
    router.get("/get", nothing).unwrap();

    // The handler sets nothing, so the response stays a 404.
    assert_eq!(app.handle(get("/router/get")).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(*calls.lock().unwrap(), [1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn global_middleware_wrap_scoped_ones() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut app = app();
    app.with(push(&calls, 1, 8)).with(push(&calls, 2, 7));

    let api = app.create_router("/api").unwrap();
    api.with(push(&calls, 3, 6));
    let v1 = api.sub_route("/v1").unwrap();
    v1.with(push(&calls, 4, 5));
    v1.get("/items", |ctx| Box::pin(async move {
        ctx.set_body("items");
        Ok(())
    }))
    .unwrap();

    let res = app.handle(get("/api/v1/items")).await;
    assert_eq!(text(res).await, "items");
    assert_eq!(*calls.lock().unwrap(), [1, 2, 3, 4, 5, 6, 7, 8]);

    // Unmatched requests only see the global layers.
    calls.lock().unwrap().clear();
    app.handle(get("/elsewhere")).await;
    assert_eq!(*calls.lock().unwrap(), [1, 2, 7, 8]);
}

#[tokio::test]
async fn sibling_scopes_do_not_leak_middleware() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let app = app();
    let admin = app.create_router("/admin").unwrap();
    admin.with(push(&calls, 1, 2));
    admin.get("/", nothing).unwrap();
    app.create_router("/public").unwrap().get("/", nothing).unwrap();

    app.handle(get("/public")).await;
    assert!(calls.lock().unwrap().is_empty());
    app.handle(get("/admin")).await;
    assert_eq!(*calls.lock().unwrap(), [1, 2]);
}

#[tokio::test]
async fn short_circuit_skips_the_handler() {
    let app = app();
    let reached = Arc::new(AtomicUsize::new(0));
    let private = app.create_router("/private").unwrap();
    private.with(from_fn(|ctx, next| Box::pin(async move {
        if ctx.get("authorization").is_none() {
            ctx.set_status(StatusCode::UNAUTHORIZED);
            return Ok(());
        }
        next.run(ctx).await
    })));
    let counter = Arc::clone(&reached);
    private
        .get("/data", move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                ctx.set_body("secret");
                Ok(())
            })
        })
        .unwrap();

    let res = app.handle(get("/private/data")).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(text(res).await, "Unauthorized");
    assert_eq!(reached.load(Ordering::SeqCst), 0);

    let authorized = http::Request::get("/private/data")
        .header("authorization", "Bearer t")
        .body(Full::<Bytes>::default())
        .unwrap();
    assert_eq!(text(app.handle(authorized).await).await, "secret");
    assert_eq!(reached.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deep_failures_reach_observers_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut app = app();
    let sink = Arc::clone(&seen);
    app.on_error(move |err, ctx| sink.lock().unwrap().push((err.status(), ctx.path().to_owned())));
    app.with(push(&calls, 1, 10));

    let router = app.create_router("/deep").unwrap();
    router.with(push(&calls, 2, 20));
    router
        .get("/fail", |_ctx| Box::pin(async { Err(Error::http(503, "backend unavailable")) }))
        .unwrap();

    let res = app.handle(get("/deep/fail")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    // 5xx messages stay private.
    assert_eq!(text(res).await, "Service Unavailable");
    assert_eq!(*calls.lock().unwrap(), [1, 2]);
    assert_eq!(*seen.lock().unwrap(), [(StatusCode::SERVICE_UNAVAILABLE, "/deep/fail".to_owned())]);
}

#[tokio::test]
async fn exposed_errors_carry_their_message_and_headers() {
    let app = app();
    app.router()
        .get("/limited", |ctx| Box::pin(async move {
            ctx.set_header("x-dropped", "1")?;
            Err(Error::from(
                strata::HttpError::new(429)
                    .with_message("slow down")
                    .with_header("retry-after", "10"),
            ))
        }))
        .unwrap();

    let res = app.handle(get("/limited")).await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()["retry-after"], "10");
    assert!(res.headers().get("x-dropped").is_none());
    assert_eq!(text(res).await, "slow down");
}

#[tokio::test]
async fn empty_bodies_become_no_content() {
    let app = app();
    app.router()
        .delete("/items/:id", |ctx| Box::pin(async move {
            ctx.set_body(());
            Ok(())
        }))
        .unwrap();

    let req = http::Request::delete("/items/3").body(Full::<Bytes>::default()).unwrap();
    let res = app.handle(req).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.headers().get("content-type").is_none());
    assert_eq!(text(res).await, "");
}

#[tokio::test]
async fn constrained_params_fall_through_to_siblings() {
    let app = app();
    let users = app.create_router("/users").unwrap();
    users
        .get("/:id(\\d+)", |ctx| Box::pin(async move {
            let body = format!("id {}", ctx.param("id").unwrap_or_default());
            ctx.set_body(body);
            Ok(())
        }))
        .unwrap()
        .get("/:name", |ctx| Box::pin(async move {
            let body = format!("name {}", ctx.param("name").unwrap_or_default());
            ctx.set_body(body);
            Ok(())
        }))
        .unwrap();

    assert_eq!(text(app.handle(get("/users/42")).await).await, "id 42");
    assert_eq!(text(app.handle(get("/users/ada")).await).await, "name ada");
}

#[tokio::test]
async fn parsed_bodies_reach_handlers() {
    let mut app = app();
    app.with(body_parser());
    app.router()
        .post("/echo", |ctx| Box::pin(async move {
            let body = ctx.request().body().cloned().unwrap_or_default();
            ctx.set_status(StatusCode::CREATED);
            ctx.set_body(body);
            Ok(())
        }))
        .unwrap();

    let payload = r#"{"name":"ada","langs":["rust"]}"#;
    let req = http::Request::post("/echo")
        .header("content-type", "application/json")
        .header("content-length", payload.len())
        .body(Full::new(Bytes::from_static(payload.as_bytes())))
        .unwrap();
    let res = app.handle(req).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(res.headers()["content-type"], "application/json; charset=utf-8");
    let echoed: serde_json::Value = serde_json::from_str(&text(res).await).unwrap();
    assert_eq!(echoed, serde_json::json!({ "name": "ada", "langs": ["rust"] }));

    let malformed = http::Request::post("/echo")
        .header("content-type", "application/json")
        .header("content-length", "5")
        .body(Full::new(Bytes::from_static(b"{nope")))
        .unwrap();
    assert_eq!(app.handle(malformed).await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn state_flows_down_the_pipeline() {
    #[derive(Debug)]
    struct RequestId(u64);

    let mut app = app();
    app.with(from_fn(|ctx, next| Box::pin(async move {
        ctx.state_mut().insert(RequestId(7));
        next.run(ctx).await
    })));
    app.router()
        .get("/id", |ctx| Box::pin(async move {
            let id = ctx.state().get::<RequestId>().map_or(0, |id| id.0);
            ctx.set_body(id.to_string());
            Ok(())
        }))
        .unwrap();

    assert_eq!(text(app.handle(get("/id")).await).await, "7");
}

#[tokio::test]
async fn redirects() {
    let app = app();
    app.router()
        .get("/old", |ctx| Box::pin(async move { ctx.redirect("/new") }))
        .unwrap();

    let res = app.handle(get("/old")).await;
    assert_eq!(res.status(), StatusCode::FOUND);
    assert_eq!(res.headers()["location"], "/new");
    assert_eq!(text(res).await, "Redirecting to /new.");
}
