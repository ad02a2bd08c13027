//! Minimal strata example: scoped routers, middleware, JSON bodies.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl http://localhost:3000/api/users/alice
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'authorization: Bearer demo' \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -i -X DELETE http://localhost:3000/api/users/42 -H 'authorization: Bearer demo'

use std::time::Instant;

use serde::Deserialize;
use strata::middleware::{body_parser, trace};
use strata::{Application, BoxFuture, Context, Server, from_fn};

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main]
async fn main() -> strata::Result<()> {
    tracing_subscriber::fmt::init();

    let mut app = Application::new();
    app.with(trace())
        .with(from_fn(|ctx, next| Box::pin(async move {
            let started = Instant::now();
            next.run(ctx).await?;
            let elapsed = format!("{}ms", started.elapsed().as_millis());
            ctx.set_header("x-response-time", &elapsed)
        })))
        .with(body_parser());

    let api = app.create_router("/api")?;
    api.get("/", |ctx| Box::pin(async move {
        ctx.set_body(serde_json::json!({ "version": 1 }));
        Ok(())
    }))?;

    let users = api.sub_route("/users")?;
    // Writes under /api/users need a token; reads do not.
    users.with(from_fn(|ctx, next| Box::pin(async move {
        let reading = [http::Method::GET, http::Method::HEAD].contains(ctx.method());
        if !reading {
            ctx.assert(ctx.get("authorization").is_some(), 401, "missing token")?;
        }
        next.run(ctx).await
    })));
    users
        .get("/:id(\\d+)", get_user)?
        .get("/:name", find_user)?
        .post("/", create_user)?
        .delete("/:id(\\d+)", delete_user)?;

    Server::bind("0.0.0.0:3000")?.serve(app).await
}

fn get_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let id: u64 = ctx
            .param("id")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ctx.throw(400, "bad id"))?;
        ctx.set_body(serde_json::json!({ "id": id, "name": "alice" }));
        Ok(())
    })
}

fn find_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let name = ctx.param("name").unwrap_or_default().to_owned();
        ctx.set_body(serde_json::json!({ "id": 42, "name": name }));
        Ok(())
    })
}

fn create_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let parsed = ctx.request().body_as::<NewUser>();
        let Some(user) = parsed.map_err(|e| ctx.throw(400, e.to_string()))? else {
            return Err(ctx.throw(400, "expected a JSON body"));
        };
        ctx.set_status(http::StatusCode::CREATED);
        ctx.set_header("location", "/api/users/99")?;
        ctx.set_body(serde_json::json!({ "id": 99, "name": user.name }));
        Ok(())
    })
}

fn delete_user(ctx: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        ctx.set_status(http::StatusCode::NO_CONTENT);
        Ok(())
    })
}
