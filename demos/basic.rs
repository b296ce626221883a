//! Minimal arbor example: a mounted JSON API, request logging and health checks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/users/42
//!   curl -X POST http://localhost:3000/api/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/api/users/42
//!   curl -H 'x-forwarded-for: 203.0.113.7' http://localhost:3000/whoami
//!   curl http://localhost:3000/healthz

use arbor::{Application, Flow, HandlerError, Server, Settings, StatusCode, TrustProxy, handler, health};
use serde_json::{Value, json};

#[tokio::main]
async fn main() -> Result<(), arbor::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // nginx on the same host: trust loopback hops only
    let settings = Settings::default().trust_proxy("loopback".parse::<TrustProxy>()?);

    let api = Application::new()
        .get("/users/:id", |req, res| Box::pin(async move {
            let id = req.param("id").unwrap_or("unknown").to_owned();
            res.send(req, json!({ "id": id, "name": "alice" }));
            Ok(Flow::Done)
        }))
        .post("/users", |req, res| Box::pin(async move {
            // malformed JSON becomes a 400 through the error handler
            let input: Value = match serde_json::from_slice(req.body()) {
                Ok(v) => v,
                Err(e) => return Err(HandlerError::from(e).with_status(StatusCode::BAD_REQUEST)),
            };
            res.status(StatusCode::CREATED)
                .send(req, json!({ "id": "99", "name": input["name"] }));
            Ok(Flow::Done)
        }))
        .delete("/users/:id", |req, res| Box::pin(async move {
            res.status(StatusCode::NO_CONTENT).end(req);
            Ok(Flow::Done)
        }));

    let app = Application::new()
        .with_settings(settings)?
        .use_root(handler(|req, _res| Box::pin(async move {
            tracing::info!(method = %req.method(), url = req.original_url(), ip = %req.ip(), "request");
            Ok(Flow::Next)
        })))
        .use_("/api", api)
        .get("/whoami", |req, res| Box::pin(async move {
            let body = json!({ "ip": req.ip().to_string(), "protocol": req.protocol() });
            res.send(req, body);
            Ok(Flow::Done)
        }))
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness);

    Server::bind("0.0.0.0:3000").serve(app).await
}
