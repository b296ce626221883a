//! End-to-end dispatch through nested applications, trusted proxies and the
//! send pipeline, without a socket.

use std::sync::{Arc, Mutex};

use arbor::{Application, Flow, HandlerError, Method, Request, Settings, StatusCode, TrustProxy, handler};
use serde::{Deserialize, Serialize};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn get(url: &str) -> Request {
    Request::new(Method::GET, url)
}

#[tokio::test]
async fn nested_mounts_see_relative_paths() {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);

    let admin = Application::new()
        .use_("/posts", handler(move |req, _res| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move {
                seen.lock().unwrap().push(format!("{} {} {}", req.path(), req.base_url(), req.original_url()));
                Ok(Flow::Next)
            })
        }))
        .get("/posts/:id", |req, res| {
            Box::pin(async move {
                let id = req.param("id").unwrap_or_default().to_owned();
                res.text(req, id);
                Ok(Flow::Done)
            })
        });
    let blog = Application::new().mount("/admin", admin);
    let app = Application::new().mount("/blog", blog);

    let res = app.dispatch(get("/blog/admin/posts/7?draft=1")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
    assert_eq!(res.body().as_ref(), b"7");
    assert_eq!(*seen.lock().unwrap(), ["/7 /blog/admin/posts /blog/admin/posts/7?draft=1"]);
}

#[tokio::test]
async fn parent_steps_after_a_mount_see_their_own_url() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);

    let app = Application::new()
        .mount("/shop", Application::new().use_root(handler(|_req, _res| {
            Box::pin(async move { Ok(Flow::Next) })
        })))
        .use_root(handler(move |req, _res| {
            let seen = Arc::clone(&seen2);
            Box::pin(async move {
                seen.lock().unwrap().push((req.url().to_owned(), req.base_url().to_owned()));
                Ok(Flow::Next)
            })
        }));

    app.dispatch(get("/shop/cart?id=3")).await;
    assert_eq!(*seen.lock().unwrap(), [("/shop/cart?id=3".to_owned(), String::new())]);
}

#[tokio::test]
async fn sub_app_errors_reach_the_parent_error_handler() {
    let caught = Arc::new(Mutex::new(Vec::new()));
    let caught2 = Arc::clone(&caught);

    let api = Application::new().get("/fail", |_req, _res| {
        Box::pin(async move { Err::<Flow, _>(HandlerError::new(StatusCode::BAD_REQUEST, "bad input")) })
    });

    let app = Application::new()
        .mount("/api", api)
        .on_error(move |err, req, res| {
            caught2.lock().unwrap().push(err.message().to_owned());
            res.status(err.status()).text(req, "parent handled");
        });

    let res = app.dispatch(get("/api/fail")).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(res.body().as_ref(), b"parent handled");
    assert_eq!(*caught.lock().unwrap(), ["bad input"]);
}

#[tokio::test]
async fn sub_app_error_handler_wins_over_the_parent() {
    let parent_calls = Arc::new(Mutex::new(0));
    let parent_calls2 = Arc::clone(&parent_calls);

    let api = Application::new()
        .get("/fail", |_req, _res| {
            Box::pin(async move { Err::<Flow, _>(HandlerError::internal("db down")) })
        })
        .on_error(|err, req, res| {
            res.status(StatusCode::SERVICE_UNAVAILABLE).text(req, format!("api: {}", err.message()));
        });

    let app = Application::new()
        .mount("/api", api)
        .on_error(move |_err, req, res| {
            *parent_calls2.lock().unwrap() += 1;
            res.text(req, "parent");
        });

    let res = app.dispatch(get("/api/fail")).await;
    assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.body().as_ref(), b"api: db down");
    assert_eq!(*parent_calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn default_error_handler_hides_non_500_messages() {
    let app = Application::new().get("/", |_req, _res| {
        Box::pin(async move { Err::<Flow, _>(HandlerError::new(StatusCode::FORBIDDEN, "secret detail")) })
    });

    let res = app.dispatch(get("/")).await;
    assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
    assert_eq!(res.body().as_ref(), b"Forbidden");
}

#[tokio::test]
async fn several_apps_share_one_prefix() {
    let first = Application::new().get("/a", |req, res| {
        Box::pin(async move {
            res.text(req, "first");
            Ok(Flow::Done)
        })
    });
    let second = Application::new().get("/b", |req, res| {
        Box::pin(async move {
            res.text(req, "second");
            Ok(Flow::Done)
        })
    });

    let app = Application::new().use_all("/x", vec![first, second]);
    assert_eq!(app.entries().len(), 2);

    assert_eq!(app.dispatch(get("/x/a")).await.body().as_ref(), b"first");
    assert_eq!(app.dispatch(get("/x/b")).await.body().as_ref(), b"second");
    assert_eq!(app.dispatch(get("/x/c")).await.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn head_mirrors_get_without_a_body() {
    let app = Application::new().get("/doc", |req, res| {
        Box::pin(async move {
            res.text(req, "hello");
            Ok(Flow::Done)
        })
    });

    let get_res = app.dispatch(get("/doc")).await;
    let head_res = app.dispatch(Request::new(Method::HEAD, "/doc")).await;

    assert_eq!(head_res.status_code(), StatusCode::OK);
    assert!(head_res.body().is_empty());
    for name in ["content-type", "content-length", "etag"] {
        assert_eq!(get_res.header(name), head_res.header(name), "{name}");
    }
    assert_eq!(head_res.header("content-length"), Some("5"));
}

#[tokio::test]
async fn matching_etag_yields_304() {
    let app = Application::new().get("/doc", |req, res| {
        Box::pin(async move {
            res.text(req, "hello");
            Ok(Flow::Done)
        })
    });

    let first = app.dispatch(get("/doc")).await;
    let etag = first.header("etag").unwrap().to_owned();
    assert_eq!(etag, "W/\"5-qvTGHdzF6KLavt4PO0gs2a6pQ00\"");

    let res = app.dispatch(get("/doc").with_header("if-none-match", &etag)).await;
    assert_eq!(res.status_code(), StatusCode::NOT_MODIFIED);
    assert!(res.body().is_empty());
    assert!(res.header("content-length").is_none());
    assert!(res.header("content-type").is_none());

    let res = app.dispatch(get("/doc").with_header("if-none-match", "\"stale\"")).await;
    assert_eq!(res.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn one_trusted_hop_exposes_the_client() {
    let app = Application::new()
        .with_settings(Settings::default().trust_proxy(TrustProxy::Hops(1)))
        .unwrap()
        .get("/", |req, res| {
            Box::pin(async move {
                let body = format!("{} {}", req.ip(), req.protocol());
                res.text(req, body);
                Ok(Flow::Done)
            })
        });

    let req = get("/")
        .with_peer("10.0.0.1:4000".parse().unwrap())
        .with_header("x-forwarded-for", "198.51.100.9, 203.0.113.5")
        .with_header("x-forwarded-proto", "https");

    let res = app.dispatch(req).await;
    assert_eq!(res.body().as_ref(), b"203.0.113.5 https");
}

#[tokio::test]
async fn untrusted_peers_cannot_spoof_identity() {
    let app = Application::new().get("/", |req, res| {
        Box::pin(async move {
            let body = format!("{} {}", req.ip(), req.protocol());
            res.text(req, body);
            Ok(Flow::Done)
        })
    });

    let req = get("/")
        .with_peer("192.0.2.44:4000".parse().unwrap())
        .with_header("x-forwarded-for", "1.2.3.4")
        .with_header("x-forwarded-proto", "https");

    let res = app.dispatch(req).await;
    assert_eq!(res.body().as_ref(), b"192.0.2.44 http");
}

#[tokio::test]
async fn toml_settings_drive_proxy_trust() {
    let settings = Settings::from_toml_str(
        r#"
        trust_proxy = "loopback"
        server_header = "edge"
        "#,
    )
    .unwrap();

    let app = Application::new().with_settings(settings).unwrap().get("/", |req, res| {
        Box::pin(async move {
            let body = req.ip().to_string();
            res.text(req, body);
            Ok(Flow::Done)
        })
    });

    let req = get("/").with_header("x-forwarded-for", "203.0.113.77");
    let res = app.dispatch(req).await;
    assert_eq!(res.body().as_ref(), b"203.0.113.77");
    assert_eq!(res.header("x-powered-by"), Some("edge"));
}

#[tokio::test]
async fn subdomains_come_from_the_host_header() {
    let app = Application::new().get("/", |req, res| {
        Box::pin(async move {
            let body = req.subdomains().join(",");
            res.text(req, body);
            Ok(Flow::Done)
        })
    });

    let res = app.dispatch(get("/").with_header("host", "tobi.ferrets.example.com:8080")).await;
    assert_eq!(res.body().as_ref(), b"ferrets,tobi");
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[tokio::test]
async fn json_bodies_round_trip() {
    let app = Application::new().post("/users", |req, res| {
        Box::pin(async move {
            let user: User = match serde_json::from_slice(req.body()) {
                Ok(u) => u,
                Err(e) => return Err(HandlerError::from(e).with_status(StatusCode::BAD_REQUEST)),
            };
            if let Err(e) = res.status(StatusCode::CREATED).json(req, &user) {
                return Err(HandlerError::from(e));
            }
            Ok(Flow::Done)
        })
    });

    let input = User { id: 7, name: "ada".into() };
    let req = Request::new(Method::POST, "/users").with_body(serde_json::to_vec(&input).unwrap());
    let res = app.dispatch(req).await;

    assert_eq!(res.status_code(), StatusCode::CREATED);
    assert_eq!(res.header("content-type"), Some("application/json"));
    let output: User = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(output, input);

    let req = Request::new(Method::POST, "/users").with_body("{not json");
    let res = app.dispatch(req).await;
    assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn redirects_set_location() {
    let app = Application::new().get("/old", |req, res| {
        Box::pin(async move {
            res.redirect(req, "/new");
            Ok(Flow::Done)
        })
    });

    let res = app.dispatch(get("/old")).await;
    assert_eq!(res.status_code(), StatusCode::FOUND);
    assert_eq!(res.header("location"), Some("/new"));
}

#[tokio::test]
async fn mounted_apps_inherit_identity_and_header_settings() {
    let api = Application::new().get("/whoami", |req, res| {
        Box::pin(async move {
            let body = format!("{} {} {}", req.ip(), req.protocol(), req.hostname().unwrap_or_default());
            res.text(req, body);
            Ok(Flow::Done)
        })
    });

    let app = Application::new()
        .with_settings(Settings::default().trust_proxy(TrustProxy::Hops(1)).expose_server_header(false))
        .unwrap()
        .mount("/api", api)
        .route("/v2", |v2| {
            v2.get("/whoami", |req, res| {
                Box::pin(async move {
                    let body = req.ip().to_string();
                    res.text(req, body);
                    Ok(Flow::Done)
                })
            })
        });

    let forwarded = |url: &str| {
        get(url)
            .with_peer("10.0.0.1:4000".parse().unwrap())
            .with_header("x-forwarded-for", "203.0.113.5")
            .with_header("x-forwarded-proto", "https")
            .with_header("x-forwarded-host", "shop.example.com")
    };

    let res = app.dispatch(forwarded("/api/whoami")).await;
    assert_eq!(res.body().as_ref(), b"203.0.113.5 https shop.example.com");
    assert!(res.header("x-powered-by").is_none());

    let res = app.dispatch(forwarded("/v2/whoami")).await;
    assert_eq!(res.body().as_ref(), b"203.0.113.5");
    assert!(res.header("x-powered-by").is_none());
}
