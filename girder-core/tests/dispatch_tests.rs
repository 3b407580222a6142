use girder_core::{
    Application, Args, ArgumentMetadata, CatchInterceptor, ControllerBuilder, DispatchOptions,
    Error, FnGuard, FnPipe, HttpRequest, HttpResponse, Interceptor, MetadataRegistry,
    ModuleBuilder, Next, ParamBinding, ProviderDescriptor, RequestContext, RouteBuilder,
    TimingInterceptor, async_trait, compile_application,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// Records entry and exit around the rest of the pipeline.
struct Trace {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Interceptor for Trace {
    async fn intercept(&self, _ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        self.log.lock().push(format!("{}:in", self.name));
        let result = next.run().await;
        self.log.lock().push(format!("{}:out", self.name));
        result
    }
}

/// Answers without calling the handler.
struct ShortCircuit;

#[async_trait]
impl Interceptor for ShortCircuit {
    async fn intercept(&self, _ctx: &RequestContext, _next: Next<'_>) -> Result<HttpResponse, Error> {
        Ok(HttpResponse::new(203).with_body("cached"))
    }
}

struct Users;

fn trace(token: &'static str, log: &Log) -> ProviderDescriptor {
    let log = log.clone();
    ProviderDescriptor::interceptor(token, move |_| {
        Ok(Trace {
            name: token,
            log: log.clone(),
        })
    })
}

fn app(registry: &MetadataRegistry, module: ModuleBuilder) -> Application {
    let root = module.register(registry);
    compile_application(registry, &root.id).unwrap()
}

#[tokio::test]
async fn test_path_query_and_body_binding() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App").controller(
            ControllerBuilder::new("Users", |_| Ok(Users))
                .base_path("/users")
                .route(
                    RouteBuilder::post("/:id/rename", "rename")
                        .param(ParamBinding::path("id"))
                        .param(ParamBinding::query("notify"))
                        .param(ParamBinding::body_field("name"))
                        .to(|_: Arc<Users>, args: Args| async move {
                            let id: String = args.get(0)?;
                            let notify: Option<String> = args.get(1)?;
                            let name: String = args.get(2)?;
                            HttpResponse::json(&json!({
                                "id": id,
                                "notify": notify,
                                "name": name,
                            }))
                        }),
                ),
        ),
    );

    let request = HttpRequest::new("POST", "/users/42/rename?notify=yes")
        .with_json(&json!({"name": "ada"}))
        .unwrap();
    let response = application.dispatch(request).await;

    assert_eq!(response.status, 200);
    let body: Value = response.body_json().unwrap();
    assert_eq!(body, json!({"id": "42", "notify": "yes", "name": "ada"}));
}

#[tokio::test]
async fn test_interceptors_nest_in_declaration_order() {
    let log: Log = Arc::default();
    let registry = MetadataRegistry::new();
    let handler_log = log.clone();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(trace("Outer", &log))
            .provider(trace("Inner", &log))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users))
                    .interceptor("Outer")
                    .route(RouteBuilder::get("/", "list").interceptor("Inner").to(
                        move |_: Arc<Users>, _: Args| {
                            let log = handler_log.clone();
                            async move {
                                log.lock().push("handler".to_string());
                                Ok(HttpResponse::ok())
                            }
                        },
                    )),
            ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(
        *log.lock(),
        vec!["Outer:in", "Inner:in", "handler", "Inner:out", "Outer:out"]
    );
}

#[tokio::test]
async fn test_interceptor_short_circuit_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = MetadataRegistry::new();
    let counter = calls.clone();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::interceptor("Cache", |_| Ok(ShortCircuit)))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users)).route(
                    RouteBuilder::get("/", "list").interceptor("Cache").to(
                        move |_: Arc<Users>, _: Args| {
                            counter.fetch_add(1, Ordering::SeqCst);
                            async { Ok(HttpResponse::ok()) }
                        },
                    ),
                ),
            ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 203);
    assert_eq!(response.body_ref(), b"cached");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_catch_interceptor_translates_handler_error() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::interceptor("Teapot", |_| {
                Ok(CatchInterceptor::new(|e: Error| match e {
                    Error::Handler(_) => Err(Error::http(418, "short and stout")),
                    other => Err(other),
                }))
            }))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users)).route(
                    RouteBuilder::get("/", "list")
                        .interceptor("Teapot")
                        .to(|_: Arc<Users>, _: Args| async { Err(Error::handler("kettle")) }),
                ),
            ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 418);
    let body: Value = response.body_json().unwrap();
    assert_eq!(body["message"], "short and stout");
}

#[tokio::test]
async fn test_rejecting_guard_stops_pipeline() {
    let second = Arc::new(AtomicUsize::new(0));
    let handled = Arc::new(AtomicUsize::new(0));
    let registry = MetadataRegistry::new();

    let second_calls = second.clone();
    let handler_calls = handled.clone();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::guard("Deny", |_| {
                Ok(FnGuard::new(|_: &RequestContext| Ok(false)))
            }))
            .provider(ProviderDescriptor::guard("Count", move |_| {
                let calls = second_calls.clone();
                Ok(FnGuard::new(move |_: &RequestContext| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }))
            }))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users))
                    .guard("Deny")
                    .route(RouteBuilder::get("/", "list").guard("Count").to(
                        move |_: Arc<Users>, _: Args| {
                            handler_calls.fetch_add(1, Ordering::SeqCst);
                            async { Ok(HttpResponse::ok()) }
                        },
                    )),
            ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 403);
    let body: Value = response.body_json().unwrap();
    assert_eq!(body["error"], "Forbidden");
    assert_eq!(body["message"], "Forbidden resource");
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_guard_errors_map_to_status() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::guard("NeedsLogin", |_| {
                Ok(FnGuard::new(|_: &RequestContext| {
                    Err(Error::Unauthorized("Login required".into()))
                }))
            }))
            .provider(ProviderDescriptor::guard("Broken", |_| {
                Ok(FnGuard::new(|_: &RequestContext| {
                    Err(Error::Internal("lookup table missing".into()))
                }))
            }))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users))
                    .route(
                        RouteBuilder::get("/private", "private")
                            .guard("NeedsLogin")
                            .to(|_: Arc<Users>, _: Args| async { Ok(HttpResponse::ok()) }),
                    )
                    .route(
                        RouteBuilder::get("/broken", "broken")
                            .guard("Broken")
                            .to(|_: Arc<Users>, _: Args| async { Ok(HttpResponse::ok()) }),
                    ),
            ),
    );

    let unauthorized = application.dispatch(HttpRequest::new("GET", "/private")).await;
    assert_eq!(unauthorized.status, 401);
    let body: Value = unauthorized.body_json().unwrap();
    assert_eq!(body["message"], "Login required");

    let broken = application.dispatch(HttpRequest::new("GET", "/broken")).await;
    assert_eq!(broken.status, 403);
}

#[tokio::test]
async fn test_pipe_failure_names_argument() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::pipe("Int", |_| {
                Ok(FnPipe::new(|value: Value, _: &ArgumentMetadata<'_>| {
                    value
                        .as_str()
                        .and_then(|s| s.parse::<i64>().ok())
                        .map(Value::from)
                        .ok_or_else(|| Error::BadRequest("expected an integer".into()))
                }))
            }))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users)).route(
                    RouteBuilder::get("/users/:id", "show")
                        .param(ParamBinding::path("id").pipe("Int"))
                        .to(|_: Arc<Users>, args: Args| async move {
                            let id: i64 = args.get(0)?;
                            HttpResponse::json(&json!({ "id": id }))
                        }),
                ),
            ),
    );

    let ok = application.dispatch(HttpRequest::new("GET", "/users/7")).await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body_json::<Value>().unwrap()["id"], 7);

    let bad = application.dispatch(HttpRequest::new("GET", "/users/seven")).await;
    assert_eq!(bad.status, 400);
    let body: Value = bad.body_json().unwrap();
    assert_eq!(body["errors"][0]["field"], "id");
    assert_eq!(body["message"], "id: expected an integer");
}

#[tokio::test]
async fn test_raw_response_draft_is_merged() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App").controller(
            ControllerBuilder::new("Users", |_| Ok(Users)).route(
                RouteBuilder::post("/users", "create")
                    .param(ParamBinding::raw_response())
                    .param(ParamBinding::raw_request())
                    .to(|_: Arc<Users>, args: Args| async move {
                        let draft = args.response(0)?;
                        let request = args.request(1)?;
                        draft.set_status(201);
                        draft.set_header("Location", "/users/1");
                        Ok(HttpResponse::ok().with_body(request.path.clone()))
                    }),
            ),
        ),
    );

    let response = application.dispatch(HttpRequest::new("POST", "/users")).await;
    assert_eq!(response.status, 201);
    assert_eq!(response.header("location").unwrap(), "/users/1");
    assert_eq!(response.body_ref(), b"/users");
}

#[tokio::test]
async fn test_handler_panic_is_internal_error() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App").controller(
            ControllerBuilder::new("Users", |_| Ok(Users)).route(
                RouteBuilder::get("/boom", "boom").to(|_: Arc<Users>, _: Args| async move {
                    let items: Vec<u8> = Vec::new();
                    Ok(HttpResponse::ok().with_body(items[3].to_string()))
                }),
            ),
        ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/boom")).await;
    assert_eq!(response.status, 500);
    let body: Value = response.body_json().unwrap();
    assert_eq!(body["message"], "Internal server error");

    // The application keeps serving after a panic
    let again = application.dispatch(HttpRequest::new("GET", "/boom")).await;
    assert_eq!(again.status, 500);
}

#[tokio::test]
async fn test_error_details_exposed_when_enabled() {
    let registry = MetadataRegistry::new();
    let root = ModuleBuilder::new("App")
        .controller(
            ControllerBuilder::new("Users", |_| Ok(Users)).route(
                RouteBuilder::get("/", "list")
                    .to(|_: Arc<Users>, _: Args| async { Err(Error::handler("disk full")) }),
            ),
        )
        .register(&registry);
    let application = Application::compile(
        &registry,
        &root.id,
        DispatchOptions {
            expose_error_details: true,
        },
    )
    .unwrap();

    let body: Value = application
        .dispatch(HttpRequest::new("GET", "/"))
        .await
        .body_json()
        .unwrap();
    assert_eq!(body["statusCode"], 500);
    assert!(body["detail"].as_str().unwrap().contains("disk full"));
}

#[tokio::test]
async fn test_timing_interceptor_adds_header() {
    let registry = MetadataRegistry::new();
    let application = app(
        &registry,
        ModuleBuilder::new("App")
            .provider(ProviderDescriptor::interceptor("Timing", |_| Ok(TimingInterceptor)))
            .controller(
                ControllerBuilder::new("Users", |_| Ok(Users))
                    .interceptor("Timing")
                    .route(RouteBuilder::get("/", "list").to(|_: Arc<Users>, _: Args| async {
                        Ok(HttpResponse::ok())
                    })),
            ),
    );

    let response = application.dispatch(HttpRequest::new("GET", "/")).await;
    assert!(response.header("x-response-time").unwrap().ends_with("ms"));
}

struct Session {
    id: usize,
}

struct Profile {
    session: Arc<Session>,
}

/// Stamps the request's session id on the way out.
struct SessionStamp {
    session: Arc<Session>,
}

#[async_trait]
impl Interceptor for SessionStamp {
    async fn intercept(&self, _ctx: &RequestContext, next: Next<'_>) -> Result<HttpResponse, Error> {
        let response = next.run().await?;
        Ok(response.with_header("x-session", self.session.id.to_string()))
    }
}

fn session_app(sessions: Arc<AtomicUsize>, released: Arc<AtomicUsize>) -> Application {
    let registry = MetadataRegistry::new();
    app(
        &registry,
        ModuleBuilder::new("App")
            .provider(
                ProviderDescriptor::provide("Session", move |_| {
                    Ok(Session {
                        id: sessions.fetch_add(1, Ordering::SeqCst),
                    })
                })
                .request_scoped()
                .on_teardown(move |_| {
                    released.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .provider(
                ProviderDescriptor::interceptor("Stamp", |deps| {
                    Ok(SessionStamp {
                        session: deps.get::<Session>(0)?,
                    })
                })
                .depends_on(["Session"])
                .request_scoped(),
            )
            .controller(
                ControllerBuilder::new("Profile", |deps| {
                    Ok(Profile {
                        session: deps.get::<Session>(0)?,
                    })
                })
                .depends_on(["Session"])
                .request_scoped()
                .route(
                    RouteBuilder::get("/me", "me")
                        .interceptor("Stamp")
                        .to(|profile: Arc<Profile>, _: Args| async move {
                            Ok(HttpResponse::ok().with_body(profile.session.id.to_string()))
                        }),
                )
                .route(RouteBuilder::get("/slow", "slow").to(
                    |profile: Arc<Profile>, _: Args| async move {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        Ok(HttpResponse::ok().with_body(profile.session.id.to_string()))
                    },
                )),
            ),
    )
}

#[tokio::test]
async fn test_request_scope_shared_within_request_only() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));
    let application = Arc::new(session_app(sessions.clone(), released.clone()));

    let first = {
        let application = application.clone();
        tokio::spawn(async move { application.dispatch(HttpRequest::new("GET", "/me")).await })
    };
    let second = {
        let application = application.clone();
        tokio::spawn(async move { application.dispatch(HttpRequest::new("GET", "/me")).await })
    };
    let first = first.await.unwrap();
    let second = second.await.unwrap();

    for response in [&first, &second] {
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body_ref().to_vec()).unwrap();
        assert_eq!(response.header("x-session").unwrap(), &body);
    }
    assert_ne!(first.body_ref(), second.body_ref());
    assert_eq!(sessions.load(Ordering::SeqCst), 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancelled_request_releases_scope() {
    let released = Arc::new(AtomicUsize::new(0));
    let application = session_app(Arc::new(AtomicUsize::new(0)), released.clone());

    let outcome = application
        .dispatch_cancellable(
            HttpRequest::new("GET", "/slow"),
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

    assert!(outcome.is_none());
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
