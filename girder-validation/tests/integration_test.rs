//! Pipes running inside a compiled application

use girder_core::{
    Application, Args, ControllerBuilder, FieldError, HttpRequest, HttpResponse,
    MetadataRegistry, ModuleBuilder, ParamBinding, ProviderDescriptor, RouteBuilder,
    compile_application,
};
use girder_validation::{
    DefaultValuePipe, IsEmail, MinLength, ParseIntPipe, TrimPipe, Validate, ValidationPipe,
    collect_errors,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Deserialize)]
struct SignUp {
    name: String,
    email: String,
}

impl Validate for SignUp {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        collect_errors([
            MinLength(2).validate(&self.name, "name"),
            IsEmail::validate(&self.email, "email"),
        ])
    }
}

struct Accounts;

fn application() -> Application {
    let registry = MetadataRegistry::new();
    let root = ModuleBuilder::new("AccountsModule")
        .provider(ProviderDescriptor::pipe("ParseInt", |_| Ok(ParseIntPipe)))
        .provider(ProviderDescriptor::pipe("DefaultPage", |_| {
            Ok(DefaultValuePipe::new("1"))
        }))
        .provider(ProviderDescriptor::pipe("Trim", |_| Ok(TrimPipe)))
        .provider(ProviderDescriptor::pipe("SignUpDto", |_| {
            Ok(ValidationPipe::<SignUp>::new())
        }))
        .controller(
            ControllerBuilder::new("Accounts", |_| Ok(Accounts))
                .base_path("/accounts")
                .route(
                    RouteBuilder::get("/", "list")
                        .param(ParamBinding::query("page").pipe("DefaultPage").pipe("ParseInt"))
                        .param(ParamBinding::query("q").pipe("Trim"))
                        .to(|_: Arc<Accounts>, args: Args| async move {
                            let page: i64 = args.get(0)?;
                            let q: Option<String> = args.get(1)?;
                            HttpResponse::json(&json!({ "page": page, "q": q }))
                        }),
                )
                .route(
                    RouteBuilder::post("/", "sign_up")
                        .param(ParamBinding::body().pipe("SignUpDto"))
                        .to(|_: Arc<Accounts>, args: Args| async move {
                            let input: SignUp = args.get(0)?;
                            Ok(HttpResponse::created().with_body(input.name))
                        }),
                ),
        )
        .register(&registry);
    compile_application(&registry, &root.id).unwrap()
}

#[tokio::test]
async fn test_default_then_parse() {
    let app = application();

    let body: Value = app
        .dispatch(HttpRequest::new("GET", "/accounts"))
        .await
        .body_json()
        .unwrap();
    assert_eq!(body, json!({"page": 1, "q": null}));

    let body: Value = app
        .dispatch(HttpRequest::new("GET", "/accounts?page=3&q=%20ada%20"))
        .await
        .body_json()
        .unwrap();
    assert_eq!(body, json!({"page": 3, "q": "ada"}));
}

#[tokio::test]
async fn test_bad_query_is_rejected() {
    let response = application()
        .dispatch(HttpRequest::new("GET", "/accounts?page=two"))
        .await;
    assert_eq!(response.status, 400);
    let body: Value = response.body_json().unwrap();
    assert_eq!(body["errors"][0]["field"], "page");
    assert_eq!(body["errors"][0]["value"], "two");
}

#[tokio::test]
async fn test_dto_validation() {
    let app = application();

    let created = app
        .dispatch(
            HttpRequest::new("POST", "/accounts")
                .with_json(&json!({"name": "Ada", "email": "ada@example.com"}))
                .unwrap(),
        )
        .await;
    assert_eq!(created.status, 201);
    assert_eq!(created.body_ref(), b"Ada");

    let rejected = app
        .dispatch(
            HttpRequest::new("POST", "/accounts")
                .with_json(&json!({"name": "A", "email": "nope"}))
                .unwrap(),
        )
        .await;
    assert_eq!(rejected.status, 400);
    let body: Value = rejected.body_json().unwrap();
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["name", "email"]);
}
