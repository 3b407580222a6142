//! Driving an application through the test client

use girder_core::{
    Args, ControllerBuilder, HttpResponse, ModuleBuilder, ParamBinding, ProviderDescriptor,
    RouteBuilder,
};
use girder_testing::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

struct Notes {
    mailer: Arc<MockService<String>>,
}

fn builder(mailer: MockService<String>) -> TestAppBuilder {
    TestAppBuilder::new(
        ModuleBuilder::new("NotesModule")
            .provider(ProviderDescriptor::value("Mailer", MockService::<String>::new()))
            .controller(
                ControllerBuilder::new("Notes", |deps| {
                    Ok(Notes {
                        mailer: deps.get::<MockService<String>>(0)?,
                    })
                })
                .depends_on(["Mailer"])
                .base_path("/notes")
                .route(
                    RouteBuilder::post("/", "create")
                        .param(ParamBinding::body_field("title"))
                        .to(|notes: Arc<Notes>, args: Args| async move {
                            let title: String = args.get(0)?;
                            notes.mailer.record_call("notify");
                            let receipt = notes.mailer.next_return().unwrap_or_default();
                            Ok(HttpResponse::created().with_json(&json!({
                                "title": title,
                                "receipt": receipt,
                            }))?)
                        }),
                )
                .route(
                    RouteBuilder::get("/slow", "slow").to(|_: Arc<Notes>, _: Args| async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(HttpResponse::ok())
                    }),
                )
                .route(
                    RouteBuilder::get("/:id", "show")
                        .param(ParamBinding::path("id"))
                        .to(|_: Arc<Notes>, args: Args| async move {
                            let id: String = args.get(0)?;
                            Ok(HttpResponse::ok().with_body(id))
                        }),
                ),
            ),
    )
    .override_provider(ProviderDescriptor::value("Mailer", mailer))
}

#[tokio::test]
async fn test_post_json_uses_override() {
    let mailer = MockService::new().returning("r-1".to_string());
    let app = builder(mailer.clone()).build().unwrap();

    let response = app
        .post_json("/notes", &json!({"title": "groceries"}))
        .await
        .unwrap();

    assert_status(&response, 201);
    assert_json(&response, &json!({"title": "groceries", "receipt": "r-1"}));
    assert_eq!(mailer.times_called("notify"), 1);
}

#[tokio::test]
async fn test_not_found_body() {
    let app = builder(MockService::new()).build().unwrap();

    let response = app.client().delete("/notes/1").await;
    assert_error(&response, 404, "Cannot DELETE /notes/1");
}

#[tokio::test]
async fn test_concurrent_requests() {
    let mailer = MockService::new();
    let app = builder(mailer.clone()).build().unwrap();

    let responses = app
        .client()
        .send_concurrent(TestRequest::post("/notes").json(&json!({"title": "x"})).unwrap(), 25)
        .await;

    assert_eq!(responses.len(), 25);
    assert!(responses.iter().all(TestResponse::is_success));
    assert_eq!(mailer.call_count(), 25);
}

#[tokio::test]
async fn test_timeout_abandons_request() {
    let app = builder(MockService::new()).build().unwrap();
    let client = app.client();

    let abandoned = client
        .send_with_timeout(TestRequest::get("/notes/slow"), Duration::from_millis(10))
        .await;
    assert!(abandoned.is_none());

    let served = client
        .send_with_timeout(TestRequest::get("/notes/7"), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(served.text(), "7");
}

#[tokio::test]
async fn test_missing_body_field() {
    let app = builder(MockService::new()).build().unwrap();

    let response = app
        .request(TestRequest::post("/notes").json(&json!({})).unwrap())
        .await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().unwrap();
    assert_eq!(body["statusCode"], 400);
}
