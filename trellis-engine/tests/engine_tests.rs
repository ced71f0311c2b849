//! End-to-end tests: routing, guards, binding, invocation and response
//! generation through the assembled engine

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use trellis_engine::{
    AccessPolicy, BufferedResponse, Decision, Engine, EngineBuilder, EngineConfig,
    EngineError, Exchange, Failure, Handler, Invocation, RecoveryCode, Renderer, Request,
    Response, ResultConfig, RouteConfig, RouteTable, TypeDescriptor, View,
};

#[derive(Debug, Default)]
struct Profile {
    name: String,
    age: u32,
}

#[derive(Debug, Default)]
struct Profiles {
    id: u64,
    section: String,
    profile: Option<Profile>,
    calls: Arc<AtomicUsize>,
    barrier: Option<Arc<Barrier>>,
}

impl Handler for Profiles {
    fn invoke(&mut self, call: &mut Invocation<'_>) -> Result<String, Failure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match call.operation {
            "save" => {
                if !call.binding.is_clean() {
                    call.messages
                        .extend(call.binding.failures().iter().map(|f| f.path().to_string()));
                    return Ok("input".to_string());
                }
                let name = self.profile.as_ref().map_or("nobody", |p| p.name.as_str());
                call.messages.push(format!("saved {} #{}", name, self.id));
                Ok("success".to_string())
            }
            "view" => {
                call.messages.push(format!("section {}", self.section));
                Ok("success".to_string())
            }
            "sync" => {
                if let Some(barrier) = &self.barrier {
                    barrier.wait();
                }
                call.messages.push(format!("sync {}", self.id));
                Ok("success".to_string())
            }
            "explode" => Err(anyhow::anyhow!("database unreachable").into()),
            "orphan" => Ok("mystery".to_string()),
            _ => Ok("success".to_string()),
        }
    }
}

/// Writes `template|message|message...`
struct EchoRenderer;

impl Renderer for EchoRenderer {
    fn render(&self, view: &View<'_>, response: &mut dyn Response) -> Result<(), Failure> {
        response.write(view.template);
        for message in view.result.messages() {
            response.write("|");
            response.write(message);
        }
        let age = view
            .handler
            .and_then(|h| h.as_any().downcast_ref::<Profiles>())
            .and_then(|p| p.profile.as_ref())
            .map(|p| p.age);
        if let Some(age) = age {
            response.write(&format!("|age {}", age));
        }
        Ok(())
    }
}

struct TokenPolicy;

impl AccessPolicy for TokenPolicy {
    fn check(&self, guard: &str, request: &Request) -> Decision {
        if request.parameters().first("token") == Some("s3cret") {
            Decision::Allow
        } else {
            Decision::Deny {
                code: RecoveryCode::new("forbidden"),
                message: format!("{} requires a token", guard),
            }
        }
    }
}

fn render(template: &str) -> ResultConfig {
    ResultConfig::Render {
        template: template.to_string(),
    }
}

fn routes(calls: Arc<AtomicUsize>, barrier: Option<Arc<Barrier>>) -> RouteTable {
    let make = move || Profiles {
        calls: Arc::clone(&calls),
        barrier: barrier.clone(),
        ..Profiles::default()
    };

    RouteTable::new()
        .route(
            "POST",
            "/profiles/{id}",
            RouteConfig::new("save", "save")
                .result("success", render("profiles/show"))
                .result("input", render("profiles/edit")),
            make.clone(),
        )
        .route(
            "POST",
            "/profiles/{id}/publish",
            RouteConfig::new("publish", "publish").result(
                "success",
                ResultConfig::Redirect {
                    location: "/profiles".to_string(),
                },
            ),
            make.clone(),
        )
        .route(
            "GET",
            "/admin/{section}",
            RouteConfig::new("admin", "view")
                .guarded_by("admin")
                .result("success", render("admin")),
            make.clone(),
        )
        .route(
            "GET",
            "/sync/{id}",
            RouteConfig::new("sync", "sync").result("success", render("sync")),
            make.clone(),
        )
        .route("GET", "/ping", RouteConfig::new("ping", "ping").without_render(), make.clone())
        .route("*", "/broken", RouteConfig::new("broken", "explode"), make.clone())
        .route("GET", "/orphan", RouteConfig::new("orphan", "orphan"), make)
}

fn builder(config: EngineConfig, calls: Arc<AtomicUsize>, barrier: Option<Arc<Barrier>>) -> EngineBuilder {
    Engine::builder(config)
        .routes(Arc::new(routes(calls, barrier)))
        .renderer(Arc::new(EchoRenderer))
        .register_type(
            TypeDescriptor::of::<Profiles>()
                .field("id", |p| &p.id, |p| &mut p.id)
                .field("section", |p| &p.section, |p| &mut p.section)
                .optional("profile", |p| &p.profile, |p| &mut p.profile)
                .build(),
        )
        .register_type(
            TypeDescriptor::of::<Profile>()
                .instantiable()
                .field("name", |p| &p.name, |p| &mut p.name)
                .field("age", |p| &p.age, |p| &mut p.age)
                .build(),
        )
}

fn engine() -> (Engine, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = builder(EngineConfig::default(), Arc::clone(&calls), None)
        .access_policy(Arc::new(TokenPolicy))
        .build()
        .unwrap();
    (engine, calls)
}

fn send(engine: &Engine, request: Request) -> Exchange {
    engine
        .handle(request, Box::new(BufferedResponse::new()))
        .unwrap()
}

fn response(exchange: &Exchange) -> &BufferedResponse {
    exchange.response_as::<BufferedResponse>().unwrap()
}

// ============================================================================
// Primary flow
// ============================================================================

#[test]
fn test_request_binds_invokes_and_renders() {
    let (engine, calls) = engine();
    let request = Request::new("POST", "/profiles/42")
        .with_param("profile.name", "Ada")
        .with_param("profile.age", "36")
        .with_param("submit", "Save");

    let exchange = send(&engine, request);

    let response = response(&exchange);
    assert_eq!(response.status(), 200);
    assert_eq!(response.body(), "profiles/show|saved Ada #42|age 36");
    assert_eq!(exchange.result.outcome(), Some("success"));
    assert_eq!(exchange.binding.skipped(), &["submit".to_string()]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(exchange.contexts.is_empty());
    assert!(exchange.result.recovery_code().is_none());
}

#[test]
fn test_binding_failure_reaches_handler() {
    let (engine, _) = engine();
    let request = Request::new("POST", "/profiles/7")
        .with_param("profile.name", "Ada")
        .with_param("profile.age", "old");

    let exchange = send(&engine, request);

    assert_eq!(response(&exchange).status(), 200);
    assert_eq!(response(&exchange).body(), "profiles/edit|profile.age|age 0");
    assert_eq!(exchange.result.outcome(), Some("input"));
}

#[test]
fn test_unknown_route_is_not_found() {
    let (engine, calls) = engine();

    let exchange = send(&engine, Request::new("GET", "/nowhere"));

    let response = response(&exchange);
    assert_eq!(response.status(), 404);
    assert_eq!(response.body(), "");
    assert_eq!(
        exchange.result.recovery_code().map(|c| c.as_str()),
        Some("not_found")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_method_mismatch_is_not_found() {
    let (engine, _) = engine();

    let exchange = send(&engine, Request::new("GET", "/profiles/1"));

    assert_eq!(response(&exchange).status(), 404);
}

#[test]
fn test_redirect_result_sets_location() {
    let (engine, calls) = engine();

    let exchange = send(&engine, Request::new("POST", "/profiles/3/publish"));

    let response = response(&exchange);
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("location"), Some("/profiles"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_render_flag_off_skips_response() {
    let (engine, calls) = engine();

    let exchange = send(&engine, Request::new("GET", "/ping?verbose=1"));

    assert_eq!(response(&exchange).status(), 200);
    assert_eq!(response(&exchange).body(), "");
    assert_eq!(exchange.result.outcome(), Some("success"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Guards
// ============================================================================

#[test]
fn test_guard_denial_short_circuits() {
    let (engine, calls) = engine();

    let exchange = send(&engine, Request::new("GET", "/admin/reports"));

    assert_eq!(response(&exchange).status(), 403);
    assert_eq!(
        exchange.result.recovery_code().map(|c| c.as_str()),
        Some("forbidden")
    );
    assert_eq!(exchange.result.messages(), &["admin requires a token"]);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(exchange.binding.bound().is_empty());
}

#[test]
fn test_guard_allows_with_token() {
    let (engine, calls) = engine();
    let request = Request::new("GET", "/admin/reports").with_param("token", "s3cret");

    let exchange = send(&engine, request);

    assert_eq!(response(&exchange).status(), 200);
    assert_eq!(response(&exchange).body(), "admin|section reports");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_guard_without_policy_is_a_server_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let engine = builder(EngineConfig::default(), Arc::clone(&calls), None)
        .build()
        .unwrap();

    let exchange = send(&engine, Request::new("GET", "/admin/reports"));

    assert_eq!(response(&exchange).status(), 500);
    assert_eq!(
        exchange.result.failure().map(|f| f.class.as_str()),
        Some("internal.configuration")
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_handler_error_recovers_with_default() {
    let (engine, _) = engine();

    let exchange = send(&engine, Request::new("DELETE", "/broken"));

    assert_eq!(response(&exchange).status(), 500);
    assert_eq!(exchange.result.messages(), &["database unreachable"]);
    let record = exchange.result.failure().unwrap();
    assert_eq!(record.class, "handler");
    assert_eq!(record.recovery_code.as_deref(), Some("error"));
}

#[test]
fn test_unconfigured_outcome_is_a_server_error() {
    let (engine, _) = engine();

    let exchange = send(&engine, Request::new("GET", "/orphan"));

    assert_eq!(response(&exchange).status(), 500);
    assert_eq!(exchange.result.outcome(), Some("mystery"));
    assert_eq!(
        exchange.result.messages(),
        &["no result configured for 'mystery'"]
    );
}

#[test]
fn test_builder_requires_routes_for_default_chain() {
    let result = Engine::builder(EngineConfig::default()).build();

    assert!(matches!(result, Err(EngineError::Assembly(_))));
}

#[test]
fn test_builder_rejects_unbounded_max_index() {
    let mut config = EngineConfig::default();
    config.binding.max_index = usize::MAX;

    let result = Engine::builder(config)
        .routes(Arc::new(RouteTable::new()))
        .build();

    assert!(matches!(result, Err(EngineError::Config(_))));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_file_controls_binding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.toml");
    std::fs::write(
        &path,
        "[binding]\nignore_unknown_parameters = false\n\n[logging]\nlevel = \"debug\"\n",
    )
    .unwrap();
    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.logging.level, "debug");

    let calls = Arc::new(AtomicUsize::new(0));
    let engine = builder(config, calls, None)
        .access_policy(Arc::new(TokenPolicy))
        .build()
        .unwrap();
    let request = Request::new("POST", "/profiles/9")
        .with_param("profile.name", "Ada")
        .with_param("submit", "Save");

    let exchange = send(&engine, request);

    assert!(exchange.binding.failure_for("submit").is_some());
    assert_eq!(exchange.result.outcome(), Some("input"));
    assert!(response(&exchange).body().starts_with("profiles/edit|submit"));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_requests_keep_their_own_context() {
    const REQUESTS: usize = 4;
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(REQUESTS));
    let engine = builder(EngineConfig::default(), Arc::clone(&calls), Some(barrier))
        .build()
        .unwrap();
    let engine = &engine;

    let exchanges: Vec<(usize, Exchange)> = thread::scope(|scope| {
        let handles: Vec<_> = (0..REQUESTS)
            .map(|id| {
                scope.spawn(move || {
                    let request = Request::new("GET", format!("/sync/{}", id));
                    (id, send(engine, request))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), REQUESTS);
    for (id, exchange) in &exchanges {
        assert_eq!(exchange.result.messages(), &[format!("sync {}", id)]);
        assert_eq!(response(exchange).body(), format!("sync|sync {}", id));
        assert!(exchange.contexts.is_empty());
    }
}
