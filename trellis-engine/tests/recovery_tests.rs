//! Integration tests for typed failure dispatch and the recovery chain

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_engine::{
    BufferedResponse, Engine, EngineConfig, EngineError, Exchange, Failure, FailureClass,
    FailureHandler, FailureOrigin, Flow, FnStage, Handler, InvocationContext, Invocation,
    RecoveryCode, RecoveryState, Request, Response, ResultConfig, RouteConfig, Stage,
};

/// Handler that records which class it was asked to handle
struct Recording {
    code: &'static str,
    status: u16,
    calls: Arc<AtomicUsize>,
}

impl Recording {
    fn new(code: &'static str, status: u16) -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            code,
            status,
            calls: Arc::clone(&calls),
        });
        (handler, calls)
    }
}

impl FailureHandler for Recording {
    fn handle(&self, failure: &Failure, exchange: &mut Exchange) -> Result<RecoveryCode, Failure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        exchange.response.set_status(self.status);
        exchange
            .result
            .push_message(format!("{} handled {}", self.code, failure.class()));
        Ok(RecoveryCode::new(self.code))
    }
}

struct Broken;

impl FailureHandler for Broken {
    fn handle(&self, _failure: &Failure, _exchange: &mut Exchange) -> Result<RecoveryCode, Failure> {
        Err(Failure::handler("handler exploded"))
    }
}

fn failing(class: &'static str) -> Arc<dyn Stage> {
    FnStage::shared("work", move |_chain, _exchange| {
        Err(Failure::new(FailureClass::new(class), format!("{} went wrong", class)))
    })
}

fn config_with_results(results: &[(&str, u16)]) -> EngineConfig {
    let mut config = EngineConfig::default();
    for (code, status) in results {
        config
            .recovery
            .results
            .insert(code.to_string(), ResultConfig::Status { code: *status });
    }
    config
}

fn run(engine: &Engine) -> Result<Exchange, EngineError> {
    engine.handle(Request::new("GET", "/"), Box::new(BufferedResponse::new()))
}

fn status(exchange: &Exchange) -> u16 {
    exchange
        .response_as::<BufferedResponse>()
        .map(|r| r.status())
        .unwrap_or_default()
}

#[test]
fn test_most_specific_ancestor_handles_failure() {
    let (persistence, persistence_calls) = Recording::new("storage", 503);
    let (constraint, constraint_calls) = Recording::new("conflict", 409);
    let engine = Engine::builder(config_with_results(&[("storage", 503), ("conflict", 409)]))
        .stages(vec![failing("persistence.constraint.unique")])
        .failure_handler(FailureClass::new("persistence"), persistence)
        .failure_handler(FailureClass::new("persistence.constraint"), constraint)
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(constraint_calls.load(Ordering::SeqCst), 1);
    assert_eq!(persistence_calls.load(Ordering::SeqCst), 0);
    assert_eq!(status(&exchange), 409);
    assert_eq!(exchange.result.recovery_code().map(|c| c.as_str()), Some("conflict"));
    assert_eq!(exchange.recovery, RecoveryState::Terminal);

    let record = exchange.result.failure().unwrap();
    assert_eq!(record.class, "persistence.constraint.unique");
    assert_eq!(record.origin, FailureOrigin::Stage("work".to_string()));
    assert_eq!(record.recovery_code.as_deref(), Some("conflict"));
}

#[test]
fn test_sibling_class_falls_back_to_ancestor() {
    let (persistence, persistence_calls) = Recording::new("storage", 503);
    let (constraint, constraint_calls) = Recording::new("conflict", 409);
    let engine = Engine::builder(config_with_results(&[("storage", 503), ("conflict", 409)]))
        .stages(vec![failing("persistence.timeout")])
        .failure_handler(FailureClass::new("persistence"), persistence)
        .failure_handler(FailureClass::new("persistence.constraint"), constraint)
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(persistence_calls.load(Ordering::SeqCst), 1);
    assert_eq!(constraint_calls.load(Ordering::SeqCst), 0);
    assert_eq!(status(&exchange), 503);
}

#[test]
fn test_unmatched_failure_uses_default_handler() {
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![failing("io.disk")])
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(status(&exchange), 500);
    assert_eq!(exchange.result.recovery_code().map(|c| c.as_str()), Some("error"));
    assert_eq!(exchange.result.messages(), &["io.disk went wrong"]);
}

#[test]
fn test_default_handler_ignores_status_carried_by_failure() {
    let work = FnStage::shared("work", |_chain, _exchange| {
        Err(Failure::new(FailureClass::new("io.disk"), "disk full").with_status(200))
    });
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![work])
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(status(&exchange), 500);
    assert_eq!(exchange.result.recovery_code().map(|c| c.as_str()), Some("error"));
}

#[test]
fn test_root_handler_catches_everything() {
    let (catch_all, calls) = Recording::new("oops", 418);
    let engine = Engine::builder(config_with_results(&[("oops", 418)]))
        .stages(vec![failing("anything.at.all")])
        .failure_handler(FailureClass::ROOT, catch_all)
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(status(&exchange), 418);
}

#[test]
fn test_configured_default_code_and_status() {
    let toml = r#"
        [recovery]
        default_code = "trouble"
        default_status = 503

        [recovery.results.trouble]
        kind = "status"
        code = 503
    "#;
    let config = EngineConfig::from_toml_str(toml).unwrap();
    let engine = Engine::builder(config)
        .stages(vec![failing("io")])
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(status(&exchange), 503);
    assert_eq!(exchange.result.recovery_code().map(|c| c.as_str()), Some("trouble"));
}

#[test]
fn test_context_survives_into_recovery() {
    #[derive(Default)]
    struct Marker;

    impl Handler for Marker {
        fn invoke(&mut self, _call: &mut Invocation<'_>) -> Result<String, Failure> {
            Ok("success".to_string())
        }
    }

    let push_then_fail = FnStage::shared("work", |_chain, exchange| {
        exchange.contexts.set_current(InvocationContext::new(
            Box::new(Marker),
            Arc::new(RouteConfig::new("marker", "run")),
            "/marker",
            Default::default(),
        ));
        Err(Failure::handler("boom"))
    });
    let seen = Arc::new(AtomicUsize::new(0));
    let observer = {
        let seen = Arc::clone(&seen);
        FnStage::shared("observe", move |chain, exchange: &mut Exchange| {
            if exchange
                .contexts
                .current()
                .is_some_and(|context| context.handler_as::<Marker>().is_some())
            {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            assert_eq!(exchange.recovery, RecoveryState::Recovering);
            chain.proceed(exchange)
        })
    };
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![push_then_fail])
        .recovery_stages(vec![observer])
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(exchange.contexts.is_empty());
}

#[test]
fn test_failing_failure_handler_is_fatal() {
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![failing("io")])
        .failure_handler(FailureClass::new("io"), Arc::new(Broken))
        .build()
        .unwrap();

    match run(&engine) {
        Err(EngineError::Fatal {
            original,
            secondary,
            response_started,
        }) => {
            assert_eq!(original.class().as_str(), "io");
            assert_eq!(secondary.message(), "handler exploded");
            assert!(!response_started);
        }
        other => panic!("expected fatal error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_failing_recovery_chain_is_fatal_and_runs_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let recovery: Arc<dyn Stage> = {
        let attempts = Arc::clone(&attempts);
        FnStage::shared("render-error", move |_chain, exchange: &mut Exchange| {
            attempts.fetch_add(1, Ordering::SeqCst);
            exchange.response.write("partial");
            Err(Failure::handler("template missing"))
        })
    };
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![failing("io")])
        .recovery_stages(vec![recovery])
        .build()
        .unwrap();

    match run(&engine) {
        Err(EngineError::Fatal {
            secondary,
            response_started,
            ..
        }) => {
            assert_eq!(secondary.stage(), Some("render-error"));
            assert!(response_started);
        }
        other => panic!("expected fatal error, got {:?}", other.map(|_| ())),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_short_circuit_in_recovery_chain_is_terminal() {
    let recovery = FnStage::shared("stop", |_chain, _exchange| {
        Ok(Flow::ShortCircuit {
            stage: "stop",
            code: RecoveryCode::new("again"),
            message: None,
        })
    });
    let (handler, calls) = Recording::new("handled", 500);
    let engine = Engine::builder(EngineConfig::default())
        .stages(vec![failing("io")])
        .failure_handler(FailureClass::new("io"), handler)
        .recovery_stages(vec![recovery])
        .build()
        .unwrap();

    let exchange = run(&engine).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(exchange.recovery, RecoveryState::Terminal);
    assert_eq!(exchange.result.recovery_code().map(|c| c.as_str()), Some("handled"));
}
