//! Sample registration application driven by `trellis-demo`
//!
//! Two routes:
//! - `POST /users/register`: binds a nested `User` (with optional
//!   `Address`, tags and preferences) into a `Registration` handler
//! - `GET /admin/{section}`: guarded by a token check

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use trellis_engine::{
    AccessPolicy, Decision, Failure, FailureClass, Handler, Invocation, RecoveryCode, Renderer,
    Request, Response, ResultConfig, RouteConfig, RouteTable, TypeDescriptor, View,
};

#[derive(Debug, Default, Serialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub postcode: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct User {
    pub name: String,
    pub age: u32,
    pub email: Option<String>,
    pub born: Option<NaiveDate>,
    pub address: Option<Address>,
    pub tags: Vec<String>,
    pub preferences: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Registration {
    pub user: Option<User>,
    pub accept_terms: bool,
}

impl Handler for Registration {
    fn invoke(&mut self, call: &mut Invocation<'_>) -> Result<String, Failure> {
        if !call.binding.is_clean() {
            call.messages
                .extend(call.binding.failures().iter().map(ToString::to_string));
            return Ok("input".to_string());
        }
        let Some(user) = self.user.as_ref().filter(|u| !u.name.trim().is_empty()) else {
            call.messages.push("user.name is required".to_string());
            return Ok("input".to_string());
        };
        if user.name.eq_ignore_ascii_case("admin") {
            return Err(anyhow::anyhow!("the name '{}' is reserved", user.name).into());
        }
        if !self.accept_terms {
            return Err(Failure::new(
                FailureClass::new("registration.terms"),
                "the terms must be accepted",
            )
            .with_status(422));
        }

        call.messages.push(format!("Welcome, {}!", user.name));
        Ok("success".to_string())
    }
}

#[derive(Debug, Default)]
pub struct AdminPanel {
    pub section: String,
}

impl Handler for AdminPanel {
    fn invoke(&mut self, call: &mut Invocation<'_>) -> Result<String, Failure> {
        call.messages
            .push(format!("{} of section '{}'", call.operation, self.section));
        Ok("success".to_string())
    }
}

/// Descriptors for every bindable type in the application
pub fn types() -> Vec<TypeDescriptor> {
    vec![
        TypeDescriptor::of::<Registration>()
            .instantiable()
            .optional("user", |r| &r.user, |r| &mut r.user)
            .field("accept_terms", |r| &r.accept_terms, |r| &mut r.accept_terms)
            .build(),
        TypeDescriptor::of::<User>()
            .instantiable()
            .field("name", |u| &u.name, |u| &mut u.name)
            .field("age", |u| &u.age, |u| &mut u.age)
            .optional("email", |u| &u.email, |u| &mut u.email)
            .optional("born", |u| &u.born, |u| &mut u.born)
            .optional("address", |u| &u.address, |u| &mut u.address)
            .list("tags", |u| &u.tags, |u| &mut u.tags)
            .map("preferences", |u| &u.preferences, |u| &mut u.preferences)
            .build(),
        TypeDescriptor::of::<Address>()
            .instantiable()
            .field("street", |a| &a.street, |a| &mut a.street)
            .field("city", |a| &a.city, |a| &mut a.city)
            .optional("postcode", |a| &a.postcode, |a| &mut a.postcode)
            .build(),
        TypeDescriptor::of::<AdminPanel>()
            .instantiable()
            .field("section", |p| &p.section, |p| &mut p.section)
            .build(),
    ]
}

pub fn routes() -> RouteTable {
    let render = |template: &str| ResultConfig::Render {
        template: template.to_string(),
    };

    RouteTable::new()
        .route(
            "POST",
            "/users/register",
            RouteConfig::new("register", "register")
                .result("success", render("users/welcome"))
                .result("input", render("users/form")),
            Registration::default,
        )
        .route(
            "GET",
            "/admin/{section}",
            RouteConfig::new("admin", "overview")
                .guarded_by("admin")
                .result("success", render("admin/overview")),
            AdminPanel::default,
        )
}

/// Grants the `admin` guard when the request carries the expected token
pub struct TokenPolicy {
    token: String,
}

impl TokenPolicy {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AccessPolicy for TokenPolicy {
    fn check(&self, guard: &str, request: &Request) -> Decision {
        match request.parameters().first("token") {
            Some(token) if token == self.token => Decision::Allow,
            _ => Decision::Deny {
                code: RecoveryCode::new("forbidden"),
                message: format!("guard '{}' requires a valid token", guard),
            },
        }
    }
}

/// Plain-text renderer: template name, queued messages, bound user as JSON
pub struct TextRenderer;

impl Renderer for TextRenderer {
    fn render(&self, view: &View<'_>, response: &mut dyn Response) -> Result<(), Failure> {
        response.set_header("Content-Type", "text/plain; charset=utf-8");
        response.write(&format!("== {} ==\n", view.template));
        for message in view.result.messages() {
            response.write(&format!("* {}\n", message));
        }

        let registration = view
            .handler
            .and_then(|handler| handler.as_any().downcast_ref::<Registration>());
        if let Some(user) = registration.and_then(|r| r.user.as_ref()) {
            let json = serde_json::to_string_pretty(user)
                .map_err(|e| Failure::from_error(FailureClass::new("render.serialize"), e))?;
            response.write(&json);
            response.write("\n");
        }
        Ok(())
    }
}
